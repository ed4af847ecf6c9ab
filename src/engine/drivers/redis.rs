//! Redis Driver
//!
//! Key-value engines have no tables, so the relational surface is mapped
//! onto key conventions: namespaces are the numbered logical databases,
//! collections are key-prefix groups (text before the first `:`), and
//! `read_table` renders matching keys as key/type/ttl/value rows.
//!
//! Key enumeration always uses cursor-based SCAN; KEYS would block the
//! server on large datasets. Deletes use UNLINK so reclamation happens off
//! the command thread.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::RwLock;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::tls;
use crate::engine::traits::DataEngine;
use crate::engine::types::{
    Collection, CollectionType, ColumnInfo, ConnectionConfig, DataOptions, DatabaseUser,
    Namespace, QueryId, QueryResult, Row, RowData, SessionId, TableColumn, TableSchema, Value,
};

const SCAN_COUNT: usize = 500;
/// Elements shown per aggregate value before truncation.
const PREVIEW_ELEMENTS: isize = 50;

pub struct RedisSession {
    pub manager: ConnectionManager,
}

/// Redis driver implementation
pub struct RedisDriver {
    sessions: Arc<RwLock<HashMap<SessionId, Arc<RedisSession>>>>,
}

impl RedisDriver {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn get_session(&self, session: SessionId) -> EngineResult<Arc<RedisSession>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&session)
            .cloned()
            .ok_or_else(|| EngineError::session_not_found(session))
    }

    fn build_url(config: &ConnectionConfig) -> EngineResult<String> {
        let scheme = tls::redis_scheme(config.tls.as_ref())?;
        let db_index = match config.database.as_deref() {
            None | Some("") => 0,
            Some(raw) => raw.parse::<u32>().map_err(|_| {
                EngineError::configuration(format!(
                    "Redis database must be a numeric index, got '{raw}'"
                ))
            })?,
        };

        let auth = if config.password.is_empty() {
            String::new()
        } else if config.username.is_empty() {
            format!(":{}@", config.password)
        } else {
            format!("{}:{}@", config.username, config.password)
        };

        Ok(format!(
            "{scheme}://{auth}{}:{}/{db_index}",
            config.host, config.port
        ))
    }

    fn map_redis_err(e: redis::RedisError) -> EngineError {
        match e.kind() {
            redis::ErrorKind::AuthenticationFailed => EngineError::auth_failed(e.to_string()),
            redis::ErrorKind::IoError => EngineError::connection_failed(e.to_string()),
            _ => EngineError::rejected(e.to_string()),
        }
    }

    fn redis_to_value(value: &redis::Value) -> Value {
        match value {
            redis::Value::Nil => Value::Null,
            redis::Value::Int(i) => Value::Int(*i),
            redis::Value::Double(f) => Value::Float(*f),
            redis::Value::Boolean(b) => Value::Bool(*b),
            redis::Value::Okay => Value::Text("OK".to_string()),
            redis::Value::SimpleString(s) => Value::Text(s.clone()),
            redis::Value::BulkString(bytes) => match std::str::from_utf8(bytes) {
                Ok(s) => Value::Text(s.to_string()),
                Err(_) => Value::Bytes(bytes.clone()),
            },
            redis::Value::Array(items) | redis::Value::Set(items) => {
                Value::Array(items.iter().map(Self::redis_to_value).collect())
            }
            redis::Value::Map(pairs) => {
                let mut map = serde_json::Map::new();
                for (k, v) in pairs {
                    let key = match Self::redis_to_value(k) {
                        Value::Text(s) => s,
                        other => format!("{other:?}"),
                    };
                    map.insert(
                        key,
                        serde_json::to_value(Self::redis_to_value(v))
                            .unwrap_or(serde_json::Value::Null),
                    );
                }
                Value::Json(serde_json::Value::Object(map))
            }
            other => Value::Text(format!("{other:?}")),
        }
    }

    /// Splits a raw command line into arguments, honoring quoted strings.
    fn split_command(line: &str) -> Vec<String> {
        let mut args = Vec::new();
        let mut current = String::new();
        let mut quote: Option<char> = None;
        for ch in line.chars() {
            match (ch, quote) {
                ('"', None) | ('\'', None) => quote = Some(ch),
                (c, Some(q)) if c == q => quote = None,
                (c, None) if c.is_whitespace() => {
                    if !current.is_empty() {
                        args.push(std::mem::take(&mut current));
                    }
                }
                (c, _) => current.push(c),
            }
        }
        if !current.is_empty() {
            args.push(current);
        }
        args
    }

    /// Groups keys into prefix namespaces on the first `:` delimiter.
    /// Keys without a delimiter land in the catch-all `*` group.
    fn group_by_prefix(keys: &[String]) -> BTreeMap<String, u64> {
        let mut groups: BTreeMap<String, u64> = BTreeMap::new();
        for key in keys {
            let group = match key.split_once(':') {
                Some((prefix, _)) if !prefix.is_empty() => prefix.to_string(),
                _ => "*".to_string(),
            };
            *groups.entry(group).or_insert(0) += 1;
        }
        groups
    }

    async fn scan_keys(
        manager: &mut ConnectionManager,
        pattern: &str,
        limit: Option<u64>,
    ) -> EngineResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(manager)
                .await
                .map_err(Self::map_redis_err)?;

            keys.extend(batch);
            if let Some(limit) = limit {
                if keys.len() as u64 >= limit {
                    keys.truncate(limit as usize);
                    break;
                }
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Renders one key's value for browsing, bounded for aggregates.
    async fn preview_value(
        manager: &mut ConnectionManager,
        key: &str,
        key_type: &str,
    ) -> EngineResult<Value> {
        let value = match key_type {
            "string" => {
                let v: Option<String> = manager.get(key).await.map_err(Self::map_redis_err)?;
                v.map(Value::Text).unwrap_or(Value::Null)
            }
            "list" => {
                let items: Vec<String> = manager
                    .lrange(key, 0, PREVIEW_ELEMENTS - 1)
                    .await
                    .map_err(Self::map_redis_err)?;
                Value::Array(items.into_iter().map(Value::Text).collect())
            }
            "set" => {
                let items: Vec<String> = redis::cmd("SRANDMEMBER")
                    .arg(key)
                    .arg(PREVIEW_ELEMENTS)
                    .query_async(manager)
                    .await
                    .map_err(Self::map_redis_err)?;
                Value::Array(items.into_iter().map(Value::Text).collect())
            }
            "zset" => {
                let items: Vec<(String, f64)> = manager
                    .zrange_withscores(key, 0, PREVIEW_ELEMENTS - 1)
                    .await
                    .map_err(Self::map_redis_err)?;
                let mut map = serde_json::Map::new();
                for (member, score) in items {
                    map.insert(
                        member,
                        serde_json::Number::from_f64(score)
                            .map(serde_json::Value::Number)
                            .unwrap_or(serde_json::Value::Null),
                    );
                }
                Value::Json(serde_json::Value::Object(map))
            }
            "hash" => {
                let fields: HashMap<String, String> =
                    manager.hgetall(key).await.map_err(Self::map_redis_err)?;
                let mut map = serde_json::Map::new();
                for (field, value) in fields {
                    map.insert(field, serde_json::Value::String(value));
                }
                Value::Json(serde_json::Value::Object(map))
            }
            "stream" => Value::Text("(stream)".to_string()),
            _ => Value::Null,
        };
        Ok(value)
    }
}

impl Default for RedisDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataEngine for RedisDriver {
    fn driver_id(&self) -> &'static str {
        "redis"
    }

    fn driver_name(&self) -> &'static str {
        "Redis"
    }

    async fn test_connection(&self, config: &ConnectionConfig) -> EngineResult<()> {
        let url = Self::build_url(config)?;
        let client = redis::Client::open(url)
            .map_err(|e| EngineError::configuration(e.to_string()))?;
        let mut manager = ConnectionManager::new(client)
            .await
            .map_err(Self::map_redis_err)?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut manager)
            .await
            .map_err(Self::map_redis_err)?;
        if pong != "PONG" {
            return Err(EngineError::connection_failed(format!(
                "unexpected PING reply: {pong}"
            )));
        }
        Ok(())
    }

    async fn connect(&self, config: &ConnectionConfig) -> EngineResult<SessionId> {
        let url = Self::build_url(config)?;
        let client = redis::Client::open(url)
            .map_err(|e| EngineError::configuration(e.to_string()))?;
        let mut manager = ConnectionManager::new(client)
            .await
            .map_err(Self::map_redis_err)?;

        let _: String = redis::cmd("PING")
            .query_async(&mut manager)
            .await
            .map_err(Self::map_redis_err)?;

        let session_id = SessionId::new();
        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id, Arc::new(RedisSession { manager }));

        Ok(session_id)
    }

    async fn disconnect(&self, session: SessionId) -> EngineResult<()> {
        let mut sessions = self.sessions.write().await;
        sessions
            .remove(&session)
            .ok_or_else(|| EngineError::session_not_found(session))?;
        Ok(())
    }

    async fn ping(&self, session: SessionId) -> EngineResult<bool> {
        let redis_session = self.get_session(session).await?;
        let mut manager = redis_session.manager.clone();
        Ok(redis::cmd("PING")
            .query_async::<String>(&mut manager)
            .await
            .is_ok())
    }

    async fn execute(
        &self,
        session: SessionId,
        query: &str,
        _query_id: QueryId,
    ) -> EngineResult<QueryResult> {
        let redis_session = self.get_session(session).await?;
        let mut manager = redis_session.manager.clone();
        let start = Instant::now();

        let args = Self::split_command(query);
        let Some((command, rest)) = args.split_first() else {
            return Err(EngineError::rejected("empty command"));
        };
        if command.eq_ignore_ascii_case("KEYS") {
            return Err(EngineError::rejected(
                "KEYS blocks the server; use SCAN instead",
            ));
        }

        let mut cmd = redis::cmd(command);
        for arg in rest {
            cmd.arg(arg);
        }
        let reply: redis::Value = cmd
            .query_async(&mut manager)
            .await
            .map_err(Self::map_redis_err)?;

        let execution_time_ms = start.elapsed().as_micros() as f64 / 1000.0;
        let rows = match Self::redis_to_value(&reply) {
            Value::Array(items) => items.into_iter().map(|v| Row { values: vec![v] }).collect(),
            single => vec![Row { values: vec![single] }],
        };

        Ok(QueryResult {
            columns: vec![ColumnInfo {
                name: "value".to_string(),
                data_type: "mixed".to_string(),
                nullable: true,
            }],
            rows,
            affected_rows: None,
            execution_time_ms,
        })
    }

    async fn list_namespaces(&self, session: SessionId) -> EngineResult<Vec<Namespace>> {
        let redis_session = self.get_session(session).await?;
        let mut manager = redis_session.manager.clone();

        let reply: HashMap<String, String> = redis::cmd("CONFIG")
            .arg("GET")
            .arg("databases")
            .query_async(&mut manager)
            .await
            .map_err(Self::map_redis_err)?;

        let count: u32 = reply
            .get("databases")
            .and_then(|v| v.parse().ok())
            .unwrap_or(16);

        Ok((0..count).map(|i| Namespace::new(i.to_string())).collect())
    }

    async fn list_collections(
        &self,
        session: SessionId,
        namespace: &Namespace,
    ) -> EngineResult<Vec<Collection>> {
        let redis_session = self.get_session(session).await?;
        let mut manager = redis_session.manager.clone();

        let keys = Self::scan_keys(&mut manager, "*", None).await?;
        let groups = Self::group_by_prefix(&keys);

        Ok(groups
            .into_keys()
            .map(|name| Collection {
                namespace: namespace.clone(),
                name,
                collection_type: CollectionType::KeyNamespace,
            })
            .collect())
    }

    async fn describe_table(
        &self,
        _session: SessionId,
        _namespace: &Namespace,
        _table: &str,
    ) -> EngineResult<TableSchema> {
        // Every key group renders with the same synthetic shape.
        Ok(TableSchema {
            columns: vec![
                TableColumn {
                    name: "key".to_string(),
                    data_type: "string".to_string(),
                    nullable: false,
                    default_value: None,
                    is_primary_key: true,
                },
                TableColumn {
                    name: "type".to_string(),
                    data_type: "string".to_string(),
                    nullable: false,
                    default_value: None,
                    is_primary_key: false,
                },
                TableColumn {
                    name: "ttl".to_string(),
                    data_type: "int64".to_string(),
                    nullable: false,
                    default_value: None,
                    is_primary_key: false,
                },
                TableColumn {
                    name: "value".to_string(),
                    data_type: "mixed".to_string(),
                    nullable: true,
                    default_value: None,
                    is_primary_key: false,
                },
            ],
            primary_key: Some(vec!["key".to_string()]),
            row_count_estimate: None,
        })
    }

    async fn read_table(
        &self,
        session: SessionId,
        _namespace: &Namespace,
        table: &str,
        options: &DataOptions,
    ) -> EngineResult<QueryResult> {
        let redis_session = self.get_session(session).await?;
        let mut manager = redis_session.manager.clone();
        let start = Instant::now();

        let pattern = if table == "*" {
            "*".to_string()
        } else {
            format!("{table}:*")
        };

        let offset = options.offset.unwrap_or(0);
        let scan_limit = options.limit.map(|l| l + offset);
        let mut keys = Self::scan_keys(&mut manager, &pattern, scan_limit).await?;
        keys = keys.into_iter().skip(offset as usize).collect();
        if let Some(limit) = options.limit {
            keys.truncate(limit as usize);
        }

        let mut rows = Vec::with_capacity(keys.len());
        for key in &keys {
            let key_type: String = redis::cmd("TYPE")
                .arg(key)
                .query_async(&mut manager)
                .await
                .map_err(Self::map_redis_err)?;
            let ttl: i64 = manager.ttl(key).await.map_err(Self::map_redis_err)?;
            let value = Self::preview_value(&mut manager, key, &key_type).await?;

            rows.push(Row {
                values: vec![
                    Value::Text(key.clone()),
                    Value::Text(key_type),
                    Value::Int(ttl),
                    value,
                ],
            });
        }

        Ok(QueryResult {
            columns: vec![
                ColumnInfo {
                    name: "key".to_string(),
                    data_type: "string".to_string(),
                    nullable: false,
                },
                ColumnInfo {
                    name: "type".to_string(),
                    data_type: "string".to_string(),
                    nullable: false,
                },
                ColumnInfo {
                    name: "ttl".to_string(),
                    data_type: "int64".to_string(),
                    nullable: false,
                },
                ColumnInfo {
                    name: "value".to_string(),
                    data_type: "mixed".to_string(),
                    nullable: true,
                },
            ],
            rows,
            affected_rows: None,
            execution_time_ms: start.elapsed().as_micros() as f64 / 1000.0,
        })
    }

    // ==================== Users ====================

    async fn list_users(&self, session: SessionId) -> EngineResult<Vec<DatabaseUser>> {
        let redis_session = self.get_session(session).await?;
        let mut manager = redis_session.manager.clone();

        // ACL LIST lines look like "user default on nopass ~* &* +@all".
        let lines: Vec<String> = redis::cmd("ACL")
            .arg("LIST")
            .query_async(&mut manager)
            .await
            .map_err(Self::map_redis_err)?;

        Ok(lines
            .iter()
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                if parts.next() != Some("user") {
                    return None;
                }
                let name = parts.next()?.to_string();
                Some(DatabaseUser {
                    name,
                    privileges: parts.map(str::to_string).collect(),
                })
            })
            .collect())
    }

    // ==================== Row mutation ====================
    // A "row" is one key: inserts expect `key` and `value` fields, deletes
    // target the `key` field.

    async fn insert_row(
        &self,
        session: SessionId,
        _namespace: &Namespace,
        table: &str,
        data: &RowData,
    ) -> EngineResult<QueryResult> {
        let redis_session = self.get_session(session).await?;
        let mut manager = redis_session.manager.clone();

        let key = match data.columns.get("key") {
            Some(Value::Text(k)) => k.clone(),
            _ => {
                return Err(EngineError::rejected(
                    "Redis insert requires a text 'key' field",
                ))
            }
        };
        let qualified = if table == "*" || key.contains(':') {
            key
        } else {
            format!("{table}:{key}")
        };
        let value = match data.columns.get("value") {
            Some(Value::Text(v)) => v.clone(),
            Some(Value::Int(i)) => i.to_string(),
            Some(Value::Float(f)) => f.to_string(),
            Some(Value::Json(j)) => j.to_string(),
            _ => {
                return Err(EngineError::rejected(
                    "Redis insert requires a 'value' field",
                ))
            }
        };

        let start = Instant::now();
        let _: () = manager
            .set(&qualified, value)
            .await
            .map_err(Self::map_redis_err)?;

        Ok(QueryResult::with_affected_rows(
            1,
            start.elapsed().as_micros() as f64 / 1000.0,
        ))
    }

    async fn delete_row(
        &self,
        session: SessionId,
        _namespace: &Namespace,
        _table: &str,
        primary_key: &RowData,
    ) -> EngineResult<QueryResult> {
        let redis_session = self.get_session(session).await?;
        let mut manager = redis_session.manager.clone();

        let key = match primary_key.columns.get("key") {
            Some(Value::Text(k)) => k.clone(),
            _ => {
                return Err(EngineError::rejected(
                    "Redis delete requires a text 'key' field",
                ))
            }
        };

        let start = Instant::now();
        let removed: u64 = redis::cmd("UNLINK")
            .arg(&key)
            .query_async(&mut manager)
            .await
            .map_err(Self::map_redis_err)?;

        Ok(QueryResult::with_affected_rows(
            removed,
            start.elapsed().as_micros() as f64 / 1000.0,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{EngineKind, TlsConfig};

    #[test]
    fn keys_group_on_first_delimiter() {
        let keys = vec![
            "user:1".to_string(),
            "user:2".to_string(),
            "session:abc".to_string(),
            "counter".to_string(),
            ":odd".to_string(),
        ];
        let groups = RedisDriver::group_by_prefix(&keys);

        assert_eq!(groups.get("user"), Some(&2));
        assert_eq!(groups.get("session"), Some(&1));
        assert_eq!(groups.get("*"), Some(&2));
    }

    #[test]
    fn command_line_splits_respect_quotes() {
        let args = RedisDriver::split_command(r#"SET greeting "hello world" EX 60"#);
        assert_eq!(args, vec!["SET", "greeting", "hello world", "EX", "60"]);

        let args = RedisDriver::split_command("SCAN 0 MATCH user:* COUNT 100");
        assert_eq!(args.len(), 6);
    }

    #[test]
    fn url_carries_database_index_and_scheme() {
        let mut config = ConnectionConfig {
            engine: EngineKind::Redis,
            host: "cache.internal".into(),
            port: 6379,
            username: String::new(),
            password: "hunter2".into(),
            database: Some("3".into()),
            ssh_tunnel: None,
            tls: None,
            name: None,
            color: None,
            folder: None,
        };
        assert_eq!(
            RedisDriver::build_url(&config).expect("url"),
            "redis://:hunter2@cache.internal:6379/3"
        );

        config.tls = Some(TlsConfig {
            enabled: true,
            ca_cert: None,
            client_cert: None,
            client_key: None,
            reject_unauthorized: true,
        });
        assert!(RedisDriver::build_url(&config)
            .expect("url")
            .starts_with("rediss://"));
    }

    #[test]
    fn non_numeric_database_is_a_configuration_error() {
        let config = ConnectionConfig {
            engine: EngineKind::Redis,
            host: "localhost".into(),
            port: 6379,
            username: String::new(),
            password: String::new(),
            database: Some("mydb".into()),
            ssh_tunnel: None,
            tls: None,
            name: None,
            color: None,
            folder: None,
        };
        assert!(RedisDriver::build_url(&config).is_err());
    }

    #[test]
    fn bulk_strings_decode_to_text_or_bytes() {
        assert_eq!(
            RedisDriver::redis_to_value(&redis::Value::BulkString(b"plain".to_vec())),
            Value::Text("plain".into())
        );
        assert_eq!(
            RedisDriver::redis_to_value(&redis::Value::BulkString(vec![0xff, 0xfe])),
            Value::Bytes(vec![0xff, 0xfe])
        );
        assert_eq!(
            RedisDriver::redis_to_value(&redis::Value::Nil),
            Value::Null
        );
    }
}
