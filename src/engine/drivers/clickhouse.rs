//! ClickHouse Driver
//!
//! Speaks to ClickHouse over the HTTP interface. Dynamic queries are fetched
//! in `JSONCompactEachRowWithNames` format (a header row of column names,
//! then positional value arrays) because result shapes are not known at
//! compile time; introspection reads the `system` database in `JSONEachRow`.
//!
//! Every statement is tagged with a client-generated `query_id`, which is
//! what `KILL QUERY` targets for cancellation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use clickhouse::Client;
use tokio::sync::{Mutex, RwLock};

use crate::engine::base::{render_select, SqlDialect};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::tls;
use crate::engine::traits::DataEngine;
use crate::engine::types::{
    Collection, CollectionType, ColumnInfo, ColumnSpec, ConnectionConfig, DataOptions,
    DatabaseUser, IndexSpec, Namespace, QueryId, QueryResult, Row, RowData,
    SchemaOperationResult, SessionId, TableColumn, TableSchema, TableSpec, Value, ViewInfo,
};

const DIALECT: SqlDialect = SqlDialect::ClickHouse;
const DEFAULT_PORT: u16 = 8123;

pub struct ClickHouseSession {
    pub client: Client,
    pub database: String,
    /// query_id strings for statements still in flight.
    pub active_queries: Mutex<HashMap<QueryId, String>>,
}

/// ClickHouse driver implementation
pub struct ClickHouseDriver {
    sessions: Arc<RwLock<HashMap<SessionId, Arc<ClickHouseSession>>>>,
}

impl ClickHouseDriver {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn get_session(&self, session: SessionId) -> EngineResult<Arc<ClickHouseSession>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&session)
            .cloned()
            .ok_or_else(|| EngineError::session_not_found(session))
    }

    fn build_client(config: &ConnectionConfig) -> EngineResult<(Client, String)> {
        let scheme = tls::clickhouse_scheme(config.tls.as_ref())?;
        let port = if config.port > 0 { config.port } else { DEFAULT_PORT };
        let database = config
            .database
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let username = if config.username.is_empty() {
            "default".to_string()
        } else {
            config.username.clone()
        };

        let client = Client::default()
            .with_url(format!("{scheme}://{}:{port}", config.host))
            .with_user(&username)
            .with_password(&config.password)
            .with_database(&database);

        Ok((client, database))
    }

    fn map_ch_err(e: clickhouse::error::Error) -> EngineError {
        let text = e.to_string();
        match e {
            clickhouse::error::Error::Network(_) | clickhouse::error::Error::TimedOut => {
                EngineError::connection_failed(text)
            }
            clickhouse::error::Error::BadResponse(msg) => {
                // Code 516 is AUTHENTICATION_FAILED.
                if msg.contains("Code: 516") || msg.contains("Authentication failed") {
                    EngineError::auth_failed(msg)
                } else {
                    EngineError::rejected(msg)
                }
            }
            _ => EngineError::rejected(text),
        }
    }

    fn json_to_value(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Text(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Self::json_to_value).collect())
            }
            obj @ serde_json::Value::Object(_) => Value::Json(obj.clone()),
        }
    }

    fn inline_value(value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Value::Bytes(b) => {
                use base64::Engine as _;
                format!(
                    "base64Decode('{}')",
                    base64::engine::general_purpose::STANDARD.encode(b)
                )
            }
            Value::Json(j) => Self::inline_value(&Value::Text(j.to_string())),
            Value::Array(items) => {
                let rendered: Vec<String> = items.iter().map(Self::inline_value).collect();
                format!("[{}]", rendered.join(", "))
            }
        }
    }

    /// Replaces `?` placeholders with escaped literals, skipping quoted text.
    fn substitute_params(sql: &str, params: &[Value]) -> String {
        let mut out = String::with_capacity(sql.len());
        let mut next = params.iter();
        let mut in_string = false;
        for ch in sql.chars() {
            match ch {
                '\'' => {
                    in_string = !in_string;
                    out.push(ch);
                }
                '?' if !in_string => match next.next() {
                    Some(value) => out.push_str(&Self::inline_value(value)),
                    None => out.push(ch),
                },
                _ => out.push(ch),
            }
        }
        out
    }

    async fn fetch_format_bytes(client: &Client, sql: &str, format: &str) -> EngineResult<Vec<u8>> {
        let mut cursor = client
            .query(sql)
            .fetch_bytes(format)
            .map_err(Self::map_ch_err)?;

        let mut bytes = Vec::new();
        while let Some(chunk) = cursor.next().await.map_err(Self::map_ch_err)? {
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }

    /// Runs an introspection statement, parsing the JSONEachRow stream into
    /// one JSON object per row.
    async fn fetch_rows(client: &Client, sql: &str) -> EngineResult<Vec<serde_json::Value>> {
        let bytes = Self::fetch_format_bytes(client, sql, "JSONEachRow").await?;
        let content = String::from_utf8_lossy(&bytes);
        let mut rows = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let parsed: serde_json::Value = serde_json::from_str(line)
                .map_err(|e| EngineError::rejected(format!("malformed result row: {e}")))?;
            rows.push(parsed);
        }
        Ok(rows)
    }

    /// Runs a dynamic statement, keeping the query's column order. The
    /// JSONCompactEachRowWithNames stream starts with a header row of
    /// names; object-keyed formats would lose the order to key sorting.
    async fn fetch_table(
        client: &Client,
        sql: &str,
    ) -> EngineResult<(Vec<String>, Vec<Vec<serde_json::Value>>)> {
        let bytes = Self::fetch_format_bytes(client, sql, "JSONCompactEachRowWithNames").await?;
        Self::parse_compact_rows(&String::from_utf8_lossy(&bytes))
    }

    fn parse_compact_rows(
        content: &str,
    ) -> EngineResult<(Vec<String>, Vec<Vec<serde_json::Value>>)> {
        let mut lines = content.lines().filter(|line| !line.trim().is_empty());

        let names: Vec<String> = match lines.next() {
            Some(header) => serde_json::from_str(header)
                .map_err(|e| EngineError::rejected(format!("malformed result header: {e}")))?,
            None => return Ok((Vec::new(), Vec::new())),
        };

        let mut rows = Vec::new();
        for line in lines {
            let parsed: Vec<serde_json::Value> = serde_json::from_str(line)
                .map_err(|e| EngineError::rejected(format!("malformed result row: {e}")))?;
            rows.push(parsed);
        }
        Ok((names, rows))
    }

    fn table_to_result(
        names: Vec<String>,
        json_rows: Vec<Vec<serde_json::Value>>,
        started: Instant,
    ) -> QueryResult {
        let execution_time_ms = started.elapsed().as_micros() as f64 / 1000.0;

        let columns: Vec<ColumnInfo> = names
            .iter()
            .map(|name| ColumnInfo {
                name: name.clone(),
                data_type: "String".to_string(),
                nullable: true,
            })
            .collect();

        let rows: Vec<Row> = json_rows
            .iter()
            .map(|row| Row {
                values: (0..names.len())
                    .map(|i| row.get(i).map(Self::json_to_value).unwrap_or(Value::Null))
                    .collect(),
            })
            .collect();

        QueryResult {
            columns,
            rows,
            affected_rows: None,
            execution_time_ms,
        }
    }

    async fn run_ddl(client: &Client, sql: String) -> EngineResult<SchemaOperationResult> {
        match client.query(&sql).execute().await {
            Ok(()) => Ok(SchemaOperationResult::ok(sql)),
            Err(e) => match Self::map_ch_err(e) {
                EngineError::Rejected { message } => {
                    Ok(SchemaOperationResult::failed_with_sql(message, sql))
                }
                other => Err(other),
            },
        }
    }

    fn table_ref(&self, namespace: &Namespace, table: &str) -> String {
        format!(
            "{}.{}",
            DIALECT.quote_ident(&namespace.database),
            DIALECT.quote_ident(table)
        )
    }

    fn column_def(column: &ColumnSpec) -> String {
        let mut data_type = column.data_type.clone();
        if column.nullable && !data_type.starts_with("Nullable(") {
            data_type = format!("Nullable({data_type})");
        }
        let mut def = format!("{} {data_type}", DIALECT.quote_ident(&column.name));
        if let Some(default) = &column.default_value {
            def.push_str(&format!(" DEFAULT {default}"));
        }
        def
    }

    fn create_table_sql(namespace: &Namespace, spec: &TableSpec) -> String {
        let cols: Vec<String> = spec
            .columns
            .iter()
            .map(|c| format!("    {}", Self::column_def(c)))
            .collect();

        let table_engine = spec.engine.as_deref().unwrap_or("MergeTree");
        let order_by = if spec.order_by.is_empty() {
            "tuple()".to_string()
        } else {
            let quoted: Vec<String> =
                spec.order_by.iter().map(|c| DIALECT.quote_ident(c)).collect();
            format!("({})", quoted.join(", "))
        };

        let mut sql = format!(
            "CREATE TABLE {}.{} (\n{}\n) ENGINE = {table_engine}\nORDER BY {order_by}",
            DIALECT.quote_ident(&namespace.database),
            DIALECT.quote_ident(&spec.name),
            cols.join(",\n")
        );
        if let Some(partition) = &spec.partition_by {
            sql.push_str(&format!("\nPARTITION BY {partition}"));
        }
        sql
    }
}

impl Default for ClickHouseDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataEngine for ClickHouseDriver {
    fn driver_id(&self) -> &'static str {
        "clickhouse"
    }

    fn driver_name(&self) -> &'static str {
        "ClickHouse"
    }

    async fn test_connection(&self, config: &ConnectionConfig) -> EngineResult<()> {
        let (client, _) = Self::build_client(config)?;
        let _: u8 = client
            .query("SELECT 1")
            .fetch_one()
            .await
            .map_err(Self::map_ch_err)?;
        Ok(())
    }

    async fn connect(&self, config: &ConnectionConfig) -> EngineResult<SessionId> {
        let (client, database) = Self::build_client(config)?;

        let _: u8 = client
            .query("SELECT 1")
            .fetch_one()
            .await
            .map_err(Self::map_ch_err)?;

        let session_id = SessionId::new();
        let session = Arc::new(ClickHouseSession {
            client,
            database,
            active_queries: Mutex::new(HashMap::new()),
        });

        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id, session);

        Ok(session_id)
    }

    async fn disconnect(&self, session: SessionId) -> EngineResult<()> {
        let mut sessions = self.sessions.write().await;
        sessions
            .remove(&session)
            .ok_or_else(|| EngineError::session_not_found(session))?;
        // HTTP client; nothing to tear down beyond dropping it.
        Ok(())
    }

    async fn ping(&self, session: SessionId) -> EngineResult<bool> {
        let ch_session = self.get_session(session).await?;
        Ok(ch_session
            .client
            .query("SELECT 1")
            .fetch_one::<u8>()
            .await
            .is_ok())
    }

    async fn execute(
        &self,
        session: SessionId,
        query: &str,
        query_id: QueryId,
    ) -> EngineResult<QueryResult> {
        let ch_session = self.get_session(session).await?;
        let start = Instant::now();

        let ch_query_id = uuid::Uuid::new_v4().to_string();
        {
            let mut active = ch_session.active_queries.lock().await;
            active.insert(query_id, ch_query_id.clone());
        }
        let tagged = ch_session
            .client
            .clone()
            .with_option("query_id", &ch_query_id);

        let trimmed = query.trim().to_uppercase();
        let returns_rows = trimmed.starts_with("SELECT")
            || trimmed.starts_with("WITH")
            || trimmed.starts_with("SHOW")
            || trimmed.starts_with("DESCRIBE")
            || trimmed.starts_with("EXPLAIN");

        let result = if returns_rows {
            Self::fetch_table(&tagged, query)
                .await
                .map(|(names, rows)| Self::table_to_result(names, rows, start))
        } else {
            tagged
                .query(query)
                .execute()
                .await
                .map_err(Self::map_ch_err)
                .map(|()| {
                    let mut empty = QueryResult::empty();
                    empty.execution_time_ms = start.elapsed().as_micros() as f64 / 1000.0;
                    empty
                })
        };

        let mut active = ch_session.active_queries.lock().await;
        active.remove(&query_id);
        result
    }

    async fn cancel(&self, session: SessionId, query_id: QueryId) -> EngineResult<bool> {
        let ch_session = self.get_session(session).await?;

        let ch_query_id = {
            let active = ch_session.active_queries.lock().await;
            active.get(&query_id).cloned()
        };
        let Some(ch_query_id) = ch_query_id else {
            return Ok(false);
        };

        ch_session
            .client
            .query("KILL QUERY WHERE query_id = ?")
            .bind(ch_query_id)
            .execute()
            .await
            .map_err(Self::map_ch_err)?;
        Ok(true)
    }

    async fn list_namespaces(&self, session: SessionId) -> EngineResult<Vec<Namespace>> {
        let ch_session = self.get_session(session).await?;
        let rows = Self::fetch_rows(
            &ch_session.client,
            "SELECT name FROM system.databases \
             WHERE name NOT IN ('system', 'INFORMATION_SCHEMA', 'information_schema') \
             ORDER BY name",
        )
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| row.get("name").and_then(|v| v.as_str()))
            .map(Namespace::new)
            .collect())
    }

    async fn list_collections(
        &self,
        session: SessionId,
        namespace: &Namespace,
    ) -> EngineResult<Vec<Collection>> {
        let ch_session = self.get_session(session).await?;
        let sql = Self::substitute_params(
            "SELECT name, engine FROM system.tables WHERE database = ? ORDER BY name",
            &[Value::Text(namespace.database.clone())],
        );
        let rows = Self::fetch_rows(&ch_session.client, &sql).await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let name = row.get("name")?.as_str()?;
                let engine = row.get("engine").and_then(|v| v.as_str()).unwrap_or("");
                Some(Collection {
                    namespace: namespace.clone(),
                    name: name.to_string(),
                    collection_type: match engine {
                        "View" => CollectionType::View,
                        "MaterializedView" => CollectionType::MaterializedView,
                        _ => CollectionType::Table,
                    },
                })
            })
            .collect())
    }

    async fn describe_table(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
    ) -> EngineResult<TableSchema> {
        let ch_session = self.get_session(session).await?;
        let sql = Self::substitute_params(
            "SELECT name, type, default_expression, is_in_primary_key \
             FROM system.columns WHERE database = ? AND table = ? ORDER BY position",
            &[
                Value::Text(namespace.database.clone()),
                Value::Text(table.to_string()),
            ],
        );
        let rows = Self::fetch_rows(&ch_session.client, &sql).await?;

        if rows.is_empty() {
            return Err(EngineError::rejected(format!("no such table: {table}")));
        }

        let mut pk_columns = Vec::new();
        let columns: Vec<TableColumn> = rows
            .iter()
            .filter_map(|row| {
                let name = row.get("name")?.as_str()?.to_string();
                let data_type = row.get("type")?.as_str()?.to_string();
                let default_expression = row
                    .get("default_expression")
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
                let is_pk = row
                    .get("is_in_primary_key")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0)
                    == 1;
                if is_pk {
                    pk_columns.push(name.clone());
                }
                Some(TableColumn {
                    nullable: data_type.starts_with("Nullable("),
                    name,
                    data_type,
                    default_value: default_expression,
                    is_primary_key: is_pk,
                })
            })
            .collect();

        Ok(TableSchema {
            columns,
            primary_key: if pk_columns.is_empty() {
                None
            } else {
                Some(pk_columns)
            },
            row_count_estimate: None,
        })
    }

    async fn table_ddl(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
    ) -> EngineResult<String> {
        let ch_session = self.get_session(session).await?;
        let rows = Self::fetch_rows(
            &ch_session.client,
            &format!("SHOW CREATE TABLE {}", self.table_ref(namespace, table)),
        )
        .await?;

        rows.first()
            .and_then(|row| row.as_object())
            .and_then(|obj| obj.values().next())
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| EngineError::rejected(format!("no such table: {table}")))
    }

    async fn read_table(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        options: &DataOptions,
    ) -> EngineResult<QueryResult> {
        let ch_session = self.get_session(session).await?;
        let start = Instant::now();

        let fragment = render_select(&self.table_ref(namespace, table), options, DIALECT)?;
        let sql = Self::substitute_params(&fragment.sql, &fragment.params);

        let (names, rows) = Self::fetch_table(&ch_session.client, &sql).await?;
        Ok(Self::table_to_result(names, rows, start))
    }

    fn data_types(&self) -> Vec<&'static str> {
        vec![
            "UInt8", "UInt16", "UInt32", "UInt64", "Int8", "Int16", "Int32", "Int64",
            "Float32", "Float64", "Decimal(18, 4)", "String", "FixedString(16)", "UUID",
            "Date", "DateTime", "DateTime64(3)", "Enum8", "Array(String)", "Map(String, String)",
            "Bool", "IPv4", "IPv6",
        ]
    }

    // ==================== Column DDL ====================

    async fn add_column(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        column: &ColumnSpec,
    ) -> EngineResult<SchemaOperationResult> {
        let ch_session = self.get_session(session).await?;
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.table_ref(namespace, table),
            Self::column_def(column)
        );
        Self::run_ddl(&ch_session.client, sql).await
    }

    async fn modify_column(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        column: &ColumnSpec,
    ) -> EngineResult<SchemaOperationResult> {
        let ch_session = self.get_session(session).await?;
        let sql = format!(
            "ALTER TABLE {} MODIFY COLUMN {}",
            self.table_ref(namespace, table),
            Self::column_def(column)
        );
        Self::run_ddl(&ch_session.client, sql).await
    }

    async fn drop_column(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        column: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let ch_session = self.get_session(session).await?;
        let sql = format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.table_ref(namespace, table),
            DIALECT.quote_ident(column)
        );
        Self::run_ddl(&ch_session.client, sql).await
    }

    async fn rename_column(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        old_name: &str,
        new_name: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let ch_session = self.get_session(session).await?;
        let sql = format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            self.table_ref(namespace, table),
            DIALECT.quote_ident(old_name),
            DIALECT.quote_ident(new_name)
        );
        Self::run_ddl(&ch_session.client, sql).await
    }

    // ==================== Index DDL ====================
    // ClickHouse secondary indexes are data-skipping indexes attached via
    // ALTER TABLE; uniqueness is not enforceable.

    async fn create_index(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        index: &IndexSpec,
    ) -> EngineResult<SchemaOperationResult> {
        let ch_session = self.get_session(session).await?;

        if index.unique {
            return Err(EngineError::not_supported(
                "ClickHouse does not enforce unique indexes",
            ));
        }

        let cols: Vec<String> = index.columns.iter().map(|c| DIALECT.quote_ident(c)).collect();
        let index_type = index.index_type.as_deref().unwrap_or("minmax");
        let granularity = index.granularity.unwrap_or(1);
        let sql = format!(
            "ALTER TABLE {} ADD INDEX {} ({}) TYPE {index_type} GRANULARITY {granularity}",
            self.table_ref(namespace, table),
            DIALECT.quote_ident(&index.name),
            cols.join(", ")
        );
        Self::run_ddl(&ch_session.client, sql).await
    }

    async fn drop_index(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        index: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let ch_session = self.get_session(session).await?;
        let sql = format!(
            "ALTER TABLE {} DROP INDEX {}",
            self.table_ref(namespace, table),
            DIALECT.quote_ident(index)
        );
        Self::run_ddl(&ch_session.client, sql).await
    }

    // ==================== Table DDL ====================

    async fn create_table(
        &self,
        session: SessionId,
        namespace: &Namespace,
        spec: &TableSpec,
    ) -> EngineResult<SchemaOperationResult> {
        let ch_session = self.get_session(session).await?;
        let sql = Self::create_table_sql(namespace, spec);
        Self::run_ddl(&ch_session.client, sql).await
    }

    async fn drop_table(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let ch_session = self.get_session(session).await?;
        let sql = format!("DROP TABLE {}", self.table_ref(namespace, table));
        Self::run_ddl(&ch_session.client, sql).await
    }

    async fn rename_table(
        &self,
        session: SessionId,
        namespace: &Namespace,
        old_name: &str,
        new_name: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let ch_session = self.get_session(session).await?;
        let sql = format!(
            "RENAME TABLE {} TO {}",
            self.table_ref(namespace, old_name),
            self.table_ref(namespace, new_name)
        );
        Self::run_ddl(&ch_session.client, sql).await
    }

    // ==================== Views ====================

    async fn create_view(
        &self,
        session: SessionId,
        namespace: &Namespace,
        name: &str,
        query: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let ch_session = self.get_session(session).await?;
        let sql = format!(
            "CREATE VIEW {} AS {}",
            self.table_ref(namespace, name),
            query
        );
        Self::run_ddl(&ch_session.client, sql).await
    }

    async fn drop_view(
        &self,
        session: SessionId,
        namespace: &Namespace,
        name: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let ch_session = self.get_session(session).await?;
        let sql = format!("DROP VIEW {}", self.table_ref(namespace, name));
        Self::run_ddl(&ch_session.client, sql).await
    }

    async fn list_views(
        &self,
        session: SessionId,
        namespace: &Namespace,
    ) -> EngineResult<Vec<ViewInfo>> {
        let ch_session = self.get_session(session).await?;
        let sql = Self::substitute_params(
            "SELECT name, engine, create_table_query FROM system.tables \
             WHERE database = ? AND engine IN ('View', 'MaterializedView') ORDER BY name",
            &[Value::Text(namespace.database.clone())],
        );
        let rows = Self::fetch_rows(&ch_session.client, &sql).await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                Some(ViewInfo {
                    name: row.get("name")?.as_str()?.to_string(),
                    materialized: row.get("engine").and_then(|v| v.as_str())
                        == Some("MaterializedView"),
                    definition: row
                        .get("create_table_query")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                })
            })
            .collect())
    }

    async fn view_ddl(
        &self,
        session: SessionId,
        namespace: &Namespace,
        name: &str,
    ) -> EngineResult<String> {
        self.table_ddl(session, namespace, name).await
    }

    // ==================== Users ====================

    async fn list_users(&self, session: SessionId) -> EngineResult<Vec<DatabaseUser>> {
        let ch_session = self.get_session(session).await?;
        let rows = Self::fetch_rows(
            &ch_session.client,
            "SELECT name FROM system.users ORDER BY name",
        )
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| row.get("name").and_then(|v| v.as_str()))
            .map(|name| DatabaseUser {
                name: name.to_string(),
                privileges: Vec::new(),
            })
            .collect())
    }

    // ==================== Row mutation ====================

    async fn insert_row(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        data: &RowData,
    ) -> EngineResult<QueryResult> {
        let ch_session = self.get_session(session).await?;

        if data.columns.is_empty() {
            return Err(EngineError::rejected(
                "ClickHouse requires at least one column value on insert",
            ));
        }

        let mut keys: Vec<&String> = data.columns.keys().collect();
        keys.sort();

        let cols_str = keys
            .iter()
            .map(|k| DIALECT.quote_ident(k))
            .collect::<Vec<_>>()
            .join(", ");
        let values: Vec<Value> = keys
            .iter()
            .filter_map(|k| data.columns.get(*k).cloned())
            .collect();
        let values_str = values
            .iter()
            .map(Self::inline_value)
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            "INSERT INTO {} ({cols_str}) VALUES ({values_str})",
            self.table_ref(namespace, table)
        );

        let start = Instant::now();
        ch_session
            .client
            .query(&sql)
            .execute()
            .await
            .map_err(Self::map_ch_err)?;

        Ok(QueryResult::with_affected_rows(
            1,
            start.elapsed().as_micros() as f64 / 1000.0,
        ))
    }

    async fn delete_row(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        primary_key: &RowData,
    ) -> EngineResult<QueryResult> {
        let ch_session = self.get_session(session).await?;

        if primary_key.columns.is_empty() {
            return Err(EngineError::rejected(
                "Primary key required for delete operations",
            ));
        }

        let mut pk_keys: Vec<&String> = primary_key.columns.keys().collect();
        pk_keys.sort();

        let clauses: Vec<String> = pk_keys
            .iter()
            .filter_map(|k| {
                primary_key.columns.get(*k).map(|v| {
                    format!("{} = {}", DIALECT.quote_ident(k), Self::inline_value(v))
                })
            })
            .collect();

        // Mutation; applied asynchronously by the server.
        let sql = format!(
            "ALTER TABLE {} DELETE WHERE {}",
            self.table_ref(namespace, table),
            clauses.join(" AND ")
        );

        let start = Instant::now();
        ch_session
            .client
            .query(&sql)
            .execute()
            .await
            .map_err(Self::map_ch_err)?;

        Ok(QueryResult::with_affected_rows(
            1,
            start.elapsed().as_micros() as f64 / 1000.0,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::base::build_where;
    use crate::engine::types::{Filter, FilterOp};

    #[test]
    fn json_scalars_map_onto_engine_values() {
        assert_eq!(
            ClickHouseDriver::json_to_value(&serde_json::json!(42)),
            Value::Int(42)
        );
        assert_eq!(
            ClickHouseDriver::json_to_value(&serde_json::json!(1.5)),
            Value::Float(1.5)
        );
        assert_eq!(
            ClickHouseDriver::json_to_value(&serde_json::json!("x")),
            Value::Text("x".into())
        );
        assert_eq!(
            ClickHouseDriver::json_to_value(&serde_json::json!(null)),
            Value::Null
        );
        assert_eq!(
            ClickHouseDriver::json_to_value(&serde_json::json!([1, 2])),
            Value::Array(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[test]
    fn result_columns_follow_the_query_not_key_order() {
        let stream = "[\"b\", \"a\"]\n[2, 1]\n[4, 3]\n";
        let (names, rows) = ClickHouseDriver::parse_compact_rows(stream).expect("parse");
        let result = ClickHouseDriver::table_to_result(names, rows, Instant::now());

        let columns: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(columns, vec!["b", "a"]);
        assert_eq!(result.rows[0].values, vec![Value::Int(2), Value::Int(1)]);
        assert_eq!(result.rows[1].values, vec![Value::Int(4), Value::Int(3)]);
    }

    #[test]
    fn empty_result_stream_yields_no_columns() {
        let (names, rows) = ClickHouseDriver::parse_compact_rows("").expect("parse");
        assert!(names.is_empty());
        assert!(rows.is_empty());
    }

    #[test]
    fn substitution_escapes_quotes_and_skips_string_literals() {
        let sql = ClickHouseDriver::substitute_params(
            "SELECT * FROM t WHERE a = ? AND b = 'lit?eral' AND c = ?",
            &[Value::Text("o'brien".into()), Value::Int(7)],
        );
        assert_eq!(
            sql,
            "SELECT * FROM t WHERE a = 'o\\'brien' AND b = 'lit?eral' AND c = 7"
        );
    }

    #[test]
    fn where_fragment_inlines_in_list_elements() {
        let filters = vec![Filter::in_list(
            "status",
            vec![Value::Text("a".into()), Value::Text("b".into())],
        )];
        let fragment = build_where(&filters, DIALECT, 1).expect("build");
        let sql = ClickHouseDriver::substitute_params(&fragment.sql, &fragment.params);
        assert_eq!(sql, " WHERE `status` IN ('a', 'b')");
    }

    #[test]
    fn merge_tree_table_renders_engine_order_and_partition() {
        let spec = TableSpec {
            name: "events".into(),
            columns: vec![
                ColumnSpec::new("id", "UInt64").not_null(),
                ColumnSpec::new("ts", "DateTime").not_null(),
                ColumnSpec::new("note", "String"),
            ],
            engine: None,
            order_by: vec!["id".into(), "ts".into()],
            partition_by: Some("toYYYYMM(ts)".into()),
        };
        let ns = Namespace::new("analytics");
        let sql = ClickHouseDriver::create_table_sql(&ns, &spec);

        assert!(sql.contains("CREATE TABLE `analytics`.`events`"));
        assert!(sql.contains("ENGINE = MergeTree"));
        assert!(sql.contains("ORDER BY (`id`, `ts`)"));
        assert!(sql.contains("PARTITION BY toYYYYMM(ts)"));
        assert!(sql.contains("`note` Nullable(String)"));
    }

    #[test]
    fn bytes_inline_as_base64_decode_call() {
        let rendered = ClickHouseDriver::inline_value(&Value::Bytes(vec![0xde, 0xad]));
        assert_eq!(rendered, "base64Decode('3q0=')");
    }
}
