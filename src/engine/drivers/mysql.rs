//! MySQL / MariaDB Driver
//!
//! Implements the DataEngine trait for MySQL and MariaDB using SQLx. One
//! implementation serves both engines: a driver instance carries the
//! identity it was registered under, and the actual server flavor is
//! detected from `SELECT VERSION()` at connect time so MariaDB-specific
//! introspection paths can diverge where the system tables differ.
//!
//! Cancellation uses `KILL QUERY <connection_id>`: each running statement
//! records the server-side connection id it executes on.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::mysql::{MySql, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::pool::PoolConnection;
use sqlx::{Column, Row, TypeInfo};
use tokio::sync::{Mutex, RwLock};

use crate::engine::base::{render_select, SqlDialect};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::tls;
use crate::engine::traits::DataEngine;
use crate::engine::types::{
    Collection, CollectionType, ColumnInfo, ColumnSpec, ConnectionConfig, DataOptions,
    DatabaseUser, ForeignKeyInfo, ForeignKeySpec, IndexInfo, IndexSpec, Namespace, QueryId,
    QueryResult, ReferentialAction, RoutineInfo, RoutineKind, Row as QRow, RowData,
    SchemaOperationResult, SessionId, TableColumn, TableSchema, TableSpec, TriggerInfo,
    TriggerSpec, Value, ViewInfo,
};

const DIALECT: SqlDialect = SqlDialect::MySql;

/// Which server we are actually talking to, regardless of which identity
/// the driver was registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerFlavor {
    MySql,
    MariaDb,
}

impl ServerFlavor {
    /// MariaDB servers embed "-MariaDB" in their version string.
    pub fn from_version(version: &str) -> Self {
        if version.contains("MariaDB") {
            ServerFlavor::MariaDb
        } else {
            ServerFlavor::MySql
        }
    }
}

/// Holds the connection state for a MySQL/MariaDB session.
pub struct MySqlSession {
    pub pool: MySqlPool,
    pub flavor: ServerFlavor,
    /// Active queries (query_id -> server connection_id)
    pub active_queries: Mutex<HashMap<QueryId, u64>>,
}

impl MySqlSession {
    pub fn new(pool: MySqlPool, flavor: ServerFlavor) -> Self {
        Self {
            pool,
            flavor,
            active_queries: Mutex::new(HashMap::new()),
        }
    }
}

/// MySQL/MariaDB driver implementation
pub struct MySqlDriver {
    identity: ServerFlavor,
    sessions: Arc<RwLock<HashMap<SessionId, Arc<MySqlSession>>>>,
}

impl MySqlDriver {
    /// Driver registered under the MySQL engine tag.
    pub fn mysql() -> Self {
        Self {
            identity: ServerFlavor::MySql,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Driver registered under the MariaDB engine tag.
    pub fn mariadb() -> Self {
        Self {
            identity: ServerFlavor::MariaDb,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn get_session(&self, session: SessionId) -> EngineResult<Arc<MySqlSession>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&session)
            .cloned()
            .ok_or_else(|| EngineError::session_not_found(session))
    }

    fn map_sqlx_err(e: sqlx::Error) -> EngineError {
        match &e {
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed => EngineError::connection_failed(e.to_string()),
            sqlx::Error::Database(db_err) => {
                let msg = db_err.to_string();
                if msg.contains("Access denied") {
                    EngineError::auth_failed(msg)
                } else {
                    EngineError::rejected(msg)
                }
            }
            _ => EngineError::rejected(e.to_string()),
        }
    }

    /// Helper to bind a Value to a MySQL query
    fn bind_param<'q>(
        query: sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments>,
        value: &'q Value,
    ) -> sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments> {
        match value {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(b) => query.bind(b),
            Value::Int(i) => query.bind(i),
            Value::Float(f) => query.bind(f),
            Value::Text(s) => query.bind(s),
            Value::Bytes(b) => query.bind(b),
            Value::Json(j) => query.bind(j),
            Value::Array(_) => query.bind(Option::<String>::None),
        }
    }

    async fn fetch_connection_id(conn: &mut PoolConnection<MySql>) -> EngineResult<u64> {
        sqlx::query_scalar("SELECT CONNECTION_ID()")
            .fetch_one(&mut **conn)
            .await
            .map_err(Self::map_sqlx_err)
    }

    /// Builds a connection string from config, TLS rendered as `ssl-*` params.
    fn build_connection_string(config: &ConnectionConfig) -> EngineResult<String> {
        let db = config.database.as_deref().unwrap_or("mysql");
        let params = tls::mysql_params(config.tls.as_ref())?;
        let query: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();

        Ok(format!(
            "mysql://{}:{}@{}:{}/{}?{}",
            config.username,
            config.password,
            config.host,
            config.port,
            db,
            query.join("&")
        ))
    }

    fn table_ref(namespace: &Namespace, table: &str) -> String {
        format!(
            "{}.{}",
            DIALECT.quote_ident(&namespace.database),
            DIALECT.quote_ident(table)
        )
    }

    /// Converts a SQLx row to our universal Row type
    fn convert_row(mysql_row: &MySqlRow) -> QRow {
        let values: Vec<Value> = mysql_row
            .columns()
            .iter()
            .map(|col| Self::extract_value(mysql_row, col.ordinal()))
            .collect();

        QRow { values }
    }

    /// Extracts a value from a MySqlRow at the given index
    fn extract_value(row: &MySqlRow, idx: usize) -> Value {
        // Try u64 first for BIGINT UNSIGNED columns
        if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
            return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::Int).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<u32>, _>(idx) {
            return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<u16>, _>(idx) {
            return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i8>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<u8>, _>(idx) {
            return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
            return v.map(Value::Bool).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map(Value::Float).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
            return v.map(|f| Value::Float(f as f64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Decimal>, _>(idx) {
            return v
                .map(|d| {
                    use rust_decimal::prelude::ToPrimitive;
                    Value::Float(d.to_f64().unwrap_or(0.0))
                })
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(Value::Text).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
            return v.map(|dt| Value::Text(dt.to_rfc3339())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
            return v
                .map(|dt| Value::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
            return v
                .map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveTime>, _>(idx) {
            return v
                .map(|t| Value::Text(t.format("%H:%M:%S").to_string()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            return v.map(Value::Bytes).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
            return v.map(Value::Json).unwrap_or(Value::Null);
        }

        Value::Null
    }

    /// Gets column info from a MySqlRow
    fn get_column_info(row: &MySqlRow) -> Vec<ColumnInfo> {
        row.columns()
            .iter()
            .map(|col| ColumnInfo {
                name: col.name().to_string(),
                data_type: col.type_info().name().to_string(),
                nullable: true,
            })
            .collect()
    }

    fn rows_to_result(mysql_rows: Vec<MySqlRow>, started: Instant) -> QueryResult {
        let execution_time_ms = started.elapsed().as_micros() as f64 / 1000.0;
        if mysql_rows.is_empty() {
            QueryResult {
                columns: Vec::new(),
                rows: Vec::new(),
                affected_rows: None,
                execution_time_ms,
            }
        } else {
            let columns = Self::get_column_info(&mysql_rows[0]);
            let rows: Vec<QRow> = mysql_rows.iter().map(Self::convert_row).collect();
            QueryResult {
                columns,
                rows,
                affected_rows: None,
                execution_time_ms,
            }
        }
    }

    async fn run_ddl(pool: &MySqlPool, sql: String) -> EngineResult<SchemaOperationResult> {
        match sqlx::query(&sql).execute(pool).await {
            Ok(_) => Ok(SchemaOperationResult::ok(sql)),
            Err(e) => match Self::map_sqlx_err(e) {
                EngineError::Rejected { message } => {
                    Ok(SchemaOperationResult::failed_with_sql(message, sql))
                }
                other => Err(other),
            },
        }
    }

    /// Catalog query for check clauses on a table. MySQL's
    /// `check_constraints` table carries no owning-table column, so the
    /// lookup has to join through `table_constraints`; MariaDB names the
    /// table directly.
    fn check_clause_sql(flavor: ServerFlavor) -> &'static str {
        match flavor {
            ServerFlavor::MariaDb => {
                r#"
                SELECT check_clause
                FROM information_schema.check_constraints
                WHERE constraint_schema = ? AND table_name = ?
                "#
            }
            ServerFlavor::MySql => {
                r#"
                SELECT cc.check_clause
                FROM information_schema.check_constraints cc
                JOIN information_schema.table_constraints tc
                  ON tc.constraint_schema = cc.constraint_schema
                 AND tc.constraint_name = cc.constraint_name
                WHERE tc.table_schema = ? AND tc.table_name = ?
                  AND tc.constraint_type = 'CHECK'
                "#
            }
        }
    }

    /// MariaDB has no native JSON column type: it stores JSON as LONGTEXT
    /// guarded by a `json_valid` check. Report such columns as `json` so
    /// both flavors describe the same logical schema.
    fn effective_data_type(
        flavor: ServerFlavor,
        column: &str,
        column_type: String,
        check_clauses: &[String],
    ) -> String {
        if flavor == ServerFlavor::MariaDb && column_type.eq_ignore_ascii_case("longtext") {
            let needle = format!("json_valid(`{}`", column.to_lowercase());
            if check_clauses
                .iter()
                .any(|clause| clause.to_lowercase().contains(&needle))
            {
                return "json".to_string();
            }
        }
        column_type
    }

    fn column_def(column: &ColumnSpec) -> String {
        let mut def = format!("{} {}", DIALECT.quote_ident(&column.name), column.data_type);
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        if column.auto_increment {
            def.push_str(" AUTO_INCREMENT");
        }
        if let Some(default) = &column.default_value {
            def.push_str(&format!(" DEFAULT {default}"));
        }
        def
    }
}

#[async_trait]
impl DataEngine for MySqlDriver {
    fn driver_id(&self) -> &'static str {
        match self.identity {
            ServerFlavor::MySql => "mysql",
            ServerFlavor::MariaDb => "mariadb",
        }
    }

    fn driver_name(&self) -> &'static str {
        match self.identity {
            ServerFlavor::MySql => "MySQL",
            ServerFlavor::MariaDb => "MariaDB",
        }
    }

    async fn test_connection(&self, config: &ConnectionConfig) -> EngineResult<()> {
        let conn_str = Self::build_connection_string(config)?;

        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(10))
            .connect(&conn_str)
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("Access denied") {
                    EngineError::auth_failed(msg)
                } else {
                    EngineError::connection_failed(msg)
                }
            })?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(Self::map_sqlx_err)?;

        pool.close().await;
        Ok(())
    }

    async fn connect(&self, config: &ConnectionConfig) -> EngineResult<SessionId> {
        let conn_str = Self::build_connection_string(config)?;

        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(&conn_str)
            .await
            .map_err(|e| EngineError::connection_failed(e.to_string()))?;

        let version: String = sqlx::query_scalar("SELECT VERSION()")
            .fetch_one(&pool)
            .await
            .map_err(Self::map_sqlx_err)?;
        let flavor = ServerFlavor::from_version(&version);

        let session_id = SessionId::new();
        let session = Arc::new(MySqlSession::new(pool, flavor));

        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id, session);

        Ok(session_id)
    }

    async fn disconnect(&self, session: SessionId) -> EngineResult<()> {
        let session = {
            let mut sessions = self.sessions.write().await;
            sessions
                .remove(&session)
                .ok_or_else(|| EngineError::session_not_found(session))?
        };

        session.pool.close().await;
        Ok(())
    }

    async fn ping(&self, session: SessionId) -> EngineResult<bool> {
        let my_session = self.get_session(session).await?;
        Ok(sqlx::query("SELECT 1").execute(&my_session.pool).await.is_ok())
    }

    async fn execute(
        &self,
        session: SessionId,
        query: &str,
        query_id: QueryId,
    ) -> EngineResult<QueryResult> {
        let my_session = self.get_session(session).await?;
        let start = Instant::now();

        let trimmed = query.trim().to_uppercase();
        let is_select = trimmed.starts_with("SELECT")
            || trimmed.starts_with("WITH")
            || trimmed.starts_with("SHOW")
            || trimmed.starts_with("EXPLAIN")
            || trimmed.starts_with("DESCRIBE");

        let mut conn = my_session
            .pool
            .acquire()
            .await
            .map_err(|e| EngineError::connection_failed(e.to_string()))?;
        let connection_id = Self::fetch_connection_id(&mut conn).await?;
        {
            let mut active = my_session.active_queries.lock().await;
            active.insert(query_id, connection_id);
        }

        let result = if is_select {
            sqlx::query(query)
                .fetch_all(&mut *conn)
                .await
                .map_err(Self::map_sqlx_err)
                .map(|rows| Self::rows_to_result(rows, start))
        } else {
            sqlx::query(query)
                .execute(&mut *conn)
                .await
                .map_err(Self::map_sqlx_err)
                .map(|r| {
                    QueryResult::with_affected_rows(
                        r.rows_affected(),
                        start.elapsed().as_micros() as f64 / 1000.0,
                    )
                })
        };

        let mut active = my_session.active_queries.lock().await;
        active.remove(&query_id);

        result
    }

    async fn cancel(&self, session: SessionId, query_id: QueryId) -> EngineResult<bool> {
        let my_session = self.get_session(session).await?;

        let connection_id = {
            let active = my_session.active_queries.lock().await;
            match active.get(&query_id) {
                Some(id) => *id,
                None => return Ok(false),
            }
        };

        // KILL QUERY terminates the statement, not the connection.
        sqlx::query(&format!("KILL QUERY {connection_id}"))
            .execute(&my_session.pool)
            .await
            .map_err(Self::map_sqlx_err)?;

        Ok(true)
    }

    async fn list_namespaces(&self, session: SessionId) -> EngineResult<Vec<Namespace>> {
        let my_session = self.get_session(session).await?;

        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT schema_name
            FROM information_schema.schemata
            WHERE schema_name NOT IN ('information_schema', 'performance_schema', 'mysql', 'sys')
            ORDER BY schema_name
            "#,
        )
        .fetch_all(&my_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        Ok(rows.into_iter().map(|(db,)| Namespace::new(db)).collect())
    }

    async fn list_collections(
        &self,
        session: SessionId,
        namespace: &Namespace,
    ) -> EngineResult<Vec<Collection>> {
        let my_session = self.get_session(session).await?;

        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT table_name, table_type
            FROM information_schema.tables
            WHERE table_schema = ?
            ORDER BY table_name
            "#,
        )
        .bind(&namespace.database)
        .fetch_all(&my_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        Ok(rows
            .into_iter()
            .map(|(name, table_type)| {
                let collection_type = match table_type.as_str() {
                    "VIEW" => CollectionType::View,
                    _ => CollectionType::Table,
                };
                Collection {
                    namespace: namespace.clone(),
                    name,
                    collection_type,
                }
            })
            .collect())
    }

    async fn describe_table(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
    ) -> EngineResult<TableSchema> {
        let my_session = self.get_session(session).await?;
        let pool = &my_session.pool;

        let column_rows: Vec<(String, String, String, Option<String>, String)> = sqlx::query_as(
            r#"
            SELECT column_name, column_type, is_nullable, column_default, column_key
            FROM information_schema.columns
            WHERE table_schema = ? AND table_name = ?
            ORDER BY ordinal_position
            "#,
        )
        .bind(&namespace.database)
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        // Servers predating the check_constraints catalog report an unknown
        // table; treat that as no check constraints.
        let flavor = my_session.flavor;
        let check_clauses: Vec<String> =
            sqlx::query_as::<_, (String,)>(Self::check_clause_sql(flavor))
                .bind(&namespace.database)
                .bind(table)
                .fetch_all(pool)
                .await
                .map(|rows| rows.into_iter().map(|(clause,)| clause).collect())
                .unwrap_or_default();

        let mut pk_columns = Vec::new();
        let columns: Vec<TableColumn> = column_rows
            .into_iter()
            .map(|(name, data_type, is_nullable, default_value, column_key)| {
                let is_pk = column_key == "PRI";
                if is_pk {
                    pk_columns.push(name.clone());
                }
                TableColumn {
                    data_type: Self::effective_data_type(flavor, &name, data_type, &check_clauses),
                    name,
                    nullable: is_nullable == "YES",
                    default_value,
                    is_primary_key: is_pk,
                }
            })
            .collect();

        let count_row: Option<(Option<i64>,)> = sqlx::query_as(
            r#"
            SELECT table_rows
            FROM information_schema.tables
            WHERE table_schema = ? AND table_name = ?
            "#,
        )
        .bind(&namespace.database)
        .bind(table)
        .fetch_optional(pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        Ok(TableSchema {
            columns,
            primary_key: if pk_columns.is_empty() {
                None
            } else {
                Some(pk_columns)
            },
            row_count_estimate: count_row.and_then(|(c,)| c).map(|c| c.max(0) as u64),
        })
    }

    async fn list_indexes(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
    ) -> EngineResult<Vec<IndexInfo>> {
        let my_session = self.get_session(session).await?;

        let rows: Vec<(String, i64, String, String)> = sqlx::query_as(
            r#"
            SELECT index_name, MIN(non_unique), MIN(index_type),
                   GROUP_CONCAT(column_name ORDER BY seq_in_index)
            FROM information_schema.statistics
            WHERE table_schema = ? AND table_name = ? AND index_name <> 'PRIMARY'
            GROUP BY index_name
            ORDER BY index_name
            "#,
        )
        .bind(&namespace.database)
        .bind(table)
        .fetch_all(&my_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        Ok(rows
            .into_iter()
            .map(|(name, non_unique, index_type, columns)| IndexInfo {
                name,
                columns: columns.split(',').map(str::to_string).collect(),
                unique: non_unique == 0,
                index_type: Some(index_type),
            })
            .collect())
    }

    async fn list_foreign_keys(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
    ) -> EngineResult<Vec<ForeignKeyInfo>> {
        let my_session = self.get_session(session).await?;

        let rows: Vec<(String, String, String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT
                kcu.constraint_name,
                GROUP_CONCAT(kcu.column_name ORDER BY kcu.ordinal_position),
                kcu.referenced_table_name,
                GROUP_CONCAT(kcu.referenced_column_name ORDER BY kcu.ordinal_position),
                rc.update_rule,
                rc.delete_rule
            FROM information_schema.key_column_usage kcu
            JOIN information_schema.referential_constraints rc
              ON rc.constraint_schema = kcu.table_schema
             AND rc.constraint_name = kcu.constraint_name
            WHERE kcu.table_schema = ? AND kcu.table_name = ?
              AND kcu.referenced_table_name IS NOT NULL
            GROUP BY kcu.constraint_name, kcu.referenced_table_name,
                     rc.update_rule, rc.delete_rule
            ORDER BY kcu.constraint_name
            "#,
        )
        .bind(&namespace.database)
        .bind(table)
        .fetch_all(&my_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        Ok(rows
            .into_iter()
            .map(
                |(name, columns, referenced_table, referenced_columns, upd, del)| ForeignKeyInfo {
                    name,
                    columns: columns.split(',').map(str::to_string).collect(),
                    referenced_table,
                    referenced_columns: referenced_columns
                        .split(',')
                        .map(str::to_string)
                        .collect(),
                    on_update: ReferentialAction::from_catalog(&upd),
                    on_delete: ReferentialAction::from_catalog(&del),
                },
            )
            .collect())
    }

    async fn table_ddl(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
    ) -> EngineResult<String> {
        let my_session = self.get_session(session).await?;

        let row: (String, String) = sqlx::query_as(&format!(
            "SHOW CREATE TABLE {}",
            Self::table_ref(namespace, table)
        ))
        .fetch_one(&my_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        Ok(row.1)
    }

    async fn read_table(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        options: &DataOptions,
    ) -> EngineResult<QueryResult> {
        let my_session = self.get_session(session).await?;
        let start = Instant::now();

        let fragment = render_select(&Self::table_ref(namespace, table), options, DIALECT)?;

        let mut query = sqlx::query(&fragment.sql);
        for value in &fragment.params {
            query = Self::bind_param(query, value);
        }

        let rows = query
            .fetch_all(&my_session.pool)
            .await
            .map_err(Self::map_sqlx_err)?;

        Ok(Self::rows_to_result(rows, start))
    }

    fn data_types(&self) -> Vec<&'static str> {
        vec![
            "tinyint", "smallint", "mediumint", "int", "bigint", "decimal", "float", "double",
            "bit", "char", "varchar", "text", "mediumtext", "longtext", "binary", "varbinary",
            "blob", "date", "time", "datetime", "timestamp", "year", "json", "enum", "set",
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
        let my_session = self.get_session(session).await?;
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {}",
            Self::table_ref(namespace, table),
            Self::column_def(column)
        );
        Self::run_ddl(&my_session.pool, sql).await
    }

    async fn modify_column(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        column: &ColumnSpec,
    ) -> EngineResult<SchemaOperationResult> {
        let my_session = self.get_session(session).await?;
        let sql = format!(
            "ALTER TABLE {} MODIFY COLUMN {}",
            Self::table_ref(namespace, table),
            Self::column_def(column)
        );
        Self::run_ddl(&my_session.pool, sql).await
    }

    async fn drop_column(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        column: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let my_session = self.get_session(session).await?;
        let sql = format!(
            "ALTER TABLE {} DROP COLUMN {}",
            Self::table_ref(namespace, table),
            DIALECT.quote_ident(column)
        );
        Self::run_ddl(&my_session.pool, sql).await
    }

    async fn rename_column(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        old_name: &str,
        new_name: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let my_session = self.get_session(session).await?;
        // RENAME COLUMN needs MySQL 8 / MariaDB 10.5; older servers report
        // their own error, which rides back in the result.
        let sql = format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            Self::table_ref(namespace, table),
            DIALECT.quote_ident(old_name),
            DIALECT.quote_ident(new_name)
        );
        Self::run_ddl(&my_session.pool, sql).await
    }

    // ==================== Index DDL ====================

    async fn create_index(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        index: &IndexSpec,
    ) -> EngineResult<SchemaOperationResult> {
        let my_session = self.get_session(session).await?;
        let cols: Vec<String> = index.columns.iter().map(|c| DIALECT.quote_ident(c)).collect();
        let sql = format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            DIALECT.quote_ident(&index.name),
            Self::table_ref(namespace, table),
            cols.join(", ")
        );
        Self::run_ddl(&my_session.pool, sql).await
    }

    async fn drop_index(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        index: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let my_session = self.get_session(session).await?;
        let sql = format!(
            "DROP INDEX {} ON {}",
            DIALECT.quote_ident(index),
            Self::table_ref(namespace, table)
        );
        Self::run_ddl(&my_session.pool, sql).await
    }

    // ==================== Foreign key DDL ====================

    async fn add_foreign_key(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        fk: &ForeignKeySpec,
    ) -> EngineResult<SchemaOperationResult> {
        let my_session = self.get_session(session).await?;
        let name = fk
            .name
            .clone()
            .unwrap_or_else(|| format!("fk_{}_{}", table, fk.columns.join("_")));
        let cols: Vec<String> = fk.columns.iter().map(|c| DIALECT.quote_ident(c)).collect();
        let ref_cols: Vec<String> = fk
            .referenced_columns
            .iter()
            .map(|c| DIALECT.quote_ident(c))
            .collect();
        let sql = format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON UPDATE {} ON DELETE {}",
            Self::table_ref(namespace, table),
            DIALECT.quote_ident(&name),
            cols.join(", "),
            Self::table_ref(namespace, &fk.referenced_table),
            ref_cols.join(", "),
            fk.on_update.as_sql(),
            fk.on_delete.as_sql(),
        );
        Self::run_ddl(&my_session.pool, sql).await
    }

    async fn drop_foreign_key(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        fk_name: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let my_session = self.get_session(session).await?;
        let sql = format!(
            "ALTER TABLE {} DROP FOREIGN KEY {}",
            Self::table_ref(namespace, table),
            DIALECT.quote_ident(fk_name)
        );
        Self::run_ddl(&my_session.pool, sql).await
    }

    // ==================== Table DDL ====================

    async fn create_table(
        &self,
        session: SessionId,
        namespace: &Namespace,
        spec: &TableSpec,
    ) -> EngineResult<SchemaOperationResult> {
        let my_session = self.get_session(session).await?;

        let mut lines: Vec<String> =
            spec.columns.iter().map(|c| format!("    {}", Self::column_def(c))).collect();
        let pk_cols: Vec<String> = spec
            .columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| DIALECT.quote_ident(&c.name))
            .collect();
        if !pk_cols.is_empty() {
            lines.push(format!("    PRIMARY KEY ({})", pk_cols.join(", ")));
        }

        let sql = format!(
            "CREATE TABLE {} (\n{}\n)",
            Self::table_ref(namespace, &spec.name),
            lines.join(",\n")
        );
        Self::run_ddl(&my_session.pool, sql).await
    }

    async fn drop_table(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let my_session = self.get_session(session).await?;
        let sql = format!("DROP TABLE {}", Self::table_ref(namespace, table));
        Self::run_ddl(&my_session.pool, sql).await
    }

    async fn rename_table(
        &self,
        session: SessionId,
        namespace: &Namespace,
        old_name: &str,
        new_name: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let my_session = self.get_session(session).await?;
        let sql = format!(
            "RENAME TABLE {} TO {}",
            Self::table_ref(namespace, old_name),
            Self::table_ref(namespace, new_name)
        );
        Self::run_ddl(&my_session.pool, sql).await
    }

    // ==================== Views ====================

    async fn create_view(
        &self,
        session: SessionId,
        namespace: &Namespace,
        name: &str,
        query: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let my_session = self.get_session(session).await?;
        let sql = format!("CREATE VIEW {} AS {}", Self::table_ref(namespace, name), query);
        Self::run_ddl(&my_session.pool, sql).await
    }

    async fn drop_view(
        &self,
        session: SessionId,
        namespace: &Namespace,
        name: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let my_session = self.get_session(session).await?;
        let sql = format!("DROP VIEW {}", Self::table_ref(namespace, name));
        Self::run_ddl(&my_session.pool, sql).await
    }

    async fn rename_view(
        &self,
        session: SessionId,
        namespace: &Namespace,
        old_name: &str,
        new_name: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let my_session = self.get_session(session).await?;
        // RENAME TABLE works for views on both flavors.
        let sql = format!(
            "RENAME TABLE {} TO {}",
            Self::table_ref(namespace, old_name),
            Self::table_ref(namespace, new_name)
        );
        Self::run_ddl(&my_session.pool, sql).await
    }

    async fn list_views(
        &self,
        session: SessionId,
        namespace: &Namespace,
    ) -> EngineResult<Vec<ViewInfo>> {
        let my_session = self.get_session(session).await?;

        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT table_name FROM information_schema.views WHERE table_schema = ? ORDER BY table_name",
        )
        .bind(&namespace.database)
        .fetch_all(&my_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        Ok(rows
            .into_iter()
            .map(|(name,)| ViewInfo {
                name,
                materialized: false,
                definition: None,
            })
            .collect())
    }

    async fn view_ddl(
        &self,
        session: SessionId,
        namespace: &Namespace,
        name: &str,
    ) -> EngineResult<String> {
        let my_session = self.get_session(session).await?;

        // SHOW CREATE VIEW: (view, create stmt, charset, collation)
        let row: (String, String, String, String) = sqlx::query_as(&format!(
            "SHOW CREATE VIEW {}",
            Self::table_ref(namespace, name)
        ))
        .fetch_one(&my_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        Ok(row.1)
    }

    // ==================== Routines ====================

    async fn list_routines(
        &self,
        session: SessionId,
        namespace: &Namespace,
    ) -> EngineResult<Vec<RoutineInfo>> {
        let my_session = self.get_session(session).await?;

        let rows: Vec<(String, String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT routine_name, routine_type, dtd_identifier
            FROM information_schema.routines
            WHERE routine_schema = ?
            ORDER BY routine_name
            "#,
        )
        .bind(&namespace.database)
        .fetch_all(&my_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        Ok(rows
            .into_iter()
            .map(|(name, routine_type, return_type)| RoutineInfo {
                name,
                kind: if routine_type == "PROCEDURE" {
                    RoutineKind::Procedure
                } else {
                    RoutineKind::Function
                },
                language: Some("SQL".to_string()),
                return_type,
            })
            .collect())
    }

    async fn routine_definition(
        &self,
        session: SessionId,
        namespace: &Namespace,
        routine: &str,
    ) -> EngineResult<String> {
        let my_session = self.get_session(session).await?;

        let definition: (Option<String>,) = sqlx::query_as(
            r#"
            SELECT routine_definition
            FROM information_schema.routines
            WHERE routine_schema = ? AND routine_name = ?
            LIMIT 1
            "#,
        )
        .bind(&namespace.database)
        .bind(routine)
        .fetch_one(&my_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        definition
            .0
            .ok_or_else(|| EngineError::rejected(format!("routine '{routine}' has no visible definition")))
    }

    // ==================== Triggers ====================

    async fn list_triggers(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: Option<&str>,
    ) -> EngineResult<Vec<TriggerInfo>> {
        let my_session = self.get_session(session).await?;

        let rows: Vec<(String, String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT trigger_name, event_object_table, action_timing,
                   event_manipulation, action_statement
            FROM information_schema.triggers
            WHERE trigger_schema = ?
              AND (? IS NULL OR event_object_table = ?)
            ORDER BY trigger_name
            "#,
        )
        .bind(&namespace.database)
        .bind(table)
        .bind(table)
        .fetch_all(&my_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        Ok(rows
            .into_iter()
            .map(|(name, table, timing, event, statement)| TriggerInfo {
                name,
                table,
                timing,
                event,
                definition: Some(statement),
            })
            .collect())
    }

    async fn create_trigger(
        &self,
        session: SessionId,
        namespace: &Namespace,
        trigger: &TriggerSpec,
    ) -> EngineResult<SchemaOperationResult> {
        let my_session = self.get_session(session).await?;
        let sql = format!(
            "CREATE TRIGGER {} {} {} ON {} FOR EACH ROW {}",
            DIALECT.quote_ident(&trigger.name),
            trigger.timing,
            trigger.event,
            Self::table_ref(namespace, &trigger.table),
            trigger.body
        );
        Self::run_ddl(&my_session.pool, sql).await
    }

    async fn drop_trigger(
        &self,
        session: SessionId,
        namespace: &Namespace,
        trigger: &str,
        _table: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let my_session = self.get_session(session).await?;
        let sql = format!(
            "DROP TRIGGER {}.{}",
            DIALECT.quote_ident(&namespace.database),
            DIALECT.quote_ident(trigger)
        );
        Self::run_ddl(&my_session.pool, sql).await
    }

    async fn trigger_definition(
        &self,
        session: SessionId,
        namespace: &Namespace,
        trigger: &str,
    ) -> EngineResult<String> {
        let my_session = self.get_session(session).await?;

        let definition: (String,) = sqlx::query_as(
            r#"
            SELECT action_statement
            FROM information_schema.triggers
            WHERE trigger_schema = ? AND trigger_name = ?
            LIMIT 1
            "#,
        )
        .bind(&namespace.database)
        .bind(trigger)
        .fetch_one(&my_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        Ok(definition.0)
    }

    // ==================== Users ====================

    async fn list_users(&self, session: SessionId) -> EngineResult<Vec<DatabaseUser>> {
        let my_session = self.get_session(session).await?;

        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT User, Host FROM mysql.user ORDER BY User, Host",
        )
        .fetch_all(&my_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        Ok(rows
            .into_iter()
            .map(|(user, host)| DatabaseUser {
                name: format!("'{user}'@'{host}'"),
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
        let my_session = self.get_session(session).await?;
        let table_name = Self::table_ref(namespace, table);

        let mut keys: Vec<&String> = data.columns.keys().collect();
        keys.sort();

        let sql = if keys.is_empty() {
            format!("INSERT INTO {table_name} () VALUES ()")
        } else {
            let cols_str = keys
                .iter()
                .map(|k| DIALECT.quote_ident(k))
                .collect::<Vec<_>>()
                .join(", ");
            let params_str = vec!["?"; keys.len()].join(", ");
            format!("INSERT INTO {table_name} ({cols_str}) VALUES ({params_str})")
        };

        let mut query = sqlx::query(&sql);
        for k in &keys {
            if let Some(val) = data.columns.get(*k) {
                query = Self::bind_param(query, val);
            }
        }

        let start = Instant::now();
        let result = query
            .execute(&my_session.pool)
            .await
            .map_err(Self::map_sqlx_err)?;

        Ok(QueryResult::with_affected_rows(
            result.rows_affected(),
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
        let my_session = self.get_session(session).await?;

        if primary_key.columns.is_empty() {
            return Err(EngineError::rejected(
                "Primary key required for delete operations",
            ));
        }

        let table_name = Self::table_ref(namespace, table);
        let mut pk_keys: Vec<&String> = primary_key.columns.keys().collect();
        pk_keys.sort();

        let where_clauses: Vec<String> = pk_keys
            .iter()
            .map(|k| format!("{}=?", DIALECT.quote_ident(k)))
            .collect();

        let sql = format!(
            "DELETE FROM {table_name} WHERE {}",
            where_clauses.join(" AND ")
        );

        let mut query = sqlx::query(&sql);
        for k in &pk_keys {
            if let Some(val) = primary_key.columns.get(*k) {
                query = Self::bind_param(query, val);
            }
        }

        let start = Instant::now();
        let result = query
            .execute(&my_session.pool)
            .await
            .map_err(Self::map_sqlx_err)?;

        Ok(QueryResult::with_affected_rows(
            result.rows_affected(),
            start.elapsed().as_micros() as f64 / 1000.0,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::EngineKind;

    #[test]
    fn flavor_detection_from_version_strings() {
        assert_eq!(
            ServerFlavor::from_version("8.0.36"),
            ServerFlavor::MySql
        );
        assert_eq!(
            ServerFlavor::from_version("10.11.6-MariaDB-1:10.11.6+maria~ubu2204"),
            ServerFlavor::MariaDb
        );
        assert_eq!(
            ServerFlavor::from_version("5.5.5-10.4.32-MariaDB"),
            ServerFlavor::MariaDb
        );
    }

    #[test]
    fn flavors_pick_divergent_check_constraint_catalogs() {
        let mysql = MySqlDriver::check_clause_sql(ServerFlavor::MySql);
        let mariadb = MySqlDriver::check_clause_sql(ServerFlavor::MariaDb);

        assert_ne!(mysql, mariadb);
        // MariaDB's catalog names the owning table; MySQL's needs the join.
        assert!(!mariadb.contains("table_constraints"));
        assert!(mysql.contains("table_constraints"));
    }

    #[test]
    fn mariadb_longtext_with_json_check_describes_as_json() {
        let flavor = ServerFlavor::from_version("10.11.6-MariaDB-1:10.11.6+maria~ubu2204");
        let clauses = vec!["json_valid(`payload`)".to_string()];

        assert_eq!(
            MySqlDriver::effective_data_type(flavor, "payload", "longtext".into(), &clauses),
            "json"
        );
        assert_eq!(
            MySqlDriver::effective_data_type(flavor, "notes", "longtext".into(), &clauses),
            "longtext"
        );
    }

    #[test]
    fn mysql_longtext_is_never_relabelled() {
        let flavor = ServerFlavor::from_version("8.0.36");
        let clauses = vec!["json_valid(`payload`)".to_string()];

        assert_eq!(
            MySqlDriver::effective_data_type(flavor, "payload", "longtext".into(), &clauses),
            "longtext"
        );
    }

    #[test]
    fn registered_identities_are_distinct() {
        assert_eq!(MySqlDriver::mysql().driver_id(), "mysql");
        assert_eq!(MySqlDriver::mariadb().driver_id(), "mariadb");
    }

    #[test]
    fn connection_string_carries_ssl_mode() {
        let config = ConnectionConfig {
            engine: EngineKind::MySql,
            host: "localhost".into(),
            port: 3306,
            username: "user".into(),
            password: "pass".into(),
            database: Some("app".into()),
            ssh_tunnel: None,
            tls: None,
            name: None,
            color: None,
            folder: None,
        };
        let conn_str = MySqlDriver::build_connection_string(&config).expect("conn str");
        assert!(conn_str.contains("localhost:3306"));
        assert!(conn_str.contains("ssl-mode=PREFERRED"));
    }

    #[test]
    fn auto_increment_column_renders_in_mysql_syntax() {
        let col = ColumnSpec::new("id", "bigint").not_null().auto_increment();
        assert_eq!(
            MySqlDriver::column_def(&col),
            "`id` bigint NOT NULL AUTO_INCREMENT"
        );
    }

    #[tokio::test]
    async fn session_scoped_calls_fail_fast_when_not_connected() {
        let driver = MySqlDriver::mysql();
        let err = driver
            .list_namespaces(SessionId::new())
            .await
            .expect_err("no session");
        assert!(matches!(err, EngineError::NotConnected { .. }));
    }
}
