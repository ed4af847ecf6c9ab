//! PostgreSQL Driver
//!
//! Implements the DataEngine trait for PostgreSQL using SQLx. Sessions hold
//! a connection pool plus per-query backend pids so running statements can
//! be cancelled through `pg_cancel_backend`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow, Postgres};
use sqlx::{Column, Row, TypeInfo};
use tokio::sync::{Mutex, RwLock};

use crate::engine::base::{render_select, SqlDialect};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::tls;
use crate::engine::traits::DataEngine;
use crate::engine::types::{
    Collection, CollectionType, ColumnInfo, ColumnSpec, ConnectionConfig, DataOptions,
    DatabaseUser, EnumTypeInfo, ExtensionInfo, ForeignKeyInfo, ForeignKeySpec, IndexInfo,
    IndexSpec, Namespace, QueryId, QueryResult, ReferentialAction, RoutineInfo, RoutineKind,
    Row as QRow, RowData, SchemaOperationResult, SequenceInfo, SessionId, TableColumn,
    TableSchema, TableSpec, TriggerInfo, TriggerSpec, Value, ViewInfo,
};

const DIALECT: SqlDialect = SqlDialect::Postgres;

/// Foreign key lookup. Both column lists are aggregated over
/// `unnest .. WITH ORDINALITY` so that for composite keys the n-th source
/// column pairs with the n-th referenced column.
const FOREIGN_KEY_SQL: &str = r#"
    SELECT
        con.conname::text,
        src.cols,
        ref_cl.relname::text AS referenced_table,
        dst.cols,
        CASE con.confupdtype
            WHEN 'c' THEN 'CASCADE' WHEN 'n' THEN 'SET NULL'
            WHEN 'd' THEN 'SET DEFAULT' WHEN 'r' THEN 'RESTRICT'
            ELSE 'NO ACTION' END,
        CASE con.confdeltype
            WHEN 'c' THEN 'CASCADE' WHEN 'n' THEN 'SET NULL'
            WHEN 'd' THEN 'SET DEFAULT' WHEN 'r' THEN 'RESTRICT'
            ELSE 'NO ACTION' END
    FROM pg_constraint con
    JOIN pg_class cl ON cl.oid = con.conrelid
    JOIN pg_namespace n ON n.oid = cl.relnamespace
    JOIN pg_class ref_cl ON ref_cl.oid = con.confrelid
    CROSS JOIN LATERAL (
        SELECT array_to_string(array_agg(a.attname ORDER BY k.ord), ',') AS cols
        FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
        JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
    ) src
    CROSS JOIN LATERAL (
        SELECT array_to_string(array_agg(a.attname ORDER BY k.ord), ',') AS cols
        FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
        JOIN pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum
    ) dst
    WHERE con.contype = 'f' AND n.nspname = $1 AND cl.relname = $2
    ORDER BY con.conname
"#;

/// Holds the connection state for a PostgreSQL session.
pub struct PostgresSession {
    pub pool: PgPool,
    /// Active queries (query_id -> backend_pid)
    pub active_queries: Mutex<HashMap<QueryId, i32>>,
}

impl PostgresSession {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            active_queries: Mutex::new(HashMap::new()),
        }
    }
}

/// PostgreSQL driver implementation
pub struct PostgresDriver {
    sessions: Arc<RwLock<HashMap<SessionId, Arc<PostgresSession>>>>,
}

impl PostgresDriver {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn get_session(&self, session: SessionId) -> EngineResult<Arc<PostgresSession>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&session)
            .cloned()
            .ok_or_else(|| EngineError::session_not_found(session))
    }

    /// Builds a connection string from config, TLS rendered as `ssl*` params.
    fn build_connection_string(config: &ConnectionConfig) -> EngineResult<String> {
        let db = config.database.as_deref().unwrap_or("postgres");
        let params = tls::postgres_params(config.tls.as_ref())?;
        let query: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();

        Ok(format!(
            "postgres://{}:{}@{}:{}/{}?{}",
            config.username,
            config.password,
            config.host,
            config.port,
            db,
            query.join("&")
        ))
    }

    /// Classifies a sqlx error: auth and transport failures get their own
    /// kinds; anything the server itself rejected keeps its native text.
    fn map_sqlx_err(e: sqlx::Error) -> EngineError {
        match &e {
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed => EngineError::connection_failed(e.to_string()),
            sqlx::Error::Database(db_err) => {
                let msg = db_err.to_string();
                // 28xxx = invalid authorization specification
                if db_err.code().map(|c| c.starts_with("28")).unwrap_or(false) {
                    EngineError::auth_failed(msg)
                } else {
                    EngineError::rejected(msg)
                }
            }
            _ => EngineError::rejected(e.to_string()),
        }
    }

    fn table_ref(namespace: &Namespace, table: &str) -> String {
        let schema = namespace.schema.as_deref().unwrap_or("public");
        format!("{}.{}", DIALECT.quote_ident(schema), DIALECT.quote_ident(table))
    }

    /// Converts a SQLx row to our universal Row type
    fn convert_row(pg_row: &PgRow) -> QRow {
        let values: Vec<Value> = pg_row
            .columns()
            .iter()
            .map(|col| Self::extract_value(pg_row, col.ordinal()))
            .collect();

        QRow { values }
    }

    /// Helper to bind a Value to a Postgres query
    fn bind_param<'q>(
        query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
        value: &'q Value,
    ) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
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

    /// Extracts a value from a PgRow at the given index
    fn extract_value(row: &PgRow, idx: usize) -> Value {
        // IMPORTANT: Test integers BEFORE bool to avoid misinterpretation
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::Int).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        // Bool AFTER integers
        if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
            return v.map(Value::Bool).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map(Value::Float).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
            return v.map(|f| Value::Float(f as f64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<rust_decimal::Decimal>, _>(idx) {
            return v.map(|d| Value::Text(d.to_string())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(Value::Text).unwrap_or(Value::Null);
        }
        // Date/Time types - convert to ISO 8601 string
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

    async fn fetch_backend_pid(conn: &mut PoolConnection<Postgres>) -> EngineResult<i32> {
        sqlx::query_scalar("SELECT pg_backend_pid()")
            .fetch_one(&mut **conn)
            .await
            .map_err(Self::map_sqlx_err)
    }

    /// Gets column info from a PgRow
    fn get_column_info(row: &PgRow) -> Vec<ColumnInfo> {
        row.columns()
            .iter()
            .map(|col| ColumnInfo {
                name: col.name().to_string(),
                data_type: col.type_info().name().to_string(),
                nullable: true, // SQLx doesn't expose nullability at runtime
            })
            .collect()
    }

    fn rows_to_result(pg_rows: Vec<PgRow>, started: Instant) -> QueryResult {
        let execution_time_ms = started.elapsed().as_micros() as f64 / 1000.0;
        if pg_rows.is_empty() {
            QueryResult {
                columns: Vec::new(),
                rows: Vec::new(),
                affected_rows: None,
                execution_time_ms,
            }
        } else {
            let columns = Self::get_column_info(&pg_rows[0]);
            let rows: Vec<QRow> = pg_rows.iter().map(Self::convert_row).collect();
            QueryResult {
                columns,
                rows,
                affected_rows: None,
                execution_time_ms,
            }
        }
    }

    /// Executes a DDL statement, folding an engine rejection into the result
    /// so callers always get the generated SQL back.
    async fn run_ddl(pool: &PgPool, sql: String) -> EngineResult<SchemaOperationResult> {
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

    fn column_def(column: &ColumnSpec) -> String {
        let mut def = format!("{} {}", DIALECT.quote_ident(&column.name), column.data_type);
        if column.auto_increment {
            def = format!(
                "{} {}",
                DIALECT.quote_ident(&column.name),
                if column.data_type.eq_ignore_ascii_case("bigint") {
                    "BIGSERIAL"
                } else {
                    "SERIAL"
                }
            );
        }
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default_value {
            def.push_str(&format!(" DEFAULT {default}"));
        }
        def
    }

    fn add_foreign_key_sql(namespace: &Namespace, table: &str, fk: &ForeignKeySpec) -> String {
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
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON UPDATE {} ON DELETE {}",
            Self::table_ref(namespace, table),
            DIALECT.quote_ident(&name),
            cols.join(", "),
            Self::table_ref(namespace, &fk.referenced_table),
            ref_cols.join(", "),
            fk.on_update.as_sql(),
            fk.on_delete.as_sql(),
        )
    }

    fn refresh_matview_sql(namespace: &Namespace, view: &str, concurrently: bool) -> String {
        format!(
            "REFRESH MATERIALIZED VIEW{} {}",
            if concurrently { " CONCURRENTLY" } else { "" },
            Self::table_ref(namespace, view)
        )
    }
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataEngine for PostgresDriver {
    fn driver_id(&self) -> &'static str {
        "postgres"
    }

    fn driver_name(&self) -> &'static str {
        "PostgreSQL"
    }

    async fn test_connection(&self, config: &ConnectionConfig) -> EngineResult<()> {
        let conn_str = Self::build_connection_string(config)?;

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(10))
            .connect(&conn_str)
            .await
            .map_err(|e| {
                if e.to_string().contains("password authentication failed") {
                    EngineError::auth_failed(e.to_string())
                } else {
                    EngineError::connection_failed(e.to_string())
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

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(&conn_str)
            .await
            .map_err(|e| EngineError::connection_failed(e.to_string()))?;

        let session_id = SessionId::new();
        let session = Arc::new(PostgresSession::new(pool));

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
        let pg_session = self.get_session(session).await?;
        Ok(sqlx::query("SELECT 1").execute(&pg_session.pool).await.is_ok())
    }

    async fn execute(
        &self,
        session: SessionId,
        query: &str,
        query_id: QueryId,
    ) -> EngineResult<QueryResult> {
        let pg_session = self.get_session(session).await?;
        let start = Instant::now();

        let trimmed = query.trim().to_uppercase();
        let is_select = trimmed.starts_with("SELECT")
            || trimmed.starts_with("WITH")
            || trimmed.starts_with("SHOW")
            || trimmed.starts_with("EXPLAIN");

        let mut conn = pg_session
            .pool
            .acquire()
            .await
            .map_err(|e| EngineError::connection_failed(e.to_string()))?;
        let backend_pid = Self::fetch_backend_pid(&mut conn).await?;
        {
            let mut active = pg_session.active_queries.lock().await;
            active.insert(query_id, backend_pid);
        }

        let result = if is_select {
            sqlx::query(query)
                .fetch_all(&mut *conn)
                .await
                .map_err(Self::map_sqlx_err)
                .map(|pg_rows| Self::rows_to_result(pg_rows, start))
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

        let mut active = pg_session.active_queries.lock().await;
        active.remove(&query_id);

        result
    }

    async fn cancel(&self, session: SessionId, query_id: QueryId) -> EngineResult<bool> {
        let pg_session = self.get_session(session).await?;

        let backend_pid = {
            let active = pg_session.active_queries.lock().await;
            match active.get(&query_id) {
                Some(pid) => *pid,
                None => return Ok(false),
            }
        };

        let mut conn = pg_session
            .pool
            .acquire()
            .await
            .map_err(|e| EngineError::connection_failed(e.to_string()))?;

        sqlx::query("SELECT pg_cancel_backend($1)")
            .bind(backend_pid)
            .execute(&mut *conn)
            .await
            .map_err(Self::map_sqlx_err)?;

        Ok(true)
    }

    async fn list_namespaces(&self, session: SessionId) -> EngineResult<Vec<Namespace>> {
        let pg_session = self.get_session(session).await?;

        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT current_database()::text as database, schema_name::text
            FROM information_schema.schemata
            WHERE schema_name NOT IN ('pg_catalog', 'information_schema', 'pg_toast')
            ORDER BY schema_name
            "#,
        )
        .fetch_all(&pg_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        Ok(rows
            .into_iter()
            .map(|(db, schema)| Namespace::with_schema(db, schema))
            .collect())
    }

    async fn list_collections(
        &self,
        session: SessionId,
        namespace: &Namespace,
    ) -> EngineResult<Vec<Collection>> {
        let pg_session = self.get_session(session).await?;
        let schema = namespace.schema.as_deref().unwrap_or("public");

        // pg_class covers materialized views, which information_schema hides.
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT c.relname::text, c.relkind::text
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1 AND c.relkind IN ('r', 'p', 'v', 'm')
            ORDER BY c.relname
            "#,
        )
        .bind(schema)
        .fetch_all(&pg_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        Ok(rows
            .into_iter()
            .map(|(name, relkind)| {
                let collection_type = match relkind.as_str() {
                    "v" => CollectionType::View,
                    "m" => CollectionType::MaterializedView,
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
        let pg_session = self.get_session(session).await?;
        let pool = &pg_session.pool;
        let schema = namespace.schema.as_deref().unwrap_or("public");

        let column_rows: Vec<(String, String, String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT
                column_name::text,
                data_type::text,
                is_nullable::text,
                column_default::text
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        let pk_rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT a.attname::text
            FROM pg_index i
            JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
            JOIN pg_class c ON c.oid = i.indrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE i.indisprimary
              AND n.nspname = $1
              AND c.relname = $2
            ORDER BY array_position(i.indkey, a.attnum)
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        let pk_columns: Vec<String> = pk_rows.into_iter().map(|(name,)| name).collect();

        let columns: Vec<TableColumn> = column_rows
            .into_iter()
            .map(|(name, data_type, is_nullable, default_value)| TableColumn {
                is_primary_key: pk_columns.contains(&name),
                name,
                data_type,
                nullable: is_nullable == "YES",
                default_value,
            })
            .collect();

        let count_row: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT reltuples::bigint
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1 AND c.relname = $2
            "#,
        )
        .bind(schema)
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
            row_count_estimate: count_row.map(|(c,)| c.max(0) as u64),
        })
    }

    async fn list_indexes(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
    ) -> EngineResult<Vec<IndexInfo>> {
        let pg_session = self.get_session(session).await?;
        let schema = namespace.schema.as_deref().unwrap_or("public");

        let rows: Vec<(String, bool, String, String)> = sqlx::query_as(
            r#"
            SELECT
                ic.relname::text AS index_name,
                i.indisunique,
                am.amname::text AS index_type,
                array_to_string(array_agg(a.attname ORDER BY k.ord), ',') AS columns
            FROM pg_index i
            JOIN pg_class ic ON ic.oid = i.indexrelid
            JOIN pg_class tc ON tc.oid = i.indrelid
            JOIN pg_namespace n ON n.oid = tc.relnamespace
            JOIN pg_am am ON am.oid = ic.relam
            CROSS JOIN LATERAL unnest(i.indkey) WITH ORDINALITY AS k(attnum, ord)
            JOIN pg_attribute a ON a.attrelid = tc.oid AND a.attnum = k.attnum
            WHERE n.nspname = $1 AND tc.relname = $2 AND NOT i.indisprimary
            GROUP BY ic.relname, i.indisunique, am.amname
            ORDER BY ic.relname
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&pg_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        Ok(rows
            .into_iter()
            .map(|(name, unique, index_type, columns)| IndexInfo {
                name,
                columns: columns.split(',').map(str::to_string).collect(),
                unique,
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
        let pg_session = self.get_session(session).await?;
        let schema = namespace.schema.as_deref().unwrap_or("public");

        let rows: Vec<(String, String, String, String, String, String)> =
            sqlx::query_as(FOREIGN_KEY_SQL)
                .bind(schema)
                .bind(table)
                .fetch_all(&pg_session.pool)
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
        // Postgres has no SHOW CREATE TABLE; assemble one from the catalog.
        let schema = self.describe_table(session, namespace, table).await?;

        let mut lines: Vec<String> = schema
            .columns
            .iter()
            .map(|c| {
                let mut line = format!("    {} {}", DIALECT.quote_ident(&c.name), c.data_type);
                if !c.nullable {
                    line.push_str(" NOT NULL");
                }
                if let Some(default) = &c.default_value {
                    line.push_str(&format!(" DEFAULT {default}"));
                }
                line
            })
            .collect();

        if let Some(pk) = &schema.primary_key {
            let cols: Vec<String> = pk.iter().map(|c| DIALECT.quote_ident(c)).collect();
            lines.push(format!("    PRIMARY KEY ({})", cols.join(", ")));
        }

        Ok(format!(
            "CREATE TABLE {} (\n{}\n)",
            Self::table_ref(namespace, table),
            lines.join(",\n")
        ))
    }

    async fn read_table(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        options: &DataOptions,
    ) -> EngineResult<QueryResult> {
        let pg_session = self.get_session(session).await?;
        let start = Instant::now();

        let fragment = render_select(&Self::table_ref(namespace, table), options, DIALECT)?;

        let mut query = sqlx::query(&fragment.sql);
        for value in &fragment.params {
            query = Self::bind_param(query, value);
        }

        let pg_rows = query
            .fetch_all(&pg_session.pool)
            .await
            .map_err(Self::map_sqlx_err)?;

        Ok(Self::rows_to_result(pg_rows, start))
    }

    fn data_types(&self) -> Vec<&'static str> {
        vec![
            "smallint", "integer", "bigint", "numeric", "real", "double precision", "serial",
            "bigserial", "boolean", "text", "varchar", "char", "bytea", "date", "time",
            "timestamp", "timestamptz", "interval", "uuid", "json", "jsonb", "inet", "cidr",
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
        let pg_session = self.get_session(session).await?;
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {}",
            Self::table_ref(namespace, table),
            Self::column_def(column)
        );
        Self::run_ddl(&pg_session.pool, sql).await
    }

    async fn modify_column(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        column: &ColumnSpec,
    ) -> EngineResult<SchemaOperationResult> {
        let pg_session = self.get_session(session).await?;
        let table_ref = Self::table_ref(namespace, table);
        let col = DIALECT.quote_ident(&column.name);

        let mut actions = vec![format!(
            "ALTER COLUMN {col} TYPE {} USING {col}::{}",
            column.data_type, column.data_type
        )];
        actions.push(if column.nullable {
            format!("ALTER COLUMN {col} DROP NOT NULL")
        } else {
            format!("ALTER COLUMN {col} SET NOT NULL")
        });
        match &column.default_value {
            Some(default) => actions.push(format!("ALTER COLUMN {col} SET DEFAULT {default}")),
            None => actions.push(format!("ALTER COLUMN {col} DROP DEFAULT")),
        }

        let sql = format!("ALTER TABLE {table_ref} {}", actions.join(", "));
        Self::run_ddl(&pg_session.pool, sql).await
    }

    async fn drop_column(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        column: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let pg_session = self.get_session(session).await?;
        let sql = format!(
            "ALTER TABLE {} DROP COLUMN {}",
            Self::table_ref(namespace, table),
            DIALECT.quote_ident(column)
        );
        Self::run_ddl(&pg_session.pool, sql).await
    }

    async fn rename_column(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        old_name: &str,
        new_name: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let pg_session = self.get_session(session).await?;
        let sql = format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            Self::table_ref(namespace, table),
            DIALECT.quote_ident(old_name),
            DIALECT.quote_ident(new_name)
        );
        Self::run_ddl(&pg_session.pool, sql).await
    }

    // ==================== Index DDL ====================

    async fn create_index(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        index: &IndexSpec,
    ) -> EngineResult<SchemaOperationResult> {
        let pg_session = self.get_session(session).await?;
        let cols: Vec<String> = index.columns.iter().map(|c| DIALECT.quote_ident(c)).collect();
        let using = index
            .index_type
            .as_deref()
            .map(|t| format!(" USING {t}"))
            .unwrap_or_default();
        let sql = format!(
            "CREATE {}INDEX {} ON {}{} ({})",
            if index.unique { "UNIQUE " } else { "" },
            DIALECT.quote_ident(&index.name),
            Self::table_ref(namespace, table),
            using,
            cols.join(", ")
        );
        Self::run_ddl(&pg_session.pool, sql).await
    }

    async fn drop_index(
        &self,
        session: SessionId,
        namespace: &Namespace,
        _table: &str,
        index: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let pg_session = self.get_session(session).await?;
        let schema = namespace.schema.as_deref().unwrap_or("public");
        let sql = format!(
            "DROP INDEX {}.{}",
            DIALECT.quote_ident(schema),
            DIALECT.quote_ident(index)
        );
        Self::run_ddl(&pg_session.pool, sql).await
    }

    // ==================== Foreign key DDL ====================

    async fn add_foreign_key(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        fk: &ForeignKeySpec,
    ) -> EngineResult<SchemaOperationResult> {
        let pg_session = self.get_session(session).await?;
        let sql = Self::add_foreign_key_sql(namespace, table, fk);
        Self::run_ddl(&pg_session.pool, sql).await
    }

    async fn drop_foreign_key(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        fk_name: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let pg_session = self.get_session(session).await?;
        let sql = format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            Self::table_ref(namespace, table),
            DIALECT.quote_ident(fk_name)
        );
        Self::run_ddl(&pg_session.pool, sql).await
    }

    // ==================== Table DDL ====================

    async fn create_table(
        &self,
        session: SessionId,
        namespace: &Namespace,
        spec: &TableSpec,
    ) -> EngineResult<SchemaOperationResult> {
        let pg_session = self.get_session(session).await?;

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
        Self::run_ddl(&pg_session.pool, sql).await
    }

    async fn drop_table(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let pg_session = self.get_session(session).await?;
        let sql = format!("DROP TABLE {}", Self::table_ref(namespace, table));
        Self::run_ddl(&pg_session.pool, sql).await
    }

    async fn rename_table(
        &self,
        session: SessionId,
        namespace: &Namespace,
        old_name: &str,
        new_name: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let pg_session = self.get_session(session).await?;
        let sql = format!(
            "ALTER TABLE {} RENAME TO {}",
            Self::table_ref(namespace, old_name),
            DIALECT.quote_ident(new_name)
        );
        Self::run_ddl(&pg_session.pool, sql).await
    }

    // ==================== Views ====================

    async fn create_view(
        &self,
        session: SessionId,
        namespace: &Namespace,
        name: &str,
        query: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let pg_session = self.get_session(session).await?;
        let sql = format!("CREATE VIEW {} AS {}", Self::table_ref(namespace, name), query);
        Self::run_ddl(&pg_session.pool, sql).await
    }

    async fn drop_view(
        &self,
        session: SessionId,
        namespace: &Namespace,
        name: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let pg_session = self.get_session(session).await?;
        let sql = format!("DROP VIEW {}", Self::table_ref(namespace, name));
        Self::run_ddl(&pg_session.pool, sql).await
    }

    async fn rename_view(
        &self,
        session: SessionId,
        namespace: &Namespace,
        old_name: &str,
        new_name: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let pg_session = self.get_session(session).await?;
        let sql = format!(
            "ALTER VIEW {} RENAME TO {}",
            Self::table_ref(namespace, old_name),
            DIALECT.quote_ident(new_name)
        );
        Self::run_ddl(&pg_session.pool, sql).await
    }

    async fn list_views(
        &self,
        session: SessionId,
        namespace: &Namespace,
    ) -> EngineResult<Vec<ViewInfo>> {
        let pg_session = self.get_session(session).await?;
        let schema = namespace.schema.as_deref().unwrap_or("public");

        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT c.relname::text, c.relkind::text
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1 AND c.relkind IN ('v', 'm')
            ORDER BY c.relname
            "#,
        )
        .bind(schema)
        .fetch_all(&pg_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        Ok(rows
            .into_iter()
            .map(|(name, relkind)| ViewInfo {
                name,
                materialized: relkind == "m",
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
        let pg_session = self.get_session(session).await?;
        let schema = namespace.schema.as_deref().unwrap_or("public");

        let definition: (String,) = sqlx::query_as(
            "SELECT pg_get_viewdef(($1 || '.' || $2)::regclass, true)::text",
        )
        .bind(schema)
        .bind(name)
        .fetch_one(&pg_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        Ok(definition.0)
    }

    // ==================== Routines ====================

    async fn list_routines(
        &self,
        session: SessionId,
        namespace: &Namespace,
    ) -> EngineResult<Vec<RoutineInfo>> {
        let pg_session = self.get_session(session).await?;
        let schema = namespace.schema.as_deref().unwrap_or("public");

        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT
                p.proname::text,
                CASE p.prokind WHEN 'p' THEN 'procedure' ELSE 'function' END,
                l.lanname::text,
                pg_get_function_result(p.oid)::text
            FROM pg_proc p
            JOIN pg_namespace n ON n.oid = p.pronamespace
            JOIN pg_language l ON l.oid = p.prolang
            WHERE n.nspname = $1 AND p.prokind IN ('f', 'p')
            ORDER BY p.proname
            "#,
        )
        .bind(schema)
        .fetch_all(&pg_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        Ok(rows
            .into_iter()
            .map(|(name, kind, language, return_type)| RoutineInfo {
                name,
                kind: if kind == "procedure" {
                    RoutineKind::Procedure
                } else {
                    RoutineKind::Function
                },
                language: Some(language),
                return_type: if return_type.is_empty() {
                    None
                } else {
                    Some(return_type)
                },
            })
            .collect())
    }

    async fn routine_definition(
        &self,
        session: SessionId,
        namespace: &Namespace,
        routine: &str,
    ) -> EngineResult<String> {
        let pg_session = self.get_session(session).await?;
        let schema = namespace.schema.as_deref().unwrap_or("public");

        let definition: (String,) = sqlx::query_as(
            r#"
            SELECT pg_get_functiondef(p.oid)::text
            FROM pg_proc p
            JOIN pg_namespace n ON n.oid = p.pronamespace
            WHERE n.nspname = $1 AND p.proname = $2
            LIMIT 1
            "#,
        )
        .bind(schema)
        .bind(routine)
        .fetch_one(&pg_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        Ok(definition.0)
    }

    // ==================== Triggers ====================

    async fn list_triggers(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: Option<&str>,
    ) -> EngineResult<Vec<TriggerInfo>> {
        let pg_session = self.get_session(session).await?;
        let schema = namespace.schema.as_deref().unwrap_or("public");

        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT
                trigger_name::text,
                event_object_table::text,
                action_timing::text,
                event_manipulation::text
            FROM information_schema.triggers
            WHERE trigger_schema = $1
              AND ($2::text IS NULL OR event_object_table = $2)
            ORDER BY trigger_name
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&pg_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        Ok(rows
            .into_iter()
            .map(|(name, table, timing, event)| TriggerInfo {
                name,
                table,
                timing,
                event,
                definition: None,
            })
            .collect())
    }

    async fn create_trigger(
        &self,
        session: SessionId,
        namespace: &Namespace,
        trigger: &TriggerSpec,
    ) -> EngineResult<SchemaOperationResult> {
        let pg_session = self.get_session(session).await?;
        let sql = format!(
            "CREATE TRIGGER {} {} {} ON {} FOR EACH ROW {}",
            DIALECT.quote_ident(&trigger.name),
            trigger.timing,
            trigger.event,
            Self::table_ref(namespace, &trigger.table),
            trigger.body
        );
        Self::run_ddl(&pg_session.pool, sql).await
    }

    async fn drop_trigger(
        &self,
        session: SessionId,
        namespace: &Namespace,
        trigger: &str,
        table: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let pg_session = self.get_session(session).await?;
        let sql = format!(
            "DROP TRIGGER {} ON {}",
            DIALECT.quote_ident(trigger),
            Self::table_ref(namespace, table)
        );
        Self::run_ddl(&pg_session.pool, sql).await
    }

    async fn trigger_definition(
        &self,
        session: SessionId,
        namespace: &Namespace,
        trigger: &str,
    ) -> EngineResult<String> {
        let pg_session = self.get_session(session).await?;
        let schema = namespace.schema.as_deref().unwrap_or("public");

        let definition: (String,) = sqlx::query_as(
            r#"
            SELECT pg_get_triggerdef(t.oid)::text
            FROM pg_trigger t
            JOIN pg_class c ON c.oid = t.tgrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1 AND t.tgname = $2 AND NOT t.tgisinternal
            LIMIT 1
            "#,
        )
        .bind(schema)
        .bind(trigger)
        .fetch_one(&pg_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        Ok(definition.0)
    }

    // ==================== Users ====================

    async fn list_users(&self, session: SessionId) -> EngineResult<Vec<DatabaseUser>> {
        let pg_session = self.get_session(session).await?;

        let rows: Vec<(String, bool, bool, bool)> = sqlx::query_as(
            r#"
            SELECT rolname::text, rolsuper, rolcreatedb, rolcreaterole
            FROM pg_roles
            WHERE rolcanlogin
            ORDER BY rolname
            "#,
        )
        .fetch_all(&pg_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        Ok(rows
            .into_iter()
            .map(|(name, superuser, createdb, createrole)| {
                let mut privileges = Vec::new();
                if superuser {
                    privileges.push("SUPERUSER".to_string());
                }
                if createdb {
                    privileges.push("CREATEDB".to_string());
                }
                if createrole {
                    privileges.push("CREATEROLE".to_string());
                }
                DatabaseUser { name, privileges }
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
        let pg_session = self.get_session(session).await?;
        let table_name = Self::table_ref(namespace, table);

        let mut keys: Vec<&String> = data.columns.keys().collect();
        keys.sort();

        let sql = if keys.is_empty() {
            format!("INSERT INTO {table_name} DEFAULT VALUES")
        } else {
            let cols_str = keys
                .iter()
                .map(|k| DIALECT.quote_ident(k))
                .collect::<Vec<_>>()
                .join(", ");
            let params_str = (1..=keys.len())
                .map(|i| format!("${i}"))
                .collect::<Vec<_>>()
                .join(", ");
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
            .execute(&pg_session.pool)
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
        let pg_session = self.get_session(session).await?;

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
            .enumerate()
            .map(|(i, k)| format!("{}=${}", DIALECT.quote_ident(k), i + 1))
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
            .execute(&pg_session.pool)
            .await
            .map_err(Self::map_sqlx_err)?;

        Ok(QueryResult::with_affected_rows(
            result.rows_affected(),
            start.elapsed().as_micros() as f64 / 1000.0,
        ))
    }

    // ==================== PostgreSQL extras ====================

    async fn list_sequences(
        &self,
        session: SessionId,
        namespace: &Namespace,
    ) -> EngineResult<Vec<SequenceInfo>> {
        let pg_session = self.get_session(session).await?;
        let schema = namespace.schema.as_deref().unwrap_or("public");

        let rows: Vec<(String, String, Option<i64>)> = sqlx::query_as(
            r#"
            SELECT sequencename::text, data_type::text, last_value
            FROM pg_sequences
            WHERE schemaname = $1
            ORDER BY sequencename
            "#,
        )
        .bind(schema)
        .fetch_all(&pg_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        Ok(rows
            .into_iter()
            .map(|(name, data_type, last_value)| SequenceInfo {
                name,
                data_type: Some(data_type),
                last_value,
            })
            .collect())
    }

    async fn list_extensions(&self, session: SessionId) -> EngineResult<Vec<ExtensionInfo>> {
        let pg_session = self.get_session(session).await?;

        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT extname::text, extversion::text FROM pg_extension ORDER BY extname",
        )
        .fetch_all(&pg_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        Ok(rows
            .into_iter()
            .map(|(name, version)| ExtensionInfo {
                name,
                version: Some(version),
            })
            .collect())
    }

    async fn list_enum_types(
        &self,
        session: SessionId,
        namespace: &Namespace,
    ) -> EngineResult<Vec<EnumTypeInfo>> {
        let pg_session = self.get_session(session).await?;
        let schema = namespace.schema.as_deref().unwrap_or("public");

        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT t.typname::text,
                   array_to_string(array_agg(e.enumlabel ORDER BY e.enumsortorder), ',')
            FROM pg_type t
            JOIN pg_enum e ON e.enumtypid = t.oid
            JOIN pg_namespace n ON n.oid = t.typnamespace
            WHERE n.nspname = $1
            GROUP BY t.typname
            ORDER BY t.typname
            "#,
        )
        .bind(schema)
        .fetch_all(&pg_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        Ok(rows
            .into_iter()
            .map(|(name, values)| EnumTypeInfo {
                name,
                values: values.split(',').map(str::to_string).collect(),
            })
            .collect())
    }

    async fn refresh_materialized_view(
        &self,
        session: SessionId,
        namespace: &Namespace,
        view: &str,
        concurrently: bool,
    ) -> EngineResult<SchemaOperationResult> {
        let pg_session = self.get_session(session).await?;
        // A concurrent refresh on a matview without a unique index is refused
        // by the server; that native error rides back in the result.
        let sql = Self::refresh_matview_sql(namespace, view, concurrently);
        Self::run_ddl(&pg_session.pool, sql).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::EngineKind;

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            engine: EngineKind::Postgres,
            host: "localhost".into(),
            port: 5432,
            username: "user".into(),
            password: "pass".into(),
            database: Some("testdb".into()),
            ssh_tunnel: None,
            tls: None,
            name: None,
            color: None,
            folder: None,
        }
    }

    #[test]
    fn connection_string_carries_tls_params() {
        let conn_str = PostgresDriver::build_connection_string(&config()).expect("conn str");
        assert!(conn_str.contains("localhost:5432"));
        assert!(conn_str.contains("testdb"));
        assert!(conn_str.contains("sslmode=prefer"));
    }

    #[test]
    fn foreign_key_ddl_round_trips_actions() {
        let ns = Namespace::with_schema("db", "public");
        let fk = ForeignKeySpec {
            name: Some("fk_orders_customer".into()),
            columns: vec!["customer_id".into()],
            referenced_table: "customers".into(),
            referenced_columns: vec!["id".into()],
            on_update: ReferentialAction::NoAction,
            on_delete: ReferentialAction::Cascade,
        };
        let sql = PostgresDriver::add_foreign_key_sql(&ns, "orders", &fk);

        assert_eq!(
            sql,
            "ALTER TABLE \"public\".\"orders\" ADD CONSTRAINT \"fk_orders_customer\" \
             FOREIGN KEY (\"customer_id\") REFERENCES \"public\".\"customers\" (\"id\") \
             ON UPDATE NO ACTION ON DELETE CASCADE"
        );
    }

    #[test]
    fn composite_foreign_key_lookup_keeps_column_pairs_aligned() {
        // Value-sorted DISTINCT aggregation scrambles composite keys; both
        // sides must aggregate on the unnest ordinality instead.
        assert!(!FOREIGN_KEY_SQL.contains("DISTINCT"));
        assert!(FOREIGN_KEY_SQL.contains("unnest(con.conkey) WITH ORDINALITY"));
        assert!(FOREIGN_KEY_SQL.contains("unnest(con.confkey) WITH ORDINALITY"));
        assert_eq!(FOREIGN_KEY_SQL.matches("ORDER BY k.ord").count(), 2);
    }

    #[test]
    fn matview_refresh_statement_respects_concurrently() {
        let ns = Namespace::with_schema("db", "public");
        assert_eq!(
            PostgresDriver::refresh_matview_sql(&ns, "mv", true),
            "REFRESH MATERIALIZED VIEW CONCURRENTLY \"public\".\"mv\""
        );
        assert_eq!(
            PostgresDriver::refresh_matview_sql(&ns, "mv", false),
            "REFRESH MATERIALIZED VIEW \"public\".\"mv\""
        );
    }

    #[test]
    fn serial_columns_render_with_auto_increment() {
        let col = ColumnSpec::new("id", "integer").primary_key().auto_increment().not_null();
        let def = PostgresDriver::column_def(&col);
        assert_eq!(def, "\"id\" SERIAL NOT NULL");
    }

    #[tokio::test]
    async fn session_scoped_calls_fail_fast_when_not_connected() {
        let driver = PostgresDriver::new();
        let err = driver
            .list_namespaces(SessionId::new())
            .await
            .expect_err("no session");
        assert!(matches!(err, EngineError::NotConnected { .. }));
    }
}
