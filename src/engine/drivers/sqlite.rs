//! SQLite Driver
//!
//! Implements the DataEngine trait for SQLite files and in-memory databases
//! using SQLx. The `database` field of the connection config carries the file
//! path, or `:memory:` for a transient database.
//!
//! In-memory databases are pinned to a single pooled connection: every
//! connection in a pool would otherwise get its own private empty database.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo};
use tokio::sync::RwLock;

use crate::engine::base::{render_select, SqlDialect};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::traits::DataEngine;
use crate::engine::types::{
    Collection, CollectionType, ColumnInfo, ColumnSpec, ConnectionConfig, DataOptions,
    ForeignKeyInfo, IndexInfo, IndexSpec, Namespace, QueryId, QueryResult, ReferentialAction,
    Row as QRow, RowData, SchemaOperationResult, SessionId, TableColumn, TableSchema, TableSpec,
    TriggerInfo, TriggerSpec, Value, ViewInfo,
};

const DIALECT: SqlDialect = SqlDialect::Sqlite;

pub struct SqliteSession {
    pub pool: SqlitePool,
}

/// SQLite driver implementation
pub struct SqliteDriver {
    sessions: Arc<RwLock<HashMap<SessionId, Arc<SqliteSession>>>>,
}

impl SqliteDriver {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn get_session(&self, session: SessionId) -> EngineResult<Arc<SqliteSession>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&session)
            .cloned()
            .ok_or_else(|| EngineError::session_not_found(session))
    }

    fn database_path(config: &ConnectionConfig) -> EngineResult<&str> {
        config
            .database
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                EngineError::configuration("SQLite requires a database file path or ':memory:'")
            })
    }

    async fn open_pool(config: &ConnectionConfig) -> EngineResult<SqlitePool> {
        let path = Self::database_path(config)?;
        let in_memory = path == ":memory:";

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{path}"))
            .map_err(|e| EngineError::configuration(e.to_string()))?
            .create_if_missing(true);

        SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .connect_with(options)
            .await
            .map_err(|e| EngineError::connection_failed(e.to_string()))
    }

    fn map_sqlx_err(e: sqlx::Error) -> EngineError {
        match &e {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                EngineError::connection_failed(e.to_string())
            }
            sqlx::Error::Database(db_err) => EngineError::rejected(db_err.to_string()),
            _ => EngineError::rejected(e.to_string()),
        }
    }

    fn bind_param<'q>(
        query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
        value: &'q Value,
    ) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        match value {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(b) => query.bind(b),
            Value::Int(i) => query.bind(i),
            Value::Float(f) => query.bind(f),
            Value::Text(s) => query.bind(s),
            Value::Bytes(b) => query.bind(b.as_slice()),
            Value::Json(j) => query.bind(j.to_string()),
            Value::Array(_) => query.bind(Option::<String>::None),
        }
    }

    fn extract_value(row: &SqliteRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::Int).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map(Value::Float).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(Value::Text).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            return v.map(Value::Bytes).unwrap_or(Value::Null);
        }
        Value::Null
    }

    fn convert_row(row: &SqliteRow) -> QRow {
        let values: Vec<Value> = row
            .columns()
            .iter()
            .map(|col| Self::extract_value(row, col.ordinal()))
            .collect();
        QRow { values }
    }

    fn get_column_info(row: &SqliteRow) -> Vec<ColumnInfo> {
        row.columns()
            .iter()
            .map(|col| ColumnInfo {
                name: col.name().to_string(),
                data_type: col.type_info().name().to_string(),
                nullable: true,
            })
            .collect()
    }

    fn rows_to_result(sqlite_rows: Vec<SqliteRow>, started: Instant) -> QueryResult {
        let execution_time_ms = started.elapsed().as_micros() as f64 / 1000.0;
        if sqlite_rows.is_empty() {
            QueryResult {
                columns: Vec::new(),
                rows: Vec::new(),
                affected_rows: None,
                execution_time_ms,
            }
        } else {
            let columns = Self::get_column_info(&sqlite_rows[0]);
            let rows: Vec<QRow> = sqlite_rows.iter().map(Self::convert_row).collect();
            QueryResult {
                columns,
                rows,
                affected_rows: None,
                execution_time_ms,
            }
        }
    }

    async fn run_ddl(pool: &SqlitePool, sql: String) -> EngineResult<SchemaOperationResult> {
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
        if column.primary_key && column.auto_increment {
            def.push_str(" PRIMARY KEY AUTOINCREMENT");
        }
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default_value {
            def.push_str(&format!(" DEFAULT {default}"));
        }
        def
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataEngine for SqliteDriver {
    fn driver_id(&self) -> &'static str {
        "sqlite"
    }

    fn driver_name(&self) -> &'static str {
        "SQLite"
    }

    async fn test_connection(&self, config: &ConnectionConfig) -> EngineResult<()> {
        let pool = Self::open_pool(config).await?;
        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(Self::map_sqlx_err)?;
        pool.close().await;
        Ok(())
    }

    async fn connect(&self, config: &ConnectionConfig) -> EngineResult<SessionId> {
        let pool = Self::open_pool(config).await?;

        let session_id = SessionId::new();
        let session = Arc::new(SqliteSession { pool });

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
        let sq_session = self.get_session(session).await?;
        Ok(sqlx::query("SELECT 1").execute(&sq_session.pool).await.is_ok())
    }

    async fn execute(
        &self,
        session: SessionId,
        query: &str,
        _query_id: QueryId,
    ) -> EngineResult<QueryResult> {
        let sq_session = self.get_session(session).await?;
        let start = Instant::now();

        let trimmed = query.trim().to_uppercase();
        let is_select = trimmed.starts_with("SELECT")
            || trimmed.starts_with("WITH")
            || trimmed.starts_with("PRAGMA")
            || trimmed.starts_with("EXPLAIN");

        if is_select {
            let rows = sqlx::query(query)
                .fetch_all(&sq_session.pool)
                .await
                .map_err(Self::map_sqlx_err)?;
            Ok(Self::rows_to_result(rows, start))
        } else {
            let result = sqlx::query(query)
                .execute(&sq_session.pool)
                .await
                .map_err(Self::map_sqlx_err)?;
            Ok(QueryResult::with_affected_rows(
                result.rows_affected(),
                start.elapsed().as_micros() as f64 / 1000.0,
            ))
        }
    }

    async fn list_namespaces(&self, session: SessionId) -> EngineResult<Vec<Namespace>> {
        let sq_session = self.get_session(session).await?;

        // Attached databases included; "main" is always first.
        let rows: Vec<(i64, String, Option<String>)> = sqlx::query_as("PRAGMA database_list")
            .fetch_all(&sq_session.pool)
            .await
            .map_err(Self::map_sqlx_err)?;

        Ok(rows
            .into_iter()
            .map(|(_, name, _)| Namespace::new(name))
            .collect())
    }

    async fn list_collections(
        &self,
        session: SessionId,
        namespace: &Namespace,
    ) -> EngineResult<Vec<Collection>> {
        let sq_session = self.get_session(session).await?;

        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT name, type FROM sqlite_master
            WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
            ORDER BY name
            "#,
        )
        .fetch_all(&sq_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        Ok(rows
            .into_iter()
            .map(|(name, kind)| Collection {
                namespace: namespace.clone(),
                name,
                collection_type: if kind == "view" {
                    CollectionType::View
                } else {
                    CollectionType::Table
                },
            })
            .collect())
    }

    async fn describe_table(
        &self,
        session: SessionId,
        _namespace: &Namespace,
        table: &str,
    ) -> EngineResult<TableSchema> {
        let sq_session = self.get_session(session).await?;

        // PRAGMA table_info: (cid, name, type, notnull, dflt_value, pk)
        let rows: Vec<(i64, String, String, i64, Option<String>, i64)> =
            sqlx::query_as(&format!(
                "PRAGMA table_info({})",
                DIALECT.quote_ident(table)
            ))
            .fetch_all(&sq_session.pool)
            .await
            .map_err(Self::map_sqlx_err)?;

        if rows.is_empty() {
            return Err(EngineError::rejected(format!("no such table: {table}")));
        }

        let mut pk_columns = Vec::new();
        let columns: Vec<TableColumn> = rows
            .into_iter()
            .map(|(_, name, data_type, notnull, default_value, pk)| {
                let is_pk = pk > 0;
                if is_pk {
                    pk_columns.push(name.clone());
                }
                TableColumn {
                    name,
                    data_type,
                    nullable: notnull == 0,
                    default_value,
                    is_primary_key: is_pk,
                }
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

    async fn list_indexes(
        &self,
        session: SessionId,
        _namespace: &Namespace,
        table: &str,
    ) -> EngineResult<Vec<IndexInfo>> {
        let sq_session = self.get_session(session).await?;

        // PRAGMA index_list: (seq, name, unique, origin, partial)
        let index_rows: Vec<(i64, String, i64, String, i64)> = sqlx::query_as(&format!(
            "PRAGMA index_list({})",
            DIALECT.quote_ident(table)
        ))
        .fetch_all(&sq_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        let mut indexes = Vec::with_capacity(index_rows.len());
        for (_, name, unique, origin, _) in index_rows {
            // Skip implicit indexes backing PRIMARY KEY/UNIQUE constraints.
            if origin != "c" {
                continue;
            }
            let column_rows: Vec<(i64, i64, Option<String>)> = sqlx::query_as(&format!(
                "PRAGMA index_info({})",
                DIALECT.quote_ident(&name)
            ))
            .fetch_all(&sq_session.pool)
            .await
            .map_err(Self::map_sqlx_err)?;

            indexes.push(IndexInfo {
                name,
                columns: column_rows.into_iter().filter_map(|(_, _, c)| c).collect(),
                unique: unique == 1,
                index_type: None,
            });
        }

        Ok(indexes)
    }

    async fn list_foreign_keys(
        &self,
        session: SessionId,
        _namespace: &Namespace,
        table: &str,
    ) -> EngineResult<Vec<ForeignKeyInfo>> {
        let sq_session = self.get_session(session).await?;

        // PRAGMA foreign_key_list:
        // (id, seq, table, from, to, on_update, on_delete, match)
        let rows: Vec<(i64, i64, String, String, Option<String>, String, String, String)> =
            sqlx::query_as(&format!(
                "PRAGMA foreign_key_list({})",
                DIALECT.quote_ident(table)
            ))
            .fetch_all(&sq_session.pool)
            .await
            .map_err(Self::map_sqlx_err)?;

        // Group multi-column keys by their id.
        let mut grouped: HashMap<i64, ForeignKeyInfo> = HashMap::new();
        for (id, _, ref_table, from, to, on_update, on_delete, _) in rows {
            let entry = grouped.entry(id).or_insert_with(|| ForeignKeyInfo {
                name: format!("fk_{table}_{id}"),
                columns: Vec::new(),
                referenced_table: ref_table.clone(),
                referenced_columns: Vec::new(),
                on_update: ReferentialAction::from_catalog(&on_update),
                on_delete: ReferentialAction::from_catalog(&on_delete),
            });
            entry.columns.push(from);
            if let Some(to) = to {
                entry.referenced_columns.push(to);
            }
        }

        let mut fks: Vec<ForeignKeyInfo> = grouped.into_values().collect();
        fks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(fks)
    }

    async fn table_ddl(
        &self,
        session: SessionId,
        _namespace: &Namespace,
        table: &str,
    ) -> EngineResult<String> {
        let sq_session = self.get_session(session).await?;

        let row: Option<(Option<String>,)> = sqlx::query_as(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_optional(&sq_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        row.and_then(|(sql,)| sql)
            .ok_or_else(|| EngineError::rejected(format!("no such table: {table}")))
    }

    async fn read_table(
        &self,
        session: SessionId,
        _namespace: &Namespace,
        table: &str,
        options: &DataOptions,
    ) -> EngineResult<QueryResult> {
        let sq_session = self.get_session(session).await?;
        let start = Instant::now();

        let fragment = render_select(&DIALECT.quote_ident(table), options, DIALECT)?;

        let mut query = sqlx::query(&fragment.sql);
        for value in &fragment.params {
            query = Self::bind_param(query, value);
        }

        let rows = query
            .fetch_all(&sq_session.pool)
            .await
            .map_err(Self::map_sqlx_err)?;

        Ok(Self::rows_to_result(rows, start))
    }

    fn data_types(&self) -> Vec<&'static str> {
        vec!["INTEGER", "REAL", "TEXT", "BLOB", "NUMERIC"]
    }

    // ==================== Column DDL ====================
    // SQLite's ALTER TABLE covers add/drop/rename; column type changes
    // require a table rebuild and stay unsupported.

    async fn add_column(
        &self,
        session: SessionId,
        _namespace: &Namespace,
        table: &str,
        column: &ColumnSpec,
    ) -> EngineResult<SchemaOperationResult> {
        let sq_session = self.get_session(session).await?;
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {}",
            DIALECT.quote_ident(table),
            Self::column_def(column)
        );
        Self::run_ddl(&sq_session.pool, sql).await
    }

    async fn drop_column(
        &self,
        session: SessionId,
        _namespace: &Namespace,
        table: &str,
        column: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let sq_session = self.get_session(session).await?;
        let sql = format!(
            "ALTER TABLE {} DROP COLUMN {}",
            DIALECT.quote_ident(table),
            DIALECT.quote_ident(column)
        );
        Self::run_ddl(&sq_session.pool, sql).await
    }

    async fn rename_column(
        &self,
        session: SessionId,
        _namespace: &Namespace,
        table: &str,
        old_name: &str,
        new_name: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let sq_session = self.get_session(session).await?;
        let sql = format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            DIALECT.quote_ident(table),
            DIALECT.quote_ident(old_name),
            DIALECT.quote_ident(new_name)
        );
        Self::run_ddl(&sq_session.pool, sql).await
    }

    // ==================== Index DDL ====================

    async fn create_index(
        &self,
        session: SessionId,
        _namespace: &Namespace,
        table: &str,
        index: &IndexSpec,
    ) -> EngineResult<SchemaOperationResult> {
        let sq_session = self.get_session(session).await?;
        let cols: Vec<String> = index.columns.iter().map(|c| DIALECT.quote_ident(c)).collect();
        let sql = format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            DIALECT.quote_ident(&index.name),
            DIALECT.quote_ident(table),
            cols.join(", ")
        );
        Self::run_ddl(&sq_session.pool, sql).await
    }

    async fn drop_index(
        &self,
        session: SessionId,
        _namespace: &Namespace,
        _table: &str,
        index: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let sq_session = self.get_session(session).await?;
        let sql = format!("DROP INDEX {}", DIALECT.quote_ident(index));
        Self::run_ddl(&sq_session.pool, sql).await
    }

    // ==================== Table DDL ====================

    async fn create_table(
        &self,
        session: SessionId,
        _namespace: &Namespace,
        spec: &TableSpec,
    ) -> EngineResult<SchemaOperationResult> {
        let sq_session = self.get_session(session).await?;

        let mut lines: Vec<String> =
            spec.columns.iter().map(|c| format!("    {}", Self::column_def(c))).collect();
        // An AUTOINCREMENT column already carries its PRIMARY KEY inline.
        let pk_cols: Vec<String> = spec
            .columns
            .iter()
            .filter(|c| c.primary_key && !c.auto_increment)
            .map(|c| DIALECT.quote_ident(&c.name))
            .collect();
        if !pk_cols.is_empty() {
            lines.push(format!("    PRIMARY KEY ({})", pk_cols.join(", ")));
        }

        let sql = format!(
            "CREATE TABLE {} (\n{}\n)",
            DIALECT.quote_ident(&spec.name),
            lines.join(",\n")
        );
        Self::run_ddl(&sq_session.pool, sql).await
    }

    async fn drop_table(
        &self,
        session: SessionId,
        _namespace: &Namespace,
        table: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let sq_session = self.get_session(session).await?;
        let sql = format!("DROP TABLE {}", DIALECT.quote_ident(table));
        Self::run_ddl(&sq_session.pool, sql).await
    }

    async fn rename_table(
        &self,
        session: SessionId,
        _namespace: &Namespace,
        old_name: &str,
        new_name: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let sq_session = self.get_session(session).await?;
        let sql = format!(
            "ALTER TABLE {} RENAME TO {}",
            DIALECT.quote_ident(old_name),
            DIALECT.quote_ident(new_name)
        );
        Self::run_ddl(&sq_session.pool, sql).await
    }

    // ==================== Views ====================

    async fn create_view(
        &self,
        session: SessionId,
        _namespace: &Namespace,
        name: &str,
        query: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let sq_session = self.get_session(session).await?;
        let sql = format!("CREATE VIEW {} AS {}", DIALECT.quote_ident(name), query);
        Self::run_ddl(&sq_session.pool, sql).await
    }

    async fn drop_view(
        &self,
        session: SessionId,
        _namespace: &Namespace,
        name: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let sq_session = self.get_session(session).await?;
        let sql = format!("DROP VIEW {}", DIALECT.quote_ident(name));
        Self::run_ddl(&sq_session.pool, sql).await
    }

    async fn list_views(
        &self,
        session: SessionId,
        _namespace: &Namespace,
    ) -> EngineResult<Vec<ViewInfo>> {
        let sq_session = self.get_session(session).await?;

        let rows: Vec<(String, Option<String>)> = sqlx::query_as(
            "SELECT name, sql FROM sqlite_master WHERE type = 'view' ORDER BY name",
        )
        .fetch_all(&sq_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        Ok(rows
            .into_iter()
            .map(|(name, definition)| ViewInfo {
                name,
                materialized: false,
                definition,
            })
            .collect())
    }

    async fn view_ddl(
        &self,
        session: SessionId,
        _namespace: &Namespace,
        name: &str,
    ) -> EngineResult<String> {
        let sq_session = self.get_session(session).await?;

        let row: Option<(Option<String>,)> = sqlx::query_as(
            "SELECT sql FROM sqlite_master WHERE type = 'view' AND name = ?",
        )
        .bind(name)
        .fetch_optional(&sq_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        row.and_then(|(sql,)| sql)
            .ok_or_else(|| EngineError::rejected(format!("no such view: {name}")))
    }

    // ==================== Triggers ====================

    async fn list_triggers(
        &self,
        session: SessionId,
        _namespace: &Namespace,
        table: Option<&str>,
    ) -> EngineResult<Vec<TriggerInfo>> {
        let sq_session = self.get_session(session).await?;

        let rows: Vec<(String, String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT name, tbl_name, sql FROM sqlite_master
            WHERE type = 'trigger' AND (? IS NULL OR tbl_name = ?)
            ORDER BY name
            "#,
        )
        .bind(table)
        .bind(table)
        .fetch_all(&sq_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        Ok(rows
            .into_iter()
            .map(|(name, table, sql)| {
                // Timing/event live inside the stored CREATE TRIGGER text.
                let upper = sql.as_deref().unwrap_or("").to_uppercase();
                let timing = if upper.contains("INSTEAD OF") {
                    "INSTEAD OF"
                } else if upper.contains("AFTER") {
                    "AFTER"
                } else {
                    "BEFORE"
                };
                let event = if upper.contains("DELETE") {
                    "DELETE"
                } else if upper.contains("UPDATE") {
                    "UPDATE"
                } else {
                    "INSERT"
                };
                TriggerInfo {
                    name,
                    table,
                    timing: timing.to_string(),
                    event: event.to_string(),
                    definition: sql,
                }
            })
            .collect())
    }

    async fn create_trigger(
        &self,
        session: SessionId,
        _namespace: &Namespace,
        trigger: &TriggerSpec,
    ) -> EngineResult<SchemaOperationResult> {
        let sq_session = self.get_session(session).await?;
        let sql = format!(
            "CREATE TRIGGER {} {} {} ON {} BEGIN {} END",
            DIALECT.quote_ident(&trigger.name),
            trigger.timing,
            trigger.event,
            DIALECT.quote_ident(&trigger.table),
            trigger.body.trim_end_matches(';').to_string() + ";"
        );
        Self::run_ddl(&sq_session.pool, sql).await
    }

    async fn drop_trigger(
        &self,
        session: SessionId,
        _namespace: &Namespace,
        trigger: &str,
        _table: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let sq_session = self.get_session(session).await?;
        let sql = format!("DROP TRIGGER {}", DIALECT.quote_ident(trigger));
        Self::run_ddl(&sq_session.pool, sql).await
    }

    async fn trigger_definition(
        &self,
        session: SessionId,
        _namespace: &Namespace,
        trigger: &str,
    ) -> EngineResult<String> {
        let sq_session = self.get_session(session).await?;

        let row: Option<(Option<String>,)> = sqlx::query_as(
            "SELECT sql FROM sqlite_master WHERE type = 'trigger' AND name = ?",
        )
        .bind(trigger)
        .fetch_optional(&sq_session.pool)
        .await
        .map_err(Self::map_sqlx_err)?;

        row.and_then(|(sql,)| sql)
            .ok_or_else(|| EngineError::rejected(format!("no such trigger: {trigger}")))
    }

    // ==================== Row mutation ====================

    async fn insert_row(
        &self,
        session: SessionId,
        _namespace: &Namespace,
        table: &str,
        data: &RowData,
    ) -> EngineResult<QueryResult> {
        let sq_session = self.get_session(session).await?;
        let table_name = DIALECT.quote_ident(table);

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
            .execute(&sq_session.pool)
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
        _namespace: &Namespace,
        table: &str,
        primary_key: &RowData,
    ) -> EngineResult<QueryResult> {
        let sq_session = self.get_session(session).await?;

        if primary_key.columns.is_empty() {
            return Err(EngineError::rejected(
                "Primary key required for delete operations",
            ));
        }

        let mut pk_keys: Vec<&String> = primary_key.columns.keys().collect();
        pk_keys.sort();

        let where_clauses: Vec<String> = pk_keys
            .iter()
            .map(|k| format!("{}=?", DIALECT.quote_ident(k)))
            .collect();

        let sql = format!(
            "DELETE FROM {} WHERE {}",
            DIALECT.quote_ident(table),
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
            .execute(&sq_session.pool)
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
    use crate::engine::error::ErrorKind;
    use crate::engine::types::{EngineKind, Filter, FilterOp, SortDirection, SortSpec};

    fn memory_config() -> ConnectionConfig {
        ConnectionConfig {
            engine: EngineKind::Sqlite,
            host: String::new(),
            port: 0,
            username: String::new(),
            password: String::new(),
            database: Some(":memory:".into()),
            ssh_tunnel: None,
            tls: None,
            name: None,
            color: None,
            folder: None,
        }
    }

    async fn connected() -> (SqliteDriver, SessionId) {
        let driver = SqliteDriver::new();
        let session = driver.connect(&memory_config()).await.expect("connect");
        (driver, session)
    }

    fn users_table_spec() -> TableSpec {
        TableSpec {
            name: "t".into(),
            columns: vec![
                ColumnSpec::new("id", "INTEGER").primary_key().auto_increment(),
                ColumnSpec::new("name", "TEXT").not_null(),
            ],
            engine: None,
            order_by: vec![],
            partition_by: None,
        }
    }

    #[tokio::test]
    async fn create_insert_select_round_trip_in_memory() {
        let (driver, session) = connected().await;
        let ns = Namespace::new("main");

        let created = driver
            .create_table(session, &ns, &users_table_spec())
            .await
            .expect("create table");
        assert!(created.success, "create failed: {:?}", created.error);

        let row = RowData::new().with_column("name", Value::Text("Alice".into()));
        let inserted = driver
            .insert_row(session, &ns, "t", &row)
            .await
            .expect("insert");
        assert_eq!(inserted.affected_rows, Some(1));

        let result = driver
            .execute(session, "SELECT * FROM t", QueryId::new())
            .await
            .expect("select");
        assert_eq!(result.row_count(), 1);
        assert_eq!(result.rows[0].values[0], Value::Int(1));
        assert_eq!(result.rows[0].values[1], Value::Text("Alice".into()));

        driver.disconnect(session).await.expect("disconnect");
    }

    #[tokio::test]
    async fn add_then_drop_column_restores_column_set() {
        let (driver, session) = connected().await;
        let ns = Namespace::new("main");

        driver
            .create_table(session, &ns, &users_table_spec())
            .await
            .expect("create table");

        let before: Vec<String> = driver
            .describe_table(session, &ns, "t")
            .await
            .expect("describe")
            .columns
            .into_iter()
            .map(|c| c.name)
            .collect();

        let added = driver
            .add_column(session, &ns, "t", &ColumnSpec::new("email", "TEXT"))
            .await
            .expect("add column");
        assert!(added.success);

        let with_email: Vec<String> = driver
            .describe_table(session, &ns, "t")
            .await
            .expect("describe")
            .columns
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert!(with_email.contains(&"email".to_string()));

        let dropped = driver
            .drop_column(session, &ns, "t", "email")
            .await
            .expect("drop column");
        assert!(dropped.success);

        let after: Vec<String> = driver
            .describe_table(session, &ns, "t")
            .await
            .expect("describe")
            .columns
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn read_table_applies_filters_sort_and_limit() {
        let (driver, session) = connected().await;
        let ns = Namespace::new("main");

        driver
            .create_table(session, &ns, &users_table_spec())
            .await
            .expect("create table");
        for name in ["Alice", "Bob", "Carol"] {
            driver
                .insert_row(
                    session,
                    &ns,
                    "t",
                    &RowData::new().with_column("name", Value::Text(name.into())),
                )
                .await
                .expect("insert");
        }

        let options = DataOptions {
            filters: vec![Filter::new(
                "name",
                FilterOp::Ne,
                Value::Text("Bob".into()),
            )],
            sort: vec![SortSpec {
                column: "name".into(),
                direction: SortDirection::Desc,
            }],
            limit: Some(1),
            offset: None,
        };

        let result = driver
            .read_table(session, &ns, "t", &options)
            .await
            .expect("read");
        assert_eq!(result.row_count(), 1);
        assert_eq!(result.rows[0].values[1], Value::Text("Carol".into()));
    }

    #[tokio::test]
    async fn engine_rejection_rides_back_in_the_result() {
        let (driver, session) = connected().await;
        let ns = Namespace::new("main");

        // Dropping a table that does not exist is refused by the engine.
        let result = driver
            .drop_table(session, &ns, "missing")
            .await
            .expect("transport fine");
        assert!(!result.success);
        assert!(result.error.is_some());
        assert!(result.sql.as_deref().unwrap_or("").contains("DROP TABLE"));
    }

    #[tokio::test]
    async fn rejected_query_keeps_native_error_text() {
        let (driver, session) = connected().await;
        let err = driver
            .execute(session, "SELECT * FROM nope", QueryId::new())
            .await
            .expect_err("must fail");
        assert_eq!(err.kind(), ErrorKind::Rejected);
        assert!(err.to_string().contains("nope"));
    }

    #[tokio::test]
    async fn table_ddl_comes_from_sqlite_master() {
        let (driver, session) = connected().await;
        let ns = Namespace::new("main");

        driver
            .create_table(session, &ns, &users_table_spec())
            .await
            .expect("create table");
        let ddl = driver.table_ddl(session, &ns, "t").await.expect("ddl");
        assert!(ddl.contains("CREATE TABLE"));
        assert!(ddl.contains("AUTOINCREMENT"));
    }

    #[tokio::test]
    async fn missing_database_path_is_a_configuration_error() {
        let driver = SqliteDriver::new();
        let mut config = memory_config();
        config.database = None;

        let err = driver.connect(&config).await.expect_err("no path");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
