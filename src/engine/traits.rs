//! DataEngine trait definition
//!
//! This is the core abstraction that all database drivers must implement.
//! It provides a unified interface for connecting, querying, introspecting
//! and mutating schemas across SQL and NoSQL engines.
//!
//! Capability gaps are expressed through default method bodies returning
//! `EngineError::NotSupported`, so a driver only overrides what its engine
//! can actually do and callers can always tell "engine cannot" apart from
//! "engine failed".

use async_trait::async_trait;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::types::{
    Collection, ColumnSpec, ConnectionConfig, DataOptions, DatabaseUser, EnumTypeInfo,
    ExtensionInfo, ForeignKeyInfo, ForeignKeySpec, IndexInfo, IndexSpec, Namespace, QueryId,
    QueryResult, RowData, SchemaOperationResult, SessionId, TableSchema, TableSpec, TriggerInfo,
    TriggerSpec, ViewInfo, RoutineInfo,
};

/// Core trait that all database drivers implement.
///
/// Each driver (PostgreSQL, MySQL/MariaDB, SQLite, ClickHouse, MongoDB,
/// Redis) implements this trait to provide consistent behavior across
/// engines. Session-scoped methods fail fast with `NotConnected` when the
/// session id is unknown or already closed.
#[async_trait]
pub trait DataEngine: Send + Sync {
    /// Returns the unique identifier for this driver (e.g., "postgres", "mysql")
    fn driver_id(&self) -> &'static str;

    /// Returns a human-readable name for this driver
    fn driver_name(&self) -> &'static str;

    /// Tests the connection without establishing a persistent session
    ///
    /// Use this to validate credentials before saving a connection. Must not
    /// leave any handle behind, on success or failure.
    async fn test_connection(&self, config: &ConnectionConfig) -> EngineResult<()>;

    /// Establishes a connection and returns a session identifier
    ///
    /// The session ID is used for all subsequent operations on this connection.
    async fn connect(&self, config: &ConnectionConfig) -> EngineResult<SessionId>;

    /// Closes a session and releases associated resources
    async fn disconnect(&self, session: SessionId) -> EngineResult<()>;

    /// Lightweight liveness check on an established session
    async fn ping(&self, session: SessionId) -> EngineResult<bool> {
        let _ = session;
        Ok(false)
    }

    // ==================== Query ====================

    /// Executes a query and returns the result
    ///
    /// For SQL engines: executes SQL statements passed through verbatim.
    /// For MongoDB: expects a JSON or shell-style query.
    /// For Redis: expects a command line.
    ///
    /// `query_id` identifies the run for best-effort cancellation.
    async fn execute(
        &self,
        session: SessionId,
        query: &str,
        query_id: QueryId,
    ) -> EngineResult<QueryResult>;

    /// Best-effort cancellation of a running query.
    ///
    /// Returns `Ok(true)` when a cancellation request was delivered,
    /// `Ok(false)` when the query was no longer running.
    async fn cancel(&self, session: SessionId, query_id: QueryId) -> EngineResult<bool> {
        let _ = (session, query_id);
        Ok(false)
    }

    // ==================== Introspection ====================
    // Descriptors are live snapshots; drivers never cache them.

    /// Lists all namespaces (databases/schemas) accessible in this session
    async fn list_namespaces(&self, session: SessionId) -> EngineResult<Vec<Namespace>>;

    /// Lists all collections (tables/views/collections) in a namespace
    async fn list_collections(
        &self,
        session: SessionId,
        namespace: &Namespace,
    ) -> EngineResult<Vec<Collection>>;

    /// Returns the schema of a table/collection
    ///
    /// Includes column types, nullability, default values, and primary key info.
    async fn describe_table(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
    ) -> EngineResult<TableSchema>;

    /// Lists indexes on a table
    async fn list_indexes(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
    ) -> EngineResult<Vec<IndexInfo>> {
        let _ = (session, namespace, table);
        Err(EngineError::not_supported(
            "Index listing is not supported by this driver",
        ))
    }

    /// Lists foreign keys on a table
    async fn list_foreign_keys(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
    ) -> EngineResult<Vec<ForeignKeyInfo>> {
        let _ = (session, namespace, table);
        Err(EngineError::not_supported(
            "Foreign keys are not supported by this driver",
        ))
    }

    /// Returns the DDL (CREATE statement) for a table
    async fn table_ddl(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
    ) -> EngineResult<String> {
        let _ = (session, namespace, table);
        Err(EngineError::not_supported(
            "DDL retrieval is not supported by this driver",
        ))
    }

    /// Reads table data with filtering, sorting, and pagination
    async fn read_table(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        options: &DataOptions,
    ) -> EngineResult<QueryResult>;

    /// Returns the native data type names this engine offers for new columns
    fn data_types(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Returns the primary key column names of a table, empty when none
    async fn primary_key_columns(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
    ) -> EngineResult<Vec<String>> {
        let schema = self.describe_table(session, namespace, table).await?;
        Ok(schema.primary_key.unwrap_or_default())
    }

    // ==================== Column DDL ====================
    // Each mutation returns the generated statement text in the result so
    // the caller can surface it.

    async fn add_column(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        column: &ColumnSpec,
    ) -> EngineResult<SchemaOperationResult> {
        let _ = (session, namespace, table, column);
        Err(EngineError::not_supported(
            "Adding columns is not supported by this driver",
        ))
    }

    async fn modify_column(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        column: &ColumnSpec,
    ) -> EngineResult<SchemaOperationResult> {
        let _ = (session, namespace, table, column);
        Err(EngineError::not_supported(
            "Modifying columns is not supported by this driver",
        ))
    }

    async fn drop_column(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        column: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let _ = (session, namespace, table, column);
        Err(EngineError::not_supported(
            "Dropping columns is not supported by this driver",
        ))
    }

    async fn rename_column(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        old_name: &str,
        new_name: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let _ = (session, namespace, table, old_name, new_name);
        Err(EngineError::not_supported(
            "Renaming columns is not supported by this driver",
        ))
    }

    // ==================== Index DDL ====================

    async fn create_index(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        index: &IndexSpec,
    ) -> EngineResult<SchemaOperationResult> {
        let _ = (session, namespace, table, index);
        Err(EngineError::not_supported(
            "Creating indexes is not supported by this driver",
        ))
    }

    async fn drop_index(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        index: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let _ = (session, namespace, table, index);
        Err(EngineError::not_supported(
            "Dropping indexes is not supported by this driver",
        ))
    }

    // ==================== Foreign key DDL ====================

    async fn add_foreign_key(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        fk: &ForeignKeySpec,
    ) -> EngineResult<SchemaOperationResult> {
        let _ = (session, namespace, table, fk);
        Err(EngineError::not_supported(
            "Foreign keys are not supported by this driver",
        ))
    }

    async fn drop_foreign_key(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        fk_name: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let _ = (session, namespace, table, fk_name);
        Err(EngineError::not_supported(
            "Foreign keys are not supported by this driver",
        ))
    }

    // ==================== Table DDL ====================

    async fn create_table(
        &self,
        session: SessionId,
        namespace: &Namespace,
        spec: &TableSpec,
    ) -> EngineResult<SchemaOperationResult> {
        let _ = (session, namespace, spec);
        Err(EngineError::not_supported(
            "Creating tables is not supported by this driver",
        ))
    }

    async fn drop_table(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let _ = (session, namespace, table);
        Err(EngineError::not_supported(
            "Dropping tables is not supported by this driver",
        ))
    }

    async fn rename_table(
        &self,
        session: SessionId,
        namespace: &Namespace,
        old_name: &str,
        new_name: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let _ = (session, namespace, old_name, new_name);
        Err(EngineError::not_supported(
            "Renaming tables is not supported by this driver",
        ))
    }

    // ==================== Views ====================

    async fn create_view(
        &self,
        session: SessionId,
        namespace: &Namespace,
        name: &str,
        query: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let _ = (session, namespace, name, query);
        Err(EngineError::not_supported(
            "Views are not supported by this driver",
        ))
    }

    async fn drop_view(
        &self,
        session: SessionId,
        namespace: &Namespace,
        name: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let _ = (session, namespace, name);
        Err(EngineError::not_supported(
            "Views are not supported by this driver",
        ))
    }

    async fn rename_view(
        &self,
        session: SessionId,
        namespace: &Namespace,
        old_name: &str,
        new_name: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let _ = (session, namespace, old_name, new_name);
        Err(EngineError::not_supported(
            "Views are not supported by this driver",
        ))
    }

    async fn list_views(
        &self,
        session: SessionId,
        namespace: &Namespace,
    ) -> EngineResult<Vec<ViewInfo>> {
        let _ = (session, namespace);
        Err(EngineError::not_supported(
            "Views are not supported by this driver",
        ))
    }

    /// Returns the definition of a view
    async fn view_ddl(
        &self,
        session: SessionId,
        namespace: &Namespace,
        name: &str,
    ) -> EngineResult<String> {
        let _ = (session, namespace, name);
        Err(EngineError::not_supported(
            "Views are not supported by this driver",
        ))
    }

    // ==================== Routines ====================

    async fn list_routines(
        &self,
        session: SessionId,
        namespace: &Namespace,
    ) -> EngineResult<Vec<RoutineInfo>> {
        let _ = (session, namespace);
        Err(EngineError::not_supported(
            "Stored routines are not supported by this driver",
        ))
    }

    async fn routine_definition(
        &self,
        session: SessionId,
        namespace: &Namespace,
        routine: &str,
    ) -> EngineResult<String> {
        let _ = (session, namespace, routine);
        Err(EngineError::not_supported(
            "Stored routines are not supported by this driver",
        ))
    }

    // ==================== Triggers ====================

    async fn list_triggers(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: Option<&str>,
    ) -> EngineResult<Vec<TriggerInfo>> {
        let _ = (session, namespace, table);
        Err(EngineError::not_supported(
            "Triggers are not supported by this driver",
        ))
    }

    async fn create_trigger(
        &self,
        session: SessionId,
        namespace: &Namespace,
        trigger: &TriggerSpec,
    ) -> EngineResult<SchemaOperationResult> {
        let _ = (session, namespace, trigger);
        Err(EngineError::not_supported(
            "Triggers are not supported by this driver",
        ))
    }

    async fn drop_trigger(
        &self,
        session: SessionId,
        namespace: &Namespace,
        trigger: &str,
        table: &str,
    ) -> EngineResult<SchemaOperationResult> {
        let _ = (session, namespace, trigger, table);
        Err(EngineError::not_supported(
            "Triggers are not supported by this driver",
        ))
    }

    async fn trigger_definition(
        &self,
        session: SessionId,
        namespace: &Namespace,
        trigger: &str,
    ) -> EngineResult<String> {
        let _ = (session, namespace, trigger);
        Err(EngineError::not_supported(
            "Triggers are not supported by this driver",
        ))
    }

    // ==================== Users ====================

    async fn list_users(&self, session: SessionId) -> EngineResult<Vec<DatabaseUser>> {
        let _ = session;
        Err(EngineError::not_supported(
            "User listing is not supported by this driver",
        ))
    }

    // ==================== Row mutation ====================

    /// Insert a new row into a table.
    ///
    /// Returns QueryResult with affected_rows = 1 on success.
    async fn insert_row(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        data: &RowData,
    ) -> EngineResult<QueryResult> {
        let _ = (session, namespace, table, data);
        Err(EngineError::not_supported(
            "Insert operations are not supported by this driver",
        ))
    }

    /// Delete a row identified by primary key (or `_id` / key, per engine).
    ///
    /// Must fail when the row identity cannot be determined rather than
    /// guessing at which row to remove.
    async fn delete_row(
        &self,
        session: SessionId,
        namespace: &Namespace,
        table: &str,
        primary_key: &RowData,
    ) -> EngineResult<QueryResult> {
        let _ = (session, namespace, table, primary_key);
        Err(EngineError::not_supported(
            "Delete operations are not supported by this driver",
        ))
    }

    // ==================== PostgreSQL extras ====================
    // Unsupported everywhere else; the Postgres driver overrides them.

    async fn list_sequences(
        &self,
        session: SessionId,
        namespace: &Namespace,
    ) -> EngineResult<Vec<crate::engine::types::SequenceInfo>> {
        let _ = (session, namespace);
        Err(EngineError::not_supported(
            "Sequences are not supported by this driver",
        ))
    }

    async fn list_extensions(&self, session: SessionId) -> EngineResult<Vec<ExtensionInfo>> {
        let _ = session;
        Err(EngineError::not_supported(
            "Extensions are not supported by this driver",
        ))
    }

    async fn list_enum_types(
        &self,
        session: SessionId,
        namespace: &Namespace,
    ) -> EngineResult<Vec<EnumTypeInfo>> {
        let _ = (session, namespace);
        Err(EngineError::not_supported(
            "Enum types are not supported by this driver",
        ))
    }

    /// Refresh a materialized view. With `concurrently`, the engine error for
    /// a view lacking a unique index is surfaced verbatim.
    async fn refresh_materialized_view(
        &self,
        session: SessionId,
        namespace: &Namespace,
        view: &str,
        concurrently: bool,
    ) -> EngineResult<SchemaOperationResult> {
        let _ = (session, namespace, view, concurrently);
        Err(EngineError::not_supported(
            "Materialized views are not supported by this driver",
        ))
    }
}

impl std::fmt::Debug for dyn DataEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataEngine")
            .field("driver_id", &self.driver_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::ErrorKind;

    struct MinimalDriver;

    #[async_trait]
    impl DataEngine for MinimalDriver {
        fn driver_id(&self) -> &'static str {
            "minimal"
        }

        fn driver_name(&self) -> &'static str {
            "Minimal"
        }

        async fn test_connection(&self, _config: &ConnectionConfig) -> EngineResult<()> {
            Ok(())
        }

        async fn connect(&self, _config: &ConnectionConfig) -> EngineResult<SessionId> {
            Ok(SessionId::new())
        }

        async fn disconnect(&self, _session: SessionId) -> EngineResult<()> {
            Ok(())
        }

        async fn execute(
            &self,
            _session: SessionId,
            _query: &str,
            _query_id: QueryId,
        ) -> EngineResult<QueryResult> {
            Ok(QueryResult::empty())
        }

        async fn list_namespaces(&self, _session: SessionId) -> EngineResult<Vec<Namespace>> {
            Ok(vec![])
        }

        async fn list_collections(
            &self,
            _session: SessionId,
            _namespace: &Namespace,
        ) -> EngineResult<Vec<Collection>> {
            Ok(vec![])
        }

        async fn describe_table(
            &self,
            _session: SessionId,
            _namespace: &Namespace,
            _table: &str,
        ) -> EngineResult<TableSchema> {
            Ok(TableSchema {
                columns: vec![],
                primary_key: Some(vec!["id".into()]),
                row_count_estimate: None,
            })
        }

        async fn read_table(
            &self,
            _session: SessionId,
            _namespace: &Namespace,
            _table: &str,
            _options: &DataOptions,
        ) -> EngineResult<QueryResult> {
            Ok(QueryResult::empty())
        }
    }

    #[tokio::test]
    async fn capability_defaults_are_unsupported_not_failures() {
        let driver = MinimalDriver;
        let session = SessionId::new();
        let ns = Namespace::new("db");

        let err = driver
            .list_foreign_keys(session, &ns, "t")
            .await
            .expect_err("default must be unsupported");
        assert_eq!(err.kind(), ErrorKind::Unsupported);

        let err = driver
            .create_trigger(
                session,
                &ns,
                &TriggerSpec {
                    name: "trg".into(),
                    table: "t".into(),
                    timing: "BEFORE".into(),
                    event: "INSERT".into(),
                    body: "SELECT 1".into(),
                },
            )
            .await
            .expect_err("default must be unsupported");
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn cancel_defaults_to_false_without_error() {
        let driver = MinimalDriver;
        let delivered = driver
            .cancel(SessionId::new(), QueryId::new())
            .await
            .expect("cancel default is a no-op");
        assert!(!delivered);
    }

    #[tokio::test]
    async fn primary_key_columns_fall_back_to_describe() {
        let driver = MinimalDriver;
        let pk = driver
            .primary_key_columns(SessionId::new(), &Namespace::new("db"), "t")
            .await
            .expect("describe-backed default");
        assert_eq!(pk, vec!["id".to_string()]);
    }
}
