//! Query and schema operation façade.
//!
//! The embedding layer (IPC, RPC, whatever hosts the engine) talks to this
//! type only. It resolves connection ids to live sessions, books in-flight
//! queries with the QueryManager, and folds engine errors into serializable
//! response envelopes instead of surfacing `Err` to the caller: a refused
//! query is an unhappy response, not a transport failure.

use std::sync::Arc;

use serde::Serialize;
use tokio::time::{timeout, Duration};
use tracing::{field, instrument};

use crate::engine::connection_manager::ConnectionManager;
use crate::engine::error::EngineError;
use crate::engine::query_manager::QueryManager;
use crate::engine::types::{
    Collection, ColumnSpec, ConnectionId, DataOptions, DatabaseUser, EnumTypeInfo, ExtensionInfo,
    ForeignKeyInfo, ForeignKeySpec, IndexInfo, IndexSpec, Namespace, QueryId, QueryResult,
    RoutineInfo, RowData, SchemaOperationResult, SequenceInfo, TableSchema, TableSpec,
    TriggerInfo, TriggerSpec, ViewInfo,
};

/// Result envelope for queries and row mutations.
#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub success: bool,
    pub result: Option<QueryResult>,
    pub error: Option<String>,
    pub error_kind: Option<String>,
    pub query_id: Option<String>,
}

impl QueryResponse {
    fn ok(result: QueryResult, query_id: Option<QueryId>) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            error_kind: None,
            query_id: query_id.map(|q| q.0.to_string()),
        }
    }

    fn err(e: &EngineError, query_id: Option<QueryId>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(e.to_string()),
            error_kind: Some(e.kind().as_str().to_string()),
            query_id: query_id.map(|q| q.0.to_string()),
        }
    }
}

/// Result envelope for listings and schema reads.
#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub error_kind: Option<String>,
}

impl<T> DataResponse<T> {
    fn from_result(result: Result<T, EngineError>) -> Self {
        match result {
            Ok(data) => Self {
                success: true,
                data: Some(data),
                error: None,
                error_kind: None,
            },
            Err(e) => Self {
                success: false,
                data: None,
                error: Some(e.to_string()),
                error_kind: Some(e.kind().as_str().to_string()),
            },
        }
    }
}

/// Result envelope for schema mutations; carries the generated statement.
#[derive(Debug, Serialize)]
pub struct SchemaResponse {
    pub success: bool,
    pub sql: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<String>,
}

impl SchemaResponse {
    fn from_result(result: Result<SchemaOperationResult, EngineError>) -> Self {
        match result {
            Ok(outcome) => Self {
                success: outcome.success,
                sql: outcome.sql,
                error: outcome.error,
                error_kind: None,
            },
            Err(e) => Self {
                success: false,
                sql: None,
                error: Some(e.to_string()),
                error_kind: Some(e.kind().as_str().to_string()),
            },
        }
    }
}

pub struct EngineFacade {
    connections: Arc<ConnectionManager>,
    queries: Arc<QueryManager>,
}

impl EngineFacade {
    pub fn new(connections: Arc<ConnectionManager>, queries: Arc<QueryManager>) -> Self {
        Self {
            connections,
            queries,
        }
    }

    /// Runs a raw query, bounded by `timeout_ms` when given. On timeout the
    /// engine-side statement is cancelled best-effort before reporting.
    #[instrument(
        skip(self, query),
        fields(connection = %connection_id, query_len = query.len(), driver = field::Empty)
    )]
    pub async fn execute_query(
        &self,
        connection_id: &ConnectionId,
        query: &str,
        timeout_ms: Option<u64>,
    ) -> QueryResponse {
        let (driver, session) = match self.connections.resolve(connection_id).await {
            Ok(resolved) => resolved,
            Err(e) => return QueryResponse::err(&e, None),
        };
        tracing::Span::current().record("driver", field::display(driver.driver_id()));

        let query_id = self.queries.register(connection_id).await;

        let execution = driver.execute(session, query, query_id);
        let result = match timeout_ms {
            Some(budget) => match timeout(Duration::from_millis(budget), execution).await {
                Ok(result) => result,
                Err(_) => {
                    let _ = driver.cancel(session, query_id).await;
                    self.queries.finish(query_id).await;
                    return QueryResponse::err(
                        &EngineError::Timeout { timeout_ms: budget },
                        Some(query_id),
                    );
                }
            },
            None => execution.await,
        };

        self.queries.finish(query_id).await;
        match result {
            Ok(result) => QueryResponse::ok(result, Some(query_id)),
            Err(e) => QueryResponse::err(&e, Some(query_id)),
        }
    }

    /// Cancels a specific query, or the connection's most recent one when
    /// `query_id` is `None`.
    #[instrument(skip(self), fields(connection = %connection_id, query_id = ?query_id))]
    pub async fn cancel_query(
        &self,
        connection_id: &ConnectionId,
        query_id: Option<QueryId>,
    ) -> QueryResponse {
        let (driver, session) = match self.connections.resolve(connection_id).await {
            Ok(resolved) => resolved,
            Err(e) => return QueryResponse::err(&e, None),
        };

        let target = match query_id {
            Some(id) => id,
            None => match self.queries.last_for_connection(connection_id).await {
                Some(id) => id,
                None => {
                    return QueryResponse::err(
                        &EngineError::rejected("no active query to cancel"),
                        None,
                    );
                }
            },
        };

        match driver.cancel(session, target).await {
            Ok(cancelled) => QueryResponse {
                success: cancelled,
                result: None,
                error: if cancelled {
                    None
                } else {
                    Some("query already finished".to_string())
                },
                error_kind: None,
                query_id: Some(target.0.to_string()),
            },
            Err(e) => QueryResponse::err(&e, Some(target)),
        }
    }

    pub async fn list_namespaces(
        &self,
        connection_id: &ConnectionId,
    ) -> DataResponse<Vec<Namespace>> {
        DataResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => driver.list_namespaces(session).await,
                Err(e) => Err(e),
            },
        )
    }

    pub async fn list_collections(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
    ) -> DataResponse<Vec<Collection>> {
        DataResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => driver.list_collections(session, namespace).await,
                Err(e) => Err(e),
            },
        )
    }

    pub async fn describe_table(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        table: &str,
    ) -> DataResponse<TableSchema> {
        DataResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => driver.describe_table(session, namespace, table).await,
                Err(e) => Err(e),
            },
        )
    }

    /// Paginated, filtered table/collection/key browsing.
    pub async fn read_table(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        table: &str,
        options: &DataOptions,
    ) -> QueryResponse {
        match self.connections.resolve(connection_id).await {
            Ok((driver, session)) => {
                match driver.read_table(session, namespace, table, options).await {
                    Ok(result) => QueryResponse::ok(result, None),
                    Err(e) => QueryResponse::err(&e, None),
                }
            }
            Err(e) => QueryResponse::err(&e, None),
        }
    }

    pub async fn table_ddl(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        table: &str,
    ) -> DataResponse<String> {
        DataResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => driver.table_ddl(session, namespace, table).await,
                Err(e) => Err(e),
            },
        )
    }

    pub async fn ping(&self, connection_id: &ConnectionId) -> DataResponse<bool> {
        DataResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => driver.ping(session).await,
                Err(e) => Err(e),
            },
        )
    }

    /// Native column type names the engine offers for new columns.
    pub async fn data_types(&self, connection_id: &ConnectionId) -> DataResponse<Vec<String>> {
        DataResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, _)) => Ok(driver
                    .data_types()
                    .into_iter()
                    .map(str::to_string)
                    .collect()),
                Err(e) => Err(e),
            },
        )
    }

    pub async fn primary_key_columns(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        table: &str,
    ) -> DataResponse<Vec<String>> {
        DataResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => {
                    driver.primary_key_columns(session, namespace, table).await
                }
                Err(e) => Err(e),
            },
        )
    }

    pub async fn list_indexes(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        table: &str,
    ) -> DataResponse<Vec<IndexInfo>> {
        DataResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => driver.list_indexes(session, namespace, table).await,
                Err(e) => Err(e),
            },
        )
    }

    pub async fn list_foreign_keys(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        table: &str,
    ) -> DataResponse<Vec<ForeignKeyInfo>> {
        DataResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => driver.list_foreign_keys(session, namespace, table).await,
                Err(e) => Err(e),
            },
        )
    }

    pub async fn list_views(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
    ) -> DataResponse<Vec<ViewInfo>> {
        DataResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => driver.list_views(session, namespace).await,
                Err(e) => Err(e),
            },
        )
    }

    pub async fn view_ddl(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        name: &str,
    ) -> DataResponse<String> {
        DataResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => driver.view_ddl(session, namespace, name).await,
                Err(e) => Err(e),
            },
        )
    }

    pub async fn list_routines(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
    ) -> DataResponse<Vec<RoutineInfo>> {
        DataResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => driver.list_routines(session, namespace).await,
                Err(e) => Err(e),
            },
        )
    }

    pub async fn routine_definition(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        routine: &str,
    ) -> DataResponse<String> {
        DataResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => {
                    driver.routine_definition(session, namespace, routine).await
                }
                Err(e) => Err(e),
            },
        )
    }

    pub async fn list_triggers(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        table: Option<&str>,
    ) -> DataResponse<Vec<TriggerInfo>> {
        DataResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => driver.list_triggers(session, namespace, table).await,
                Err(e) => Err(e),
            },
        )
    }

    pub async fn trigger_definition(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        trigger: &str,
    ) -> DataResponse<String> {
        DataResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => {
                    driver.trigger_definition(session, namespace, trigger).await
                }
                Err(e) => Err(e),
            },
        )
    }

    pub async fn list_users(&self, connection_id: &ConnectionId) -> DataResponse<Vec<DatabaseUser>> {
        DataResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => driver.list_users(session).await,
                Err(e) => Err(e),
            },
        )
    }

    pub async fn list_sequences(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
    ) -> DataResponse<Vec<SequenceInfo>> {
        DataResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => driver.list_sequences(session, namespace).await,
                Err(e) => Err(e),
            },
        )
    }

    pub async fn list_extensions(
        &self,
        connection_id: &ConnectionId,
    ) -> DataResponse<Vec<ExtensionInfo>> {
        DataResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => driver.list_extensions(session).await,
                Err(e) => Err(e),
            },
        )
    }

    pub async fn list_enum_types(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
    ) -> DataResponse<Vec<EnumTypeInfo>> {
        DataResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => driver.list_enum_types(session, namespace).await,
                Err(e) => Err(e),
            },
        )
    }

    // ==================== Schema mutations ====================

    pub async fn create_table(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        spec: &TableSpec,
    ) -> SchemaResponse {
        SchemaResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => driver.create_table(session, namespace, spec).await,
                Err(e) => Err(e),
            },
        )
    }

    pub async fn drop_table(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        table: &str,
    ) -> SchemaResponse {
        SchemaResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => driver.drop_table(session, namespace, table).await,
                Err(e) => Err(e),
            },
        )
    }

    pub async fn add_column(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        table: &str,
        column: &ColumnSpec,
    ) -> SchemaResponse {
        SchemaResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => driver.add_column(session, namespace, table, column).await,
                Err(e) => Err(e),
            },
        )
    }

    pub async fn drop_column(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        table: &str,
        column: &str,
    ) -> SchemaResponse {
        SchemaResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => {
                    driver.drop_column(session, namespace, table, column).await
                }
                Err(e) => Err(e),
            },
        )
    }

    pub async fn create_index(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        table: &str,
        index: &IndexSpec,
    ) -> SchemaResponse {
        SchemaResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => {
                    driver.create_index(session, namespace, table, index).await
                }
                Err(e) => Err(e),
            },
        )
    }

    pub async fn drop_index(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        table: &str,
        index: &str,
    ) -> SchemaResponse {
        SchemaResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => driver.drop_index(session, namespace, table, index).await,
                Err(e) => Err(e),
            },
        )
    }

    pub async fn modify_column(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        table: &str,
        column: &ColumnSpec,
    ) -> SchemaResponse {
        SchemaResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => {
                    driver.modify_column(session, namespace, table, column).await
                }
                Err(e) => Err(e),
            },
        )
    }

    pub async fn rename_column(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        table: &str,
        old_name: &str,
        new_name: &str,
    ) -> SchemaResponse {
        SchemaResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => {
                    driver
                        .rename_column(session, namespace, table, old_name, new_name)
                        .await
                }
                Err(e) => Err(e),
            },
        )
    }

    pub async fn rename_table(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        old_name: &str,
        new_name: &str,
    ) -> SchemaResponse {
        SchemaResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => {
                    driver.rename_table(session, namespace, old_name, new_name).await
                }
                Err(e) => Err(e),
            },
        )
    }

    pub async fn add_foreign_key(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        table: &str,
        fk: &ForeignKeySpec,
    ) -> SchemaResponse {
        SchemaResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => {
                    driver.add_foreign_key(session, namespace, table, fk).await
                }
                Err(e) => Err(e),
            },
        )
    }

    pub async fn drop_foreign_key(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        table: &str,
        fk_name: &str,
    ) -> SchemaResponse {
        SchemaResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => {
                    driver.drop_foreign_key(session, namespace, table, fk_name).await
                }
                Err(e) => Err(e),
            },
        )
    }

    pub async fn create_view(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        name: &str,
        query: &str,
    ) -> SchemaResponse {
        SchemaResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => driver.create_view(session, namespace, name, query).await,
                Err(e) => Err(e),
            },
        )
    }

    pub async fn drop_view(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        name: &str,
    ) -> SchemaResponse {
        SchemaResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => driver.drop_view(session, namespace, name).await,
                Err(e) => Err(e),
            },
        )
    }

    pub async fn rename_view(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        old_name: &str,
        new_name: &str,
    ) -> SchemaResponse {
        SchemaResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => {
                    driver.rename_view(session, namespace, old_name, new_name).await
                }
                Err(e) => Err(e),
            },
        )
    }

    pub async fn create_trigger(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        trigger: &TriggerSpec,
    ) -> SchemaResponse {
        SchemaResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => driver.create_trigger(session, namespace, trigger).await,
                Err(e) => Err(e),
            },
        )
    }

    pub async fn drop_trigger(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        trigger: &str,
        table: &str,
    ) -> SchemaResponse {
        SchemaResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => {
                    driver.drop_trigger(session, namespace, trigger, table).await
                }
                Err(e) => Err(e),
            },
        )
    }

    pub async fn refresh_materialized_view(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        view: &str,
        concurrently: bool,
    ) -> SchemaResponse {
        SchemaResponse::from_result(
            match self.connections.resolve(connection_id).await {
                Ok((driver, session)) => {
                    driver
                        .refresh_materialized_view(session, namespace, view, concurrently)
                        .await
                }
                Err(e) => Err(e),
            },
        )
    }

    // ==================== Row mutations ====================

    pub async fn insert_row(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        table: &str,
        data: &RowData,
    ) -> QueryResponse {
        match self.connections.resolve(connection_id).await {
            Ok((driver, session)) => {
                match driver.insert_row(session, namespace, table, data).await {
                    Ok(result) => QueryResponse::ok(result, None),
                    Err(e) => QueryResponse::err(&e, None),
                }
            }
            Err(e) => QueryResponse::err(&e, None),
        }
    }

    pub async fn delete_row(
        &self,
        connection_id: &ConnectionId,
        namespace: &Namespace,
        table: &str,
        primary_key: &RowData,
    ) -> QueryResponse {
        match self.connections.resolve(connection_id).await {
            Ok((driver, session)) => {
                match driver
                    .delete_row(session, namespace, table, primary_key)
                    .await
                {
                    Ok(result) => QueryResponse::ok(result, None),
                    Err(e) => QueryResponse::err(&e, None),
                }
            }
            Err(e) => QueryResponse::err(&e, None),
        }
    }

    /// Disconnects a connection and drops its query bookkeeping.
    pub async fn disconnect(&self, connection_id: &ConnectionId) -> DataResponse<()> {
        self.queries.clear_connection(connection_id).await;
        DataResponse::from_result(self.connections.disconnect(connection_id).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::{EngineResult, ErrorKind};
    use crate::engine::registry::DriverRegistry;
    use crate::engine::traits::DataEngine;
    use crate::engine::types::{ConnectionConfig, EngineKind, SessionId, Value};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedDriver {
        execute_delay_ms: u64,
        fail_with: Option<&'static str>,
        cancels: AtomicUsize,
    }

    impl ScriptedDriver {
        fn ok() -> Self {
            Self {
                execute_delay_ms: 0,
                fail_with: None,
                cancels: AtomicUsize::new(0),
            }
        }

        fn failing(message: &'static str) -> Self {
            Self {
                fail_with: Some(message),
                ..Self::ok()
            }
        }

        fn slow(delay_ms: u64) -> Self {
            Self {
                execute_delay_ms: delay_ms,
                ..Self::ok()
            }
        }
    }

    #[async_trait]
    impl DataEngine for ScriptedDriver {
        fn driver_id(&self) -> &'static str {
            "scripted"
        }

        fn driver_name(&self) -> &'static str {
            "Scripted"
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

        async fn cancel(&self, _session: SessionId, _query_id: QueryId) -> EngineResult<bool> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        async fn execute(
            &self,
            _session: SessionId,
            _query: &str,
            _query_id: QueryId,
        ) -> EngineResult<QueryResult> {
            if self.execute_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.execute_delay_ms)).await;
            }
            if let Some(message) = self.fail_with {
                return Err(EngineError::rejected(message));
            }
            let mut result = QueryResult::empty();
            result.rows.push(crate::engine::types::Row {
                values: vec![Value::Int(1)],
            });
            Ok(result)
        }

        async fn list_namespaces(&self, _session: SessionId) -> EngineResult<Vec<Namespace>> {
            Ok(vec![Namespace::new("main")])
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
                primary_key: None,
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

        async fn list_indexes(
            &self,
            _session: SessionId,
            _namespace: &Namespace,
            _table: &str,
        ) -> EngineResult<Vec<IndexInfo>> {
            Ok(vec![IndexInfo {
                name: "idx_orders_customer".into(),
                columns: vec!["customer_id".into()],
                unique: false,
                index_type: Some("btree".into()),
            }])
        }

        async fn drop_foreign_key(
            &self,
            _session: SessionId,
            _namespace: &Namespace,
            table: &str,
            fk_name: &str,
        ) -> EngineResult<SchemaOperationResult> {
            Ok(SchemaOperationResult::ok(format!(
                "ALTER TABLE \"{table}\" DROP CONSTRAINT \"{fk_name}\""
            )))
        }
    }

    async fn facade_with(driver: Arc<ScriptedDriver>) -> (EngineFacade, ConnectionId) {
        let mut registry = DriverRegistry::new();
        registry.register(EngineKind::Postgres, driver);
        let connections = Arc::new(ConnectionManager::new(Arc::new(registry)));
        let queries = Arc::new(QueryManager::new());

        let id = ConnectionId::from("conn-1");
        let config = ConnectionConfig {
            engine: EngineKind::Postgres,
            host: "localhost".into(),
            port: 5432,
            username: "u".into(),
            password: "p".into(),
            database: Some("db".into()),
            ssh_tunnel: None,
            tls: None,
            name: None,
            color: None,
            folder: None,
        };
        connections.connect(id.clone(), config).await.expect("connect");

        (EngineFacade::new(connections, queries), id)
    }

    #[tokio::test]
    async fn successful_query_reports_result_and_query_id() {
        let (facade, id) = facade_with(Arc::new(ScriptedDriver::ok())).await;

        let response = facade.execute_query(&id, "SELECT 1", None).await;
        assert!(response.success);
        assert!(response.query_id.is_some());
        assert_eq!(response.result.expect("result").row_count(), 1);
    }

    #[tokio::test]
    async fn engine_refusal_becomes_an_unhappy_response_not_an_err() {
        let (facade, id) =
            facade_with(Arc::new(ScriptedDriver::failing("syntax error at line 1"))).await;

        let response = facade.execute_query(&id, "SELEC 1", None).await;
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("syntax error at line 1"));
        assert_eq!(response.error_kind.as_deref(), Some("rejected"));
    }

    #[tokio::test]
    async fn unknown_connection_fails_fast_with_not_connected() {
        let (facade, _) = facade_with(Arc::new(ScriptedDriver::ok())).await;

        let response = facade
            .execute_query(&ConnectionId::from("ghost"), "SELECT 1", None)
            .await;
        assert!(!response.success);
        assert_eq!(
            response.error_kind.as_deref(),
            Some(ErrorKind::NotConnected.as_str())
        );
    }

    #[tokio::test]
    async fn timed_out_query_is_cancelled_and_classified() {
        let driver = Arc::new(ScriptedDriver::slow(500));
        let (facade, id) = facade_with(Arc::clone(&driver)).await;

        let response = facade.execute_query(&id, "SELECT sleep(10)", Some(50)).await;
        assert!(!response.success);
        assert_eq!(response.error_kind.as_deref(), Some("timeout"));
        assert_eq!(driver.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn forwarded_schema_mutation_carries_the_generated_sql() {
        let (facade, id) = facade_with(Arc::new(ScriptedDriver::ok())).await;

        let response = facade
            .drop_foreign_key(&id, &Namespace::new("db"), "orders", "fk_orders_customer")
            .await;
        assert!(response.success);
        assert!(response.sql.expect("sql").contains("DROP CONSTRAINT"));
    }

    #[tokio::test]
    async fn forwarded_listing_surfaces_driver_rows() {
        let (facade, id) = facade_with(Arc::new(ScriptedDriver::ok())).await;

        let response = facade.list_indexes(&id, &Namespace::new("db"), "orders").await;
        assert!(response.success);
        let indexes = response.data.expect("indexes");
        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].name, "idx_orders_customer");
    }

    #[tokio::test]
    async fn capability_gap_reports_unsupported_not_a_transport_error() {
        let (facade, id) = facade_with(Arc::new(ScriptedDriver::ok())).await;

        let response = facade
            .refresh_materialized_view(&id, &Namespace::new("db"), "mv", false)
            .await;
        assert!(!response.success);
        assert_eq!(
            response.error_kind.as_deref(),
            Some(ErrorKind::Unsupported.as_str())
        );
    }

    #[tokio::test]
    async fn cancel_without_active_query_is_refused() {
        let (facade, id) = facade_with(Arc::new(ScriptedDriver::ok())).await;

        let response = facade.cancel_query(&id, None).await;
        assert!(!response.success);
        assert!(response
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("no active query"));
    }

    #[tokio::test]
    async fn disconnect_clears_query_bookkeeping() {
        let (facade, id) = facade_with(Arc::new(ScriptedDriver::ok())).await;

        let qid = facade.queries.register(&id).await;
        let response = facade.disconnect(&id).await;
        assert!(response.success);
        assert!(!facade.queries.contains(qid).await);

        let listing = facade.list_namespaces(&id).await;
        assert!(!listing.success);
    }
}
