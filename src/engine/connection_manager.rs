//! Connection Manager
//!
//! Centralized management of all live connections.
//! This is the SINGLE SOURCE OF TRUTH for connection state: each saved
//! connection id maps to at most one live driver session, plus the SSH
//! tunnel that session may ride on.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::{timeout, Duration};
use tracing::{instrument, warn};

use crate::engine::base::{timed_test, TestOutcome};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::registry::DriverRegistry;
use crate::engine::ssh_tunnel::SshTunnel;
use crate::engine::traits::DataEngine;
use crate::engine::types::{ConnectionConfig, ConnectionId, SessionId};

/// A live connection: the driver it runs on, its session, the config it was
/// opened with, and the tunnel keeping it reachable (if any).
pub struct ActiveConnection {
    pub driver: Arc<dyn DataEngine>,
    pub session: SessionId,
    pub config: ConnectionConfig,
    pub display_name: String,
    tunnel: Option<SshTunnel>,
}

/// Manages all live database connections keyed by saved-connection id.
pub struct ConnectionManager {
    registry: Arc<DriverRegistry>,
    connections: RwLock<HashMap<ConnectionId, ActiveConnection>>,
    connect_timeout_ms: u64,
    test_timeout_ms: u64,
}

impl ConnectionManager {
    const CONNECT_TIMEOUT_MS: u64 = 15000;
    const TEST_TIMEOUT_MS: u64 = 10000;

    pub fn new(registry: Arc<DriverRegistry>) -> Self {
        Self::with_timeouts(registry, Self::CONNECT_TIMEOUT_MS, Self::TEST_TIMEOUT_MS)
    }

    /// Constructor with explicit timeouts, used by tests and embedders.
    pub fn with_timeouts(
        registry: Arc<DriverRegistry>,
        connect_timeout_ms: u64,
        test_timeout_ms: u64,
    ) -> Self {
        Self {
            registry,
            connections: RwLock::new(HashMap::new()),
            connect_timeout_ms,
            test_timeout_ms,
        }
    }

    /// Opens the tunnel when configured and rewrites host/port so the driver
    /// connects through it. Drivers never know a tunnel exists.
    async fn tunneled_config(
        config: &ConnectionConfig,
    ) -> EngineResult<(ConnectionConfig, Option<SshTunnel>)> {
        match &config.ssh_tunnel {
            Some(ssh_config) => {
                let tunnel = SshTunnel::open(ssh_config, &config.host, config.port).await?;
                let mut rewritten = config.clone();
                rewritten.host = "127.0.0.1".to_string();
                rewritten.port = tunnel.local_port();
                Ok((rewritten, Some(tunnel)))
            }
            None => Ok((config.clone(), None)),
        }
    }

    /// Tests a connection without persisting it. Bounded in time; a test that
    /// exceeds the budget fails with `Timeout`, distinguishable from refusal
    /// and bad credentials.
    #[instrument(
        skip(self, config),
        fields(
            engine = %config.engine,
            host = %config.host,
            port = config.port,
            database = ?config.database,
            ssh = config.ssh_tunnel.is_some()
        )
    )]
    pub async fn test_connection(&self, config: &ConnectionConfig) -> EngineResult<TestOutcome> {
        let driver = self.registry.resolve(config.engine)?;

        let test_future = async {
            // The tunnel (if any) is dropped when this future completes,
            // so a test never leaves a handle behind.
            let (effective_config, _tunnel) = Self::tunneled_config(config).await?;
            timed_test(driver.as_ref(), &effective_config).await
        };

        match timeout(Duration::from_millis(self.test_timeout_ms), test_future).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout {
                timeout_ms: self.test_timeout_ms,
            }),
        }
    }

    /// Establishes a connection under a saved-connection id.
    ///
    /// If the id already has a live instance, it is disconnected first and
    /// replaced; there are never two live handles for one id.
    #[instrument(
        skip(self, config),
        fields(
            connection = %connection_id,
            engine = %config.engine,
            host = %config.host,
            port = config.port,
            database = ?config.database,
            ssh = config.ssh_tunnel.is_some()
        )
    )]
    pub async fn connect(
        &self,
        connection_id: ConnectionId,
        config: ConnectionConfig,
    ) -> EngineResult<SessionId> {
        let driver = self.registry.resolve(config.engine)?;

        if let Err(e) = self.disconnect(&connection_id).await {
            if !matches!(e, EngineError::NotConnected { .. }) {
                warn!(connection = %connection_id, error = %e, "disconnect of previous instance failed");
            }
        }

        let connect_future = async {
            let (effective_config, tunnel) = Self::tunneled_config(&config).await?;
            let session = driver.connect(&effective_config).await?;

            let display_name = format!(
                "{}@{}/{}{}",
                config.username,
                config.host,
                config.database.as_deref().unwrap_or("default"),
                if tunnel.is_some() { " (SSH)" } else { "" }
            );

            let active = ActiveConnection {
                driver: Arc::clone(&driver),
                session,
                config,
                display_name,
                tunnel,
            };

            let mut connections = self.connections.write().await;
            connections.insert(connection_id, active);

            Ok(session)
        };

        match timeout(Duration::from_millis(self.connect_timeout_ms), connect_future).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout {
                timeout_ms: self.connect_timeout_ms,
            }),
        }
    }

    /// Disconnects a connection and closes its tunnel.
    #[instrument(skip(self), fields(connection = %connection_id))]
    pub async fn disconnect(&self, connection_id: &ConnectionId) -> EngineResult<()> {
        let active = {
            let mut connections = self.connections.write().await;
            connections
                .remove(connection_id)
                .ok_or_else(|| EngineError::session_not_found(connection_id))?
        };

        let result = active.driver.disconnect(active.session).await;

        if let Some(tunnel) = &active.tunnel {
            tunnel.close();
        }

        result
    }

    /// Disconnects everything. Individual failures are logged, not fatal;
    /// the registry map is empty afterwards either way.
    #[instrument(skip(self))]
    pub async fn disconnect_all(&self) {
        let drained: Vec<(ConnectionId, ActiveConnection)> = {
            let mut connections = self.connections.write().await;
            connections.drain().collect()
        };

        for (id, active) in drained {
            if let Err(e) = active.driver.disconnect(active.session).await {
                warn!(connection = %id, error = %e, "disconnect failed during shutdown");
            }
            if let Some(tunnel) = &active.tunnel {
                tunnel.close();
            }
        }
    }

    /// Resolves a connection id to its driver and session, failing fast when
    /// the id has no live instance.
    pub async fn resolve(
        &self,
        connection_id: &ConnectionId,
    ) -> EngineResult<(Arc<dyn DataEngine>, SessionId)> {
        let connections = self.connections.read().await;
        let active = connections
            .get(connection_id)
            .ok_or_else(|| EngineError::session_not_found(connection_id))?;
        Ok((Arc::clone(&active.driver), active.session))
    }

    /// Liveness check against the underlying engine.
    pub async fn ping(&self, connection_id: &ConnectionId) -> EngineResult<bool> {
        let (driver, session) = self.resolve(connection_id).await?;
        driver.ping(session).await
    }

    pub async fn is_connected(&self, connection_id: &ConnectionId) -> bool {
        self.connections.read().await.contains_key(connection_id)
    }

    /// Lists live connections as (id, display name) pairs.
    pub async fn list_connections(&self) -> Vec<(ConnectionId, String)> {
        let connections = self.connections.read().await;
        connections
            .iter()
            .map(|(id, active)| (id.clone(), active.display_name.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::ErrorKind;
    use crate::engine::types::{
        Collection, DataOptions, EngineKind, Namespace, QueryId, QueryResult, TableSchema,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Driver that records connect/disconnect counts and can be made slow.
    struct MockDriver {
        connects: AtomicUsize,
        disconnects: AtomicUsize,
        connect_delay_ms: u64,
    }

    impl MockDriver {
        fn new() -> Self {
            Self {
                connects: AtomicUsize::new(0),
                disconnects: AtomicUsize::new(0),
                connect_delay_ms: 0,
            }
        }

        fn slow(delay_ms: u64) -> Self {
            Self {
                connect_delay_ms: delay_ms,
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl DataEngine for MockDriver {
        fn driver_id(&self) -> &'static str {
            "mock"
        }

        fn driver_name(&self) -> &'static str {
            "Mock"
        }

        async fn test_connection(&self, _config: &ConnectionConfig) -> EngineResult<()> {
            if self.connect_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.connect_delay_ms)).await;
            }
            Ok(())
        }

        async fn connect(&self, _config: &ConnectionConfig) -> EngineResult<SessionId> {
            if self.connect_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.connect_delay_ms)).await;
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(SessionId::new())
        }

        async fn disconnect(&self, _session: SessionId) -> EngineResult<()> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
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
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig {
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
        }
    }

    fn manager_with(driver: Arc<MockDriver>) -> ConnectionManager {
        let mut registry = DriverRegistry::new();
        registry.register(EngineKind::Postgres, driver);
        ConnectionManager::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn operations_before_connect_fail_fast() {
        let manager = manager_with(Arc::new(MockDriver::new()));
        let id = ConnectionId::from("never-connected");

        let err = manager.resolve(&id).await.expect_err("not connected");
        assert_eq!(err.kind(), ErrorKind::NotConnected);

        let err = manager.disconnect(&id).await.expect_err("not connected");
        assert_eq!(err.kind(), ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn reconnect_replaces_the_previous_instance() {
        let driver = Arc::new(MockDriver::new());
        let manager = manager_with(Arc::clone(&driver));
        let id = ConnectionId::from("conn-1");

        let first = manager.connect(id.clone(), config()).await.expect("first");
        let second = manager.connect(id.clone(), config()).await.expect("second");

        assert_ne!(first, second);
        assert_eq!(driver.connects.load(Ordering::SeqCst), 2);
        // The first instance was disconnected, not leaked.
        assert_eq!(driver.disconnects.load(Ordering::SeqCst), 1);

        let (_, live) = manager.resolve(&id).await.expect("live");
        assert_eq!(live, second);
    }

    #[tokio::test]
    async fn disconnect_then_resolve_is_not_connected() {
        let manager = manager_with(Arc::new(MockDriver::new()));
        let id = ConnectionId::from("conn-1");

        manager.connect(id.clone(), config()).await.expect("connect");
        manager.disconnect(&id).await.expect("disconnect");

        let err = manager.resolve(&id).await.expect_err("gone");
        assert_eq!(err.kind(), ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn disconnect_all_empties_the_registry() {
        let driver = Arc::new(MockDriver::new());
        let manager = manager_with(Arc::clone(&driver));

        for i in 0..3 {
            manager
                .connect(ConnectionId::from(format!("conn-{i}").as_str()), config())
                .await
                .expect("connect");
        }

        manager.disconnect_all().await;

        assert!(manager.list_connections().await.is_empty());
        assert_eq!(driver.disconnects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn slow_test_is_classified_as_timeout() {
        let mut registry = DriverRegistry::new();
        registry.register(EngineKind::Postgres, Arc::new(MockDriver::slow(200)));
        let manager = ConnectionManager::with_timeouts(Arc::new(registry), 50, 50);

        let err = manager
            .test_connection(&config())
            .await
            .expect_err("must time out");
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn fast_test_reports_latency() {
        let manager = manager_with(Arc::new(MockDriver::new()));
        let outcome = manager.test_connection(&config()).await.expect("ok");
        assert!(outcome.latency_ms >= 0.0);
    }

    #[tokio::test]
    async fn unknown_engine_is_a_configuration_error() {
        let manager = manager_with(Arc::new(MockDriver::new()));
        let mut cfg = config();
        cfg.engine = EngineKind::Redis; // not registered in this test registry

        let err = manager
            .connect(ConnectionId::from("c"), cfg)
            .await
            .expect_err("no driver");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
