//! Driver Registry
//!
//! Central registry for all available database drivers, keyed by engine
//! kind. The set of engines is closed: resolving an unknown tag is a
//! configuration error at the call site, never a silent fallback.

use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::traits::DataEngine;
use crate::engine::types::EngineKind;

/// Registry that holds all available database drivers
pub struct DriverRegistry {
    drivers: HashMap<EngineKind, Arc<dyn DataEngine>>,
}

impl DriverRegistry {
    /// Creates a new empty registry
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// Creates a registry with every built-in driver registered.
    ///
    /// MariaDB gets its own registration backed by the MySQL implementation
    /// with a MariaDB identity.
    pub fn with_default_drivers() -> Self {
        use crate::engine::drivers::{
            ClickHouseDriver, MongoDriver, MySqlDriver, PostgresDriver, RedisDriver, SqliteDriver,
        };

        let mut registry = Self::new();
        registry.register(EngineKind::Postgres, Arc::new(PostgresDriver::new()));
        registry.register(EngineKind::MySql, Arc::new(MySqlDriver::mysql()));
        registry.register(EngineKind::MariaDb, Arc::new(MySqlDriver::mariadb()));
        registry.register(EngineKind::Sqlite, Arc::new(SqliteDriver::new()));
        registry.register(EngineKind::ClickHouse, Arc::new(ClickHouseDriver::new()));
        registry.register(EngineKind::MongoDb, Arc::new(MongoDriver::new()));
        registry.register(EngineKind::Redis, Arc::new(RedisDriver::new()));
        registry
    }

    /// Registers a driver for an engine kind, replacing any previous one
    pub fn register(&mut self, engine: EngineKind, driver: Arc<dyn DataEngine>) {
        self.drivers.insert(engine, driver);
    }

    /// Gets a driver by engine kind
    pub fn get(&self, engine: EngineKind) -> Option<Arc<dyn DataEngine>> {
        self.drivers.get(&engine).cloned()
    }

    /// Resolves a driver, failing with a configuration error when absent
    pub fn resolve(&self, engine: EngineKind) -> EngineResult<Arc<dyn DataEngine>> {
        self.get(engine)
            .ok_or_else(|| EngineError::driver_not_found(engine))
    }

    /// Lists all registered engine kinds
    pub fn list(&self) -> Vec<EngineKind> {
        self.drivers.keys().copied().collect()
    }

    /// Returns the number of registered drivers
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Returns true if no drivers are registered
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::ErrorKind;

    #[test]
    fn default_registry_covers_every_engine() {
        let registry = DriverRegistry::with_default_drivers();
        for kind in EngineKind::ALL {
            assert!(
                registry.get(kind).is_some(),
                "missing driver for {kind}"
            );
        }
        assert_eq!(registry.len(), EngineKind::ALL.len());
    }

    #[test]
    fn mariadb_and_mysql_report_distinct_identities() {
        let registry = DriverRegistry::with_default_drivers();
        let mysql = registry.resolve(EngineKind::MySql).expect("mysql");
        let mariadb = registry.resolve(EngineKind::MariaDb).expect("mariadb");
        assert_eq!(mysql.driver_id(), "mysql");
        assert_eq!(mariadb.driver_id(), "mariadb");
    }

    #[test]
    fn resolving_from_an_empty_registry_is_a_configuration_error() {
        let registry = DriverRegistry::new();
        let err = registry.resolve(EngineKind::Redis).expect_err("empty");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
