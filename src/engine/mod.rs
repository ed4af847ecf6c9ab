// Data Engine Module
// Universal abstraction layer for all database engines

pub mod base;
pub mod connection_manager;
pub mod drivers;
pub mod error;
pub mod facade;
pub mod query_manager;
pub mod registry;
pub mod ssh_tunnel;
pub mod tls;
pub mod traits;
pub mod types;

pub use connection_manager::ConnectionManager;
pub use error::{EngineError, EngineResult, ErrorKind};
pub use facade::EngineFacade;
pub use query_manager::QueryManager;
pub use registry::DriverRegistry;
pub use traits::DataEngine;
pub use types::*;
