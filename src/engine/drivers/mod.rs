//! Per-engine DataEngine implementations.

pub mod clickhouse;
pub mod mongodb;
pub mod mysql;
pub mod postgres;
pub mod redis;
pub mod sqlite;

pub use self::clickhouse::ClickHouseDriver;
pub use self::mongodb::MongoDriver;
pub use self::mysql::{MySqlDriver, ServerFlavor};
pub use self::postgres::PostgresDriver;
pub use self::redis::RedisDriver;
pub use self::sqlite::SqliteDriver;
