//! Persistence layer: key-value storage behind the `KvStore` trait.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlKv;
pub use memory::MemoryKv;
pub use traits::{KvStore, get_json, set_json};
