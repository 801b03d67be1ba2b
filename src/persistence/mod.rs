//! Persistence services the cascade reads from
//!
//! The layer talks to persistence only through the `ResourceService` trait.
//! `SqliteService` is the durable local implementation; `MemoryService`
//! keeps everything in process memory and records call counts.

mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryService;
pub use sqlite::SqliteService;
pub use traits::{OpenService, ResourceService, ServiceError, ServiceOp, ServiceResult};
