//! SQLite backend for the subscription registry.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime.

mod encode;
mod registry;
mod schema;

pub mod error;

pub use error::{Error, Result};
pub use registry::SqliteRegistry;
