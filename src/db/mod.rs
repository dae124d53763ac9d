//! Database module for the status worker.
//!
//! Provides the shared SQLite store and the local snapshot file used when
//! the store is absent or failing.

mod local;
mod models;
mod store;

pub use local::*;
pub use models::*;
pub use store::*;
