//! Storage layer for callsink.
//!
//! `CallStore` is the contract the ingestion handlers and the query API
//! both use. `SqliteCallStore` is the persistent store; unit tests also get
//! `MemoryCallStore`, a HashMap plus an operation log.
//!
//! # Example
//!
//! ```ignore
//! use callsink::store::{CallStore, NewCall, SqliteCallStore};
//!
//! let store = SqliteCallStore::open("calls.db")?;
//! store.create_call(&new_call).await?;
//! let recent = store.list_calls(10, 0).await?;
//! ```

#[cfg(test)]
mod memory;
mod records;
mod sqlite;
mod traits;

#[cfg(test)]
pub(crate) use memory::{MemoryCallStore, StoreOp};
pub use records::{CallRecord, NewCall};
pub use sqlite::SqliteCallStore;
pub use traits::CallStore;
