//! Storage collaborator contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::store::records::{CallRecord, NewCall};

/// Persistence for call records.
///
/// `uuid` is the natural key: `create_call` fails with
/// `StoreError::Duplicate` when it already exists, and `update_call_end`
/// reports how many rows it touched instead of failing on unknown ids.
#[async_trait]
pub trait CallStore: Send + Sync + 'static {
    /// Insert a call, returning its row id.
    async fn create_call(&self, call: &NewCall) -> Result<i64, StoreError>;

    /// Overwrite end time and status for a call. Returns rows affected.
    async fn update_call_end(&self, uuid: &str, end_time: DateTime<Utc>, status: &str) -> Result<u64, StoreError>;

    /// Most recent calls first.
    async fn list_calls(&self, limit: u32, offset: u32) -> Result<Vec<CallRecord>, StoreError>;

    /// Look up one call by uuid.
    async fn get_call(&self, uuid: &str) -> Result<Option<CallRecord>, StoreError>;
}
