//! In-memory call store.
//!
//! Same contract as the SQLite store, plus an operation log so tests can
//! assert exactly which storage calls a handler made.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::store::records::{CallRecord, NewCall};
use crate::store::traits::CallStore;

/// A storage call as seen by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Create(NewCall),
    UpdateEnd {
        uuid: String,
        end_time: DateTime<Utc>,
        status: String,
    },
}

#[derive(Debug, Default)]
struct Inner {
    calls: HashMap<String, CallRecord>,
    next_id: i64,
    ops: Vec<StoreOp>,
    fail_writes: bool,
}

/// HashMap-backed store with an operation log.
#[derive(Debug, Default)]
pub struct MemoryCallStore {
    inner: Mutex<Inner>,
}

impl MemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a storage error.
    pub fn fail_writes(&self, fail: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_writes = fail;
        }
    }

    /// Every write attempted so far, in order.
    pub fn ops(&self) -> Vec<StoreOp> {
        self.inner.lock().map(|i| i.ops.clone()).unwrap_or_default()
    }

    /// Number of stored calls.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.calls.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn simulated_failure() -> StoreError {
        StoreError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR),
            Some("simulated write failure".to_string()),
        ))
    }
}

#[async_trait]
impl CallStore for MemoryCallStore {
    async fn create_call(&self, call: &NewCall) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        inner.ops.push(StoreOp::Create(call.clone()));
        if inner.fail_writes {
            return Err(Self::simulated_failure());
        }
        if inner.calls.contains_key(&call.uuid) {
            return Err(StoreError::Duplicate(call.uuid.clone()));
        }

        inner.next_id += 1;
        let record = CallRecord {
            id: inner.next_id,
            uuid: call.uuid.clone(),
            direction: call.direction.clone(),
            caller: call.caller.clone(),
            callee: call.callee.clone(),
            start_time: call.start_time,
            end_time: None,
            status: None,
            created_at: Utc::now(),
        };
        let id = record.id;
        inner.calls.insert(call.uuid.clone(), record);
        Ok(id)
    }

    async fn update_call_end(&self, uuid: &str, end_time: DateTime<Utc>, status: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        inner.ops.push(StoreOp::UpdateEnd {
            uuid: uuid.to_string(),
            end_time,
            status: status.to_string(),
        });
        if inner.fail_writes {
            return Err(Self::simulated_failure());
        }
        match inner.calls.get_mut(uuid) {
            Some(call) => {
                call.end_time = Some(end_time);
                call.status = Some(status.to_string());
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn list_calls(&self, limit: u32, offset: u32) -> Result<Vec<CallRecord>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        let mut calls: Vec<CallRecord> = inner.calls.values().cloned().collect();
        calls.sort_by(|a, b| b.start_time.cmp(&a.start_time).then(b.id.cmp(&a.id)));
        Ok(calls.into_iter().skip(offset as usize).take(limit as usize).collect())
    }

    async fn get_call(&self, uuid: &str) -> Result<Option<CallRecord>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.calls.get(uuid).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn new_call(uuid: &str) -> NewCall {
        NewCall {
            uuid: uuid.to_string(),
            direction: "outbound".to_string(),
            caller: "100".to_string(),
            callee: "200".to_string(),
            start_time: Utc.timestamp_opt(1, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_create_records_op_and_call() {
        let store = MemoryCallStore::new();
        assert!(store.is_empty());
        store.create_call(&new_call("x")).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.ops(), vec![StoreOp::Create(new_call("x"))]);
    }

    #[tokio::test]
    async fn test_duplicate_rejected_first_write_wins() {
        let store = MemoryCallStore::new();
        store.create_call(&new_call("x")).await.unwrap();
        assert!(matches!(
            store.create_call(&new_call("x")).await,
            Err(StoreError::Duplicate(_))
        ));
        assert_eq!(store.ops().len(), 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_failing_writes() {
        let store = MemoryCallStore::new();
        store.fail_writes(true);
        assert!(matches!(store.create_call(&new_call("x")).await, Err(StoreError::Sqlite(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_update_missing_returns_zero() {
        let store = MemoryCallStore::new();
        let rows = store
            .update_call_end("x", Utc.timestamp_opt(2, 0).unwrap(), "NORMAL_CLEARING")
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }
}
