//! Call record types.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A persisted call, keyed naturally by `uuid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Storage row id
    pub id: i64,
    /// Call identifier from the switch (Unique-ID)
    pub uuid: String,
    pub direction: String,
    pub caller: String,
    pub callee: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Hangup cause once the call has ended
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CallRecord {
    /// Whether a call-end has been recorded.
    pub fn is_ended(&self) -> bool {
        self.end_time.is_some()
    }

    /// Call length, once ended.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }
}

/// Insert payload built from a call-start event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCall {
    pub uuid: String,
    pub direction: String,
    pub caller: String,
    pub callee: String,
    pub start_time: DateTime<Utc>,
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}
