//! Call lifecycle handlers.
//!
//! `CHANNEL_CREATE` inserts a call record, `CHANNEL_HANGUP` stamps its end
//! time and hangup cause. Both validate locally first; a rejected event never
//! reaches the store.

use chrono::{DateTime, TimeZone, Utc};

use crate::client::dispatch::DispatchOutcome;
use crate::error::{HandlerError, StoreError};
use crate::esl::EslMessage;
use crate::store::{CallStore, NewCall};

pub const EVENT_DATE_TIMESTAMP: &str = "Event-Date-Timestamp";
pub const CALL_DIRECTION: &str = "Call-Direction";
pub const CALLER_NUMBER: &str = "Caller-Caller-ID-Number";
pub const DESTINATION_NUMBER: &str = "Caller-Destination-Number";
pub const HANGUP_CAUSE: &str = "Hangup-Cause";

const MICROS_PER_SEC: i64 = 1_000_000;

/// Decode an `Event-Date-Timestamp` value (integer microseconds since epoch).
pub fn parse_event_timestamp(raw: &str) -> Result<DateTime<Utc>, HandlerError> {
    let invalid = || HandlerError::InvalidTimestamp { value: raw.to_string() };
    let micros: i64 = raw.parse().map_err(|_| invalid())?;
    let secs = micros.div_euclid(MICROS_PER_SEC);
    let nanos = (micros.rem_euclid(MICROS_PER_SEC) * 1000) as u32;
    Utc.timestamp_opt(secs, nanos).single().ok_or_else(invalid)
}

fn event_time(event: &EslMessage, kind: &str) -> Result<DateTime<Utc>, HandlerError> {
    let raw = event
        .non_empty_header(EVENT_DATE_TIMESTAMP)
        .ok_or_else(|| HandlerError::MissingTimestamp { event: kind.to_string() })?;
    parse_event_timestamp(raw)
}

/// Build the insert payload for a call-start event.
///
/// Direction and party numbers are taken as-is; absent ones are stored empty.
pub fn call_start_record(uuid: &str, event: &EslMessage) -> Result<NewCall, HandlerError> {
    let start_time = event_time(event, "CHANNEL_CREATE")?;
    let text = |name: &str| event.header(name).unwrap_or_default().to_string();
    Ok(NewCall {
        uuid: uuid.to_string(),
        direction: text(CALL_DIRECTION),
        caller: text(CALLER_NUMBER),
        callee: text(DESTINATION_NUMBER),
        start_time,
    })
}

/// End time and hangup cause from a call-end event.
pub fn call_end_update(event: &EslMessage) -> Result<(DateTime<Utc>, String), HandlerError> {
    let end_time = event_time(event, "CHANNEL_HANGUP")?;
    let status = event
        .non_empty_header(HANGUP_CAUSE)
        .ok_or_else(|| HandlerError::MissingHeader {
            header: HANGUP_CAUSE.to_string(),
            event: "CHANNEL_HANGUP".to_string(),
        })?;
    Ok((end_time, status.to_string()))
}

/// Handle `CHANNEL_CREATE`: validate, then insert.
pub async fn handle_call_start<S>(store: &S, uuid: &str, event: &EslMessage) -> DispatchOutcome
where
    S: CallStore + ?Sized,
{
    let call = match call_start_record(uuid, event) {
        Ok(call) => call,
        Err(e) => {
            tracing::error!(uuid, error = %e, "Discarding CHANNEL_CREATE");
            return DispatchOutcome::Rejected(e);
        }
    };

    tracing::debug!(
        uuid,
        direction = %call.direction,
        caller = %call.caller,
        callee = %call.callee,
        start_time = %call.start_time,
        "Parsed call data for CHANNEL_CREATE"
    );

    match store.create_call(&call).await {
        Ok(id) => {
            tracing::info!(uuid, id, "Call record created");
            DispatchOutcome::CallStarted { id }
        }
        Err(StoreError::Duplicate(_)) => {
            tracing::warn!(uuid, "Duplicate CHANNEL_CREATE, keeping the existing record");
            DispatchOutcome::DuplicateStart
        }
        Err(e) => {
            tracing::error!(uuid, operation = "create_call", error = %e, "Failed to create call record");
            DispatchOutcome::StorageFailed
        }
    }
}

/// Handle `CHANNEL_HANGUP`: validate, then overwrite end time and status.
pub async fn handle_call_end<S>(store: &S, uuid: &str, event: &EslMessage) -> DispatchOutcome
where
    S: CallStore + ?Sized,
{
    let (end_time, status) = match call_end_update(event) {
        Ok(update) => update,
        Err(e) => {
            tracing::error!(uuid, error = %e, "Discarding CHANNEL_HANGUP");
            return DispatchOutcome::Rejected(e);
        }
    };

    match store.update_call_end(uuid, end_time, &status).await {
        Ok(0) => {
            tracing::warn!(uuid, status = %status, "CHANNEL_HANGUP for unknown call, nothing updated");
            DispatchOutcome::NoMatchingCall
        }
        Ok(_) => {
            tracing::info!(uuid, status = %status, end_time = %end_time, "Call record ended");
            DispatchOutcome::CallEnded
        }
        Err(e) => {
            tracing::error!(uuid, operation = "update_call_end", error = %e, "Failed to update call record");
            DispatchOutcome::StorageFailed
        }
    }
}
