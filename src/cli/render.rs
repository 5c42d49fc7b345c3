//! Plain-text rendering of call records for the `calls` subcommands.

use callsink::store::CallRecord;
use chrono::{DateTime, Utc};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn time(ts: &DateTime<Utc>) -> String {
    ts.format(TIME_FORMAT).to_string()
}

/// `1h 02m 03s`, `4m 05s` or `6s`.
pub fn duration(d: chrono::Duration) -> String {
    let secs = d.num_seconds().max(0);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

/// Column header matching `call_row`.
pub fn header() -> String {
    format!(
        "{:<36}  {:<8}  {:<16}  {:<16}  {:<19}  {}",
        "UUID", "DIR", "CALLER", "CALLEE", "START", "STATUS"
    )
}

/// One line per call for `calls list`.
pub fn call_row(call: &CallRecord) -> String {
    let status = match (&call.status, call.duration()) {
        (Some(status), Some(d)) => format!("{} ({})", status, duration(d)),
        (Some(status), None) => status.clone(),
        (None, _) => "active".to_string(),
    };
    format!(
        "{:<36}  {:<8}  {:<16}  {:<16}  {:<19}  {}",
        call.uuid,
        call.direction,
        call.caller,
        call.callee,
        time(&call.start_time),
        status
    )
}

/// Labelled fields for `calls show`.
pub fn call_detail(call: &CallRecord) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("id", call.id.to_string()),
        ("uuid", call.uuid.clone()),
        ("direction", call.direction.clone()),
        ("caller", call.caller.clone()),
        ("callee", call.callee.clone()),
        ("start", time(&call.start_time)),
    ];
    match call.end_time {
        Some(end) => fields.push(("end", time(&end))),
        None => fields.push(("end", "-".to_string())),
    }
    if let Some(d) = call.duration() {
        fields.push(("duration", duration(d)));
    }
    fields.push(("status", call.status.clone().unwrap_or_else(|| "active".to_string())));
    fields.push(("recorded", time(&call.created_at)));
    fields
}
