//! ESL message type.
//!
//! A message is an ordered list of header key/value pairs plus an optional
//! body. Event payloads delivered as `text/event-json` or `text/event-plain`
//! are unpacked so the event's own headers are directly addressable.

use std::fmt;

use crate::error::ConnectionError;

pub const CONTENT_TYPE: &str = "Content-Type";
pub const CONTENT_LENGTH: &str = "Content-Length";
pub const REPLY_TEXT: &str = "Reply-Text";

/// Content types the transport distinguishes.
pub mod content_type {
    pub const AUTH_REQUEST: &str = "auth/request";
    pub const COMMAND_REPLY: &str = "command/reply";
    pub const API_RESPONSE: &str = "api/response";
    pub const EVENT_JSON: &str = "text/event-json";
    pub const EVENT_PLAIN: &str = "text/event-plain";
    pub const DISCONNECT_NOTICE: &str = "text/disconnect-notice";
}

/// One frame (or unpacked event) read off the event socket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EslMessage {
    headers: Vec<(String, String)>,
    body: Option<String>,
}

impl EslMessage {
    /// Create an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a message from header pairs.
    pub fn from_headers<I, K, V>(headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            body: None,
        }
    }

    /// Builder-style header append.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Builder-style body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Append a header, keeping order.
    pub fn push_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// First value of a header, matched case-sensitively like the server emits them.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Header value, treating an empty string as absent.
    pub fn non_empty_header(&self, name: &str) -> Option<&str> {
        self.header(name).filter(|v| !v.is_empty())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE)
    }

    /// Whether a command reply signals success (`+OK ...`).
    pub fn is_ok_reply(&self) -> bool {
        self.header(REPLY_TEXT)
            .or(self.body.as_deref())
            .is_some_and(|text| text.trim_start().starts_with("+OK"))
    }

    /// Reply text for logging rejected commands.
    pub fn reply_text(&self) -> &str {
        self.header(REPLY_TEXT).or(self.body.as_deref()).unwrap_or("").trim()
    }

    /// Unpack an event envelope into the event it carries.
    ///
    /// Envelopes that are not events are returned unchanged.
    pub fn into_event(self) -> Result<Self, ConnectionError> {
        match self.content_type() {
            Some(content_type::EVENT_JSON) => {
                let body = self.body.as_deref().unwrap_or("");
                parse_json_event(body)
            }
            Some(content_type::EVENT_PLAIN) => {
                let body = self.body.as_deref().unwrap_or("");
                parse_plain_event(body)
            }
            _ => Ok(self),
        }
    }
}

impl fmt::Display for EslMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, v) in &self.headers {
            writeln!(f, "{}: {}", k, v)?;
        }
        if let Some(body) = &self.body {
            writeln!(f)?;
            write!(f, "{}", body)?;
        }
        Ok(())
    }
}

fn parse_json_event(body: &str) -> Result<EslMessage, ConnectionError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| ConnectionError::Protocol(format!("Invalid JSON event body: {}", e)))?;
    let object = value
        .as_object()
        .ok_or_else(|| ConnectionError::Protocol("JSON event body is not an object".to_string()))?;

    let mut event = EslMessage::new();
    for (key, value) in object {
        let text = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        };
        if key == "_body" {
            event.body = Some(text);
        } else {
            event.headers.push((key.clone(), text));
        }
    }
    Ok(event)
}

fn parse_plain_event(body: &str) -> Result<EslMessage, ConnectionError> {
    let (header_block, rest) = match body.split_once("\n\n") {
        Some((headers, rest)) => (headers, Some(rest)),
        None => (body, None),
    };

    let mut event = EslMessage::new();
    for line in header_block.lines().filter(|l| !l.trim().is_empty()) {
        let (key, value) = split_header_line(line)?;
        let decoded = urlencoding::decode(value)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| value.to_string());
        event.headers.push((key.to_string(), decoded));
    }
    event.body = rest.filter(|r| !r.is_empty()).map(str::to_string);
    Ok(event)
}

/// Split `Key: Value` into its parts.
pub(crate) fn split_header_line(line: &str) -> Result<(&str, &str), ConnectionError> {
    let (key, value) = line
        .split_once(':')
        .ok_or_else(|| ConnectionError::Protocol(format!("Malformed header line: {}", line)))?;
    Ok((key.trim(), value.trim()))
}
