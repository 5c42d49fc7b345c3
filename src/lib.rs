//! Callsink - records call lifecycles from a FreeSWITCH event socket
//!
//! A resilient event-socket client ingests `CHANNEL_CREATE` and
//! `CHANNEL_HANGUP` events into a call store, which a small REST API reads.

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod esl;
pub mod store;

pub use error::{CallsinkError, Result};
