//! Event socket transport
//!
//! This module provides:
//! - `EslMessage`, the header/body unit everything above reads
//! - `EslCodec`, framing for header blocks and content-length bodies
//! - `EslConnector`/`EslHandle`, authenticated TCP sessions with a
//!   background reader task

pub mod codec;
pub mod connection;
pub mod message;

pub use codec::EslCodec;
pub use connection::{EslConnector, EslConnectorConfig, EslHandle, parse_addr};
pub use message::EslMessage;
