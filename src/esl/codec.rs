//! ESL framing codec.
//!
//! Frames on the event socket are:
//! - header lines `Key: Value`, terminated by an empty line
//! - when `Content-Length: N` is present, exactly N body bytes follow
//!
//! Commands are written as a single line followed by an empty line.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::{CONTENT_LENGTH, EslMessage, split_header_line};

/// Codec for reading ESL frames and writing ESL commands.
#[derive(Debug, Clone)]
pub struct EslCodec {
    max_length: usize,
}

impl EslCodec {
    /// Create a new codec with default max frame length (8 MB).
    pub fn new() -> Self {
        Self {
            max_length: 8 * 1024 * 1024,
        }
    }

    /// Create a new codec with custom max length.
    pub fn with_max_length(max_length: usize) -> Self {
        Self { max_length }
    }

    /// Get the max frame length.
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for EslCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid_data(msg: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg)
}

fn find_header_end(src: &[u8]) -> Option<usize> {
    src.windows(2).position(|w| w == b"\n\n")
}

impl Decoder for EslCodec {
    type Item = EslMessage;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Self::Item>, Self::Error> {
        // Stray blank lines between frames
        while src.first() == Some(&b'\n') {
            src.advance(1);
        }

        let Some(header_end) = find_header_end(src) else {
            if src.len() > self.max_length {
                return Err(invalid_data(format!(
                    "Header block too large: {} > {}",
                    src.len(),
                    self.max_length
                )));
            }
            return Ok(None);
        };

        // Parse headers without consuming, so a partial body leaves the buffer intact
        let header_text = String::from_utf8_lossy(&src[..header_end]).into_owned();
        let mut message = EslMessage::new();
        for line in header_text.lines().map(|l| l.trim_end_matches('\r')) {
            if line.is_empty() {
                continue;
            }
            let (key, value) = split_header_line(line).map_err(|e| invalid_data(e.to_string()))?;
            message.push_header(key, value);
        }

        let body_len = match message.header(CONTENT_LENGTH) {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| invalid_data(format!("Invalid Content-Length: {}", raw)))?,
            None => 0,
        };

        if body_len > self.max_length {
            return Err(invalid_data(format!(
                "Message too large: {} > {}",
                body_len, self.max_length
            )));
        }

        let frame_len = header_end + 2 + body_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(header_end + 2);
        if body_len > 0 {
            let body = src.split_to(body_len);
            message = message.with_body(String::from_utf8_lossy(&body).into_owned());
        }

        Ok(Some(message))
    }
}

impl Encoder<String> for EslCodec {
    type Error = std::io::Error;

    fn encode(&mut self, command: String, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        let command = command.trim_end();
        if command.contains("\n\n") {
            return Err(invalid_data("Command must not contain an empty line".to_string()));
        }
        dst.reserve(command.len() + 2);
        dst.put_slice(command.as_bytes());
        dst.put_slice(b"\n\n");
        Ok(())
    }
}
