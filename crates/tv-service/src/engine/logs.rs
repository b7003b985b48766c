//! Decoder for the controller's streaming log endpoint
//!
//! The endpoint writes one JSON object per line:
//! `{"type":"info","payload":"..."}`. Chunks may split lines anywhere.

use bytes::{Buf, BytesMut};
use serde::Deserialize;

use tv_core::{EngineError, LogEvent, LogLevel};

#[derive(Deserialize)]
struct RawLogLine {
    #[serde(rename = "type")]
    level: String,
    payload: String,
}

/// Incremental line decoder
#[derive(Default)]
pub struct LogDecoder {
    buffer: BytesMut,
}

impl LogDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every complete line it finished
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<LogEvent, EngineError>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line = self.buffer.split_to(newline);
            self.buffer.advance(1);

            if let Some(event) = decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Bytes of an unfinished line
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn decode_line(line: &[u8]) -> Option<Result<LogEvent, EngineError>> {
    let text = std::str::from_utf8(line).ok()?.trim();
    if text.is_empty() {
        return None;
    }

    Some(
        serde_json::from_str::<RawLogLine>(text)
            .map(|raw| LogEvent {
                level: LogLevel::parse_lossy(&raw.level),
                payload: raw.payload,
            })
            .map_err(|e| EngineError::Malformed(format!("log line: {}", e))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_split_lines() {
        let mut decoder = LogDecoder::new();

        let first = decoder.push(br#"{"type":"info","payload":"hel"#);
        assert!(first.is_empty());
        assert!(decoder.pending() > 0);

        let second = decoder.push(b"lo\"}\n{\"type\":\"warning\",\"payload\":\"slow\"}\n");
        let events: Vec<_> = second.into_iter().map(|e| e.unwrap()).collect();
        assert_eq!(
            events,
            vec![
                LogEvent {
                    level: LogLevel::Info,
                    payload: "hello".to_string()
                },
                LogEvent {
                    level: LogLevel::Warning,
                    payload: "slow".to_string()
                },
            ]
        );
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let mut decoder = LogDecoder::new();
        assert!(decoder.push(b"\n\r\n").is_empty());
    }

    #[test]
    fn test_malformed_line_is_reported() {
        let mut decoder = LogDecoder::new();
        let events = decoder.push(b"not json\n");
        assert!(matches!(events.as_slice(), [Err(EngineError::Malformed(_))]));
    }
}
