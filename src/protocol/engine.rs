//! Protocol engines: byte stream ⇄ frames.

use std::sync::Arc;

use bytes::{Buf, BytesMut};

use super::Frame;
use crate::error::{NetError, Result};

/// Default upper bound for a single encoded frame.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Wire codec used by a session.
///
/// One engine instance belongs to one session, so implementations may keep
/// partial-frame state between `decode` calls.
pub trait ProtocolEngine: Send {
    /// Decode newly received bytes into zero or more complete frames.
    ///
    /// Returns [`NetError::InvalidData`] when the stream cannot be decoded.
    fn decode(&mut self, data: &[u8]) -> Result<Vec<Frame>>;

    /// Encode a frame for transmission.
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>>;

    /// Engine name for logging.
    fn name(&self) -> &'static str;
}

/// Builds a fresh engine for every new session.
pub type EngineFactory = Arc<dyn Fn() -> Box<dyn ProtocolEngine> + Send + Sync>;

/// Factory producing [`JsonLinesEngine`]s with the default frame limit.
pub fn default_engine_factory() -> EngineFactory {
    Arc::new(|| Box::new(JsonLinesEngine::new()))
}

/// Newline-delimited JSON frames.
///
/// ```text
/// {"type":"SESSION_OFFER","session_id":1,"timestamp":1700000000000}\n
/// {"type":"MESSAGE","kind":"Ping","payload":null}\n
/// ```
#[derive(Debug)]
pub struct JsonLinesEngine {
    /// Bytes of a frame whose terminator has not arrived yet
    buffer: BytesMut,
    /// Largest accepted frame, terminator excluded
    max_frame_size: usize,
}

impl Default for JsonLinesEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonLinesEngine {
    /// Create an engine with [`DEFAULT_MAX_FRAME_SIZE`]
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create an engine with a custom frame size limit
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame_size,
        }
    }

    /// Bytes currently buffered awaiting a terminator
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn parse_line(&self, line: &[u8]) -> Result<Option<Frame>> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        if line.len() > self.max_frame_size {
            return Err(NetError::InvalidData(format!(
                "frame of {} bytes exceeds maximum {}",
                line.len(),
                self.max_frame_size
            )));
        }

        serde_json::from_slice(line)
            .map(Some)
            .map_err(|e| NetError::InvalidData(format!("malformed frame: {e}")))
    }
}

impl ProtocolEngine for JsonLinesEngine {
    fn decode(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.split_to(pos + 1);
            match self.parse_line(&line[..pos]) {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => {},
                Err(e) => {
                    self.buffer.clear();
                    return Err(e);
                },
            }
        }

        if self.buffer.len() > self.max_frame_size {
            let size = self.buffer.remaining();
            self.buffer.clear();
            return Err(NetError::InvalidData(format!(
                "unterminated frame of {size} bytes exceeds maximum {}",
                self.max_frame_size
            )));
        }

        Ok(frames)
    }

    fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec(frame)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    fn name(&self) -> &'static str {
        "json-lines"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Message;

    #[test]
    fn test_decode_multiple_frames_in_one_chunk() {
        let mut engine = JsonLinesEngine::new();
        let data = b"{\"type\":\"SESSION_ACCEPT\",\"session_id\":3}\n{\"type\":\"DISCONNECT\",\"code\":2}\n";

        let frames = engine.decode(data).unwrap();
        assert_eq!(
            frames,
            vec![
                Frame::accept(3, None),
                Frame::Disconnect { code: 2 }
            ]
        );
        assert_eq!(engine.pending(), 0);
    }

    #[test]
    fn test_decode_split_frame() {
        let mut engine = JsonLinesEngine::new();
        let bytes = engine.encode(&Message::new("Ping").into()).unwrap();
        let (head, tail) = bytes.split_at(7);

        assert!(engine.decode(head).unwrap().is_empty());
        assert_eq!(engine.pending(), 7);

        let frames = engine.decode(tail).unwrap();
        assert_eq!(frames, vec![Frame::Message(Message::new("Ping"))]);
    }

    #[test]
    fn test_blank_and_crlf_lines() {
        let mut engine = JsonLinesEngine::new();
        let frames = engine
            .decode(b"\n\r\n{\"type\":\"DISCONNECT\",\"code\":1}\r\n")
            .unwrap();
        assert_eq!(frames, vec![Frame::Disconnect { code: 1 }]);
    }

    #[test]
    fn test_malformed_frame_is_invalid_data() {
        let mut engine = JsonLinesEngine::new();
        let err = engine.decode(b"not json\n").unwrap_err();
        assert!(matches!(err, NetError::InvalidData(_)));
        assert_eq!(engine.pending(), 0);
    }

    #[test]
    fn test_unknown_frame_type_is_invalid_data() {
        let mut engine = JsonLinesEngine::new();
        let err = engine.decode(b"{\"type\":\"TELEPORT\"}\n").unwrap_err();
        assert!(matches!(err, NetError::InvalidData(_)));
    }

    #[test]
    fn test_oversized_unterminated_frame() {
        let mut engine = JsonLinesEngine::with_max_frame_size(16);
        let err = engine.decode(&[b'{'; 32]).unwrap_err();
        assert!(matches!(err, NetError::InvalidData(_)));
        assert_eq!(engine.pending(), 0);
    }

    #[test]
    fn test_oversized_terminated_frame() {
        let mut engine = JsonLinesEngine::with_max_frame_size(8);
        let err = engine
            .decode(b"{\"type\":\"DISCONNECT\",\"code\":1}\n")
            .unwrap_err();
        assert!(matches!(err, NetError::InvalidData(_)));
    }

    #[test]
    fn test_encode_is_newline_terminated() {
        let engine = JsonLinesEngine::new();
        let bytes = engine.encode(&Frame::Disconnect { code: 2 }).unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));
        assert_eq!(bytes.iter().filter(|&&b| b == b'\n').count(), 1);
    }

    #[test]
    fn test_factory_builds_independent_engines() {
        let factory = default_engine_factory();
        let mut a = factory();
        let b = factory();
        assert_eq!(a.name(), "json-lines");
        assert!(a.decode(b"{\"type\":").unwrap().is_empty());
        assert_eq!(b.name(), "json-lines");
    }
}
