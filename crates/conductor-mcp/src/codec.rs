//! Newline-delimited JSON-RPC 2.0 framing.
//!
//! Implements the MCP stdio wire format: one JSON object per line.
//! Reference: <https://spec.modelcontextprotocol.io/>
//!
//! Classification rules:
//! - `id` + `method` → request
//! - `id`, no `method` → response
//! - `method`, no `id` → notification

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// JSON-RPC version string stamped on every outbound frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// Upper bound on a single frame, as a guard against a misbehaving
/// server streaming garbage without newlines.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Errors from framing and decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A line was not a valid JSON-RPC frame. The reader loop can log
    /// this and continue with the next line.
    #[error("Malformed frame: {line}")]
    MalformedFrame {
        /// The raw offending line (possibly lossy UTF-8).
        line: String,
    },

    /// A frame exceeded the configured size bound. The oversized bytes
    /// were discarded up to the next newline; the stream is still usable.
    #[error("Frame exceeds {max} bytes")]
    FrameTooLarge {
        /// The configured bound.
        max: usize,
    },

    /// Underlying stream failure. Fatal to the reader loop.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// JSON-RPC 2.0 request frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC 2.0 notification frame (no `id`, no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone)]
pub enum Envelope {
    Request(RequestEnvelope),
    Response(ResponseEnvelope),
    Notification(NotificationEnvelope),
}

/// Encode an envelope as a single newline-terminated line.
pub fn encode_envelope(envelope: &Envelope) -> Result<String, serde_json::Error> {
    let mut line = match envelope {
        Envelope::Request(req) => serde_json::to_string(req)?,
        Envelope::Response(resp) => serde_json::to_string(resp)?,
        Envelope::Notification(note) => serde_json::to_string(note)?,
    };
    line.push('\n');
    Ok(line)
}

/// Encode a request line.
pub fn encode_request(
    id: u64,
    method: &str,
    params: Option<Value>,
) -> Result<String, serde_json::Error> {
    encode_envelope(&Envelope::Request(RequestEnvelope {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id,
        method: method.to_string(),
        params,
    }))
}

/// Encode a notification line.
pub fn encode_notification(
    method: &str,
    params: Option<Value>,
) -> Result<String, serde_json::Error> {
    encode_envelope(&Envelope::Notification(NotificationEnvelope {
        jsonrpc: JSONRPC_VERSION.to_string(),
        method: method.to_string(),
        params,
    }))
}

/// Decode one line into an envelope.
///
/// Never panics on bad input; anything that is not a classifiable
/// JSON-RPC object comes back as `MalformedFrame`.
pub fn decode_line(line: &str) -> Result<Envelope, CodecError> {
    let malformed = || CodecError::MalformedFrame {
        line: line.to_string(),
    };

    let value: Value = serde_json::from_str(line).map_err(|_| malformed())?;
    if !value.is_object() {
        return Err(malformed());
    }

    let has_id = value.get("id").is_some_and(|id| !id.is_null());
    let has_method = value.get("method").is_some();

    match (has_id, has_method) {
        (true, true) => serde_json::from_value(value)
            .map(Envelope::Request)
            .map_err(|_| malformed()),
        (true, false) => serde_json::from_value(value)
            .map(Envelope::Response)
            .map_err(|_| malformed()),
        (false, true) => serde_json::from_value(value)
            .map(Envelope::Notification)
            .map_err(|_| malformed()),
        (false, false) => Err(malformed()),
    }
}

/// Line framer over a raw byte stream.
///
/// Buffers partial reads until a full line is available, skips blank
/// lines, and bounds frame size. Oversized or non-UTF-8 frames are
/// reported as errors but leave the stream positioned at the next line.
pub struct FrameReader<R> {
    reader: R,
    buf: Vec<u8>,
    max_frame: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a framer with the default size bound.
    pub fn new(reader: R) -> Self {
        Self::with_max_frame(reader, MAX_FRAME_LEN)
    }

    /// Create a framer with a custom size bound.
    pub fn with_max_frame(reader: R, max_frame: usize) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            max_frame,
        }
    }

    /// Read the next non-empty line. Returns `Ok(None)` on clean EOF.
    pub async fn next_frame(&mut self) -> Result<Option<String>, CodecError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                line.pop(); // newline
                if line.last() == Some(&b'\r') {
                    line.pop();
                }

                if line.is_empty() {
                    continue;
                }

                if line.len() > self.max_frame {
                    return Err(CodecError::FrameTooLarge {
                        max: self.max_frame,
                    });
                }

                return match String::from_utf8(line) {
                    Ok(frame) => Ok(Some(frame)),
                    Err(err) => Err(CodecError::MalformedFrame {
                        line: String::from_utf8_lossy(err.as_bytes()).into_owned(),
                    }),
                };
            }

            if self.buf.len() > self.max_frame {
                self.discard_until_newline().await?;
                return Err(CodecError::FrameTooLarge {
                    max: self.max_frame,
                });
            }

            let n = self.reader.read_buf(&mut self.buf).await?;
            if n == 0 {
                // EOF with a trailing unterminated line: surface it once.
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let line = std::mem::take(&mut self.buf);
                if line.len() > self.max_frame {
                    return Err(CodecError::FrameTooLarge {
                        max: self.max_frame,
                    });
                }
                return match String::from_utf8(line) {
                    Ok(frame) => Ok(Some(frame)),
                    Err(err) => Err(CodecError::MalformedFrame {
                        line: String::from_utf8_lossy(err.as_bytes()).into_owned(),
                    }),
                };
            }
        }
    }

    /// Drop buffered bytes until the next newline so that an oversized
    /// frame does not poison the rest of the stream.
    async fn discard_until_newline(&mut self) -> Result<(), CodecError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                self.buf.drain(..=pos);
                return Ok(());
            }
            self.buf.clear();

            let n = self.reader.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_classify_request() {
        let frame = decode_line(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
        assert!(matches!(frame, Envelope::Request(_)));
    }

    #[test]
    fn test_classify_response() {
        let frame = decode_line(r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#).unwrap();
        let Envelope::Response(resp) = frame else {
            panic!("expected response");
        };
        assert_eq!(resp.id, 1);
        assert!(resp.result.is_some());
        assert!(resp.error.is_none());
    }

    #[test]
    fn test_classify_notification() {
        let frame =
            decode_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(matches!(frame, Envelope::Notification(_)));
    }

    #[test]
    fn test_decode_error_response() {
        let frame =
            decode_line(r#"{"jsonrpc":"2.0","id":7,"error":{"code":-32600,"message":"Invalid"}}"#)
                .unwrap();
        let Envelope::Response(resp) = frame else {
            panic!("expected response");
        };
        assert_eq!(resp.error.as_ref().unwrap().code, -32600);
    }

    #[test]
    fn test_malformed_line_is_reported_with_raw_text() {
        let err = decode_line("npm WARN deprecated something").unwrap_err();
        let CodecError::MalformedFrame { line } = err else {
            panic!("expected malformed frame");
        };
        assert!(line.contains("npm WARN"));
    }

    #[test]
    fn test_encode_request_omits_missing_params() {
        let line = encode_request(3, "tools/list", None).unwrap();
        assert!(line.ends_with('\n'));
        assert!(line.contains("\"jsonrpc\":\"2.0\""));
        assert!(!line.contains("params"));
    }

    #[tokio::test]
    async fn test_frame_reader_handles_partial_reads() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut frames = FrameReader::new(rx);

        tx.write_all(b"{\"jsonrpc\":\"2.0\",\"me").await.unwrap();
        tx.write_all(b"thod\":\"x\"}\n{\"jsonrpc\"").await.unwrap();
        tx.write_all(b":\"2.0\",\"method\":\"y\"}\n").await.unwrap();
        drop(tx);

        let first = frames.next_frame().await.unwrap().unwrap();
        assert!(first.contains("\"x\""));
        let second = frames.next_frame().await.unwrap().unwrap();
        assert!(second.contains("\"y\""));
        assert!(frames.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_frame_reader_skips_blank_lines() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut frames = FrameReader::new(rx);

        tx.write_all(b"\n\r\n{\"a\":1}\n").await.unwrap();
        drop(tx);

        assert_eq!(frames.next_frame().await.unwrap().unwrap(), "{\"a\":1}");
        assert!(frames.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_frame_reader_recovers_after_oversized_frame() {
        let (mut tx, rx) = tokio::io::duplex(256);
        let mut frames = FrameReader::with_max_frame(rx, 16);

        let huge = "x".repeat(64);
        tx.write_all(format!("{huge}\n{{\"ok\":1}}\n").as_bytes())
            .await
            .unwrap();
        drop(tx);

        let err = frames.next_frame().await.unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLarge { max: 16 }));

        // Stream resumes on the next line.
        assert_eq!(frames.next_frame().await.unwrap().unwrap(), "{\"ok\":1}");
    }

    #[tokio::test]
    async fn test_frame_reader_yields_unterminated_trailing_line() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut frames = FrameReader::new(rx);

        tx.write_all(b"{\"tail\":true}").await.unwrap();
        drop(tx);

        assert_eq!(
            frames.next_frame().await.unwrap().unwrap(),
            "{\"tail\":true}"
        );
        assert!(frames.next_frame().await.unwrap().is_none());
    }
}
