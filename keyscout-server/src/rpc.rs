use serde_json::{json, Value};
use std::io::{self, BufRead, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::tools::{ToolError, ToolRegistry};

/// Largest body accepted in one frame
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

const PROTOCOL_VERSION: &str = "2024-11-05";

/// Longest header line accepted, terminator included
pub const MAX_HEADER_LINE: usize = 8 * 1024;

const LENGTH_HEADER: &[u8] = b"content-length:";

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("input ended inside a frame")]
    Truncated,
    #[error("frame has no Content-Length header")]
    MissingLength,
    #[error("malformed header line: {0}")]
    BadHeader(String),
    #[error("header line exceeds the limit")]
    HeaderTooLong,
    #[error("frame of {0} bytes exceeds the limit")]
    TooLarge(usize),
}

/// Reads `Content-Length: <n>\r\n\r\n<body>` frames. Header names are
/// case-insensitive and headers other than `Content-Length` are ignored.
pub struct FrameReader<R> {
    reader: R,
    line: Vec<u8>,
    // Start of the next header line, already consumed by `resync`
    pending: Vec<u8>,
}

impl<R: BufRead> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Reads one frame body. `Ok(None)` means the input ended cleanly.
    pub fn read_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let mut content_length: Option<usize> = None;
        let mut seen_header = false;

        loop {
            if !self.read_line()? {
                return if seen_header || !self.line.is_empty() {
                    Err(FrameError::Truncated)
                } else {
                    Ok(None)
                };
            }

            let header = std::str::from_utf8(&self.line)
                .map_err(|_| FrameError::BadHeader(String::from_utf8_lossy(&self.line).into()))?
                .trim_end_matches(&['\r', '\n'][..]);
            if header.is_empty() {
                if seen_header {
                    break;
                }
                // Stray separator between frames
                continue;
            }
            seen_header = true;

            let (name, value) = header
                .split_once(':')
                .ok_or_else(|| FrameError::BadHeader(header.to_string()))?;
            if name.trim().eq_ignore_ascii_case("content-length") {
                let length = value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| FrameError::BadHeader(header.to_string()))?;
                content_length = Some(length);
            }
        }

        let length = content_length.ok_or(FrameError::MissingLength)?;
        if length > MAX_FRAME_BYTES {
            return Err(FrameError::TooLarge(length));
        }

        let mut body = vec![0u8; length];
        self.reader.read_exact(&mut body).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => FrameError::Truncated,
            _ => FrameError::Io(e),
        })?;
        Ok(Some(body))
    }

    /// Reads one newline-terminated header line into `self.line`. Returns
    /// false when the input ends first.
    fn read_line(&mut self) -> Result<bool, FrameError> {
        self.line.clear();
        self.line.append(&mut self.pending);

        let limit = (MAX_HEADER_LINE + 1).saturating_sub(self.line.len()) as u64;
        (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut self.line)?;

        if self.line.ends_with(b"\n") {
            Ok(true)
        } else if self.line.len() > MAX_HEADER_LINE {
            self.skip_line()?;
            Err(FrameError::HeaderTooLong)
        } else {
            Ok(false)
        }
    }

    fn skip_line(&mut self) -> io::Result<()> {
        loop {
            let (used, done) = {
                let buf = self.reader.fill_buf()?;
                if buf.is_empty() {
                    return Ok(());
                }
                match buf.iter().position(|&b| b == b'\n') {
                    Some(pos) => (pos + 1, true),
                    None => (buf.len(), false),
                }
            };
            self.reader.consume(used);
            if done {
                return Ok(());
            }
        }
    }

    /// Discards the body of a frame that was refused by length. Returns the
    /// number of bytes actually skipped.
    pub fn discard(&mut self, length: usize) -> io::Result<u64> {
        let mut rest = (&mut self.reader).take(length as u64);
        io::copy(&mut rest, &mut io::sink())
    }

    /// Skips input up to the next `Content-Length` header after a malformed
    /// frame, whose body length is unknown.
    pub fn resync(&mut self) -> io::Result<()> {
        let mut matched = 0;
        loop {
            let (used, found) = {
                let buf = self.reader.fill_buf()?;
                if buf.is_empty() {
                    return Ok(());
                }
                let mut used = buf.len();
                let mut found = false;
                for (i, byte) in buf.iter().map(u8::to_ascii_lowercase).enumerate() {
                    if byte == LENGTH_HEADER[matched] {
                        matched += 1;
                    } else {
                        matched = usize::from(byte == LENGTH_HEADER[0]);
                    }
                    if matched == LENGTH_HEADER.len() {
                        used = i + 1;
                        found = true;
                        break;
                    }
                }
                (used, found)
            };
            self.reader.consume(used);
            if found {
                self.pending = b"Content-Length:".to_vec();
                return Ok(());
            }
        }
    }
}

/// Writes one framed message and flushes
pub fn write_frame<W: Write>(writer: &mut W, message: &Value) -> io::Result<()> {
    let body = serde_json::to_vec(message)?;
    write!(writer, "Content-Length: {}\r\n\r\n", body.len())?;
    writer.write_all(&body)?;
    writer.flush()
}

/// An error response body
#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Logs `detail` under a fresh correlation id and returns an error that
    /// carries only the id.
    pub fn internal(detail: &str) -> Self {
        let correlation_id = Uuid::new_v4().to_string();
        error!("Internal error [{}]: {}", correlation_id, detail);
        Self::new(INTERNAL_ERROR, "Internal error")
            .with_data(json!({ "correlation_id": correlation_id }))
    }

    fn to_value(&self) -> Value {
        let mut error = json!({ "code": self.code, "message": self.message });
        if let Some(data) = &self.data {
            error["data"] = data.clone();
        }
        error
    }
}

impl From<ToolError> for RpcError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::UnknownTool(_) => RpcError::new(INVALID_PARAMS, err.to_string())
                .with_data(json!({ "kind": "unknown_tool" })),
            ToolError::InvalidArguments(message) => RpcError::new(INVALID_PARAMS, message)
                .with_data(json!({ "kind": "invalid_params" })),
            ToolError::Rejected { kind, message } => {
                RpcError::new(INVALID_PARAMS, message).with_data(json!({ "kind": kind }))
            }
            ToolError::Internal(detail) => RpcError::internal(&detail),
        }
    }
}

pub fn success_response(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

pub fn error_response(id: Value, error: &RpcError) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": error.to_value() })
}

/// Dispatches JSON-RPC requests to the tool registry
pub struct Server {
    registry: ToolRegistry,
}

impl Server {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    /// Serves framed requests until the input ends. Only I/O failures end
    /// the session early.
    pub fn serve<R: BufRead, W: Write>(&self, reader: R, mut writer: W) -> io::Result<()> {
        let mut frames = FrameReader::new(reader);
        loop {
            let body = match frames.read_frame() {
                Ok(Some(body)) => body,
                Ok(None) => return Ok(()),
                Err(FrameError::Io(e)) => return Err(e),
                Err(FrameError::Truncated) => {
                    warn!("Input ended inside a frame");
                    return Ok(());
                }
                Err(FrameError::TooLarge(length)) => {
                    warn!("Discarding frame of {} bytes", length);
                    if frames.discard(length)? < length as u64 {
                        return Ok(());
                    }
                    let error = RpcError::new(INVALID_REQUEST, "Request too large");
                    write_frame(&mut writer, &error_response(Value::Null, &error))?;
                    continue;
                }
                Err(e) => {
                    warn!("Bad frame: {}", e);
                    let error = RpcError::new(PARSE_ERROR, "Parse error");
                    write_frame(&mut writer, &error_response(Value::Null, &error))?;
                    frames.resync()?;
                    continue;
                }
            };

            if let Some(response) = self.handle_message(&body) {
                write_frame(&mut writer, &response)?;
            }
        }
    }

    /// Handles one message body. Notifications produce no response.
    pub fn handle_message(&self, body: &[u8]) -> Option<Value> {
        let message: Value = match serde_json::from_slice(body) {
            Ok(message) => message,
            Err(e) => {
                debug!("Unparseable request: {}", e);
                let error = RpcError::new(PARSE_ERROR, "Parse error");
                return Some(error_response(Value::Null, &error));
            }
        };

        let Some(object) = message.as_object() else {
            let error = RpcError::new(INVALID_REQUEST, "Invalid request");
            return Some(error_response(Value::Null, &error));
        };

        let id = object.get("id").cloned();
        let valid_id = matches!(
            id,
            None | Some(Value::Null) | Some(Value::String(_)) | Some(Value::Number(_))
        );
        let method = object.get("method").and_then(Value::as_str);
        let (Some(method), true, Some("2.0")) = (
            method,
            valid_id,
            object.get("jsonrpc").and_then(Value::as_str),
        ) else {
            let error = RpcError::new(INVALID_REQUEST, "Invalid request");
            return Some(error_response(id.unwrap_or(Value::Null), &error));
        };

        let params = object.get("params").cloned().unwrap_or(Value::Null);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(method, params)))
            .unwrap_or_else(|payload| Err(RpcError::internal(&panic_message(&*payload))));

        // No id: a notification, never answered
        let id = id?;
        Some(match outcome {
            Ok(result) => success_response(id, result),
            Err(error) => error_response(id, &error),
        })
    }

    fn dispatch(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        debug!("Dispatching {}", method);
        match method {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": {
                    "name": "keyscout",
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "capabilities": { "tools": {} },
            })),
            "list_tools" | "tools/list" => Ok(json!({ "tools": self.registry.definitions() })),
            "call_tool" | "tools/call" => self.call_tool(params),
            "ping" => Ok(json!({})),
            "initialized" | "notifications/initialized" => Ok(Value::Null),
            _ => Err(RpcError::new(METHOD_NOT_FOUND, "Method not found")),
        }
    }

    fn call_tool(&self, params: Value) -> Result<Value, RpcError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                RpcError::new(INVALID_PARAMS, "Missing tool name")
                    .with_data(json!({ "kind": "invalid_params" }))
            })?;
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        Ok(self.registry.call(name, arguments)?)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panic: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panic: {}", message)
    } else {
        "panic with non-string payload".to_string()
    }
}
