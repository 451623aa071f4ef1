//! WebSocket message protocol
//!
//! Inbound frames are JSON objects with a `type` of `authenticate`,
//! `execute`, `cancel` or `terminate`. Outbound frames are
//! [`ServerMessage`]s, serialized with a snake_case `type` tag and
//! camelCase fields.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::executor::CommandId;

pub const INVALID_FORMAT: &str = "Invalid message format";
pub const UNKNOWN_TYPE: &str = "Unknown message type";

const KNOWN_TYPES: &[&str] = &["authenticate", "execute", "cancel", "terminate"];

/// A decoded client frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Authenticate {
        #[serde(default)]
        user_id: Option<String>,
    },
    Execute {
        /// Kept as raw JSON so a non-string command is a validation failure
        /// rather than a framing error.
        #[serde(default)]
        command: Value,
        /// Logical target such as `week1`
        #[serde(default)]
        target: Option<String>,
        /// Concrete container name; `target` wins when both are present
        #[serde(default)]
        container: Option<String>,
        #[serde(default)]
        options: ExecuteOptions,
    },
    Cancel {
        #[serde(default)]
        command_id: Option<CommandId>,
    },
    Terminate {
        #[serde(default)]
        command_id: Option<CommandId>,
    },
}

/// `options` of an execute request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExecuteOptions {
    /// Milliseconds
    pub timeout: Option<u64>,
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
}

/// Why a frame could not be decoded. The `Display` text is sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Invalid message format")]
    InvalidFormat,
    #[error("Unknown message type")]
    UnknownType(String),
}

/// Decode one text frame.
pub fn parse_client_message(text: &str) -> std::result::Result<ClientMessage, FrameError> {
    let value: Value = serde_json::from_str(text).map_err(|_| FrameError::InvalidFormat)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(FrameError::InvalidFormat)?;
    if !KNOWN_TYPES.contains(&kind) {
        return Err(FrameError::UnknownType(kind.to_string()));
    }
    serde_json::from_value(value).map_err(|_| FrameError::InvalidFormat)
}

/// Progress payload of a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub elapsed_ms: u64,
}

/// A frame sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Connected {
        session_id: String,
        message: String,
    },
    Authenticated {
        user_id: String,
        permissions: Vec<String>,
    },
    CommandStart {
        command_id: CommandId,
        command: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        container: Option<String>,
    },
    Stdout {
        command_id: CommandId,
        data: String,
    },
    Stderr {
        command_id: CommandId,
        data: String,
    },
    Progress {
        command_id: CommandId,
        progress: Progress,
    },
    CommandComplete {
        command_id: CommandId,
        exit_code: i32,
    },
    CommandError {
        command_id: CommandId,
        message: String,
        /// `spawn_failure`, `runtime_failure`, `timeout` or `cancelled`
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        command_id: Option<CommandId>,
        message: String,
    },
    Terminated {
        #[serde(skip_serializing_if = "Option::is_none")]
        command_id: Option<CommandId>,
        success: bool,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            command_id: None,
            message: message.into(),
        }
    }

    /// An `error` frame for a command refused before it started.
    pub fn rejected(command_id: &str, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            command_id: Some(command_id.to_string()),
            message: message.into(),
        }
    }

    /// Whether this frame ends a command.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServerMessage::CommandComplete { .. }
                | ServerMessage::CommandError { .. }
                | ServerMessage::Error {
                    command_id: Some(_),
                    ..
                }
        )
    }

    /// The command this frame belongs to, if any.
    pub fn command_id(&self) -> Option<&str> {
        match self {
            ServerMessage::CommandStart { command_id, .. }
            | ServerMessage::Stdout { command_id, .. }
            | ServerMessage::Stderr { command_id, .. }
            | ServerMessage::Progress { command_id, .. }
            | ServerMessage::CommandComplete { command_id, .. }
            | ServerMessage::CommandError { command_id, .. } => Some(command_id),
            ServerMessage::Error { command_id, .. } | ServerMessage::Terminated { command_id, .. } => {
                command_id.as_deref()
            }
            ServerMessage::Connected { .. } | ServerMessage::Authenticated { .. } => None,
        }
    }

    pub fn to_json(&self) -> String {
        // ServerMessage holds only strings and integers
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","message":"Internal serialization error"}"#.to_string()
        })
    }
}

/// Incremental UTF-8 decoder for output chunks.
///
/// A chunk boundary may split a multi-byte character; the incomplete tail is
/// held back until the next chunk. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `chunk` together with any held-back bytes.
    pub fn push(&mut self, chunk: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let mut out = String::with_capacity(buf.len());
        let mut rest = buf.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = tail.get(bad..).unwrap_or_default();
                        }
                        None => {
                            self.pending = tail.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush whatever is still held back.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let tail = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&tail).into_owned())
    }
}
