//! Closed error taxonomy for the chat engine (§7 of the design).
//!
//! Every command acknowledgement carries either a result tuple or a
//! [`ChatError`]. Consistency failures are a separate, non-fatal event kind
//! surfaced alongside normal server events — see [`ConsistencyEvent`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of error kinds a command or internal operation can fail with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    BadArgument,
    NoCommand,
    NoSocket,
    NoUserOnline,
    NoRoom,
    NoList,
    NotAllowed,
    UserExists,
    RoomExists,
    RoomRemoved,
    InvalidName,
    WrongArgumentsCount,
    ServerError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::BadArgument => "badArgument",
            ErrorKind::NoCommand => "noCommand",
            ErrorKind::NoSocket => "noSocket",
            ErrorKind::NoUserOnline => "noUserOnline",
            ErrorKind::NoRoom => "noRoom",
            ErrorKind::NoList => "noList",
            ErrorKind::NotAllowed => "notAllowed",
            ErrorKind::UserExists => "userExists",
            ErrorKind::RoomExists => "roomExists",
            ErrorKind::RoomRemoved => "roomRemoved",
            ErrorKind::InvalidName => "invalidName",
            ErrorKind::WrongArgumentsCount => "wrongArgumentsCount",
            ErrorKind::ServerError => "serverError",
        };
        f.write_str(s)
    }
}

/// A command/operation failure. `command` and `argument_position` are only
/// populated for validation failures (§4.1); other kinds leave them `None`.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ChatError {
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub argument_position: Option<usize>,
    pub message: String,
}

impl ChatError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        ChatError {
            kind,
            command: None,
            argument_position: None,
            message: message.into(),
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_argument_position(mut self, position: usize) -> Self {
        self.argument_position = Some(position);
        self
    }

    pub fn not_allowed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotAllowed, message)
    }

    pub fn no_room(name: &str) -> Self {
        Self::new(ErrorKind::NoRoom, format!("no such room '{name}'"))
    }

    pub fn room_removed(name: &str) -> Self {
        Self::new(ErrorKind::RoomRemoved, format!("room '{name}' is being removed"))
    }

    pub fn no_socket() -> Self {
        Self::new(ErrorKind::NoSocket, "command requires an active socket")
    }

    pub fn no_user_online(name: &str) -> Self {
        Self::new(ErrorKind::NoUserOnline, format!("user '{name}' has no online sockets"))
    }

    pub fn no_list(name: &str) -> Self {
        Self::new(ErrorKind::NoList, format!("no such list '{name}'"))
    }

    pub fn user_exists(name: &str) -> Self {
        Self::new(ErrorKind::UserExists, format!("user '{name}' already exists"))
    }

    pub fn room_exists(name: &str) -> Self {
        Self::new(ErrorKind::RoomExists, format!("room '{name}' already exists"))
    }

    pub fn invalid_name(name: &str) -> Self {
        Self::new(ErrorKind::InvalidName, format!("'{name}' is not a valid name"))
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerError, message)
    }

    /// Serialize per `useRawErrorObjects` (§7): either a `{name, args}` style
    /// object, or a single localized string.
    pub fn to_wire(&self, raw_error_objects: bool) -> serde_json::Value {
        if raw_error_objects {
            serde_json::json!({
                "name": self.kind.to_string(),
                "message": self.message,
                "command": self.command,
                "argumentPosition": self.argument_position,
            })
        } else {
            serde_json::Value::String(self.to_localized_string())
        }
    }

    fn to_localized_string(&self) -> String {
        match (&self.command, self.argument_position) {
            (Some(cmd), Some(pos)) => format!("{}: {} (command={cmd}, argument={pos})", self.kind, self.message),
            (Some(cmd), None) => format!("{}: {} (command={cmd})", self.kind, self.message),
            _ => format!("{}: {}", self.kind, self.message),
        }
    }
}

/// Server-level events reporting a detected divergence between the State
/// store's view and the Transport's view. These are never command failures
/// (§7) — they are reported out-of-band via [`crate::service::ChatService`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConsistencyEvent {
    StoreConsistencyFailure {
        user_name: String,
        op_type: String,
        detail: String,
    },
    TransportConsistencyFailure {
        user_name: String,
        op_type: String,
        detail: String,
    },
}

pub type ChatResult<T> = Result<T, ChatError>;
