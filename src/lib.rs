//! Core user/room domain engine for a multi-user, multi-room real-time
//! chat service (see `SPEC_FULL.md`): command pipeline, access control,
//! distributed user-association protocol, and socket fan-out, mediated
//! through pluggable `State` and `Transport` collaborators.

pub mod command;
pub mod config;
pub mod direct_messaging;
pub mod error;
pub mod room;
pub mod service;
pub mod state;
pub mod transport;
pub mod user;
pub mod validator;

pub use command::{AfterHook, BeforeHook, CommandBinder, HookDecision};
pub use config::ChatServiceOptions;
pub use error::{ChatError, ChatResult, ConsistencyEvent, ErrorKind};
pub use service::{ChatService, ExecOptions, RoomOptions, Stats, SYSTEM_CHANNEL};
pub use state::{InMemoryState, State};
pub use transport::{InMemoryTransport, PendingSocket, Transport};
