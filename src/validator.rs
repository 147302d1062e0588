//! Per-command argument schemas (§4.1). Validation runs before any hook.

use crate::error::{ChatError, ErrorKind};
use serde_json::Value;
use std::collections::HashMap;

/// The accepted JSON shape of a single argument slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    String,
    Bool,
    Integer,
    Object,
    Array,
}

impl ArgType {
    fn matches(self, value: &Value) -> bool {
        match self {
            ArgType::String => value.is_string(),
            ArgType::Bool => value.is_boolean(),
            ArgType::Integer => value.is_i64() || value.is_u64(),
            ArgType::Object => value.is_object(),
            ArgType::Array => value.is_array(),
        }
    }
}

/// `(argTypes[], minArity, maxArity)` for one command (§4.1).
#[derive(Debug, Clone)]
pub struct CommandSchema {
    pub name: &'static str,
    pub arg_types: Vec<ArgType>,
    pub min_arity: usize,
    pub max_arity: usize,
}

impl CommandSchema {
    pub fn new(name: &'static str, arg_types: Vec<ArgType>, min_arity: usize) -> Self {
        let max_arity = arg_types.len();
        CommandSchema {
            name,
            arg_types,
            min_arity,
            max_arity,
        }
    }
}

/// Validates argument lists against the fixed per-command schema table.
pub struct ArgumentsValidator {
    schemas: HashMap<&'static str, CommandSchema>,
}

impl Default for ArgumentsValidator {
    fn default() -> Self {
        Self::with_builtin_commands()
    }
}

impl ArgumentsValidator {
    pub fn new() -> Self {
        ArgumentsValidator {
            schemas: HashMap::new(),
        }
    }

    pub fn register(&mut self, schema: CommandSchema) {
        self.schemas.insert(schema.name, schema);
    }

    /// Schemas for the full §6 command vocabulary.
    pub fn with_builtin_commands() -> Self {
        use ArgType::*;
        let mut v = ArgumentsValidator::new();
        v.register(CommandSchema::new("directAddToList", vec![String, Array], 2));
        v.register(CommandSchema::new("directGetAccessList", vec![String], 1));
        v.register(CommandSchema::new("directGetWhitelistMode", vec![], 0));
        v.register(CommandSchema::new("directMessage", vec![String, Object], 2));
        v.register(CommandSchema::new("directRemoveFromList", vec![String, Array], 2));
        v.register(CommandSchema::new("directSetWhitelistMode", vec![Bool], 1));
        v.register(CommandSchema::new("listJoinedSockets", vec![], 0));
        v.register(CommandSchema::new("listRooms", vec![], 0));
        v.register(CommandSchema::new("roomAddToList", vec![String, String, Array], 3));
        v.register(CommandSchema::new("roomCreate", vec![String, Bool], 1));
        v.register(CommandSchema::new("roomDelete", vec![String], 1));
        v.register(CommandSchema::new("roomGetAccessList", vec![String, String], 2));
        v.register(CommandSchema::new("roomGetOwner", vec![String], 1));
        v.register(CommandSchema::new("roomGetWhitelistMode", vec![String], 1));
        v.register(CommandSchema::new("roomHistoryGet", vec![String, Integer, Integer], 3));
        v.register(CommandSchema::new("roomHistoryInfo", vec![String], 1));
        v.register(CommandSchema::new("roomRecentHistory", vec![String], 1));
        v.register(CommandSchema::new("roomJoin", vec![String], 1));
        v.register(CommandSchema::new("roomLeave", vec![String], 1));
        v.register(CommandSchema::new("roomMessage", vec![String, Object], 2));
        v.register(CommandSchema::new("roomRemoveFromList", vec![String, String, Array], 3));
        v.register(CommandSchema::new("roomSetWhitelistMode", vec![String, Bool], 2));
        v.register(CommandSchema::new("roomUserSeen", vec![String, String], 2));
        v.register(CommandSchema::new("systemMessage", vec![Object], 1));
        v
    }

    /// Validate `args` against the schema for `command`. Returns the schema
    /// on success so callers can type-check individual argument accesses.
    pub fn validate(&self, command: &str, args: &[Value]) -> Result<&CommandSchema, ChatError> {
        let schema = self.schemas.get(command).ok_or_else(|| {
            ChatError::new(ErrorKind::NoCommand, format!("unknown command '{command}'"))
        })?;

        if args.len() < schema.min_arity || args.len() > schema.max_arity {
            return Err(ChatError::new(
                ErrorKind::WrongArgumentsCount,
                format!(
                    "{} expects {}..={} arguments, got {}",
                    command,
                    schema.min_arity,
                    schema.max_arity,
                    args.len()
                ),
            )
            .with_command(command));
        }

        for (position, (expected, value)) in schema.arg_types.iter().zip(args.iter()).enumerate() {
            if !expected.matches(value) {
                return Err(ChatError::new(
                    ErrorKind::BadArgument,
                    format!("argument {position} of '{command}' has the wrong type"),
                )
                .with_command(command)
                .with_argument_position(position));
            }
        }

        Ok(schema)
    }
}

/// Naming rule shared by user names and room names (§3): non-empty,
/// printable, no whitespace, no `:` `;` `,`.
pub fn validate_name(name: &str) -> Result<(), ChatError> {
    if name.is_empty() {
        return Err(ChatError::invalid_name(name));
    }
    let is_valid = name
        .chars()
        .all(|c| !c.is_whitespace() && c.is_ascii_graphic() && c != ':' && c != ';' && c != ',');
    if !is_valid {
        return Err(ChatError::invalid_name(name));
    }
    Ok(())
}
