//! Command pipeline (C7, §4.5): validate -> beforeHook -> dispatch ->
//! afterHook -> callback, with a uniform shape shared by every command in
//! the §6 vocabulary.
//!
//! `CommandBinder` only knows the generic shape of the pipeline; it has no
//! idea what a `roomJoin` or a `directMessage` actually does — that lives in
//! [`crate::service::ChatService`], which supplies the dispatch step as a
//! closure. This mirrors the reference project's separation between a
//! route handler (dispatch) and the validation/rate-limit layer wrapped
//! around it.

use crate::error::{ChatError, ChatResult};
use crate::validator::ArgumentsValidator;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// What a command produced, or how a hook wants to change the pipeline's
/// course (§4.5 steps 2 and 4).
pub enum HookDecision {
    /// Proceed to the next step with (possibly rewritten) arguments/results.
    Proceed(Vec<Value>),
    /// Short-circuit the pipeline entirely with this result.
    ShortCircuit(Vec<Value>),
}

type BeforeFuture = Pin<Box<dyn Future<Output = ChatResult<HookDecision>> + Send>>;
type AfterFuture = Pin<Box<dyn Future<Output = ChatResult<Vec<Value>>> + Send>>;

/// `beforeHook(server, userName, socketId, args)` (§4.5 step 2).
pub type BeforeHook = Arc<dyn Fn(&str, Option<&str>, Vec<Value>) -> BeforeFuture + Send + Sync>;
/// `afterHook(server, userName, socketId, args, results)` (§4.5 step 4).
pub type AfterHook = Arc<dyn Fn(&str, Option<&str>, Vec<Value>, Vec<Value>) -> AfterFuture + Send + Sync>;

/// Commands that require a non-empty `socketId` regardless of argument
/// schema (§4.5, §6).
fn requires_socket(command: &str) -> bool {
    matches!(command, "roomJoin" | "roomLeave")
}

#[derive(Default)]
pub struct CommandBinder {
    validator: ArgumentsValidator,
    before: HashMap<String, BeforeHook>,
    after: HashMap<String, AfterHook>,
}

impl CommandBinder {
    pub fn new() -> Self {
        CommandBinder {
            validator: ArgumentsValidator::with_builtin_commands(),
            before: HashMap::new(),
            after: HashMap::new(),
        }
    }

    pub fn set_before_hook(&mut self, command: impl Into<String>, hook: BeforeHook) {
        self.before.insert(command.into(), hook);
    }

    pub fn set_after_hook(&mut self, command: impl Into<String>, hook: AfterHook) {
        self.after.insert(command.into(), hook);
    }

    /// Step 1 only (§4.1), exposed so a caller that wants to hold the
    /// hook-registry lock for the minimum time can validate, clone out the
    /// relevant hooks, and release the lock before running async hooks.
    pub fn validate_only(&self, command: &str, args: &[Value]) -> ChatResult<()> {
        self.validator.validate(command, args)?;
        Ok(())
    }

    pub fn before_hook(&self, command: &str) -> Option<BeforeHook> {
        self.before.get(command).cloned()
    }

    pub fn after_hook(&self, command: &str) -> Option<AfterHook> {
        self.after.get(command).cloned()
    }

    pub fn requires_socket(command: &str) -> bool {
        requires_socket(command)
    }

    /// Run the full pipeline for one command invocation. `dispatch` is the
    /// step-3 dispatch to the bound method on `User`/`ChatService`,
    /// supplied by the caller because only it knows which command this is.
    pub async fn run<D, Fut>(
        &self,
        command: &str,
        user_name: &str,
        socket_id: Option<&str>,
        is_local_call: bool,
        args: Vec<Value>,
        dispatch: D,
    ) -> ChatResult<Vec<Value>>
    where
        D: FnOnce(Vec<Value>) -> Fut,
        Fut: Future<Output = ChatResult<Vec<Value>>>,
    {
        // Step 1: argument validation (§4.1) precedes hooks.
        self.validator.validate(command, &args)?;

        if requires_socket(command) && !is_local_call && socket_id.unwrap_or("").is_empty() {
            return Err(ChatError::no_socket().with_command(command));
        }

        // Step 2: beforeHook may short-circuit or rewrite args.
        let args = if let Some(hook) = self.before.get(command) {
            match hook(user_name, socket_id, args).await? {
                HookDecision::ShortCircuit(results) => return Ok(results),
                HookDecision::Proceed(args) => args,
            }
        } else {
            args
        };

        // Step 3: dispatch to the bound handler.
        let results = dispatch(args.clone()).await?;

        // Step 4: afterHook may rewrite results.
        let results = if let Some(hook) = self.after.get(command) {
            hook(user_name, socket_id, args, results).await?
        } else {
            results
        };

        Ok(results)
    }
}
