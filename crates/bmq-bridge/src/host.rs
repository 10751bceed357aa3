//! ---
//! bmq_section: "02-host-bridge-core"
//! bmq_subsection: "module"
//! bmq_type: "source"
//! bmq_scope: "code"
//! bmq_description: "Callback registration and diagnostics contract of the host environment."
//! bmq_version: "v0.0.0-prealpha"
//! bmq_owner: "tbd"
//! ---
use std::any::Any;

use tracing::{error, warn};

use crate::events::{AckRecord, ReceivedMessage, SessionNotification};
use crate::SessionError;

type SessionCallback = Box<dyn Fn(SessionNotification) -> anyhow::Result<()> + Send + Sync>;
type MessageCallback = Box<dyn Fn(Vec<ReceivedMessage>) -> anyhow::Result<()> + Send + Sync>;
type AckCallback = Box<dyn Fn(Vec<AckRecord>) -> anyhow::Result<()> + Send + Sync>;

/// The three entry points the host registers for asynchronous delivery.
pub struct HostCallbacks {
    pub(crate) on_session_event: SessionCallback,
    pub(crate) on_message: MessageCallback,
    pub(crate) on_ack: AckCallback,
}

impl HostCallbacks {
    pub fn new<S, M, A>(on_session_event: S, on_message: M, on_ack: A) -> Self
    where
        S: Fn(SessionNotification) -> anyhow::Result<()> + Send + Sync + 'static,
        M: Fn(Vec<ReceivedMessage>) -> anyhow::Result<()> + Send + Sync + 'static,
        A: Fn(Vec<AckRecord>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            on_session_event: Box::new(on_session_event),
            on_message: Box::new(on_message),
            on_ack: Box::new(on_ack),
        }
    }
}

impl std::fmt::Debug for HostCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostCallbacks").finish_non_exhaustive()
    }
}

/// Warning and diagnostic primitives of the host environment.
pub trait HostDiagnostics: Send + Sync {
    /// Emit a non-fatal warning. The host may escalate it into an error.
    fn warn(&self, message: &str) -> Result<(), SessionError>;

    /// Report a failure that has nowhere else to go, such as a failing callback
    /// invoked from a native thread.
    fn print_unhandled(&self, context: &str, error: &anyhow::Error);
}

/// Diagnostics routed through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics {
    warnings_as_errors: bool,
}

impl TracingDiagnostics {
    pub fn new(warnings_as_errors: bool) -> Self {
        Self { warnings_as_errors }
    }
}

impl HostDiagnostics for TracingDiagnostics {
    fn warn(&self, message: &str) -> Result<(), SessionError> {
        if self.warnings_as_errors {
            return Err(SessionError::Warning(message.to_owned()));
        }
        warn!(warning = %message, "host warning");
        Ok(())
    }

    fn print_unhandled(&self, context: &str, error: &anyhow::Error) {
        error!(context = %context, error = %format!("{error:#}"), "unhandled host callback failure");
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
