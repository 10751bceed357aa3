//! ---
//! bmq_section: "02-host-bridge-core"
//! bmq_subsection: "module"
//! bmq_type: "source"
//! bmq_scope: "code"
//! bmq_description: "Session lifecycle, property codec and event dispatch for a BlazingMQ host bridge."
//! bmq_version: "v0.0.0-prealpha"
//! bmq_owner: "tbd"
//! ---
//! Host bridge over a native BlazingMQ client session.
//!
//! [`Session`] owns the native handle and serialises queue operations against
//! `stop`. [`EventDispatcher`] turns native events into host callbacks, using
//! [`properties`] to decode typed message properties. [`runtime`] holds the
//! host-exclusive execution discipline that every crossing observes.

pub mod client;
pub mod codes;
pub mod dispatcher;
pub mod events;
pub mod health;
pub mod host;
pub mod metrics;
pub mod native_log;
pub mod properties;
pub mod runtime;
pub mod session;

/// Shared result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Failures raised synchronously to the calling host frame.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Operation attempted while the session is not started.
    #[error("Method called after session was stopped")]
    SessionStopped,
    /// No queue is open under the URI.
    #[error("Queue not opened")]
    QueueNotOpened {
        /// URI the caller asked for.
        uri: String,
    },
    /// The queue handle resolved but is already closing.
    #[error(
        "Attempting to confirm message on a closing queue. Please ensure that you are \
         invoking configure with 0 max unconfirmed messages before closing the queue<{uri}>"
    )]
    QueueClosing {
        /// URI of the closing queue.
        uri: String,
    },
    /// Native call ran out of time.
    #[error("{message}")]
    BrokerTimeout {
        /// Full description including the result name and code.
        message: String,
        /// Native result code.
        code: i32,
    },
    /// Any other non-zero native result.
    #[error("{message}")]
    GenericFailure {
        /// Full description including the result name and code.
        message: String,
        /// Native result code.
        code: i32,
    },
    /// Confirmation identifier of the wrong width.
    #[error("Invalid GUID provided")]
    InvalidGuid,
    /// The message builder refused the outgoing message.
    #[error("Failed to construct message: {name} ({code})")]
    MessageConstruction {
        /// Event-builder result code.
        code: i32,
        /// ASCII name of the code.
        name: &'static str,
    },
    /// Outgoing properties could not be encoded.
    #[error(transparent)]
    Property(#[from] properties::PropertyError),
    /// Session configuration failed validation.
    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),
    /// A warning the host escalated into an error.
    #[error("{0}")]
    Warning(String),
    /// A queue asked to suspend on bad host health in a session that does
    /// not monitor it.
    #[error(
        "Queues cannot use suspends_on_bad_host_health if host health monitoring was \
         disabled when the Session was created"
    )]
    HostHealthNotMonitored,
    /// A native log bridge is already registered for this process.
    #[error("native log bridge already installed")]
    AlreadyInstalled,
}

impl SessionError {
    /// Native result code carried by broker failures.
    pub fn result_code(&self) -> Option<i32> {
        match self {
            SessionError::BrokerTimeout { code, .. }
            | SessionError::GenericFailure { code, .. }
            | SessionError::MessageConstruction { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the native call timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SessionError::BrokerTimeout { .. })
    }
}

pub use client::{
    BrokerConnector, BrokerSession, CorrelationId, MessageGuid, QueueFlags, QueueId,
    QueueOptions, SessionOptions,
};
pub use codes::{ResultCode, UNKNOWN_NAME};
pub use dispatcher::EventDispatcher;
pub use events::{
    AckRecord, AckStatus, ReceivedMessage, SessionEventRecord, SessionNotice, SessionNotification,
};
pub use health::{HealthSubscription, HostHealthMonitor, HostHealthState};
pub use host::{HostCallbacks, HostDiagnostics, TracingDiagnostics};
pub use metrics::BridgeMetrics;
pub use native_log::{NativeLogBridge, NativeLogGuard, NativeLogRecord, NativeSeverity};
pub use properties::{HostValue, PropertyError, PropertySet, PropertyTag};
pub use runtime::{AcquireGuard, HostRuntime, ReleaseGuard};
pub use session::{PostFailure, Session, SessionBuilder};
