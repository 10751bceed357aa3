//! ---
//! bmq_section: "02-host-bridge-core"
//! bmq_subsection: "module"
//! bmq_type: "source"
//! bmq_scope: "code"
//! bmq_description: "Host-facing records delivered by the event dispatcher."
//! bmq_version: "v0.0.0-prealpha"
//! bmq_owner: "tbd"
//! ---
use bytes::Bytes;

use crate::client::{CorrelationId, MessageGuid};
use crate::codes::{AckResult, ResultCode, SessionEventType};
use crate::properties::PropertySet;

/// Session event as handed to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEventRecord {
    pub event_type: i32,
    pub event_name: &'static str,
    pub status_code: i32,
    pub status_name: &'static str,
    pub description: String,
    /// Empty unless the event type names a queue.
    pub queue_uri: String,
}

/// Payload of the session-level callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotification {
    Event(SessionEventRecord),
    /// Out-of-band report produced by the bridge itself.
    Diagnostic(String),
}

/// One pushed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub payload: Bytes,
    pub guid: MessageGuid,
    pub queue_uri: String,
    pub properties: PropertySet,
}

/// One acknowledgement of an earlier post.
#[derive(Debug, Clone)]
pub struct AckRecord {
    pub status: i32,
    pub status_name: &'static str,
    /// Present only for successful acknowledgements.
    pub guid: Option<MessageGuid>,
    pub queue_uri: String,
    pub correlation: Option<CorrelationId>,
}

/// Host-level meaning of a session notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    Connected(Option<String>),
    Disconnected(Option<String>),
    ConnectionLost(Option<String>),
    Reconnected(Option<String>),
    StateRestored(Option<String>),
    ConnectionTimeout(Option<String>),
    HostUnhealthy(Option<String>),
    HostHealthRestored(Option<String>),
    SlowConsumerNormal(Option<String>),
    SlowConsumerHighWatermark(Option<String>),
    QueueReopened { queue_uri: String },
    QueueReopenFailed { queue_uri: String, message: String },
    QueueSuspended { queue_uri: String },
    QueueSuspendFailed { queue_uri: String, message: String },
    QueueResumed { queue_uri: String },
    QueueResumeFailed { queue_uri: String, message: String },
    InterfaceError(String),
}

impl SessionNotice {
    pub fn classify(notification: &SessionNotification) -> SessionNotice {
        let record = match notification {
            SessionNotification::Diagnostic(text) => {
                return SessionNotice::InterfaceError(text.clone())
            }
            SessionNotification::Event(record) => record,
        };

        let message = (record.status_code != 0).then(|| {
            let separator = if record.description.is_empty() { "" } else { ": " };
            format!(
                "{}{}{} ({})",
                record.description, separator, record.status_name, record.status_code
            )
        });
        let queue_event = |ok: fn(String) -> SessionNotice,
                           failed: fn(String, String) -> SessionNotice,
                           message: Option<String>| match message {
            None => ok(record.queue_uri.clone()),
            Some(text) => failed(record.queue_uri.clone(), text),
        };

        match SessionEventType::from_code(record.event_type) {
            Some(SessionEventType::Connected) => SessionNotice::Connected(message),
            Some(SessionEventType::Disconnected) => SessionNotice::Disconnected(message),
            Some(SessionEventType::ConnectionLost) => SessionNotice::ConnectionLost(message),
            Some(SessionEventType::Reconnected) => SessionNotice::Reconnected(message),
            Some(SessionEventType::StateRestored) => SessionNotice::StateRestored(message),
            Some(SessionEventType::ConnectionTimeout) => SessionNotice::ConnectionTimeout(message),
            Some(SessionEventType::HostUnhealthy) => SessionNotice::HostUnhealthy(message),
            Some(SessionEventType::HostHealthRestored) => {
                SessionNotice::HostHealthRestored(message)
            }
            Some(SessionEventType::SlowConsumerNormal) => {
                SessionNotice::SlowConsumerNormal(message)
            }
            Some(SessionEventType::SlowConsumerHighWatermark) => {
                SessionNotice::SlowConsumerHighWatermark(message)
            }
            Some(SessionEventType::QueueReopenResult) => queue_event(
                |queue_uri| SessionNotice::QueueReopened { queue_uri },
                |queue_uri, message| SessionNotice::QueueReopenFailed { queue_uri, message },
                message,
            ),
            Some(SessionEventType::QueueSuspended) => queue_event(
                |queue_uri| SessionNotice::QueueSuspended { queue_uri },
                |queue_uri, message| SessionNotice::QueueSuspendFailed { queue_uri, message },
                message,
            ),
            Some(SessionEventType::QueueResumed) => queue_event(
                |queue_uri| SessionNotice::QueueResumed { queue_uri },
                |queue_uri, message| SessionNotice::QueueResumeFailed { queue_uri, message },
                message,
            ),
            _ => SessionNotice::InterfaceError(format!(
                "Unexpected event type: {}",
                record.event_name
            )),
        }
    }
}

/// Host-level outcome of an acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckStatus {
    Success,
    Unknown,
    Timeout,
    NotConnected,
    Canceled,
    NotSupported,
    Refused,
    InvalidArgument,
    NotReady,
    LimitBytes,
    LimitMessages,
    StorageFailure,
    /// A code the bridge does not know.
    Unrecognized,
}

impl AckStatus {
    pub fn from_code(code: i32) -> AckStatus {
        match AckResult::from_code(code) {
            Some(AckResult::Success) => AckStatus::Success,
            Some(AckResult::Unknown) => AckStatus::Unknown,
            Some(AckResult::Timeout) => AckStatus::Timeout,
            Some(AckResult::NotConnected) => AckStatus::NotConnected,
            Some(AckResult::Canceled) => AckStatus::Canceled,
            Some(AckResult::NotSupported) => AckStatus::NotSupported,
            Some(AckResult::Refused) => AckStatus::Refused,
            Some(AckResult::InvalidArgument) => AckStatus::InvalidArgument,
            Some(AckResult::NotReady) => AckStatus::NotReady,
            Some(AckResult::LimitBytes) => AckStatus::LimitBytes,
            Some(AckResult::LimitMessages) => AckStatus::LimitMessages,
            Some(AckResult::StorageFailure) => AckStatus::StorageFailure,
            None => AckStatus::Unrecognized,
        }
    }
}

impl AckRecord {
    pub fn ack_status(&self) -> AckStatus {
        AckStatus::from_code(self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::{self, GenericResult};

    fn record(event_type: SessionEventType, status: i32, uri: &str) -> SessionNotification {
        SessionNotification::Event(SessionEventRecord {
            event_type: event_type.code(),
            event_name: event_type.name(),
            status_code: status,
            status_name: codes::name::<GenericResult>(status),
            description: if status == 0 { String::new() } else { "boom".into() },
            queue_uri: uri.into(),
        })
    }

    #[test]
    fn successful_events_carry_no_message() {
        assert_eq!(
            SessionNotice::classify(&record(SessionEventType::Connected, 0, "")),
            SessionNotice::Connected(None)
        );
        assert_eq!(
            SessionNotice::classify(&record(SessionEventType::QueueResumed, 0, "bmq://q")),
            SessionNotice::QueueResumed {
                queue_uri: "bmq://q".into()
            }
        );
    }

    #[test]
    fn failed_queue_events_switch_variant() {
        assert_eq!(
            SessionNotice::classify(&record(SessionEventType::QueueReopenResult, -2, "bmq://q")),
            SessionNotice::QueueReopenFailed {
                queue_uri: "bmq://q".into(),
                message: "boom: TIMEOUT (-2)".into()
            }
        );
        assert_eq!(
            SessionNotice::classify(&record(SessionEventType::Disconnected, -3, "")),
            SessionNotice::Disconnected(Some("boom: NOT_CONNECTED (-3)".into()))
        );
    }

    #[test]
    fn unexpected_types_and_diagnostics_are_interface_errors() {
        assert_eq!(
            SessionNotice::classify(&record(SessionEventType::Error, 0, "")),
            SessionNotice::InterfaceError("Unexpected event type: ERROR".into())
        );
        assert_eq!(
            SessionNotice::classify(&SessionNotification::Diagnostic("bad prop".into())),
            SessionNotice::InterfaceError("bad prop".into())
        );
    }

    #[test]
    fn ack_codes_fall_back_to_unrecognized() {
        assert_eq!(AckStatus::from_code(-101), AckStatus::LimitBytes);
        assert_eq!(AckStatus::from_code(-102), AckStatus::Unrecognized);
        assert_eq!(AckStatus::from_code(0), AckStatus::Success);
    }
}
