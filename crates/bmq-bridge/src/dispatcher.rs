//! ---
//! bmq_section: "02-host-bridge-core"
//! bmq_subsection: "module"
//! bmq_type: "source"
//! bmq_scope: "code"
//! bmq_description: "Translation of native events into host callback invocations."
//! bmq_version: "v0.0.0-prealpha"
//! bmq_owner: "tbd"
//! ---
//! Delivery of native events to host callbacks.
//!
//! Every entry point runs on a native worker thread. It takes host-exclusive
//! execution first and never lets a host failure unwind back into the client.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, trace};

use crate::client::{MessageEvent, SessionEvent, SessionEventHandler};
use crate::codes::{
    self, AckResult, GenericResult, MessageEventType, ResultCode, SessionEventType,
};
use crate::events::{AckRecord, ReceivedMessage, SessionEventRecord, SessionNotification};
use crate::host::{panic_message, HostCallbacks, HostDiagnostics};
use crate::metrics::BridgeMetrics;
use crate::properties::{self, PropertySet};
use crate::runtime::HostRuntime;

thread_local! {
    static DELIVERY_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Whether the current thread is inside a host callback.
pub fn is_delivering() -> bool {
    DELIVERY_DEPTH.with(|depth| depth.get() > 0)
}

struct Delivering;

impl Delivering {
    fn enter() -> Self {
        DELIVERY_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Delivering
    }
}

impl Drop for Delivering {
    fn drop(&mut self) {
        DELIVERY_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

pub struct EventDispatcher {
    runtime: Arc<HostRuntime>,
    callbacks: HostCallbacks,
    diagnostics: Arc<dyn HostDiagnostics>,
    metrics: Option<BridgeMetrics>,
}

impl EventDispatcher {
    pub fn new(
        runtime: Arc<HostRuntime>,
        callbacks: HostCallbacks,
        diagnostics: Arc<dyn HostDiagnostics>,
        metrics: Option<BridgeMetrics>,
    ) -> Self {
        Self {
            runtime,
            callbacks,
            diagnostics,
            metrics,
        }
    }

    fn invoke<F>(&self, context: &'static str, callback: F)
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        let delivering = Delivering::enter();
        let outcome = panic::catch_unwind(AssertUnwindSafe(callback));
        drop(delivering);
        let failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err,
            Err(payload) => anyhow!("callback panicked: {}", panic_message(payload.as_ref())),
        };
        if let Some(metrics) = &self.metrics {
            metrics.observe_callback_failure();
        }
        self.diagnostics.print_unhandled(context, &failure);
    }

    fn notify(&self, notification: SessionNotification) {
        self.invoke("session event callback", || {
            (self.callbacks.on_session_event)(notification)
        });
    }

    fn deliver_messages(&self, event: &MessageEvent) {
        let mut errors = Vec::new();
        let messages: Vec<ReceivedMessage> = event
            .messages
            .iter()
            .map(|message| {
                let properties = match &message.properties {
                    Some(wire) => {
                        let (decoded, skipped) = properties::decode(wire);
                        errors.extend(skipped);
                        decoded
                    }
                    None => PropertySet::new(),
                };
                ReceivedMessage {
                    payload: message.payload.clone(),
                    guid: message.guid,
                    queue_uri: message.queue.uri().to_owned(),
                    properties,
                }
            })
            .collect();

        if !errors.is_empty() {
            if let Some(metrics) = &self.metrics {
                metrics.observe_decode_errors(errors.len());
            }
            let report: String = errors.iter().map(|err| format!("{err}\n")).collect();
            self.notify(SessionNotification::Diagnostic(report));
        }

        if let Some(metrics) = &self.metrics {
            metrics.observe_pushed(messages.len());
        }
        trace!(count = messages.len(), "delivering pushed messages");
        self.invoke("message callback", || (self.callbacks.on_message)(messages));
    }

    fn deliver_acks(&self, event: &MessageEvent) {
        let mut acks = Vec::with_capacity(event.messages.len());
        for message in &event.messages {
            let status = message.ack_status;
            if status != AckResult::Success as i32 && message.correlation.is_none() {
                // Broker-initiated NACK; the client already logs these.
                debug!(
                    queue_uri = %message.queue.uri(),
                    status = codes::name::<AckResult>(status),
                    "skipping uncorrelated negative acknowledgement"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.observe_nack_suppressed();
                }
                continue;
            }
            acks.push(AckRecord {
                status,
                status_name: codes::name::<AckResult>(status),
                guid: (status == AckResult::Success as i32).then_some(message.guid),
                queue_uri: message.queue.uri().to_owned(),
                correlation: message.correlation.clone(),
            });
        }
        if acks.is_empty() {
            return;
        }
        if let Some(metrics) = &self.metrics {
            for _ in &acks {
                metrics.observe_ack();
            }
        }
        self.invoke("ack callback", || (self.callbacks.on_ack)(acks));
    }
}

impl SessionEventHandler for EventDispatcher {
    fn on_session_event(&self, event: &SessionEvent) {
        let _host = self.runtime.acquire();
        let carries_queue = SessionEventType::from_code(event.event_type)
            .map(SessionEventType::carries_queue)
            .unwrap_or(false);
        let queue_uri = match (&event.queue, carries_queue) {
            (Some(queue), true) => queue.uri().to_owned(),
            _ => String::new(),
        };
        let record = SessionEventRecord {
            event_type: event.event_type,
            event_name: codes::name::<SessionEventType>(event.event_type),
            status_code: event.status_code,
            status_name: codes::name::<GenericResult>(event.status_code),
            description: event.description.clone(),
            queue_uri,
        };
        debug!(
            event_type = record.event_name,
            status = record.status_name,
            queue_uri = %record.queue_uri,
            "session event"
        );
        self.notify(SessionNotification::Event(record));
    }

    fn on_message_event(&self, event: &MessageEvent) {
        let _host = self.runtime.acquire();
        match MessageEventType::from_code(event.event_type) {
            Some(MessageEventType::Push) => self.deliver_messages(event),
            Some(MessageEventType::Ack) => self.deliver_acks(event),
            _ => self.notify(SessionNotification::Diagnostic(format!(
                "Received an unexpected message event of type {} ({})",
                event.event_type,
                codes::name::<MessageEventType>(event.event_type)
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{CorrelationId, Message, MessageGuid, QueueFlags, QueueId, QueueOptions};
    use crate::properties::{HostValue, MessageProperties, WireValue};
    use bytes::Bytes;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Seen {
        notifications: Mutex<Vec<SessionNotification>>,
        messages: Mutex<Vec<ReceivedMessage>>,
        acks: Mutex<Vec<AckRecord>>,
        unhandled: Mutex<Vec<String>>,
    }

    struct Recording(Arc<Seen>);

    impl HostDiagnostics for Recording {
        fn warn(&self, _message: &str) -> Result<(), crate::SessionError> {
            Ok(())
        }

        fn print_unhandled(&self, context: &str, error: &anyhow::Error) {
            self.0.unhandled.lock().push(format!("{context}: {error}"));
        }
    }

    fn dispatcher(seen: &Arc<Seen>) -> EventDispatcher {
        let (s, m, a) = (seen.clone(), seen.clone(), seen.clone());
        EventDispatcher::new(
            HostRuntime::new(),
            HostCallbacks::new(
                move |n| {
                    s.notifications.lock().push(n);
                    Ok(())
                },
                move |batch| {
                    m.messages.lock().extend(batch);
                    Ok(())
                },
                move |batch| {
                    a.acks.lock().extend(batch);
                    Ok(())
                },
            ),
            Arc::new(Recording(seen.clone())),
            None,
        )
    }

    fn queue(uri: &str) -> QueueId {
        QueueId::new(uri, QueueFlags::READ | QueueFlags::WRITE, QueueOptions::default())
    }

    #[test]
    fn queue_uri_only_for_queue_events() {
        let seen = Arc::new(Seen::default());
        let dispatcher = dispatcher(&seen);
        for event_type in [SessionEventType::Connected, SessionEventType::QueueSuspended] {
            dispatcher.on_session_event(&SessionEvent {
                event_type: event_type as i32,
                status_code: 0,
                description: String::new(),
                queue: Some(queue("bmq://d/q")),
            });
        }
        let uris: Vec<_> = seen
            .notifications
            .lock()
            .iter()
            .map(|n| match n {
                SessionNotification::Event(record) => record.queue_uri.clone(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(uris, vec![String::new(), "bmq://d/q".to_owned()]);
    }

    #[test]
    fn decode_errors_are_reported_without_dropping_messages() {
        let seen = Arc::new(Seen::default());
        let dispatcher = dispatcher(&seen);
        let mut wire = MessageProperties::new();
        wire.set_as_int64(b"n", 7);
        wire.set_raw(b"odd", WireValue::Unrecognized { type_code: 42 });
        let event = MessageEvent::push(vec![Message::push(
            queue("bmq://d/q"),
            MessageGuid::default(),
            Bytes::from_static(b"body"),
            Some(wire),
        )]);

        dispatcher.on_message_event(&event);

        let messages = seen.messages.lock();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].properties.get(b"n").map(|p| &p.0), Some(&HostValue::Int(7)));
        assert_eq!(
            *seen.notifications.lock(),
            vec![SessionNotification::Diagnostic(
                "'odd' property type is unrecognized, type 42 received.\n".into()
            )]
        );
    }

    #[test]
    fn uncorrelated_nacks_are_suppressed() {
        let seen = Arc::new(Seen::default());
        let dispatcher = dispatcher(&seen);
        let token = CorrelationId::new(1u32);
        let guid = MessageGuid::from_bytes([9; 16]);
        let event = MessageEvent::ack(vec![
            Message::ack(queue("bmq://d/q"), guid, AckResult::Unknown as i32, None),
            Message::ack(queue("bmq://d/q"), guid, AckResult::Refused as i32, Some(token.clone())),
            Message::ack(queue("bmq://d/q"), guid, 0, Some(token.clone())),
        ]);

        dispatcher.on_message_event(&event);

        let acks = seen.acks.lock();
        assert_eq!(acks.len(), 2);
        assert_eq!(acks[0].status_name, "REFUSED");
        assert_eq!(acks[0].guid, None);
        assert_eq!(acks[1].guid, Some(guid));
        assert!(acks[1].correlation.as_ref().is_some_and(|c| c.ptr_eq(&token)));
    }

    #[test]
    fn unexpected_event_type_is_reported() {
        let seen = Arc::new(Seen::default());
        let dispatcher = dispatcher(&seen);
        dispatcher.on_message_event(&MessageEvent::new(MessageEventType::Put as i32, Vec::new()));
        assert_eq!(
            *seen.notifications.lock(),
            vec![SessionNotification::Diagnostic(
                "Received an unexpected message event of type 2 (PUT)".into()
            )]
        );
    }

    #[test]
    fn failing_callbacks_are_printed_and_swallowed() {
        let seen = Arc::new(Seen::default());
        let dispatcher = EventDispatcher::new(
            HostRuntime::new(),
            HostCallbacks::new(
                |_| Err(anyhow!("session handler failed")),
                |_| panic!("message handler exploded"),
                |_| Ok(()),
            ),
            Arc::new(Recording(seen.clone())),
            None,
        );
        dispatcher.on_session_event(&SessionEvent {
            event_type: SessionEventType::Connected as i32,
            status_code: 0,
            description: String::new(),
            queue: None,
        });
        dispatcher.on_message_event(&MessageEvent::push(Vec::new()));

        let unhandled = seen.unhandled.lock();
        assert_eq!(
            *unhandled,
            vec![
                "session event callback: session handler failed".to_owned(),
                "message callback: callback panicked: message handler exploded".to_owned(),
            ]
        );
        assert!(!dispatcher.runtime.is_held_by_current_thread());
        assert!(!is_delivering());
    }

    #[test]
    fn callbacks_run_marked_as_delivering() {
        let observed = Arc::new(Mutex::new(Vec::new()));
        let inside = observed.clone();
        let seen = Arc::new(Seen::default());
        let dispatcher = EventDispatcher::new(
            HostRuntime::new(),
            HostCallbacks::new(
                move |_| {
                    inside.lock().push(is_delivering());
                    Ok(())
                },
                |_| Ok(()),
                |_| Ok(()),
            ),
            Arc::new(Recording(seen)),
            None,
        );
        assert!(!is_delivering());
        dispatcher.on_session_event(&SessionEvent {
            event_type: SessionEventType::HostUnhealthy as i32,
            status_code: 0,
            description: String::new(),
            queue: None,
        });
        assert_eq!(*observed.lock(), vec![true]);
        assert!(!is_delivering());
    }
}
