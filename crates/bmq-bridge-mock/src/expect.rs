//! ---
//! bmq_section: "03-mock-replay-harness"
//! bmq_subsection: "module"
//! bmq_type: "source"
//! bmq_scope: "code"
//! bmq_description: "Ordered expectations asserted against calls reaching the mock session."
//! bmq_version: "v0.0.0-prealpha"
//! bmq_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::time::Duration;

use bmq_bridge::client::{MessageEvent, MessageGuid, QueueFlags, QueueOptions};
use bmq_bridge::properties;
use bmq_bridge::PropertySet;
use bmq_bridge_common::CompressionAlgorithm;
use bytes::Bytes;
use parking_lot::Mutex;

/// A call on the mock session together with the arguments it carried.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Start {
        timeout: Duration,
    },
    Stop,
    OpenQueueSync {
        uri: String,
        flags: QueueFlags,
        options: QueueOptions,
        timeout: Duration,
    },
    ConfigureQueueSync {
        uri: String,
        options: QueueOptions,
        timeout: Duration,
    },
    CloseQueueSync {
        uri: String,
        timeout: Duration,
    },
    /// Queue closed by the mock itself right after it was resolved.
    CloseOnGet {
        uri: String,
    },
    /// First message of a posted event.
    Post {
        queue_uri: String,
        payload: Bytes,
        properties: PropertySet,
        compression: CompressionAlgorithm,
    },
    ConfirmMessage {
        queue_uri: String,
        guid: MessageGuid,
    },
}

impl MockCall {
    pub fn name(&self) -> &'static str {
        match self {
            MockCall::Start { .. } => "start",
            MockCall::Stop => "stop",
            MockCall::OpenQueueSync { .. } => "openQueueSync",
            MockCall::ConfigureQueueSync { .. } => "configureQueueSync",
            MockCall::CloseQueueSync { .. } | MockCall::CloseOnGet { .. } => "closeQueueSync",
            MockCall::Post { .. } => "post",
            MockCall::ConfirmMessage { .. } => "confirmMessage",
        }
    }

    /// Describe a posted event by its first message. Undecodable properties
    /// are left out.
    pub fn post(event: &MessageEvent) -> MockCall {
        match event.messages.first() {
            Some(message) => MockCall::Post {
                queue_uri: message.queue.uri().to_owned(),
                payload: message.payload.clone(),
                properties: message
                    .properties
                    .as_ref()
                    .map(|wire| properties::decode(wire).0)
                    .unwrap_or_default(),
                compression: message.compression,
            },
            None => MockCall::Post {
                queue_uri: String::new(),
                payload: Bytes::new(),
                properties: PropertySet::new(),
                compression: CompressionAlgorithm::None,
            },
        }
    }
}

/// How arriving calls are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpectationMode {
    /// Every call sets its own expectation just before it arrives.
    #[default]
    Auto,
    /// Calls must match expectations declared up front, in order.
    Strict,
}

/// FIFO of expected calls. Any mismatch or exhaustion panics.
#[derive(Debug, Default)]
pub struct ExpectedCallQueue {
    mode: ExpectationMode,
    pending: Mutex<VecDeque<MockCall>>,
    history: Mutex<Vec<MockCall>>,
}

impl ExpectedCallQueue {
    pub fn auto() -> Self {
        Self::default()
    }

    pub fn strict() -> Self {
        Self {
            mode: ExpectationMode::Strict,
            ..Self::default()
        }
    }

    pub fn mode(&self) -> ExpectationMode {
        self.mode
    }

    /// Declare the next call the session must receive.
    pub fn expect(&self, call: MockCall) -> &Self {
        self.pending.lock().push_back(call);
        self
    }

    /// Consume the head expectation for `call`.
    pub fn observe(&self, call: MockCall) {
        if self.mode == ExpectationMode::Auto {
            self.pending.lock().push_back(call.clone());
        }
        let head = self.pending.lock().pop_front();
        match head {
            Some(expected) if expected == call => {
                tracing::trace!(call = call.name(), "expected call observed");
                self.history.lock().push(call);
            }
            Some(expected) => panic!(
                "unexpected {} call: expected {expected:?}, got {call:?}",
                call.name()
            ),
            None => panic!("unexpected {} call with no expectation left: {call:?}", call.name()),
        }
    }

    /// Calls observed so far, oldest first.
    pub fn history(&self) -> Vec<MockCall> {
        self.history.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.pending.lock().len()
    }

    /// Panic if declared expectations were never met.
    pub fn assert_satisfied(&self) {
        let pending = self.pending.lock();
        assert!(pending.is_empty(), "expected calls never arrived: {:?}", *pending);
    }
}
