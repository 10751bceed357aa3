//! ---
//! bmq_section: "03-mock-replay-harness"
//! bmq_subsection: "module"
//! bmq_type: "source"
//! bmq_scope: "code"
//! bmq_description: "Host-side hooks deciding the results and scripted events of mock calls."
//! bmq_version: "v0.0.0-prealpha"
//! bmq_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bmq_bridge::client::{MessageGuid, QueueFlags, QueueOptions, SessionOptions};
use parking_lot::Mutex;

use crate::expect::MockCall;
use crate::script::{ScriptedAck, ScriptedEvents, ScriptedPush};

/// Decisions the mock session delegates to the test.
///
/// Every method runs with host-exclusive execution held. Result-returning
/// methods give the native result code of the call.
pub trait MockHooks: Send + Sync {
    /// Effective options the session was created with.
    fn session_created(&self, options: &SessionOptions);

    fn start(&self, timeout: Duration) -> i32;
    fn stop(&self);
    fn open_queue_sync(
        &self,
        uri: &str,
        flags: QueueFlags,
        options: &QueueOptions,
        timeout: Duration,
    ) -> i32;
    fn configure_queue_sync(&self, uri: &str, options: &QueueOptions, timeout: Duration) -> i32;
    fn close_queue_sync(&self, uri: &str, timeout: Duration) -> i32;
    fn post(&self, call: &MockCall) -> i32;
    fn confirm_message(&self, queue_uri: &str, guid: &MessageGuid) -> i32;

    /// Close every queue as soon as it is resolved by URI.
    fn close_on_get(&self) -> bool {
        false
    }

    fn next_push_batch(&self) -> Option<Vec<ScriptedPush>> {
        None
    }

    fn next_ack_batch(&self) -> Option<Vec<ScriptedAck>> {
        None
    }
}

/// Native result codes returned by [`ScriptedMock`], all zero by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReturnCodes {
    pub start: i32,
    pub open_queue: i32,
    pub configure_queue: i32,
    pub close_queue: i32,
    pub post: i32,
    pub confirm: i32,
}

/// Hooks that record every call and answer from fixed return codes and a
/// script of pending events.
#[derive(Debug, Default)]
pub struct ScriptedMock {
    codes: Mutex<ReturnCodes>,
    calls: Mutex<Vec<MockCall>>,
    options: Mutex<Option<SessionOptions>>,
    close_on_get: AtomicBool,
    events: Mutex<ScriptedEvents>,
}

impl ScriptedMock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: ScriptedEvents) -> Self {
        Self {
            events: Mutex::new(events),
            ..Self::default()
        }
    }

    pub fn set_codes(&self, codes: ReturnCodes) {
        *self.codes.lock() = codes;
    }

    pub fn update_codes(&self, update: impl FnOnce(&mut ReturnCodes)) {
        update(&mut self.codes.lock());
    }

    pub fn set_close_on_get(&self, enabled: bool) {
        self.close_on_get.store(enabled, Ordering::Release);
    }

    pub fn enqueue_push(&self, batch: Vec<ScriptedPush>) {
        self.events.lock().enqueue_push(batch);
    }

    pub fn enqueue_ack(&self, batch: Vec<ScriptedAck>) {
        self.events.lock().enqueue_ack(batch);
    }

    pub fn extend_events(&self, events: ScriptedEvents) {
        self.events.lock().extend(events);
    }

    pub fn pending_push(&self) -> usize {
        self.events.lock().pending_push()
    }

    pub fn pending_ack(&self) -> usize {
        self.events.lock().pending_ack()
    }

    /// Calls the hooks saw, oldest first.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn recorded_options(&self) -> Option<SessionOptions> {
        self.options.lock().clone()
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().push(call);
    }
}

impl MockHooks for ScriptedMock {
    fn session_created(&self, options: &SessionOptions) {
        *self.options.lock() = Some(options.clone());
    }

    fn start(&self, timeout: Duration) -> i32 {
        self.record(MockCall::Start { timeout });
        self.codes.lock().start
    }

    fn stop(&self) {
        self.record(MockCall::Stop);
    }

    fn open_queue_sync(
        &self,
        uri: &str,
        flags: QueueFlags,
        options: &QueueOptions,
        timeout: Duration,
    ) -> i32 {
        self.record(MockCall::OpenQueueSync {
            uri: uri.to_owned(),
            flags,
            options: *options,
            timeout,
        });
        self.codes.lock().open_queue
    }

    fn configure_queue_sync(&self, uri: &str, options: &QueueOptions, timeout: Duration) -> i32 {
        self.record(MockCall::ConfigureQueueSync {
            uri: uri.to_owned(),
            options: *options,
            timeout,
        });
        self.codes.lock().configure_queue
    }

    fn close_queue_sync(&self, uri: &str, timeout: Duration) -> i32 {
        self.record(MockCall::CloseQueueSync {
            uri: uri.to_owned(),
            timeout,
        });
        self.codes.lock().close_queue
    }

    fn post(&self, call: &MockCall) -> i32 {
        self.record(call.clone());
        self.codes.lock().post
    }

    fn confirm_message(&self, queue_uri: &str, guid: &MessageGuid) -> i32 {
        self.record(MockCall::ConfirmMessage {
            queue_uri: queue_uri.to_owned(),
            guid: *guid,
        });
        self.codes.lock().confirm
    }

    fn close_on_get(&self) -> bool {
        self.close_on_get.load(Ordering::Acquire)
    }

    fn next_push_batch(&self) -> Option<Vec<ScriptedPush>> {
        self.events.lock().pop_push()
    }

    fn next_ack_batch(&self) -> Option<Vec<ScriptedAck>> {
        self.events.lock().pop_ack()
    }
}
