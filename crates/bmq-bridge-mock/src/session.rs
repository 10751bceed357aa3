//! ---
//! bmq_section: "03-mock-replay-harness"
//! bmq_subsection: "module"
//! bmq_type: "source"
//! bmq_scope: "code"
//! bmq_description: "Native session stand-in that checks expectations and replays scripted events."
//! bmq_version: "v0.0.0-prealpha"
//! bmq_owner: "tbd"
//! ---
//! Mock native session.
//!
//! Every supported call runs the same sequence: the call is checked against
//! the expectation queue, the reference session updates its bookkeeping,
//! host-exclusive execution is taken and the hooks decide the result code.
//! Opening a queue then emits at most one scripted push batch and posting
//! emits at most one scripted ack batch, both before the call returns.
//!
//! Calls the mock does not model panic, as do scripted events naming a queue
//! that is not open.
//!
//! When the session options carry a host health monitor, the mock follows it
//! for as long as the session is started: an unhealthy host yields
//! `HOST_UNHEALTHY` followed by `QUEUE_SUSPENDED` for every queue opened with
//! `suspends_on_bad_host_health`, and recovery yields `QUEUE_RESUMED` for those
//! queues followed by `HOST_HEALTH_RESTORED`.

use std::sync::Arc;
use std::time::Duration;

use bmq_bridge::client::{
    BrokerConnector, BrokerSession, ConfirmCookie, CorrelationId, Message, MessageEvent,
    NativeEvent, PostRejected, QueueFlags, QueueId, QueueOptions, QueueStatus, SessionEvent,
    SessionEventHandler, SessionOptions,
};
use bmq_bridge::codes::{
    self, CloseQueueResult, ConfigureQueueResult, GenericResult, OpenQueueResult, ResultCode,
    SessionEventType,
};
use bmq_bridge::{HealthSubscription, HostHealthMonitor, HostHealthState, HostRuntime};
use parking_lot::Mutex;
use tracing::debug;

use crate::expect::{ExpectedCallQueue, MockCall};
use crate::hooks::MockHooks;
use crate::reference::ReferenceSession;
use crate::script::{ScriptedAck, ScriptedCorrelation, ScriptedPush};

fn not_implemented(method: &str) -> ! {
    panic!("mock method not implemented: {method}")
}

// The reference lock is never held while the handler runs: handlers may
// call back in.
fn deliver(
    reference: &Mutex<ReferenceSession>,
    handler: &Arc<dyn SessionEventHandler>,
    event: NativeEvent,
) {
    reference.lock().enqueue_event(event);
    let next = reference.lock().next_pending_event();
    match next {
        Some(NativeEvent::Message(event)) => handler.on_message_event(&event),
        Some(NativeEvent::Session(event)) => handler.on_session_event(&event),
        None => panic!("Failed to emit event"),
    }
}

fn health_event(event_type: SessionEventType, queue: Option<QueueId>) -> NativeEvent {
    NativeEvent::Session(SessionEvent {
        event_type: event_type.code(),
        status_code: 0,
        description: String::new(),
        queue,
    })
}

fn report_host_health(
    reference: &Mutex<ReferenceSession>,
    handler: &Arc<dyn SessionEventHandler>,
    runtime: &HostRuntime,
    health: HostHealthState,
) {
    let affected = {
        let mut reference = reference.lock();
        let affected = reference.set_host_health(health);
        if !reference.is_started() {
            return;
        }
        affected
    };
    debug!(host_health = %health, queues = affected.len(), "reporting host health");
    let _host = runtime.acquire();
    match health {
        HostHealthState::Unhealthy => {
            deliver(reference, handler, health_event(SessionEventType::HostUnhealthy, None));
            for queue in affected {
                deliver(
                    reference,
                    handler,
                    health_event(SessionEventType::QueueSuspended, Some(queue)),
                );
            }
        }
        HostHealthState::Healthy => {
            for queue in affected {
                deliver(
                    reference,
                    handler,
                    health_event(SessionEventType::QueueResumed, Some(queue)),
                );
            }
            deliver(reference, handler, health_event(SessionEventType::HostHealthRestored, None));
        }
    }
}

pub struct MockSession {
    hooks: Arc<dyn MockHooks>,
    expected: Arc<ExpectedCallQueue>,
    reference: Arc<Mutex<ReferenceSession>>,
    handler: Arc<dyn SessionEventHandler>,
    runtime: Arc<HostRuntime>,
    _health: Option<HealthSubscription>,
}

impl MockSession {
    pub fn new(
        hooks: Arc<dyn MockHooks>,
        expected: Arc<ExpectedCallQueue>,
        handler: Arc<dyn SessionEventHandler>,
        runtime: Arc<HostRuntime>,
    ) -> Self {
        Self {
            hooks,
            expected,
            reference: Arc::new(Mutex::new(ReferenceSession::new())),
            handler,
            runtime,
            _health: None,
        }
    }

    /// Follow `monitor` until the session is dropped.
    pub fn watch_host_health(mut self, monitor: &HostHealthMonitor) -> Self {
        self.reference.lock().set_host_health(monitor.state());
        let reference = Arc::clone(&self.reference);
        let handler = Arc::clone(&self.handler);
        let runtime = Arc::clone(&self.runtime);
        self._health = Some(monitor.subscribe(move |health| {
            report_host_health(&reference, &handler, &runtime, health);
        }));
        self
    }

    /// URIs of the queues the reference session holds open.
    pub fn open_queues(&self) -> Vec<String> {
        self.reference.lock().open_queues()
    }

    fn queue(&self, uri: &str) -> QueueId {
        self.reference
            .lock()
            .get_queue_id(uri)
            .unwrap_or_else(|| panic!("Failed to get queue {uri}"))
    }

    fn emit(&self, event: MessageEvent) {
        deliver(&self.reference, &self.handler, NativeEvent::Message(event));
    }

    fn emit_push(&self, batch: Vec<ScriptedPush>) {
        let messages = batch
            .into_iter()
            .map(|push| {
                let properties = push
                    .encoded_properties()
                    .unwrap_or_else(|err| panic!("Failed to encode scripted properties: {err}"));
                Message::push(self.queue(&push.queue_uri), push.guid, push.payload, Some(properties))
            })
            .collect::<Vec<_>>();
        debug!(messages = messages.len(), "emitting scripted push batch");
        self.emit(MessageEvent::push(messages));
    }

    /// The posted correlation moves into the first ack naming it.
    fn emit_acks(&self, batch: Vec<ScriptedAck>, mut posted: Option<CorrelationId>) {
        let messages = batch
            .into_iter()
            .map(|ack| {
                let correlation = match ack.correlation {
                    ScriptedCorrelation::Posted => posted.take(),
                    ScriptedCorrelation::Handle(handle) => Some(handle),
                    ScriptedCorrelation::Unset => None,
                };
                Message::ack(self.queue(&ack.queue_uri), ack.guid, ack.status, correlation)
            })
            .collect::<Vec<_>>();
        debug!(messages = messages.len(), "emitting scripted ack batch");
        self.emit(MessageEvent::ack(messages));
    }
}

impl std::fmt::Debug for MockSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSession")
            .field("reference", &*self.reference.lock())
            .finish_non_exhaustive()
    }
}

impl BrokerSession for MockSession {
    fn start(&self, timeout: Duration) -> i32 {
        self.expected.observe(MockCall::Start { timeout });
        let rc = self.reference.lock().start();
        let _host = self.runtime.acquire();
        let hooked = self.hooks.start(timeout);
        if hooked != GenericResult::Success.code() {
            self.reference.lock().stop();
            return hooked;
        }
        let unhealthy = !self.reference.lock().host_health().is_healthy();
        if rc == GenericResult::Success.code() && unhealthy {
            deliver(
                &self.reference,
                &self.handler,
                health_event(SessionEventType::HostUnhealthy, None),
            );
        }
        rc
    }

    fn start_async(&self, _timeout: Duration) -> i32 {
        not_implemented("startAsync")
    }

    fn stop(&self) {
        self.expected.observe(MockCall::Stop);
        self.reference.lock().stop();
        let _host = self.runtime.acquire();
        self.hooks.stop();
    }

    fn stop_async(&self) {
        not_implemented("stopAsync")
    }

    fn finalize_stop(&self) {
        not_implemented("finalizeStop")
    }

    fn open_queue_sync(
        &self,
        uri: &str,
        flags: QueueFlags,
        options: &QueueOptions,
        timeout: Duration,
    ) -> QueueStatus {
        self.expected.observe(MockCall::OpenQueueSync {
            uri: uri.to_owned(),
            flags,
            options: *options,
            timeout,
        });
        let status = self.reference.lock().open_queue(uri, flags, *options);
        if status.result != OpenQueueResult::Success.code() {
            return status;
        }

        let _host = self.runtime.acquire();
        let rc = self.hooks.open_queue_sync(uri, flags, options, timeout);
        if rc != OpenQueueResult::Success.code() {
            self.reference.lock().forget_queue(uri);
            return QueueStatus::new(
                status.queue,
                rc,
                format!("mock open rejected with {}", codes::name::<OpenQueueResult>(rc)),
            );
        }
        if let Some(batch) = self.hooks.next_push_batch() {
            self.emit_push(batch);
        }
        status
    }

    fn open_queue_async(
        &self,
        _uri: &str,
        _flags: QueueFlags,
        _options: &QueueOptions,
        _timeout: Duration,
    ) -> i32 {
        not_implemented("openQueueAsync")
    }

    fn configure_queue_sync(
        &self,
        queue: &QueueId,
        options: &QueueOptions,
        timeout: Duration,
    ) -> QueueStatus {
        self.expected.observe(MockCall::ConfigureQueueSync {
            uri: queue.uri().to_owned(),
            options: *options,
            timeout,
        });
        let previous = queue.options();
        let status = self.reference.lock().configure_queue(queue, *options);
        if status.result != ConfigureQueueResult::Success.code() {
            return status;
        }

        let _host = self.runtime.acquire();
        let rc = self.hooks.configure_queue_sync(queue.uri(), options, timeout);
        if rc != ConfigureQueueResult::Success.code() {
            queue.set_options(previous);
            return QueueStatus::new(
                status.queue,
                rc,
                format!("mock configure rejected with {}", codes::name::<ConfigureQueueResult>(rc)),
            );
        }
        status
    }

    fn configure_queue_async(
        &self,
        _queue: &QueueId,
        _options: &QueueOptions,
        _timeout: Duration,
    ) -> i32 {
        not_implemented("configureQueueAsync")
    }

    fn close_queue_sync(&self, queue: &QueueId, timeout: Duration) -> QueueStatus {
        self.expected.observe(MockCall::CloseQueueSync {
            uri: queue.uri().to_owned(),
            timeout,
        });
        let known = self.reference.lock().get_queue_id(queue.uri());
        if !known.is_some_and(|known| known.same_queue(queue)) {
            return QueueStatus::new(
                Some(queue.clone()),
                CloseQueueResult::UnknownQueue.code(),
                "unknown queue",
            );
        }

        let _host = self.runtime.acquire();
        let rc = self.hooks.close_queue_sync(queue.uri(), timeout);
        if rc != CloseQueueResult::Success.code() {
            return QueueStatus::new(
                Some(queue.clone()),
                rc,
                format!("mock close rejected with {}", codes::name::<CloseQueueResult>(rc)),
            );
        }
        self.reference.lock().close_queue(queue)
    }

    fn close_queue_async(&self, _queue: &QueueId, _timeout: Duration) -> i32 {
        not_implemented("closeQueueAsync")
    }

    fn get_queue_id(&self, uri: &str) -> Option<QueueId> {
        let queue = self.reference.lock().get_queue_id(uri)?;
        if self.hooks.close_on_get() {
            self.expected.observe(MockCall::CloseOnGet {
                uri: uri.to_owned(),
            });
            self.reference.lock().close_queue(&queue);
        }
        Some(queue)
    }

    fn get_queue_id_by_correlation(&self, _correlation: &CorrelationId) -> Option<QueueId> {
        not_implemented("getQueueIdByCorrelationId")
    }

    fn post(&self, event: MessageEvent) -> Result<(), PostRejected> {
        let call = MockCall::post(&event);
        self.expected.observe(call.clone());
        self.reference.lock().post(event);

        let _host = self.runtime.acquire();
        let mut posted = self
            .reference
            .lock()
            .pop_posted_event()
            .unwrap_or_else(|| panic!("Failed to pop posted event"));
        let rc = self.hooks.post(&call);
        if let Some(batch) = self.hooks.next_ack_batch() {
            let correlation = if rc == GenericResult::Success.code() {
                posted.take_correlations().into_iter().next()
            } else {
                None
            };
            self.emit_acks(batch, correlation);
        }
        if rc != GenericResult::Success.code() {
            return Err(PostRejected { code: rc, event: posted });
        }
        Ok(())
    }

    fn confirm_message(&self, cookie: &ConfirmCookie) -> i32 {
        self.expected.observe(MockCall::ConfirmMessage {
            queue_uri: cookie.queue.uri().to_owned(),
            guid: cookie.guid,
        });
        let rc = self.reference.lock().confirm(cookie);
        if rc != GenericResult::Success.code() {
            return rc;
        }

        let _host = self.runtime.acquire();
        self.hooks.confirm_message(cookie.queue.uri(), &cookie.guid)
    }

    fn confirm_messages(&self, _cookies: &[ConfirmCookie]) -> i32 {
        not_implemented("confirmMessages")
    }

    fn next_event(&self, _timeout: Duration) -> Option<NativeEvent> {
        not_implemented("nextEvent")
    }

    fn configure_message_dumping(&self, _command: &str) -> i32 {
        not_implemented("configureMessageDumping")
    }
}

/// Creates [`MockSession`]s sharing one set of hooks and expectations.
#[derive(Clone)]
pub struct MockConnector {
    hooks: Arc<dyn MockHooks>,
    expected: Arc<ExpectedCallQueue>,
}

impl MockConnector {
    pub fn new(hooks: Arc<dyn MockHooks>, expected: Arc<ExpectedCallQueue>) -> Self {
        Self { hooks, expected }
    }

    pub fn expected(&self) -> &Arc<ExpectedCallQueue> {
        &self.expected
    }
}

impl std::fmt::Debug for MockConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnector")
            .field("expected", &self.expected)
            .finish_non_exhaustive()
    }
}

impl BrokerConnector for MockConnector {
    fn connect(
        &self,
        handler: Arc<dyn SessionEventHandler>,
        options: &SessionOptions,
        runtime: Arc<HostRuntime>,
    ) -> anyhow::Result<Box<dyn BrokerSession>> {
        {
            let _host = runtime.acquire();
            self.hooks.session_created(options);
        }
        debug!(
            broker_uri = %options.broker_uri,
            monitor_host_health = options.monitor_host_health,
            "mock session created"
        );
        let session = MockSession::new(
            Arc::clone(&self.hooks),
            Arc::clone(&self.expected),
            handler,
            runtime,
        );
        let session = match &options.host_health_monitor {
            Some(monitor) => session.watch_host_health(monitor),
            None => session,
        };
        Ok(Box::new(session))
    }
}
