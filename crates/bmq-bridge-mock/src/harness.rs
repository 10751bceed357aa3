//! ---
//! bmq_section: "03-mock-replay-harness"
//! bmq_subsection: "module"
//! bmq_type: "source"
//! bmq_scope: "code"
//! bmq_description: "Recording host callbacks and a one-call setup wiring a session to the mock."
//! bmq_version: "v0.0.0-prealpha"
//! bmq_owner: "tbd"
//! ---
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use bmq_bridge::{
    AckRecord, HostCallbacks, HostRuntime, ReceivedMessage, Session, SessionBuilder,
    SessionNotification,
};
use bmq_bridge_common::SessionConfig;
use parking_lot::Mutex;

use crate::expect::ExpectedCallQueue;
use crate::hooks::ScriptedMock;
use crate::script::ScriptedEvents;
use crate::session::MockConnector;

#[derive(Debug, Default)]
struct Recorded {
    notifications: Vec<SessionNotification>,
    messages: Vec<Vec<ReceivedMessage>>,
    acks: Vec<Vec<AckRecord>>,
}

/// Host callbacks that keep every delivery for later inspection.
///
/// Each delivered batch is stored as-is, so batch boundaries stay visible.
#[derive(Debug, Clone, Default)]
pub struct RecordingHost {
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callbacks(&self) -> HostCallbacks {
        let notifications = Arc::clone(&self.recorded);
        let messages = Arc::clone(&self.recorded);
        let acks = Arc::clone(&self.recorded);
        HostCallbacks::new(
            move |notification| {
                notifications.lock().notifications.push(notification);
                Ok(())
            },
            move |batch| {
                messages.lock().messages.push(batch);
                Ok(())
            },
            move |batch| {
                acks.lock().acks.push(batch);
                Ok(())
            },
        )
    }

    pub fn notifications(&self) -> Vec<SessionNotification> {
        self.recorded.lock().notifications.clone()
    }

    /// Texts of the diagnostics raised by the bridge itself.
    pub fn diagnostics(&self) -> Vec<String> {
        self.recorded
            .lock()
            .notifications
            .iter()
            .filter_map(|notification| match notification {
                SessionNotification::Diagnostic(text) => Some(text.clone()),
                SessionNotification::Event(_) => None,
            })
            .collect()
    }

    pub fn message_batches(&self) -> Vec<Vec<ReceivedMessage>> {
        self.recorded.lock().messages.clone()
    }

    /// Drain recorded acknowledgements, releasing the correlations they hold.
    pub fn take_acks(&self) -> Vec<Vec<AckRecord>> {
        std::mem::take(&mut self.recorded.lock().acks)
    }
}

/// A scripted mock, its expectations and a recording host wired together.
#[derive(Debug)]
pub struct MockHarness {
    pub hooks: Arc<ScriptedMock>,
    pub expected: Arc<ExpectedCallQueue>,
    pub host: RecordingHost,
    pub runtime: Arc<HostRuntime>,
}

impl MockHarness {
    pub fn new() -> Self {
        Self::with_expectations(ExpectedCallQueue::auto())
    }

    pub fn strict() -> Self {
        Self::with_expectations(ExpectedCallQueue::strict())
    }

    pub fn with_expectations(expected: ExpectedCallQueue) -> Self {
        Self {
            hooks: Arc::new(ScriptedMock::new()),
            expected: Arc::new(expected),
            host: RecordingHost::new(),
            runtime: HostRuntime::new(),
        }
    }

    /// Queue every batch of a replay script behind those already scripted.
    pub fn load_script<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.hooks.extend_events(ScriptedEvents::load_from_file(path)?);
        Ok(())
    }

    pub fn connector(&self) -> MockConnector {
        MockConnector::new(self.hooks.clone(), Arc::clone(&self.expected))
    }

    /// Builder preset with this harness's runtime.
    pub fn builder(&self, config: SessionConfig) -> SessionBuilder {
        Session::builder(config).runtime(Arc::clone(&self.runtime))
    }

    /// Create a session with default configuration, not yet started.
    pub fn connect(&self) -> Result<Session> {
        self.connect_with(self.builder(SessionConfig::default()))
    }

    pub fn connect_with(&self, builder: SessionBuilder) -> Result<Session> {
        Ok(builder.connect(&self.connector(), self.host.callbacks())?)
    }
}

impl Default for MockHarness {
    fn default() -> Self {
        Self::new()
    }
}
