//! ---
//! bmq_section: "02-host-bridge-core"
//! bmq_subsection: "module"
//! bmq_type: "source"
//! bmq_scope: "code"
//! bmq_description: "Started/stopped state machine around the native session handle."
//! bmq_version: "v0.0.0-prealpha"
//! bmq_owner: "tbd"
//! ---
//! Session lifecycle.
//!
//! Queue operations hold the started lock for read across their native call.
//! `stop` takes it for write only long enough to clear the flag, so its native
//! call starts after every in-flight operation has finished. Once `stop` is
//! waiting, new operations queue behind it and then observe the session as
//! stopped. Only nested operations skip that queue: those issued by a thread
//! already holding the read side, and those issued from host callbacks, which
//! may be what an in-flight operation is waiting on.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use bmq_bridge_common::{init_tracing, CompressionAlgorithm, SessionConfig};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use crate::client::{
    BrokerConnector, BrokerSession, ConfirmCookie, CorrelationId, MessageGuid, OutgoingMessage,
    PackRejected, PostRejected, QueueFlags, QueueId, QueueOptions, QueueStatus, SessionOptions,
};
use crate::codes::{
    self, CloseQueueResult, ConfigureQueueResult, EventBuilderResult, GenericResult,
    OpenQueueResult, PostResult, ResultCode,
};
use crate::dispatcher::{self, EventDispatcher};
use crate::health::HostHealthMonitor;
use crate::host::{HostCallbacks, HostDiagnostics, TracingDiagnostics};
use crate::metrics::BridgeMetrics;
use crate::properties::PropertySet;
use crate::runtime::{HostRuntime, ReleaseGuard};
use crate::{Result, SessionError};

/// Classify a non-zero native result.
fn native_failure(code: i32, message: String) -> SessionError {
    if code == GenericResult::Timeout.code() {
        SessionError::BrokerTimeout { message, code }
    } else {
        SessionError::GenericFailure { message, code }
    }
}

fn queue_failure<T: ResultCode>(verb: &str, uri: &str, status: &QueueStatus) -> SessionError {
    native_failure(
        status.result,
        format!(
            "Failed to {verb} {uri} queue: {}: {}",
            codes::describe::<T>(status.result),
            status.description
        ),
    )
}

/// A failed post. The correlation handle, if any, is handed back.
#[derive(Debug)]
pub struct PostFailure {
    pub error: SessionError,
    pub returned: Option<CorrelationId>,
}

impl From<PostFailure> for SessionError {
    fn from(failure: PostFailure) -> Self {
        failure.error
    }
}

impl std::fmt::Display for PostFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for PostFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Assembles a [`Session`] from configuration and host collaborators.
pub struct SessionBuilder {
    config: SessionConfig,
    runtime: Option<Arc<HostRuntime>>,
    diagnostics: Option<Arc<dyn HostDiagnostics>>,
    metrics: Option<BridgeMetrics>,
    host_health: Option<HostHealthMonitor>,
    tracing_service: Option<String>,
}

impl SessionBuilder {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            runtime: None,
            diagnostics: None,
            metrics: None,
            host_health: None,
            tracing_service: None,
        }
    }

    /// Share an existing host execution lock instead of creating one.
    pub fn runtime(mut self, runtime: Arc<HostRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn diagnostics(mut self, diagnostics: Arc<dyn HostDiagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn metrics(mut self, metrics: BridgeMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Have the client watch `monitor`. Implies host health monitoring.
    pub fn host_health_monitor(mut self, monitor: HostHealthMonitor) -> Self {
        self.host_health = Some(monitor);
        self
    }

    /// Install the tracing subscriber described by the configuration's
    /// `logging` section before the session is created.
    pub fn tracing(mut self, service_name: impl Into<String>) -> Self {
        self.tracing_service = Some(service_name.into());
        self
    }

    /// Validate the configuration and create the native session.
    ///
    /// The session is returned stopped.
    pub fn connect(
        self,
        connector: &dyn BrokerConnector,
        callbacks: HostCallbacks,
    ) -> Result<Session> {
        self.config
            .validate()
            .map_err(|err| SessionError::InvalidConfig(format!("{err:#}")))?;
        if let Some(service) = &self.tracing_service {
            init_tracing(service, &self.config.logging)
                .map_err(|err| SessionError::InvalidConfig(format!("{err:#}")))?;
        }

        let runtime = self.runtime.unwrap_or_else(HostRuntime::new);
        let diagnostics = self.diagnostics.unwrap_or_else(|| {
            Arc::new(TracingDiagnostics::new(self.config.warnings_as_errors))
        });
        let mut options = SessionOptions::from_config(&self.config);
        if let Some(monitor) = self.host_health {
            options.monitor_host_health = true;
            options.host_health_monitor = Some(monitor);
        }
        let dispatcher = Arc::new(EventDispatcher::new(
            runtime.clone(),
            callbacks,
            diagnostics.clone(),
            self.metrics,
        ));

        let native = {
            let _release = ReleaseGuard::new(&runtime);
            connector
                .connect(dispatcher, &options, runtime.clone())
                .map_err(|err| SessionError::GenericFailure {
                    message: format!("Failed to create session: {err:#}"),
                    code: GenericResult::Unknown.code(),
                })?
        };
        info!(
            broker_uri = %options.broker_uri,
            process_name = %options.process_name,
            monitor_host_health = options.monitor_host_health,
            "session created"
        );

        Ok(Session {
            started: RwLock::new(false),
            readers: Mutex::new(HashMap::new()),
            native,
            runtime,
            diagnostics,
            compression: self.config.message_compression,
            options,
        })
    }
}

/// Owner of one native session and its started/stopped state.
pub struct Session {
    started: RwLock<bool>,
    /// Read depth of the started lock per thread.
    readers: Mutex<HashMap<ThreadId, usize>>,
    native: Box<dyn BrokerSession>,
    runtime: Arc<HostRuntime>,
    diagnostics: Arc<dyn HostDiagnostics>,
    compression: CompressionAlgorithm,
    options: SessionOptions,
}

impl Session {
    pub fn builder(config: SessionConfig) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn compression(&self) -> CompressionAlgorithm {
        self.compression
    }

    pub fn runtime(&self) -> &Arc<HostRuntime> {
        &self.runtime
    }

    pub fn is_started(&self) -> bool {
        *self.started.read_recursive()
    }

    pub fn monitor_host_health(&self) -> bool {
        self.options.monitor_host_health
    }

    /// Connect to the broker.
    pub fn start(&self, timeout: Option<Duration>) -> Result<()> {
        let timeout = timeout.unwrap_or(self.options.timeouts.connect);
        let rc = {
            let _release = ReleaseGuard::new(&self.runtime);
            let rc = self.native.start(timeout);
            if rc == GenericResult::Success.code() {
                *self.started.write() = true;
            }
            rc
        };
        if rc != GenericResult::Success.code() {
            warn!(result_code = rc, "session start failed");
            return Err(native_failure(
                rc,
                format!("Failed to start session: {}", codes::describe::<GenericResult>(rc)),
            ));
        }
        info!(broker_uri = %self.options.broker_uri, "session started");
        Ok(())
    }

    /// Disconnect from the broker. A second call is a no-op.
    ///
    /// With `warn_if_started`, stopping a started session raises the
    /// destruction-without-stop warning, which the host may escalate.
    pub fn stop(&self, warn_if_started: bool) -> Result<()> {
        let was_started = {
            let _release = ReleaseGuard::new(&self.runtime);
            let was_started = std::mem::replace(&mut *self.started.write(), false);
            if was_started {
                // Neither host execution nor the started lock is held here.
                self.native.stop();
            }
            was_started
        };
        if !was_started {
            return Ok(());
        }
        info!("session stopped");
        if warn_if_started {
            self.diagnostics.warn(&format!(
                "stop() not invoked before destruction of Session<{:p}> object",
                self as *const Session
            ))?;
        }
        Ok(())
    }

    fn started_guard(&self) -> Result<StartedGuard<'_>> {
        let thread = thread::current().id();
        let nested = dispatcher::is_delivering() || self.readers.lock().contains_key(&thread);
        let guard = if nested {
            self.started.read_recursive()
        } else {
            self.started.read()
        };
        if !*guard {
            return Err(SessionError::SessionStopped);
        }
        *self.readers.lock().entry(thread).or_insert(0) += 1;
        Ok(StartedGuard {
            session: self,
            thread,
            _guard: guard,
        })
    }

    fn check_health_options(&self, options: &QueueOptions) -> Result<()> {
        if options.suspends_on_bad_host_health && !self.options.monitor_host_health {
            return Err(SessionError::HostHealthNotMonitored);
        }
        Ok(())
    }

    fn resolve(&self, uri: &str) -> Result<QueueId> {
        self.native
            .get_queue_id(uri)
            .ok_or_else(|| SessionError::QueueNotOpened { uri: uri.to_owned() })
    }

    pub fn open_queue(
        &self,
        uri: &str,
        read: bool,
        write: bool,
        options: QueueOptions,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let timeout = timeout.unwrap_or(self.options.timeouts.open_queue);
        self.check_health_options(&options)?;
        let _release = ReleaseGuard::new(&self.runtime);
        let _started = self.started_guard()?;

        let flags = QueueFlags::from_access(read, write);
        let status = self.native.open_queue_sync(uri, flags, &options, timeout);
        if status.result != OpenQueueResult::Success.code() {
            return Err(queue_failure::<OpenQueueResult>("open", uri, &status));
        }
        debug!(queue_uri = %uri, read, write, "queue opened");
        Ok(())
    }

    /// Replace the options of an open queue.
    pub fn configure_queue(
        &self,
        uri: &str,
        options: QueueOptions,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let timeout = timeout.unwrap_or(self.options.timeouts.configure_queue);
        self.check_health_options(&options)?;
        let _release = ReleaseGuard::new(&self.runtime);
        let _started = self.started_guard()?;

        let queue = self.resolve(uri)?;
        let status = self.native.configure_queue_sync(&queue, &options, timeout);
        if status.result != ConfigureQueueResult::Success.code() {
            return Err(queue_failure::<ConfigureQueueResult>("configure", uri, &status));
        }
        debug!(queue_uri = %uri, "queue configured");
        Ok(())
    }

    pub fn close_queue(&self, uri: &str, timeout: Option<Duration>) -> Result<()> {
        let timeout = timeout.unwrap_or(self.options.timeouts.close_queue);
        let _release = ReleaseGuard::new(&self.runtime);
        let _started = self.started_guard()?;

        let queue = self.resolve(uri)?;
        let status = self.native.close_queue_sync(&queue, timeout);
        if status.result != CloseQueueResult::Success.code() {
            return Err(queue_failure::<CloseQueueResult>("close", uri, &status));
        }
        debug!(queue_uri = %uri, "queue closed");
        Ok(())
    }

    /// Current options of an open queue.
    pub fn get_queue_options(&self, uri: &str) -> Result<QueueOptions> {
        let _release = ReleaseGuard::new(&self.runtime);
        let _started = self.started_guard()?;
        Ok(self.resolve(uri)?.options())
    }

    /// Post one message.
    ///
    /// `on_ack` moves into the native client on success and comes back in
    /// [`PostFailure::returned`] otherwise.
    pub fn post(
        &self,
        uri: &str,
        payload: impl Into<Bytes>,
        properties: Option<&PropertySet>,
        on_ack: Option<CorrelationId>,
    ) -> std::result::Result<(), PostFailure> {
        let properties = match properties.map(crate::properties::encode).transpose() {
            Ok(encoded) => encoded,
            Err(err) => {
                return Err(PostFailure {
                    error: err.into(),
                    returned: on_ack,
                })
            }
        };
        let message = OutgoingMessage {
            payload: payload.into(),
            properties,
            correlation: on_ack,
            compression: self.compression,
        };

        let _release = ReleaseGuard::new(&self.runtime);
        let fail = |error: SessionError, message: OutgoingMessage| PostFailure {
            error,
            returned: message.correlation,
        };
        let _started = match self.started_guard() {
            Ok(guard) => guard,
            Err(err) => return Err(fail(err, message)),
        };
        let queue = match self.resolve(uri) {
            Ok(queue) => queue,
            Err(err) => return Err(fail(err, message)),
        };

        let mut builder = self.native.message_event_builder();
        if let Err(PackRejected { code, message }) = builder.pack_message(&queue, message) {
            let error = SessionError::MessageConstruction {
                code,
                name: codes::name::<EventBuilderResult>(code),
            };
            return Err(fail(error, message));
        }

        if let Err(PostRejected { code, mut event }) = self.native.post(builder.build()) {
            warn!(queue_uri = %uri, result_code = code, "post rejected");
            return Err(PostFailure {
                error: native_failure(
                    code,
                    format!(
                        "Failed to post message to {uri} queue: {}",
                        codes::describe::<PostResult>(code)
                    ),
                ),
                returned: event.take_correlations().into_iter().next(),
            });
        }
        Ok(())
    }

    /// Confirm a message by its binary identifier.
    pub fn confirm(&self, uri: &str, guid: &[u8]) -> Result<()> {
        let _release = ReleaseGuard::new(&self.runtime);
        let _started = self.started_guard()?;

        let queue = self.resolve(uri)?;
        if !queue.is_valid() {
            return Err(SessionError::QueueClosing { uri: uri.to_owned() });
        }
        let guid = MessageGuid::from_slice(guid)?;
        let rc = self.native.confirm_message(&ConfirmCookie { queue, guid });
        if rc != GenericResult::Success.code() {
            return Err(native_failure(
                rc,
                format!(
                    "Failed to confirm message [{guid}]: {}",
                    codes::describe::<GenericResult>(rc)
                ),
            ));
        }
        Ok(())
    }
}

/// Read side of the started lock, counted against the holding thread.
struct StartedGuard<'a> {
    session: &'a Session,
    thread: ThreadId,
    _guard: RwLockReadGuard<'a, bool>,
}

impl Drop for StartedGuard<'_> {
    fn drop(&mut self) {
        let mut readers = self.session.readers.lock();
        if let Some(depth) = readers.get_mut(&self.thread) {
            *depth -= 1;
            if *depth == 0 {
                readers.remove(&self.thread);
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.stop(true) {
            self.diagnostics
                .print_unhandled("session drop", &anyhow::Error::new(err));
        }
        debug_assert!(!*self.started.read_recursive());
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("started", &self.is_started())
            .field("broker_uri", &self.options.broker_uri)
            .field("compression", &self.compression)
            .finish_non_exhaustive()
    }
}
