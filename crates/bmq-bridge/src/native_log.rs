//! ---
//! bmq_section: "02-host-bridge-core"
//! bmq_subsection: "module"
//! bmq_type: "source"
//! bmq_scope: "code"
//! bmq_description: "Process-wide redirection of native client log records into host code."
//! bmq_version: "v0.0.0-prealpha"
//! bmq_owner: "tbd"
//! ---
//! Native log redirection.
//!
//! The native client logs from its own threads. [`NativeLogBridge::install`]
//! registers the one process-wide sink those records are forwarded to. Install
//! it before creating any [`Session`](crate::Session) and drop the returned
//! guard only after every session is gone; records published with no bridge
//! installed are discarded.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use strum::{FromRepr, IntoStaticStr};
use tracing::{debug, error, info, trace, warn};

use crate::host::panic_message;
use crate::runtime::HostRuntime;
use crate::{Result, SessionError};

/// Environment variable that lowers the forwarding threshold to debug.
pub const DIAGNOSTICS_ENV: &str = "BMQ_BRIDGE_NATIVE_DIAGNOSTICS";

/// Prefix of every host logger name.
pub const LOGGER_PREFIX: &str = "blazingmq.";

/// Severity levels of the native logging framework. Lower is more severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum NativeSeverity {
    Off = 0,
    Fatal = 32,
    Error = 64,
    Warn = 96,
    Info = 128,
    Debug = 160,
    Trace = 192,
}

/// Host logging levels records are mapped onto.
pub mod host_level {
    pub const DEBUG: u8 = 10;
    pub const INFO: u8 = 20;
    pub const WARN: u8 = 30;
    pub const ERROR: u8 = 40;
    pub const FATAL: u8 = 50;
}

/// Map a raw native severity onto a host level.
///
/// Values between the named levels round towards the less severe neighbour.
pub fn severity_to_host_level(severity: i32) -> u8 {
    if severity > NativeSeverity::Info as i32 {
        host_level::DEBUG
    } else if severity > NativeSeverity::Warn as i32 {
        host_level::INFO
    } else if severity > NativeSeverity::Error as i32 {
        host_level::WARN
    } else if severity > NativeSeverity::Fatal as i32 {
        host_level::ERROR
    } else {
        host_level::FATAL
    }
}

/// One record as produced by the native client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeLogRecord {
    pub category: String,
    pub severity: i32,
    pub file: String,
    pub line: u32,
    pub message: String,
}

/// A native record translated for the host logging system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLogRecord {
    pub logger: String,
    pub level: u8,
    pub file: String,
    pub line: u32,
    pub message: String,
}

impl From<&NativeLogRecord> for HostLogRecord {
    fn from(record: &NativeLogRecord) -> Self {
        Self {
            logger: format!("{LOGGER_PREFIX}{}", record.category),
            level: severity_to_host_level(record.severity),
            file: record.file.clone(),
            line: record.line,
            message: record.message.clone(),
        }
    }
}

type LogSink = Box<dyn Fn(&HostLogRecord) -> anyhow::Result<()> + Send + Sync>;

struct Registration {
    runtime: Arc<HostRuntime>,
    sink: LogSink,
    threshold: NativeSeverity,
}

static ACTIVE: Lazy<Mutex<Option<Arc<Registration>>>> = Lazy::new(|| Mutex::new(None));

/// Entry points of the process-wide log redirection.
pub struct NativeLogBridge;

impl NativeLogBridge {
    /// Register `sink` as the destination of native log records.
    ///
    /// Fails with [`SessionError::AlreadyInstalled`] while another
    /// registration is alive.
    pub fn install<F>(runtime: Arc<HostRuntime>, sink: F) -> Result<NativeLogGuard>
    where
        F: Fn(&HostLogRecord) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let threshold = if std::env::var_os(DIAGNOSTICS_ENV).is_some() {
            NativeSeverity::Debug
        } else {
            NativeSeverity::Info
        };
        let mut active = ACTIVE.lock();
        if active.is_some() {
            return Err(SessionError::AlreadyInstalled);
        }
        *active = Some(Arc::new(Registration {
            runtime,
            sink: Box::new(sink),
            threshold,
        }));
        debug!(threshold = <&'static str>::from(threshold), "native log bridge installed");
        Ok(NativeLogGuard { _private: () })
    }

    pub fn is_installed() -> bool {
        ACTIVE.lock().is_some()
    }

    /// Forward one record. Called from native threads.
    pub fn publish(record: &NativeLogRecord) {
        let Some(registration) = ACTIVE.lock().clone() else {
            return;
        };
        if record.severity > registration.threshold as i32 {
            return;
        }
        let translated = HostLogRecord::from(record);

        let _host = registration.runtime.acquire();
        let failure = match panic::catch_unwind(AssertUnwindSafe(|| {
            (registration.sink)(&translated)
        })) {
            Ok(Ok(())) => return,
            Ok(Err(err)) => format!("{err:#}"),
            Err(payload) => panic_message(payload.as_ref()),
        };
        error!(logger = %translated.logger, error = %failure, "native log sink failed");
    }
}

/// Keeps the native log registration alive. Dropping it uninstalls the sink.
#[must_use = "the native log bridge is uninstalled as soon as the guard is dropped"]
#[derive(Debug)]
pub struct NativeLogGuard {
    _private: (),
}

impl Drop for NativeLogGuard {
    fn drop(&mut self) {
        ACTIVE.lock().take();
    }
}

/// Sink re-emitting native records as `tracing` events.
pub fn tracing_sink() -> impl Fn(&HostLogRecord) -> anyhow::Result<()> + Send + Sync + 'static {
    |record: &HostLogRecord| {
        let (logger, file, line, message) =
            (&record.logger, &record.file, record.line, &record.message);
        match record.level {
            host_level::FATAL | host_level::ERROR => {
                error!(logger = %logger, file = %file, line, "{message}")
            }
            host_level::WARN => warn!(logger = %logger, file = %file, line, "{message}"),
            host_level::INFO => info!(logger = %logger, file = %file, line, "{message}"),
            host_level::DEBUG => debug!(logger = %logger, file = %file, line, "{message}"),
            _ => trace!(logger = %logger, file = %file, line, "{message}"),
        }
        Ok(())
    }
}
