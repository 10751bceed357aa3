//! ---
//! bmq_section: "02-host-bridge-core"
//! bmq_subsection: "module"
//! bmq_type: "source"
//! bmq_scope: "code"
//! bmq_description: "Manually driven host health source shared with the native client."
//! bmq_version: "v0.0.0-prealpha"
//! bmq_owner: "tbd"
//! ---
//! Host health monitoring.
//!
//! The native client watches a [`HostHealthMonitor`] when one is passed in the
//! session options. While the host is unhealthy, queues opened with
//! `suspends_on_bad_host_health` stop accepting posts; the client reports the
//! transitions as session events.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::info;

/// Health of the host as seen by the native client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostHealthState {
    #[default]
    Healthy,
    Unhealthy,
}

impl HostHealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostHealthState::Healthy => "healthy",
            HostHealthState::Unhealthy => "unhealthy",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HostHealthState::Healthy)
    }
}

impl fmt::Display for HostHealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Listener = Arc<dyn Fn(HostHealthState) + Send + Sync>;

#[derive(Default)]
struct MonitorState {
    state: Mutex<HostHealthState>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

/// Host health source whose state is set by the host.
///
/// New monitors start healthy. Clones share state, so the host keeps one
/// handle and passes another to the session builder.
#[derive(Clone, Default)]
pub struct HostHealthMonitor {
    inner: Arc<MonitorState>,
}

impl HostHealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> HostHealthState {
        *self.inner.state.lock()
    }

    pub fn set_healthy(&self) {
        self.transition(HostHealthState::Healthy);
    }

    pub fn set_unhealthy(&self) {
        self.transition(HostHealthState::Unhealthy);
    }

    /// Register a listener called with every state change, on the thread
    /// that made the change. Dropping the subscription unregisters it.
    pub fn subscribe<F>(&self, listener: F) -> HealthSubscription
    where
        F: Fn(HostHealthState) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        HealthSubscription {
            monitor: Arc::downgrade(&self.inner),
            id,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    fn transition(&self, next: HostHealthState) {
        {
            let mut state = self.inner.state.lock();
            if *state == next {
                return;
            }
            *state = next;
        }
        info!(host_health = %next, "host health transition");
        // Listeners may read the monitor or subscribe again.
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(next);
        }
    }
}

impl PartialEq for HostHealthMonitor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for HostHealthMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostHealthMonitor")
            .field("state", &self.state())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Registration returned by [`HostHealthMonitor::subscribe`].
#[must_use = "dropping the subscription unregisters the listener"]
pub struct HealthSubscription {
    monitor: Weak<MonitorState>,
    id: u64,
}

impl Drop for HealthSubscription {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.upgrade() {
            monitor.listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

impl fmt::Debug for HealthSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthSubscription").field("id", &self.id).finish()
    }
}
