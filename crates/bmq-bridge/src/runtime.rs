//! ---
//! bmq_section: "02-host-bridge-core"
//! bmq_subsection: "module"
//! bmq_type: "source"
//! bmq_scope: "code"
//! bmq_description: "Host-exclusive execution lock and its scoped guards."
//! bmq_version: "v0.0.0-prealpha"
//! bmq_owner: "tbd"
//! ---
//! Host-exclusive execution.
//!
//! Only one thread runs host code at a time. Native worker threads take an
//! [`AcquireGuard`] before calling back into host code; the host's call thread
//! takes a [`ReleaseGuard`] around any native call that may block or trigger a
//! callback on another thread. Both guards restore the previous state on every
//! exit path, unwinding included.

use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

#[derive(Debug, Default)]
struct HostState {
    owner: Option<ThreadId>,
    depth: usize,
}

/// Reentrant lock modelling the host's single-writer execution context.
#[derive(Debug, Default)]
pub struct HostRuntime {
    state: Mutex<HostState>,
    available: Condvar,
}

impl HostRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Enter host code on the current thread, waiting for any other holder.
    pub fn acquire(&self) -> AcquireGuard<'_> {
        self.lock_with_depth(1);
        AcquireGuard {
            runtime: self,
            _thread_bound: PhantomData,
        }
    }

    /// Whether the calling thread currently executes host code.
    pub fn is_held_by_current_thread(&self) -> bool {
        self.state.lock().owner == Some(thread::current().id())
    }

    fn lock_with_depth(&self, depth: usize) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner == Some(me) {
            state.depth += depth;
            return;
        }
        while state.owner.is_some() {
            self.available.wait(&mut state);
        }
        state.owner = Some(me);
        state.depth = depth;
    }

    fn unlock_one(&self) {
        let mut state = self.state.lock();
        debug_assert_eq!(state.owner, Some(thread::current().id()));
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            state.owner = None;
            self.available.notify_one();
        }
    }

    /// Give up every level held by the current thread. Returns the saved depth.
    fn unlock_all(&self) -> usize {
        let mut state = self.state.lock();
        if state.owner != Some(thread::current().id()) {
            return 0;
        }
        let saved = state.depth;
        state.owner = None;
        state.depth = 0;
        self.available.notify_one();
        saved
    }
}

/// Host-exclusive execution held by the current thread.
#[must_use = "host execution is released as soon as the guard is dropped"]
pub struct AcquireGuard<'a> {
    runtime: &'a HostRuntime,
    _thread_bound: PhantomData<*const ()>,
}

impl Drop for AcquireGuard<'_> {
    fn drop(&mut self) {
        self.runtime.unlock_one();
    }
}

/// Host-exclusive execution given up for the duration of a native call.
///
/// A no-op when the current thread does not hold the runtime.
#[must_use = "host execution is re-acquired as soon as the guard is dropped"]
pub struct ReleaseGuard<'a> {
    runtime: &'a HostRuntime,
    saved_depth: usize,
    _thread_bound: PhantomData<*const ()>,
}

impl<'a> ReleaseGuard<'a> {
    pub fn new(runtime: &'a HostRuntime) -> Self {
        let saved_depth = runtime.unlock_all();
        if saved_depth > 0 {
            trace!(saved_depth, "released host execution around native call");
        }
        Self {
            runtime,
            saved_depth,
            _thread_bound: PhantomData,
        }
    }
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        if self.saved_depth > 0 {
            self.runtime.lock_with_depth(self.saved_depth);
        }
    }
}
