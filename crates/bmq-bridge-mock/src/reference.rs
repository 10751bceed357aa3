//! ---
//! bmq_section: "03-mock-replay-harness"
//! bmq_subsection: "module"
//! bmq_type: "source"
//! bmq_scope: "code"
//! bmq_description: "In-memory reference session tracking queue handles and buffered events."
//! bmq_version: "v0.0.0-prealpha"
//! bmq_owner: "tbd"
//! ---
use std::collections::VecDeque;

use bmq_bridge::client::{
    ConfirmCookie, MessageEvent, NativeEvent, QueueFlags, QueueId, QueueOptions, QueueStatus,
};
use bmq_bridge::codes::{
    CloseQueueResult, ConfigureQueueResult, GenericResult, OpenQueueResult, ResultCode,
};
use bmq_bridge::HostHealthState;
use indexmap::IndexMap;

/// Queue bookkeeping of a session that never talks to a broker.
///
/// Posted events are buffered rather than sent; enqueued events wait until
/// the owner emits them. While the host is unhealthy, queues opened with
/// `suspends_on_bad_host_health` are held suspended.
#[derive(Debug, Default)]
pub struct ReferenceSession {
    started: bool,
    host_health: HostHealthState,
    queues: IndexMap<String, QueueId>,
    posted: VecDeque<MessageEvent>,
    pending: VecDeque<NativeEvent>,
}

impl ReferenceSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn start(&mut self) -> i32 {
        self.started = true;
        GenericResult::Success.code()
    }

    pub fn stop(&mut self) {
        self.started = false;
    }

    pub fn open_queue(&mut self, uri: &str, flags: QueueFlags, options: QueueOptions) -> QueueStatus {
        if let Some(existing) = self.queues.get(uri) {
            return QueueStatus::new(
                Some(existing.clone()),
                OpenQueueResult::AlreadyOpened.code(),
                "queue already opened",
            );
        }
        let queue = QueueId::new(uri, flags, options);
        queue.set_suspended(self.suspends(&options));
        self.queues.insert(uri.to_owned(), queue.clone());
        QueueStatus::new(Some(queue), OpenQueueResult::Success.code(), "")
    }

    pub fn configure_queue(&mut self, queue: &QueueId, options: QueueOptions) -> QueueStatus {
        if !self.is_known(queue) {
            return QueueStatus::new(
                Some(queue.clone()),
                ConfigureQueueResult::InvalidQueue.code(),
                "unknown queue",
            );
        }
        queue.set_options(options);
        queue.set_suspended(self.suspends(&options));
        QueueStatus::new(Some(queue.clone()), ConfigureQueueResult::Success.code(), "")
    }

    /// Invalidate the handle and forget the queue.
    pub fn close_queue(&mut self, queue: &QueueId) -> QueueStatus {
        if !self.is_known(queue) {
            return QueueStatus::new(
                Some(queue.clone()),
                CloseQueueResult::UnknownQueue.code(),
                "unknown queue",
            );
        }
        queue.invalidate();
        self.queues.shift_remove(queue.uri());
        QueueStatus::new(Some(queue.clone()), CloseQueueResult::Success.code(), "")
    }

    /// Drop a queue without reporting a close, e.g. after a failed open.
    pub fn forget_queue(&mut self, uri: &str) {
        if let Some(queue) = self.queues.shift_remove(uri) {
            queue.invalidate();
        }
    }

    pub fn host_health(&self) -> HostHealthState {
        self.host_health
    }

    /// Record a host health change and suspend or resume the sensitive
    /// queues. Returns the queues whose state changed.
    pub fn set_host_health(&mut self, health: HostHealthState) -> Vec<QueueId> {
        if self.host_health == health {
            return Vec::new();
        }
        self.host_health = health;
        let affected: Vec<QueueId> = self
            .queues
            .values()
            .filter(|queue| queue.options().suspends_on_bad_host_health)
            .cloned()
            .collect();
        for queue in &affected {
            queue.set_suspended(!health.is_healthy());
        }
        affected
    }

    fn suspends(&self, options: &QueueOptions) -> bool {
        options.suspends_on_bad_host_health && !self.host_health.is_healthy()
    }

    pub fn get_queue_id(&self, uri: &str) -> Option<QueueId> {
        self.queues.get(uri).cloned()
    }

    pub fn open_queues(&self) -> Vec<String> {
        self.queues.keys().cloned().collect()
    }

    fn is_known(&self, queue: &QueueId) -> bool {
        self.queues
            .get(queue.uri())
            .is_some_and(|known| known.same_queue(queue))
    }

    pub fn post(&mut self, event: MessageEvent) {
        self.posted.push_back(event);
    }

    pub fn pop_posted_event(&mut self) -> Option<MessageEvent> {
        self.posted.pop_front()
    }

    pub fn confirm(&self, cookie: &ConfirmCookie) -> i32 {
        if self.is_known(&cookie.queue) {
            GenericResult::Success.code()
        } else {
            GenericResult::InvalidArgument.code()
        }
    }

    pub fn enqueue_event(&mut self, event: NativeEvent) {
        self.pending.push_back(event);
    }

    pub fn next_pending_event(&mut self) -> Option<NativeEvent> {
        self.pending.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queues_open_once_and_close_invalidates() {
        let mut session = ReferenceSession::new();
        let status = session.open_queue("bmq://d/q", QueueFlags::READ, QueueOptions::default());
        assert_eq!(status.result, 0);
        let queue = status.queue.expect("handle");

        let again = session.open_queue("bmq://d/q", QueueFlags::READ, QueueOptions::default());
        assert_eq!(again.result, OpenQueueResult::AlreadyOpened.code());

        assert_eq!(session.close_queue(&queue).result, 0);
        assert!(!queue.is_valid());
        assert!(session.get_queue_id("bmq://d/q").is_none());
        assert_eq!(
            session.close_queue(&queue).result,
            CloseQueueResult::UnknownQueue.code()
        );
    }

    #[test]
    fn unhealthy_host_suspends_sensitive_queues() {
        let mut session = ReferenceSession::new();
        let sensitive = QueueOptions::default().with_suspends_on_bad_host_health(true);
        let watched = session
            .open_queue("bmq://d/watched", QueueFlags::WRITE, sensitive)
            .queue
            .expect("handle");
        let plain = session
            .open_queue("bmq://d/plain", QueueFlags::WRITE, QueueOptions::default())
            .queue
            .expect("handle");

        let affected = session.set_host_health(HostHealthState::Unhealthy);
        assert_eq!(affected, vec![watched.clone()]);
        assert!(watched.is_suspended());
        assert!(!plain.is_suspended());
        assert!(session.set_host_health(HostHealthState::Unhealthy).is_empty());

        let late = session
            .open_queue("bmq://d/late", QueueFlags::WRITE, sensitive)
            .queue
            .expect("handle");
        assert!(late.is_suspended());

        let affected = session.set_host_health(HostHealthState::Healthy);
        assert_eq!(affected.len(), 2);
        assert!(!watched.is_suspended() && !late.is_suspended());
    }

    #[test]
    fn posted_events_are_buffered_until_popped() {
        let mut session = ReferenceSession::new();
        session.post(MessageEvent::push(Vec::new()));
        assert!(session.pop_posted_event().is_some());
        assert!(session.pop_posted_event().is_none());
    }
}
