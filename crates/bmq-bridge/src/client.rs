//! ---
//! bmq_section: "02-host-bridge-core"
//! bmq_subsection: "module"
//! bmq_type: "source"
//! bmq_scope: "code"
//! bmq_description: "Call and callback contract of the wrapped native client session."
//! bmq_version: "v0.0.0-prealpha"
//! bmq_owner: "tbd"
//! ---
//! Contract of the native messaging client.
//!
//! The bridge never speaks the broker protocol itself. It drives an
//! implementation of [`BrokerSession`] and receives asynchronous events through
//! a [`SessionEventHandler`].

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bmq_bridge_common::{CompressionAlgorithm, SessionConfig};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::codes::{EventBuilderResult, MessageEventType, ResultCode};
use crate::health::HostHealthMonitor;
use crate::properties::MessageProperties;
use crate::runtime::HostRuntime;
use crate::SessionError;

/// Access mode bits requested when opening a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueFlags(u64);

impl QueueFlags {
    pub const ADMIN: QueueFlags = QueueFlags(1 << 0);
    pub const READ: QueueFlags = QueueFlags(1 << 1);
    pub const WRITE: QueueFlags = QueueFlags(1 << 2);
    pub const ACK: QueueFlags = QueueFlags(1 << 3);

    pub fn empty() -> Self {
        QueueFlags(0)
    }

    pub fn from_access(read: bool, write: bool) -> Self {
        let mut flags = QueueFlags::empty();
        if read {
            flags = flags | QueueFlags::READ;
        }
        if write {
            flags = flags | QueueFlags::WRITE;
        }
        flags
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn contains(self, other: QueueFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_reader(self) -> bool {
        self.contains(QueueFlags::READ)
    }

    pub fn is_writer(self) -> bool {
        self.contains(QueueFlags::WRITE)
    }
}

impl std::ops::BitOr for QueueFlags {
    type Output = QueueFlags;

    fn bitor(self, rhs: QueueFlags) -> QueueFlags {
        QueueFlags(self.0 | rhs.0)
    }
}

/// Consumer-side flow control settings of an open queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueOptions {
    pub max_unconfirmed_messages: i32,
    pub max_unconfirmed_bytes: i32,
    pub consumer_priority: i32,
    pub suspends_on_bad_host_health: bool,
}

impl QueueOptions {
    pub const DEFAULT_MAX_UNCONFIRMED_MESSAGES: i32 = 1000;
    pub const DEFAULT_MAX_UNCONFIRMED_BYTES: i32 = 33_554_432;
    pub const DEFAULT_CONSUMER_PRIORITY: i32 = 0;
    pub const DEFAULT_SUSPENDS_ON_BAD_HOST_HEALTH: bool = false;

    pub fn with_max_unconfirmed_messages(mut self, value: i32) -> Self {
        self.max_unconfirmed_messages = value;
        self
    }

    pub fn with_max_unconfirmed_bytes(mut self, value: i32) -> Self {
        self.max_unconfirmed_bytes = value;
        self
    }

    pub fn with_consumer_priority(mut self, value: i32) -> Self {
        self.consumer_priority = value;
        self
    }

    pub fn with_suspends_on_bad_host_health(mut self, value: bool) -> Self {
        self.suspends_on_bad_host_health = value;
        self
    }
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            max_unconfirmed_messages: Self::DEFAULT_MAX_UNCONFIRMED_MESSAGES,
            max_unconfirmed_bytes: Self::DEFAULT_MAX_UNCONFIRMED_BYTES,
            consumer_priority: Self::DEFAULT_CONSUMER_PRIORITY,
            suspends_on_bad_host_health: Self::DEFAULT_SUSPENDS_ON_BAD_HOST_HEALTH,
        }
    }
}

#[derive(Debug)]
struct QueueState {
    uri: String,
    flags: QueueFlags,
    options: Mutex<QueueOptions>,
    valid: AtomicBool,
    suspended: AtomicBool,
}

/// Handle to a queue known by the native session.
///
/// Clones share state, so closing through one handle is visible through all.
#[derive(Clone)]
pub struct QueueId {
    inner: Arc<QueueState>,
}

impl QueueId {
    pub fn new(uri: impl Into<String>, flags: QueueFlags, options: QueueOptions) -> Self {
        Self {
            inner: Arc::new(QueueState {
                uri: uri.into(),
                flags,
                options: Mutex::new(options),
                valid: AtomicBool::new(true),
                suspended: AtomicBool::new(false),
            }),
        }
    }

    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    pub fn flags(&self) -> QueueFlags {
        self.inner.flags
    }

    pub fn options(&self) -> QueueOptions {
        *self.inner.options.lock()
    }

    pub fn set_options(&self, options: QueueOptions) {
        *self.inner.options.lock() = options;
    }

    /// False once the queue is closed or closing.
    pub fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::Acquire)
    }

    pub fn invalidate(&self) {
        self.inner.valid.store(false, Ordering::Release);
    }

    /// True while the client holds the queue suspended on bad host health.
    pub fn is_suspended(&self) -> bool {
        self.inner.suspended.load(Ordering::Acquire)
    }

    pub fn set_suspended(&self, suspended: bool) {
        self.inner.suspended.store(suspended, Ordering::Release);
    }

    pub fn same_queue(&self, other: &QueueId) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for QueueId {
    fn eq(&self, other: &Self) -> bool {
        self.uri() == other.uri()
    }
}

impl fmt::Debug for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueId")
            .field("uri", &self.inner.uri)
            .field("flags", &self.inner.flags)
            .field("valid", &self.is_valid())
            .field("suspended", &self.is_suspended())
            .finish()
    }
}

/// Result of a synchronous queue operation.
#[derive(Debug, Clone)]
pub struct QueueStatus {
    pub queue: Option<QueueId>,
    pub result: i32,
    pub description: String,
}

impl QueueStatus {
    pub fn new(queue: Option<QueueId>, result: i32, description: impl Into<String>) -> Self {
        Self {
            queue,
            result,
            description: description.into(),
        }
    }
}

const GUID_SIZE: usize = 16;

/// Fixed-width opaque message identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MessageGuid([u8; GUID_SIZE]);

impl MessageGuid {
    pub const SIZE: usize = GUID_SIZE;

    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        MessageGuid(bytes)
    }

    /// Copy from a slice of exactly [`MessageGuid::SIZE`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SessionError> {
        <[u8; Self::SIZE]>::try_from(bytes)
            .map(MessageGuid)
            .map_err(|_| SessionError::InvalidGuid)
    }

    /// Parse the 32 character hex rendering.
    pub fn from_hex(text: &str) -> Result<Self, SessionError> {
        let mut bytes = [0u8; Self::SIZE];
        hex::decode_to_slice(text, &mut bytes).map_err(|_| SessionError::InvalidGuid)?;
        Ok(MessageGuid(bytes))
    }

    /// Fresh random identifier, used for outgoing messages.
    pub fn generate() -> Self {
        MessageGuid(uuid::Uuid::new_v4().into_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; Self::SIZE] {
        &self.0
    }
}

impl fmt::Display for MessageGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for MessageGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageGuid({self})")
    }
}

/// Opaque host token attached to a post and handed back in its acknowledgement.
///
/// Each clone is one counted reference to the token. Moving a clone into a
/// post transfers that reference to the client, which releases it once the
/// acknowledgement has been delivered; a failed post hands it back to the
/// caller inside the failure.
#[derive(Clone)]
pub struct CorrelationId(Arc<dyn Any + Send + Sync>);

impl CorrelationId {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        CorrelationId(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &CorrelationId) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of live references to the underlying token.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl fmt::Debug for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CorrelationId({:p})", Arc::as_ptr(&self.0))
    }
}

/// One message inside a [`MessageEvent`].
#[derive(Debug, Clone)]
pub struct Message {
    pub queue: QueueId,
    pub guid: MessageGuid,
    pub payload: Bytes,
    pub properties: Option<MessageProperties>,
    pub correlation: Option<CorrelationId>,
    /// Meaningful for acknowledgements only.
    pub ack_status: i32,
    pub compression: CompressionAlgorithm,
}

impl Message {
    pub fn push(
        queue: QueueId,
        guid: MessageGuid,
        payload: Bytes,
        properties: Option<MessageProperties>,
    ) -> Self {
        Self {
            queue,
            guid,
            payload,
            properties,
            correlation: None,
            ack_status: 0,
            compression: CompressionAlgorithm::None,
        }
    }

    pub fn ack(
        queue: QueueId,
        guid: MessageGuid,
        status: i32,
        correlation: Option<CorrelationId>,
    ) -> Self {
        Self {
            queue,
            guid,
            payload: Bytes::new(),
            properties: None,
            correlation,
            ack_status: status,
            compression: CompressionAlgorithm::None,
        }
    }
}

/// Batch of messages delivered or posted together.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    /// Raw [`MessageEventType`] code; may be one the bridge does not expect.
    pub event_type: i32,
    pub messages: Vec<Message>,
}

impl MessageEvent {
    pub fn new(event_type: i32, messages: Vec<Message>) -> Self {
        Self {
            event_type,
            messages,
        }
    }

    pub fn push(messages: Vec<Message>) -> Self {
        Self::new(MessageEventType::Push.code(), messages)
    }

    pub fn ack(messages: Vec<Message>) -> Self {
        Self::new(MessageEventType::Ack.code(), messages)
    }

    /// Take back the correlation tokens carried by this event.
    pub fn take_correlations(&mut self) -> Vec<CorrelationId> {
        self.messages
            .iter_mut()
            .filter_map(|message| message.correlation.take())
            .collect()
    }
}

/// Session-level notification raised by the native client.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub event_type: i32,
    pub status_code: i32,
    pub description: String,
    pub queue: Option<QueueId>,
}

/// Event returned by polling the native client.
#[derive(Debug, Clone)]
pub enum NativeEvent {
    Session(SessionEvent),
    Message(MessageEvent),
}

/// Queue and identifier of a message being confirmed.
#[derive(Debug, Clone)]
pub struct ConfirmCookie {
    pub queue: QueueId,
    pub guid: MessageGuid,
}

/// Message handed to the builder. Returned intact when packing fails.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub payload: Bytes,
    pub properties: Option<MessageProperties>,
    pub correlation: Option<CorrelationId>,
    pub compression: CompressionAlgorithm,
}

/// Packing failure with the rejected message.
#[derive(Debug)]
pub struct PackRejected {
    pub code: i32,
    pub message: OutgoingMessage,
}

/// Post failure with the event the client refused.
#[derive(Debug)]
pub struct PostRejected {
    pub code: i32,
    pub event: MessageEvent,
}

/// Assembles outgoing PUT events, enforcing the client's packing rules.
#[derive(Debug)]
pub struct MessageEventBuilder {
    messages: Vec<Message>,
    max_payload: usize,
}

impl MessageEventBuilder {
    /// Largest payload the client accepts in one message.
    pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

    pub fn new() -> Self {
        Self::with_max_payload(Self::MAX_PAYLOAD_SIZE)
    }

    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_payload,
        }
    }

    pub fn pack_message(
        &mut self,
        queue: &QueueId,
        message: OutgoingMessage,
    ) -> Result<(), PackRejected> {
        let rejected = |result: EventBuilderResult,
                        message: OutgoingMessage|
         -> Result<(), PackRejected> {
            Err(PackRejected {
                code: result.code(),
                message,
            })
        };
        if !queue.is_valid() {
            return rejected(EventBuilderResult::QueueInvalid, message);
        }
        if !queue.flags().is_writer() {
            return rejected(EventBuilderResult::QueueReadonly, message);
        }
        if queue.is_suspended() {
            return rejected(EventBuilderResult::QueueSuspended, message);
        }
        if queue.flags().contains(QueueFlags::ACK) && message.correlation.is_none() {
            return rejected(EventBuilderResult::MissingCorrelationId, message);
        }
        if message.payload.is_empty() {
            return rejected(EventBuilderResult::PayloadEmpty, message);
        }
        if message.payload.len() > self.max_payload {
            return rejected(EventBuilderResult::PayloadTooBig, message);
        }
        self.messages.push(Message {
            queue: queue.clone(),
            guid: MessageGuid::generate(),
            payload: message.payload,
            properties: message.properties,
            correlation: message.correlation,
            ack_status: 0,
            compression: message.compression,
        });
        Ok(())
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn build(self) -> MessageEvent {
        MessageEvent::new(MessageEventType::Put.code(), self.messages)
    }
}

impl Default for MessageEventBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolved per-operation timeouts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionTimeouts {
    pub connect: Duration,
    pub disconnect: Duration,
    pub open_queue: Duration,
    pub configure_queue: Duration,
    pub close_queue: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(60),
            disconnect: Duration::from_secs(30),
            open_queue: Duration::from_secs(300),
            configure_queue: Duration::from_secs(300),
            close_queue: Duration::from_secs(300),
        }
    }
}

/// Effective options the native session is created with.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub broker_uri: String,
    pub process_name: String,
    pub num_processing_threads: i32,
    pub blob_buffer_size: i32,
    pub channel_high_watermark: i64,
    pub event_queue_low_watermark: i32,
    pub event_queue_high_watermark: i32,
    pub stats_dump_interval: Duration,
    pub timeouts: SessionTimeouts,
    /// Whether the client watches host health at all.
    pub monitor_host_health: bool,
    /// Host-driven health source. `None` with `monitor_host_health` set leaves
    /// the choice of monitor to the client.
    pub host_health_monitor: Option<HostHealthMonitor>,
}

impl SessionOptions {
    pub const DEFAULT_NUM_PROCESSING_THREADS: i32 = 1;
    pub const DEFAULT_BLOB_BUFFER_SIZE: i32 = 4096;
    pub const DEFAULT_CHANNEL_HIGH_WATERMARK: i64 = 128 * 1024 * 1024;
    pub const DEFAULT_EVENT_QUEUE_LOW_WATERMARK: i32 = 50;
    pub const DEFAULT_EVENT_QUEUE_HIGH_WATERMARK: i32 = 2000;
    pub const DEFAULT_STATS_DUMP_INTERVAL: Duration = Duration::from_secs(300);

    /// Overlay configured values on the client defaults.
    pub fn from_config(config: &SessionConfig) -> Self {
        let defaults = SessionTimeouts::default();
        let timeouts = &config.timeouts;
        let (low, high) = config.event_queue_watermarks.unwrap_or((
            Self::DEFAULT_EVENT_QUEUE_LOW_WATERMARK,
            Self::DEFAULT_EVENT_QUEUE_HIGH_WATERMARK,
        ));
        Self {
            broker_uri: config.broker_uri.clone(),
            process_name: config.effective_process_name(),
            num_processing_threads: config
                .num_processing_threads
                .unwrap_or(Self::DEFAULT_NUM_PROCESSING_THREADS),
            blob_buffer_size: config
                .blob_buffer_size
                .unwrap_or(Self::DEFAULT_BLOB_BUFFER_SIZE),
            channel_high_watermark: config
                .channel_high_watermark
                .map(i64::from)
                .unwrap_or(Self::DEFAULT_CHANNEL_HIGH_WATERMARK),
            event_queue_low_watermark: low,
            event_queue_high_watermark: high,
            stats_dump_interval: config
                .stats_dump_interval
                .unwrap_or(Self::DEFAULT_STATS_DUMP_INTERVAL),
            timeouts: SessionTimeouts {
                connect: timeouts.connect.unwrap_or(defaults.connect),
                disconnect: timeouts.disconnect.unwrap_or(defaults.disconnect),
                open_queue: timeouts.open_queue.unwrap_or(defaults.open_queue),
                configure_queue: timeouts.configure_queue.unwrap_or(defaults.configure_queue),
                close_queue: timeouts.close_queue.unwrap_or(defaults.close_queue),
            },
            monitor_host_health: config.monitor_host_health,
            host_health_monitor: None,
        }
    }
}

/// Receiver of asynchronous events, called from native worker threads.
pub trait SessionEventHandler: Send + Sync {
    fn on_session_event(&self, event: &SessionEvent);
    fn on_message_event(&self, event: &MessageEvent);
}

/// Operations of a native client session.
///
/// Methods returning `i32` report native result codes, `0` meaning success.
/// Any of them may block and may invoke the event handler on another thread.
pub trait BrokerSession: Send + Sync {
    fn start(&self, timeout: Duration) -> i32;
    fn start_async(&self, timeout: Duration) -> i32;
    fn stop(&self);
    fn stop_async(&self);
    fn finalize_stop(&self);

    fn open_queue_sync(
        &self,
        uri: &str,
        flags: QueueFlags,
        options: &QueueOptions,
        timeout: Duration,
    ) -> QueueStatus;
    fn open_queue_async(
        &self,
        uri: &str,
        flags: QueueFlags,
        options: &QueueOptions,
        timeout: Duration,
    ) -> i32;
    fn configure_queue_sync(
        &self,
        queue: &QueueId,
        options: &QueueOptions,
        timeout: Duration,
    ) -> QueueStatus;
    fn configure_queue_async(
        &self,
        queue: &QueueId,
        options: &QueueOptions,
        timeout: Duration,
    ) -> i32;
    fn close_queue_sync(&self, queue: &QueueId, timeout: Duration) -> QueueStatus;
    fn close_queue_async(&self, queue: &QueueId, timeout: Duration) -> i32;

    fn get_queue_id(&self, uri: &str) -> Option<QueueId>;
    fn get_queue_id_by_correlation(&self, correlation: &CorrelationId) -> Option<QueueId>;

    fn message_event_builder(&self) -> MessageEventBuilder {
        MessageEventBuilder::new()
    }
    fn post(&self, event: MessageEvent) -> Result<(), PostRejected>;

    fn confirm_message(&self, cookie: &ConfirmCookie) -> i32;
    fn confirm_messages(&self, cookies: &[ConfirmCookie]) -> i32;

    fn next_event(&self, timeout: Duration) -> Option<NativeEvent>;
    fn configure_message_dumping(&self, command: &str) -> i32;
}

/// Factory for native sessions.
pub trait BrokerConnector {
    /// Create a session delivering its events to `handler`.
    ///
    /// `runtime` is the host execution lock the session's worker threads must
    /// take before touching host state.
    fn connect(
        &self,
        handler: Arc<dyn SessionEventHandler>,
        options: &SessionOptions,
        runtime: Arc<HostRuntime>,
    ) -> anyhow::Result<Box<dyn BrokerSession>>;
}
