//! ---
//! bmq_section: "02-host-bridge-core"
//! bmq_subsection: "module"
//! bmq_type: "source"
//! bmq_scope: "code"
//! bmq_description: "Integer result and event codes exchanged with the native client."
//! bmq_version: "v0.0.0-prealpha"
//! bmq_owner: "tbd"
//! ---
//! Named tables for the integer codes the native client reports.
//!
//! Every table maps the client's integer value to its ASCII name. Codes outside a
//! table render as [`UNKNOWN_NAME`] so diagnostics never fail on a newer client.

use strum::{FromRepr, IntoStaticStr};

/// Rendering used for codes a table does not know.
pub const UNKNOWN_NAME: &str = "(* UNKNOWN *)";

/// Shared behaviour of the code tables.
pub trait ResultCode: Copy + Into<&'static str> {
    /// Look up a table entry by integer code.
    fn from_code(code: i32) -> Option<Self>;
    /// Integer code of the entry.
    fn code(self) -> i32;

    /// ASCII name of the entry.
    fn name(self) -> &'static str {
        self.into()
    }
}

/// ASCII name for `code` in table `T`, or [`UNKNOWN_NAME`].
pub fn name<T: ResultCode>(code: i32) -> &'static str {
    T::from_code(code).map(ResultCode::name).unwrap_or(UNKNOWN_NAME)
}

/// `NAME (code)` rendering used in error messages.
pub fn describe<T: ResultCode>(code: i32) -> String {
    format!("{} ({})", name::<T>(code), code)
}

macro_rules! code_table {
    ($($table:ident),+ $(,)?) => {
        $(
            impl ResultCode for $table {
                fn from_code(code: i32) -> Option<Self> {
                    Self::from_repr(code)
                }

                fn code(self) -> i32 {
                    self as i32
                }
            }
        )+
    };
}

/// Generic outcome of a native operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum GenericResult {
    Success = 0,
    Unknown = -1,
    Timeout = -2,
    NotConnected = -3,
    Canceled = -4,
    NotSupported = -5,
    Refused = -6,
    InvalidArgument = -7,
    NotReady = -8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum OpenQueueResult {
    Success = 0,
    Unknown = -1,
    Timeout = -2,
    NotConnected = -3,
    Canceled = -4,
    NotSupported = -5,
    Refused = -6,
    InvalidArgument = -7,
    NotReady = -8,
    AlreadyOpened = -100,
    AlreadyInProgress = -101,
    InvalidUri = -102,
    InvalidFlags = -103,
    #[strum(to_string = "CORRELATIONID_NOT_UNIQUE")]
    CorrelationIdNotUnique = -104,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum ConfigureQueueResult {
    Success = 0,
    Unknown = -1,
    Timeout = -2,
    NotConnected = -3,
    Canceled = -4,
    NotSupported = -5,
    Refused = -6,
    InvalidArgument = -7,
    NotReady = -8,
    AlreadyInProgress = -100,
    InvalidQueue = -101,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum CloseQueueResult {
    Success = 0,
    Unknown = -1,
    Timeout = -2,
    NotConnected = -3,
    Canceled = -4,
    NotSupported = -5,
    Refused = -6,
    InvalidArgument = -7,
    NotReady = -8,
    AlreadyClosed = -100,
    AlreadyInProgress = -101,
    UnknownQueue = -102,
    InvalidQueue = -103,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum PostResult {
    Success = 0,
    Unknown = -1,
    Timeout = -2,
    NotConnected = -3,
    Canceled = -4,
    NotSupported = -5,
    Refused = -6,
    InvalidArgument = -7,
    NotReady = -8,
    BwLimit = -100,
}

/// Outcome reported inside an acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum AckResult {
    Success = 0,
    Unknown = -1,
    Timeout = -2,
    NotConnected = -3,
    Canceled = -4,
    NotSupported = -5,
    Refused = -6,
    InvalidArgument = -7,
    NotReady = -8,
    LimitMessages = -100,
    LimitBytes = -101,
    StorageFailure = -104,
}

/// Outcome of packing a message into an outgoing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum EventBuilderResult {
    Success = 0,
    Unknown = -1,
    QueueInvalid = -100,
    QueueReadonly = -101,
    MissingCorrelationId = -102,
    EventTooBig = -103,
    PayloadTooBig = -104,
    PayloadEmpty = -105,
    OptionTooBig = -106,
    QueueSuspended = -108,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum SessionEventType {
    Error = -1,
    Timeout = -2,
    Canceled = -3,
    Undefined = 0,
    Connected = 1,
    Disconnected = 2,
    ConnectionLost = 3,
    Reconnected = 4,
    StateRestored = 5,
    ConnectionTimeout = 6,
    QueueOpenResult = 7,
    QueueReopenResult = 8,
    QueueCloseResult = 9,
    #[strum(to_string = "SLOWCONSUMER_NORMAL")]
    SlowConsumerNormal = 10,
    #[strum(to_string = "SLOWCONSUMER_HIGHWATERMARK")]
    SlowConsumerHighWatermark = 11,
    QueueConfigureResult = 12,
    HostUnhealthy = 13,
    HostHealthRestored = 14,
    QueueSuspended = 15,
    QueueResumed = 16,
}

impl SessionEventType {
    /// Event types that name the affected queue.
    pub fn carries_queue(self) -> bool {
        matches!(
            self,
            SessionEventType::QueueReopenResult
                | SessionEventType::QueueSuspended
                | SessionEventType::QueueResumed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum MessageEventType {
    Undefined = 0,
    Ack = 1,
    Put = 2,
    Push = 3,
}

/// Wire type tags of message properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum PropertyType {
    Undefined = 0,
    Bool = 1,
    Char = 2,
    Short = 3,
    Int32 = 4,
    Int64 = 5,
    String = 6,
    Binary = 7,
}

impl PropertyType {
    /// Lowest tag the native client declares as supported.
    pub const LOWEST_SUPPORTED: i32 = 1;
    /// Highest tag the native client declares as supported.
    pub const HIGHEST_SUPPORTED: i32 = 7;
}

code_table!(
    GenericResult,
    OpenQueueResult,
    ConfigureQueueResult,
    CloseQueueResult,
    PostResult,
    AckResult,
    EventBuilderResult,
    SessionEventType,
    MessageEventType,
    PropertyType,
);
