//! ---
//! bmq_section: "03-mock-replay-harness"
//! bmq_subsection: "module"
//! bmq_type: "source"
//! bmq_scope: "code"
//! bmq_description: "Deterministic stand-in for the native session used to exercise the bridge without a broker."
//! bmq_version: "v0.0.0-prealpha"
//! bmq_owner: "tbd"
//! ---
//! Mock native session for exercising the bridge without a broker.
//!
//! A [`MockSession`] implements the native session contract on top of an
//! in-memory [`ReferenceSession`]. Tests script the result codes and the
//! push/ack batches through [`MockHooks`], optionally declare the calls they
//! expect through an [`ExpectedCallQueue`], and observe deliveries with a
//! [`RecordingHost`]. Scripts can also be replayed from newline-delimited
//! JSON files. Sessions built with a host health monitor report its
//! transitions as session events.

pub mod expect;
pub mod harness;
pub mod hooks;
pub mod reference;
pub mod script;
pub mod session;

pub use expect::{ExpectationMode, ExpectedCallQueue, MockCall};
pub use harness::{MockHarness, RecordingHost};
pub use hooks::{MockHooks, ReturnCodes, ScriptedMock};
pub use reference::ReferenceSession;
pub use script::{ScriptedAck, ScriptedCorrelation, ScriptedEvents, ScriptedPush};
pub use session::{MockConnector, MockSession};
