//! ---
//! bmq_section: "03-mock-replay-harness"
//! bmq_subsection: "module"
//! bmq_type: "source"
//! bmq_scope: "code"
//! bmq_description: "Scripted push and ack batches and their newline-delimited JSON replay format."
//! bmq_version: "v0.0.0-prealpha"
//! bmq_owner: "tbd"
//! ---
//! Scripted event queues.
//!
//! Opening a queue drains at most one push batch and posting drains at most
//! one ack batch, front first.
//!
//! Script files hold one JSON object per line:
//!
//! ```text
//! {"push": [{"payload": "hello", "guid": "00000000000000000000000000000001", "queue_uri": "bmq://d/q", "properties": {"n": [7, 5]}}]}
//! {"ack": [{"status": 0, "guid": "...", "queue_uri": "bmq://d/q", "correlation": "posted"}]}
//! ```
//!
//! Properties map a key to `[value, type_code]`. CHAR and BINARY values are
//! hex strings.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use bmq_bridge::codes::PropertyType;
use bmq_bridge::properties::{self, MessageProperties};
use bmq_bridge::{CorrelationId, HostValue, MessageGuid, PropertyError, PropertySet, PropertyTag};
use bytes::Bytes;
use indexmap::IndexMap;
use serde::Deserialize;

/// One message of a scripted push batch.
#[derive(Debug, Clone)]
pub struct ScriptedPush {
    pub payload: Bytes,
    pub guid: MessageGuid,
    pub queue_uri: String,
    pub properties: PropertySet,
    /// Delivered verbatim instead of encoding `properties`.
    pub wire_properties: Option<MessageProperties>,
}

impl ScriptedPush {
    pub fn new(payload: impl Into<Bytes>, guid: MessageGuid, queue_uri: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            guid,
            queue_uri: queue_uri.into(),
            properties: PropertySet::new(),
            wire_properties: None,
        }
    }

    pub fn with_properties(mut self, properties: PropertySet) -> Self {
        self.properties = properties;
        self
    }

    /// Bypass the encoder, e.g. to deliver a tag the codec does not know.
    pub fn with_wire_properties(mut self, wire: MessageProperties) -> Self {
        self.wire_properties = Some(wire);
        self
    }

    pub fn encoded_properties(&self) -> std::result::Result<MessageProperties, PropertyError> {
        match &self.wire_properties {
            Some(wire) => Ok(wire.clone()),
            None => properties::encode(&self.properties),
        }
    }
}

/// Correlation carried by a scripted acknowledgement.
#[derive(Debug, Clone, Default)]
pub enum ScriptedCorrelation {
    /// The handle attached to the post that drained this batch.
    #[default]
    Posted,
    Handle(CorrelationId),
    Unset,
}

/// One acknowledgement of a scripted ack batch.
#[derive(Debug, Clone)]
pub struct ScriptedAck {
    pub status: i32,
    pub guid: MessageGuid,
    pub queue_uri: String,
    pub correlation: ScriptedCorrelation,
}

impl ScriptedAck {
    pub fn new(status: i32, guid: MessageGuid, queue_uri: impl Into<String>) -> Self {
        Self {
            status,
            guid,
            queue_uri: queue_uri.into(),
            correlation: ScriptedCorrelation::Posted,
        }
    }

    pub fn with_correlation(mut self, correlation: ScriptedCorrelation) -> Self {
        self.correlation = correlation;
        self
    }
}

/// Pending push and ack batches.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEvents {
    push: VecDeque<Vec<ScriptedPush>>,
    ack: VecDeque<Vec<ScriptedAck>>,
}

impl ScriptedEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue_push(&mut self, batch: Vec<ScriptedPush>) -> &mut Self {
        self.push.push_back(batch);
        self
    }

    pub fn enqueue_ack(&mut self, batch: Vec<ScriptedAck>) -> &mut Self {
        self.ack.push_back(batch);
        self
    }

    pub fn pop_push(&mut self) -> Option<Vec<ScriptedPush>> {
        self.push.pop_front()
    }

    pub fn pop_ack(&mut self) -> Option<Vec<ScriptedAck>> {
        self.ack.pop_front()
    }

    pub fn pending_push(&self) -> usize {
        self.push.len()
    }

    pub fn pending_ack(&self) -> usize {
        self.ack.len()
    }

    /// Append every batch of `other` behind the ones already queued.
    pub fn extend(&mut self, other: ScriptedEvents) {
        self.push.extend(other.push);
        self.ack.extend(other.ack);
    }

    /// Read batches from a newline-delimited JSON script.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("unable to open script file {}", path.display()))?;
        let reader = BufReader::new(file);
        let mut events = ScriptedEvents::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: ScriptRecord = serde_json::from_str(&line)
                .with_context(|| format!("{}:{}: malformed record", path.display(), index + 1))?;
            match record {
                ScriptRecord::Push(batch) => {
                    let batch = batch
                        .into_iter()
                        .map(PushRecord::into_scripted)
                        .collect::<Result<Vec<_>>>()
                        .with_context(|| format!("{}:{}", path.display(), index + 1))?;
                    events.enqueue_push(batch);
                }
                ScriptRecord::Ack(batch) => {
                    let batch = batch
                        .into_iter()
                        .map(AckLine::into_scripted)
                        .collect::<Result<Vec<_>>>()
                        .with_context(|| format!("{}:{}", path.display(), index + 1))?;
                    events.enqueue_ack(batch);
                }
            }
        }
        tracing::debug!(
            script = %path.display(),
            push_batches = events.pending_push(),
            ack_batches = events.pending_ack(),
            "loaded scripted events"
        );
        Ok(events)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ScriptRecord {
    Push(Vec<PushRecord>),
    Ack(Vec<AckLine>),
}

#[derive(Debug, Deserialize)]
struct PushRecord {
    payload: String,
    guid: String,
    queue_uri: String,
    #[serde(default)]
    properties: IndexMap<String, (serde_json::Value, i64)>,
}

impl PushRecord {
    fn into_scripted(self) -> Result<ScriptedPush> {
        let guid = MessageGuid::from_hex(&self.guid)
            .map_err(|_| anyhow!("invalid GUID '{}'", self.guid))?;
        let mut properties = PropertySet::new();
        for (key, (value, code)) in self.properties {
            let tag = PropertyTag(code);
            let value = host_value(&key, value, tag)?;
            properties.insert(key, value, tag);
        }
        Ok(ScriptedPush::new(self.payload.into_bytes(), guid, self.queue_uri)
            .with_properties(properties))
    }
}

fn host_value(key: &str, value: serde_json::Value, tag: PropertyTag) -> Result<HostValue> {
    use serde_json::Value;

    let hex_typed = matches!(
        tag.property_type(),
        Some(PropertyType::Char | PropertyType::Binary)
    );
    match value {
        Value::Bool(flag) => Ok(HostValue::Bool(flag)),
        Value::Number(number) => number
            .as_i64()
            .map(|int| HostValue::Int(int.into()))
            .ok_or_else(|| anyhow!("property '{key}' must be an integer, got {number}")),
        Value::String(text) if hex_typed => hex::decode(&text)
            .map(HostValue::Bytes)
            .with_context(|| format!("property '{key}' must be hex encoded")),
        Value::String(text) => Ok(HostValue::Str(text)),
        other => bail!("property '{key}' has unsupported value {other}"),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum CorrelationField {
    #[default]
    Posted,
    Unset,
}

#[derive(Debug, Deserialize)]
struct AckLine {
    status: i32,
    guid: String,
    queue_uri: String,
    #[serde(default)]
    correlation: CorrelationField,
}

impl AckLine {
    fn into_scripted(self) -> Result<ScriptedAck> {
        let guid = MessageGuid::from_hex(&self.guid)
            .map_err(|_| anyhow!("invalid GUID '{}'", self.guid))?;
        let correlation = match self.correlation {
            CorrelationField::Posted => ScriptedCorrelation::Posted,
            CorrelationField::Unset => ScriptedCorrelation::Unset,
        };
        Ok(ScriptedAck::new(self.status, guid, self.queue_uri).with_correlation(correlation))
    }
}
