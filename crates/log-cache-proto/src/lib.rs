//! Wire types for telemetry envelopes and the cluster-internal RPC surface.
//!
//! `Envelope` is hand-annotated with `prost` field tags rather than generated
//! from a `.proto` file via `build.rs` (see `DESIGN.md`, "OQ-1"): the binary
//! layout on the wire is what the surrounding telemetry ecosystem expects,
//! but there is no `protoc` invocation in this workspace. `Envelope::encode`
//! / `Envelope::decode` (via the `prost::Message` trait) round-trip exactly
//! the bytes a generated implementation of the same schema would produce.

use std::collections::HashMap;

use prost::{Message, Oneof};
use serde::{Deserialize, Serialize};

/// A single telemetry record tagged with the `source_id` that emitted it.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
pub struct Envelope {
    #[prost(string, tag = "1")]
    pub source_id: String,
    #[prost(string, optional, tag = "2")]
    pub instance_id: Option<String>,
    /// Nanoseconds since the Unix epoch. May repeat across producers.
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
    #[prost(map = "string, string", tag = "4")]
    pub tags: HashMap<String, String>,
    #[prost(oneof = "Payload", tags = "10, 11, 12, 13, 14")]
    pub payload: Option<Payload>,
}

#[derive(Clone, PartialEq, Oneof, Serialize, Deserialize)]
pub enum Payload {
    #[prost(message, tag = "10")]
    Log(Log),
    #[prost(message, tag = "11")]
    Counter(Counter),
    #[prost(message, tag = "12")]
    Gauge(Gauge),
    #[prost(message, tag = "13")]
    Timer(Timer),
    #[prost(message, tag = "14")]
    Event(Event),
}

#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
pub struct Log {
    #[prost(bytes = "vec", tag = "1")]
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
pub struct Counter {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(uint64, tag = "2")]
    pub total: u64,
}

#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
pub struct Gauge {
    #[prost(map = "string, message", tag = "1")]
    pub metrics: HashMap<String, GaugeValue>,
}

#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
pub struct GaugeValue {
    #[prost(double, tag = "1")]
    pub value: f64,
    #[prost(string, tag = "2")]
    pub unit: String,
}

#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
pub struct Timer {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int64, tag = "2")]
    pub start: i64,
    #[prost(int64, tag = "3")]
    pub stop: i64,
}

#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
pub struct Event {
    #[prost(string, tag = "1")]
    pub title: String,
    #[prost(string, tag = "2")]
    pub body: String,
}

/// The set of envelope payload kinds, used by `Get` filters and by the
/// PromQL adapter's fixed `{gauge, counter, timer}` read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeType {
    Log,
    Counter,
    Gauge,
    Timer,
    Event,
}

impl EnvelopeType {
    pub fn of(payload: &Payload) -> Self {
        match payload {
            Payload::Log(_) => EnvelopeType::Log,
            Payload::Counter(_) => EnvelopeType::Counter,
            Payload::Gauge(_) => EnvelopeType::Gauge,
            Payload::Timer(_) => EnvelopeType::Timer,
            Payload::Event(_) => EnvelopeType::Event,
        }
    }
}

impl Envelope {
    pub fn envelope_type(&self) -> Option<EnvelopeType> {
        self.payload.as_ref().map(EnvelopeType::of)
    }
}

pub mod rpc;
