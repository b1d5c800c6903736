//! Request/response bodies for the cluster-internal and external HTTP
//! surfaces. These travel as JSON over `axum` (server side) and `reqwest`
//! (client side) rather than as a generated gRPC service; see
//! `DESIGN.md`, "OQ-1".

use std::collections::HashMap;
use std::fmt;

use serde::de::{SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Envelope, EnvelopeType};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SendRequest {
    pub envelopes: Vec<Envelope>,
    #[serde(default)]
    pub local_only: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Ack {}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReadRequest {
    pub source_id: String,
    #[serde(default)]
    pub start_time: i64,
    #[serde(default = "i64::max_value")]
    pub end_time: i64,
    #[serde(default)]
    pub limit: usize,
    /// Empty means "any type".
    #[serde(default)]
    pub envelope_types: Vec<EnvelopeType>,
    #[serde(default)]
    pub descending: bool,
    #[serde(default)]
    pub name_filter: Option<String>,
    #[serde(default)]
    pub local_only: bool,
}

impl Default for ReadRequest {
    fn default() -> Self {
        ReadRequest {
            source_id: String::new(),
            start_time: 0,
            end_time: i64::MAX,
            limit: usize::MAX,
            envelope_types: Vec::new(),
            descending: false,
            name_filter: None,
            local_only: false,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReadResponse {
    pub envelopes: Vec<Envelope>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MetaRequest {
    #[serde(default)]
    pub local_only: bool,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SourceMeta {
    pub count: u64,
    pub expired: u64,
    pub oldest_ts: i64,
    pub newest_ts: i64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MetaResponse {
    pub sources: HashMap<String, SourceMeta>,
}

/// One `[start, end]` slice of the 64-bit hash space, inclusive on both
/// ends.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HashRange {
    pub start: u64,
    pub end: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SetRangesRequest {
    /// Ordered node addresses; the Nth entry owns `ranges[node]`. Order is
    /// part of the contract: it is the node-index order used by `Lookup`.
    pub nodes: Vec<String>,
    pub ranges: HashMap<String, Vec<HashRange>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AddRangeRequest {
    pub node: String,
    pub range: HashRange,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoveRangeRequest {
    pub node: String,
    pub range: HashRange,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ListRangesResponse {
    pub nodes: Vec<String>,
    pub ranges: HashMap<String, Vec<HashRange>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstantQueryRequest {
    pub query: String,
    pub time: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RangeQueryRequest {
    pub query: String,
    pub start: String,
    pub end: String,
    pub step: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
pub enum QueryResult {
    Scalar(ScalarSample),
    Vector(Vec<VectorSample>),
    Matrix(Vec<MatrixSeries>),
}

/// `(timestamp_seconds, value)` as Prometheus's JSON API encodes it. The
/// timestamp is rendered with exactly 3 decimal places (§6: "Time values
/// are formatted as fractional seconds with 3 decimal places"), so the
/// field gets a hand-written `Serialize`/`Deserialize` rather than the
/// derive, which would emit `f64`'s minimal representation instead (e.g.
/// `2.0` rather than `2.000`).
#[derive(Clone, Debug, PartialEq)]
pub struct ScalarSample(pub f64, pub String);

impl Serialize for ScalarSample {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let timestamp = serde_json::value::RawValue::from_string(format!("{:.3}", self.0))
            .map_err(serde::ser::Error::custom)?;
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&timestamp)?;
        tuple.serialize_element(&self.1)?;
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for ScalarSample {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ScalarSampleVisitor;

        impl<'de> Visitor<'de> for ScalarSampleVisitor {
            type Value = ScalarSample;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a [timestamp, value] pair")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let timestamp: f64 = seq
                    .next_element()?
                    .ok_or_else(|| serde::de::Error::invalid_length(0, &self))?;
                let value: String = seq
                    .next_element()?
                    .ok_or_else(|| serde::de::Error::invalid_length(1, &self))?;
                Ok(ScalarSample(timestamp, value))
            }
        }

        deserializer.deserialize_tuple(2, ScalarSampleVisitor)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VectorSample {
    pub metric: HashMap<String, String>,
    pub value: ScalarSample,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatrixSeries {
    pub metric: HashMap<String, String>,
    pub values: Vec<ScalarSample>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadData,
    Timeout,
    Internal,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub status: &'static str,
    #[serde(rename = "errorType")]
    pub error_type: ErrorKind,
    pub error: String,
}

impl ApiErrorBody {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        ApiErrorBody {
            status: "error",
            error_type: kind,
            error: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_sample_renders_timestamp_with_three_decimal_places() {
        let sample = ScalarSample(2.0, "104".to_string());
        let json = serde_json::to_string(&sample).unwrap();
        assert_eq!(json, r#"[2.000,"104"]"#);
    }

    #[test]
    fn scalar_sample_round_trips_through_json() {
        let sample = ScalarSample(1_435_781_451.781, "0.5".to_string());
        let json = serde_json::to_string(&sample).unwrap();
        let decoded: ScalarSample = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.1, "0.5");
        assert!((decoded.0 - 1_435_781_451.781).abs() < 1e-6);
    }
}
