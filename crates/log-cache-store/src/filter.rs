//! Post-read filtering: narrowing a `Get` result by envelope type, by
//! metric/counter/timer name, and (for gauges) by individual metric key.

use std::collections::HashSet;
use std::sync::Arc;

use log_cache_proto::{Envelope, EnvelopeType, Payload};
use regex::Regex;

#[derive(Clone, Default)]
pub struct EnvelopeFilter {
    pub types: Option<HashSet<EnvelopeType>>,
    pub name: Option<Regex>,
}

impl EnvelopeFilter {
    pub fn new(types: Option<HashSet<EnvelopeType>>, name: Option<Regex>) -> Self {
        Self { types, name }
    }

    /// Builds a filter from a raw, possibly-absent name pattern, surfacing
    /// an invalid regex as `StoreError::InvalidNameFilter` instead of
    /// panicking — the shape callers at the HTTP boundary need to turn a
    /// bad `name_filter` query parameter into a `bad_data` response.
    pub fn parse(
        types: Option<HashSet<EnvelopeType>>,
        name_filter: Option<&str>,
    ) -> Result<Self, crate::StoreError> {
        let name = name_filter.map(Regex::new).transpose()?;
        Ok(Self::new(types, name))
    }

    pub fn is_noop(&self) -> bool {
        self.types.is_none() && self.name.is_none()
    }

    /// Applies the filter to a single envelope, returning `None` if it is
    /// excluded entirely, `Some` (possibly a synthesized copy with a
    /// narrowed `Gauge` payload) otherwise.
    pub fn apply(&self, envelope: &Arc<Envelope>) -> Option<Arc<Envelope>> {
        if let Some(types) = &self.types {
            match envelope.envelope_type() {
                Some(t) if types.contains(&t) => {}
                _ => return None,
            }
        }

        let Some(pattern) = &self.name else {
            return Some(envelope.clone());
        };

        match &envelope.payload {
            Some(Payload::Counter(c)) => {
                if pattern.is_match(&c.name) {
                    Some(envelope.clone())
                } else {
                    None
                }
            }
            Some(Payload::Timer(t)) => {
                if pattern.is_match(&t.name) {
                    Some(envelope.clone())
                } else {
                    None
                }
            }
            Some(Payload::Gauge(g)) => {
                let retained: std::collections::HashMap<_, _> = g
                    .metrics
                    .iter()
                    .filter(|(k, _)| pattern.is_match(k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                if retained.is_empty() {
                    return None;
                }
                let mut narrowed = (**envelope).clone();
                narrowed.payload = Some(Payload::Gauge(log_cache_proto::Gauge { metrics: retained }));
                Some(Arc::new(narrowed))
            }
            // Log and Event carry no name; a name filter does not apply to them.
            _ => Some(envelope.clone()),
        }
    }
}
