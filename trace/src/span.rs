use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Serialize, Serializer};

use crate::span_id::SpanId;

/// Span is the record of one traced operation.
///
/// A span accumulates an end time exactly once, when the scope that owns it
/// closes; a span without an end time is "open" and is never handed to a
/// receiver. Timestamps are wall-clock milliseconds, but the end time is
/// derived from a monotonic reading so that `end >= begin` always holds.
#[derive(Clone, Debug, Serialize)]
pub struct Span {
    #[serde(rename = "a")]
    span_id: SpanId,
    #[serde(rename = "b")]
    begin_ms: u64,
    #[serde(rename = "e", serialize_with = "serialize_end")]
    end_ms: Option<u64>,
    #[serde(rename = "d")]
    desc: String,
    #[serde(rename = "r", skip_serializing_if = "String::is_empty")]
    tracer_id: String,
    #[serde(rename = "p")]
    parents: Vec<SpanId>,
    #[serde(skip)]
    begin_instant: Instant,
}

fn serialize_end<S: Serializer>(end_ms: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(end_ms.unwrap_or(0))
}

/// The current wall-clock time in milliseconds since the epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() * 1000 + u64::from(d.subsec_millis()))
        .unwrap_or(0)
}

impl Span {
    pub(crate) fn new(span_id: SpanId, desc: &str, tracer_id: &str, parents: Vec<SpanId>) -> Span {
        Span {
            span_id,
            begin_ms: now_ms(),
            end_ms: None,
            desc: desc.to_string(),
            tracer_id: tracer_id.to_string(),
            parents,
            begin_instant: Instant::now(),
        }
    }

    /// The span's identity.
    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    /// The human-readable description supplied at creation.
    pub fn desc(&self) -> &str {
        &self.desc
    }

    /// The identity string of the tracer that created this span.
    pub fn tracer_id(&self) -> &str {
        &self.tracer_id
    }

    /// The identities of this span's causal parents. Empty for a trace root.
    pub fn parents(&self) -> &[SpanId] {
        &self.parents
    }

    /// Begin time in wall-clock milliseconds.
    pub fn begin_ms(&self) -> u64 {
        self.begin_ms
    }

    /// End time in wall-clock milliseconds, or None while the span is open.
    pub fn end_ms(&self) -> Option<u64> {
        self.end_ms
    }

    /// Whether the span has not been ended yet.
    pub fn is_open(&self) -> bool {
        self.end_ms.is_none()
    }

    /// Adds a parent for fan-in spans, keeping the set sorted and deduplicated.
    pub fn add_parent(&mut self, parent: SpanId) {
        if !parent.is_valid() {
            return;
        }
        self.parents.push(parent);
        self.sort_and_dedupe_parents();
    }

    fn sort_and_dedupe_parents(&mut self) {
        self.parents.sort();
        self.parents.dedup();
    }

    /// Stamps the end time. Only the first call has an effect.
    pub(crate) fn set_end(&mut self) {
        if self.end_ms.is_none() {
            let elapsed = self.begin_instant.elapsed();
            let elapsed_ms = elapsed.as_secs() * 1000 + u64::from(elapsed.subsec_millis());
            self.end_ms = Some(self.begin_ms + elapsed_ms);
        }
    }
}
