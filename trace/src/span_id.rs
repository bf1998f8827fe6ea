use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::de::{self, Deserialize, Deserializer};
use serde::{Serialize, Serializer};
use thiserror::Error;

/// The length of a span ID in hexadecimal string form.
pub const SPAN_ID_STRING_LENGTH: usize = 32;

/// SpanId is a 128-bit identifier for a single span.
///
/// The all-zero value is reserved as the invalid/absent sentinel. Span IDs
/// order lexicographically on (high, low) and render as exactly 32 lowercase
/// hex characters, which is also the cross-process interchange form for
/// parent identifiers.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct SpanId {
    high: u64,
    low: u64,
}

/// SpanIdParseError describes why a span ID string was rejected.
#[derive(Clone, Eq, PartialEq, Debug, Error)]
pub enum SpanIdParseError {
    /// The input was not exactly 32 characters long.
    #[error("span id must be exactly 32 characters, got {0}")]
    BadLength(usize),
    /// The input contained a character outside [0-9a-fA-F].
    #[error("span id contains non-hexadecimal characters: {0:?}")]
    BadHex(String),
}

impl SpanId {
    /// The invalid/absent sentinel.
    pub const INVALID: SpanId = SpanId { high: 0, low: 0 };

    /// Creates a span ID from its two 64-bit halves.
    pub fn new(high: u64, low: u64) -> SpanId {
        SpanId { high, low }
    }

    /// The upper 64 bits. Child spans share this half with their first parent.
    pub fn high(self) -> u64 {
        self.high
    }

    /// The lower 64 bits.
    pub fn low(self) -> u64 {
        self.low
    }

    /// Returns true unless this is the invalid sentinel.
    pub fn is_valid(self) -> bool {
        self != SpanId::INVALID
    }

    /// Resets this ID to the invalid sentinel.
    pub fn clear(&mut self) {
        *self = SpanId::INVALID;
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.high, self.low)
    }
}

impl FromStr for SpanId {
    type Err = SpanIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lazy_static! {
            static ref SPAN_ID_RE: Regex = Regex::new(r"^[0-9a-fA-F]{32}$").unwrap();
        }
        if s.len() != SPAN_ID_STRING_LENGTH {
            return Err(SpanIdParseError::BadLength(s.len()));
        }
        if !SPAN_ID_RE.is_match(s) {
            return Err(SpanIdParseError::BadHex(s.to_string()));
        }
        // The regex guarantees both halves parse.
        let high =
            u64::from_str_radix(&s[..16], 16).map_err(|_| SpanIdParseError::BadHex(s.to_string()))?;
        let low =
            u64::from_str_radix(&s[16..], 16).map_err(|_| SpanIdParseError::BadHex(s.to_string()))?;
        Ok(SpanId { high, low })
    }
}

impl Serialize for SpanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SpanId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
