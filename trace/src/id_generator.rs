use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{BigEndian, ByteOrder};
use rand_core::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

use crate::span_id::SpanId;

/// IdGenerator produces span IDs.
///
/// Implementations must be safe for concurrent use.
pub trait IdGenerator: Send + Sync {
    /// Generates a new, valid span ID.
    ///
    /// When a parent is given, the upper 64 bits of the new ID are the upper
    /// 64 bits of the parent, so the spans of one trace share a common
    /// prefix. The lower 64 bits are always random.
    fn new_span_id(&self, parent: Option<&SpanId>) -> SpanId;
}

/// The default random span ID generator.
pub struct DefaultIdGenerator {
    source: Mutex<Xoshiro256Plus>,
}

impl DefaultIdGenerator {
    /// Creates a generator seeded from the clock and thread identity.
    pub fn new() -> Self {
        DefaultIdGenerator {
            source: Mutex::new(Xoshiro256Plus::seed_from_u64(entropy_seed())),
        }
    }
}

impl Default for DefaultIdGenerator {
    fn default() -> Self {
        DefaultIdGenerator::new()
    }
}

impl IdGenerator for DefaultIdGenerator {
    fn new_span_id(&self, parent: Option<&SpanId>) -> SpanId {
        let mut buf: [u8; 16] = [0; 16];
        let mut source = self.source.lock().unwrap();
        loop {
            (*source).fill_bytes(&mut buf[..]);
            let high = match parent {
                Some(p) if p.is_valid() => p.high(),
                _ => BigEndian::read_u64(&buf[..8]),
            };
            let id = SpanId::new(high, BigEndian::read_u64(&buf[8..]));
            // The all-zero ID is the invalid sentinel; draw again.
            if id.is_valid() {
                return id;
            }
        }
    }
}

pub(crate) fn entropy_seed() -> u64 {
    let mut hasher = DefaultHasher::new();
    thread::current().id().hash(&mut hasher);
    if let Ok(now) = SystemTime::now().duration_since(UNIX_EPOCH) {
        now.as_secs().hash(&mut hasher);
        now.subsec_nanos().hash(&mut hasher);
    }
    hasher.finish()
}
