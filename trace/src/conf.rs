use std::collections::HashMap;
use std::time::Duration;

use log::warn;

/// The span receiver implementation to use.
///
/// Possible values:
///   noop            discards all spans (the default).
///   local.file      appends spans to a local file as JSON lines.
///   collector       buffers spans and sends them to a remote collector.
pub const SPAN_RECEIVER_KEY: &str = "span.receiver";

/// The path the local file span receiver writes spans to.
pub const LOCAL_FILE_PATH_KEY: &str = "local.file.path";

/// The hostname and port of the remote collector, in "host:port" form.
pub const COLLECTOR_ADDRESS_KEY: &str = "collector.address";

/// The maximum length of time to go between flushes to the collector.
pub const COLLECTOR_FLUSH_INTERVAL_MS_KEY: &str = "collector.flush.interval.ms";

/// The TCP connect timeout used when reaching the collector.
pub const COLLECTOR_CONNECT_TIMEO_MS_KEY: &str = "collector.connect.timeo.ms";

/// The TCP write timeout used when sending a batch to the collector.
pub const COLLECTOR_WRITE_TIMEO_MS_KEY: &str = "collector.write.timeo.ms";

/// The TCP read timeout used when waiting for the collector's acknowledgment.
pub const COLLECTOR_READ_TIMEO_MS_KEY: &str = "collector.read.timeo.ms";

/// The capacity, in spans, of the collector receiver's circular buffer.
pub const COLLECTOR_BUFFER_SIZE_KEY: &str = "collector.buffer.size";

/// The fraction of the buffer that needs to be full to trigger an early send.
pub const COLLECTOR_SEND_TRIGGER_FRACTION_KEY: &str = "collector.buffer.send.trigger.fraction";

/// How many times a batch is attempted before it is discarded.
pub const COLLECTOR_MAX_SEND_ATTEMPTS_KEY: &str = "collector.max.send.attempts";

/// The bounded wait for the final drain when the receiver shuts down.
pub const COLLECTOR_SHUTDOWN_TIMEO_MS_KEY: &str = "collector.shutdown.timeo.ms";

/// The sampler to use: `never`, `always` or `prob`.
pub const SAMPLER_KEY: &str = "sampler";

/// For the probability sampler, the fraction of the time a new span is
/// started. A floating point number between 0.0 and 1.0; values of 1.0 or
/// more behave as the always sampler. Not a percentage.
pub const PROB_SAMPLER_FRACTION_KEY: &str = "prob.sampler.fraction";

/// The tracer ID template. `%{tname}` is replaced by the tracer name and
/// `%{pid}` by the operating system process ID. Defaults to `%{tname}/%{pid}`.
pub const TRACER_ID_KEY: &str = "tracer.id";

/// Conf is a parsed configuration-string snapshot.
///
/// Values are only read, never written back; every subsystem takes what it
/// needs at construction time and does not retain the Conf.
#[derive(Clone, Debug, Default)]
pub struct Conf {
    values: HashMap<String, String>,
}

impl Conf {
    /// Parses a configuration string of semicolon-separated `key=value`
    /// pairs. A bare token with no `=` sets that key to `"true"`; empty
    /// segments are ignored; the last occurrence of a duplicated key wins.
    pub fn parse(values: &str) -> Conf {
        let mut map = HashMap::new();
        for segment in values.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            match segment.find('=') {
                Some(idx) => {
                    map.insert(segment[..idx].to_string(), segment[idx + 1..].to_string());
                }
                None => {
                    map.insert(segment.to_string(), "true".to_string());
                }
            }
        }
        Conf { values: map }
    }

    /// Looks up a raw value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Returns true if the key is set to `"true"`.
    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key) == Some("true")
    }

    /// Reads an unsigned integer, falling back to `default` (with a warning)
    /// when the value is absent or malformed.
    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        match self.get(key) {
            None => default,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!("invalid value {:?} for {:?}; using {}", raw, key, default);
                default
            }),
        }
    }

    /// Reads a float, falling back to `default` (with a warning) when the
    /// value is absent or malformed.
    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        match self.get(key) {
            None => default,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!("invalid value {:?} for {:?}; using {}", raw, key, default);
                default
            }),
        }
    }

    /// Reads a duration expressed in milliseconds.
    pub fn get_ms(&self, key: &str, default_ms: u64) -> Duration {
        Duration::from_millis(self.get_u64(key, default_ms))
    }
}
