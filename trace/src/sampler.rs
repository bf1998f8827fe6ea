use std::sync::{Arc, Mutex};

use rand_core::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use thiserror::Error;

use crate::conf::{Conf, PROB_SAMPLER_FRACTION_KEY, SAMPLER_KEY};
use crate::id_generator;

/// Sample is the decision interface: should a new top-level span begin?
///
/// Samplers are consulted only when there is no active span on the calling
/// thread; ongoing traces are never truncated by a sampler. Implementations
/// must be safe for concurrent use from many threads.
pub trait Sample: Send + Sync {
    /// Returns true if a new span should be started.
    fn next(&self) -> bool;
    /// A short human-readable name for logging.
    fn name(&self) -> &str;
}

impl std::fmt::Debug for dyn Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sample").field("name", &self.name()).finish()
    }
}

/// Sampler is a shared handle to a sampling decision object.
pub type Sampler = Arc<dyn Sample>;

/// SamplerConfError describes why a sampler could not be built from
/// configuration.
#[derive(Clone, Eq, PartialEq, Debug, Error)]
pub enum SamplerConfError {
    /// The `sampler` key was not present.
    #[error("no sampler configured under the \"sampler\" key")]
    NotConfigured,
    /// The `sampler` key named an unknown kind.
    #[error("unknown sampler kind {0:?}")]
    UnknownKind(String),
    /// A required parameter was absent or unparsable.
    #[error("sampler parameter {key:?} is missing or invalid: {value:?}")]
    BadParameter {
        /// The offending configuration key.
        key: &'static str,
        /// The raw value, if one was present.
        value: Option<String>,
    },
}

struct NeverSampler;

impl Sample for NeverSampler {
    fn next(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "never"
    }
}

struct AlwaysSampler;

impl Sample for AlwaysSampler {
    fn next(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "always"
    }
}

struct ProbabilitySampler {
    bound: u64,
    source: Mutex<Xoshiro256Plus>,
}

impl Sample for ProbabilitySampler {
    fn next(&self) -> bool {
        let mut source = self.source.lock().unwrap();
        ((*source).next_u64() >> 1) < self.bound
    }

    fn name(&self) -> &str {
        "prob"
    }
}

/// never_sample returns a Sampler that never fires.
pub fn never_sample() -> Sampler {
    Arc::new(NeverSampler)
}

/// always_sample returns a Sampler that always fires.
///
/// Be careful about using this sampler in a production application with
/// significant traffic: a new span will be started and exported for every
/// request.
pub fn always_sample() -> Sampler {
    Arc::new(AlwaysSampler)
}

/// probability_sampler returns a Sampler that fires a given fraction of the
/// time. Negative fractions behave as never; fractions of 1.0 or greater
/// behave as always.
pub fn probability_sampler(mut fraction: f64) -> Sampler {
    if fraction.is_sign_negative() || fraction.is_nan() {
        fraction = 0.0;
    } else if fraction >= 1.0 {
        return always_sample();
    }

    let bound = (fraction * ((1u64) << 63) as f64).floor() as u64;
    Arc::new(ProbabilitySampler {
        bound,
        source: Mutex::new(Xoshiro256Plus::seed_from_u64(id_generator::entropy_seed())),
    })
}

/// from_conf builds a sampler from configuration.
///
/// Recognized kinds under the `sampler` key are `never`, `always` and
/// `prob`; the latter requires `prob.sampler.fraction` in [0.0, 1.0] (values
/// of 1.0 or more behave as always). The configuration is only read, never
/// retained.
pub fn from_conf(conf: &Conf) -> Result<Sampler, SamplerConfError> {
    match conf.get(SAMPLER_KEY) {
        None => Err(SamplerConfError::NotConfigured),
        Some("never") => Ok(never_sample()),
        Some("always") => Ok(always_sample()),
        Some("prob") => {
            let raw = conf
                .get(PROB_SAMPLER_FRACTION_KEY)
                .ok_or(SamplerConfError::BadParameter {
                    key: PROB_SAMPLER_FRACTION_KEY,
                    value: None,
                })?;
            let fraction: f64 = raw.parse().map_err(|_| SamplerConfError::BadParameter {
                key: PROB_SAMPLER_FRACTION_KEY,
                value: Some(raw.to_string()),
            })?;
            if fraction.is_sign_negative() || fraction.is_nan() {
                return Err(SamplerConfError::BadParameter {
                    key: PROB_SAMPLER_FRACTION_KEY,
                    value: Some(raw.to_string()),
                });
            }
            Ok(probability_sampler(fraction))
        }
        Some(other) => Err(SamplerConfError::UnknownKind(other.to_string())),
    }
}
