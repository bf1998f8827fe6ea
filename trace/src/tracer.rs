use std::sync::Arc;

use thiserror::Error;

use crate::conf::{Conf, TRACER_ID_KEY};
use crate::id_generator::{DefaultIdGenerator, IdGenerator};
use crate::receiver::{self, SpanReceiver};

const DEFAULT_TRACER_ID_TEMPLATE: &str = "%{tname}/%{pid}";

/// TracerError describes why a tracer could not be created.
#[derive(Clone, Eq, PartialEq, Debug, Error)]
pub enum TracerError {
    /// The tracer name was empty.
    #[error("tracer name must not be empty")]
    EmptyName,
}

/// Tracer is the shared, thread-safe tracing context.
///
/// It owns the configured span receiver and the identity generator, and is
/// passed explicitly wherever tracing happens; there is no process-wide
/// tracing state. A tracer must outlive every sampler and scope created
/// against it. Dropping the last handle drains and closes the receiver
/// within its bounded shutdown timeout.
pub struct Tracer {
    name: String,
    tracer_id: String,
    id_generator: Box<dyn IdGenerator>,
    rcv: Arc<dyn SpanReceiver>,
}

impl Tracer {
    /// Creates a tracer, resolving the span receiver from configuration and
    /// starting its background worker if it has one.
    ///
    /// Receiver misconfiguration is recoverable: the tracer falls back to
    /// the no-op receiver with a warning rather than failing, so tracing can
    /// never break the host application. The configuration may be freed
    /// after this returns.
    pub fn new(name: &str, conf: &Conf) -> Result<Arc<Tracer>, TracerError> {
        if name.is_empty() {
            return Err(TracerError::EmptyName);
        }
        let template = conf.get(TRACER_ID_KEY).unwrap_or(DEFAULT_TRACER_ID_TEMPLATE);
        Ok(Arc::new(Tracer {
            name: name.to_string(),
            tracer_id: expand_tracer_id(template, name),
            id_generator: Box::new(DefaultIdGenerator::new()),
            rcv: receiver::from_conf(conf),
        }))
    }

    /// Creates a tracer around a caller-supplied receiver.
    pub fn with_receiver(
        name: &str,
        rcv: Arc<dyn SpanReceiver>,
    ) -> Result<Arc<Tracer>, TracerError> {
        if name.is_empty() {
            return Err(TracerError::EmptyName);
        }
        Ok(Arc::new(Tracer {
            name: name.to_string(),
            tracer_id: expand_tracer_id(DEFAULT_TRACER_ID_TEMPLATE, name),
            id_generator: Box::new(DefaultIdGenerator::new()),
            rcv,
        }))
    }

    /// The tracer name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The expanded tracer identity string stamped onto every span.
    pub fn tracer_id(&self) -> &str {
        &self.tracer_id
    }

    /// The active span receiver.
    pub fn receiver(&self) -> &Arc<dyn SpanReceiver> {
        &self.rcv
    }

    pub(crate) fn id_generator(&self) -> &dyn IdGenerator {
        self.id_generator.as_ref()
    }
}

impl Drop for Tracer {
    fn drop(&mut self) {
        self.rcv.shutdown();
    }
}

/// Expands a tracer ID template: `%{tname}` becomes the tracer name,
/// `%{pid}` the operating system process ID.
fn expand_tracer_id(template: &str, name: &str) -> String {
    template
        .replace("%{tname}", name)
        .replace("%{pid}", &std::process::id().to_string())
}
