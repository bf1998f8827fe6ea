/*!
Distributed tracing client library.

Applications open scopes around units of work. The library decides via a
sampler whether the work gets a span, assigns the span a 128-bit identity,
links it to its causal parent on the current thread, and hands it to the
configured span receiver when the scope closes.

### Creating a tracer

All tracing happens against an explicitly created, caller-held tracer; there
is no process-wide tracing state. The tracer resolves its span receiver from
a configuration string and starts the receiver's background worker:

```rust
use spanflow_trace::{Conf, Tracer};

let conf = Conf::parse("span.receiver=noop;sampler=always");
let tracer = Tracer::new("example", &conf).unwrap();
```

Configure `span.receiver=collector;collector.address=host:port` to buffer
completed spans and ship them in batches to a remote collector from a
background thread. Producer threads never block on the network: if the
buffer fills or the collector stays down, spans are counted and dropped.

### Opening scopes

```rust
use spanflow_trace::{sampler, start_span, Conf, Tracer};

let conf = Conf::parse("span.receiver=noop");
let tracer = Tracer::new("example", &conf).unwrap();
let every_tenth = sampler::probability_sampler(0.1);

let outer = start_span(&tracer, Some(&every_tenth), "load");
{
    // Children of an active span are always recorded, whatever the
    // sampler says.
    let inner = start_span(&tracer, None, "load/parse");
    inner.close();
}
outer.close();
```

Scopes close on drop; `close` is just the explicit spelling. Spans can be
detached from their scope, moved to another thread, and resumed there with
`restart_span`. A trace arriving from another process continues with
`start_span_from_parent` and the parent's 32-character hex identity.

Be careful about using `sampler::always_sample` in a production application
with significant traffic: a new span will be started and exported for every
sampled call site.
*/
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

/// Configuration parsing and the recognized keys.
pub mod conf;
mod id_generator;
/// Buffered network span receiver.
pub mod net_receiver;
/// Span receivers and their resolution from configuration.
pub mod receiver;
/// Trace sampling.
pub mod sampler;
mod scope;
mod span;
mod span_id;
mod tracer;

pub use crate::conf::Conf;
pub use crate::id_generator::{DefaultIdGenerator, IdGenerator};
pub use crate::scope::{current_span_id, restart_span, start_span, start_span_from_parent, Scope};
pub use crate::span::Span;
pub use crate::span_id::{SpanId, SpanIdParseError, SPAN_ID_STRING_LENGTH};
pub use crate::tracer::{Tracer, TracerError};
