use criterion::{criterion_group, criterion_main, Criterion};

use spanflow_trace::{sampler, start_span, Conf, SpanId, Tracer};

fn benchmark_start_span(c: &mut Criterion) {
    let tracer = Tracer::new("bench", &Conf::parse("span.receiver=noop")).unwrap();
    let always = sampler::always_sample();
    c.bench_function("start_span", move |b| {
        b.iter(|| {
            let scope = start_span(&tracer, Some(&always), "/foo");
            scope.close();
        })
    });
}

fn benchmark_span_id_roundtrip(c: &mut Criterion) {
    c.bench_function("span_id_roundtrip", move |b| {
        b.iter(|| {
            let id: SpanId = "deadbeefdeadbeefdeadbeefdeadbeef".parse().unwrap();
            format!("{}", id)
        })
    });
}

criterion_group!(benches, benchmark_start_span, benchmark_span_id_roundtrip);

criterion_main!(benches);
