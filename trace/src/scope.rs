use std::cell::Cell;
use std::sync::Arc;

use log::warn;

use crate::sampler::Sampler;
use crate::span::Span;
use crate::span_id::SpanId;
use crate::tracer::Tracer;

thread_local! {
    /// The identity of the span currently active on this thread, or the
    /// invalid sentinel. Scopes form a logical stack through their saved
    /// previous value; threads never observe each other's nesting.
    static CURRENT_SPAN: Cell<SpanId> = Cell::new(SpanId::INVALID);
}

/// The identity of the span currently active on the calling thread, or
/// `SpanId::INVALID` when there is none.
pub fn current_span_id() -> SpanId {
    CURRENT_SPAN.with(Cell::get)
}

/// Scope is the per-call-site handle that may own a span for its lifetime.
///
/// Dropping (or explicitly closing) a scope ends its span, hands it to the
/// tracer's receiver, and restores the span that was current on this thread
/// before the scope began. A scope must be closed on the thread that created
/// it, in reverse creation order; that discipline is a caller contract, not
/// an enforced invariant.
pub struct Scope {
    tracer: Arc<Tracer>,
    span: Option<Span>,
    prev: SpanId,
}

/// start_span starts a new span if necessary and returns its scope.
///
/// When a span is already active on this thread, a child of it is always
/// started, whatever the sampler would say: ongoing traces are never
/// silently truncated. With no active span, the sampler (if any) decides;
/// no sampler and no active span yields an empty scope whose close is a
/// no-op.
pub fn start_span(tracer: &Arc<Tracer>, sampler: Option<&Sampler>, desc: &str) -> Scope {
    let cur = current_span_id();
    let span = if cur.is_valid() {
        let id = tracer.id_generator().new_span_id(Some(&cur));
        Some(Span::new(id, desc, tracer.tracer_id(), vec![cur]))
    } else if sampler.map_or(false, |s| s.next()) {
        let id = tracer.id_generator().new_span_id(None);
        Some(Span::new(id, desc, tracer.tracer_id(), vec![]))
    } else {
        None
    };
    enter(tracer, span)
}

/// start_span_from_parent unconditionally starts a span whose parent is
/// exactly the given identity, bypassing sampling. Used to continue a trace
/// arriving from another process. An invalid parent yields an empty scope.
pub fn start_span_from_parent(tracer: &Arc<Tracer>, parent: &SpanId, desc: &str) -> Scope {
    if !parent.is_valid() {
        return enter(tracer, None);
    }
    let id = tracer.id_generator().new_span_id(Some(parent));
    let span = Span::new(id, desc, tracer.tracer_id(), vec![*parent]);
    enter(tracer, Some(span))
}

/// restart_span wraps a previously detached span back into a scope,
/// re-entering the calling thread's nesting. Used to resume a span on
/// another thread or continuation. A None span yields an empty scope.
pub fn restart_span(tracer: &Arc<Tracer>, span: Option<Span>) -> Scope {
    enter(tracer, span)
}

fn enter(tracer: &Arc<Tracer>, span: Option<Span>) -> Scope {
    let prev = current_span_id();
    if let Some(span) = &span {
        CURRENT_SPAN.with(|c| c.set(span.span_id()));
    }
    Scope {
        tracer: Arc::clone(tracer),
        span,
        prev,
    }
}

impl Scope {
    /// The identity of the owned span, or `SpanId::INVALID` for an empty
    /// scope.
    pub fn span_id(&self) -> SpanId {
        self.span.as_ref().map_or(SpanId::INVALID, Span::span_id)
    }

    /// Whether this scope owns a span.
    pub fn has_span(&self) -> bool {
        self.span.is_some()
    }

    /// Removes the owned span without closing or sending it, returning it to
    /// the caller. The scope becomes empty but must still be closed.
    pub fn detach(&mut self) -> Option<Span> {
        match self.span.take() {
            Some(span) => {
                CURRENT_SPAN.with(|c| c.set(self.prev));
                Some(span)
            }
            None => {
                warn!("detach called on a scope with no span");
                None
            }
        }
    }

    /// Closes the scope. Equivalent to dropping it.
    pub fn close(self) {}
}

impl Drop for Scope {
    fn drop(&mut self) {
        if let Some(mut span) = self.span.take() {
            span.set_end();
            self.tracer.receiver().submit(span);
        }
        CURRENT_SPAN.with(|c| c.set(self.prev));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;
    use std::thread;

    use crate::receiver::SpanReceiver;
    use crate::sampler::{always_sample, never_sample};

    #[derive(Default)]
    struct CollectingReceiver {
        spans: Mutex<Vec<Span>>,
    }

    impl SpanReceiver for CollectingReceiver {
        fn submit(&self, span: Span) {
            self.spans.lock().unwrap().push(span);
        }
    }

    fn collecting_tracer() -> (Arc<Tracer>, Arc<CollectingReceiver>) {
        let rcv = Arc::new(CollectingReceiver::default());
        let tracer = Tracer::with_receiver("test", Arc::<CollectingReceiver>::clone(&rcv)).unwrap();
        (tracer, rcv)
    }

    #[test]
    fn no_sampler_and_no_active_span_is_empty() {
        let (tracer, rcv) = collecting_tracer();
        let scope = start_span(&tracer, None, "orphan");
        assert!(!scope.has_span());
        assert_eq!(scope.span_id(), SpanId::INVALID);
        scope.close();
        assert!(rcv.spans.lock().unwrap().is_empty());
        assert_eq!(current_span_id(), SpanId::INVALID);
    }

    #[test]
    fn never_sampler_starts_nothing_at_top_level() {
        let (tracer, rcv) = collecting_tracer();
        let never = never_sample();
        let scope = start_span(&tracer, Some(&never), "quiet");
        assert!(!scope.has_span());
        scope.close();
        assert!(rcv.spans.lock().unwrap().is_empty());
    }

    #[test]
    fn always_sampler_starts_a_root_span() {
        let (tracer, rcv) = collecting_tracer();
        let always = always_sample();
        let scope = start_span(&tracer, Some(&always), "root");
        assert!(scope.has_span());
        assert_eq!(current_span_id(), scope.span_id());
        scope.close();

        let spans = rcv.spans.lock().unwrap();
        assert_eq!(spans.len(), 1);
        let span = &spans[0];
        assert_eq!(span.desc(), "root");
        assert_eq!(span.tracer_id(), tracer.tracer_id());
        assert!(span.parents().is_empty());
        assert!(span.end_ms().unwrap() >= span.begin_ms());
        assert_eq!(current_span_id(), SpanId::INVALID);
    }

    #[test]
    fn active_span_always_wins_over_the_sampler() {
        let (tracer, rcv) = collecting_tracer();
        let always = always_sample();
        let never = never_sample();
        let outer = start_span(&tracer, Some(&always), "outer");
        let outer_id = outer.span_id();

        // A child is started even though the sampler says no...
        let inner = start_span(&tracer, Some(&never), "inner");
        assert!(inner.has_span());
        assert_eq!(
            rcv_parent(&inner),
            outer_id,
            "child must be parented to the active span"
        );
        // ...and its upper ID half follows the parent's.
        assert_eq!(inner.span_id().high(), outer_id.high());
        inner.close();

        // Same without any sampler.
        let inner2 = start_span(&tracer, None, "inner2");
        assert!(inner2.has_span());
        inner2.close();
        outer.close();

        let spans = rcv.spans.lock().unwrap();
        let descs: Vec<&str> = spans.iter().map(Span::desc).collect();
        assert_eq!(descs, vec!["inner", "inner2", "outer"]);
        assert_eq!(spans[1].parents(), &[outer_id]);
    }

    fn rcv_parent(scope: &Scope) -> SpanId {
        // Nesting restores the previous span when the scope closes; while
        // open, the child's parent is whatever was current at creation.
        scope
            .span
            .as_ref()
            .map(|s| s.parents()[0])
            .unwrap_or(SpanId::INVALID)
    }

    #[test]
    fn nesting_restores_previous_span_on_close() {
        let (tracer, _rcv) = collecting_tracer();
        let always = always_sample();
        let a = start_span(&tracer, Some(&always), "a");
        let a_id = a.span_id();
        {
            let b = start_span(&tracer, None, "b");
            assert_eq!(current_span_id(), b.span_id());
            b.close();
        }
        assert_eq!(current_span_id(), a_id);
        a.close();
        assert_eq!(current_span_id(), SpanId::INVALID);
    }

    #[test]
    fn start_from_parent_bypasses_sampling() {
        let (tracer, rcv) = collecting_tracer();
        let parent: SpanId = "0000000000000abc0000000000000123".parse().unwrap();
        let scope = start_span_from_parent(&tracer, &parent, "continuation");
        assert!(scope.has_span());
        assert_eq!(scope.span.as_ref().unwrap().parents(), &[parent]);
        assert_eq!(scope.span_id().high(), parent.high());
        scope.close();
        assert_eq!(rcv.spans.lock().unwrap().len(), 1);
    }

    #[test]
    fn start_from_invalid_parent_is_empty() {
        let (tracer, rcv) = collecting_tracer();
        let scope = start_span_from_parent(&tracer, &SpanId::INVALID, "continuation");
        assert!(!scope.has_span());
        scope.close();
        assert!(rcv.spans.lock().unwrap().is_empty());
    }

    #[test]
    fn detach_and_restart_moves_a_span_across_threads() {
        let (tracer, rcv) = collecting_tracer();
        let always = always_sample();
        let mut scope = start_span(&tracer, Some(&always), "job");
        let job_id = scope.span_id();
        let span = scope.detach().unwrap();
        assert!(span.is_open());
        // Detaching restores this thread's nesting immediately.
        assert_eq!(current_span_id(), SpanId::INVALID);
        scope.close();
        assert!(rcv.spans.lock().unwrap().is_empty());

        let tracer2 = Arc::clone(&tracer);
        let handle = thread::spawn(move || {
            let resumed = restart_span(&tracer2, Some(span));
            assert_eq!(current_span_id(), job_id);
            let child = start_span(&tracer2, None, "job-child");
            let child_id = child.span_id();
            child.close();
            resumed.close();
            child_id
        });
        let child_id = handle.join().unwrap();

        let spans = rcv.spans.lock().unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].span_id(), child_id);
        assert_eq!(spans[0].parents(), &[job_id]);
        assert_eq!(spans[1].span_id(), job_id);
    }

    #[test]
    fn detach_twice_returns_none() {
        let (tracer, _rcv) = collecting_tracer();
        let always = always_sample();
        let mut scope = start_span(&tracer, Some(&always), "once");
        assert!(scope.detach().is_some());
        assert!(scope.detach().is_none());
    }

    #[test]
    fn threads_do_not_observe_each_others_nesting() {
        let (tracer, _rcv) = collecting_tracer();
        let always = always_sample();
        let scope = start_span(&tracer, Some(&always), "here");
        assert!(scope.has_span());
        let other = thread::spawn(current_span_id).join().unwrap();
        assert_eq!(other, SpanId::INVALID);
        scope.close();
    }
}
