//! Span execution over the worker pool.
//!
//! One task per planned span. Elementwise callers guarantee disjoint writes
//! per span; reductions fold one partial per span and combine the partials
//! in span-index order after every span has finished, so results at a fixed
//! span count do not depend on completion order. Calls block until all
//! spans drain. When a span fails, spans that have not started are skipped,
//! in-flight spans run to completion, and the earliest failure by span
//! index among the spans that ran is returned.
//!
//! Without the `parallel` feature spans run in order on the calling thread
//! with identical results.

use crate::plan::{LoopPlan, Span};
use crate::Result;

/// Raw pointer wrapper for handing a buffer to worker spans.
///
/// # Safety
/// The caller must guarantee the pointed-to data stays valid for the whole
/// run and that concurrent spans touch disjoint regions or only read.
pub struct SendPtr<T>(pub *mut T);

impl<T> Clone for SendPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SendPtr<T> {}

unsafe impl<T> Send for SendPtr<T> {}
unsafe impl<T> Sync for SendPtr<T> {}

impl<T> SendPtr<T> {
    /// The wrapped pointer.
    #[inline]
    pub fn as_ptr(self) -> *mut T {
        self.0
    }
}

/// Runs `f` once per planned span and blocks until all spans drain.
///
/// `f` receives the span index and the span. Writes into shared output must
/// be disjoint per span; [`SendPtr`] carries the buffer across threads.
pub fn for_each_span<F>(plan: &LoopPlan, f: F) -> Result<()>
where
    F: Fn(usize, Span) -> Result<()> + Sync,
{
    reduce_spans(plan, f, |(), ()| ()).map(|_| ())
}

/// Folds one partial per span and combines the partials in span-index
/// order. Returns `None` for an empty plan.
///
/// The combine order is fixed by the plan, not by completion order, so
/// floating-point reductions are reproducible for a fixed span count.
pub fn reduce_spans<A, F, C>(plan: &LoopPlan, per_span: F, combine: C) -> Result<Option<A>>
where
    A: Send,
    F: Fn(usize, Span) -> Result<A> + Sync,
    C: Fn(A, A) -> A,
{
    reduce_impl(plan, &per_span, &combine)
}

#[cfg(feature = "parallel")]
fn reduce_impl<A, F, C>(plan: &LoopPlan, per_span: &F, combine: &C) -> Result<Option<A>>
where
    A: Send,
    F: Fn(usize, Span) -> Result<A> + Sync,
    C: Fn(A, A) -> A,
{
    use rayon::prelude::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    let spans = plan.spans();
    match spans.len() {
        0 => return Ok(None),
        1 => return per_span(0, spans[0]).map(Some),
        _ => {}
    }
    let failed = AtomicBool::new(false);
    let results: Vec<Option<Result<A>>> = spans
        .par_iter()
        .enumerate()
        .map(|(index, &span)| {
            if failed.load(Ordering::Relaxed) {
                return None;
            }
            let result = per_span(index, span);
            if result.is_err() {
                failed.store(true, Ordering::Relaxed);
            }
            Some(result)
        })
        .collect();
    let mut acc: Option<A> = None;
    for result in results {
        match result {
            Some(Ok(partial)) => {
                acc = Some(match acc {
                    None => partial,
                    Some(prev) => combine(prev, partial),
                });
            }
            Some(Err(err)) => return Err(err),
            None => {}
        }
    }
    Ok(acc)
}

#[cfg(not(feature = "parallel"))]
fn reduce_impl<A, F, C>(plan: &LoopPlan, per_span: &F, combine: &C) -> Result<Option<A>>
where
    A: Send,
    F: Fn(usize, Span) -> Result<A> + Sync,
    C: Fn(A, A) -> A,
{
    let mut acc: Option<A> = None;
    for (index, &span) in plan.spans().iter().enumerate() {
        let partial = per_span(index, span)?;
        acc = Some(match acc {
            None => partial,
            Some(prev) => combine(prev, partial),
        });
    }
    Ok(acc)
}
