//! Loop planning: deterministic partition of a logical index range into
//! contiguous spans, with one offset strategy per operand.
//!
//! Partitioning is a pure function of `(length, config)`: ranges at or
//! below the element threshold stay on the calling thread as one span;
//! larger ranges split into as-even-as-possible spans, never more than the
//! concurrency bound and never more than `length / threshold`. Identical
//! inputs always produce identical spans, which keeps parallel reductions
//! reproducible.

use log::debug;

use crate::offset::OffsetStrategy;
use crate::shape::ShapeDescriptor;
use crate::{Result, StridedError, ELEMENT_THRESHOLD};

/// Half-open range of logical indices assigned to one worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    /// Number of elements in the span.
    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// True if the span covers no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Partitioning knobs.
///
/// The default reads the ambient worker-pool size as the concurrency bound
/// and uses [`ELEMENT_THRESHOLD`] as the minimum span size.
#[derive(Clone, Copy, Debug)]
pub struct PlanConfig {
    /// Minimum elements per span before a range is split.
    pub element_threshold: usize,
    /// Upper bound on the number of spans executing concurrently.
    pub max_threads: usize,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            element_threshold: ELEMENT_THRESHOLD,
            max_threads: available_threads(),
        }
    }
}

#[cfg(feature = "parallel")]
fn available_threads() -> usize {
    rayon::current_num_threads()
}

#[cfg(not(feature = "parallel"))]
fn available_threads() -> usize {
    1
}

/// Span partition plus the offset strategy chosen for each operand, in the
/// order the operand shapes were given.
#[derive(Clone, Debug)]
pub struct LoopPlan {
    spans: Vec<Span>,
    strategies: Vec<OffsetStrategy>,
}

impl LoopPlan {
    /// Plans `hint_length` elements over the given operand shapes with the
    /// default configuration.
    pub fn build(shapes: &[&ShapeDescriptor], hint_length: usize) -> Result<Self> {
        Self::build_with(PlanConfig::default(), shapes, hint_length)
    }

    /// Plans with an explicit configuration.
    ///
    /// `hint_length` drives the partition; every operand shape must have
    /// exactly that logical length ([`StridedError::LengthMismatch`]
    /// otherwise). `shapes` may be empty when only an abstract index range
    /// is being partitioned, such as a sub-view count.
    pub fn build_with(
        config: PlanConfig,
        shapes: &[&ShapeDescriptor],
        hint_length: usize,
    ) -> Result<Self> {
        for shape in shapes {
            if shape.length() != hint_length {
                return Err(StridedError::LengthMismatch {
                    expected: hint_length,
                    actual: shape.length(),
                });
            }
        }
        let strategies = shapes.iter().map(|s| OffsetStrategy::choose(s)).collect();
        let spans = partition(hint_length, &config);
        debug!(
            "planned {} spans over {} elements across {} operands",
            spans.len(),
            hint_length,
            shapes.len()
        );
        Ok(Self { spans, strategies })
    }

    /// Planned spans in index order; together they cover `[0, hint_length)`
    /// exactly.
    #[inline]
    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Offset strategies, one per operand shape.
    #[inline]
    pub fn strategies(&self) -> &[OffsetStrategy] {
        &self.strategies
    }

    /// Strategy for the operand at the given position.
    #[inline]
    pub fn strategy(&self, operand: usize) -> &OffsetStrategy {
        &self.strategies[operand]
    }
}

/// Contiguous, as-even-as-possible split of `[0, length)`.
fn partition(length: usize, config: &PlanConfig) -> Vec<Span> {
    if length == 0 {
        return Vec::new();
    }
    let threshold = config.element_threshold.max(1);
    let workers = if length <= threshold {
        1
    } else {
        (length / threshold).min(config.max_threads.max(1)).max(1)
    };
    let base = length / workers;
    let remainder = length % workers;
    let mut spans = Vec::with_capacity(workers);
    let mut start = 0;
    for w in 0..workers {
        let len = base + usize::from(w < remainder);
        spans.push(Span {
            start,
            end: start + len,
        });
        start += len;
    }
    spans
}
