//! Indexing and loop-execution substrate for strided multidimensional arrays.
//!
//! Given an array described by a [`ShapeDescriptor`] (per-axis extents and
//! strides, memory order), this crate computes the physical buffer offset of
//! any logical linear index, decomposes arrays into lower-rank sub-views
//! along a chosen axis set (tensor-along-dimension, with a process-wide
//! cache), and dispatches elementwise, broadcast, and reduction loops across
//! worker threads using the cheapest correct offset strategy for each
//! operand's actual layout.
//!
//! # Core Types
//!
//! - [`ShapeDescriptor`]: immutable layout metadata (extents, strides, order,
//!   cached element-wise stride) with derived views ([`ShapeDescriptor::permute`],
//!   [`ShapeDescriptor::sub_range`])
//! - [`OffsetStrategy`] / [`OffsetWalker`]: per-shape offset resolution,
//!   random-access and sequential
//! - [`TadPack`] / [`tad_cache`]: sub-view decomposition and its
//!   process-wide cache
//! - [`LoopPlan`]: deterministic span partitioning for a batch of operands
//! - [`for_each_span`] / [`reduce_spans`]: span execution over the worker pool
//!
//! # Kernel Entry Points
//!
//! - [`transform`], [`pairwise`], [`scalar_op`]: elementwise loops over
//!   arbitrarily strided operands
//! - [`broadcast`]: combine an array with a lower-rank operand along an axis
//!   subset, one sub-view at a time
//! - [`reduce_all`], [`reduce_axes`]: monoid reductions ([`ReduceOp`]) with
//!   deterministic span-order combining
//!
//! # Example
//!
//! ```rust
//! use strided_loops::{transform, MemoryOrder, ShapeDescriptor};
//!
//! // Scale a 2x3 row-major array into the transposed view of a 3x2 buffer.
//! let src = ShapeDescriptor::row_major(&[2, 3]).unwrap();
//! let dst = ShapeDescriptor::new(&[2, 3], &[1, 2], MemoryOrder::RowMajor).unwrap();
//! let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
//! let mut out = vec![0.0; 6];
//! transform(&data, &src, &mut out, &dst, |x| x * 10.0).unwrap();
//! assert_eq!(out, vec![10.0, 40.0, 20.0, 50.0, 30.0, 60.0]);
//! ```

mod cache;
mod executor;
mod offset;
mod ops;
mod plan;
mod shape;
mod tad;

// ============================================================================
// Shape types
// ============================================================================
pub use shape::{AxisVec, MemoryOrder, ShapeDescriptor};

// ============================================================================
// Offset resolution
// ============================================================================
pub use offset::{materialize_offsets, OffsetStrategy, OffsetWalker};

// ============================================================================
// Tensor-along-dimension decomposition
// ============================================================================
pub use cache::{tad_cache, TadCache};
pub use tad::TadPack;

// ============================================================================
// Loop planning and execution
// ============================================================================
pub use executor::{for_each_span, reduce_spans, SendPtr};
pub use plan::{LoopPlan, PlanConfig, Span};

// ============================================================================
// Kernel entry points
// ============================================================================
pub use ops::{
    broadcast, pairwise, reduce_all, reduce_axes, scalar_op, transform, Max, Mean, Min, Prod,
    ReduceOp, Sum,
};

// ============================================================================
// Constants
// ============================================================================

/// Minimum number of elements per worker span.
///
/// Ranges at or below this size run as a single span on the calling thread;
/// larger ranges are split so that no span carries fewer elements than this.
pub const ELEMENT_THRESHOLD: usize = 1024;

/// Maximum rank for the cast-index offset strategy.
///
/// Shapes of higher rank pay more for the narrowed per-axis division than
/// the odometer costs, so they fall through to coordinate stepping.
pub const MAX_CAST_RANK: usize = 6;

// ============================================================================
// Error types
// ============================================================================

/// Errors raised by shape validation, decomposition, and loop entry points.
#[derive(Debug, thiserror::Error)]
pub enum StridedError {
    /// Axis index outside the shape's rank.
    #[error("invalid axis {axis} for rank {rank}")]
    InvalidAxis { axis: usize, rank: usize },

    /// Axis listed more than once in an axis set.
    #[error("duplicate axis {axis} in axis set")]
    DuplicateAxis { axis: usize },

    /// Axis-array ranks do not match.
    #[error("rank mismatch: {0} vs {1}")]
    RankMismatch(usize, usize),

    /// Logical linear index outside `[0, length)`.
    #[error("index {index} out of range for length {length}")]
    IndexOutOfRange { index: usize, length: usize },

    /// Element count exceeds the representable range.
    #[error("shape overflow: element count exceeds isize::MAX")]
    ShapeOverflow,

    /// Degenerate rank/extent combination incompatible with the request.
    #[error("empty shape for requested operation")]
    EmptyShape,

    /// Zero stride on an axis of extent > 1.
    #[error("invalid stride 0 for axis {axis}")]
    ZeroStride { axis: usize },

    /// Extents and strides arrays have different lengths.
    #[error("extents and strides length mismatch")]
    StrideCountMismatch,

    /// Operand extents are incompatible for the operation.
    #[error("shape mismatch: {0:?} vs {1:?}")]
    ShapeMismatch(Vec<usize>, Vec<usize>),

    /// Operands declare different memory orders, so they disagree on which
    /// element a logical index names.
    #[error("memory order mismatch between operands")]
    OrderMismatch,

    /// Operand logical lengths disagree with the planned range.
    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Buffer too short for the offsets the layout can produce.
    #[error("buffer of {len} elements too small for layout needing {needed}")]
    BufferTooSmall { needed: usize, len: usize },

    /// Layout resolves offsets below the start of the buffer.
    #[error("layout reaches negative offset {offset}")]
    NegativeOffset { offset: isize },
}

/// Result type for strided loop operations.
pub type Result<T> = std::result::Result<T, StridedError>;
