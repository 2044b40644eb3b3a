//! Offset resolution: logical linear index to physical buffer offset.
//!
//! The strategy is chosen once per shape, not per element:
//!
//! 1. Direct stride: the layout has an element-wise stride, so the offset is
//!    `index * step`. Branch-free and vectorizable.
//! 2. Cast index: extents, strides, and length fit narrow integers, so each
//!    index is decomposed with `u32` divide/modulo against a precomputed
//!    table. Cheaper than full-width division for moderate shapes.
//! 3. Coordinate step: random access falls back to full-width decomposition;
//!    sequential access goes through [`OffsetWalker`], which advances
//!    per-axis counters with carry (odometer) instead of dividing per
//!    element. A walker is private to one span and never shared across
//!    threads.

use smallvec::smallvec;

use crate::shape::{AxisVec, MemoryOrder, ShapeDescriptor};
use crate::MAX_CAST_RANK;

/// Narrow-integer extents and strides for the cast-index strategy.
#[derive(Clone, Debug, PartialEq)]
pub struct CastTable {
    extents: AxisVec<u32>,
    strides: AxisVec<i32>,
}

/// Per-shape offset resolution strategy. Built once via
/// [`OffsetStrategy::choose`] and reused for every index of that shape.
#[derive(Clone, Debug, PartialEq)]
pub enum OffsetStrategy {
    /// Whole array walks as one linear run with this step.
    DirectStride { step: isize },
    /// Narrow-integer divide/modulo decomposition per index.
    CastIndex(CastTable),
    /// Full-width decomposition; sequential walks use the odometer.
    CoordinateStep,
}

impl OffsetStrategy {
    /// Picks the cheapest correct strategy for the given layout.
    pub fn choose(shape: &ShapeDescriptor) -> Self {
        if let Some(step) = shape.ews() {
            return OffsetStrategy::DirectStride { step };
        }
        if shape.rank() <= MAX_CAST_RANK && shape.length() <= u32::MAX as usize {
            let strides: Option<AxisVec<i32>> = shape
                .strides()
                .iter()
                .map(|&s| i32::try_from(s).ok())
                .collect();
            if let Some(strides) = strides {
                let extents = shape.extents().iter().map(|&e| e as u32).collect();
                return OffsetStrategy::CastIndex(CastTable { extents, strides });
            }
        }
        OffsetStrategy::CoordinateStep
    }

    /// Physical offset of the element at `index`, `0 <= index < length`.
    ///
    /// Inputs are validated at loop entry, not here; debug builds assert the
    /// range.
    pub fn offset_of(&self, shape: &ShapeDescriptor, index: usize) -> isize {
        debug_assert!(index < shape.length());
        match self {
            OffsetStrategy::DirectStride { step } => index as isize * step,
            OffsetStrategy::CastIndex(table) => {
                let mut rest = index as u32;
                let mut offset: i64 = 0;
                match shape.order() {
                    MemoryOrder::RowMajor => {
                        for axis in (0..table.extents.len()).rev() {
                            let extent = table.extents[axis];
                            offset += (rest % extent) as i64 * table.strides[axis] as i64;
                            rest /= extent;
                        }
                    }
                    MemoryOrder::ColMajor => {
                        for axis in 0..table.extents.len() {
                            let extent = table.extents[axis];
                            offset += (rest % extent) as i64 * table.strides[axis] as i64;
                            rest /= extent;
                        }
                    }
                }
                offset as isize
            }
            OffsetStrategy::CoordinateStep => offset_at_index_wide(shape, index),
        }
    }
}

/// Full-width divide/modulo decomposition of `index` under the shape's
/// declared order.
pub(crate) fn offset_at_index_wide(shape: &ShapeDescriptor, index: usize) -> isize {
    let rank = shape.rank();
    let extents = shape.extents();
    let strides = shape.strides();
    let mut rest = index;
    let mut offset: isize = 0;
    match shape.order() {
        MemoryOrder::RowMajor => {
            for axis in (0..rank).rev() {
                offset += (rest % extents[axis]) as isize * strides[axis];
                rest /= extents[axis];
            }
        }
        MemoryOrder::ColMajor => {
            for axis in 0..rank {
                offset += (rest % extents[axis]) as isize * strides[axis];
                rest /= extents[axis];
            }
        }
    }
    offset
}

/// Stateful sequential cursor over one contiguous span of logical indices.
///
/// Direct-stride layouts advance by adding the step; all others keep
/// per-axis coordinate counters and propagate carry on wrap, subtracting the
/// precomputed `(extent - 1) * stride` rollback per wrapped axis. Each span
/// builds its own walker; a walker is never shared across threads.
pub struct OffsetWalker<'a> {
    shape: &'a ShapeDescriptor,
    step: Option<isize>,
    coords: AxisVec<usize>,
    wrap: AxisVec<isize>,
    offset: isize,
}

impl<'a> OffsetWalker<'a> {
    /// Positions a new walker at logical index `start`.
    pub fn new(shape: &'a ShapeDescriptor, strategy: &OffsetStrategy, start: usize) -> Self {
        if let OffsetStrategy::DirectStride { step } = strategy {
            return Self {
                shape,
                step: Some(*step),
                coords: AxisVec::new(),
                wrap: AxisVec::new(),
                offset: start as isize * step,
            };
        }
        let coords = if start == 0 {
            smallvec![0; shape.rank()]
        } else {
            shape.index_to_coords(start)
        };
        let offset = shape.offset_at_coords(&coords);
        let wrap = shape
            .extents()
            .iter()
            .zip(shape.strides().iter())
            .map(|(&e, &s)| (e as isize - 1) * s)
            .collect();
        Self {
            shape,
            step: None,
            coords,
            wrap,
            offset,
        }
    }

    /// Offset of the element the walker currently points at.
    #[inline]
    pub fn offset(&self) -> isize {
        self.offset
    }

    /// Moves to the next logical index.
    #[inline]
    pub fn advance(&mut self) {
        if let Some(step) = self.step {
            self.offset += step;
            return;
        }
        let rank = self.shape.rank();
        match self.shape.order() {
            MemoryOrder::RowMajor => {
                for axis in (0..rank).rev() {
                    if self.bump(axis) {
                        return;
                    }
                }
            }
            MemoryOrder::ColMajor => {
                for axis in 0..rank {
                    if self.bump(axis) {
                        return;
                    }
                }
            }
        }
    }

    /// Increments one axis counter; true if the carry stopped here.
    #[inline]
    fn bump(&mut self, axis: usize) -> bool {
        self.coords[axis] += 1;
        if self.coords[axis] < self.shape.extents()[axis] {
            self.offset += self.shape.strides()[axis];
            true
        } else {
            self.coords[axis] = 0;
            self.offset -= self.wrap[axis];
            false
        }
    }
}

/// All `length` offsets of the shape in logical order, produced in one
/// odometer pass.
pub fn materialize_offsets(shape: &ShapeDescriptor) -> Vec<isize> {
    let strategy = OffsetStrategy::choose(shape);
    let mut walker = OffsetWalker::new(shape, &strategy, 0);
    let mut offsets = Vec::with_capacity(shape.length());
    for _ in 0..shape.length() {
        offsets.push(walker.offset());
        walker.advance();
    }
    offsets
}
