//! Tensor-along-dimension decomposition.
//!
//! A decomposition fixes every axis of an array except a kept subset: each
//! sub-view spans the kept axes, and one sub-view exists per coordinate
//! tuple of the excluded axes. All sub-views share a single shape; what
//! distinguishes them is a base offset into the source buffer. Reduction
//! and broadcast kernels consume the pack one sub-view at a time.

use crate::offset::materialize_offsets;
use crate::shape::{AxisVec, MemoryOrder, ShapeDescriptor};
use crate::{Result, StridedError};

/// Immutable bundle of one shared sub-view shape and the per-sub-view base
/// offsets, ordered row-major over the excluded axes' coordinate space.
///
/// Callers rely on that order matching the excluded-axis enumeration of the
/// reduction or broadcast output they are filling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TadPack {
    sub_shape: ShapeDescriptor,
    offsets: Vec<isize>,
}

impl TadPack {
    /// Decomposes `shape` along `kept_axes`, the axes each sub-view spans.
    ///
    /// The kept set is canonicalized to ascending order; duplicates fail
    /// with [`StridedError::DuplicateAxis`] and out-of-range entries with
    /// [`StridedError::InvalidAxis`]. A rank-0 source accepts only the
    /// empty kept set ([`StridedError::EmptyShape`] otherwise).
    ///
    /// With `keep_units` the sub-view shape retains the source rank, with
    /// extent-1 placeholders at excluded positions; otherwise the sub-view
    /// rank equals the number of kept axes. Keeping every axis yields one
    /// sub-view equal to the whole array; keeping none yields one rank-0
    /// sub-view per element.
    pub fn build(shape: &ShapeDescriptor, kept_axes: &[usize], keep_units: bool) -> Result<Self> {
        let rank = shape.rank();
        if rank == 0 && !kept_axes.is_empty() {
            return Err(StridedError::EmptyShape);
        }
        let mut kept: AxisVec<usize> = AxisVec::from_slice(kept_axes);
        kept.sort_unstable();
        for (i, &axis) in kept.iter().enumerate() {
            if axis >= rank {
                return Err(StridedError::InvalidAxis { axis, rank });
            }
            if i > 0 && kept[i - 1] == axis {
                return Err(StridedError::DuplicateAxis { axis });
            }
        }

        let mut sub_extents: AxisVec<usize> = AxisVec::new();
        let mut sub_strides: AxisVec<isize> = AxisVec::new();
        let mut exc_extents: AxisVec<usize> = AxisVec::new();
        let mut exc_strides: AxisVec<isize> = AxisVec::new();
        let mut next_kept = 0;
        for axis in 0..rank {
            let is_kept = next_kept < kept.len() && kept[next_kept] == axis;
            if is_kept {
                next_kept += 1;
                sub_extents.push(shape.extents()[axis]);
                sub_strides.push(shape.strides()[axis]);
            } else {
                exc_extents.push(shape.extents()[axis]);
                exc_strides.push(shape.strides()[axis]);
                if keep_units {
                    sub_extents.push(1);
                    sub_strides.push(shape.strides()[axis]);
                }
            }
        }

        let sub_shape = ShapeDescriptor::new(&sub_extents, &sub_strides, shape.order())?;
        // Excluded coordinates enumerate row-major regardless of the
        // source order; downstream kernels index their output the same way.
        let excluded = ShapeDescriptor::new(&exc_extents, &exc_strides, MemoryOrder::RowMajor)?;
        let offsets = materialize_offsets(&excluded);
        Ok(Self { sub_shape, offsets })
    }

    /// Shape shared by every sub-view.
    #[inline]
    pub fn sub_shape(&self) -> &ShapeDescriptor {
        &self.sub_shape
    }

    /// Base offset of each sub-view, in excluded-coordinate row-major order.
    #[inline]
    pub fn offsets(&self) -> &[isize] {
        &self.offsets
    }

    /// Number of sub-views; the product of the excluded axes' extents.
    #[inline]
    pub fn count(&self) -> usize {
        self.offsets.len()
    }
}
