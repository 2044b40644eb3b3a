//! Layout metadata for strided multidimensional arrays.
//!
//! A [`ShapeDescriptor`] records per-axis extents and strides together with a
//! declared memory order, and caches the derived element count and
//! element-wise stride. It is pure data: all validation happens at
//! construction, and derived views (permute, sub-range) always produce a new
//! descriptor.

use smallvec::{smallvec, SmallVec};
use std::hash::{Hash, Hasher};

use crate::{Result, StridedError};

/// Rank-indexed vector that stays on the stack for rank <= 8.
pub type AxisVec<T> = SmallVec<[T; 8]>;

/// Canonical traversal order of a layout.
///
/// Decides which axis is innermost when deriving the element-wise stride and
/// when decomposing a linear index into coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryOrder {
    /// Last axis innermost (C order).
    RowMajor,
    /// First axis innermost (Fortran order).
    ColMajor,
}

/// Immutable description of an array's logical and physical layout.
///
/// Extents are positive element counts per axis; strides are signed element
/// (not byte) steps per axis. Rank 0 describes a scalar of length 1. The
/// element count and the element-wise stride are derived once and cached.
///
/// Equality and hashing are structural over `(extents, strides, order)`, so
/// independently constructed but identical layouts compare equal and collide
/// in hashed containers.
#[derive(Clone, Debug)]
pub struct ShapeDescriptor {
    extents: AxisVec<usize>,
    strides: AxisVec<isize>,
    order: MemoryOrder,
    length: usize,
    ews: Option<isize>,
}

impl PartialEq for ShapeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        // length and ews are functions of the structural fields.
        self.extents == other.extents && self.strides == other.strides && self.order == other.order
    }
}

impl Eq for ShapeDescriptor {}

impl Hash for ShapeDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.extents[..].hash(state);
        self.strides[..].hash(state);
        self.order.hash(state);
    }
}

impl ShapeDescriptor {
    /// Builds a descriptor from explicit extents and strides.
    ///
    /// Fails with [`StridedError::StrideCountMismatch`] if the arrays differ
    /// in length, [`StridedError::EmptyShape`] on a zero extent,
    /// [`StridedError::ZeroStride`] on a zero stride along an axis of extent
    /// greater than one, and [`StridedError::ShapeOverflow`] if the element
    /// count exceeds `isize::MAX`.
    pub fn new(extents: &[usize], strides: &[isize], order: MemoryOrder) -> Result<Self> {
        if extents.len() != strides.len() {
            return Err(StridedError::StrideCountMismatch);
        }
        let mut length: usize = 1;
        for (axis, &extent) in extents.iter().enumerate() {
            if extent == 0 {
                return Err(StridedError::EmptyShape);
            }
            if extent > 1 && strides[axis] == 0 {
                return Err(StridedError::ZeroStride { axis });
            }
            length = length
                .checked_mul(extent)
                .filter(|&l| l <= isize::MAX as usize)
                .ok_or(StridedError::ShapeOverflow)?;
        }
        let ews = derive_ews(extents, strides, order);
        Ok(Self {
            extents: AxisVec::from_slice(extents),
            strides: AxisVec::from_slice(strides),
            order,
            length,
            ews,
        })
    }

    /// Builds a densely packed row-major descriptor for the given extents.
    pub fn row_major(extents: &[usize]) -> Result<Self> {
        let strides = dense_strides(extents, MemoryOrder::RowMajor);
        Self::new(extents, &strides, MemoryOrder::RowMajor)
    }

    /// Builds a densely packed column-major descriptor for the given extents.
    pub fn col_major(extents: &[usize]) -> Result<Self> {
        let strides = dense_strides(extents, MemoryOrder::ColMajor);
        Self::new(extents, &strides, MemoryOrder::ColMajor)
    }

    /// Number of axes; 0 for a scalar.
    #[inline]
    pub fn rank(&self) -> usize {
        self.extents.len()
    }

    /// Size along each axis.
    #[inline]
    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    /// Element step along each axis.
    #[inline]
    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    /// Declared traversal order.
    #[inline]
    pub fn order(&self) -> MemoryOrder {
        self.order
    }

    /// Total number of elements; 1 for a scalar.
    #[inline]
    pub fn length(&self) -> usize {
        self.length
    }

    /// Single stride that walks the whole array as one linear run, if the
    /// layout admits one under its declared order. `None` for non-contiguous
    /// layouts; `Some(1)` for scalars and all-extent-1 shapes.
    #[inline]
    pub fn ews(&self) -> Option<isize> {
        self.ews
    }

    /// Reorders axes: entry `i` of the result takes axis `perm[i]` of `self`.
    ///
    /// `perm` must contain each axis index exactly once.
    pub fn permute(&self, perm: &[usize]) -> Result<Self> {
        let rank = self.rank();
        if perm.len() != rank {
            return Err(StridedError::RankMismatch(perm.len(), rank));
        }
        let mut seen: AxisVec<bool> = smallvec![false; rank];
        for &axis in perm {
            if axis >= rank {
                return Err(StridedError::InvalidAxis { axis, rank });
            }
            if seen[axis] {
                return Err(StridedError::DuplicateAxis { axis });
            }
            seen[axis] = true;
        }
        let extents: AxisVec<usize> = perm.iter().map(|&a| self.extents[a]).collect();
        let strides: AxisVec<isize> = perm.iter().map(|&a| self.strides[a]).collect();
        Self::new(&extents, &strides, self.order)
    }

    /// Restricts one axis to the sub-range `[start, start + len)`.
    ///
    /// Returns the narrowed descriptor together with the element offset of
    /// its first element relative to the source layout's origin.
    pub fn sub_range(&self, axis: usize, start: usize, len: usize) -> Result<(Self, isize)> {
        let rank = self.rank();
        if axis >= rank {
            return Err(StridedError::InvalidAxis { axis, rank });
        }
        if len == 0 {
            return Err(StridedError::EmptyShape);
        }
        let extent = self.extents[axis];
        if start + len > extent {
            return Err(StridedError::IndexOutOfRange {
                index: start + len,
                length: extent,
            });
        }
        let mut extents = self.extents.clone();
        extents[axis] = len;
        let narrowed = Self::new(&extents, &self.strides, self.order)?;
        let base = start as isize * self.strides[axis];
        Ok((narrowed, base))
    }

    /// Decomposes a linear index into per-axis coordinates under the
    /// declared order. The result is indexed by axis, not by traversal
    /// position.
    pub fn index_to_coords(&self, index: usize) -> AxisVec<usize> {
        debug_assert!(index < self.length);
        let rank = self.rank();
        let mut coords: AxisVec<usize> = smallvec![0; rank];
        let mut rest = index;
        match self.order {
            MemoryOrder::RowMajor => {
                for axis in (0..rank).rev() {
                    coords[axis] = rest % self.extents[axis];
                    rest /= self.extents[axis];
                }
            }
            MemoryOrder::ColMajor => {
                for axis in 0..rank {
                    coords[axis] = rest % self.extents[axis];
                    rest /= self.extents[axis];
                }
            }
        }
        coords
    }

    /// Recomposes per-axis coordinates into a linear index under the
    /// declared order. Inverse of [`ShapeDescriptor::index_to_coords`].
    pub fn coords_to_index(&self, coords: &[usize]) -> usize {
        debug_assert_eq!(coords.len(), self.rank());
        let mut index = 0;
        match self.order {
            MemoryOrder::RowMajor => {
                for (axis, &c) in coords.iter().enumerate() {
                    index = index * self.extents[axis] + c;
                }
            }
            MemoryOrder::ColMajor => {
                for axis in (0..self.rank()).rev() {
                    index = index * self.extents[axis] + coords[axis];
                }
            }
        }
        index
    }

    /// Physical offset of the element at the given per-axis coordinates.
    pub fn offset_at_coords(&self, coords: &[usize]) -> isize {
        debug_assert_eq!(coords.len(), self.rank());
        coords
            .iter()
            .zip(self.strides.iter())
            .map(|(&c, &s)| c as isize * s)
            .sum()
    }

    /// Minimum and maximum offsets the layout can resolve, both inclusive.
    ///
    /// Offset 0 (the all-zero coordinate) is always within the returned
    /// range. Saturates instead of wrapping for pathological strides.
    pub fn offset_bounds(&self) -> (isize, isize) {
        let mut min: isize = 0;
        let mut max: isize = 0;
        for (&extent, &stride) in self.extents.iter().zip(self.strides.iter()) {
            let reach = (extent as isize - 1).saturating_mul(stride);
            if stride >= 0 {
                max = max.saturating_add(reach);
            } else {
                min = min.saturating_add(reach);
            }
        }
        (min, max)
    }
}

/// Densely packed strides for the given extents under the given order.
fn dense_strides(extents: &[usize], order: MemoryOrder) -> AxisVec<isize> {
    let rank = extents.len();
    let mut strides: AxisVec<isize> = smallvec![1; rank];
    match order {
        MemoryOrder::RowMajor => {
            for axis in (0..rank.saturating_sub(1)).rev() {
                strides[axis] = strides[axis + 1] * extents[axis + 1] as isize;
            }
        }
        MemoryOrder::ColMajor => {
            for axis in 1..rank {
                strides[axis] = strides[axis - 1] * extents[axis - 1] as isize;
            }
        }
    }
    strides
}

/// Element-wise stride under the declared order, or `None` when the layout
/// is not one linear run.
///
/// Walks axes innermost-first, skipping extent-1 axes, and checks that every
/// stride equals the innermost stride times the product of the extents
/// already walked. Scalars and all-extent-1 shapes walk as a single element
/// and get stride 1.
fn derive_ews(extents: &[usize], strides: &[isize], order: MemoryOrder) -> Option<isize> {
    let rank = extents.len();
    let mut step: Option<isize> = None;
    let mut walked: usize = 1;
    let axes: AxisVec<usize> = match order {
        MemoryOrder::RowMajor => (0..rank).rev().collect(),
        MemoryOrder::ColMajor => (0..rank).collect(),
    };
    for axis in axes {
        if extents[axis] == 1 {
            continue;
        }
        match step {
            None => {
                step = Some(strides[axis]);
                walked = extents[axis];
            }
            Some(s) => {
                let expected = s.checked_mul(walked as isize)?;
                if strides[axis] != expected {
                    return None;
                }
                walked = walked.checked_mul(extents[axis])?;
            }
        }
    }
    Some(step.unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_major_strides() {
        let s = ShapeDescriptor::row_major(&[2, 3, 4]).unwrap();
        assert_eq!(s.strides(), &[12, 4, 1]);
        assert_eq!(s.length(), 24);
        assert_eq!(s.ews(), Some(1));
    }

    #[test]
    fn test_col_major_strides() {
        let s = ShapeDescriptor::col_major(&[2, 3, 4]).unwrap();
        assert_eq!(s.strides(), &[1, 2, 6]);
        assert_eq!(s.length(), 24);
        assert_eq!(s.ews(), Some(1));
    }

    #[test]
    fn test_scalar_shape() {
        let s = ShapeDescriptor::row_major(&[]).unwrap();
        assert_eq!(s.rank(), 0);
        assert_eq!(s.length(), 1);
        assert_eq!(s.ews(), Some(1));
        assert_eq!(s.offset_at_coords(&[]), 0);
        assert_eq!(s.coords_to_index(&[]), 0);
    }

    #[test]
    fn test_ews_sliced_column() {
        // Column 2 of a row-major [10, 5] buffer: one run with step 5.
        let s = ShapeDescriptor::new(&[10], &[5], MemoryOrder::RowMajor).unwrap();
        assert_eq!(s.ews(), Some(5));
    }

    #[test]
    fn test_ews_permuted_none() {
        // Transposed row-major [2, 3]: strides [1, 3] cannot be one run in C order.
        let s = ShapeDescriptor::new(&[3, 2], &[1, 3], MemoryOrder::RowMajor).unwrap();
        assert_eq!(s.ews(), None);
    }

    #[test]
    fn test_ews_skips_unit_axes() {
        // Extent-1 axis with an arbitrary stride does not break contiguity.
        let s = ShapeDescriptor::new(&[2, 1, 3], &[3, 100, 1], MemoryOrder::RowMajor).unwrap();
        assert_eq!(s.ews(), Some(1));
    }

    #[test]
    fn test_ews_negative_stride() {
        // Reversed vector: still one linear run, step -1.
        let s = ShapeDescriptor::new(&[6], &[-1], MemoryOrder::RowMajor).unwrap();
        assert_eq!(s.ews(), Some(-1));
    }

    #[test]
    fn test_zero_extent_rejected() {
        let err = ShapeDescriptor::row_major(&[2, 0, 3]).unwrap_err();
        assert!(matches!(err, StridedError::EmptyShape));
    }

    #[test]
    fn test_zero_stride_rejected() {
        let err = ShapeDescriptor::new(&[2, 3], &[3, 0], MemoryOrder::RowMajor).unwrap_err();
        assert!(matches!(err, StridedError::ZeroStride { axis: 1 }));
    }

    #[test]
    fn test_zero_stride_allowed_on_unit_axis() {
        let s = ShapeDescriptor::new(&[2, 1], &[1, 0], MemoryOrder::RowMajor).unwrap();
        assert_eq!(s.length(), 2);
    }

    #[test]
    fn test_stride_count_mismatch() {
        let err = ShapeDescriptor::new(&[2, 3], &[3], MemoryOrder::RowMajor).unwrap_err();
        assert!(matches!(err, StridedError::StrideCountMismatch));
    }

    #[test]
    fn test_overflow_rejected() {
        let err =
            ShapeDescriptor::new(&[isize::MAX as usize, 2], &[1, 1], MemoryOrder::RowMajor)
                .unwrap_err();
        assert!(matches!(err, StridedError::ShapeOverflow));
    }

    #[test]
    fn test_permute() {
        let s = ShapeDescriptor::row_major(&[64, 32, 4, 32]).unwrap();
        let p = s.permute(&[2, 0, 3, 1]).unwrap();
        assert_eq!(p.extents(), &[4, 64, 32, 32]);
        assert_eq!(p.strides(), &[32, 4096, 1, 128]);
        assert_eq!(p.length(), s.length());
        assert_eq!(p.ews(), None);
    }

    #[test]
    fn test_permute_identity_keeps_ews() {
        let s = ShapeDescriptor::row_major(&[4, 5]).unwrap();
        let p = s.permute(&[0, 1]).unwrap();
        assert_eq!(p.ews(), Some(1));
        assert_eq!(p, s);
    }

    #[test]
    fn test_permute_invalid() {
        let s = ShapeDescriptor::row_major(&[2, 3]).unwrap();
        assert!(matches!(
            s.permute(&[0, 2]).unwrap_err(),
            StridedError::InvalidAxis { axis: 2, rank: 2 }
        ));
        assert!(matches!(
            s.permute(&[1, 1]).unwrap_err(),
            StridedError::DuplicateAxis { axis: 1 }
        ));
        assert!(matches!(
            s.permute(&[0]).unwrap_err(),
            StridedError::RankMismatch(1, 2)
        ));
    }

    #[test]
    fn test_sub_range() {
        let s = ShapeDescriptor::row_major(&[4, 6]).unwrap();
        let (sub, base) = s.sub_range(1, 2, 3).unwrap();
        assert_eq!(sub.extents(), &[4, 3]);
        assert_eq!(sub.strides(), &[6, 1]);
        assert_eq!(base, 2);
        // Rows keep stride 6, so the narrowed view is not one linear run.
        assert_eq!(sub.ews(), None);
    }

    #[test]
    fn test_sub_range_out_of_range() {
        let s = ShapeDescriptor::row_major(&[4, 6]).unwrap();
        assert!(matches!(
            s.sub_range(1, 4, 3).unwrap_err(),
            StridedError::IndexOutOfRange {
                index: 7,
                length: 6
            }
        ));
    }

    #[test]
    fn test_coords_roundtrip_row_major() {
        let s = ShapeDescriptor::row_major(&[2, 3, 4]).unwrap();
        for index in 0..s.length() {
            let coords = s.index_to_coords(index);
            assert_eq!(s.coords_to_index(&coords), index);
        }
        // index 7 in C order over [2, 3, 4] is (0, 1, 3).
        assert_eq!(&s.index_to_coords(7)[..], &[0, 1, 3]);
    }

    #[test]
    fn test_coords_roundtrip_col_major() {
        let s = ShapeDescriptor::col_major(&[2, 3, 4]).unwrap();
        for index in 0..s.length() {
            let coords = s.index_to_coords(index);
            assert_eq!(s.coords_to_index(&coords), index);
        }
        // index 7 in F order over [2, 3, 4] is (1, 0, 1).
        assert_eq!(&s.index_to_coords(7)[..], &[1, 0, 1]);
    }

    #[test]
    fn test_offset_bounds_negative_stride() {
        // Reversed row of a [4, 6] buffer: offsets 5 down to 0.
        let s = ShapeDescriptor::new(&[6], &[-1], MemoryOrder::RowMajor).unwrap();
        assert_eq!(s.offset_bounds(), (-5, 0));
        let d = ShapeDescriptor::row_major(&[4, 6]).unwrap();
        assert_eq!(d.offset_bounds(), (0, 23));
    }

    #[test]
    fn test_structural_eq_hash() {
        use std::collections::HashMap;
        let a = ShapeDescriptor::row_major(&[4, 64]).unwrap();
        let b = ShapeDescriptor::new(&[4, 64], &[64, 1], MemoryOrder::RowMajor).unwrap();
        assert_eq!(a, b);
        let mut map = HashMap::new();
        map.insert(a, 7);
        assert_eq!(map.get(&b), Some(&7));
    }
}
