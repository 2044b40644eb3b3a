//! Kernel entry points: elementwise, broadcast, and reduction loops over
//! strided operands.
//!
//! Every entry point validates shapes and buffer bounds up front, builds a
//! [`LoopPlan`], and then runs branch-free spans, one [`OffsetWalker`] per
//! operand per span. Multi-operand calls pair elements by logical index, so
//! operands must agree on extents and, for rank >= 2, on memory order.
//! Reductions go through the [`ReduceOp`] monoid and combine span partials
//! in span-index order.

use num_traits::{Bounded, One, Zero};
use smallvec::smallvec;

use crate::cache::tad_cache;
use crate::executor::{for_each_span, reduce_spans, SendPtr};
use crate::offset::{OffsetStrategy, OffsetWalker};
use crate::plan::LoopPlan;
use crate::shape::{AxisVec, ShapeDescriptor};
use crate::{Result, StridedError};

// ============================================================================
// Reduction monoid
// ============================================================================

/// A reduction: a fold of elements into an accumulator plus an associative
/// merge of partial accumulators.
///
/// `combine` must be associative with `identity` as its neutral value; the
/// executor relies on that to merge span partials in span-index order.
pub trait ReduceOp<T> {
    /// Accumulator carried across one span.
    type Acc;

    /// Neutral starting value.
    fn identity(&self) -> Self::Acc;

    /// Folds one element into a partial.
    fn accumulate(&self, acc: Self::Acc, value: T) -> Self::Acc;

    /// Merges two partials.
    fn combine(&self, a: Self::Acc, b: Self::Acc) -> Self::Acc;

    /// Post-processes the final accumulator; `count` is the number of
    /// elements reduced into it.
    fn finish(&self, acc: Self::Acc, count: usize) -> Self::Acc {
        let _ = count;
        acc
    }
}

/// Sum reduction.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sum;

impl<T: Copy + Zero> ReduceOp<T> for Sum {
    type Acc = T;

    fn identity(&self) -> T {
        T::zero()
    }

    fn accumulate(&self, acc: T, value: T) -> T {
        acc + value
    }

    fn combine(&self, a: T, b: T) -> T {
        a + b
    }
}

/// Product reduction.
#[derive(Clone, Copy, Debug, Default)]
pub struct Prod;

impl<T: Copy + One> ReduceOp<T> for Prod {
    type Acc = T;

    fn identity(&self) -> T {
        T::one()
    }

    fn accumulate(&self, acc: T, value: T) -> T {
        acc * value
    }

    fn combine(&self, a: T, b: T) -> T {
        a * b
    }
}

/// Minimum reduction.
#[derive(Clone, Copy, Debug, Default)]
pub struct Min;

impl<T: Copy + PartialOrd + Bounded> ReduceOp<T> for Min {
    type Acc = T;

    fn identity(&self) -> T {
        T::max_value()
    }

    fn accumulate(&self, acc: T, value: T) -> T {
        if value < acc {
            value
        } else {
            acc
        }
    }

    fn combine(&self, a: T, b: T) -> T {
        if b < a {
            b
        } else {
            a
        }
    }
}

/// Maximum reduction.
#[derive(Clone, Copy, Debug, Default)]
pub struct Max;

impl<T: Copy + PartialOrd + Bounded> ReduceOp<T> for Max {
    type Acc = T;

    fn identity(&self) -> T {
        T::min_value()
    }

    fn accumulate(&self, acc: T, value: T) -> T {
        if value > acc {
            value
        } else {
            acc
        }
    }

    fn combine(&self, a: T, b: T) -> T {
        if b > a {
            b
        } else {
            a
        }
    }
}

/// Arithmetic mean for floating-point elements; sums, then divides by the
/// reduced element count in [`ReduceOp::finish`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Mean;

macro_rules! impl_mean {
    ($($t:ty)*) => {$(
        impl ReduceOp<$t> for Mean {
            type Acc = $t;

            fn identity(&self) -> $t {
                0.0
            }

            fn accumulate(&self, acc: $t, value: $t) -> $t {
                acc + value
            }

            fn combine(&self, a: $t, b: $t) -> $t {
                a + b
            }

            fn finish(&self, acc: $t, count: usize) -> $t {
                acc / count as $t
            }
        }
    )*};
}

impl_mean!(f32 f64);

// ============================================================================
// Entry validation
// ============================================================================

/// Operands pair elements by logical index, which requires equal extents
/// and, for rank >= 2, the same declared order. Single-axis and scalar
/// shapes enumerate identically in either order.
fn ensure_same_shape(a: &ShapeDescriptor, b: &ShapeDescriptor) -> Result<()> {
    if a.extents() != b.extents() {
        return Err(StridedError::ShapeMismatch(
            a.extents().to_vec(),
            b.extents().to_vec(),
        ));
    }
    if a.rank() >= 2 && a.order() != b.order() {
        return Err(StridedError::OrderMismatch);
    }
    Ok(())
}

/// Rejects layouts whose reachable offsets escape the buffer, so the span
/// loops can dereference without per-element checks.
fn ensure_in_bounds<T>(data: &[T], shape: &ShapeDescriptor) -> Result<()> {
    let (min, max) = shape.offset_bounds();
    if min < 0 {
        return Err(StridedError::NegativeOffset { offset: min });
    }
    let needed = max as usize + 1;
    if needed > data.len() {
        return Err(StridedError::BufferTooSmall {
            needed,
            len: data.len(),
        });
    }
    Ok(())
}

/// Dense row-major shape of a reduction output: the surviving axes'
/// extents, with extent-1 placeholders at reduced positions when
/// `keep_units` is set.
fn reduced_shape(
    shape: &ShapeDescriptor,
    axes: &[usize],
    keep_units: bool,
) -> Result<ShapeDescriptor> {
    let rank = shape.rank();
    let mut dropped: AxisVec<bool> = smallvec![false; rank];
    for &axis in axes {
        dropped[axis] = true;
    }
    let mut extents: AxisVec<usize> = AxisVec::new();
    for axis in 0..rank {
        if dropped[axis] {
            if keep_units {
                extents.push(1);
            }
        } else {
            extents.push(shape.extents()[axis]);
        }
    }
    ShapeDescriptor::row_major(&extents)
}

// ============================================================================
// Elementwise loops
// ============================================================================

/// Applies `f` to every element of `src`, writing into `dst` at the same
/// logical position. Layouts may differ arbitrarily as long as extents and
/// order agree.
pub fn transform<T, F>(
    src: &[T],
    src_shape: &ShapeDescriptor,
    dst: &mut [T],
    dst_shape: &ShapeDescriptor,
    f: F,
) -> Result<()>
where
    T: Copy + Send + Sync,
    F: Fn(T) -> T + Sync,
{
    ensure_same_shape(src_shape, dst_shape)?;
    ensure_in_bounds(src, src_shape)?;
    ensure_in_bounds(dst, dst_shape)?;
    let plan = LoopPlan::build(&[src_shape, dst_shape], src_shape.length())?;
    let src_ptr = SendPtr(src.as_ptr() as *mut T);
    let dst_ptr = SendPtr(dst.as_mut_ptr());
    for_each_span(&plan, |_, span| {
        let mut sw = OffsetWalker::new(src_shape, plan.strategy(0), span.start);
        let mut dw = OffsetWalker::new(dst_shape, plan.strategy(1), span.start);
        for _ in span.start..span.end {
            unsafe {
                let value = *src_ptr.as_ptr().offset(sw.offset());
                *dst_ptr.as_ptr().offset(dw.offset()) = f(value);
            }
            sw.advance();
            dw.advance();
        }
        Ok(())
    })
}

/// Combines `x` and `y` elementwise into `dst`.
pub fn pairwise<T, F>(
    x: &[T],
    x_shape: &ShapeDescriptor,
    y: &[T],
    y_shape: &ShapeDescriptor,
    dst: &mut [T],
    dst_shape: &ShapeDescriptor,
    f: F,
) -> Result<()>
where
    T: Copy + Send + Sync,
    F: Fn(T, T) -> T + Sync,
{
    ensure_same_shape(x_shape, dst_shape)?;
    ensure_same_shape(y_shape, dst_shape)?;
    ensure_in_bounds(x, x_shape)?;
    ensure_in_bounds(y, y_shape)?;
    ensure_in_bounds(dst, dst_shape)?;
    let plan = LoopPlan::build(&[x_shape, y_shape, dst_shape], dst_shape.length())?;
    let x_ptr = SendPtr(x.as_ptr() as *mut T);
    let y_ptr = SendPtr(y.as_ptr() as *mut T);
    let dst_ptr = SendPtr(dst.as_mut_ptr());
    for_each_span(&plan, |_, span| {
        let mut xw = OffsetWalker::new(x_shape, plan.strategy(0), span.start);
        let mut yw = OffsetWalker::new(y_shape, plan.strategy(1), span.start);
        let mut dw = OffsetWalker::new(dst_shape, plan.strategy(2), span.start);
        for _ in span.start..span.end {
            unsafe {
                let a = *x_ptr.as_ptr().offset(xw.offset());
                let b = *y_ptr.as_ptr().offset(yw.offset());
                *dst_ptr.as_ptr().offset(dw.offset()) = f(a, b);
            }
            xw.advance();
            yw.advance();
            dw.advance();
        }
        Ok(())
    })
}

/// Combines every element of `src` with one scalar into `dst`.
pub fn scalar_op<T, F>(
    src: &[T],
    src_shape: &ShapeDescriptor,
    scalar: T,
    dst: &mut [T],
    dst_shape: &ShapeDescriptor,
    f: F,
) -> Result<()>
where
    T: Copy + Send + Sync,
    F: Fn(T, T) -> T + Sync,
{
    transform(src, src_shape, dst, dst_shape, move |value| {
        f(value, scalar)
    })
}

// ============================================================================
// Broadcast along axes
// ============================================================================

/// Combines each sub-view of `x` along `axes` with the lower-rank operand
/// `y`, writing into the matching sub-view of `dst`.
///
/// `y` must have the extents of one sub-view (the kept axes of `x` in
/// ascending axis order); `dst` must have the extents and order of `x`.
/// The decompositions of `x` and `dst` come from the process-wide cache.
pub fn broadcast<T, F>(
    x: &[T],
    x_shape: &ShapeDescriptor,
    y: &[T],
    y_shape: &ShapeDescriptor,
    dst: &mut [T],
    dst_shape: &ShapeDescriptor,
    axes: &[usize],
    f: F,
) -> Result<()>
where
    T: Copy + Send + Sync,
    F: Fn(T, T) -> T + Sync,
{
    ensure_same_shape(x_shape, dst_shape)?;
    ensure_in_bounds(x, x_shape)?;
    ensure_in_bounds(y, y_shape)?;
    ensure_in_bounds(dst, dst_shape)?;
    let x_pack = tad_cache().get(x_shape, axes, false)?;
    let dst_pack = tad_cache().get(dst_shape, axes, false)?;
    ensure_same_shape(x_pack.sub_shape(), y_shape)?;
    debug_assert_eq!(x_pack.count(), dst_pack.count());

    let sub_len = x_pack.sub_shape().length();
    let x_strategy = OffsetStrategy::choose(x_pack.sub_shape());
    let y_strategy = OffsetStrategy::choose(y_shape);
    let dst_strategy = OffsetStrategy::choose(dst_pack.sub_shape());
    let plan = LoopPlan::build(&[], x_pack.count())?;
    let x_ptr = SendPtr(x.as_ptr() as *mut T);
    let y_ptr = SendPtr(y.as_ptr() as *mut T);
    let dst_ptr = SendPtr(dst.as_mut_ptr());
    for_each_span(&plan, |_, span| {
        for tad in span.start..span.end {
            let x_base = x_pack.offsets()[tad];
            let dst_base = dst_pack.offsets()[tad];
            let mut xw = OffsetWalker::new(x_pack.sub_shape(), &x_strategy, 0);
            let mut yw = OffsetWalker::new(y_shape, &y_strategy, 0);
            let mut dw = OffsetWalker::new(dst_pack.sub_shape(), &dst_strategy, 0);
            for _ in 0..sub_len {
                unsafe {
                    let a = *x_ptr.as_ptr().offset(x_base + xw.offset());
                    let b = *y_ptr.as_ptr().offset(yw.offset());
                    *dst_ptr.as_ptr().offset(dst_base + dw.offset()) = f(a, b);
                }
                xw.advance();
                yw.advance();
                dw.advance();
            }
        }
        Ok(())
    })
}

// ============================================================================
// Reductions
// ============================================================================

/// Reduces the whole array to one accumulator.
///
/// Span partials are merged in span-index order, so the result is
/// bit-identical across runs for a fixed span count.
pub fn reduce_all<T, R>(src: &[T], src_shape: &ShapeDescriptor, op: &R) -> Result<R::Acc>
where
    T: Copy + Send + Sync,
    R: ReduceOp<T> + Sync,
    R::Acc: Send,
{
    ensure_in_bounds(src, src_shape)?;
    let plan = LoopPlan::build(&[src_shape], src_shape.length())?;
    let src_ptr = SendPtr(src.as_ptr() as *mut T);
    let folded = reduce_spans(
        &plan,
        |_, span| {
            let mut walker = OffsetWalker::new(src_shape, plan.strategy(0), span.start);
            let mut acc = op.identity();
            for _ in span.start..span.end {
                let value = unsafe { *src_ptr.as_ptr().offset(walker.offset()) };
                acc = op.accumulate(acc, value);
                walker.advance();
            }
            Ok(acc)
        },
        |a, b| op.combine(a, b),
    )?;
    let acc = folded.unwrap_or_else(|| op.identity());
    Ok(op.finish(acc, src_shape.length()))
}

/// Reduces along `axes`, producing one accumulator per surviving
/// coordinate.
///
/// The output vector is ordered row-major over the surviving axes and is
/// returned together with its dense shape (`keep_units` keeps the source
/// rank with extent-1 placeholders at reduced positions). Sub-views come
/// from the process-wide cache; each output element is written by exactly
/// one span.
pub fn reduce_axes<T, R>(
    src: &[T],
    src_shape: &ShapeDescriptor,
    axes: &[usize],
    keep_units: bool,
    op: &R,
) -> Result<(Vec<R::Acc>, ShapeDescriptor)>
where
    T: Copy + Send + Sync,
    R: ReduceOp<T> + Sync,
    R::Acc: Send,
{
    ensure_in_bounds(src, src_shape)?;
    let pack = tad_cache().get(src_shape, axes, false)?;
    let out_shape = reduced_shape(src_shape, axes, keep_units)?;
    debug_assert_eq!(out_shape.length(), pack.count());

    let sub_len = pack.sub_shape().length();
    let sub_strategy = OffsetStrategy::choose(pack.sub_shape());
    let mut out: Vec<R::Acc> = Vec::new();
    out.resize_with(pack.count(), || op.identity());
    let plan = LoopPlan::build(&[], pack.count())?;
    let src_ptr = SendPtr(src.as_ptr() as *mut T);
    let out_ptr = SendPtr(out.as_mut_ptr());
    let offsets = pack.offsets();
    for_each_span(&plan, |_, span| {
        for tad in span.start..span.end {
            let base = offsets[tad];
            let mut walker = OffsetWalker::new(pack.sub_shape(), &sub_strategy, 0);
            let mut acc = op.identity();
            for _ in 0..sub_len {
                let value = unsafe { *src_ptr.as_ptr().offset(base + walker.offset()) };
                acc = op.accumulate(acc, value);
                walker.advance();
            }
            unsafe {
                *out_ptr.as_ptr().add(tad) = op.finish(acc, sub_len);
            }
        }
        Ok(())
    })?;
    Ok((out, out_shape))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::MemoryOrder;

    // View of a buffer holding the transposed matrix, declared in C order.
    fn transposed_view(extents: &[usize]) -> ShapeDescriptor {
        assert_eq!(extents.len(), 2);
        let strides = [1, extents[0] as isize];
        ShapeDescriptor::new(extents, &strides, MemoryOrder::RowMajor).unwrap()
    }

    #[test]
    fn test_transform_transposed_copy() {
        let src = ShapeDescriptor::row_major(&[2, 3]).unwrap();
        let dst = transposed_view(&[2, 3]);
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut out = vec![0.0; 6];
        transform(&data, &src, &mut out, &dst, |x| x * 10.0).unwrap();
        assert_eq!(out, vec![10.0, 40.0, 20.0, 50.0, 30.0, 60.0]);
    }

    #[test]
    fn test_transform_scalar_rank0() {
        let s = ShapeDescriptor::row_major(&[]).unwrap();
        let data = vec![3.0];
        let mut out = vec![0.0];
        transform(&data, &s, &mut out, &s, |x| x + 1.0).unwrap();
        assert_eq!(out, vec![4.0]);
    }

    #[test]
    fn test_transform_rejects_mismatches() {
        let a = ShapeDescriptor::row_major(&[2, 3]).unwrap();
        let b = ShapeDescriptor::row_major(&[3, 2]).unwrap();
        let data = vec![0.0; 6];
        let mut out = vec![0.0; 6];
        assert!(matches!(
            transform(&data, &a, &mut out, &b, |x| x).unwrap_err(),
            StridedError::ShapeMismatch(..)
        ));

        let f = ShapeDescriptor::col_major(&[2, 3]).unwrap();
        assert!(matches!(
            transform(&data, &a, &mut out, &f, |x| x).unwrap_err(),
            StridedError::OrderMismatch
        ));

        let short = vec![0.0; 5];
        assert!(matches!(
            transform(&short, &a, &mut out, &a, |x| x).unwrap_err(),
            StridedError::BufferTooSmall { needed: 6, len: 5 }
        ));
    }

    #[test]
    fn test_pairwise_mixed_layouts() {
        let x_shape = ShapeDescriptor::row_major(&[2, 3]).unwrap();
        let y_shape = transposed_view(&[2, 3]);
        let dst_shape = ShapeDescriptor::row_major(&[2, 3]).unwrap();
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        // y reads [[10, 30, 50], [20, 40, 60]] through the view.
        let y = vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0];
        let mut dst = vec![0.0; 6];
        pairwise(&x, &x_shape, &y, &y_shape, &mut dst, &dst_shape, |a, b| a + b).unwrap();
        assert_eq!(dst, vec![11.0, 32.0, 53.0, 24.0, 45.0, 66.0]);
    }

    #[test]
    fn test_scalar_op() {
        let s = ShapeDescriptor::row_major(&[4]).unwrap();
        let data = vec![1.0, 2.0, 3.0, 4.0];
        let mut out = vec![0.0; 4];
        scalar_op(&data, &s, 10.0, &mut out, &s, |v, k| v * k).unwrap();
        assert_eq!(out, vec![10.0, 20.0, 30.0, 40.0]);
    }

    #[test]
    fn test_reduce_all_ops() {
        let s = ShapeDescriptor::row_major(&[2, 3]).unwrap();
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(reduce_all(&data, &s, &Sum).unwrap(), 21.0);
        assert_eq!(reduce_all(&data, &s, &Prod).unwrap(), 720.0);
        assert_eq!(reduce_all(&data, &s, &Min).unwrap(), 1.0);
        assert_eq!(reduce_all(&data, &s, &Max).unwrap(), 6.0);
        assert_eq!(reduce_all(&data, &s, &Mean).unwrap(), 3.5);
    }

    #[test]
    fn test_reduce_axes_row_sums() {
        let s = ShapeDescriptor::row_major(&[2, 3]).unwrap();
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let (out, shape) = reduce_axes(&data, &s, &[1], false, &Sum).unwrap();
        assert_eq!(out, vec![6.0, 15.0]);
        assert_eq!(shape.extents(), &[2]);
    }

    #[test]
    fn test_reduce_axes_col_sums() {
        let s = ShapeDescriptor::row_major(&[2, 3]).unwrap();
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let (out, shape) = reduce_axes(&data, &s, &[0], false, &Sum).unwrap();
        assert_eq!(out, vec![5.0, 7.0, 9.0]);
        assert_eq!(shape.extents(), &[3]);
    }

    #[test]
    fn test_reduce_axes_keep_units() {
        let s = ShapeDescriptor::row_major(&[2, 3]).unwrap();
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let (out, shape) = reduce_axes(&data, &s, &[1], true, &Mean).unwrap();
        assert_eq!(out, vec![2.0, 5.0]);
        assert_eq!(shape.extents(), &[2, 1]);
    }

    #[test]
    fn test_reduce_axes_all_axes_matches_reduce_all() {
        let s = ShapeDescriptor::row_major(&[2, 3]).unwrap();
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let (out, shape) = reduce_axes(&data, &s, &[0, 1], false, &Sum).unwrap();
        assert_eq!(shape.rank(), 0);
        assert_eq!(out, vec![reduce_all(&data, &s, &Sum).unwrap()]);
    }

    #[test]
    fn test_reduce_axes_int_max() {
        let s = ShapeDescriptor::row_major(&[2, 3]).unwrap();
        let data: Vec<i64> = vec![9, 2, 7, 4, 11, 6];
        let (out, _) = reduce_axes(&data, &s, &[1], false, &Max).unwrap();
        assert_eq!(out, vec![9, 11]);
    }

    #[test]
    fn test_broadcast_add_row_vector() {
        let x_shape = ShapeDescriptor::row_major(&[4, 3]).unwrap();
        let y_shape = ShapeDescriptor::row_major(&[3]).unwrap();
        let x: Vec<f64> = (0..12).map(|v| v as f64).collect();
        let y = vec![10.0, 20.0, 30.0];
        let mut dst = vec![0.0; 12];
        broadcast(&x, &x_shape, &y, &y_shape, &mut dst, &x_shape, &[1], |a, b| {
            a + b
        })
        .unwrap();
        assert_eq!(
            dst,
            vec![10.0, 21.0, 32.0, 13.0, 24.0, 35.0, 16.0, 27.0, 38.0, 19.0, 30.0, 41.0]
        );
    }

    #[test]
    fn test_broadcast_col_vector_strided_dst() {
        let x_shape = ShapeDescriptor::row_major(&[2, 3]).unwrap();
        let y_shape = ShapeDescriptor::row_major(&[2]).unwrap();
        let dst_shape = transposed_view(&[2, 3]);
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let y = vec![100.0, 200.0];
        let mut dst = vec![0.0; 6];
        broadcast(&x, &x_shape, &y, &y_shape, &mut dst, &dst_shape, &[0], |a, b| {
            a + b
        })
        .unwrap();
        // dst holds the transpose of [[101, 102, 103], [204, 205, 206]].
        assert_eq!(dst, vec![101.0, 204.0, 102.0, 205.0, 103.0, 206.0]);
    }

    #[test]
    fn test_broadcast_rejects_wrong_vector() {
        let x_shape = ShapeDescriptor::row_major(&[4, 3]).unwrap();
        let y_shape = ShapeDescriptor::row_major(&[4]).unwrap();
        let x = vec![0.0; 12];
        let y = vec![0.0; 4];
        let mut dst = vec![0.0; 12];
        assert!(matches!(
            broadcast(&x, &x_shape, &y, &y_shape, &mut dst, &x_shape, &[1], |a, b| a + b)
                .unwrap_err(),
            StridedError::ShapeMismatch(..)
        ));
    }
}
