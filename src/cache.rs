//! Process-wide cache of tensor-along-dimension decompositions.
//!
//! Packs are keyed structurally (extents, strides, order, kept axis set,
//! placeholder mode), so independently constructed but identical layouts
//! hit the same entry from any call site. Entries are append-only: a pack
//! is built at most once per key, shared as an [`Arc`], and never mutated.
//! Retention is unbounded until [`TadCache::clear`] or process exit.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, trace};
use once_cell::sync::Lazy;

use crate::shape::{AxisVec, MemoryOrder, ShapeDescriptor};
use crate::tad::TadPack;
use crate::Result;

static TAD_CACHE: Lazy<TadCache> = Lazy::new(TadCache::new);

/// Handle to the process-wide cache, initialized on first use.
pub fn tad_cache() -> &'static TadCache {
    &TAD_CACHE
}

/// Structural cache key. The kept set is stored sorted so axis order at the
/// call site does not split entries.
#[derive(Clone, PartialEq, Eq, Hash)]
struct TadKey {
    extents: AxisVec<usize>,
    strides: AxisVec<isize>,
    order: MemoryOrder,
    kept: AxisVec<usize>,
    keep_units: bool,
}

impl TadKey {
    fn new(shape: &ShapeDescriptor, kept_axes: &[usize], keep_units: bool) -> Self {
        let mut kept = AxisVec::from_slice(kept_axes);
        kept.sort_unstable();
        Self {
            extents: AxisVec::from_slice(shape.extents()),
            strides: AxisVec::from_slice(shape.strides()),
            order: shape.order(),
            kept,
            keep_units,
        }
    }
}

/// Thread-safe map from decomposition request to shared [`TadPack`].
///
/// Lookups take a read lock; a miss builds the pack outside any lock and
/// inserts under a write lock. When two threads race on the same key the
/// first insert wins and the duplicate pack is discarded, which is safe
/// because equal keys always produce identical packs.
pub struct TadCache {
    entries: RwLock<HashMap<TadKey, Arc<TadPack>>>,
}

impl TadCache {
    /// Fresh empty cache, independent of the process-wide one.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the pack for `(shape, kept_axes, keep_units)`, building and
    /// inserting it on first request.
    ///
    /// Repeated calls with structurally equal arguments return the same
    /// instance. Validation failures from [`TadPack::build`] pass through
    /// and insert nothing.
    pub fn get(
        &self,
        shape: &ShapeDescriptor,
        kept_axes: &[usize],
        keep_units: bool,
    ) -> Result<Arc<TadPack>> {
        let key = TadKey::new(shape, kept_axes, keep_units);
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(pack) = entries.get(&key) {
                trace!(
                    "tad cache hit for extents {:?} kept {:?}",
                    shape.extents(),
                    key.kept
                );
                return Ok(Arc::clone(pack));
            }
        }
        let built = Arc::new(TadPack::build(shape, kept_axes, keep_units)?);
        debug!(
            "tad cache miss: built pack for extents {:?} kept {:?} ({} sub-views)",
            shape.extents(),
            key.kept,
            built.count()
        );
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(entries.entry(key).or_insert(built)))
    }

    /// Number of cached packs.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True if nothing has been cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every cached pack. Outstanding [`Arc`] handles stay valid;
    /// the next request per key rebuilds.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for TadCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_is_idempotent() {
        let cache = TadCache::new();
        let s = ShapeDescriptor::row_major(&[4, 64]).unwrap();
        let a = cache.get(&s, &[1], false).unwrap();
        let b = cache.get(&s, &[1], false).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_structural_key_across_constructions() {
        let cache = TadCache::new();
        let a = ShapeDescriptor::row_major(&[4, 64]).unwrap();
        let b = ShapeDescriptor::new(&[4, 64], &[64, 1], MemoryOrder::RowMajor).unwrap();
        let pa = cache.get(&a, &[1], false).unwrap();
        let pb = cache.get(&b, &[1], false).unwrap();
        assert!(Arc::ptr_eq(&pa, &pb));
    }

    #[test]
    fn test_axis_order_does_not_split_entries() {
        let cache = TadCache::new();
        let s = ShapeDescriptor::row_major(&[2, 3, 4, 5]).unwrap();
        let a = cache.get(&s, &[2, 0], false).unwrap();
        let b = cache.get(&s, &[0, 2], false).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_placeholder_modes_are_distinct_entries() {
        let cache = TadCache::new();
        let s = ShapeDescriptor::row_major(&[4, 64]).unwrap();
        let flat = cache.get(&s, &[1], false).unwrap();
        let units = cache.get(&s, &[1], true).unwrap();
        assert!(!Arc::ptr_eq(&flat, &units));
        assert_eq!(flat.sub_shape().rank(), 1);
        assert_eq!(units.sub_shape().rank(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_invalid_request_inserts_nothing() {
        let cache = TadCache::new();
        let s = ShapeDescriptor::row_major(&[4, 64]).unwrap();
        assert!(cache.get(&s, &[5], false).is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_rebuilds() {
        let cache = TadCache::new();
        let s = ShapeDescriptor::row_major(&[4, 64]).unwrap();
        let before = cache.get(&s, &[1], false).unwrap();
        cache.clear();
        assert!(cache.is_empty());
        let after = cache.get(&s, &[1], false).unwrap();
        // The old handle stays usable; the rebuilt pack is a new instance.
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(*before, *after);
    }

    #[test]
    fn test_concurrent_gets_converge() {
        let cache = Arc::new(TadCache::new());
        let s = ShapeDescriptor::row_major(&[8, 16, 4]).unwrap();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let shape = s.clone();
            handles.push(std::thread::spawn(move || {
                cache.get(&shape, &[2], false).unwrap()
            }));
        }
        let packs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for pack in &packs[1..] {
            assert!(Arc::ptr_eq(&packs[0], pack));
        }
        assert_eq!(cache.len(), 1);
    }
}
