use serde::{Deserialize, Serialize};
use std::cell::UnsafeCell;

/// A digitized photon detector waveform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpDetWaveform {
    pub channel: u32,
    /// Time of the first sample in ns
    pub timestamp: i64,
    pub adcs: Vec<u16>,
}

impl OpDetWaveform {
    pub fn new(channel: u32, timestamp: i64, adcs: Vec<u16>) -> Self {
        Self {
            channel,
            timestamp,
            adcs,
        }
    }

    pub fn len(&self) -> usize {
        self.adcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adcs.is_empty()
    }
}

/// A fixed-size buffer written concurrently by several threads, each over its own
/// disjoint index range.
///
/// There is no locking at all: correctness rests on the caller handing out
/// non-overlapping ranges and on a barrier separating the writes from any read of
/// the whole buffer. The DigitizerPool does both (ranges come from
/// [`channel_range`](super::partition::channel_range), and the finish rendezvous is
/// the barrier).
pub struct SharedBuffer<T> {
    cells: Box<[UnsafeCell<T>]>,
}

// SAFETY: the buffer only hands out `&mut` to sub-slices through the unsafe
// `range_mut`, whose callers promise that no two live slices overlap and that
// nothing reads a range while it is being written.
unsafe impl<T: Send> Send for SharedBuffer<T> {}
unsafe impl<T: Send + Sync> Sync for SharedBuffer<T> {}

impl<T: Default> SharedBuffer<T> {
    /// A buffer of `len` default elements
    pub fn new(len: usize) -> Self {
        Self {
            cells: (0..len).map(|_| UnsafeCell::new(T::default())).collect(),
        }
    }
}

impl<T> SharedBuffer<T> {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Mutable view of `[start, start + count)`.
    ///
    /// # Safety
    /// No other reference (shared or mutable) into the same indices may be alive
    /// while the returned slice is, and the range must be in bounds.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn range_mut(&self, start: usize, count: usize) -> &mut [T] {
        assert!(start + count <= self.cells.len());
        let first = UnsafeCell::raw_get(self.cells.as_ptr().add(start));
        std::slice::from_raw_parts_mut(first, count)
    }

    /// Shared view of `[start, start + count)`.
    ///
    /// # Safety
    /// No mutable reference into the same indices may be alive while the returned
    /// slice is, and the range must be in bounds.
    pub unsafe fn range(&self, start: usize, count: usize) -> &[T] {
        assert!(start + count <= self.cells.len());
        let first = UnsafeCell::raw_get(self.cells.as_ptr().add(start));
        std::slice::from_raw_parts(first, count)
    }

    /// Shared view of the whole buffer. Requires exclusive access, so every writer is done.
    pub fn as_slice(&mut self) -> &[T] {
        let len = self.cells.len();
        // SAFETY: `&mut self` rules out any other live view
        unsafe { self.range(0, len) }
    }

    /// Take the elements out of the buffer
    pub fn into_vec(self) -> Vec<T> {
        self.cells
            .into_vec()
            .into_iter()
            .map(UnsafeCell::into_inner)
            .collect()
    }
}

impl<T> std::fmt::Debug for SharedBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("len", &self.cells.len())
            .finish()
    }
}
