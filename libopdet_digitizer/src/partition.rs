use std::ops::Range;

/// A contiguous block of channels owned by a single worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelRange {
    pub start: usize,
    pub count: usize,
}

impl ChannelRange {
    pub fn end(&self) -> usize {
        self.start + self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn as_range(&self) -> Range<usize> {
        self.start..self.end()
    }

    /// Channel ids in this range
    pub fn channels(&self) -> impl Iterator<Item = u32> {
        self.as_range().map(|ch| ch as u32)
    }
}

/// Compute the channels owned by worker `worker_index`.
///
/// Every worker gets `n_channels / n_workers` channels and the first
/// `n_channels % n_workers` workers get one more. Ranges are laid out in worker
/// order, so together they tile `[0, n_channels)` exactly once. Workers past the
/// channel count get an empty range.
pub fn channel_range(worker_index: usize, n_channels: usize, n_workers: usize) -> ChannelRange {
    if n_workers == 0 {
        return ChannelRange::default();
    }
    let base = n_channels / n_workers;
    let extra = n_channels % n_workers;
    let count = base + usize::from(worker_index < extra);
    let start = worker_index * base + worker_index.min(extra);
    ChannelRange { start, count }
}

/// Divide the channels into one range per worker
pub fn create_ranges(n_channels: usize, n_workers: usize) -> Vec<ChannelRange> {
    (0..n_workers)
        .map(|idx| channel_range(idx, n_channels, n_workers))
        .collect()
}
