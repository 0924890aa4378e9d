//! Part planning: splitting an object into fixed-size byte ranges

use partstream_store::ByteRange;

/// Number of bytes in every part except possibly the last (5 MiB)
pub const PART_SIZE: u64 = 5 << 20;

/// Number of parts needed for an object of `total_size` bytes
pub fn part_count(total_size: u64) -> u64 {
    total_size.div_ceil(PART_SIZE)
}

/// One planned range fetch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartPlan {
    /// Zero-based part index
    pub index: u64,
    /// Inclusive byte range of the part
    pub range: ByteRange,
}

impl PartPlan {
    /// Plan every part of an object of `total_size` bytes, in ascending order
    pub fn for_size(total_size: u64) -> PartPlanIter {
        PartPlanIter {
            total_size,
            next: 0,
            count: part_count(total_size),
        }
    }

    /// Part `index` of an object of `total_size` bytes
    fn at(index: u64, total_size: u64) -> Self {
        let start = index * PART_SIZE;
        let end = start.saturating_add(PART_SIZE).min(total_size) - 1;
        Self {
            index,
            range: ByteRange::new(start, end),
        }
    }

    /// Length of the part in bytes
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.range.len()
    }
}

/// Iterator over the parts of an object
#[derive(Clone, Debug)]
pub struct PartPlanIter {
    total_size: u64,
    next: u64,
    count: u64,
}

impl Iterator for PartPlanIter {
    type Item = PartPlan;

    fn next(&mut self) -> Option<PartPlan> {
        if self.next >= self.count {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(PartPlan::at(index, self.total_size))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.count - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PartPlanIter {}
