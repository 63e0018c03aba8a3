//! Free list of explicitly released image ranges
//!
//! Ranges are kept in the order they were freed and handed out first-fit,
//! oldest first. Freeing a range that touches existing ones merges them;
//! ranges separated by even a single used byte stay apart.

use crate::allocator::{Alignment, FreeRange, SpaceAllocator};
use crate::error::{RomError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Freed-space tracker
///
/// The free list is only advisory: other writers can overwrite a freed range
/// without telling the allocator, so every candidate is checked against the
/// image before it is returned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FreedSpace {
    /// Free ranges, oldest first
    ranges: Vec<FreeRange>,
}

impl FreedSpace {
    pub fn new() -> Self {
        FreedSpace { ranges: Vec::new() }
    }

    /// Number of disjoint free ranges
    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Free ranges in time-of-freeing order
    pub fn iter(&self) -> impl Iterator<Item = &FreeRange> {
        self.ranges.iter()
    }

    /// Check if a specific byte is on the free list
    pub fn is_free(&self, offset: usize) -> bool {
        self.ranges.iter().any(|range| range.contains(offset))
    }

    /// Insert a free range, merging it with every range it touches
    ///
    /// The merged range takes the slot of the oldest participant.
    fn insert_and_coalesce(&mut self, range: FreeRange) {
        let hits: Vec<usize> = self
            .ranges
            .iter()
            .enumerate()
            .filter(|(_, existing)| existing.touches(&range))
            .map(|(index, _)| index)
            .collect();

        let Some(&position) = hits.first() else {
            self.ranges.push(range);
            return;
        };

        let mut start = range.offset;
        let mut end = range.end();
        for &index in hits.iter().rev() {
            let existing = self.ranges.remove(index);
            if existing.overlaps(&range) {
                warn!(
                    "Double-free detected for {:#x}..{:#x}",
                    existing.offset.max(range.offset),
                    existing.end().min(range.end())
                );
            }
            start = start.min(existing.offset);
            end = end.max(existing.end());
        }

        self.ranges
            .insert(position, FreeRange::new(start, end - start));
    }
}

impl SpaceAllocator for FreedSpace {
    fn free(&mut self, offset: usize, length: usize) -> Result<()> {
        if length < 1 {
            return Err(RomError::InvalidLength(length));
        }
        if offset.checked_add(length).is_none() {
            return Err(RomError::OutOfBounds {
                offset,
                length,
                size: usize::MAX,
            });
        }

        debug!("Freeing {} bytes at {:#x}", length, offset);
        self.insert_and_coalesce(FreeRange::new(offset, length));
        Ok(())
    }

    fn allocate(
        &mut self,
        image: &[u8],
        sentinel: u8,
        length: usize,
        alignment: Alignment,
    ) -> Option<usize> {
        if length == 0 {
            return None;
        }

        let (index, start) = self.ranges.iter().enumerate().find_map(|(index, range)| {
            let start = alignment.align_up(range.offset);
            start
                .checked_add(length)
                .is_some_and(|end| end <= range.end())
                .then_some((index, start))
        })?;
        let range = self.ranges[index];

        let unused = image
            .get(start..start + length)
            .is_some_and(|window| window.iter().all(|&byte| byte == sentinel));
        if !unused {
            // Someone wrote into the range behind our back; drop it entirely
            warn!(
                "Discarding stale free range {:#x}+{}: bytes no longer hold the sentinel",
                range.offset, range.length
            );
            self.ranges.remove(index);
            return None;
        }

        let head = FreeRange::new(range.offset, start - range.offset);
        let tail = FreeRange::new(start + length, range.end() - (start + length));
        let remainders: Vec<FreeRange> = [head, tail]
            .into_iter()
            .filter(|piece| piece.length > 0)
            .collect();
        self.ranges.splice(index..=index, remainders);

        debug!("Reusing freed space: {} bytes at {:#x}", length, start);
        Some(start)
    }

    fn reserve(&mut self, offset: usize, length: usize) {
        if length == 0 {
            return;
        }
        let cut = FreeRange::new(offset, length);
        let mut kept = Vec::with_capacity(self.ranges.len() + 1);

        for range in self.ranges.drain(..) {
            if !range.overlaps(&cut) {
                kept.push(range);
                continue;
            }
            if range.offset < cut.offset {
                kept.push(FreeRange::new(range.offset, cut.offset - range.offset));
            }
            if range.end() > cut.end() {
                kept.push(FreeRange::new(cut.end(), range.end() - cut.end()));
            }
        }

        self.ranges = kept;
    }

    fn fragmentation_score(&self) -> f64 {
        let free = self.free_bytes();
        if free == 0 || self.ranges.is_empty() {
            return 0.0;
        }

        (self.ranges.len() as f64 - 1.0) / (free as f64).max(1.0)
    }

    fn free_bytes(&self) -> usize {
        self.ranges.iter().map(|range| range.length).sum()
    }
}
