//! Ranges handed out during the current session
//!
//! A consumer is not required to overwrite the sentinel bytes it was given,
//! so the scanner cannot tell claimed space from unused space by content
//! alone. Claims fill that gap.

use crate::allocator::FreeRange;
use std::collections::BTreeMap;

/// Disjoint claimed ranges indexed by start offset
#[derive(Debug, Clone, Default)]
pub struct ClaimSet {
    /// start -> end (exclusive)
    claims: BTreeMap<usize, usize>,
}

impl ClaimSet {
    pub fn new() -> Self {
        ClaimSet {
            claims: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// Total claimed bytes
    pub fn claimed_bytes(&self) -> usize {
        self.claims.iter().map(|(start, end)| end - start).sum()
    }

    /// Record a claim. Callers only claim space that no claim covers.
    pub fn claim(&mut self, offset: usize, length: usize) {
        if length == 0 {
            return;
        }
        debug_assert!(!self.overlaps(offset, length), "claim overlaps existing claim");
        self.claims.insert(offset, offset + length);
    }

    /// Drop every claimed byte inside the given range, splitting claims as needed
    pub fn release(&mut self, offset: usize, length: usize) {
        if length == 0 {
            return;
        }
        let cut = FreeRange::new(offset, length);
        let hit: Vec<(usize, usize)> = self
            .overlapping(offset, length)
            .collect();

        for (start, end) in hit {
            self.claims.remove(&start);
            if start < cut.offset {
                self.claims.insert(start, cut.offset);
            }
            if end > cut.end() {
                self.claims.insert(cut.end(), end);
            }
        }
    }

    pub fn overlaps(&self, offset: usize, length: usize) -> bool {
        length > 0 && self.overlapping(offset, length).next().is_some()
    }

    /// Claims intersecting `offset..offset + length`, as (start, end) pairs
    fn overlapping(&self, offset: usize, length: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        let end = offset + length;
        self.iter_from(offset).take_while(move |&(start, _)| start < end)
    }

    /// Claims ending after `offset`, in ascending order
    pub fn iter_from(&self, offset: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        let straddling = self
            .claims
            .range(..offset)
            .next_back()
            .filter(|&(_, &end)| end > offset)
            .map(|(&start, &end)| (start, end));

        straddling
            .into_iter()
            .chain(self.claims.range(offset..).map(|(&start, &end)| (start, end)))
    }
}
