//! Free-space management for the image buffer
//!
//! Space is found in two steps:
//! - [`freed::FreedSpace`] hands back ranges the session explicitly freed
//! - [`scanner::find_unused_space`] searches the raw image for sentinel runs
//!
//! [`claims::ClaimSet`] remembers what was handed out so neither path
//! returns the same bytes twice.

pub mod claims;
pub mod freed;
pub mod scanner;

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// A contiguous byte range inside the image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FreeRange {
    pub offset: usize,
    pub length: usize,
}

impl FreeRange {
    pub fn new(offset: usize, length: usize) -> Self {
        FreeRange { offset, length }
    }

    /// One past the last byte
    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.offset && offset < self.end()
    }

    pub fn overlaps(&self, other: &FreeRange) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }

    /// Overlapping or directly adjacent (can be merged without a gap)
    pub fn touches(&self, other: &FreeRange) -> bool {
        self.offset <= other.end() && other.offset <= self.end()
    }
}

/// Placement constraint for a requested range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Alignment {
    /// Any byte offset
    Unaligned,
    /// 4-byte boundary, required for anything the CPU reads as a word
    #[default]
    Word,
}

impl Alignment {
    pub fn align_up(self, offset: usize) -> usize {
        match self {
            Alignment::Unaligned => offset,
            Alignment::Word => (offset + 3) & !3,
        }
    }
}

/// Allocator over explicitly freed image space
///
/// `allocate` receives the image so it can re-verify a candidate range
/// before handing it out.
pub trait SpaceAllocator {
    /// Mark `length` bytes at `offset` as reusable
    fn free(&mut self, offset: usize, length: usize) -> Result<()>;

    /// Take `length` bytes from the free ranges, or `None` to fall back to scanning
    fn allocate(
        &mut self,
        image: &[u8],
        sentinel: u8,
        length: usize,
        alignment: Alignment,
    ) -> Option<usize>;

    /// Remove any free bytes inside the given range
    fn reserve(&mut self, offset: usize, length: usize);

    /// Calculate fragmentation score (0.0 = one range, higher = more fragmented)
    fn fragmentation_score(&self) -> f64;

    /// Total bytes currently free
    fn free_bytes(&self) -> usize;
}
