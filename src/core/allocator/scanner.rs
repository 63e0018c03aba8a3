//! Raw-image scan for unused space
//!
//! Fallback when the free list has nothing suitable. Looks for a run of
//! sentinel bytes a little longer than requested and returns an offset a few
//! bytes into it, so terminators of variable-length records that end right
//! before the run are left alone.

use crate::allocator::claims::ClaimSet;
use crate::allocator::Alignment;
use tracing::trace;

/// Extra sentinel bytes required before an unaligned result
pub const UNALIGNED_PADDING: usize = 2;

/// Extra sentinel bytes required around a word-aligned result
pub const ALIGNED_PADDING: usize = 5;

impl Alignment {
    /// Sentinel bytes searched for beyond the requested length
    pub fn padding(self) -> usize {
        match self {
            Alignment::Unaligned => UNALIGNED_PADDING,
            Alignment::Word => ALIGNED_PADDING,
        }
    }

    /// Usable offset inside a run that starts at `run_start`
    fn place(self, run_start: usize) -> usize {
        match self {
            Alignment::Unaligned => run_start + UNALIGNED_PADDING,
            Alignment::Word => (run_start + ALIGNED_PADDING) & !3,
        }
    }
}

/// Find `length` unused bytes at or after `start`
///
/// Scans for the first run of `length + padding` consecutive `sentinel` bytes
/// that does not touch a claimed range. Returns `None` if the image ends
/// first. The returned window `offset..offset + length` lies inside the run.
pub fn find_unused_space(
    image: &[u8],
    sentinel: u8,
    length: usize,
    start: usize,
    alignment: Alignment,
    claims: &ClaimSet,
) -> Option<usize> {
    if length == 0 || start >= image.len() {
        return None;
    }
    let needed = length.checked_add(alignment.padding())?;

    let mut claims = claims.iter_from(start).peekable();
    let mut run_start = start;
    let mut pos = start;

    while pos < image.len() {
        if let Some(&(claim_start, claim_end)) = claims.peek() {
            if pos >= claim_start {
                pos = pos.max(claim_end);
                run_start = pos;
                claims.next();
                continue;
            }
        }

        if image[pos] != sentinel {
            pos += 1;
            run_start = pos;
            continue;
        }

        pos += 1;
        if pos - run_start >= needed {
            let offset = alignment.place(run_start);
            trace!(
                "Unused run at {:#x}, handing out {} bytes at {:#x}",
                run_start,
                length,
                offset
            );
            return Some(offset);
        }
    }

    None
}
