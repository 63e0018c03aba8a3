//! Image patching core
//!
//! The building blocks behind [`crate::RomImage`]:
//!
//! - [`error`] - Error types for patching operations
//! - [`cursor`] - Little-endian integer access over byte buffers
//! - [`layout`] - Platform layout (sentinel byte, executable, file slots)
//! - [`allocator`] - Free-space management:
//!   - [`allocator::freed`] - Free list of explicitly released ranges
//!   - [`allocator::scanner`] - Raw-image scan for sentinel runs
//!   - [`allocator::claims`] - Ranges handed out this session
//! - [`archive`] - NARC container codec, with [`archive::palette`] records
//! - [`relocation`] - One-shot ITCM growth in the boot executable
//! - [`image`] - The session tying them together
//!
//! ## Example Usage
//!
//! ```rust
//! use rompatch_rs::core::allocator::freed::FreedSpace;
//! use rompatch_rs::core::allocator::{Alignment, SpaceAllocator};
//!
//! let image = vec![0xFFu8; 256];
//! let mut freed = FreedSpace::new();
//! freed.free(100, 20).unwrap();
//!
//! let offset = freed.allocate(&image, 0xFF, 10, Alignment::Unaligned).unwrap();
//! assert!((100..110).contains(&offset));
//! ```

pub mod allocator;
pub mod archive;
pub mod cursor;
pub mod error;
pub mod image;
pub mod layout;
pub mod relocation;
