//! # rompatch-rs - Cartridge Image Patching
//!
//! `rompatch-rs` lets higher-level code inject or replace arbitrary-length
//! binary content inside a fixed-size cartridge image without corrupting
//! unrelated data:
//!
//! - **Free-space allocation** over explicitly freed ranges, with a raw-image
//!   scan for unused (sentinel) bytes as fallback
//! - **NARC archives** for packing same-purpose records (sprites, palettes)
//!   into one file slot
//! - **ARM9 relocation** that grows the ITCM section of the boot executable
//!   once, rewriting the SDK's self-describing pointers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rompatch_rs::{PlatformLayout, RomImage, Result};
//!
//! # fn main() -> Result<()> {
//! let layout = PlatformLayout::load("platinum.toml")?;
//! let mut rom = RomImage::load("platinum.nds", layout)?;
//!
//! // Find room for new content and write it
//! let offset = rom.allocate_and_write(&[0x01, 0x02, 0x03, 0x04], 0x10_0000)?;
//!
//! // Edit a record inside an archive slot
//! let mut narc = rom.read_archive("pokemon_graphics")?;
//! narc.set(3, vec![0u8; 64])?;
//! rom.write_archive("pokemon_graphics", &narc)?;
//!
//! rom.save("platinum-patched.nds")?;
//! # let _ = offset;
//! # Ok(())
//! # }
//! ```
//!
//! ## Builder
//!
//! ```rust,no_run
//! use rompatch_rs::{RomBuilder, Result};
//!
//! # fn main() -> Result<()> {
//! let mut rom = RomBuilder::new()
//!     .image_path("platinum.nds")
//!     .layout_path("platinum.toml")
//!     .executable_from_header()
//!     .build()?;
//!
//! // Grow the ITCM section before any allocation
//! rom.extend_executable(0x1000)?;
//! # Ok(())
//! # }
//! ```

pub mod core;

// Re-export core modules internally so crate:: paths in core still work
pub(crate) use crate::core::{allocator, archive, cursor, error, layout, relocation};

// Re-export core types that users need
pub use crate::core::{
    allocator::{Alignment, FreeRange, SpaceAllocator},
    archive::{
        palette::{read_palette, write_palette, Color, Palette, PALETTE_PREFIX},
        NarcArchive,
    },
    cursor::{ByteCursor, ByteReader},
    error::{Result, RomError},
    image::{RomDiagnostics, RomImage},
    layout::{ExecutableRegion, FileSlot, OffsetTable, PlatformLayout},
    relocation::{ExecutableRelocator, RelocationOutcome},
};

use std::path::PathBuf;
use tracing::{debug, info};

/// Builder for [`RomImage`] sessions
///
/// # Examples
///
/// ```rust
/// use rompatch_rs::RomBuilder;
///
/// let rom = RomBuilder::new()
///     .bytes(vec![0xFF; 1024])
///     .free_space_byte(0xFF)
///     .build()
///     .unwrap();
/// assert_eq!(rom.len(), 1024);
/// ```
pub struct RomBuilder {
    image_path: Option<PathBuf>,
    bytes: Option<Vec<u8>>,
    layout: Option<PlatformLayout>,
    layout_path: Option<PathBuf>,
    free_space_byte: Option<u8>,
    executable_from_header: bool,
}

impl RomBuilder {
    /// Create a new RomBuilder with default settings
    pub fn new() -> Self {
        RomBuilder {
            image_path: None,
            bytes: None,
            layout: None,
            layout_path: None,
            free_space_byte: None,
            executable_from_header: false,
        }
    }

    /// Load the image from a file
    pub fn image_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.image_path = Some(path.into());
        self
    }

    /// Use an in-memory image
    pub fn bytes(mut self, bytes: Vec<u8>) -> Self {
        self.bytes = Some(bytes);
        self
    }

    pub fn layout(mut self, layout: PlatformLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Read the layout from a TOML file
    pub fn layout_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.layout_path = Some(path.into());
        self
    }

    /// Override the layout's sentinel byte
    pub fn free_space_byte(mut self, byte: u8) -> Self {
        self.free_space_byte = Some(byte);
        self
    }

    /// Take the executable region from the DS cartridge header when the
    /// layout does not name one, and track the header's image offsets when
    /// the layout lists none
    pub fn executable_from_header(mut self) -> Self {
        self.executable_from_header = true;
        self
    }

    /// Build the RomImage session
    pub fn build(self) -> Result<RomImage> {
        let mut layout = match (self.layout, self.layout_path) {
            (Some(layout), _) => layout,
            (None, Some(path)) => PlatformLayout::load(path)?,
            (None, None) => PlatformLayout::default(),
        };
        if let Some(byte) = self.free_space_byte {
            layout.free_space_byte = byte;
        }

        let (data, source) = match (self.bytes, self.image_path) {
            (Some(bytes), _) => (bytes, None),
            (None, Some(path)) => {
                let data = std::fs::read(&path)?;
                info!("Loaded image {:?} ({} bytes)", path, data.len());
                (data, Some(path))
            }
            (None, None) => {
                return Err(RomError::Config(
                    "either an image path or image bytes must be set".to_string(),
                ))
            }
        };

        if self.executable_from_header && layout.executable.is_none() {
            let exe = ExecutableRegion::from_nds_header(&data)?;
            debug!(
                "Executable from header: {:#x}+{:#x} loaded at {:#x}",
                exe.offset, exe.length, exe.load_address
            );
            layout.executable = Some(exe);
        }
        if self.executable_from_header
            && layout.offset_fields.is_empty()
            && layout.offset_tables.is_empty()
        {
            layout = layout.with_nds_offsets();
        }

        let image = RomImage::from_bytes(data, layout)?;
        Ok(match source {
            Some(path) => image.with_source(path),
            None => image,
        })
    }
}

impl Default for RomBuilder {
    fn default() -> Self {
        Self::new()
    }
}
