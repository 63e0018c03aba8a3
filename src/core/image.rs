//! Image session
//!
//! [`RomImage`] owns the whole cartridge image from load until save. Every
//! component works on the buffer through this session: allocation, archive
//! slot rewrites and the one-time executable relocation.

use crate::allocator::claims::ClaimSet;
use crate::allocator::freed::FreedSpace;
use crate::allocator::scanner::find_unused_space;
use crate::allocator::{Alignment, SpaceAllocator};
use crate::archive::NarcArchive;
use crate::cursor::ByteCursor;
use crate::error::{RomError, Result};
use crate::layout::{FileSlot, PlatformLayout};
use crate::relocation::{ExecutableRelocator, RelocationOutcome};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Cartridge image session
pub struct RomImage {
    /// Image bytes
    data: Vec<u8>,

    /// CRC32 of the bytes as loaded
    original_crc32: u32,

    /// Sentinel, executable region and file slots
    layout: PlatformLayout,

    /// Explicitly freed ranges
    freed: FreedSpace,

    /// Ranges handed out this session
    claims: ClaimSet,

    /// One-shot ITCM growth
    relocator: ExecutableRelocator,

    /// Set by the first allocate/free; relocation is refused afterwards
    space_touched: bool,

    /// File the image was loaded from, if any
    source: Option<PathBuf>,
}

/// Snapshot of session state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RomDiagnostics {
    pub image_size: usize,
    pub original_crc32: u32,
    pub current_crc32: u32,
    pub free_ranges: usize,
    pub free_bytes: usize,
    pub claimed_bytes: usize,
    pub fragmentation: f64,
    pub executable_extended: bool,
}

impl RomDiagnostics {
    /// True if the buffer differs from what was loaded
    pub fn is_modified(&self) -> bool {
        self.original_crc32 != self.current_crc32
    }
}

impl RomImage {
    /// Start a session over an in-memory image
    pub fn from_bytes(data: Vec<u8>, layout: PlatformLayout) -> Result<Self> {
        layout.validate(data.len())?;
        let original_crc32 = crc32fast::hash(&data);
        debug!(
            "Image session over {} bytes (crc32 {:08x})",
            data.len(),
            original_crc32
        );

        Ok(RomImage {
            data,
            original_crc32,
            layout,
            freed: FreedSpace::new(),
            claims: ClaimSet::new(),
            relocator: ExecutableRelocator::new(),
            space_touched: false,
            source: None,
        })
    }

    /// Read a whole image file
    pub fn load<P: AsRef<Path>>(path: P, layout: PlatformLayout) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        info!("Loaded image {:?} ({} bytes)", path, data.len());

        Ok(Self::from_bytes(data, layout)?.with_source(path.to_path_buf()))
    }

    /// Write the whole buffer to `path`
    ///
    /// The bytes go to a sibling temporary file first and are renamed into
    /// place, so a failed save leaves an existing file untouched.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut temp_name = path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        temp_name.push(".tmp");
        let temp = path.with_file_name(temp_name);

        if let Err(err) = std::fs::write(&temp, &self.data) {
            let _ = std::fs::remove_file(&temp);
            return Err(err.into());
        }
        std::fs::rename(&temp, path)?;

        info!(
            "Saved image {:?} ({} bytes, crc32 {:08x})",
            path,
            self.data.len(),
            crc32fast::hash(&self.data)
        );
        Ok(())
    }

    pub(crate) fn with_source(mut self, path: PathBuf) -> Self {
        self.source = Some(path);
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the session, returning the image bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn layout(&self) -> &PlatformLayout {
        &self.layout
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Byte value marking unused space
    pub fn sentinel(&self) -> u8 {
        self.layout.free_space_byte
    }

    pub fn freed_space(&self) -> &FreedSpace {
        &self.freed
    }

    fn check_range(&self, offset: usize, length: usize) -> Result<()> {
        match offset.checked_add(length) {
            Some(end) if end <= self.data.len() => Ok(()),
            _ => Err(RomError::OutOfBounds {
                offset,
                length,
                size: self.data.len(),
            }),
        }
    }

    pub fn read_bytes(&self, offset: usize, length: usize) -> Result<&[u8]> {
        self.check_range(offset, length)?;
        Ok(&self.data[offset..offset + length])
    }

    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.check_range(offset, bytes.len())?;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Return a range to the free list
    ///
    /// The bytes are overwritten with the sentinel first, and any claim on
    /// them is released.
    pub fn free_space(&mut self, offset: usize, length: usize) -> Result<()> {
        if length < 1 {
            return Err(RomError::InvalidLength(length));
        }
        self.check_range(offset, length)?;

        let sentinel = self.sentinel();
        self.data[offset..offset + length].fill(sentinel);
        self.freed.free(offset, length)?;
        self.claims.release(offset, length);
        self.space_touched = true;
        Ok(())
    }

    /// Find `length` word-aligned unused bytes
    ///
    /// `search_from` only applies to the raw image scan; freed ranges are
    /// reused wherever they are.
    pub fn allocate(&mut self, length: usize, search_from: usize) -> Result<usize> {
        self.allocate_with(length, search_from, Alignment::Word)
    }

    pub fn allocate_with(
        &mut self,
        length: usize,
        search_from: usize,
        alignment: Alignment,
    ) -> Result<usize> {
        if length < 1 {
            return Err(RomError::InvalidLength(length));
        }
        self.space_touched = true;

        let sentinel = self.sentinel();
        let offset = match self.freed.allocate(&self.data, sentinel, length, alignment) {
            Some(offset) => offset,
            None => {
                let offset = find_unused_space(
                    &self.data,
                    sentinel,
                    length,
                    search_from,
                    alignment,
                    &self.claims,
                )
                .ok_or(RomError::AllocationExhausted { length })?;
                self.freed.reserve(offset, length);
                offset
            }
        };

        self.claims.claim(offset, length);
        debug!("Allocated {} bytes at {:#x}", length, offset);
        Ok(offset)
    }

    /// Allocate room for `bytes` and write them there
    pub fn allocate_and_write(&mut self, bytes: &[u8], search_from: usize) -> Result<usize> {
        let offset = self.allocate(bytes.len(), search_from)?;
        self.write_bytes(offset, bytes)?;
        Ok(offset)
    }

    /// Raw bytes of a named file slot
    pub fn read_slot(&self, name: &str) -> Result<&[u8]> {
        let slot = self.layout.slot(name)?;
        self.read_bytes(slot.offset, slot.length)
    }

    pub fn read_archive(&self, name: &str) -> Result<NarcArchive> {
        NarcArchive::from_bytes(self.read_slot(name)?)
    }

    /// Encode `archive` into the named slot
    ///
    /// Fits in place: written over the old bytes and any leftover tail is
    /// freed. Otherwise moved to newly allocated space and the old slot freed.
    /// Returns the slot's new placement, which the layout now also holds.
    pub fn write_archive(&mut self, name: &str, archive: &NarcArchive) -> Result<FileSlot> {
        let old = self.layout.slot(name)?;
        let encoded = archive.to_bytes();

        let new = if encoded.len() <= old.length {
            self.write_bytes(old.offset, &encoded)?;
            let tail = old.length - encoded.len();
            if tail > 0 {
                self.free_space(old.offset + encoded.len(), tail)?;
            }
            FileSlot::new(old.offset, encoded.len())
        } else {
            let offset = self.allocate_and_write(&encoded, self.layout.free_space_start)?;
            self.free_space(old.offset, old.length)?;
            info!(
                "Moved slot '{}' from {:#x} to {:#x} ({} -> {} bytes)",
                name,
                old.offset,
                offset,
                old.length,
                encoded.len()
            );
            FileSlot::new(offset, encoded.len())
        };

        self.layout.slots.insert(name.to_string(), new);
        Ok(new)
    }

    /// Grow the executable's ITCM section by `delta` bytes, at most once
    ///
    /// The grown executable is spliced back into the image; everything after
    /// it moves by `delta`, including file slots, the free-space start and
    /// every configured offset field or offset table entry pointing past the
    /// old executable end. The first call must come before any allocate or
    /// free; later calls are no-ops.
    pub fn relocate_executable_once(
        &mut self,
        delta: usize,
        anchor: &[u8],
        base_address: u32,
    ) -> Result<Option<RelocationOutcome>> {
        if self.relocator.is_extended() {
            debug!("Executable already extended; ignoring {} more bytes", delta);
            return Ok(None);
        }
        if delta == 0 {
            return Ok(None);
        }
        if self.space_touched {
            return Err(RomError::SessionOrder(
                "executable relocation must happen before any allocate or free".to_string(),
            ));
        }
        let mut exe = self
            .layout
            .executable
            .clone()
            .ok_or_else(|| RomError::InvalidLayout("no executable region".to_string()))?;

        let old_end = exe.end();
        let grown_length = exe
            .length
            .checked_add(delta)
            .and_then(|length| u32::try_from(length).ok())
            .ok_or(RomError::InvalidLength(delta))?;
        let rewrites = self.plan_offset_rewrites(exe.offset, old_end, delta)?;
        let mut bytes = self.data[exe.offset..old_end].to_vec();
        let Some(outcome) = self
            .relocator
            .extend(&mut bytes, delta, anchor, base_address)?
        else {
            return Ok(None);
        };

        self.data.splice(exe.offset..old_end, bytes);
        exe.length += delta;

        let shift = |offset: usize| if offset >= old_end { offset + delta } else { offset };
        if let Some(field) = exe.size_field {
            let field = shift(field);
            self.data.write_u32_le(field, grown_length)?;
            exe.size_field = Some(field);
        }
        for &(field, value) in &rewrites {
            self.data.write_u32_le(shift(field), value)?;
        }
        for slot in self.layout.slots.values_mut() {
            slot.offset = shift(slot.offset);
        }
        self.layout.free_space_start = shift(self.layout.free_space_start);
        self.layout.executable = Some(exe);

        info!(
            "Executable grown by {} bytes; image now {} bytes, {} offsets rewritten",
            delta,
            self.data.len(),
            rewrites.len()
        );
        Ok(Some(outcome))
    }

    /// Offset words pointing at or past `old_end`, with their grown values
    ///
    /// Positions are in pre-relocation coordinates. Table entries move as
    /// (start, end) pairs, decided by the start.
    fn plan_offset_rewrites(
        &self,
        exe_offset: usize,
        old_end: usize,
        delta: usize,
    ) -> Result<Vec<(usize, u32)>> {
        let delta_u32 = u32::try_from(delta).map_err(|_| RomError::InvalidLength(delta))?;
        let grow = |field: usize, value: u32| {
            value
                .checked_add(delta_u32)
                .map(|grown| (field, grown))
                .ok_or_else(|| {
                    RomError::InvalidLayout(format!(
                        "offset {:#x} at {:#x} overflows when shifted",
                        value, field
                    ))
                })
        };

        let mut rewrites = Vec::new();
        for &field in &self.layout.offset_fields {
            let value = self.data.read_u32_le(field)?;
            if value as usize >= old_end {
                rewrites.push(grow(field, value)?);
            }
        }

        for table in &self.layout.offset_tables {
            let start = self.data.read_u32_le(table.offset_field)? as usize;
            let length = self.data.read_u32_le(table.length_field)? as usize;
            self.check_range(start, length)?;
            if start < old_end && exe_offset < start + length {
                return Err(RomError::InvalidLayout(format!(
                    "offset table at {:#x} overlaps the executable",
                    start
                )));
            }

            for entry in (start..start + length / 8 * 8).step_by(8) {
                let first = self.data.read_u32_le(entry)?;
                if first as usize >= old_end {
                    let second = self.data.read_u32_le(entry + 4)?;
                    rewrites.push(grow(entry, first)?);
                    rewrites.push(grow(entry + 4, second)?);
                }
            }
        }

        debug!("{} offset words point past {:#x}", rewrites.len(), old_end);
        Ok(rewrites)
    }

    /// Relocate using the anchor and load address from the layout
    pub fn extend_executable(&mut self, delta: usize) -> Result<Option<RelocationOutcome>> {
        let exe = self
            .layout
            .executable
            .as_ref()
            .ok_or_else(|| RomError::InvalidLayout("no executable region".to_string()))?;
        let anchor = exe
            .anchor()?
            .ok_or_else(|| RomError::Config("executable has no tcm_anchor".to_string()))?;
        let base = exe.load_address;
        self.relocate_executable_once(delta, &anchor, base)
    }

    pub fn is_executable_extended(&self) -> bool {
        self.relocator.is_extended()
    }

    pub fn diagnostics(&self) -> RomDiagnostics {
        RomDiagnostics {
            image_size: self.data.len(),
            original_crc32: self.original_crc32,
            current_crc32: crc32fast::hash(&self.data),
            free_ranges: self.freed.range_count(),
            free_bytes: self.freed.free_bytes(),
            claimed_bytes: self.claims.claimed_bytes(),
            fragmentation: self.freed.fragmentation_score(),
            executable_extended: self.relocator.is_extended(),
        }
    }
}
