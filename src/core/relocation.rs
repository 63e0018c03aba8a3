//! One-shot growth of the ITCM copy region in the boot executable
//!
//! Near the end of the ARM9 executable sit the sections copied into ITCM and
//! DTCM at boot, followed by their destination table. Anything appended after
//! them gets overwritten once the game runs, so new code has to go into the
//! ITCM section itself. Growing that section shifts everything after it.
//!
//! The SDK keeps a small pointer table right after a recognisable signature:
//!
//! ```text
//! anchor end + 0x0  destination table address   ({start, size} per TCM)
//! anchor end + 0x4  executable end address
//! anchor end + 0x8  ITCM copy source address
//! ```
//!
//! All three, plus the ITCM size in the destination table, are absolute
//! addresses relative to the executable's load address.

use crate::cursor::ByteCursor;
use crate::error::{RomError, Result};
use memchr::memmem;
use tracing::{debug, info, warn};

/// Pointer table fields, relative to the end of the anchor
pub const DEST_TABLE_POINTER: usize = 0x0;
pub const EXECUTABLE_END_POINTER: usize = 0x4;
pub const ITCM_SOURCE_POINTER: usize = 0x8;

/// ITCM size inside the destination table
pub const ITCM_SIZE_FIELD: usize = 0x4;

/// Bytes of the destination table entry read for ITCM
const DEST_TABLE_ENTRY_SIZE: usize = 0x8;

/// Bytes of the pointer table after the anchor
const POINTER_TABLE_SIZE: usize = 0xC;

/// What a successful relocation changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationOutcome {
    /// Executable offset of the inserted zero-filled gap
    pub gap_offset: usize,
    pub gap_length: usize,
    /// Pointer table offset (after relocation)
    pub pointer_table: usize,
    /// ITCM size after growth
    pub itcm_size: u32,
}

/// Pointer table values resolved to executable offsets
#[derive(Debug, Clone, Copy)]
struct PointerTable {
    offset: usize,
    dest_table: usize,
    executable_end: u32,
    itcm_source: usize,
    itcm_size: u32,
}

/// Grows the ITCM section of one executable, at most once
#[derive(Debug, Clone, Default)]
pub struct ExecutableRelocator {
    extended: bool,
}

impl ExecutableRelocator {
    pub fn new() -> Self {
        ExecutableRelocator { extended: false }
    }

    /// True once a relocation has been applied
    pub fn is_extended(&self) -> bool {
        self.extended
    }

    /// Grow the ITCM section by `delta` bytes
    ///
    /// On success the buffer is replaced by one `delta` bytes longer. If this
    /// relocator already extended an executable, or `delta` is zero, the
    /// buffer is left untouched and `Ok(None)` is returned. On error the buffer
    /// is also left untouched.
    pub fn extend(
        &mut self,
        executable: &mut Vec<u8>,
        delta: usize,
        anchor: &[u8],
        base_address: u32,
    ) -> Result<Option<RelocationOutcome>> {
        if self.extended {
            warn!("Executable already extended; ignoring request for {} more bytes", delta);
            return Ok(None);
        }
        if delta == 0 {
            return Ok(None);
        }

        let table = read_pointer_table(executable, anchor, base_address)?;
        let delta_u32 = u32::try_from(delta).map_err(|_| RomError::InvalidLength(delta))?;

        let split = table.itcm_source + table.itcm_size as usize;
        if split > executable.len() {
            return Err(RomError::InvalidPointer {
                field: "itcm_size",
                value: table.itcm_size,
            });
        }
        // Fields read as a unit must move together
        if table.offset < split && table.offset + POINTER_TABLE_SIZE > split {
            return Err(RomError::InvalidPointer {
                field: "pointer_table",
                value: base_address.wrapping_add(table.offset as u32),
            });
        }
        if table.dest_table < split && table.dest_table + DEST_TABLE_ENTRY_SIZE > split {
            return Err(RomError::InvalidPointer {
                field: "dest_table",
                value: base_address.wrapping_add(table.dest_table as u32),
            });
        }
        let shifted = |offset: usize| if offset >= split { offset + delta } else { offset };

        debug!(
            "ITCM section {:#x}+{:#x}, shifting {:#x} bytes from {:#x}",
            table.itcm_source,
            table.itcm_size,
            executable.len() - split,
            split
        );

        let mut grown = Vec::with_capacity(executable.len() + delta);
        grown.extend_from_slice(&executable[..split]);
        grown.resize(split + delta, 0);
        grown.extend_from_slice(&executable[split..]);

        let new_dest_table = shifted(table.dest_table);
        let dest_address = u32::try_from(new_dest_table)
            .ok()
            .and_then(|offset| offset.checked_add(base_address))
            .ok_or(RomError::InvalidPointer {
                field: "dest_table",
                value: table.dest_table as u32,
            })?;
        let new_end = table
            .executable_end
            .checked_add(delta_u32)
            .ok_or(RomError::InvalidPointer {
                field: "executable_end",
                value: table.executable_end,
            })?;
        let new_itcm_size = table
            .itcm_size
            .checked_add(delta_u32)
            .ok_or(RomError::InvalidPointer {
                field: "itcm_size",
                value: table.itcm_size,
            })?;

        let pointer_table = shifted(table.offset);
        grown.write_u32_le(pointer_table + DEST_TABLE_POINTER, dest_address)?;
        grown.write_u32_le(pointer_table + EXECUTABLE_END_POINTER, new_end)?;
        grown.write_u32_le(new_dest_table + ITCM_SIZE_FIELD, new_itcm_size)?;

        *executable = grown;
        self.extended = true;

        info!(
            "Extended ITCM section by {} bytes (size {:#x} -> {:#x})",
            delta, table.itcm_size, new_itcm_size
        );
        Ok(Some(RelocationOutcome {
            gap_offset: split,
            gap_length: delta,
            pointer_table,
            itcm_size: new_itcm_size,
        }))
    }
}

/// Find the single occurrence of `anchor` and return the offset just past it
pub fn locate_anchor(executable: &[u8], anchor: &[u8]) -> Result<usize> {
    if anchor.is_empty() {
        return Err(RomError::Config("relocation anchor is empty".to_string()));
    }

    let mut matches = memmem::find_iter(executable, anchor);
    let first = matches.next().ok_or(RomError::AnchorNotFound)?;
    let extra = matches.count();
    if extra > 0 {
        return Err(RomError::AmbiguousAnchor { count: extra + 1 });
    }
    Ok(first + anchor.len())
}

fn read_pointer_table(executable: &[u8], anchor: &[u8], base_address: u32) -> Result<PointerTable> {
    let offset = locate_anchor(executable, anchor)?;
    let len = executable.len();

    let to_offset = |field: &'static str, value: u32, extent: usize| -> Result<usize> {
        value
            .checked_sub(base_address)
            .map(|relative| relative as usize)
            .filter(|&relative| relative + extent <= len)
            .ok_or(RomError::InvalidPointer { field, value })
    };

    let dest_table = to_offset(
        "dest_table",
        executable.read_u32_le(offset + DEST_TABLE_POINTER)?,
        DEST_TABLE_ENTRY_SIZE,
    )?;
    let executable_end = executable.read_u32_le(offset + EXECUTABLE_END_POINTER)?;
    let itcm_source = to_offset(
        "itcm_source",
        executable.read_u32_le(offset + ITCM_SOURCE_POINTER)?,
        0,
    )?;
    let itcm_size = executable.read_u32_le(dest_table + ITCM_SIZE_FIELD)?;

    Ok(PointerTable {
        offset,
        dest_table,
        executable_end,
        itcm_source,
        itcm_size,
    })
}
