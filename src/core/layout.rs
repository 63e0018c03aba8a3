//! Platform layout configuration
//!
//! Describes where things live inside a particular image: the sentinel byte
//! that marks unused space, the boot executable region, and the named file
//! slots that hold archive containers. Layouts are plain data and can be
//! written by hand in TOML:
//!
//! ```toml
//! free_space_byte = 0xFF
//! free_space_start = 0x100000
//! offset_fields = [0x30, 0x40, 0x48]
//!
//! [[offset_tables]]
//! offset_field = 0x48
//! length_field = 0x4C
//!
//! [executable]
//! offset = 0x4000
//! length = 0xBC000
//! load_address = 0x2000000
//! size_field = 0x2C
//! tcm_anchor = "00000000 FFFF0000"
//!
//! [slots.pokemon_graphics]
//! offset = 0x3A0000
//! length = 0x8C000
//! ```

use crate::cursor::ByteCursor;
use crate::error::{RomError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Main RAM address the boot executable is loaded to
pub const DEFAULT_LOAD_ADDRESS: u32 = 0x0200_0000;

/// Sentinel most cartridge images use for unused space
pub const DEFAULT_FREE_SPACE_BYTE: u8 = 0xFF;

/// Header fields describing the boot executable (ARM9) in a DS image
pub const NDS_ARM9_ROM_OFFSET: usize = 0x20;
pub const NDS_ARM9_RAM_ADDRESS: usize = 0x28;
pub const NDS_ARM9_SIZE: usize = 0x2C;

/// DS header fields holding absolute image offsets: ARM7 code, file name
/// table, file allocation table, both overlay tables, icon/banner, and the
/// used image size
pub const NDS_OFFSET_FIELDS: [usize; 7] = [0x30, 0x40, 0x48, 0x50, 0x58, 0x68, 0x80];

/// DS file allocation table: offset and byte length fields in the header
pub const NDS_FILE_TABLE: OffsetTable = OffsetTable {
    offset_field: 0x48,
    length_field: 0x4C,
};

fn default_free_space_byte() -> u8 {
    DEFAULT_FREE_SPACE_BYTE
}

fn default_load_address() -> u32 {
    DEFAULT_LOAD_ADDRESS
}

/// A named byte range holding one archive container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSlot {
    pub offset: usize,
    pub length: usize,
}

impl FileSlot {
    pub fn new(offset: usize, length: usize) -> Self {
        FileSlot { offset, length }
    }

    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}

/// Table of (start, end) u32 image offsets, such as a file allocation table
///
/// Both fields are image offsets of u32 header words: the first holds the
/// table position, the second its length in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetTable {
    pub offset_field: usize,
    pub length_field: usize,
}

/// The boot executable embedded in the image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutableRegion {
    /// Image offset of the first executable byte
    pub offset: usize,

    /// Executable length in bytes
    pub length: usize,

    /// Address the executable is loaded to; pointers inside it are absolute
    #[serde(default = "default_load_address")]
    pub load_address: u32,

    /// Image offset of a u32 header field holding the executable length
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_field: Option<usize>,

    /// Hex signature located right before the TCM pointer table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcm_anchor: Option<String>,
}

impl ExecutableRegion {
    pub fn new(offset: usize, length: usize) -> Self {
        ExecutableRegion {
            offset,
            length,
            load_address: DEFAULT_LOAD_ADDRESS,
            size_field: None,
            tcm_anchor: None,
        }
    }

    /// Read the ARM9 placement from a DS cartridge header
    pub fn from_nds_header(header: &[u8]) -> Result<Self> {
        let offset = header.read_u32_le(NDS_ARM9_ROM_OFFSET)? as usize;
        let load_address = header.read_u32_le(NDS_ARM9_RAM_ADDRESS)?;
        let length = header.read_u32_le(NDS_ARM9_SIZE)? as usize;

        Ok(ExecutableRegion {
            offset,
            length,
            load_address,
            size_field: Some(NDS_ARM9_SIZE),
            tcm_anchor: None,
        })
    }

    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    /// Decode the configured anchor signature, if any
    ///
    /// Whitespace between hex digits is ignored.
    pub fn anchor(&self) -> Result<Option<Vec<u8>>> {
        let Some(text) = &self.tcm_anchor else {
            return Ok(None);
        };
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = hex::decode(&compact)
            .map_err(|e| RomError::Config(format!("tcm_anchor is not valid hex: {}", e)))?;
        if bytes.is_empty() {
            return Err(RomError::Config("tcm_anchor is empty".to_string()));
        }
        Ok(Some(bytes))
    }
}

/// Where everything lives inside one image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformLayout {
    /// Byte value that marks unused space
    #[serde(default = "default_free_space_byte")]
    pub free_space_byte: u8,

    /// Default scan start for new allocations
    #[serde(default)]
    pub free_space_start: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<ExecutableRegion>,

    /// Archive file slots by name
    #[serde(default)]
    pub slots: BTreeMap<String, FileSlot>,

    /// Image offsets of u32 fields that hold absolute image offsets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub offset_fields: Vec<usize>,

    /// Tables of absolute (start, end) image offsets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub offset_tables: Vec<OffsetTable>,
}

impl Default for PlatformLayout {
    fn default() -> Self {
        Self::new(DEFAULT_FREE_SPACE_BYTE)
    }
}

impl PlatformLayout {
    pub fn new(free_space_byte: u8) -> Self {
        PlatformLayout {
            free_space_byte,
            free_space_start: 0,
            executable: None,
            slots: BTreeMap::new(),
            offset_fields: Vec::new(),
            offset_tables: Vec::new(),
        }
    }

    pub fn with_slot(mut self, name: impl Into<String>, slot: FileSlot) -> Self {
        self.slots.insert(name.into(), slot);
        self
    }

    pub fn with_executable(mut self, executable: ExecutableRegion) -> Self {
        self.executable = Some(executable);
        self
    }

    pub fn with_free_space_start(mut self, start: usize) -> Self {
        self.free_space_start = start;
        self
    }

    pub fn with_offset_field(mut self, field: usize) -> Self {
        self.offset_fields.push(field);
        self
    }

    pub fn with_offset_table(mut self, table: OffsetTable) -> Self {
        self.offset_tables.push(table);
        self
    }

    /// Track the DS header's image offsets and file allocation table
    pub fn with_nds_offsets(mut self) -> Self {
        self.offset_fields.extend_from_slice(&NDS_OFFSET_FIELDS);
        self.offset_tables.push(NDS_FILE_TABLE);
        self
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let layout: PlatformLayout = toml::from_str(text)?;
        Ok(layout)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        debug!("Loading platform layout from {:?}", path.as_ref());
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| RomError::Config(e.to_string()))
    }

    /// Look up a file slot by name
    pub fn slot(&self, name: &str) -> Result<FileSlot> {
        self.slots
            .get(name)
            .copied()
            .ok_or_else(|| RomError::UnknownSlot(name.to_string()))
    }

    /// Check that every region fits an image of `image_len` bytes
    ///
    /// Slots may not overlap each other or the executable.
    pub fn validate(&self, image_len: usize) -> Result<()> {
        let within = |offset: usize, length: usize| {
            offset
                .checked_add(length)
                .is_some_and(|end| end <= image_len)
        };

        if let Some(exe) = &self.executable {
            if !within(exe.offset, exe.length) {
                return Err(RomError::InvalidLayout(format!(
                    "executable {:#x}+{:#x} exceeds image size {:#x}",
                    exe.offset, exe.length, image_len
                )));
            }
            if let Some(field) = exe.size_field {
                if !within(field, 4) {
                    return Err(RomError::InvalidLayout(format!(
                        "executable size field {:#x} outside image",
                        field
                    )));
                }
            }
            exe.anchor()?;
        }

        let table_fields = self
            .offset_tables
            .iter()
            .flat_map(|table| [table.offset_field, table.length_field]);
        for field in self.offset_fields.iter().copied().chain(table_fields) {
            if !within(field, 4) {
                return Err(RomError::InvalidLayout(format!(
                    "offset field {:#x} outside image",
                    field
                )));
            }
            if let Some(exe) = &self.executable {
                if field < exe.end() && exe.offset < field + 4 {
                    return Err(RomError::InvalidLayout(format!(
                        "offset field {:#x} lies inside the executable",
                        field
                    )));
                }
            }
        }

        let mut sorted: Vec<(&String, &FileSlot)> = self.slots.iter().collect();
        sorted.sort_by_key(|(_, slot)| slot.offset);

        for (name, slot) in &sorted {
            if !within(slot.offset, slot.length) {
                return Err(RomError::InvalidLayout(format!(
                    "slot '{}' {:#x}+{:#x} exceeds image size {:#x}",
                    name, slot.offset, slot.length, image_len
                )));
            }
            if let Some(exe) = &self.executable {
                if slot.offset < exe.end() && exe.offset < slot.end() {
                    return Err(RomError::InvalidLayout(format!(
                        "slot '{}' overlaps the executable",
                        name
                    )));
                }
            }
        }

        for pair in sorted.windows(2) {
            let (first, a) = pair[0];
            let (second, b) = pair[1];
            if a.end() > b.offset && a.length > 0 && b.length > 0 {
                return Err(RomError::InvalidLayout(format!(
                    "slots '{}' and '{}' overlap",
                    first, second
                )));
            }
        }

        Ok(())
    }
}
