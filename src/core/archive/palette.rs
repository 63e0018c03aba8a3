//! Palette records stored inside an archive
//!
//! Each record is a fixed 40-byte NCLR header followed by raw BGR555 colours.
//! The header is treated as opaque: it is stripped on read and written back
//! unchanged, without checking that it matches what the record really holds.

use crate::archive::NarcArchive;
use crate::error::{RomError, Result};
use tracing::debug;

/// NCLR file header plus PLTT block header for a 16-colour palette
pub const PALETTE_PREFIX: [u8; 40] = [
    0x52, 0x4C, 0x43, 0x4E, 0xFF, 0xFE, 0x00, 0x01, // "RLCN", BOM, version
    0x48, 0x00, 0x00, 0x00, 0x10, 0x00, 0x01, 0x00, // file size, header size, blocks
    0x54, 0x54, 0x4C, 0x50, 0x38, 0x00, 0x00, 0x00, // "TTLP", block size
    0x04, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00, // depth, extended
    0x20, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, // data size, data offset
];

/// Bytes per colour entry
pub const COLOR_SIZE: usize = 2;

/// One 15-bit colour, packed as 0bBBBBBGGGGGRRRRR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color(pub u16);

impl Color {
    /// Pack 5-bit channels; higher bits of each channel are dropped
    pub fn from_rgb5(red: u8, green: u8, blue: u8) -> Self {
        Color(
            (red as u16 & 0x1F) | ((green as u16 & 0x1F) << 5) | ((blue as u16 & 0x1F) << 10),
        )
    }

    /// Quantize 8-bit channels down to 5 bits
    pub fn from_rgb8(red: u8, green: u8, blue: u8) -> Self {
        Self::from_rgb5(red >> 3, green >> 3, blue >> 3)
    }

    pub fn red(self) -> u8 {
        (self.0 & 0x1F) as u8
    }

    pub fn green(self) -> u8 {
        ((self.0 >> 5) & 0x1F) as u8
    }

    pub fn blue(self) -> u8 {
        ((self.0 >> 10) & 0x1F) as u8
    }

    /// Expand to 8-bit channels
    pub fn to_rgb8(self) -> [u8; 3] {
        [self.red() << 3, self.green() << 3, self.blue() << 3]
    }
}

/// Decoded palette colours
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Palette {
    colors: Vec<Color>,
}

impl Palette {
    pub fn new(colors: Vec<Color>) -> Self {
        Palette { colors }
    }

    /// Decode raw colour bytes; a trailing odd byte is ignored
    pub fn from_bytes(data: &[u8]) -> Self {
        let colors = data
            .chunks_exact(COLOR_SIZE)
            .map(|pair| Color(u16::from_le_bytes([pair[0], pair[1]])))
            .collect();
        Palette { colors }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.colors
            .iter()
            .flat_map(|color| color.0.to_le_bytes())
            .collect()
    }

    pub fn colors(&self) -> &[Color] {
        &self.colors
    }

    pub fn colors_mut(&mut self) -> &mut [Color] {
        &mut self.colors
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

/// Strip the prefix from record `index` and decode its colours
pub fn read_palette(archive: &NarcArchive, index: usize) -> Result<Palette> {
    let record = archive.get(index)?;
    let colors = record.get(PALETTE_PREFIX.len()..).ok_or_else(|| {
        RomError::Decode(format!(
            "palette record {} has {} bytes, shorter than its {}-byte prefix",
            index,
            record.len(),
            PALETTE_PREFIX.len()
        ))
    })?;
    Ok(Palette::from_bytes(colors))
}

/// Re-prepend the prefix and store `palette` at record `index`
pub fn write_palette(archive: &mut NarcArchive, index: usize, palette: &Palette) -> Result<()> {
    let mut record = Vec::with_capacity(PALETTE_PREFIX.len() + palette.len() * COLOR_SIZE);
    record.extend_from_slice(&PALETTE_PREFIX);
    record.extend_from_slice(&palette.to_bytes());
    debug!("Writing {} colours to palette record {}", palette.len(), index);
    archive.set(index, record)
}
