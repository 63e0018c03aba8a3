//! Nitro archive (NARC) container
//!
//! Packs many same-purpose records (sprites, palettes, tables) into one file
//! slot. Records are addressed by index; only payloads change after decode.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Header (16 bytes)                            │
//! │  - Magic "NARC", BOM 0xFFFE, version 0x0100  │
//! │  - Total size u32, header size u16, frames   │
//! ├──────────────────────────────────────────────┤
//! │ BTAF: record count + (start, end) per record │
//! ├──────────────────────────────────────────────┤
//! │ BTNF: optional record names                  │
//! ├──────────────────────────────────────────────┤
//! │ GMIF: payloads, each padded to 4 bytes       │
//! └──────────────────────────────────────────────┘
//! ```

pub mod palette;

use crate::cursor::{ByteCursor, ByteReader};
use crate::error::{RomError, Result};
use std::collections::HashMap;
use tracing::{debug, warn};

pub const NARC_MAGIC: [u8; 4] = *b"NARC";
pub const NARC_BOM: u16 = 0xFFFE;
pub const NARC_VERSION: u16 = 0x0100;
pub const HEADER_SIZE: usize = 0x10;
pub const FRAME_COUNT: u16 = 3;

/// Frame magics as stored on disk (byte-reversed frame names)
pub const FATB_MAGIC: [u8; 4] = *b"BTAF";
pub const FNTB_MAGIC: [u8; 4] = *b"BTNF";
pub const FIMG_MAGIC: [u8; 4] = *b"GMIF";

/// Every frame starts with magic + size
pub const FRAME_HEADER_SIZE: usize = 8;

/// Payload alignment inside GMIF
pub const RECORD_ALIGNMENT: usize = 4;

/// Filler written after each payload up to the next alignment boundary
pub const RECORD_PADDING: u8 = 0xFF;

/// First BTNF word when the archive carries no names
const FNTB_NO_NAMES: u32 = 4;

/// First BTNF word when names follow
const FNTB_NAMES: u32 = 8;

fn padded_len(length: usize) -> usize {
    (length + RECORD_ALIGNMENT - 1) / RECORD_ALIGNMENT * RECORD_ALIGNMENT
}

fn decode_error(message: impl Into<String>) -> RomError {
    RomError::Decode(message.into())
}

/// Decoded NARC archive
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NarcArchive {
    records: Vec<Vec<u8>>,
    names: Option<Vec<String>>,
}

impl NarcArchive {
    /// Build an archive from payloads, without names
    pub fn new(records: Vec<Vec<u8>>) -> Self {
        NarcArchive {
            records,
            names: None,
        }
    }

    /// Build an archive whose records carry names
    pub fn with_names(records: Vec<Vec<u8>>, names: Vec<String>) -> Result<Self> {
        if names.len() != records.len() {
            return Err(decode_error(format!(
                "{} names for {} records",
                names.len(),
                records.len()
            )));
        }
        if let Some(name) = names.iter().find(|n| n.len() > u8::MAX as usize || !n.is_ascii()) {
            return Err(decode_error(format!("record name '{}' is not short ASCII", name)));
        }
        Ok(NarcArchive {
            records,
            names: Some(names),
        })
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Alias of [`NarcArchive::len`]
    pub fn size(&self) -> usize {
        self.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_names(&self) -> bool {
        self.names.is_some()
    }

    pub fn get(&self, index: usize) -> Result<&[u8]> {
        self.records
            .get(index)
            .map(Vec::as_slice)
            .ok_or(RomError::RecordOutOfRange {
                index,
                count: self.records.len(),
            })
    }

    /// Replace a record's payload; the length may change
    pub fn set(&mut self, index: usize, payload: Vec<u8>) -> Result<()> {
        let count = self.records.len();
        let slot = self
            .records
            .get_mut(index)
            .ok_or(RomError::RecordOutOfRange { index, count })?;
        debug!(
            "Replacing record {}: {} -> {} bytes",
            index,
            slot.len(),
            payload.len()
        );
        *slot = payload;
        Ok(())
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.as_ref()?.get(index).map(String::as_str)
    }

    /// Records in index order
    pub fn records(&self) -> impl Iterator<Item = &[u8]> {
        self.records.iter().map(Vec::as_slice)
    }

    /// Decode an archive from its serialized form
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(decode_error(format!(
                "{} bytes is too short for a NARC header",
                data.len()
            )));
        }
        if !data.matches_at(0, &NARC_MAGIC) {
            return Err(decode_error("missing NARC magic"));
        }

        let frames = read_frames(data)?;
        let frame = |magic: &[u8; 4]| {
            frames.get(magic).copied().ok_or_else(|| {
                decode_error(format!(
                    "missing {} frame",
                    String::from_utf8_lossy(magic)
                ))
            })
        };
        let fatb = frame(&FATB_MAGIC)?;
        let fntb = frame(&FNTB_MAGIC)?;
        let fimg = frame(&FIMG_MAGIC)?;

        let mut table = ByteReader::new(fatb);
        let count = table
            .u32()
            .map_err(|_| decode_error("allocation table has no record count"))?
            as usize;
        if count > table.remaining() / 8 {
            return Err(decode_error(format!(
                "record count {} needs {} table bytes, only {} present",
                count,
                count.saturating_mul(8),
                table.remaining()
            )));
        }

        let mut records = Vec::with_capacity(count);
        for index in 0..count {
            let entry =
                |_: RomError| decode_error(format!("allocation entry {} is truncated", index));
            let start = table.u32().map_err(entry)? as usize;
            let end = table.u32().map_err(entry)? as usize;
            if end < start || end > fimg.len() {
                return Err(decode_error(format!(
                    "record {} spans {:#x}..{:#x} outside {:#x} image bytes",
                    index,
                    start,
                    end,
                    fimg.len()
                )));
            }
            records.push(fimg[start..end].to_vec());
        }

        let names = read_names(fntb, count)?;

        debug!("Decoded NARC with {} records", count);
        Ok(NarcArchive { records, names })
    }

    /// Serialize, recomputing every record offset from current lengths
    pub fn to_bytes(&self) -> Vec<u8> {
        let image_len: usize = self.records.iter().map(|r| padded_len(r.len())).sum();

        let fatb_len = FRAME_HEADER_SIZE + 4 + self.records.len() * 8;
        let fntb = self.names_frame();
        let fimg_len = FRAME_HEADER_SIZE + image_len;
        let total = HEADER_SIZE + fatb_len + fntb.len() + fimg_len;

        let mut out = Vec::with_capacity(total);

        // Header
        out.extend_from_slice(&NARC_MAGIC);
        out.extend_from_slice(&NARC_BOM.to_le_bytes());
        out.extend_from_slice(&NARC_VERSION.to_le_bytes());
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&(HEADER_SIZE as u16).to_le_bytes());
        out.extend_from_slice(&FRAME_COUNT.to_le_bytes());

        // Allocation table
        out.extend_from_slice(&FATB_MAGIC);
        out.extend_from_slice(&(fatb_len as u32).to_le_bytes());
        out.extend_from_slice(&(self.records.len() as u32).to_le_bytes());
        let mut offset = 0usize;
        for record in &self.records {
            out.extend_from_slice(&(offset as u32).to_le_bytes());
            out.extend_from_slice(&((offset + record.len()) as u32).to_le_bytes());
            offset += padded_len(record.len());
        }

        out.extend_from_slice(&fntb);

        // Payloads
        out.extend_from_slice(&FIMG_MAGIC);
        out.extend_from_slice(&(fimg_len as u32).to_le_bytes());
        for record in &self.records {
            out.extend_from_slice(record);
            out.resize(out.len() + padded_len(record.len()) - record.len(), RECORD_PADDING);
        }

        debug_assert_eq!(out.len(), total);
        out
    }

    fn names_frame(&self) -> Vec<u8> {
        let mut body = Vec::new();
        match &self.names {
            None => {
                body.extend_from_slice(&FNTB_NO_NAMES.to_le_bytes());
                body.extend_from_slice(&0u16.to_le_bytes());
                body.extend_from_slice(&1u16.to_le_bytes());
            }
            Some(names) => {
                body.extend_from_slice(&FNTB_NAMES.to_le_bytes());
                body.extend_from_slice(&0x0001_0000u32.to_le_bytes());
                for name in names {
                    body.push(name.len() as u8);
                    body.extend_from_slice(name.as_bytes());
                }
                // Terminator, then pad the frame to 4 bytes
                body.push(0);
                body.resize(padded_len(body.len()), 0);
            }
        }

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
        frame.extend_from_slice(&FNTB_MAGIC);
        frame.extend_from_slice(&((FRAME_HEADER_SIZE + body.len()) as u32).to_le_bytes());
        frame.extend_from_slice(&body);
        frame
    }
}

/// Split the archive into frame bodies keyed by on-disk magic
fn read_frames(data: &[u8]) -> Result<HashMap<[u8; 4], &[u8]>> {
    let frame_count = data.read_u16_le(0x0E)? as usize;
    let mut frames = HashMap::with_capacity(frame_count);
    let mut offset = data.read_u16_le(0x0C)? as usize;

    for index in 0..frame_count {
        let header = data.get(offset..offset + FRAME_HEADER_SIZE).ok_or_else(|| {
            decode_error(format!("frame {} header at {:#x} is truncated", index, offset))
        })?;
        let magic = [header[0], header[1], header[2], header[3]];
        let mut size = header.read_u32_le(4)? as usize;

        // Expanded archives from some tools never update the last frame size
        if index == frame_count - 1 && offset + size < data.len() {
            warn!(
                "Last NARC frame declares {:#x} bytes, extending to data end",
                size
            );
            size = data.len() - offset;
        }

        if size < FRAME_HEADER_SIZE || offset + size > data.len() {
            return Err(decode_error(format!(
                "frame {} at {:#x} declares invalid size {:#x}",
                index, offset, size
            )));
        }

        frames.insert(magic, &data[offset + FRAME_HEADER_SIZE..offset + size]);
        offset += size;
    }

    Ok(frames)
}

fn read_names(fntb: &[u8], count: usize) -> Result<Option<Vec<String>>> {
    let kind = fntb
        .read_u32_le(0)
        .map_err(|_| decode_error("name table frame is empty"))?;
    if kind != FNTB_NAMES {
        return Ok(None);
    }

    let mut reader = ByteReader::at(fntb, 8);
    let mut names = Vec::with_capacity(count);
    for index in 0..count {
        let truncated =
            |_: RomError| decode_error(format!("name of record {} is truncated", index));
        let length = reader.u8().map_err(truncated)? as usize;
        let raw = reader.take(length).map_err(truncated)?;
        let name = std::str::from_utf8(raw)
            .ok()
            .filter(|s| s.is_ascii())
            .ok_or_else(|| decode_error(format!("record {} has a non-ASCII name", index)))?;
        names.push(name.to_string());
    }
    Ok(Some(names))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_archive_golden() {
        let bytes = NarcArchive::new(Vec::new()).to_bytes();
        let expected: Vec<u8> = [
            // NARC header
            b"NARC".as_slice(),
            &[0xFE, 0xFF, 0x00, 0x01],
            &[0x34, 0x00, 0x00, 0x00],
            &[0x10, 0x00, 0x03, 0x00],
            // BTAF: 12 bytes, no records
            b"BTAF",
            &[0x0C, 0x00, 0x00, 0x00],
            &[0x00, 0x00, 0x00, 0x00],
            // BTNF: default frame
            b"BTNF",
            &[0x10, 0x00, 0x00, 0x00],
            &[0x04, 0x00, 0x00, 0x00],
            &[0x00, 0x00, 0x01, 0x00],
            // GMIF: empty
            b"GMIF",
            &[0x08, 0x00, 0x00, 0x00],
        ]
        .concat();
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_records_are_padded() {
        let narc = NarcArchive::new(vec![vec![1, 2, 3], vec![4, 5, 6, 7, 8]]);
        let bytes = narc.to_bytes();

        // BTAF entries: (0,3) and (4,9)
        let fatb = HEADER_SIZE;
        assert_eq!(bytes.read_u32_le(fatb + 8).unwrap(), 2);
        assert_eq!(bytes.read_u32_le(fatb + 12).unwrap(), 0);
        assert_eq!(bytes.read_u32_le(fatb + 16).unwrap(), 3);
        assert_eq!(bytes.read_u32_le(fatb + 20).unwrap(), 4);
        assert_eq!(bytes.read_u32_le(fatb + 24).unwrap(), 9);

        // GMIF is the tail: 8 header + 4 + 8 padded payload bytes
        let fimg = &bytes[bytes.len() - 20..];
        assert_eq!(&fimg[..4], b"GMIF");
        assert_eq!(&fimg[8..12], &[1, 2, 3, 0xFF]);
        assert_eq!(&fimg[12..20], &[4, 5, 6, 7, 8, 0xFF, 0xFF, 0xFF]);
        assert_eq!(bytes.read_u32_le(8).unwrap() as usize, bytes.len());
    }

    #[test]
    fn test_decode_round_trip() {
        let narc = NarcArchive::new(vec![vec![0xAA; 4], Vec::new(), (0..10).collect()]);
        let decoded = NarcArchive::from_bytes(&narc.to_bytes()).unwrap();
        assert_eq!(decoded, narc);
        assert!(!decoded.has_names());
    }

    #[test]
    fn test_set_changes_length() {
        let mut narc = NarcArchive::new(vec![vec![1; 4], Vec::new(), vec![3; 10]]);
        narc.set(1, vec![2; 6]).unwrap();

        let decoded = NarcArchive::from_bytes(&narc.to_bytes()).unwrap();
        assert_eq!(decoded.get(1).unwrap(), &[2; 6]);
        assert_eq!(decoded.get(0).unwrap(), &[1; 4]);
        assert_eq!(decoded.get(2).unwrap(), &[3; 10]);
    }

    #[test]
    fn test_index_out_of_range() {
        let mut narc = NarcArchive::new(vec![vec![0]]);
        assert!(matches!(
            narc.get(1),
            Err(RomError::RecordOutOfRange { index: 1, count: 1 })
        ));
        assert!(narc.set(5, Vec::new()).is_err());
    }

    #[test]
    fn test_names_round_trip() {
        let narc = NarcArchive::with_names(
            vec![vec![1], vec![2, 2]],
            vec!["a.bin".to_string(), "second.bin".to_string()],
        )
        .unwrap();
        let decoded = NarcArchive::from_bytes(&narc.to_bytes()).unwrap();
        assert_eq!(decoded.name(0), Some("a.bin"));
        assert_eq!(decoded.name(1), Some("second.bin"));
        assert_eq!(decoded, narc);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = NarcArchive::new(vec![vec![1]]).to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            NarcArchive::from_bytes(&bytes),
            Err(RomError::Decode(_))
        ));
    }

    #[test]
    fn test_count_inconsistent_with_table() {
        let mut bytes = NarcArchive::new(vec![vec![1], vec![2]]).to_bytes();
        // Claim 1000 records in a table sized for 2
        bytes.write_u32_le(HEADER_SIZE + 8, 1000).unwrap();
        assert!(matches!(
            NarcArchive::from_bytes(&bytes),
            Err(RomError::Decode(_))
        ));
    }

    #[test]
    fn test_record_past_image() {
        let mut bytes = NarcArchive::new(vec![vec![1, 2, 3, 4]]).to_bytes();
        bytes.write_u32_le(HEADER_SIZE + 16, 0x100).unwrap();
        assert!(matches!(
            NarcArchive::from_bytes(&bytes),
            Err(RomError::Decode(_))
        ));
    }

    #[test]
    fn test_truncated_input() {
        let bytes = NarcArchive::new(vec![vec![1; 32]]).to_bytes();
        assert!(NarcArchive::from_bytes(&bytes[..10]).is_err());
        assert!(NarcArchive::from_bytes(&bytes[..40]).is_err());
    }

    /// Rebuild `bytes` with its BTNF body replaced
    fn with_name_table(bytes: &[u8], body: &[u8]) -> Vec<u8> {
        let fntb = HEADER_SIZE + bytes.read_u32_le(HEADER_SIZE + 4).unwrap() as usize;
        let fntb_len = bytes.read_u32_le(fntb + 4).unwrap() as usize;

        let mut out = bytes[..fntb].to_vec();
        out.extend_from_slice(&FNTB_MAGIC);
        out.extend_from_slice(&((FRAME_HEADER_SIZE + body.len()) as u32).to_le_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(&bytes[fntb + fntb_len..]);
        let total = out.len() as u32;
        out.write_u32_le(8, total).unwrap();
        out
    }

    #[test]
    fn test_empty_name_table() {
        let bytes = NarcArchive::new(vec![vec![1; 4]]).to_bytes();
        let bytes = with_name_table(&bytes, &[]);
        assert!(matches!(
            NarcArchive::from_bytes(&bytes),
            Err(RomError::Decode(_))
        ));
    }

    #[test]
    fn test_truncated_names() {
        let bytes = NarcArchive::new(vec![vec![1; 4], vec![2; 4]]).to_bytes();

        // Names claimed, but the second one runs off the frame
        let mut body = Vec::new();
        body.extend_from_slice(&FNTB_NAMES.to_le_bytes());
        body.extend_from_slice(&0x0001_0000u32.to_le_bytes());
        body.extend_from_slice(&[3, b'a', b'b', b'c', 9, b'x', b'y', b'z']);
        let bytes = with_name_table(&bytes, &body);

        assert!(matches!(
            NarcArchive::from_bytes(&bytes),
            Err(RomError::Decode(_))
        ));
    }

    #[test]
    fn test_empty_allocation_table() {
        let bytes = NarcArchive::new(Vec::new()).to_bytes();
        // Shrink BTAF to a bare frame header and drop its count word
        let mut out = bytes[..HEADER_SIZE].to_vec();
        out.extend_from_slice(&FATB_MAGIC);
        out.extend_from_slice(&(FRAME_HEADER_SIZE as u32).to_le_bytes());
        out.extend_from_slice(&bytes[HEADER_SIZE + 12..]);
        let total = out.len() as u32;
        out.write_u32_le(8, total).unwrap();

        assert!(matches!(
            NarcArchive::from_bytes(&out),
            Err(RomError::Decode(_))
        ));
    }

    #[test]
    fn test_last_frame_extends_to_end() {
        let narc = NarcArchive::new(vec![vec![7; 4]]);
        let mut bytes = narc.to_bytes();
        // An expanded archive: extra payload bytes appended, GMIF size stale
        bytes.extend_from_slice(&[9; 8]);
        let decoded = NarcArchive::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.get(0).unwrap(), &[7; 4]);
    }
}
