//! Little-endian integer access over byte buffers
//!
//! Every multi-byte field in the image (archive headers, pointer tables,
//! size fields) goes through [`ByteCursor`], so bounds and byte order are
//! checked in one place. Sequential parsing uses [`ByteReader`].

use crate::error::{RomError, Result};

/// Fixed-width little-endian reads and writes at an absolute offset
pub trait ByteCursor {
    fn read_u8(&self, offset: usize) -> Result<u8>;
    fn read_u16_le(&self, offset: usize) -> Result<u16>;
    fn read_u24_le(&self, offset: usize) -> Result<u32>;
    fn read_u32_le(&self, offset: usize) -> Result<u32>;

    fn write_u8(&mut self, offset: usize, value: u8) -> Result<()>;
    fn write_u16_le(&mut self, offset: usize, value: u16) -> Result<()>;
    fn write_u24_le(&mut self, offset: usize, value: u32) -> Result<()>;
    fn write_u32_le(&mut self, offset: usize, value: u32) -> Result<()>;

    /// Read a pointer stored relative to the end of its own field
    fn read_relative_pointer(&self, offset: usize) -> Result<usize>;

    /// Store `target` relative to the end of the field at `offset`
    fn write_relative_pointer(&mut self, offset: usize, target: usize) -> Result<()>;

    /// True if `needle` occurs at `offset`; false when it would run past the end
    fn matches_at(&self, offset: usize, needle: &[u8]) -> bool;

    /// Unpack one byte into eight flags, least significant bit first
    fn read_flags(&self, offset: usize) -> Result<[bool; 8]>;

    /// Pack up to eight flags into one byte, least significant bit first
    fn write_flags(&mut self, offset: usize, flags: &[bool]) -> Result<()>;
}

fn check(size: usize, offset: usize, length: usize) -> Result<()> {
    match offset.checked_add(length) {
        Some(end) if end <= size => Ok(()),
        _ => Err(RomError::OutOfBounds {
            offset,
            length,
            size,
        }),
    }
}

impl ByteCursor for [u8] {
    fn read_u8(&self, offset: usize) -> Result<u8> {
        check(self.len(), offset, 1)?;
        Ok(self[offset])
    }

    fn read_u16_le(&self, offset: usize) -> Result<u16> {
        check(self.len(), offset, 2)?;
        Ok(u16::from_le_bytes([self[offset], self[offset + 1]]))
    }

    fn read_u24_le(&self, offset: usize) -> Result<u32> {
        check(self.len(), offset, 3)?;
        Ok(u32::from_le_bytes([
            self[offset],
            self[offset + 1],
            self[offset + 2],
            0,
        ]))
    }

    fn read_u32_le(&self, offset: usize) -> Result<u32> {
        check(self.len(), offset, 4)?;
        Ok(u32::from_le_bytes([
            self[offset],
            self[offset + 1],
            self[offset + 2],
            self[offset + 3],
        ]))
    }

    fn write_u8(&mut self, offset: usize, value: u8) -> Result<()> {
        check(self.len(), offset, 1)?;
        self[offset] = value;
        Ok(())
    }

    fn write_u16_le(&mut self, offset: usize, value: u16) -> Result<()> {
        check(self.len(), offset, 2)?;
        self[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn write_u24_le(&mut self, offset: usize, value: u32) -> Result<()> {
        check(self.len(), offset, 3)?;
        self[offset..offset + 3].copy_from_slice(&value.to_le_bytes()[..3]);
        Ok(())
    }

    fn write_u32_le(&mut self, offset: usize, value: u32) -> Result<()> {
        check(self.len(), offset, 4)?;
        self[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn read_relative_pointer(&self, offset: usize) -> Result<usize> {
        let relative = self.read_u32_le(offset)? as i32 as i64;
        let target = relative + offset as i64 + 4;
        usize::try_from(target).map_err(|_| RomError::OutOfBounds {
            offset,
            length: 4,
            size: self.len(),
        })
    }

    fn write_relative_pointer(&mut self, offset: usize, target: usize) -> Result<()> {
        let relative = target as i64 - (offset as i64 + 4);
        self.write_u32_le(offset, relative as i32 as u32)
    }

    fn matches_at(&self, offset: usize, needle: &[u8]) -> bool {
        match offset.checked_add(needle.len()) {
            Some(end) if end <= self.len() => &self[offset..end] == needle,
            _ => false,
        }
    }

    fn read_flags(&self, offset: usize) -> Result<[bool; 8]> {
        let byte = self.read_u8(offset)?;
        let mut flags = [false; 8];
        for (bit, flag) in flags.iter_mut().enumerate() {
            *flag = (byte >> bit) & 1 == 1;
        }
        Ok(flags)
    }

    fn write_flags(&mut self, offset: usize, flags: &[bool]) -> Result<()> {
        let byte = flags
            .iter()
            .take(8)
            .enumerate()
            .fold(0u8, |acc, (bit, &set)| acc | ((set as u8) << bit));
        self.write_u8(offset, byte)
    }
}

/// Sequential little-endian reader with position tracking
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ByteReader { data, position: 0 }
    }

    pub fn at(data: &'a [u8], position: usize) -> Self {
        ByteReader { data, position }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    pub fn u8(&mut self) -> Result<u8> {
        let value = self.data.read_u8(self.position)?;
        self.position += 1;
        Ok(value)
    }

    pub fn u16(&mut self) -> Result<u16> {
        let value = self.data.read_u16_le(self.position)?;
        self.position += 2;
        Ok(value)
    }

    pub fn u32(&mut self) -> Result<u32> {
        let value = self.data.read_u32_le(self.position)?;
        self.position += 4;
        Ok(value)
    }

    /// Borrow the next `length` bytes and advance past them
    pub fn take(&mut self, length: usize) -> Result<&'a [u8]> {
        check(self.data.len(), self.position, length)?;
        let slice = &self.data[self.position..self.position + length];
        self.position += length;
        Ok(slice)
    }
}
