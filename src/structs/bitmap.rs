use std::fmt::Display;

use super::*;
use crate::{Error, Result};

const BITS_IN_BYTE: u32 = u8::BITS;

impl Bitmap {
    /// Bitmap with every block free
    pub fn empty(count: u32) -> Self {
        Self {
            bitfield: vec![0; (count as usize).div_ceil(BITS_IN_BYTE as usize)],
            count,
        }
    }

    /// Build from the leading bytes of the bitmap region
    pub fn from_bytes(bytes: &[u8], count: u32) -> Result<Self> {
        let length = (count as usize).div_ceil(BITS_IN_BYTE as usize);
        if bytes.len() < length {
            return Err(Error::CorruptState("bitmap region too short"));
        }
        Ok(Self {
            bitfield: bytes[..length].to_vec(),
            count,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bitfield
    }

    /// Modify occupancy
    pub fn set(&mut self, index: u32, value: bool) -> Result<()> {
        if index >= self.count {
            return Err(Error::OutOfRange);
        }
        let row = (index / BITS_IN_BYTE) as usize;
        let mask = 1u8 << (index % BITS_IN_BYTE);
        if value {
            self.bitfield[row] |= mask;
        } else {
            self.bitfield[row] &= !mask;
        }
        Ok(())
    }

    /// Get occupancy, indexes past the end read as free
    pub fn get(&self, index: u32) -> bool {
        if index >= self.count {
            return false;
        }
        let row = (index / BITS_IN_BYTE) as usize;
        let mask = 1u8 << (index % BITS_IN_BYTE);
        self.bitfield[row] & mask != 0
    }

    /// First free index at or after `start`
    pub fn next_free(&self, start: u32) -> Option<u32> {
        (start..self.count).find(|&index| !self.get(index))
    }

    pub fn occupied(&self) -> u32 {
        self.bitfield.iter().map(|byte| byte.count_ones()).sum()
    }
}

impl Display for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} of {} blocks in use", self.occupied(), self.count)?;
        for row in (0..self.count).step_by(64) {
            write!(f, "{row:6} ")?;
            for index in row..(row + 64).min(self.count) {
                write!(f, "{}", if self.get(index) { '#' } else { '.' })?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Bitmap;

    #[test]
    fn set_and_get() {
        let mut bitmap = Bitmap::empty(20);
        assert_eq!(bitmap.as_bytes().len(), 3);
        bitmap.set(0, true).unwrap();
        bitmap.set(9, true).unwrap();
        bitmap.set(19, true).unwrap();
        assert_eq!(bitmap.as_bytes(), &[0b0000_0001, 0b0000_0010, 0b0000_1000]);
        assert!(bitmap.get(9));
        assert!(!bitmap.get(8));
        bitmap.set(9, false).unwrap();
        assert!(!bitmap.get(9));
        assert_eq!(bitmap.occupied(), 2);
    }

    #[test]
    fn out_of_range() {
        let mut bitmap = Bitmap::empty(10);
        assert!(bitmap.set(10, true).is_err());
        assert!(!bitmap.get(10));
        assert!(!bitmap.get(u32::MAX));
    }

    #[test]
    fn next_free_scans_forward() {
        let mut bitmap = Bitmap::empty(12);
        for index in 0..5 {
            bitmap.set(index, true).unwrap();
        }
        bitmap.set(6, true).unwrap();
        assert_eq!(bitmap.next_free(0), Some(5));
        assert_eq!(bitmap.next_free(6), Some(7));
        for index in 7..12 {
            bitmap.set(index, true).unwrap();
        }
        assert_eq!(bitmap.next_free(6), None);
        assert_eq!(bitmap.next_free(20), None);
    }

    #[test]
    fn from_bytes_ignores_padding() {
        let bitmap = Bitmap::from_bytes(&[0xff, 0x01, 0xaa, 0xaa], 12).unwrap();
        assert_eq!(bitmap.as_bytes(), &[0xff, 0x01]);
        assert_eq!(bitmap.next_free(0), Some(9));
        assert!(Bitmap::from_bytes(&[0xff], 12).is_err());
    }
}
