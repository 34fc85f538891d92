use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};

use super::*;
use crate::{Error, Result};

impl Block {
    /// Zero-filled block with index
    pub fn empty(index: u32, block_size: u32) -> Self {
        Self {
            index,
            data: vec![0; block_size as usize],
        }
    }

    /// Overwrite bytes starting at `position`, keeping the rest of the block.
    /// Writes that would run into the next block are rejected
    pub fn write_bytes(&mut self, position: usize, data: &[u8]) -> Result<()> {
        if position + data.len() > self.data.len() {
            return Err(Error::InvalidArgument("write crosses block boundary"));
        }
        self.data[position..position + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Read block from device. A short image is treated as zero-filled
    pub fn load<D: Read + Seek + ?Sized>(
        device: &mut D,
        superblock: &Superblock,
        index: u32,
    ) -> Result<Self> {
        let position = superblock.block_position(index)?;
        device.seek(SeekFrom::Start(position))?;
        let mut block = Self::empty(index, superblock.block_size);
        let mut filled = 0;
        while filled < block.data.len() {
            match device.read(&mut block.data[filled..]) {
                Ok(0) => break,
                Ok(read) => filled += read,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(block)
    }

    /// Write whole block to device
    pub fn flush<D: Write + Seek + ?Sized>(
        &self,
        device: &mut D,
        superblock: &Superblock,
    ) -> Result<()> {
        if self.data.len() != superblock.block_size as usize {
            return Err(Error::CorruptState("block buffer has wrong size"));
        }
        let position = superblock.block_position(self.index)?;
        device.seek(SeekFrom::Start(position))?;
        device.write_all(&self.data)?;
        Ok(())
    }

    /// Interpret block contents as an array of little-endian block pointers
    pub fn pointers(&self) -> Vec<u32> {
        self.data
            .chunks_exact(4)
            .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
            .collect()
    }

    pub fn set_pointer(&mut self, slot: usize, pointer: u32) -> Result<()> {
        self.write_bytes(slot * 4, &pointer.to_le_bytes())
    }
}

impl std::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "block {}", self.index)?;
        for (row, chunk) in self.data.chunks(16).enumerate() {
            write!(f, "{:06x} ", row * 16)?;
            for byte in chunk {
                write!(f, " {byte:02x}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
