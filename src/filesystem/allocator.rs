use log::{debug, warn};

use super::Filesystem;
use crate::structs::{Bitmap, Block};
use crate::{Error, Result};

impl Filesystem {
    /// Cached bitmap, loading it from the bitmap region on first use
    pub(crate) fn bitmap_mut(&mut self) -> Result<&mut Bitmap> {
        let bitmap = match self.bitmap.take() {
            Some(bitmap) => bitmap,
            None => self.load_bitmap()?,
        };
        Ok(self.bitmap.insert(bitmap))
    }

    pub fn bitmap(&mut self) -> Result<&Bitmap> {
        let bitmap: &Bitmap = self.bitmap_mut()?;
        Ok(bitmap)
    }

    fn load_bitmap(&mut self) -> Result<Bitmap> {
        debug!("Load block bitmap");
        let sb = self.superblock;
        let mut bytes = Vec::with_capacity(sb.bitmap_blocks as usize * sb.block_size as usize);
        for index in sb.bitmap_start..sb.bitmap_start + sb.bitmap_blocks {
            bytes.extend(self.load_block(index)?.data);
        }
        Bitmap::from_bytes(&bytes, sb.block_count)
    }

    /// Write the cached bitmap back to its region
    fn flush_bitmap(&mut self) -> Result<()> {
        let sb = self.superblock;
        let bytes = self.bitmap_mut()?.as_bytes().to_vec();
        let mut chunks = bytes.chunks(sb.block_size as usize);
        for index in sb.bitmap_start..sb.bitmap_start + sb.bitmap_blocks {
            let mut block = Block::empty(index, sb.block_size);
            if let Some(chunk) = chunks.next() {
                block.write_bytes(0, chunk)?;
            }
            self.flush_block(&block)?;
        }
        Ok(())
    }

    /// Mark superblock, inode table and bitmap blocks as allocated
    pub fn mark_reserved_regions(&mut self) -> Result<()> {
        self.ensure_writable()?;
        let data_start = self.superblock.data_start;
        let bitmap = self.bitmap_mut()?;
        for index in 0..data_start {
            bitmap.set(index, true)?;
        }
        debug!("Reserved blocks 0..{data_start}");
        self.flush_bitmap()
    }

    /// Claim the first free block at or after `start`
    pub fn allocate_first_free(&mut self, start: u32) -> Result<u32> {
        self.ensure_writable()?;
        let bitmap = self.bitmap_mut()?;
        let index = bitmap.next_free(start).ok_or(Error::NoFreeBlocks)?;
        bitmap.set(index, true)?;
        self.flush_bitmap()?;
        debug!("Acquire block {index}");
        Ok(index)
    }

    /// Claim the first free block of the data region
    pub fn allocate_block(&mut self) -> Result<u32> {
        self.allocate_first_free(self.superblock.data_start)
    }

    /// Release block at index
    pub fn free_block(&mut self, index: u32) -> Result<()> {
        if index >= self.superblock.block_count {
            return Err(Error::OutOfRange);
        }
        if self.superblock.is_reserved(index) {
            return Err(Error::InvalidArgument("block belongs to a reserved region"));
        }
        self.ensure_writable()?;
        let bitmap = self.bitmap_mut()?;
        if !bitmap.get(index) {
            warn!("Releasing block {index} which is already free");
        }
        bitmap.set(index, false)?;
        self.flush_bitmap()?;
        debug!("Release block {index}");
        Ok(())
    }

    pub fn is_allocated(&mut self, index: u32) -> Result<bool> {
        Ok(self.bitmap_mut()?.get(index))
    }
}
