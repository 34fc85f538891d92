use std::fmt::Debug;
use std::io::{Cursor, ErrorKind, Read, Seek, SeekFrom, Write};

use log::{debug, info, warn};

use crate::fileio::{helpers::timestamp_now, DescriptorTable};
use crate::structs::*;
use crate::{Error, Result};

mod allocator;
mod directory;
mod inode_table;
mod session;

pub use directory::{Directory, DirectoryEntry};
pub use session::Session;

pub trait BlockDevice: Read + Write + Seek + Debug {}

impl BlockDevice for std::fs::File {}

impl BlockDevice for Cursor<Vec<u8>> {}

/// A mounted disk image together with its in-memory caches
#[derive(Debug)]
pub struct Filesystem {
    pub(crate) superblock: Superblock,
    /// Loaded from the bitmap region on first use
    pub(crate) bitmap: Option<Bitmap>,
    pub(crate) device: Box<dyn BlockDevice>,
    pub(crate) descriptors: DescriptorTable,
    /// Every write to the device is refused
    pub(crate) read_only: bool,
}

impl Filesystem {
    /// Lay out a fresh filesystem on `device` and return it mounted
    pub fn format(device: Box<dyn BlockDevice>, geometry: &Geometry) -> Result<Self> {
        let mut superblock = Superblock::layout(geometry)?;
        superblock.seal();
        info!(
            "Formatting {} blocks of {} bytes with {} inodes",
            superblock.block_count, superblock.block_size, superblock.inode_count
        );
        let mut fs = Self {
            superblock,
            bitmap: None,
            device,
            descriptors: DescriptorTable::default(),
            read_only: false,
        };
        let mut header = Block::empty(0, superblock.block_size);
        header.write_bytes(0, &superblock.encode())?;
        fs.flush_block(&header)?;
        for index in superblock.inode_table_start..superblock.data_start {
            fs.flush_block(&Block::empty(index, superblock.block_size))?;
        }
        // Extend the image to its full length
        fs.flush_block(&Block::empty(
            superblock.block_count - 1,
            superblock.block_size,
        ))?;
        fs.mark_reserved_regions()?;

        let directory_block = fs.allocate_block()?;
        let mut root = Inode::new(superblock.root_inode, FileKind::Directory, timestamp_now());
        root.direct[0] = Some(directory_block);
        fs.update_inode(&root)?;
        fs.device.flush()?;
        debug!("Root directory stored in block {directory_block}");
        Ok(fs)
    }

    /// Load filesystem from a formatted block device
    pub fn mount(device: Box<dyn BlockDevice>) -> Result<Self> {
        Self::load(device, false)
    }

    /// Load filesystem for inspection. Nothing is ever written to the device,
    /// and mutating operations fail with [`Error::PermissionDenied`]
    pub fn mount_read_only(device: Box<dyn BlockDevice>) -> Result<Self> {
        Self::load(device, true)
    }

    fn load(mut device: Box<dyn BlockDevice>, read_only: bool) -> Result<Self> {
        device.seek(SeekFrom::Start(0))?;
        let mut header = vec![0u8; Superblock::ENCODED_SIZE];
        device.read_exact(&mut header).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => Error::CorruptState("image too small for a superblock"),
            _ => Error::Io(e),
        })?;
        let superblock = Superblock::decode(&header)?;
        superblock.validate()?;
        let mut fs = Self {
            superblock,
            bitmap: None,
            device,
            descriptors: DescriptorTable::default(),
            read_only,
        };
        if !read_only {
            fs.mark_reserved_regions()?;
        }
        let root = fs.get_inode(superblock.root_inode)?;
        if !root.is_allocated() || root.kind != FileKind::Directory || root.direct[0].is_none() {
            return Err(Error::CorruptState("missing root directory"));
        }
        info!(
            "Mounted {} blocks of {} bytes, data starts at block {}{}",
            superblock.block_count,
            superblock.block_size,
            superblock.data_start,
            if read_only { " (read-only)" } else { "" }
        );
        Ok(fs)
    }

    /// Close the session. Every mutation is already on the device
    pub fn unmount(mut self) -> Result<()> {
        let open = self.descriptors.len();
        if open > 0 {
            warn!("Unmounting with {open} open descriptors");
        }
        self.descriptors.clear();
        if !self.read_only {
            self.device.flush()?;
        }
        info!("Unmounted");
        Ok(())
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// Read exactly one block of bytes
    pub fn read_block(&mut self, index: u32) -> Result<Vec<u8>> {
        Ok(self.load_block(index)?.data)
    }

    /// Write `data` into block `index` at `offset`, preserving bytes outside
    /// the written range. Data must not run past the end of the block
    pub fn write_block(&mut self, index: u32, data: &[u8], offset: usize) -> Result<()> {
        if offset + data.len() > self.superblock.block_size as usize {
            return Err(Error::InvalidArgument("write crosses block boundary"));
        }
        let mut block = if offset == 0 && data.len() == self.superblock.block_size as usize {
            Block::empty(index, self.superblock.block_size)
        } else {
            self.load_block(index)?
        };
        block.write_bytes(offset, data)?;
        self.flush_block(&block)
    }

    /// Load block with index
    pub(crate) fn load_block(&mut self, index: u32) -> Result<Block> {
        debug!("Load block {index}");
        Block::load(&mut *self.device, &self.superblock, index)
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::PermissionDenied);
        }
        Ok(())
    }

    /// Flush block
    pub(crate) fn flush_block(&mut self, block: &Block) -> Result<()> {
        self.ensure_writable()?;
        debug!("Flush block {}", block.index);
        block.flush(&mut *self.device, &self.superblock)
    }
}
