//! File operations by name and by descriptor on a mounted [`Filesystem`]

mod block_cursor;
mod descriptor;
pub(crate) mod helpers;

use log::debug;

pub use block_cursor::BlockCursor;
pub use descriptor::{DescriptorTable, Fd, FileDescriptor, OpenMode, Whence, FIRST_DESCRIPTOR};

use crate::filesystem::Filesystem;
use crate::structs::{Block, FileKind, Inode, DIRECT_POINTERS, NULL_BLOCK};
use crate::{Error, Result};
use helpers::timestamp_now;

/// Inode details reported for a file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub inode_number: u32,
    pub kind: FileKind,
    pub size: u64,
    pub direct_blocks: Vec<Option<u32>>,
    pub indirect_block: Option<u32>,
    /// Every block holding file content, in logical order
    pub data_blocks: Vec<u32>,
    pub created_ms: u64,
    pub modified_ms: u64,
}

impl Filesystem {
    fn check_data_pointer(&self, block: u32) -> Result<u32> {
        if block < self.superblock.data_start || block >= self.superblock.block_count {
            return Err(Error::CorruptState("block pointer outside the data region"));
        }
        Ok(block)
    }

    /// Physical block backing the `index`-th block of a file, if any
    fn data_block(&mut self, inode: &Inode, index: u64) -> Result<Option<u32>> {
        let index = index as usize;
        if index < DIRECT_POINTERS {
            return Ok(inode.direct[index]);
        }
        let slot = index - DIRECT_POINTERS;
        let indirect = match inode.indirect {
            Some(indirect) if slot < self.superblock.pointers_per_block() => indirect,
            _ => return Ok(None),
        };
        match self.load_block(indirect)?.pointers()[slot] {
            NULL_BLOCK => Ok(None),
            block => self.check_data_pointer(block).map(Some),
        }
    }

    /// Data block with every byte zeroed
    fn claim_block(&mut self) -> Result<u32> {
        let index = self.allocate_block()?;
        self.flush_block(&Block::empty(index, self.superblock.block_size))?;
        Ok(index)
    }

    /// Physical block for the `index`-th block of a file, allocated on demand.
    /// New pointers are persisted immediately
    fn ensure_data_block(&mut self, inode: &mut Inode, index: u64) -> Result<u32> {
        if let Some(block) = self.data_block(inode, index)? {
            return Ok(block);
        }
        let index = index as usize;
        if index < DIRECT_POINTERS {
            let block = self.claim_block()?;
            inode.direct[index] = Some(block);
            self.update_inode(inode)?;
            return Ok(block);
        }
        let slot = index - DIRECT_POINTERS;
        if slot >= self.superblock.pointers_per_block() {
            return Err(Error::OutOfRange);
        }
        let indirect = match inode.indirect {
            Some(indirect) => indirect,
            None => {
                let indirect = self.claim_block()?;
                inode.indirect = Some(indirect);
                self.update_inode(inode)?;
                debug!("Inode {} uses indirect block {indirect}", inode.index);
                indirect
            }
        };
        let block = self.claim_block()?;
        let mut table = self.load_block(indirect)?;
        table.set_pointer(slot, block)?;
        self.flush_block(&table)?;
        Ok(block)
    }

    /// Read up to `length` bytes from `offset`, stopping early at a hole
    fn read_range(&mut self, inode: &Inode, offset: u64, length: usize) -> Result<Vec<u8>> {
        let mut cursor = BlockCursor::new(self.superblock.block_size);
        cursor.set(offset);
        let mut data = Vec::with_capacity(length);
        while data.len() < length {
            let Some(index) = self.data_block(inode, cursor.block())? else {
                debug!("Hole in inode {} at block {}", inode.index, cursor.block());
                break;
            };
            let take = cursor.remaining().min(length - data.len());
            let block = self.load_block(index)?;
            data.extend_from_slice(&block.data[cursor.byte()..cursor.byte() + take]);
            cursor.advance(take as u64);
        }
        Ok(data)
    }

    /// Write all of `data` at `offset`, growing the file as needed
    fn write_range(&mut self, inode: &mut Inode, offset: u64, data: &[u8]) -> Result<usize> {
        let end = offset + data.len() as u64;
        if end > self.superblock.max_file_size() {
            return Err(Error::OutOfRange);
        }
        let mut cursor = BlockCursor::new(self.superblock.block_size);
        cursor.set(offset);
        let mut written = 0;
        while written < data.len() {
            let index = self.ensure_data_block(inode, cursor.block())?;
            let take = cursor.remaining().min(data.len() - written);
            self.write_block(index, &data[written..written + take], cursor.byte())?;
            written += take;
            cursor.advance(take as u64);
        }
        if end > inode.size {
            inode.size = end;
        }
        inode.modified = timestamp_now();
        self.update_inode(inode)?;
        Ok(written)
    }

    /// Every block holding file content, in logical order. Fails before
    /// returning anything if a pointer lies outside the data region
    fn content_blocks(&mut self, inode: &Inode) -> Result<Vec<u32>> {
        let mut blocks: Vec<u32> = inode.direct.iter().flatten().copied().collect();
        if let Some(indirect) = inode.indirect {
            self.check_data_pointer(indirect)?;
            for block in self.load_block(indirect)?.pointers() {
                if block != NULL_BLOCK {
                    blocks.push(block);
                }
            }
        }
        for &block in &blocks {
            self.check_data_pointer(block)?;
        }
        Ok(blocks)
    }

    /// Free every data block of an inode and reset its size.
    /// The inode drops its pointers before any block returns to the bitmap
    fn release_blocks(&mut self, inode: &mut Inode) -> Result<()> {
        let mut blocks = self.content_blocks(inode)?;
        blocks.extend(inode.indirect);
        inode.direct = [None; DIRECT_POINTERS];
        inode.indirect = None;
        inode.size = 0;
        inode.modified = timestamp_now();
        self.update_inode(inode)?;
        for block in blocks {
            self.free_block(block)?;
        }
        debug!("Released blocks of inode {}", inode.index);
        Ok(())
    }

    fn lookup(&mut self, name: &str) -> Result<Inode> {
        let index = self.resolve(name)?.ok_or(Error::NotFound)?;
        self.get_inode(index)
    }

    fn lookup_file(&mut self, name: &str) -> Result<Inode> {
        let inode = self.lookup(name)?;
        if inode.kind != FileKind::File {
            return Err(Error::TypeMismatch);
        }
        Ok(inode)
    }

    /// Create an empty file or directory, returning its inode number
    pub fn create(&mut self, name: &str, is_directory: bool) -> Result<u32> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("empty file name"));
        }
        if self.resolve(name)?.is_some() {
            return Err(Error::AlreadyExists);
        }
        let mut inode = self.allocate_inode()?;
        if is_directory {
            inode.kind = FileKind::Directory;
            self.update_inode(&inode)?;
        }
        if let Err(e) = self.add_entry(name, inode.index) {
            self.free_inode(inode.index)?;
            return Err(e);
        }
        debug!("Created {name:?} as inode {}", inode.index);
        Ok(inode.index)
    }

    /// Release blocks, directory entry and inode of a file, in that order
    pub fn delete(&mut self, name: &str) -> Result<()> {
        let mut inode = self.lookup(name)?;
        self.release_blocks(&mut inode)?;
        self.remove_entry(name)?;
        self.free_inode(inode.index)?;
        let closed = self.descriptors.close_inode(inode.index);
        if closed > 0 {
            debug!("Closed {closed} descriptors of deleted {name:?}");
        }
        debug!("Deleted {name:?}");
        Ok(())
    }

    pub fn list(&mut self) -> Result<Vec<String>> {
        Ok(self
            .list_entries()?
            .into_iter()
            .map(|entry| entry.name)
            .collect())
    }

    pub fn metadata(&mut self, name: &str) -> Result<Metadata> {
        let inode = self.lookup(name)?;
        let data_blocks = self.content_blocks(&inode)?;
        Ok(Metadata {
            inode_number: inode.index,
            kind: inode.kind,
            size: inode.size,
            direct_blocks: inode.direct.to_vec(),
            indirect_block: inode.indirect,
            data_blocks,
            created_ms: inode.created,
            modified_ms: inode.modified,
        })
    }

    pub fn read_whole(&mut self, name: &str) -> Result<Vec<u8>> {
        let inode = self.lookup_file(name)?;
        self.read_range(&inode, 0, inode.size as usize)
    }

    /// Replace the content of a file
    pub fn write_whole(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let mut inode = self.lookup_file(name)?;
        if data.len() as u64 > self.superblock.max_file_size() {
            return Err(Error::OutOfRange);
        }
        self.release_blocks(&mut inode)?;
        self.write_range(&mut inode, 0, data)?;
        Ok(())
    }

    pub fn truncate(&mut self, name: &str) -> Result<()> {
        let mut inode = self.lookup_file(name)?;
        self.release_blocks(&mut inode)
    }

    pub fn open(&mut self, name: &str, mode: OpenMode) -> Result<Fd> {
        let mut inode = self.lookup_file(name)?;
        if mode == OpenMode::WriteTruncate {
            self.release_blocks(&mut inode)?;
        }
        let cursor = match mode {
            OpenMode::Append => inode.size,
            _ => 0,
        };
        let fd = self.descriptors.insert(FileDescriptor {
            inode: inode.index,
            mode,
            cursor,
        });
        debug!("Opened {name:?} as descriptor {fd} in mode {mode:?}");
        Ok(fd)
    }

    pub fn close(&mut self, fd: Fd) -> Result<()> {
        self.descriptors.remove(fd)?;
        debug!("Closed descriptor {fd}");
        Ok(())
    }

    /// Move the cursor, returning its new position. Seeking past the end is allowed
    pub fn seek(&mut self, fd: Fd, offset: i64, whence: Whence) -> Result<u64> {
        let descriptor = *self.descriptors.get(fd)?;
        let base = match whence {
            Whence::Start => 0,
            Whence::Current => descriptor.cursor,
            Whence::End => self.get_inode(descriptor.inode)?.size,
        };
        let position = i64::try_from(base)
            .ok()
            .and_then(|base| base.checked_add(offset))
            .ok_or(Error::InvalidArgument("seek position overflows"))?;
        let position =
            u64::try_from(position).map_err(|_| Error::InvalidArgument("seek before start of file"))?;
        self.descriptors.get_mut(fd)?.cursor = position;
        Ok(position)
    }

    /// Read up to `size` bytes at the cursor
    pub fn read(&mut self, fd: Fd, size: usize) -> Result<Vec<u8>> {
        let descriptor = *self.descriptors.get(fd)?;
        if !descriptor.mode.can_read() {
            return Err(Error::PermissionDenied);
        }
        let inode = self.get_inode(descriptor.inode)?;
        if descriptor.cursor >= inode.size || size == 0 {
            return Ok(Vec::new());
        }
        let length = (size as u64).min(inode.size - descriptor.cursor) as usize;
        let data = self.read_range(&inode, descriptor.cursor, length)?;
        self.descriptors.get_mut(fd)?.cursor += data.len() as u64;
        Ok(data)
    }

    /// Write all of `data` at the cursor, returning the byte count
    pub fn write(&mut self, fd: Fd, data: &[u8]) -> Result<usize> {
        let descriptor = *self.descriptors.get(fd)?;
        if !descriptor.mode.can_write() {
            return Err(Error::PermissionDenied);
        }
        let mut inode = self.get_inode(descriptor.inode)?;
        let written = self.write_range(&mut inode, descriptor.cursor, data)?;
        self.descriptors.get_mut(fd)?.cursor += written as u64;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::tests::{formatted, geometry, remount};

    fn payload(length: usize) -> Vec<u8> {
        (0..length).map(|v| (v * 7 % 251) as u8).collect()
    }

    #[test]
    fn write_and_read_across_blocks() {
        let mut fs = formatted(&geometry());
        fs.create("alpha", false).unwrap();
        let buff = payload(1000);
        fs.write_whole("alpha", &buff).unwrap();
        let mut fs = remount(fs);
        assert_eq!(fs.read_whole("alpha").unwrap(), buff);
        let metadata = fs.metadata("alpha").unwrap();
        assert_eq!(metadata.size, 1000);
        assert_eq!(metadata.data_blocks.len(), 4);
        assert_eq!(metadata.indirect_block, None);
        for block in metadata.data_blocks {
            assert!(fs.is_allocated(block).unwrap());
        }
    }

    #[test]
    fn open_read_write_seek_close() {
        let mut fs = formatted(&geometry());
        fs.create("alpha", false).unwrap();
        let fd = fs.open("alpha", OpenMode::ReadWrite).unwrap();
        assert_eq!(fd, FIRST_DESCRIPTOR);
        assert_eq!(fs.write(fd, b"hello world").unwrap(), 11);
        assert_eq!(fs.seek(fd, 6, Whence::Start).unwrap(), 6);
        assert_eq!(fs.read(fd, 5).unwrap(), b"world");
        fs.seek(fd, 0, Whence::End).unwrap();
        fs.write(fd, b"!!!").unwrap();
        fs.seek(fd, 0, Whence::Start).unwrap();
        assert_eq!(fs.read(fd, 100).unwrap(), b"hello world!!!");
        assert_eq!(fs.read(fd, 100).unwrap(), b"");
        fs.seek(fd, -3, Whence::Current).unwrap();
        assert_eq!(fs.read(fd, 2).unwrap(), b"!!");
        fs.close(fd).unwrap();
        assert!(matches![fs.close(fd), Err(Error::NotFound)]);
        assert!(matches![fs.read(fd, 1), Err(Error::NotFound)]);
    }

    #[test]
    fn hole_write() {
        let mut fs = formatted(&geometry());
        fs.create("beta", false).unwrap();
        let fd = fs.open("beta", OpenMode::ReadWrite).unwrap();
        fs.seek(fd, 0, Whence::End).unwrap();
        fs.seek(fd, 300, Whence::Current).unwrap();
        fs.write(fd, b"XYZ").unwrap();
        fs.seek(fd, 300, Whence::Start).unwrap();
        assert_eq!(fs.read(fd, 3).unwrap(), b"XYZ");
        let metadata = fs.metadata("beta").unwrap();
        assert_eq!(metadata.size, 303);
        assert_eq!(metadata.direct_blocks[0], None);
        assert!(metadata.direct_blocks[1].is_some());
        // reading from the start stops at the unbacked first block
        fs.seek(fd, 0, Whence::Start).unwrap();
        assert_eq!(fs.read(fd, 303).unwrap(), b"");
        assert_eq!(fs.read_whole("beta").unwrap(), b"");
    }

    #[test]
    fn partial_block_writes_keep_neighbours() {
        let mut fs = formatted(&geometry());
        fs.create("gamma", false).unwrap();
        fs.write_whole("gamma", &[b'a'; 600]).unwrap();
        let fd = fs.open("gamma", OpenMode::ReadWrite).unwrap();
        fs.seek(fd, 250, Whence::Start).unwrap();
        fs.write(fd, &[b'b'; 10]).unwrap();
        let content = fs.read_whole("gamma").unwrap();
        assert_eq!(content.len(), 600);
        assert_eq!(&content[..250], &[b'a'; 250]);
        assert_eq!(&content[250..260], &[b'b'; 10]);
        assert_eq!(&content[260..], &[b'a'; 340]);
    }

    #[test]
    fn truncate_releases_blocks() {
        let mut fs = formatted(&geometry());
        fs.create("delta", false).unwrap();
        fs.write_whole("delta", &payload(256 * 14)).unwrap();
        let metadata = fs.metadata("delta").unwrap();
        let indirect = metadata.indirect_block.unwrap();
        assert_eq!(metadata.data_blocks.len(), 14);
        fs.truncate("delta").unwrap();
        for block in metadata.data_blocks.into_iter().chain(Some(indirect)) {
            assert!(!fs.is_allocated(block).unwrap());
        }
        let metadata = fs.metadata("delta").unwrap();
        assert_eq!(metadata.size, 0);
        assert!(metadata.data_blocks.is_empty());
        assert_eq!(fs.read_whole("delta").unwrap(), b"");
    }

    #[test]
    fn grows_through_indirect_block() {
        let mut fs = formatted(&geometry());
        fs.create("big", false).unwrap();
        let buff = payload(256 * 12 + 17);
        fs.write_whole("big", &buff).unwrap();
        let mut fs = remount(fs);
        assert_eq!(fs.read_whole("big").unwrap(), buff);
        let metadata = fs.metadata("big").unwrap();
        assert!(metadata.direct_blocks.iter().all(Option::is_some));
        assert_eq!(metadata.data_blocks.len(), 13);
        let limit = fs.superblock().max_file_size();
        assert_eq!(limit, (10 + 64) * 256);
        let fd = fs.open("big", OpenMode::ReadWrite).unwrap();
        fs.seek(fd, limit as i64 - 2, Whence::Start).unwrap();
        assert!(matches![fs.write(fd, b"abc"), Err(Error::OutOfRange)]);
        assert_eq!(fs.write(fd, b"ab").unwrap(), 2);
        assert_eq!(fs.metadata("big").unwrap().size, limit);
    }

    #[test]
    fn corrupt_indirect_entry_keeps_blocks() {
        let mut fs = formatted(&geometry());
        let index = fs.create("x", false).unwrap();
        fs.write_whole("x", &payload(256 * 11)).unwrap();
        let metadata = fs.metadata("x").unwrap();
        let indirect = metadata.indirect_block.unwrap();
        // second indirect slot now names a block of the inode table
        fs.write_block(indirect, &2u32.to_le_bytes(), 4).unwrap();
        let inode = fs.get_inode(index).unwrap();
        let bitmap = fs.bitmap().unwrap().clone();

        assert!(matches![fs.truncate("x"), Err(Error::CorruptState(_))]);
        assert!(matches![fs.delete("x"), Err(Error::CorruptState(_))]);
        assert_eq!(fs.get_inode(index).unwrap(), inode);
        assert_eq!(fs.bitmap().unwrap(), &bitmap);
        for block in metadata.data_blocks.into_iter().chain(Some(indirect)) {
            assert!(fs.is_allocated(block).unwrap());
        }
        assert_eq!(fs.list().unwrap(), vec!["x"]);
    }

    #[test]
    fn permissions() {
        let mut fs = formatted(&geometry());
        fs.create("gamma", false).unwrap();
        let fd = fs.open("gamma", OpenMode::Read).unwrap();
        assert!(matches![fs.write(fd, b"x"), Err(Error::PermissionDenied)]);
        fs.close(fd).unwrap();
        let fd = fs.open("gamma", OpenMode::WriteTruncate).unwrap();
        assert!(matches![fs.read(fd, 1), Err(Error::PermissionDenied)]);
        fs.close(fd).unwrap();
    }

    #[test]
    fn truncate_and_append_modes() {
        let mut fs = formatted(&geometry());
        fs.create("log", false).unwrap();
        fs.write_whole("log", &payload(700)).unwrap();
        let blocks = fs.metadata("log").unwrap().data_blocks;
        let fd = fs.open("log", OpenMode::Append).unwrap();
        fs.write(fd, b"tail").unwrap();
        assert_eq!(fs.metadata("log").unwrap().size, 704);
        assert_eq!(&fs.read_whole("log").unwrap()[700..], b"tail");
        let fd = fs.open("log", OpenMode::WriteTruncate).unwrap();
        for block in blocks {
            assert!(!fs.is_allocated(block).unwrap());
        }
        assert_eq!(fs.metadata("log").unwrap().size, 0);
        fs.write(fd, b"fresh").unwrap();
        assert_eq!(fs.read_whole("log").unwrap(), b"fresh");
    }

    #[test]
    fn seek_rules() {
        let mut fs = formatted(&geometry());
        fs.create("epsilon", false).unwrap();
        fs.write_whole("epsilon", b"0123456789").unwrap();
        let fd = fs.open("epsilon", OpenMode::Read).unwrap();
        assert_eq!(fs.seek(fd, -4, Whence::End).unwrap(), 6);
        assert_eq!(fs.read(fd, 10).unwrap(), b"6789");
        assert!(matches![
            fs.seek(fd, -11, Whence::End),
            Err(Error::InvalidArgument(_))
        ]);
        assert_eq!(fs.seek(fd, 0, Whence::Current).unwrap(), 10);
        assert_eq!(fs.seek(fd, 500, Whence::Start).unwrap(), 500);
        assert_eq!(fs.read(fd, 10).unwrap(), b"");
    }

    #[test]
    fn directories_cannot_hold_content() {
        let mut fs = formatted(&geometry());
        let index = fs.create("docs", true).unwrap();
        let metadata = fs.metadata("docs").unwrap();
        assert_eq!(metadata.inode_number, index);
        assert_eq!(metadata.kind, FileKind::Directory);
        assert!(matches![
            fs.open("docs", OpenMode::Read),
            Err(Error::TypeMismatch)
        ]);
        assert!(matches![fs.read_whole("docs"), Err(Error::TypeMismatch)]);
        assert!(matches![fs.write_whole("docs", b"x"), Err(Error::TypeMismatch)]);
        assert!(matches![fs.truncate("docs"), Err(Error::TypeMismatch)]);
        fs.delete("docs").unwrap();
        assert!(fs.list().unwrap().is_empty());
    }

    #[test]
    fn create_and_delete() {
        let mut fs = formatted(&geometry());
        assert_eq!(fs.create("one", false).unwrap(), 1);
        assert_eq!(fs.create("two", false).unwrap(), 2);
        assert!(matches![fs.create("one", false), Err(Error::AlreadyExists)]);
        assert!(matches![fs.create("", false), Err(Error::InvalidArgument(_))]);
        fs.write_whole("one", &payload(300)).unwrap();
        let blocks = fs.metadata("one").unwrap().data_blocks;
        let fd = fs.open("one", OpenMode::Read).unwrap();
        fs.delete("one").unwrap();
        assert!(matches![fs.read(fd, 1), Err(Error::NotFound)]);
        for block in blocks {
            assert!(!fs.is_allocated(block).unwrap());
        }
        assert!(!fs.get_inode(1).unwrap().is_allocated());
        assert!(matches![fs.metadata("one"), Err(Error::NotFound)]);
        assert!(matches![fs.delete("one"), Err(Error::NotFound)]);
        assert_eq!(fs.list().unwrap(), vec!["two"]);
        assert_eq!(fs.create("three", false).unwrap(), 1);
    }

    #[test]
    fn reused_blocks_are_zeroed() {
        let mut fs = formatted(&geometry());
        fs.create("old", false).unwrap();
        fs.write_whole("old", &[0xEE; 256]).unwrap();
        fs.delete("old").unwrap();
        fs.create("new", false).unwrap();
        let fd = fs.open("new", OpenMode::ReadWrite).unwrap();
        fs.seek(fd, 100, Whence::Start).unwrap();
        fs.write(fd, b"x").unwrap();
        fs.seek(fd, 0, Whence::Start).unwrap();
        let content = fs.read(fd, 101).unwrap();
        assert_eq!(&content[..100], &[0u8; 100]);
        assert_eq!(content[100], b'x');
    }

    #[test]
    fn failed_create_releases_inode() {
        let mut fs = formatted(&geometry());
        let mut created = 0;
        let error = loop {
            match fs.create(&format!("{:0>40}", created), false) {
                Ok(_) => created += 1,
                Err(e) => break e,
            }
        };
        assert!(matches![error, Error::InvalidArgument(_)]);
        // the rejected name did not keep its inode
        assert_eq!(
            fs.allocate_inode().unwrap().index,
            created as u32 + 1
        );
    }

    #[test]
    fn full_disk_write_fails_cleanly() {
        let mut fs = formatted(&geometry());
        fs.create("filler", false).unwrap();
        let mut blocks = Vec::new();
        while let Ok(block) = fs.allocate_block() {
            blocks.push(block);
        }
        assert!(matches![
            fs.write_whole("filler", b"data"),
            Err(Error::NoFreeBlocks)
        ]);
        fs.free_block(blocks[0]).unwrap();
        fs.write_whole("filler", b"data").unwrap();
        assert_eq!(fs.read_whole("filler").unwrap(), b"data");
        assert_eq!(fs.metadata("filler").unwrap().data_blocks, vec![blocks[0]]);
    }
}
