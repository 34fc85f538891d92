use log::debug;

use super::Filesystem;
use crate::fileio::helpers::timestamp_now;
use crate::structs::{FileKind, Inode, INODE_RECORD_SIZE};
use crate::{Error, Result};

impl Filesystem {
    /// Raw record bytes of an inode slot, joined across a block boundary if needed
    fn read_inode_record(&mut self, index: u32) -> Result<Vec<u8>> {
        let (block, offset) = self.superblock.inode_position(index)?;
        let block_size = self.superblock.block_size as usize;
        let first = self.load_block(block)?;
        if offset + INODE_RECORD_SIZE <= block_size {
            return Ok(first.data[offset..offset + INODE_RECORD_SIZE].to_vec());
        }
        let mut record = first.data[offset..].to_vec();
        let second = self.load_block(block + 1)?;
        record.extend_from_slice(&second.data[..INODE_RECORD_SIZE - record.len()]);
        Ok(record)
    }

    /// Store record bytes into an inode slot, split across a block boundary if needed
    fn write_inode_record(&mut self, index: u32, record: &[u8]) -> Result<()> {
        if record.len() != INODE_RECORD_SIZE {
            return Err(Error::CorruptState("inode record has wrong size"));
        }
        let (block, offset) = self.superblock.inode_position(index)?;
        let block_size = self.superblock.block_size as usize;
        if offset + INODE_RECORD_SIZE <= block_size {
            return self.write_block(block, record, offset);
        }
        let (head, tail) = record.split_at(block_size - offset);
        self.write_block(block, head, offset)?;
        self.write_block(block + 1, tail, 0)
    }

    /// Load inode with index
    pub fn get_inode(&mut self, index: u32) -> Result<Inode> {
        debug!("Load inode {index}");
        let inode = Inode::decode(&self.read_inode_record(index)?)?;
        let sb = self.superblock;
        if inode
            .pointers()
            .any(|block| block < sb.data_start || block >= sb.block_count)
        {
            return Err(Error::CorruptState("inode points outside the data region"));
        }
        Ok(inode)
    }

    /// Flush inode to its slot
    pub fn update_inode(&mut self, inode: &Inode) -> Result<()> {
        debug!("Flush inode {}", inode.index);
        self.write_inode_record(inode.index, &inode.encode())
    }

    /// First-fit scan for a free slot, claimed as an empty regular file
    pub fn allocate_inode(&mut self) -> Result<Inode> {
        for index in 0..self.superblock.inode_count {
            if self.get_inode(index)?.is_allocated() {
                continue;
            }
            let inode = Inode::new(index, FileKind::File, timestamp_now());
            self.update_inode(&inode)?;
            debug!("Acquire inode {index}");
            return Ok(inode);
        }
        Err(Error::NoFreeInodes)
    }

    /// Reset slot to the all-zero free record. Data blocks are not released
    pub fn free_inode(&mut self, index: u32) -> Result<()> {
        debug!("Release inode {index}");
        self.write_inode_record(index, &[0u8; INODE_RECORD_SIZE])
    }
}

#[cfg(test)]
mod tests {
    use crate::filesystem::tests::{formatted, geometry, remount};
    use crate::structs::{FileKind, Geometry, ROOT_INODE};
    use crate::Error;

    #[test]
    fn acquire_and_release_inode() {
        let mut fs = formatted(&geometry());
        assert_eq![fs.allocate_inode().unwrap().index, 1];
        assert_eq![fs.allocate_inode().unwrap().index, 2];
        assert_eq![fs.allocate_inode().unwrap().index, 3];
        assert![fs.free_inode(2).is_ok()];
        assert_eq![fs.allocate_inode().unwrap().index, 2];
        assert_eq![fs.allocate_inode().unwrap().index, 4];
        for index in 5..fs.superblock.inode_count {
            assert_eq![fs.allocate_inode().unwrap().index, index];
        }
        assert!(matches![fs.allocate_inode(), Err(Error::NoFreeInodes)]);
    }

    #[test]
    fn empty_file_is_not_free() {
        let mut fs = formatted(&geometry());
        let inode = fs.allocate_inode().unwrap();
        assert_eq!(inode.size, 0);
        assert_eq!(inode.kind, FileKind::File);
        assert_ne!(fs.allocate_inode().unwrap().index, inode.index);
    }

    #[test]
    fn update_persists() {
        let mut fs = formatted(&geometry());
        let mut inode = fs.allocate_inode().unwrap();
        let block = fs.allocate_block().unwrap();
        inode.size = 77;
        inode.direct[0] = Some(block);
        fs.update_inode(&inode).unwrap();
        let mut fs = remount(fs);
        assert_eq!(fs.get_inode(inode.index).unwrap(), inode);
        assert_eq!(fs.get_inode(ROOT_INODE).unwrap().kind, FileKind::Directory);
    }

    #[test]
    fn records_straddle_blocks() {
        let mut fs = formatted(&Geometry {
            total_blocks: 64,
            block_size: 192,
            inode_count: 9,
        });
        let mut inodes = Vec::new();
        for size in 1..9u64 {
            let mut inode = fs.allocate_inode().unwrap();
            inode.size = size * 1000;
            fs.update_inode(&inode).unwrap();
            inodes.push(inode);
        }
        let mut fs = remount(fs);
        for inode in &inodes {
            assert_eq!(&fs.get_inode(inode.index).unwrap(), inode);
        }
        fs.free_inode(1).unwrap();
        assert!(!fs.get_inode(1).unwrap().is_allocated());
        assert_eq!(fs.get_inode(2).unwrap(), inodes[1]);
        assert_eq!(fs.get_inode(ROOT_INODE).unwrap().kind, FileKind::Directory);
    }

    #[test]
    fn out_of_range() {
        let mut fs = formatted(&geometry());
        assert!(matches![fs.get_inode(16), Err(Error::OutOfRange)]);
        assert!(matches![fs.free_inode(16), Err(Error::OutOfRange)]);
    }

    #[test]
    fn rejects_pointers_outside_data_region() {
        let mut fs = formatted(&geometry());
        let mut inode = fs.allocate_inode().unwrap();
        inode.direct[2] = Some(3);
        fs.update_inode(&inode).unwrap();
        assert!(matches![
            fs.get_inode(inode.index),
            Err(Error::CorruptState(_))
        ]);
    }
}
