use log::debug;
use serde_json::{Map, Value};

use super::Filesystem;
use crate::fileio::helpers::timestamp_now;
use crate::structs::{Block, Inode};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub inode: u32,
}

/// Flat filename to inode map, persisted as a JSON object in one block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directory {
    /// Entries in insertion order
    pub(crate) entries: Vec<DirectoryEntry>,
}

impl Directory {
    /// Parse a zero-padded directory block
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let end = bytes.iter().rposition(|&byte| byte != 0).map_or(0, |i| i + 1);
        if end == 0 {
            return Ok(Self::default());
        }
        let map: Map<String, Value> = serde_json::from_slice(&bytes[..end])?;
        let entries = map
            .into_iter()
            .map(|(name, inode)| {
                let inode = inode
                    .as_u64()
                    .and_then(|inode| u32::try_from(inode).ok())
                    .ok_or(Error::CorruptState("directory entry without inode number"))?;
                Ok(DirectoryEntry { name, inode })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    /// Serialize, failing if the payload would not fit in one block
    pub fn encode(&self, block_size: u32) -> Result<Vec<u8>> {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|entry| (entry.name.clone(), Value::from(entry.inode)))
            .collect();
        let payload = serde_json::to_vec(&map)?;
        if payload.len() > block_size as usize {
            return Err(Error::InvalidArgument("directory entries exceed one block"));
        }
        Ok(payload)
    }

    pub fn resolve(&self, name: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.inode)
    }

    pub fn add(&mut self, name: &str, inode: u32) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("empty file name"));
        }
        if self.resolve(name).is_some() {
            return Err(Error::AlreadyExists);
        }
        self.entries.push(DirectoryEntry {
            name: name.to_owned(),
            inode,
        });
        Ok(())
    }

    /// Remove entry, returning its inode number
    pub fn remove(&mut self, name: &str) -> Result<u32> {
        let position = self
            .entries
            .iter()
            .position(|entry| entry.name == name)
            .ok_or(Error::NotFound)?;
        Ok(self.entries.remove(position).inode)
    }

    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }
}

impl Filesystem {
    /// Root inode and the block holding the directory payload
    fn directory_location(&mut self) -> Result<(Inode, u32)> {
        let root = self.get_inode(self.superblock.root_inode)?;
        let block = root.direct[0].ok_or(Error::CorruptState("missing root directory"))?;
        Ok((root, block))
    }

    pub(crate) fn load_directory(&mut self) -> Result<Directory> {
        let (_, block) = self.directory_location()?;
        Directory::decode(&self.load_block(block)?.data)
    }

    /// Rewrite the whole directory block and record the payload length on the root inode
    fn flush_directory(&mut self, directory: &Directory) -> Result<()> {
        let payload = directory.encode(self.superblock.block_size)?;
        let (mut root, index) = self.directory_location()?;
        let mut block = Block::empty(index, self.superblock.block_size);
        block.write_bytes(0, &payload)?;
        self.flush_block(&block)?;
        root.size = payload.len() as u64;
        root.modified = timestamp_now();
        self.update_inode(&root)
    }

    pub fn resolve(&mut self, name: &str) -> Result<Option<u32>> {
        Ok(self.load_directory()?.resolve(name))
    }

    pub fn add_entry(&mut self, name: &str, inode: u32) -> Result<()> {
        let mut directory = self.load_directory()?;
        directory.add(name, inode)?;
        self.flush_directory(&directory)?;
        debug!("Added directory entry {name:?} for inode {inode}");
        Ok(())
    }

    pub fn remove_entry(&mut self, name: &str) -> Result<()> {
        let mut directory = self.load_directory()?;
        let inode = directory.remove(name)?;
        self.flush_directory(&directory)?;
        debug!("Removed directory entry {name:?} for inode {inode}");
        Ok(())
    }

    pub fn list_entries(&mut self) -> Result<Vec<DirectoryEntry>> {
        Ok(self.load_directory()?.entries)
    }
}
