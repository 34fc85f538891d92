use std::collections::BTreeMap;
use std::str::FromStr;

use crate::{Error, Result};

/// Descriptors 0, 1 and 2 are left to the standard streams
pub const FIRST_DESCRIPTOR: u32 = 3;

pub type Fd = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Drops existing content on open
    WriteTruncate,
    /// Cursor starts at the end of the file
    Append,
    ReadWrite,
}

impl OpenMode {
    pub fn can_read(&self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub fn can_write(&self) -> bool {
        !matches!(self, Self::Read)
    }
}

impl FromStr for OpenMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "r" => Ok(Self::Read),
            "w" => Ok(Self::WriteTruncate),
            "a" => Ok(Self::Append),
            "rw" => Ok(Self::ReadWrite),
            _ => Err(Error::InvalidArgument("mode must be one of r, w, a, rw")),
        }
    }
}

/// Reference point of a seek
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

impl TryFrom<u32> for Whence {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::Start),
            1 => Ok(Self::Current),
            2 => Ok(Self::End),
            _ => Err(Error::InvalidArgument("whence must be 0, 1 or 2")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileDescriptor {
    pub inode: u32,
    pub mode: OpenMode,
    pub cursor: u64,
}

/// Open descriptors of a mount session
#[derive(Debug)]
pub struct DescriptorTable {
    entries: BTreeMap<Fd, FileDescriptor>,
    next: Fd,
}

impl Default for DescriptorTable {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            next: FIRST_DESCRIPTOR,
        }
    }
}

impl DescriptorTable {
    /// Register a descriptor under a never reused id
    pub fn insert(&mut self, descriptor: FileDescriptor) -> Fd {
        let fd = self.next;
        self.next += 1;
        self.entries.insert(fd, descriptor);
        fd
    }

    pub fn get(&self, fd: Fd) -> Result<&FileDescriptor> {
        self.entries.get(&fd).ok_or(Error::NotFound)
    }

    pub fn get_mut(&mut self, fd: Fd) -> Result<&mut FileDescriptor> {
        self.entries.get_mut(&fd).ok_or(Error::NotFound)
    }

    pub fn remove(&mut self, fd: Fd) -> Result<FileDescriptor> {
        self.entries.remove(&fd).ok_or(Error::NotFound)
    }

    /// Drop every descriptor bound to an inode, returning how many were closed
    pub fn close_inode(&mut self, inode: u32) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, descriptor| descriptor.inode != inode);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
