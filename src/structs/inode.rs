use std::fmt::Display;

use bytemuck::{Pod, Zeroable};

use super::*;
use crate::{Error, Result};

const KIND_FILE: u8 = 0;
const KIND_DIRECTORY: u8 = 1;

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct RawInode {
    index: u32,
    kind: u8,
    __padding_1: [u8; 3],
    size: u64,
    created: u64,
    modified: u64,
    direct: [u32; DIRECT_POINTERS],
    indirect: u32,
    flags: u32,
    __padding_2: [u8; 48],
}

impl Inode {
    /// Fresh in-use inode for a slot
    pub fn new(index: u32, kind: FileKind, now: u64) -> Self {
        Self {
            index,
            kind,
            created: now,
            modified: now,
            flags: INODE_ALLOCATED,
            ..Default::default()
        }
    }

    pub fn is_allocated(&self) -> bool {
        self.flags & INODE_ALLOCATED != 0
    }

    /// Serialize into a fixed-size little-endian inode record
    pub fn encode(&self) -> Vec<u8> {
        let mut direct = [NULL_BLOCK; DIRECT_POINTERS];
        for (slot, pointer) in direct.iter_mut().zip(self.direct.iter()) {
            *slot = pointer.unwrap_or(NULL_BLOCK).to_le();
        }
        let raw = RawInode {
            index: self.index.to_le(),
            kind: match self.kind {
                FileKind::File => KIND_FILE,
                FileKind::Directory => KIND_DIRECTORY,
            },
            __padding_1: [0; 3],
            size: self.size.to_le(),
            created: self.created.to_le(),
            modified: self.modified.to_le(),
            direct,
            indirect: self.indirect.unwrap_or(NULL_BLOCK).to_le(),
            flags: self.flags.to_le(),
            __padding_2: [0; 48],
        };
        bytemuck::bytes_of(&raw).to_vec()
    }

    /// Deserialize an inode record, buffer must be exactly one record long
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != INODE_RECORD_SIZE {
            return Err(Error::CorruptState("inode record has wrong size"));
        }
        let raw: RawInode = bytemuck::pod_read_unaligned(bytes);
        let kind = match raw.kind {
            KIND_FILE => FileKind::File,
            KIND_DIRECTORY => FileKind::Directory,
            _ => return Err(Error::CorruptState("unknown inode kind")),
        };
        let mut direct = [None; DIRECT_POINTERS];
        for (slot, pointer) in direct.iter_mut().zip(raw.direct.iter()) {
            *slot = pointer_from_disk(*pointer);
        }
        Ok(Self {
            index: u32::from_le(raw.index),
            kind,
            size: u64::from_le(raw.size),
            created: u64::from_le(raw.created),
            modified: u64::from_le(raw.modified),
            direct,
            indirect: pointer_from_disk(raw.indirect),
            flags: u32::from_le(raw.flags),
        })
    }

    /// Every block pointer held directly by the inode
    pub fn pointers(&self) -> impl Iterator<Item = u32> + '_ {
        self.direct.iter().chain(Some(&self.indirect)).flatten().copied()
    }
}

fn pointer_from_disk(raw: u32) -> Option<u32> {
    match u32::from_le(raw) {
        NULL_BLOCK => None,
        block => Some(block),
    }
}

impl Display for Inode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "inode:    {}", self.index)?;
        writeln!(f, "in use:   {}", self.is_allocated())?;
        writeln!(f, "kind:     {:?}", self.kind)?;
        writeln!(f, "size:     {}", self.size)?;
        writeln!(f, "created:  {}", self.created)?;
        writeln!(f, "modified: {}", self.modified)?;
        write!(f, "direct:  ")?;
        for pointer in self.direct {
            match pointer {
                Some(block) => write!(f, " {block}")?,
                None => write!(f, " -")?,
            }
        }
        writeln!(f)?;
        match self.indirect {
            Some(block) => write!(f, "indirect: {block}"),
            None => write!(f, "indirect: -"),
        }
    }
}
