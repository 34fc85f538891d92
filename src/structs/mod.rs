mod bitmap;
mod block;
mod inode;
mod superblock;

pub use superblock::Geometry;

pub const MAGIC_SIGNATURE: u32 = 0x000F_1F51;
pub const FORMAT_VERSION: u32 = 1;
/// Bytes occupied by one serialized inode in the inode table
pub const INODE_RECORD_SIZE: usize = 128;
pub const DIRECT_POINTERS: usize = 10;
/// On-disk encoding of an unset block pointer
pub const NULL_BLOCK: u32 = 0;
pub const ROOT_INODE: u32 = 0;
/// Inode flag marking the slot as in use
pub const INODE_ALLOCATED: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    /// Magic signature
    pub magic: u32,
    /// On-disk format version
    pub version: u32,
    /// Image size in bytes
    pub total_size: u64,
    /// Block size in bytes
    pub block_size: u32,
    /// Total count of blocks in the image
    pub block_count: u32,
    /// Total count of inode slots
    pub inode_count: u32,
    /// Blocks occupied by the inode table
    pub inode_table_blocks: u32,
    /// Blocks occupied by the allocation bitmap
    pub bitmap_blocks: u32,
    pub inode_table_start: u32,
    pub bitmap_start: u32,
    /// First block of the data region
    pub data_start: u32,
    pub root_inode: u32,
    /// Header checksum, zero if not set
    pub checksum: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FileKind {
    #[default]
    File,
    Directory,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Inode {
    /// Inode's slot in the inode table
    pub index: u32,
    /// File type
    pub kind: FileKind,
    /// File size in bytes
    pub size: u64,
    /// Creation timestamp in milliseconds since epoch
    pub created: u64,
    /// Last data modification timestamp in milliseconds since epoch
    pub modified: u64,
    /// Blocks holding the first [`DIRECT_POINTERS`] blocks of file data
    pub direct: [Option<u32>; DIRECT_POINTERS],
    /// Block holding an array of further block pointers
    pub indirect: Option<u32>,
    pub flags: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Block's index
    pub index: u32,
    /// Raw data as bytes
    pub data: Vec<u8>,
}

/// One allocation bit per block, bit `i` of byte `i / 8` tracks block `i`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub(crate) bitfield: Vec<u8>,
    /// Number of valid indexes
    pub(crate) count: u32,
}
