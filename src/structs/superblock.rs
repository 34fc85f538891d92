use std::fmt::Display;

use bytemuck::{Pod, Zeroable};

use super::*;
use crate::{Error, Result};

pub const DEFAULT_BLOCK_COUNT: u32 = 2048;
pub const DEFAULT_BLOCK_SIZE: u32 = 512;
pub const DEFAULT_INODE_COUNT: u32 = 256;

/// Bytes covered by the checksum, everything before the checksum field
const CHECKSUMMED_BYTES: usize = std::mem::size_of::<RawSuperblock>() - 4;

/// Parameters used to lay out a fresh disk image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub total_blocks: u32,
    pub block_size: u32,
    pub inode_count: u32,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            total_blocks: DEFAULT_BLOCK_COUNT,
            block_size: DEFAULT_BLOCK_SIZE,
            inode_count: DEFAULT_INODE_COUNT,
        }
    }
}

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct RawSuperblock {
    magic: u32,
    version: u32,
    total_size: u64,
    block_size: u32,
    block_count: u32,
    inode_count: u32,
    inode_table_blocks: u32,
    bitmap_blocks: u32,
    inode_table_start: u32,
    bitmap_start: u32,
    data_start: u32,
    root_inode: u32,
    checksum: u32,
}

impl Superblock {
    /// Size of the encoded record at the start of block 0
    pub const ENCODED_SIZE: usize = std::mem::size_of::<RawSuperblock>();

    /// Compute region layout for a fresh image
    pub fn layout(geometry: &Geometry) -> Result<Self> {
        let Geometry {
            total_blocks,
            block_size,
            inode_count,
        } = *geometry;
        if total_blocks == 0 {
            return Err(Error::LayoutError("image has no blocks"));
        }
        if inode_count == 0 {
            return Err(Error::LayoutError("no room for the root inode"));
        }
        if (block_size as usize) < INODE_RECORD_SIZE.max(Self::ENCODED_SIZE) {
            return Err(Error::LayoutError("block size smaller than an inode record"));
        }
        let inode_table_bytes = inode_count as u64 * INODE_RECORD_SIZE as u64;
        let inode_table_blocks = inode_table_bytes.div_ceil(block_size as u64);
        let bitmap_bytes = (total_blocks as u64).div_ceil(8);
        let bitmap_blocks = bitmap_bytes.div_ceil(block_size as u64);
        let inode_table_start = 1u64;
        let bitmap_start = inode_table_start + inode_table_blocks;
        let data_start = bitmap_start + bitmap_blocks;
        if data_start >= total_blocks as u64 {
            return Err(Error::LayoutError("data region would be empty"));
        }
        Ok(Self {
            magic: MAGIC_SIGNATURE,
            version: FORMAT_VERSION,
            total_size: total_blocks as u64 * block_size as u64,
            block_size,
            block_count: total_blocks,
            inode_count,
            inode_table_blocks: inode_table_blocks as u32,
            bitmap_blocks: bitmap_blocks as u32,
            inode_table_start: inode_table_start as u32,
            bitmap_start: bitmap_start as u32,
            data_start: data_start as u32,
            root_inode: ROOT_INODE,
            checksum: 0,
        })
    }

    /// Serialize into the little-endian on-disk record
    pub fn encode(&self) -> Vec<u8> {
        let raw = RawSuperblock {
            magic: self.magic.to_le(),
            version: self.version.to_le(),
            total_size: self.total_size.to_le(),
            block_size: self.block_size.to_le(),
            block_count: self.block_count.to_le(),
            inode_count: self.inode_count.to_le(),
            inode_table_blocks: self.inode_table_blocks.to_le(),
            bitmap_blocks: self.bitmap_blocks.to_le(),
            inode_table_start: self.inode_table_start.to_le(),
            bitmap_start: self.bitmap_start.to_le(),
            data_start: self.data_start.to_le(),
            root_inode: self.root_inode.to_le(),
            checksum: self.checksum.to_le(),
        };
        bytemuck::bytes_of(&raw).to_vec()
    }

    /// Deserialize from the start of block 0, trailing padding is ignored
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::ENCODED_SIZE {
            return Err(Error::CorruptState("superblock buffer too short"));
        }
        let raw: RawSuperblock = bytemuck::pod_read_unaligned(&bytes[..Self::ENCODED_SIZE]);
        Ok(Self {
            magic: u32::from_le(raw.magic),
            version: u32::from_le(raw.version),
            total_size: u64::from_le(raw.total_size),
            block_size: u32::from_le(raw.block_size),
            block_count: u32::from_le(raw.block_count),
            inode_count: u32::from_le(raw.inode_count),
            inode_table_blocks: u32::from_le(raw.inode_table_blocks),
            bitmap_blocks: u32::from_le(raw.bitmap_blocks),
            inode_table_start: u32::from_le(raw.inode_table_start),
            bitmap_start: u32::from_le(raw.bitmap_start),
            data_start: u32::from_le(raw.data_start),
            root_inode: u32::from_le(raw.root_inode),
            checksum: u32::from_le(raw.checksum),
        })
    }

    /// Checksum over every encoded field preceding the checksum itself
    pub fn compute_checksum(&self) -> u32 {
        self.encode()[..CHECKSUMMED_BYTES]
            .chunks_exact(4)
            .fold(0u32, |acc, word| {
                acc.rotate_left(5) ^ u32::from_le_bytes([word[0], word[1], word[2], word[3]])
            })
    }

    /// Store a fresh checksum
    pub fn seal(&mut self) {
        self.checksum = self.compute_checksum();
    }

    /// Check a superblock read from an existing image
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC_SIGNATURE {
            return Err(Error::CorruptState("bad magic signature"));
        }
        if self.version != FORMAT_VERSION {
            return Err(Error::CorruptState("unsupported format version"));
        }
        if self.checksum != 0 && self.checksum != self.compute_checksum() {
            return Err(Error::CorruptState("superblock checksum mismatch"));
        }
        if self.total_size != self.block_count as u64 * self.block_size as u64 {
            return Err(Error::CorruptState("image size disagrees with block count"));
        }
        let expected = Self::layout(&Geometry {
            total_blocks: self.block_count,
            block_size: self.block_size,
            inode_count: self.inode_count,
        })
        .map_err(|_| Error::CorruptState("inconsistent region layout"))?;
        if (
            expected.inode_table_start,
            expected.inode_table_blocks,
            expected.bitmap_start,
            expected.bitmap_blocks,
            expected.data_start,
        ) != (
            self.inode_table_start,
            self.inode_table_blocks,
            self.bitmap_start,
            self.bitmap_blocks,
            self.data_start,
        ) {
            return Err(Error::CorruptState("inconsistent region layout"));
        }
        if self.root_inode >= self.inode_count {
            return Err(Error::CorruptState("root inode outside inode table"));
        }
        Ok(())
    }

    /// Byte offset of a block inside the image
    pub fn block_position(&self, index: u32) -> Result<u64> {
        if index >= self.block_count {
            return Err(Error::OutOfRange);
        }
        Ok(index as u64 * self.block_size as u64)
    }

    /// Block holding the start of an inode record and the record's offset in it
    pub fn inode_position(&self, index: u32) -> Result<(u32, usize)> {
        if index >= self.inode_count {
            return Err(Error::OutOfRange);
        }
        let offset = index as u64 * INODE_RECORD_SIZE as u64;
        let block = self.inode_table_start as u64 + offset / self.block_size as u64;
        Ok((block as u32, (offset % self.block_size as u64) as usize))
    }

    /// Superblock, inode table and bitmap blocks
    pub fn is_reserved(&self, index: u32) -> bool {
        index < self.data_start
    }

    /// Block pointers that fit in the single indirect block
    pub fn pointers_per_block(&self) -> usize {
        self.block_size as usize / 4
    }

    /// Largest file size addressable through direct and indirect pointers
    pub fn max_file_size(&self) -> u64 {
        (DIRECT_POINTERS + self.pointers_per_block()) as u64 * self.block_size as u64
    }
}

impl Display for Superblock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "magic:        {:#x} (version {})", self.magic, self.version)?;
        writeln!(f, "size:         {} bytes", self.total_size)?;
        writeln!(f, "blocks:       {} x {} bytes", self.block_count, self.block_size)?;
        writeln!(f, "inodes:       {}", self.inode_count)?;
        writeln!(
            f,
            "inode table:  {}..{}",
            self.inode_table_start,
            self.inode_table_start + self.inode_table_blocks
        )?;
        writeln!(
            f,
            "bitmap:       {}..{}",
            self.bitmap_start,
            self.bitmap_start + self.bitmap_blocks
        )?;
        writeln!(f, "data:         {}..{}", self.data_start, self.block_count)?;
        writeln!(f, "root inode:   {}", self.root_inode)?;
        write!(f, "checksum:     {:#010x}", self.checksum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(total_blocks: u32, block_size: u32, inode_count: u32) -> Geometry {
        Geometry {
            total_blocks,
            block_size,
            inode_count,
        }
    }

    #[test]
    fn record_is_packed() {
        assert_eq!(Superblock::ENCODED_SIZE, 56);
    }

    #[test]
    fn default_layout() {
        let sb = Superblock::layout(&Geometry::default()).unwrap();
        assert_eq!(sb.inode_table_start, 1);
        assert_eq!(sb.inode_table_blocks, 64);
        assert_eq!(sb.bitmap_start, 65);
        assert_eq!(sb.bitmap_blocks, 1);
        assert_eq!(sb.data_start, 66);
        assert_eq!(sb.total_size, 2048 * 512);
    }

    #[test]
    fn regions_round_up() {
        let sb = Superblock::layout(&geometry(5000, 256, 3)).unwrap();
        // 3 * 128 bytes of inodes, 625 bytes of bitmap
        assert_eq!(sb.inode_table_blocks, 2);
        assert_eq!(sb.bitmap_blocks, 3);
        assert_eq!(sb.data_start, 6);
    }

    #[test]
    fn rejects_empty_data_region() {
        assert!(matches![
            Superblock::layout(&geometry(16, 256, 64)),
            Err(Error::LayoutError(_))
        ]);
        assert!(matches![
            Superblock::layout(&geometry(128, 64, 4)),
            Err(Error::LayoutError(_))
        ]);
        assert!(matches![
            Superblock::layout(&geometry(128, 256, 0)),
            Err(Error::LayoutError(_))
        ]);
    }

    #[test]
    fn encode_and_decode() {
        let mut sb = Superblock::layout(&geometry(128, 256, 16)).unwrap();
        sb.seal();
        let mut block = sb.encode();
        block.resize(256, 0);
        let decoded = Superblock::decode(&block).unwrap();
        assert_eq!(decoded, sb);
        assert!(decoded.validate().is_ok());
        assert_eq!(&block[0..4], &MAGIC_SIGNATURE.to_le_bytes());
        assert_eq!(&block[8..16], &(128u64 * 256).to_le_bytes());
    }

    #[test]
    fn detects_tampering() {
        let mut sb = Superblock::layout(&geometry(128, 256, 16)).unwrap();
        sb.seal();
        let mut bytes = sb.encode();
        bytes[20] ^= 0xff;
        let tampered = Superblock::decode(&bytes).unwrap();
        assert!(matches![tampered.validate(), Err(Error::CorruptState(_))]);
        assert!(matches![
            Superblock::decode(&bytes[..10]),
            Err(Error::CorruptState(_))
        ]);
    }

    #[test]
    fn inode_positions_straddle() {
        let sb = Superblock::layout(&geometry(64, 192, 8)).unwrap();
        assert_eq!(sb.inode_position(0).unwrap(), (1, 0));
        assert_eq!(sb.inode_position(1).unwrap(), (1, 128));
        assert_eq!(sb.inode_position(2).unwrap(), (2, 64));
        assert!(matches![sb.inode_position(8), Err(Error::OutOfRange)]);
    }
}
