//! Block-device filesystem simulated inside a single flat disk image.
//!
//! The image starts with a superblock, followed by the inode table, the block
//! allocation bitmap and the data region. Files live in one flat directory
//! whose entries are kept in a single data block.

mod error;
pub mod fileio;
pub mod filesystem;
pub mod structs;

pub use error::{Error, Result};
pub use fileio::{Fd, Metadata, OpenMode, Whence};
pub use filesystem::{BlockDevice, Filesystem, Session};
pub use structs::{FileKind, Geometry, Inode, Superblock};
