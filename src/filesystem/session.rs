use std::fs::OpenOptions;
use std::path::Path;

use log::info;

use super::{BlockDevice, Filesystem};
use crate::fileio::{Fd, Metadata, OpenMode, Whence};
use crate::structs::{Geometry, Superblock};
use crate::{Error, Result};

/// Mount state of a disk image. Every file operation goes through a session
/// and fails with [`Error::NotMounted`] until an image is mounted
#[derive(Debug, Default)]
pub struct Session {
    mounted: Option<Filesystem>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.is_some()
    }

    /// Create or overwrite an image file with a fresh filesystem. The session is not mounted
    pub fn format<P: AsRef<Path>>(path: P, geometry: &Geometry) -> Result<Superblock> {
        let path = path.as_ref();
        let superblock = Superblock::layout(geometry)?;
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(superblock.total_size)?;
        info!("Creating disk image {}", path.display());
        let fs = Filesystem::format(Box::new(file), geometry)?;
        let superblock = fs.superblock;
        fs.unmount()?;
        Ok(superblock)
    }

    pub fn mount<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        if self.is_mounted() {
            return Err(Error::InvalidArgument("already mounted"));
        }
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        info!("Mounting disk image {}", path.display());
        self.mount_device(Box::new(file))
    }

    /// Mount an image for inspection without ever writing to it
    pub fn mount_read_only<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        if self.is_mounted() {
            return Err(Error::InvalidArgument("already mounted"));
        }
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(false).open(path)?;
        info!("Inspecting disk image {}", path.display());
        self.mounted = Some(Filesystem::mount_read_only(Box::new(file))?);
        Ok(())
    }

    pub fn mount_device(&mut self, device: Box<dyn BlockDevice>) -> Result<()> {
        if self.is_mounted() {
            return Err(Error::InvalidArgument("already mounted"));
        }
        self.mounted = Some(Filesystem::mount(device)?);
        Ok(())
    }

    pub fn unmount(&mut self) -> Result<()> {
        self.mounted.take().ok_or(Error::NotMounted)?.unmount()
    }

    /// Mounted filesystem, for inspection and lower level operations
    pub fn filesystem(&mut self) -> Result<&mut Filesystem> {
        self.mounted.as_mut().ok_or(Error::NotMounted)
    }

    pub fn create(&mut self, name: &str, is_directory: bool) -> Result<u32> {
        self.filesystem()?.create(name, is_directory)
    }

    pub fn delete(&mut self, name: &str) -> Result<()> {
        self.filesystem()?.delete(name)
    }

    pub fn list(&mut self) -> Result<Vec<String>> {
        self.filesystem()?.list()
    }

    pub fn metadata(&mut self, name: &str) -> Result<Metadata> {
        self.filesystem()?.metadata(name)
    }

    pub fn read_whole(&mut self, name: &str) -> Result<Vec<u8>> {
        self.filesystem()?.read_whole(name)
    }

    pub fn write_whole(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.filesystem()?.write_whole(name, data)
    }

    pub fn truncate(&mut self, name: &str) -> Result<()> {
        self.filesystem()?.truncate(name)
    }

    pub fn open(&mut self, name: &str, mode: OpenMode) -> Result<Fd> {
        self.filesystem()?.open(name, mode)
    }

    pub fn close(&mut self, fd: Fd) -> Result<()> {
        self.filesystem()?.close(fd)
    }

    pub fn seek(&mut self, fd: Fd, offset: i64, whence: Whence) -> Result<u64> {
        self.filesystem()?.seek(fd, offset, whence)
    }

    pub fn read(&mut self, fd: Fd, size: usize) -> Result<Vec<u8>> {
        self.filesystem()?.read(fd, size)
    }

    pub fn write(&mut self, fd: Fd, data: &[u8]) -> Result<usize> {
        self.filesystem()?.write(fd, data)
    }
}
