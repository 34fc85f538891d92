use std::fmt::Display;

#[derive(Debug)]
pub enum Error {
    /// Operation issued before a disk image was mounted
    NotMounted,
    /// Block or inode number outside valid bounds
    OutOfRange,
    NoFreeBlocks,
    NoFreeInodes,
    /// Unknown file name or descriptor
    NotFound,
    AlreadyExists,
    /// Directory used where a regular file is expected, or vice versa
    TypeMismatch,
    /// Descriptor mode forbids the requested operation
    PermissionDenied,
    InvalidArgument(&'static str),
    /// Initialization parameters produce an inconsistent region layout
    LayoutError(&'static str),
    /// On-disk data failed to decode or validate
    CorruptState(&'static str),
    Io(std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotMounted => write!(f, "disk not mounted"),
            Self::OutOfRange => write!(f, "out of range"),
            Self::NoFreeBlocks => write!(f, "no free blocks"),
            Self::NoFreeInodes => write!(f, "no free inodes"),
            Self::NotFound => write!(f, "not found"),
            Self::AlreadyExists => write!(f, "already exists"),
            Self::TypeMismatch => write!(f, "file type mismatch"),
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::InvalidArgument(reason) => write!(f, "invalid argument: {reason}"),
            Self::LayoutError(reason) => write!(f, "layout error: {reason}"),
            Self::CorruptState(reason) => write!(f, "corrupt state: {reason}"),
            Self::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(_: serde_json::Error) -> Self {
        Self::CorruptState("malformed directory payload")
    }
}
