//! TEAM_202: VFS Error Types
//!
//! TEAM_470: Trimmed to the codes the host VFS and the redirection layer
//! report, plus `NoSys` for directories without a lookup routine.

use core::fmt;

/// TEAM_202: VFS Error codes
///
/// These map to standard POSIX errno values for userspace compatibility.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VfsError {
    /// Operation not permitted (EPERM = 1)
    PermissionDenied,
    /// No such file or directory (ENOENT = 2)
    NotFound,
    /// I/O error (EIO = 5)
    IoError,
    /// Bad file descriptor (EBADF = 9)
    BadFd,
    /// Out of memory (ENOMEM = 12)
    OutOfMemory,
    /// Permission denied (EACCES = 13)
    AccessDenied,
    /// Device or resource busy (EBUSY = 16)
    Busy,
    /// File exists (EEXIST = 17)
    AlreadyExists,
    /// Invalid cross-device link (EXDEV = 18)
    CrossDevice,
    /// Not a directory (ENOTDIR = 20)
    NotADirectory,
    /// Is a directory (EISDIR = 21)
    IsADirectory,
    /// Invalid argument (EINVAL = 22)
    InvalidArgument,
    /// File too large (EFBIG = 27)
    FileTooLarge,
    /// Name too long (ENAMETOOLONG = 36)
    NameTooLong,
    /// Function not implemented (ENOSYS = 38)
    NoSys,
    /// Directory not empty (ENOTEMPTY = 39)
    DirectoryNotEmpty,
    /// No data available (ENODATA = 61)
    NoData,
    /// Operation not supported (EOPNOTSUPP = 95)
    NotSupported,
    /// Stale file handle (ESTALE = 116)
    StaleHandle,
}

impl VfsError {
    /// TEAM_202: Convert to POSIX errno value (negative)
    pub fn to_errno(self) -> i64 {
        match self {
            VfsError::PermissionDenied => -1,
            VfsError::NotFound => -2,
            VfsError::IoError => -5,
            VfsError::BadFd => -9,
            VfsError::OutOfMemory => -12,
            VfsError::AccessDenied => -13,
            VfsError::Busy => -16,
            VfsError::AlreadyExists => -17,
            VfsError::CrossDevice => -18,
            VfsError::NotADirectory => -20,
            VfsError::IsADirectory => -21,
            VfsError::InvalidArgument => -22,
            VfsError::FileTooLarge => -27,
            VfsError::NameTooLong => -36,
            VfsError::NoSys => -38,
            VfsError::DirectoryNotEmpty => -39,
            VfsError::NoData => -61,
            VfsError::NotSupported => -95,
            VfsError::StaleHandle => -116,
        }
    }

    /// TEAM_202: Get error name
    pub fn name(&self) -> &'static str {
        match self {
            VfsError::PermissionDenied => "EPERM",
            VfsError::NotFound => "ENOENT",
            VfsError::IoError => "EIO",
            VfsError::BadFd => "EBADF",
            VfsError::OutOfMemory => "ENOMEM",
            VfsError::AccessDenied => "EACCES",
            VfsError::Busy => "EBUSY",
            VfsError::AlreadyExists => "EEXIST",
            VfsError::CrossDevice => "EXDEV",
            VfsError::NotADirectory => "ENOTDIR",
            VfsError::IsADirectory => "EISDIR",
            VfsError::InvalidArgument => "EINVAL",
            VfsError::FileTooLarge => "EFBIG",
            VfsError::NameTooLong => "ENAMETOOLONG",
            VfsError::NoSys => "ENOSYS",
            VfsError::DirectoryNotEmpty => "ENOTEMPTY",
            VfsError::NoData => "ENODATA",
            VfsError::NotSupported => "EOPNOTSUPP",
            VfsError::StaleHandle => "ESTALE",
        }
    }
}

impl fmt::Display for VfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            VfsError::PermissionDenied => "Operation not permitted",
            VfsError::NotFound => "No such file or directory",
            VfsError::IoError => "I/O error",
            VfsError::BadFd => "Bad file descriptor",
            VfsError::OutOfMemory => "Out of memory",
            VfsError::AccessDenied => "Permission denied",
            VfsError::Busy => "Device or resource busy",
            VfsError::AlreadyExists => "File exists",
            VfsError::CrossDevice => "Invalid cross-device link",
            VfsError::NotADirectory => "Not a directory",
            VfsError::IsADirectory => "Is a directory",
            VfsError::InvalidArgument => "Invalid argument",
            VfsError::FileTooLarge => "File too large",
            VfsError::NameTooLong => "File name too long",
            VfsError::NoSys => "Function not implemented",
            VfsError::DirectoryNotEmpty => "Directory not empty",
            VfsError::NoData => "No data available",
            VfsError::NotSupported => "Operation not supported",
            VfsError::StaleHandle => "Stale file handle",
        };
        write!(f, "{} ({})", msg, self.name())
    }
}

impl core::error::Error for VfsError {}

/// TEAM_202: Result type for VFS operations
pub type VfsResult<T> = Result<T, VfsError>;
