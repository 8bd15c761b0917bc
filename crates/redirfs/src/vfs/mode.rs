//! TEAM_201: POSIX File Mode Constants
//!
//! Defines standard POSIX file type and permission bit constants for st_mode.

// ============================================================================
// File Type Constants (high bits of st_mode)
// ============================================================================

/// TEAM_201: Bit mask for extracting file type
pub const S_IFMT: u32 = 0o170000;

/// TEAM_201: Socket
pub const S_IFSOCK: u32 = 0o140000;

/// TEAM_201: Symbolic link
pub const S_IFLNK: u32 = 0o120000;

/// TEAM_201: Regular file
pub const S_IFREG: u32 = 0o100000;

/// TEAM_201: Block device
pub const S_IFBLK: u32 = 0o060000;

/// TEAM_201: Directory
pub const S_IFDIR: u32 = 0o040000;

/// TEAM_201: Character device
pub const S_IFCHR: u32 = 0o020000;

/// TEAM_201: FIFO (named pipe)
pub const S_IFIFO: u32 = 0o010000;

// ============================================================================
// Permission Bits (low bits of st_mode)
// ============================================================================

/// TEAM_201: Owner read permission
pub const S_IRUSR: u32 = 0o0400;

/// TEAM_201: Owner write permission
pub const S_IWUSR: u32 = 0o0200;

/// TEAM_201: Owner execute permission
pub const S_IXUSR: u32 = 0o0100;

// ============================================================================
// Helper Functions
// ============================================================================

/// TEAM_201: Extract just the file type from mode
#[inline]
pub const fn file_type(mode: u32) -> u32 {
    mode & S_IFMT
}

/// TEAM_201: Extract just the permission bits from mode
#[inline]
pub const fn permissions(mode: u32) -> u32 {
    mode & 0o7777
}

/// TEAM_201: Create a mode with file type and permissions
#[inline]
pub const fn make_mode(file_type: u32, perms: u32) -> u32 {
    (file_type & S_IFMT) | (perms & 0o7777)
}

/// TEAM_470: The seven inode kinds an operation table can serve.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
}

impl FileKind {
    /// TEAM_470: Classify a mode; `None` when the type bits name no known kind.
    pub const fn from_mode(mode: u32) -> Option<Self> {
        match file_type(mode) {
            S_IFREG => Some(Self::Regular),
            S_IFDIR => Some(Self::Directory),
            S_IFLNK => Some(Self::Symlink),
            S_IFCHR => Some(Self::CharDevice),
            S_IFBLK => Some(Self::BlockDevice),
            S_IFIFO => Some(Self::Fifo),
            S_IFSOCK => Some(Self::Socket),
            _ => None,
        }
    }

    /// TEAM_470: Type bits for this kind
    pub const fn type_bits(self) -> u32 {
        match self {
            Self::Regular => S_IFREG,
            Self::Directory => S_IFDIR,
            Self::Symlink => S_IFLNK,
            Self::CharDevice => S_IFCHR,
            Self::BlockDevice => S_IFBLK,
            Self::Fifo => S_IFIFO,
            Self::Socket => S_IFSOCK,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_mode() {
        for kind in [
            FileKind::Regular,
            FileKind::Directory,
            FileKind::Symlink,
            FileKind::CharDevice,
            FileKind::BlockDevice,
            FileKind::Fifo,
            FileKind::Socket,
        ] {
            assert_eq!(FileKind::from_mode(make_mode(kind.type_bits(), 0o644)), Some(kind));
        }
        assert_eq!(FileKind::from_mode(0o644), None);
    }
}
