//! TEAM_202: Inode Implementation
//!
//! The inode is the core abstraction for files, directories, and other
//! filesystem objects in the VFS.
//!
//! TEAM_470: The operation tables are published through `RcuCell`s so that a
//! stacked layer can swap them while other CPUs are dispatching through them.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::any::Any;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use los_utils::{Mutex, RcuCell};

use super::mode::{self, FileKind};
use super::ops::{AddressSpaceOperations, FileOperations, InodeOperations};
use super::page::AddressSpace;

/// TEAM_202: Reference to an inode
pub type InodeRef = Arc<Inode>;

/// TEAM_470: The three tables an inode is created with
#[derive(Clone)]
pub struct InodeTables {
    pub i_op: Arc<InodeOperations>,
    pub i_fop: Arc<FileOperations>,
    pub a_ops: Arc<AddressSpaceOperations>,
}

/// TEAM_202: Inode - in-memory representation of a file/directory
pub struct Inode {
    /// Unique identifier within the filesystem
    pub ino: u64,
    /// File type and permissions (S_IFMT | mode bits)
    pub mode: AtomicU32,
    /// Number of hard links
    pub nlink: AtomicU32,
    /// Owner user ID
    pub uid: AtomicU32,
    /// Owner group ID
    pub gid: AtomicU32,
    /// Device ID (for block/char devices)
    pub rdev: u64,
    /// Size in bytes
    pub size: AtomicU64,
    /// Access time
    pub atime: AtomicU64,
    /// Modification time
    pub mtime: AtomicU64,
    /// Status change time
    pub ctime: AtomicU64,
    /// Live inode operations
    pub i_op: RcuCell<InodeOperations>,
    /// Live file operations for opens of this inode
    pub i_fop: RcuCell<FileOperations>,
    /// Page cache and its operations
    pub i_mapping: AddressSpace,
    /// Serializes swaps of the live tables
    pub i_lock: Mutex<()>,
    /// Filesystem-specific private data
    pub private: Box<dyn Any + Send + Sync>,
}

impl Inode {
    /// TEAM_202: Create a new inode
    pub fn new(
        ino: u64,
        mode: u32,
        rdev: u64,
        tables: InodeTables,
        private: Box<dyn Any + Send + Sync>,
    ) -> Self {
        Self {
            ino,
            mode: AtomicU32::new(mode),
            nlink: AtomicU32::new(1),
            uid: AtomicU32::new(0),
            gid: AtomicU32::new(0),
            rdev,
            size: AtomicU64::new(0),
            atime: AtomicU64::new(0),
            mtime: AtomicU64::new(0),
            ctime: AtomicU64::new(0),
            i_op: RcuCell::new(tables.i_op),
            i_fop: RcuCell::new(tables.i_fop),
            i_mapping: AddressSpace::new(tables.a_ops),
            i_lock: Mutex::new(()),
            private,
        }
    }

    /// TEAM_470: Kind from the type bits, `None` for a corrupt mode
    pub fn kind(&self) -> Option<FileKind> {
        FileKind::from_mode(self.mode.load(Ordering::Relaxed))
    }

    /// TEAM_202: Check if this is a regular file
    pub fn is_file(&self) -> bool {
        self.kind() == Some(FileKind::Regular)
    }

    /// TEAM_202: Check if this is a directory
    pub fn is_dir(&self) -> bool {
        self.kind() == Some(FileKind::Directory)
    }

    /// TEAM_202: Get permission bits
    pub fn permissions(&self) -> u32 {
        mode::permissions(self.mode.load(Ordering::Relaxed))
    }

    /// TEAM_470: Current inode operations
    pub fn iop(&self) -> Arc<InodeOperations> {
        self.i_op.load()
    }

    /// TEAM_470: Current file operations
    pub fn fop(&self) -> Arc<FileOperations> {
        self.i_fop.load()
    }

    /// TEAM_202: Update modification time (also updates ctime)
    pub fn touch_mtime(&self) {
        let now = self.mtime.load(Ordering::Relaxed) + 1;
        self.mtime.store(now, Ordering::Relaxed);
        self.ctime.store(now, Ordering::Relaxed);
    }

    /// TEAM_202: Update status change time
    pub fn touch_ctime(&self) {
        self.ctime.fetch_add(1, Ordering::Relaxed);
    }

    /// TEAM_202: Increment link count
    pub fn inc_nlink(&self) {
        self.nlink.fetch_add(1, Ordering::Relaxed);
        self.touch_ctime();
    }

    /// TEAM_202: Decrement link count, returns new count
    pub fn dec_nlink(&self) -> u32 {
        let old = self.nlink.fetch_sub(1, Ordering::Relaxed);
        self.touch_ctime();
        old.saturating_sub(1)
    }

    /// TEAM_202: Get filesystem-specific data
    pub fn private<T: 'static>(&self) -> Option<&T> {
        self.private.downcast_ref::<T>()
    }
}

impl core::fmt::Debug for Inode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Inode")
            .field("ino", &self.ino)
            .field("mode", &self.mode.load(Ordering::Relaxed))
            .field("nlink", &self.nlink.load(Ordering::Relaxed))
            .field("size", &self.size.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
