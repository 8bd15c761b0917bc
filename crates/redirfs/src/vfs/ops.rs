//! TEAM_202: VFS Operation Tables
//!
//! TEAM_470: Operations are plain function-pointer tables so that a table can
//! be copied, patched slot by slot and swapped under a reader without the
//! filesystem noticing. Fallback routines used when a slot is empty live here
//! as well.

use alloc::string::String;
use alloc::sync::Arc;
use core::any::Any;
use core::fmt;
use core::sync::atomic::Ordering;

use bitflags::bitflags;

use super::dentry::DentryRef;
use super::error::{VfsError, VfsResult};
use super::file::FileRef;
use super::inode::{Inode, InodeRef};
use super::mode;
use super::page::{PageRef, WritebackControl};

/// TEAM_470: Opaque owner carried by an interposed slot.
pub type OwnerTag = Arc<dyn Any + Send + Sync>;

/// TEAM_470: A table slot that can mark the table as belonging to an interposer.
///
/// `Interposed` carries the object that owns the table, so a reader that finds
/// it can recover the owner without any side index.
#[derive(Clone)]
pub enum Slot<F: Copy> {
    /// Routine installed by the filesystem itself
    Fs(F),
    /// Routine installed by a layer stacked on top of the filesystem
    Interposed { route: F, owner: OwnerTag },
}

impl<F: Copy> Slot<F> {
    /// TEAM_470: The routine to call, whoever installed it.
    pub fn routine(&self) -> F {
        match self {
            Slot::Fs(f) | Slot::Interposed { route: f, .. } => *f,
        }
    }

    /// TEAM_470: Owner of an interposed slot.
    pub fn owner(&self) -> Option<&OwnerTag> {
        match self {
            Slot::Fs(_) => None,
            Slot::Interposed { owner, .. } => Some(owner),
        }
    }
}

impl<F: Copy> fmt::Debug for Slot<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Fs(_) => f.write_str("Slot::Fs"),
            Slot::Interposed { .. } => f.write_str("Slot::Interposed"),
        }
    }
}

bitflags! {
    /// TEAM_470: Access mask passed to permission checks
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct MayMask: u32 {
        const EXEC = 0x1;
        const WRITE = 0x2;
        const READ = 0x4;
        const APPEND = 0x8;
    }
}

/// TEAM_202: Attributes that can be set on an inode
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SetAttr {
    /// New mode (permissions), if Some
    pub mode: Option<u32>,
    /// New owner UID, if Some
    pub uid: Option<u32>,
    /// New owner GID, if Some
    pub gid: Option<u32>,
    /// New size (for truncate), if Some
    pub size: Option<u64>,
    /// New access time, if Some
    pub atime: Option<u64>,
    /// New modification time, if Some
    pub mtime: Option<u64>,
}

// ============================================================================
// Inode Operations
// ============================================================================

pub type LookupFn = fn(&InodeRef, &DentryRef) -> VfsResult<Option<DentryRef>>;
pub type CreateFn = fn(&InodeRef, &DentryRef, u32) -> VfsResult<()>;
pub type MkdirFn = fn(&InodeRef, &DentryRef, u32) -> VfsResult<()>;
pub type MknodFn = fn(&InodeRef, &DentryRef, u32, u64) -> VfsResult<()>;
pub type SymlinkFn = fn(&InodeRef, &DentryRef, &str) -> VfsResult<()>;
pub type LinkFn = fn(&DentryRef, &InodeRef, &DentryRef) -> VfsResult<()>;
pub type UnlinkFn = fn(&InodeRef, &DentryRef) -> VfsResult<()>;
pub type RmdirFn = fn(&InodeRef, &DentryRef) -> VfsResult<()>;
pub type PermissionFn = fn(&InodeRef, MayMask) -> VfsResult<()>;
pub type SetattrFn = fn(&DentryRef, &SetAttr) -> VfsResult<()>;
pub type ReadlinkFn = fn(&InodeRef) -> VfsResult<String>;

/// TEAM_470: Inode operation table
///
/// Directory slots take the parent inode and the child dentry; a successful
/// create-like call instantiates the dentry. Empty slots fall back to the
/// caller's default.
#[derive(Clone, Default)]
pub struct InodeOperations {
    pub lookup: Option<Slot<LookupFn>>,
    pub create: Option<CreateFn>,
    pub mkdir: Option<MkdirFn>,
    pub mknod: Option<MknodFn>,
    pub symlink: Option<SymlinkFn>,
    pub link: Option<LinkFn>,
    pub unlink: Option<UnlinkFn>,
    pub rmdir: Option<RmdirFn>,
    pub permission: Option<PermissionFn>,
    pub setattr: Option<SetattrFn>,
    pub readlink: Option<ReadlinkFn>,
}

// ============================================================================
// File / Address Space Operations
// ============================================================================

pub type FileReadFn = fn(&FileRef, &mut [u8]) -> VfsResult<usize>;
pub type FileWriteFn = fn(&FileRef, &[u8]) -> VfsResult<usize>;
pub type FsyncFn = fn(&FileRef) -> VfsResult<()>;

/// TEAM_202: Open file operations
#[derive(Clone, Default)]
pub struct FileOperations {
    pub read: Option<FileReadFn>,
    pub write: Option<FileWriteFn>,
    pub fsync: Option<FsyncFn>,
}

pub type ReadpageFn = fn(Option<&FileRef>, &PageRef) -> VfsResult<()>;
pub type WritepageFn = fn(&PageRef, &WritebackControl) -> VfsResult<()>;

/// TEAM_470: Page cache fill and writeback
#[derive(Clone, Default)]
pub struct AddressSpaceOperations {
    pub readpage: Option<ReadpageFn>,
    pub writepage: Option<WritepageFn>,
}

// ============================================================================
// Dentry Operations
// ============================================================================

pub type RevalidateFn = fn(&DentryRef) -> VfsResult<bool>;
/// Receives the reference the dentry held on its inode.
pub type IputFn = fn(&DentryRef, InodeRef);
pub type ReleaseFn = fn(&DentryRef);

/// TEAM_470: Dentry operation table
#[derive(Clone, Default)]
pub struct DentryOperations {
    pub d_revalidate: Option<RevalidateFn>,
    pub d_iput: Option<Slot<IputFn>>,
    pub d_release: Option<ReleaseFn>,
}

// ============================================================================
// Fallbacks
// ============================================================================

/// TEAM_470: Mode-bit permission check for filesystems without their own.
///
/// The host has a single principal, so only the owner bits apply. Bits outside
/// read/write/exec are ignored.
pub fn generic_permission(inode: &Inode, mask: MayMask) -> VfsResult<()> {
    let perms = inode.permissions();
    let needed = [
        (MayMask::READ, mode::S_IRUSR),
        (MayMask::WRITE, mode::S_IWUSR),
        (MayMask::EXEC, mode::S_IXUSR),
    ];
    for (want, bit) in needed {
        if mask.contains(want) && perms & bit == 0 {
            return Err(VfsError::AccessDenied);
        }
    }
    Ok(())
}

/// TEAM_470: Apply `attr` straight to the in-memory inode.
pub fn inode_setattr(inode: &Inode, attr: &SetAttr) -> VfsResult<()> {
    if let Some(size) = attr.size {
        if inode.is_dir() {
            return Err(VfsError::IsADirectory);
        }
        inode.size.store(size, Ordering::Relaxed);
        inode.i_mapping.truncate(size);
    }
    if let Some(perms) = attr.mode {
        let old = inode.mode.load(Ordering::Relaxed);
        inode
            .mode
            .store(mode::make_mode(mode::file_type(old), perms), Ordering::Relaxed);
    }
    if let Some(uid) = attr.uid {
        inode.uid.store(uid, Ordering::Relaxed);
    }
    if let Some(gid) = attr.gid {
        inode.gid.store(gid, Ordering::Relaxed);
    }
    if let Some(atime) = attr.atime {
        inode.atime.store(atime, Ordering::Relaxed);
    }
    if let Some(mtime) = attr.mtime {
        inode.mtime.store(mtime, Ordering::Relaxed);
    }
    inode.touch_ctime();
    Ok(())
}
