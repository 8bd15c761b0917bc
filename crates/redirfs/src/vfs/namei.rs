//! TEAM_202: VFS Dispatch Layer
//!
//! High-level VFS operations. These handle name resolution, permission
//! checks, and dispatch to whatever table is live on the inode right now,
//! which may be a filesystem's own table or a stacked layer's copy.

use alloc::string::String;

use super::dentry::{self, Dentry, DentryRef};
use super::error::{VfsError, VfsResult};
use super::inode::InodeRef;
use super::mode::{self, FileKind};
use super::ops::{MayMask, SetAttr, Slot, generic_permission, inode_setattr};

/// TEAM_470: Longest single path component
pub const NAME_MAX: usize = 255;

fn check_name(name: &str) -> VfsResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(VfsError::InvalidArgument);
    }
    if name.len() > NAME_MAX {
        return Err(VfsError::NameTooLong);
    }
    Ok(())
}

fn dir_inode(parent: &DentryRef) -> VfsResult<InodeRef> {
    let dir = parent.inode().ok_or(VfsError::NotFound)?;
    if !dir.is_dir() {
        return Err(VfsError::NotADirectory);
    }
    Ok(dir)
}

/// TEAM_470: Check `mask` against the inode through its live table
pub fn vfs_permission(inode: &InodeRef, mask: MayMask) -> VfsResult<()> {
    match inode.iop().permission {
        Some(permission) => permission(inode, mask),
        None => generic_permission(inode, mask),
    }
}

/// TEAM_470: Change attributes of the inode behind `dentry`
pub fn vfs_setattr(dentry: &DentryRef, attr: &SetAttr) -> VfsResult<()> {
    let inode = dentry.inode().ok_or(VfsError::NotFound)?;
    match inode.iop().setattr {
        Some(setattr) => setattr(dentry, attr),
        None => inode_setattr(&inode, attr),
    }
}

/// TEAM_470: Resolve one component below `parent`.
///
/// A cached child is revalidated first; a stale one is dropped and looked up
/// again. The result may be negative. If the filesystem hands back an alias
/// the alias is cached instead of the fresh dentry.
pub fn lookup_one(parent: &DentryRef, name: &str) -> VfsResult<DentryRef> {
    check_name(name)?;
    let dir = dir_inode(parent)?;
    vfs_permission(&dir, MayMask::EXEC)?;

    if let Some(cached) = parent.lookup_child(name) {
        if dentry::d_revalidate(&cached)? {
            return Ok(cached);
        }
        log::debug!("vfs: dropping stale dentry {}", cached.path());
        dentry::d_invalidate(&cached);
    }

    let lookup = dir.iop().lookup.as_ref().map(Slot::routine);
    let lookup = lookup.ok_or(VfsError::NotADirectory)?;

    let fresh = Dentry::alloc(parent, name);
    let found = lookup(&dir, &fresh)?.unwrap_or(fresh);
    parent.add_child(found.clone());
    Ok(found)
}

/// TEAM_202: Resolve a path relative to `root`; `..` stops at `root`
pub fn resolve(root: &DentryRef, path: &str) -> VfsResult<DentryRef> {
    let mut current = root.clone();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if let Some(parent) = current.parent() {
                    current = parent;
                }
            }
            name => {
                if current.is_negative() {
                    return Err(VfsError::NotFound);
                }
                current = lookup_one(&current, name)?;
            }
        }
    }
    Ok(current)
}

/// TEAM_470: Look up `name` for creation: it must not exist yet and the
/// directory must be writable.
fn lookup_create(parent: &DentryRef, name: &str) -> VfsResult<(InodeRef, DentryRef)> {
    let dentry = lookup_one(parent, name)?;
    if !dentry.is_negative() {
        return Err(VfsError::AlreadyExists);
    }
    let dir = dir_inode(parent)?;
    vfs_permission(&dir, MayMask::WRITE | MayMask::EXEC)?;
    Ok((dir, dentry))
}

/// TEAM_470: Look up an existing `name` for removal
fn lookup_remove(parent: &DentryRef, name: &str) -> VfsResult<(InodeRef, DentryRef, InodeRef)> {
    let dentry = lookup_one(parent, name)?;
    let victim = dentry.inode().ok_or(VfsError::NotFound)?;
    let dir = dir_inode(parent)?;
    vfs_permission(&dir, MayMask::WRITE | MayMask::EXEC)?;
    Ok((dir, dentry, victim))
}

/// TEAM_202: Create a regular file
pub fn vfs_create(parent: &DentryRef, name: &str, perms: u32) -> VfsResult<DentryRef> {
    let (dir, dentry) = lookup_create(parent, name)?;
    let create = dir.iop().create.ok_or(VfsError::AccessDenied)?;
    create(&dir, &dentry, mode::make_mode(mode::S_IFREG, perms))?;
    Ok(dentry)
}

/// TEAM_202: Create a directory
pub fn vfs_mkdir(parent: &DentryRef, name: &str, perms: u32) -> VfsResult<DentryRef> {
    let (dir, dentry) = lookup_create(parent, name)?;
    let mkdir = dir.iop().mkdir.ok_or(VfsError::PermissionDenied)?;
    mkdir(&dir, &dentry, mode::make_mode(mode::S_IFDIR, perms))?;
    Ok(dentry)
}

/// TEAM_470: Create a device node, FIFO or socket
pub fn vfs_mknod(parent: &DentryRef, name: &str, mode: u32, rdev: u64) -> VfsResult<DentryRef> {
    match FileKind::from_mode(mode) {
        Some(
            FileKind::Regular
            | FileKind::CharDevice
            | FileKind::BlockDevice
            | FileKind::Fifo
            | FileKind::Socket,
        ) => {}
        Some(FileKind::Directory | FileKind::Symlink) | None => {
            return Err(VfsError::InvalidArgument);
        }
    }
    let (dir, dentry) = lookup_create(parent, name)?;
    let mknod = dir.iop().mknod.ok_or(VfsError::PermissionDenied)?;
    mknod(&dir, &dentry, mode, rdev)?;
    Ok(dentry)
}

/// TEAM_202: Create a symbolic link
pub fn vfs_symlink(parent: &DentryRef, name: &str, target: &str) -> VfsResult<DentryRef> {
    let (dir, dentry) = lookup_create(parent, name)?;
    let symlink = dir.iop().symlink.ok_or(VfsError::PermissionDenied)?;
    symlink(&dir, &dentry, target)?;
    Ok(dentry)
}

/// TEAM_470: Create a hard link to `old` named `name` below `parent`
pub fn vfs_link(old: &DentryRef, parent: &DentryRef, name: &str) -> VfsResult<DentryRef> {
    let target = old.inode().ok_or(VfsError::NotFound)?;
    if target.is_dir() {
        return Err(VfsError::PermissionDenied);
    }
    let (dir, dentry) = lookup_create(parent, name)?;
    let link = dir.iop().link.ok_or(VfsError::PermissionDenied)?;
    link(old, &dir, &dentry)?;
    Ok(dentry)
}

/// TEAM_202: Remove a non-directory entry
pub fn vfs_unlink(parent: &DentryRef, name: &str) -> VfsResult<()> {
    let (dir, dentry, victim) = lookup_remove(parent, name)?;
    if victim.is_dir() {
        return Err(VfsError::IsADirectory);
    }
    let unlink = dir.iop().unlink.ok_or(VfsError::PermissionDenied)?;
    unlink(&dir, &dentry)?;
    dentry::d_delete(&dentry);
    Ok(())
}

/// TEAM_202: Remove an empty directory
pub fn vfs_rmdir(parent: &DentryRef, name: &str) -> VfsResult<()> {
    let (dir, dentry, victim) = lookup_remove(parent, name)?;
    if !victim.is_dir() {
        return Err(VfsError::NotADirectory);
    }
    let rmdir = dir.iop().rmdir.ok_or(VfsError::PermissionDenied)?;
    rmdir(&dir, &dentry)?;
    dentry::d_delete(&dentry);
    Ok(())
}

/// TEAM_202: Read the target of a symbolic link
pub fn vfs_readlink(dentry: &DentryRef) -> VfsResult<String> {
    let inode = dentry.inode().ok_or(VfsError::NotFound)?;
    let readlink = inode.iop().readlink.ok_or(VfsError::InvalidArgument)?;
    readlink(&inode)
}
