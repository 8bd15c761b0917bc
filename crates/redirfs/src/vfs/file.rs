//! TEAM_202: File (Open File Handle) Implementation
//!
//! A File represents an open file descriptor, containing the inode
//! reference, current offset, and open flags.
//!
//! TEAM_470: Regular file data moves through the page cache, so reads and
//! writes reach the filesystem only via `readpage` and `writepage`.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use super::dentry::DentryRef;
use super::error::{VfsError, VfsResult};
use super::inode::InodeRef;
use super::page::{self, PAGE_SIZE, PageFlags, WritebackControl};

/// TEAM_202: Reference to an open file
pub type FileRef = Arc<File>;

/// TEAM_202: Open file flags
#[derive(Clone, Copy, Debug)]
pub struct OpenFlags(u32);

impl OpenFlags {
    // Access modes (mutually exclusive)
    pub const O_RDONLY: u32 = 0;
    pub const O_WRONLY: u32 = 1;
    pub const O_RDWR: u32 = 2;
    pub const O_ACCMODE: u32 = 3;

    // File status flags
    pub const O_APPEND: u32 = 0o2000;

    pub const fn new(flags: u32) -> Self {
        Self(flags)
    }

    pub fn access_mode(&self) -> u32 {
        self.0 & Self::O_ACCMODE
    }

    pub fn is_readable(&self) -> bool {
        let mode = self.access_mode();
        mode == Self::O_RDONLY || mode == Self::O_RDWR
    }

    pub fn is_writable(&self) -> bool {
        let mode = self.access_mode();
        mode == Self::O_WRONLY || mode == Self::O_RDWR
    }

    pub fn is_append(&self) -> bool {
        self.0 & Self::O_APPEND != 0
    }
}

/// TEAM_202: Open file handle
pub struct File {
    /// Dentry the file was opened through
    pub dentry: DentryRef,
    /// The inode this file refers to
    pub inode: InodeRef,
    /// Current file offset
    pub offset: AtomicU64,
    /// Open flags
    pub flags: OpenFlags,
}

impl File {
    /// TEAM_470: Open the inode behind `dentry`
    pub fn open(dentry: &DentryRef, flags: OpenFlags) -> VfsResult<FileRef> {
        let inode = dentry.inode().ok_or(VfsError::NotFound)?;
        if inode.is_dir() && flags.is_writable() {
            return Err(VfsError::IsADirectory);
        }
        Ok(Arc::new(Self {
            dentry: dentry.clone(),
            inode,
            offset: AtomicU64::new(0),
            flags,
        }))
    }
}

impl core::fmt::Debug for File {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("File")
            .field("ino", &self.inode.ino)
            .field("offset", &self.offset.load(Ordering::Relaxed))
            .field("flags", &self.flags)
            .finish()
    }
}

// ============================================================================
// Dispatch through the live file operations
// ============================================================================

pub fn vfs_read(file: &FileRef, buf: &mut [u8]) -> VfsResult<usize> {
    if !file.flags.is_readable() {
        return Err(VfsError::BadFd);
    }
    let read = file.inode.fop().read.ok_or(VfsError::InvalidArgument)?;
    read(file, buf)
}

pub fn vfs_write(file: &FileRef, buf: &[u8]) -> VfsResult<usize> {
    if !file.flags.is_writable() {
        return Err(VfsError::BadFd);
    }
    let write = file.inode.fop().write.ok_or(VfsError::InvalidArgument)?;
    write(file, buf)
}

pub fn vfs_fsync(file: &FileRef) -> VfsResult<()> {
    match file.inode.fop().fsync {
        Some(fsync) => fsync(file),
        None => Ok(()),
    }
}

// ============================================================================
// Generic page-cache backed implementations
// ============================================================================

/// TEAM_470: Read at the file offset through the page cache
pub fn generic_file_read(file: &FileRef, buf: &mut [u8]) -> VfsResult<usize> {
    let inode = &file.inode;
    let size = inode.size.load(Ordering::Relaxed);
    let mut pos = file.offset.load(Ordering::Relaxed);
    let mut done = 0;

    while done < buf.len() && pos < size {
        let index = pos / PAGE_SIZE as u64;
        let in_page = (pos % PAGE_SIZE as u64) as usize;
        let page = page::read_cache_page(inode, Some(file), index)?;

        let left_in_file = (size - pos) as usize;
        let n = (PAGE_SIZE - in_page)
            .min(buf.len() - done)
            .min(left_in_file);
        buf[done..done + n].copy_from_slice(&page.data()[in_page..in_page + n]);
        done += n;
        pos += n as u64;
    }

    file.offset.store(pos, Ordering::Relaxed);
    inode.atime.fetch_add(1, Ordering::Relaxed);
    Ok(done)
}

/// TEAM_470: Write at the file offset into the page cache, marking pages dirty
pub fn generic_file_write(file: &FileRef, buf: &[u8]) -> VfsResult<usize> {
    let inode = &file.inode;
    let mut pos = if file.flags.is_append() {
        inode.size.load(Ordering::Relaxed)
    } else {
        file.offset.load(Ordering::Relaxed)
    };
    let mut done = 0;

    while done < buf.len() {
        let index = pos / PAGE_SIZE as u64;
        let in_page = (pos % PAGE_SIZE as u64) as usize;
        let n = (PAGE_SIZE - in_page).min(buf.len() - done);

        // A partial overwrite of existing data needs the old contents first.
        let size = inode.size.load(Ordering::Relaxed);
        let page = if n < PAGE_SIZE && index * (PAGE_SIZE as u64) < size {
            page::read_cache_page(inode, Some(file), index)?
        } else {
            inode.i_mapping.find_or_create(inode, index)
        };

        page.data()[in_page..in_page + n].copy_from_slice(&buf[done..done + n]);
        page.set_flags(PageFlags::UPTODATE | PageFlags::DIRTY);
        done += n;
        pos += n as u64;
        inode.size.fetch_max(pos, Ordering::Relaxed);
    }

    file.offset.store(pos, Ordering::Relaxed);
    inode.touch_mtime();
    Ok(done)
}

/// TEAM_470: Write every dirty page back
pub fn generic_file_fsync(file: &FileRef) -> VfsResult<()> {
    page::writeback(&file.inode, &WritebackControl::all()).map(|_| ())
}
