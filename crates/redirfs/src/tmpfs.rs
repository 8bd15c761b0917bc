//! TEAM_194: Tmpfs - in-memory filesystem
//!
//! TEAM_470: Serves as the underlying filesystem the redirection layer wraps.
//! Every kind of inode shares one static table set per kind, the way a disk
//! filesystem would. File data lives in the node and reaches the page cache
//! only through `readpage` / `writepage`.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use los_utils::{Lazy, RwLock};

use crate::vfs::dentry::{DentryRef, d_instantiate};
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::file::{self, FileRef};
use crate::vfs::inode::{Inode, InodeRef, InodeTables};
use crate::vfs::mode::{self, FileKind};
use crate::vfs::ops::{
    AddressSpaceOperations, FileOperations, InodeOperations, SetAttr, Slot, inode_setattr,
};
use crate::vfs::page::{PAGE_SIZE, PageFlags, PageRef, WritebackControl};
use crate::vfs::Dentry;

/// TEAM_194: Maximum file size (16MB)
pub const MAX_FILE_SIZE: usize = 16 * 1024 * 1024;

static NEXT_INO: AtomicU64 = AtomicU64::new(1);

/// TEAM_194: Per-inode tmpfs state
pub struct TmpfsNode {
    /// Child inodes (directories only)
    children: RwLock<BTreeMap<String, InodeRef>>,
    /// File content (regular files only)
    data: RwLock<Vec<u8>>,
    /// Link target (symlinks only)
    target: String,
}

impl TmpfsNode {
    fn new(target: String) -> Self {
        Self {
            children: RwLock::new(BTreeMap::new()),
            data: RwLock::new(Vec::new()),
            target,
        }
    }

    /// TEAM_470: Bytes stored in the backing node, bypassing the page cache
    pub fn contents(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// TEAM_470: Whether the directory holds an entry called `name`
    pub fn has_child(&self, name: &str) -> bool {
        self.children.read().contains_key(name)
    }
}

// ============================================================================
// Operation tables
// ============================================================================

static DIR_TABLES: Lazy<InodeTables> = Lazy::new(|| InodeTables {
    i_op: Arc::new(InodeOperations {
        lookup: Some(Slot::Fs(tmpfs_lookup)),
        create: Some(tmpfs_create),
        mkdir: Some(tmpfs_mkdir),
        mknod: Some(tmpfs_mknod),
        symlink: Some(tmpfs_symlink),
        link: Some(tmpfs_link),
        unlink: Some(tmpfs_unlink),
        rmdir: Some(tmpfs_rmdir),
        permission: None,
        setattr: Some(tmpfs_setattr),
        readlink: None,
    }),
    i_fop: Arc::new(FileOperations::default()),
    a_ops: Arc::new(AddressSpaceOperations::default()),
});

static FILE_TABLES: Lazy<InodeTables> = Lazy::new(|| InodeTables {
    i_op: Arc::new(InodeOperations {
        setattr: Some(tmpfs_setattr),
        ..InodeOperations::default()
    }),
    i_fop: Arc::new(FileOperations {
        read: Some(file::generic_file_read),
        write: Some(file::generic_file_write),
        fsync: Some(file::generic_file_fsync),
    }),
    a_ops: Arc::new(AddressSpaceOperations {
        readpage: Some(tmpfs_readpage),
        writepage: Some(tmpfs_writepage),
    }),
});

static SYMLINK_TABLES: Lazy<InodeTables> = Lazy::new(|| InodeTables {
    i_op: Arc::new(InodeOperations {
        setattr: Some(tmpfs_setattr),
        readlink: Some(tmpfs_readlink),
        ..InodeOperations::default()
    }),
    i_fop: Arc::new(FileOperations::default()),
    a_ops: Arc::new(AddressSpaceOperations::default()),
});

static SPECIAL_TABLES: Lazy<InodeTables> = Lazy::new(|| InodeTables {
    i_op: Arc::new(InodeOperations {
        setattr: Some(tmpfs_setattr),
        ..InodeOperations::default()
    }),
    i_fop: Arc::new(FileOperations::default()),
    a_ops: Arc::new(AddressSpaceOperations::default()),
});

fn tables_for(kind: FileKind) -> InodeTables {
    match kind {
        FileKind::Directory => DIR_TABLES.clone(),
        FileKind::Regular => FILE_TABLES.clone(),
        FileKind::Symlink => SYMLINK_TABLES.clone(),
        FileKind::CharDevice | FileKind::BlockDevice | FileKind::Fifo | FileKind::Socket => {
            SPECIAL_TABLES.clone()
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// TEAM_194: Mount a fresh tmpfs and return its root dentry
pub fn mount() -> DentryRef {
    let mode = mode::make_mode(mode::S_IFDIR, 0o755);
    let root = alloc_inode(FileKind::Directory, mode, 0, String::new());
    root.nlink.store(2, Ordering::Relaxed);
    Dentry::root(root)
}

fn alloc_inode(kind: FileKind, mode: u32, rdev: u64, target: String) -> InodeRef {
    let ino = NEXT_INO.fetch_add(1, Ordering::Relaxed);
    Arc::new(Inode::new(
        ino,
        mode,
        rdev,
        tables_for(kind),
        Box::new(TmpfsNode::new(target)),
    ))
}

fn new_inode(mode: u32, rdev: u64, target: String) -> VfsResult<InodeRef> {
    let kind = FileKind::from_mode(mode).ok_or(VfsError::InvalidArgument)?;
    Ok(alloc_inode(kind, mode, rdev, target))
}

/// TEAM_470: Tmpfs state of an inode
pub fn node(inode: &Inode) -> VfsResult<&TmpfsNode> {
    inode.private::<TmpfsNode>().ok_or(VfsError::IoError)
}

fn add_child(dir: &Inode, name: &str, inode: InodeRef) -> VfsResult<()> {
    let mut children = node(dir)?.children.write();
    if children.contains_key(name) {
        return Err(VfsError::AlreadyExists);
    }
    children.insert(String::from(name), inode);
    dir.touch_mtime();
    Ok(())
}

fn remove_child(dir: &Inode, name: &str) -> VfsResult<InodeRef> {
    let removed = node(dir)?.children.write().remove(name);
    dir.touch_mtime();
    removed.ok_or(VfsError::NotFound)
}

fn make_node(dir: &InodeRef, dentry: &DentryRef, mode: u32, rdev: u64, target: String) -> VfsResult<InodeRef> {
    let inode = new_inode(mode, rdev, target)?;
    add_child(dir, &dentry.name, inode.clone())?;
    d_instantiate(dentry, inode.clone());
    Ok(inode)
}

// ============================================================================
// Inode operations
// ============================================================================

fn tmpfs_lookup(dir: &InodeRef, dentry: &DentryRef) -> VfsResult<Option<DentryRef>> {
    let child = node(dir)?.children.read().get(&dentry.name).cloned();
    if let Some(inode) = child {
        d_instantiate(dentry, inode);
    }
    Ok(None)
}

fn tmpfs_create(dir: &InodeRef, dentry: &DentryRef, mode: u32) -> VfsResult<()> {
    make_node(dir, dentry, mode, 0, String::new()).map(|_| ())
}

fn tmpfs_mkdir(dir: &InodeRef, dentry: &DentryRef, mode: u32) -> VfsResult<()> {
    let inode = make_node(dir, dentry, mode, 0, String::new())?;
    inode.nlink.store(2, Ordering::Relaxed);
    dir.inc_nlink();
    Ok(())
}

fn tmpfs_mknod(dir: &InodeRef, dentry: &DentryRef, mode: u32, rdev: u64) -> VfsResult<()> {
    make_node(dir, dentry, mode, rdev, String::new()).map(|_| ())
}

fn tmpfs_symlink(dir: &InodeRef, dentry: &DentryRef, target: &str) -> VfsResult<()> {
    let mode = mode::make_mode(mode::S_IFLNK, 0o777);
    let inode = make_node(dir, dentry, mode, 0, String::from(target))?;
    inode.size.store(target.len() as u64, Ordering::Relaxed);
    Ok(())
}

fn tmpfs_link(old: &DentryRef, dir: &InodeRef, dentry: &DentryRef) -> VfsResult<()> {
    let inode = old.inode().ok_or(VfsError::NotFound)?;
    add_child(dir, &dentry.name, inode.clone())?;
    inode.inc_nlink();
    d_instantiate(dentry, inode);
    Ok(())
}

fn tmpfs_unlink(dir: &InodeRef, dentry: &DentryRef) -> VfsResult<()> {
    let inode = remove_child(dir, &dentry.name)?;
    inode.dec_nlink();
    Ok(())
}

fn tmpfs_rmdir(dir: &InodeRef, dentry: &DentryRef) -> VfsResult<()> {
    let victim = dentry.inode().ok_or(VfsError::NotFound)?;
    if !node(&victim)?.children.read().is_empty() {
        return Err(VfsError::DirectoryNotEmpty);
    }
    remove_child(dir, &dentry.name)?;
    victim.nlink.store(0, Ordering::Relaxed);
    dir.dec_nlink();
    Ok(())
}

fn tmpfs_setattr(dentry: &DentryRef, attr: &SetAttr) -> VfsResult<()> {
    let inode = dentry.inode().ok_or(VfsError::NotFound)?;
    if let Some(size) = attr.size {
        let size = usize::try_from(size).map_err(|_| VfsError::FileTooLarge)?;
        if size > MAX_FILE_SIZE {
            return Err(VfsError::FileTooLarge);
        }
        if inode.is_file() {
            node(&inode)?.data.write().resize(size, 0);
        }
    }
    inode_setattr(&inode, attr)
}

fn tmpfs_readlink(inode: &InodeRef) -> VfsResult<String> {
    Ok(node(inode)?.target.clone())
}

// ============================================================================
// Address space operations
// ============================================================================

fn tmpfs_readpage(_file: Option<&FileRef>, page: &PageRef) -> VfsResult<()> {
    let inode = page.host().ok_or(VfsError::StaleHandle)?;
    let data = node(&inode)?.data.read();
    let start = (page.offset() as usize).min(data.len());
    let end = (start + PAGE_SIZE).min(data.len());

    let mut buf = page.data();
    buf[..end - start].copy_from_slice(&data[start..end]);
    buf[end - start..].fill(0);
    page.set_flags(PageFlags::UPTODATE);
    Ok(())
}

fn tmpfs_writepage(page: &PageRef, _wbc: &WritebackControl) -> VfsResult<()> {
    let inode = page.host().ok_or(VfsError::StaleHandle)?;
    let size = inode.size.load(Ordering::Relaxed);
    let start = page.offset();
    if start < size {
        let len = (size - start).min(PAGE_SIZE as u64) as usize;
        let start = start as usize;
        if start + len > MAX_FILE_SIZE {
            return Err(VfsError::FileTooLarge);
        }

        let mut data = node(&inode)?.data.write();
        if data.len() < start + len {
            data.resize(start + len, 0);
        }
        data[start..start + len].copy_from_slice(&page.data()[..len]);
    }
    page.clear_flags(PageFlags::DIRTY);
    Ok(())
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::vfs::{self, OpenFlags};

    #[test]
    fn test_create_lookup_unlink() {
        let root = mount();
        let f = vfs::vfs_create(&root, "a", 0o644).unwrap();
        let inode = f.inode().unwrap();
        assert!(inode.is_file());

        // Cached dentry is reused
        let again = vfs::lookup_one(&root, "a").unwrap();
        assert!(Arc::ptr_eq(&f, &again));
        assert_eq!(vfs::vfs_create(&root, "a", 0o644).unwrap_err(), VfsError::AlreadyExists);

        vfs::vfs_unlink(&root, "a").unwrap();
        assert!(f.is_negative());
        assert_eq!(inode.nlink.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_file_data_goes_through_pages() {
        let root = mount();
        let f = vfs::vfs_create(&root, "data", 0o644).unwrap();
        let file = vfs::File::open(&f, OpenFlags::new(OpenFlags::O_RDWR)).unwrap();

        let payload = [7u8; PAGE_SIZE + 10];
        assert_eq!(vfs::vfs_write(&file, &payload).unwrap(), payload.len());
        let inode = f.inode().unwrap();
        assert!(node(&inode).unwrap().contents().is_empty());

        vfs::vfs_fsync(&file).unwrap();
        assert_eq!(node(&inode).unwrap().contents().len(), payload.len());
        assert!(inode.i_mapping.dirty_pages().is_empty());

        // Cold cache read comes back through readpage
        inode.i_mapping.truncate(0);
        let file = vfs::File::open(&f, OpenFlags::new(OpenFlags::O_RDONLY)).unwrap();
        let mut buf = [0u8; PAGE_SIZE + 10];
        assert_eq!(vfs::vfs_read(&file, &mut buf).unwrap(), buf.len());
        assert!(buf.iter().all(|&b| b == 7));
    }

    #[test]
    fn test_rmdir_requires_empty() {
        let root = mount();
        let d = vfs::vfs_mkdir(&root, "d", 0o755).unwrap();
        vfs::vfs_symlink(&d, "l", "/elsewhere").unwrap();
        assert_eq!(vfs::vfs_rmdir(&root, "d").unwrap_err(), VfsError::DirectoryNotEmpty);

        let l = vfs::lookup_one(&d, "l").unwrap();
        assert_eq!(vfs::vfs_readlink(&l).unwrap(), "/elsewhere");
        vfs::vfs_unlink(&d, "l").unwrap();
        vfs::vfs_rmdir(&root, "d").unwrap();
        assert!(d.is_negative());
    }

    #[test]
    fn test_link_counts() {
        let root = mount();
        let a = vfs::vfs_create(&root, "a", 0o644).unwrap();
        let b = vfs::vfs_link(&a, &root, "b").unwrap();
        let inode = a.inode().unwrap();
        assert!(Arc::ptr_eq(&inode, &b.inode().unwrap()));
        assert_eq!(inode.nlink.load(Ordering::Relaxed), 2);
    }
}
