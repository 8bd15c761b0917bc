//! TEAM_202: Virtual Filesystem (VFS) Core
//!
//! TEAM_470: The host object model the redirection layer stacks on. Every
//! inode, dentry and address space publishes its operation table through an
//! `RcuCell`, and every dispatch in `namei`, `file` and `page` goes through
//! whichever table is live at the time of the call.
//!
//! ## Architecture
//!
//! ```text
//! +------------------+
//! |   VFS Dispatch   |  vfs_create, vfs_unlink, vfs_read, ...
//! +------------------+
//!          |
//!          v
//! +------------------+
//! |  Dentry Cache    |  name -> inode, d_op hooks
//! +------------------+
//!          |
//!          v
//! +------------------+
//! |  Inode / Pages   |  i_op, i_fop, a_ops
//! +------------------+
//! ```

pub mod dentry;
pub mod error;
pub mod file;
pub mod inode;
pub mod mode;
pub mod namei;
pub mod ops;
pub mod page;

pub use dentry::{Dentry, DentryRef, d_instantiate, d_invalidate};
pub use error::{VfsError, VfsResult};
pub use file::{File, FileRef, OpenFlags, vfs_fsync, vfs_read, vfs_write};
pub use inode::{Inode, InodeRef, InodeTables};
pub use mode::FileKind;
pub use namei::{
    lookup_one, resolve, vfs_create, vfs_link, vfs_mkdir, vfs_mknod, vfs_permission,
    vfs_readlink, vfs_rmdir, vfs_setattr, vfs_symlink, vfs_unlink,
};
pub use ops::{
    AddressSpaceOperations, DentryOperations, FileOperations, InodeOperations, MayMask, SetAttr,
    Slot,
};
pub use page::{Page, PageFlags, PageRef, WritebackControl};
