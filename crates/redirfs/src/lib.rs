//! TEAM_470: Redirecting Filesystem Layer
//!
//! Lets independently registered filters intercept inode and dentry
//! operations of an existing filesystem without touching its code. A
//! wrapped object has its live operation table swapped for a shadow copy
//! whose slots route through the filter chain before calling the original.
//!
//! ## Layout
//!
//! ```text
//! +------------------+
//! |     namei        |  lookup_one, vfs_create, vfs_unlink, ...
//! +------------------+
//!          |  live i_op / d_op / a_ops
//!          v
//! +------------------+
//! |  redir wrappers  |  rfs_create, rfs_permission, rfs_readpage, ...
//! +------------------+
//!          |  PRE -> original -> POST
//!          v
//! +------------------+
//! |  original table  |  tmpfs or any other filesystem
//! +------------------+
//! ```

#![no_std]

extern crate alloc;

#[cfg(feature = "verbose-calls")]
macro_rules! call_trace {
    ($($arg:tt)*) => { log::trace!($($arg)*) };
}

#[cfg(not(feature = "verbose-calls"))]
macro_rules! call_trace {
    ($($arg:tt)*) => {};
}

pub(crate) use call_trace;

pub mod config;
pub mod redir;
pub mod tmpfs;
pub mod vfs;

pub use config::RedirConfig;
pub use redir::Registry;
pub use vfs::{VfsError, VfsResult};
