//! TEAM_470: Redirection Layer
//!
//! Shadows inodes and dentries of an existing filesystem so that a chain of
//! filters runs around their operations.
//!
//! ## Call path
//!
//! ```text
//! vfs_create(parent, name)
//!   └─ parent i_op.create == rfs_create
//!        ├─ RInode::find(dir)          lookup sentinel, lock-free
//!        ├─ snapshot active + pending  short lock
//!        ├─ PRE  filters (chain order)
//!        ├─ original create            unless a filter stopped it
//!        ├─ POST filters (chain order)
//!        └─ pending config -> new dentry + inode shadows
//! ```
//!
//! Shadows are reclaimed through `los_utils::rcu`: tables are restored under
//! the object lock and the shadow itself is released after a grace period.

mod aops;
mod call;
pub mod chain;
pub mod context;
mod iops;
pub mod ops;
pub mod path;
pub mod rdentry;
pub mod registry;
pub mod rinode;

pub use aops::{readpage_subcall, writepage_subcall};
pub use chain::{Chain, Filter, FilterHandle, FilterId, Verdict};
pub use context::{AttachError, CallPhase, Context, OpArgs, PrivData, RfsArgs, Retv};
pub use ops::{OpId, OperationSet};
pub use path::{RPath, Redirection};
pub use rdentry::RDentry;
pub use registry::Registry;
pub use rinode::{RInode, attach_data_inode, detach_data_inode, get_data_inode};
