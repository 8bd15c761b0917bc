//! TEAM_470: Per-call state handed to filters
//!
//! Every intercepted call builds one `RfsArgs` (what is being done, and the
//! result slot) and one `Context` (which filter is running, and data filters
//! park for the duration of the call).

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;
use core::fmt;

use super::chain::{FilterHandle, FilterId};
use super::ops::OpId;
use crate::vfs::{
    DentryRef, FileRef, InodeRef, MayMask, PageRef, SetAttr, VfsError, VfsResult,
    WritebackControl,
};

/// TEAM_470: Which half of the protocol a filter is called from
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CallPhase {
    Pre,
    Post,
}

// ============================================================================
// Private data
// ============================================================================

/// TEAM_470: Opaque data a filter attaches to a shadow inode or a call.
pub struct PrivData {
    owner: FilterId,
    payload: Box<dyn Any + Send + Sync>,
}

impl PrivData {
    pub fn new<T: Any + Send + Sync>(filter: &FilterHandle, payload: T) -> Arc<Self> {
        Arc::new(Self {
            owner: filter.id(),
            payload: Box::new(payload),
        })
    }

    pub fn owner(&self) -> FilterId {
        self.owner
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl fmt::Debug for PrivData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivData")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// TEAM_470: Why an attach was refused
#[derive(Debug)]
pub enum AttachError {
    /// The filter already has data here; this is it.
    Exists(Arc<PrivData>),
    Vfs(VfsError),
}

impl AttachError {
    pub fn to_errno(&self) -> i64 {
        match self {
            AttachError::Exists(_) => VfsError::AlreadyExists.to_errno(),
            AttachError::Vfs(e) => e.to_errno(),
        }
    }
}

impl From<VfsError> for AttachError {
    fn from(e: VfsError) -> Self {
        AttachError::Vfs(e)
    }
}

impl fmt::Display for AttachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachError::Exists(_) => write!(f, "{}", VfsError::AlreadyExists),
            AttachError::Vfs(e) => write!(f, "{e}"),
        }
    }
}

impl core::error::Error for AttachError {}

/// TEAM_470: Add `data` to `list` unless its owner already has an entry.
pub(crate) fn attach_to(list: &mut Vec<Arc<PrivData>>, data: Arc<PrivData>) -> Result<(), AttachError> {
    if let Some(existing) = list.iter().find(|d| d.owner == data.owner) {
        return Err(AttachError::Exists(existing.clone()));
    }
    list.push(data);
    Ok(())
}

pub(crate) fn detach_from(list: &mut Vec<Arc<PrivData>>, owner: FilterId) -> VfsResult<Arc<PrivData>> {
    let idx = list
        .iter()
        .position(|d| d.owner == owner)
        .ok_or(VfsError::NoData)?;
    Ok(list.remove(idx))
}

pub(crate) fn find_in(list: &[Arc<PrivData>], owner: FilterId) -> VfsResult<Arc<PrivData>> {
    list.iter()
        .find(|d| d.owner == owner)
        .cloned()
        .ok_or(VfsError::NoData)
}

// ============================================================================
// Call context
// ============================================================================

/// TEAM_470: State shared by every filter taking part in one call.
///
/// Data attached here must be detached again before the call completes.
#[derive(Debug, Default)]
pub struct Context {
    data: Vec<Arc<PrivData>>,
    filter: Option<Arc<FilterHandle>>,
}

impl Context {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// TEAM_470: The filter whose callback is running
    pub fn filter(&self) -> Option<&Arc<FilterHandle>> {
        self.filter.as_ref()
    }

    pub(crate) fn set_filter(&mut self, filter: Option<Arc<FilterHandle>>) {
        self.filter = filter;
    }

    fn running(&self) -> VfsResult<FilterId> {
        self.filter
            .as_ref()
            .map(|f| f.id())
            .ok_or(VfsError::InvalidArgument)
    }

    /// TEAM_470: Park `data` for the rest of the call.
    ///
    /// The data must belong to the running filter.
    pub fn attach_data(&mut self, data: Arc<PrivData>) -> Result<(), AttachError> {
        if data.owner != self.running()? {
            return Err(AttachError::Vfs(VfsError::InvalidArgument));
        }
        attach_to(&mut self.data, data)
    }

    pub fn detach_data(&mut self) -> VfsResult<Arc<PrivData>> {
        let owner = self.running()?;
        detach_from(&mut self.data, owner)
    }

    pub fn get_data(&self) -> VfsResult<Arc<PrivData>> {
        find_in(&self.data, self.running()?)
    }

    /// TEAM_470: End of call; every filter must have taken its data back.
    pub(crate) fn finish(self) {
        assert!(
            self.data.is_empty(),
            "redirfs: {} call data entries left attached",
            self.data.len()
        );
    }
}

// ============================================================================
// Arguments and result
// ============================================================================

/// TEAM_470: Arguments of the intercepted operation.
///
/// A filter may rewrite them in `pre_call`; the original runs with whatever
/// is here once the pre phase is over.
#[derive(Clone, Debug)]
pub enum OpArgs {
    Lookup { dir: InodeRef, dentry: DentryRef },
    Create { dir: InodeRef, dentry: DentryRef, mode: u32 },
    Mkdir { dir: InodeRef, dentry: DentryRef, mode: u32 },
    Mknod { dir: InodeRef, dentry: DentryRef, mode: u32, rdev: u64 },
    Symlink { dir: InodeRef, dentry: DentryRef, target: String },
    Link { old: DentryRef, dir: InodeRef, dentry: DentryRef },
    Unlink { dir: InodeRef, dentry: DentryRef },
    Rmdir { dir: InodeRef, dentry: DentryRef },
    Permission { inode: InodeRef, mask: MayMask },
    Setattr { dentry: DentryRef, attr: SetAttr },
    Readpage { file: Option<FileRef>, page: PageRef },
    Writepage { page: PageRef, wbc: WritebackControl },
    Revalidate { dentry: DentryRef },
}

impl OpArgs {
    /// TEAM_470: Entry a structural operation acts on
    pub fn dentry(&self) -> Option<&DentryRef> {
        match self {
            OpArgs::Lookup { dentry, .. }
            | OpArgs::Create { dentry, .. }
            | OpArgs::Mkdir { dentry, .. }
            | OpArgs::Mknod { dentry, .. }
            | OpArgs::Symlink { dentry, .. }
            | OpArgs::Link { dentry, .. }
            | OpArgs::Unlink { dentry, .. }
            | OpArgs::Rmdir { dentry, .. }
            | OpArgs::Setattr { dentry, .. }
            | OpArgs::Revalidate { dentry } => Some(dentry),
            OpArgs::Permission { .. } | OpArgs::Readpage { .. } | OpArgs::Writepage { .. } => None,
        }
    }

    fn initial_retv(&self) -> Retv {
        match self {
            OpArgs::Lookup { .. } => Retv::Dentry(Ok(None)),
            OpArgs::Revalidate { .. } => Retv::Valid(Ok(true)),
            _ => Retv::Status(Ok(())),
        }
    }
}

/// TEAM_470: Result slot, shaped like the operation's return type
#[derive(Clone, Debug)]
pub enum Retv {
    Status(VfsResult<()>),
    /// Lookup: `Some` if the filesystem returned an alias.
    Dentry(VfsResult<Option<DentryRef>>),
    Valid(VfsResult<bool>),
}

impl Retv {
    pub fn is_ok(&self) -> bool {
        match self {
            Retv::Status(r) => r.is_ok(),
            Retv::Dentry(r) => r.is_ok(),
            Retv::Valid(r) => r.is_ok(),
        }
    }

    /// TEAM_470: Error carried by the slot, whatever its shape
    pub fn err(&self) -> Option<VfsError> {
        match self {
            Retv::Status(Err(e)) | Retv::Dentry(Err(e)) | Retv::Valid(Err(e)) => Some(*e),
            Retv::Status(Ok(())) | Retv::Dentry(Ok(_)) | Retv::Valid(Ok(_)) => None,
        }
    }

    pub(crate) fn into_status(self) -> VfsResult<()> {
        match self {
            Retv::Status(r) => r,
            Retv::Dentry(r) => r.map(|_| ()),
            Retv::Valid(r) => r.map(|_| ()),
        }
    }

    pub(crate) fn into_dentry(self) -> VfsResult<Option<DentryRef>> {
        match self {
            Retv::Dentry(r) => r,
            Retv::Status(r) => r.map(|()| None),
            Retv::Valid(r) => r.map(|_| None),
        }
    }

    pub(crate) fn into_valid(self) -> VfsResult<bool> {
        match self {
            Retv::Valid(r) => r,
            Retv::Status(r) => r.map(|()| true),
            Retv::Dentry(r) => r.map(|_| true),
        }
    }
}

/// TEAM_470: Everything a filter sees about the call
#[derive(Debug)]
pub struct RfsArgs {
    pub op: OpId,
    pub phase: CallPhase,
    pub args: OpArgs,
    pub retv: Retv,
}

impl RfsArgs {
    pub fn new(op: OpId, args: OpArgs) -> Self {
        let retv = args.initial_retv();
        Self {
            op,
            phase: CallPhase::Pre,
            args,
            retv,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redir::chain::Filter;
    use crate::redir::ops::OperationSet;

    struct Nop;
    impl Filter for Nop {}

    fn handle() -> Arc<FilterHandle> {
        FilterHandle::new("ctx", OperationSet::empty(), Nop)
    }

    #[test]
    fn test_context_data_is_keyed_by_running_filter() {
        let (f1, f2) = (handle(), handle());
        let mut cx = Context::new();
        assert_eq!(cx.get_data().err(), Some(VfsError::InvalidArgument));

        cx.set_filter(Some(f1.clone()));
        cx.attach_data(PrivData::new(&f1, 11u32)).unwrap();
        let dup = cx.attach_data(PrivData::new(&f1, 12u32));
        assert!(matches!(dup, Err(AttachError::Exists(d)) if d.downcast_ref::<u32>() == Some(&11)));

        // Data owned by someone else is refused.
        let foreign = cx.attach_data(PrivData::new(&f2, 0u8));
        assert!(matches!(foreign, Err(AttachError::Vfs(VfsError::InvalidArgument))));

        cx.set_filter(Some(f2.clone()));
        assert_eq!(cx.get_data().err(), Some(VfsError::NoData));

        cx.set_filter(Some(f1));
        assert_eq!(cx.detach_data().unwrap().downcast_ref::<u32>(), Some(&11));
        cx.finish();
    }

    #[test]
    #[should_panic(expected = "left attached")]
    fn test_finish_with_leftover_data_is_fatal() {
        let f = handle();
        let mut cx = Context::new();
        cx.set_filter(Some(f.clone()));
        cx.attach_data(PrivData::new(&f, ())).unwrap();
        cx.finish();
    }

    #[test]
    fn test_retv_conversions() {
        assert_eq!(Retv::Status(Err(VfsError::Busy)).err(), Some(VfsError::Busy));
        assert!(Retv::Dentry(Ok(None)).is_ok());
        assert_eq!(Retv::Valid(Ok(false)).into_valid(), Ok(false));
        assert_eq!(Retv::Status(Ok(())).into_dentry().map(|d| d.is_none()), Ok(true));
    }

    #[test]
    fn test_attach_error_errno() {
        let f = handle();
        let exists = AttachError::Exists(PrivData::new(&f, ()));
        assert_eq!(exists.to_errno(), VfsError::AlreadyExists.to_errno());
        assert_eq!(AttachError::from(VfsError::NoData).to_errno(), VfsError::NoData.to_errno());
    }
}
