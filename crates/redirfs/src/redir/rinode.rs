//! TEAM_470: Shadow inodes
//!
//! An `RInode` is bound to one inode while that inode is redirected. It keeps
//! the filesystem's own tables and publishes a patched copy on the inode in
//! their place. The copy's `lookup` slot is always the interposed sentinel
//! carrying the `RInode` itself, which is how every wrapper finds its way
//! back from the inode without a side index.
//!
//! A directory's entry-creating slots are wrapped whatever the operation set
//! says: new entries only come under the directory's configuration through
//! them.
//!
//! ## Lifetime
//!
//! ```text
//! add ──> [live] ──del (nlink 1 -> 0)──> restore tables ──call_rcu──> detach ──> drop
//!           │  ^
//!           └──┘ add / del while nlink > 0
//! ```
//!
//! The sentinel owner inside the published table is the registry's own
//! reference. `detach` drops it once no reader can still be looking at the
//! published copy.

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use los_utils::{Mutex, call_rcu, rcu_poll, rcu_read_lock};

use super::aops::{rfs_readpage, rfs_writepage};
use super::chain::FilterHandle;
use super::context::{self, AttachError, PrivData};
use super::iops::{
    rfs_create, rfs_link, rfs_lookup, rfs_mkdir, rfs_mknod, rfs_permission, rfs_rmdir,
    rfs_setattr, rfs_symlink, rfs_unlink,
};
use super::ops::{OpId, OperationSet};
use super::path::Redirection;
use super::registry::{Registry, Reservation};
use crate::vfs::ops::{
    CreateFn, LinkFn, LookupFn, MkdirFn, MknodFn, PermissionFn, ReadpageFn, RmdirFn, SetattrFn,
    SymlinkFn, UnlinkFn, WritepageFn,
};
use crate::vfs::{
    AddressSpaceOperations, FileKind, FileOperations, Inode, InodeOperations, InodeRef, Slot,
    VfsError, VfsResult,
};

#[derive(Default)]
struct RInodeState {
    active: Option<Arc<Redirection>>,
    pending: Option<Arc<Redirection>>,
    data: Vec<Arc<PrivData>>,
}

/// TEAM_470: Shadow of one redirected inode
pub struct RInode {
    inode: Weak<Inode>,
    ino: u64,
    kind: FileKind,
    pub(crate) op_old: Arc<InodeOperations>,
    pub(crate) fop_old: Arc<FileOperations>,
    pub(crate) aop_old: Arc<AddressSpaceOperations>,
    op_new: Mutex<Option<Arc<InodeOperations>>>,
    aop_new: Mutex<Option<Arc<AddressSpaceOperations>>>,
    nlink: AtomicUsize,
    state: Mutex<RInodeState>,
    registry: Arc<Registry>,
}

/// Pick the wrapper for `op` if the set asks for it, else keep the original slot.
fn pick<F: Copy>(set: &OperationSet, op: OpId, old: Option<F>, wrapper: F) -> Option<F> {
    if set.contains(op) { Some(wrapper) } else { old }
}

impl RInode {
    /// TEAM_470: Allocate a shadow for `inode` without publishing it.
    ///
    /// Both tables are copied verbatim except for the lookup sentinel.
    fn alloc(
        inode: &InodeRef,
        registry: &Arc<Registry>,
        reserved: Option<&Reservation>,
    ) -> VfsResult<Arc<Self>> {
        let kind = inode.kind().ok_or(VfsError::InvalidArgument)?;
        registry.charge_rinode(reserved)?;

        let rinode = Arc::new(Self {
            inode: Arc::downgrade(inode),
            ino: inode.ino,
            kind,
            op_old: inode.iop(),
            fop_old: inode.fop(),
            aop_old: inode.i_mapping.a_ops.load(),
            op_new: Mutex::new(None),
            aop_new: Mutex::new(None),
            nlink: AtomicUsize::new(1),
            state: Mutex::new(RInodeState::default()),
            registry: registry.clone(),
        });

        let mut table = InodeOperations::clone(&rinode.op_old);
        table.lookup = Some(Self::sentinel(&rinode));
        *rinode.op_new.lock() = Some(Arc::new(table));
        *rinode.aop_new.lock() = Some(Arc::new(AddressSpaceOperations::clone(&rinode.aop_old)));

        log::debug!("redirfs: rinode alloc ino={} kind={:?}", rinode.ino, kind);
        Ok(rinode)
    }

    fn sentinel(this: &Arc<Self>) -> Slot<LookupFn> {
        Slot::Interposed {
            route: rfs_lookup as LookupFn,
            owner: this.clone(),
        }
    }

    /// TEAM_470: Shadow currently published on `inode`, if any.
    ///
    /// Lock-free. The returned reference keeps the shadow alive but says
    /// nothing about whether it is still installed.
    pub fn find(inode: &Inode) -> Option<Arc<Self>> {
        let guard = rcu_read_lock();
        let owner = inode.i_op.read(&guard).lookup.as_ref()?.owner()?.clone();
        drop(guard);
        owner.downcast::<Self>().ok()
    }

    /// TEAM_470: Shadow `inode`, or count one more entry resolving to its shadow.
    pub(crate) fn add(
        inode: &InodeRef,
        registry: &Arc<Registry>,
        reserved: Option<&Reservation>,
    ) -> VfsResult<Arc<Self>> {
        let _lock = inode.i_lock.lock();

        if let Some(found) = Self::find(inode) {
            found.nlink.fetch_add(1, Ordering::AcqRel);
            return Ok(found);
        }

        let rinode = Self::alloc(inode, registry, reserved)?;
        if let Some(table) = rinode.op_new.lock().clone() {
            inode.i_op.assign(table);
        }
        if rinode.kind == FileKind::Regular {
            if let Some(table) = rinode.aop_new.lock().clone() {
                inode.i_mapping.a_ops.assign(table);
            }
        }
        Ok(rinode)
    }

    /// TEAM_470: Drop one entry's hold on the shadow of `inode`.
    ///
    /// The last one puts the filesystem's tables back and schedules the shadow
    /// for release after a grace period. Must be called without inode or
    /// dentry locks held: it runs deferred frees that are already due.
    pub(crate) fn del(inode: &Inode) {
        let lock = inode.i_lock.lock();

        let Some(rinode) = Self::find(inode) else {
            return;
        };
        if rinode.nlink.fetch_sub(1, Ordering::AcqRel) > 1 {
            return;
        }

        if rinode.kind != FileKind::Socket {
            inode.i_fop.assign(rinode.fop_old.clone());
        }
        if rinode.kind == FileKind::Regular {
            inode.i_mapping.a_ops.assign(rinode.aop_old.clone());
        }
        inode.i_op.assign(rinode.op_old.clone());
        drop(lock);

        log::debug!("redirfs: rinode restore ino={}", rinode.ino);
        call_rcu(move || Self::detach(rinode));
        rcu_poll();
    }

    /// Break the self-reference held by the no longer published tables.
    fn detach(this: Arc<Self>) {
        this.op_new.lock().take();
        this.aop_new.lock().take();
    }

    /// TEAM_470: Rebuild the published tables from the active operation set.
    ///
    /// Does nothing once the shadow has been restored or if another table has
    /// been published over ours.
    pub(crate) fn set_ops(this: &Arc<Self>) {
        let Some(inode) = this.inode.upgrade() else {
            return;
        };
        let set = this.active().map(|r| *r.ops).unwrap_or_default();
        let _lock = inode.i_lock.lock();

        {
            let mut op_new = this.op_new.lock();
            let Some(current) = op_new.as_ref() else {
                return;
            };
            if !inode.i_op.is(current) {
                return;
            }
            let table = Arc::new(Self::derive_iops(this, &set));
            *op_new = Some(table.clone());
            inode.i_op.assign(table);
        }

        if this.kind == FileKind::Regular {
            let mut aop_new = this.aop_new.lock();
            if let Some(current) = aop_new.as_ref() {
                if inode.i_mapping.a_ops.is(current) {
                    let table = Arc::new(this.derive_aops(&set));
                    *aop_new = Some(table.clone());
                    inode.i_mapping.a_ops.assign(table);
                }
            }
        }
    }

    fn derive_iops(this: &Arc<Self>, set: &OperationSet) -> InodeOperations {
        let old = &this.op_old;
        let mut table = InodeOperations::clone(old);
        table.lookup = Some(Self::sentinel(this));

        if this.kind == FileKind::Directory {
            table.create = Some(rfs_create as CreateFn);
            table.mkdir = Some(rfs_mkdir as MkdirFn);
            table.mknod = Some(rfs_mknod as MknodFn);
            table.symlink = Some(rfs_symlink as SymlinkFn);
            table.link = Some(rfs_link as LinkFn);
            table.unlink = pick(set, OpId::DirUnlink, old.unlink, rfs_unlink as UnlinkFn);
            table.rmdir = pick(set, OpId::DirRmdir, old.rmdir, rfs_rmdir as RmdirFn);
        }

        table.permission = pick(
            set,
            OpId::permission(this.kind),
            old.permission,
            rfs_permission as PermissionFn,
        );
        table.setattr = pick(set, OpId::setattr(this.kind), old.setattr, rfs_setattr as SetattrFn);
        table
    }

    fn derive_aops(&self, set: &OperationSet) -> AddressSpaceOperations {
        let old = &self.aop_old;
        AddressSpaceOperations {
            readpage: pick(set, OpId::RegReadpage, old.readpage, rfs_readpage as ReadpageFn),
            writepage: pick(set, OpId::RegWritepage, old.writepage, rfs_writepage as WritepageFn),
        }
    }

    pub fn inode(&self) -> Option<InodeRef> {
        self.inode.upgrade()
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    /// TEAM_470: Number of entries resolving to this shadow
    pub fn nlink(&self) -> usize {
        self.nlink.load(Ordering::Acquire)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn active(&self) -> Option<Arc<Redirection>> {
        self.state.lock().active.clone()
    }

    pub fn pending(&self) -> Option<Arc<Redirection>> {
        self.state.lock().pending.clone()
    }

    /// TEAM_470: Snapshot of (active, pending)
    pub(crate) fn config(&self) -> (Option<Arc<Redirection>>, Option<Arc<Redirection>>) {
        let state = self.state.lock();
        (state.active.clone(), state.pending.clone())
    }

    /// TEAM_470: Make `redir` both the active and the pending configuration.
    pub(crate) fn set_config(&self, redir: &Arc<Redirection>) {
        let old = {
            let mut state = self.state.lock();
            (
                state.active.replace(redir.clone()),
                state.pending.replace(redir.clone()),
            )
        };
        drop(old);
    }
}

impl Drop for RInode {
    fn drop(&mut self) {
        log::debug!("redirfs: rinode free ino={}", self.ino);
        self.registry.release_rinode();
    }
}

impl fmt::Debug for RInode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RInode")
            .field("ino", &self.ino)
            .field("kind", &self.kind)
            .field("nlink", &self.nlink())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Per-inode private data
// ============================================================================

/// TEAM_470: Attach `data` to the shadow of `inode` on behalf of `filter`.
///
/// The filter must be part of the shadow's active chain. If the filter has
/// already attached something, that is returned in `AttachError::Exists`.
pub fn attach_data_inode(
    filter: &FilterHandle,
    inode: &Inode,
    data: Arc<PrivData>,
) -> Result<(), AttachError> {
    if data.owner() != filter.id() {
        return Err(VfsError::InvalidArgument.into());
    }
    let rinode = RInode::find(inode).ok_or(VfsError::NoData)?;

    let mut state = rinode.state.lock();
    let in_chain = state
        .active
        .as_ref()
        .is_some_and(|redir| redir.chain.contains(filter));
    if !in_chain {
        return Err(VfsError::NotFound.into());
    }
    context::attach_to(&mut state.data, data)
}

/// TEAM_470: Remove and return the data `filter` attached to `inode`.
pub fn detach_data_inode(filter: &FilterHandle, inode: &Inode) -> VfsResult<Arc<PrivData>> {
    let rinode = RInode::find(inode).ok_or(VfsError::NoData)?;
    let mut state = rinode.state.lock();
    context::detach_from(&mut state.data, filter.id())
}

pub fn get_data_inode(filter: &FilterHandle, inode: &Inode) -> VfsResult<Arc<PrivData>> {
    let rinode = RInode::find(inode).ok_or(VfsError::NoData)?;
    let state = rinode.state.lock();
    context::find_in(&state.data, filter.id())
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::config::RedirConfig;
    use crate::redir::chain::{Chain, Filter};
    use crate::redir::path::RPath;
    use crate::tmpfs;
    use crate::vfs;
    use los_utils::rcu_barrier;

    struct Nop;
    impl Filter for Nop {}

    fn regular_file() -> (vfs::DentryRef, InodeRef) {
        let root = tmpfs::mount();
        let file = vfs::vfs_create(&root, "f", 0o644).unwrap();
        let inode = file.inode().unwrap();
        (root, inode)
    }

    #[test]
    fn test_add_publishes_sentinel_and_del_restores() {
        let registry = Registry::new(RedirConfig::DEFAULT);
        let (_root, inode) = regular_file();
        let fs_table = inode.iop();
        assert!(RInode::find(&inode).is_none());

        let rinode = RInode::add(&inode, &registry, None).unwrap();
        let found = RInode::find(&inode).unwrap();
        assert!(Arc::ptr_eq(&found, &rinode));
        assert!(!inode.i_op.is(&fs_table));
        assert_eq!(registry.rinodes(), 1);

        // A second entry only bumps the link count.
        let again = RInode::add(&inode, &registry, None).unwrap();
        assert!(Arc::ptr_eq(&again, &rinode));
        assert_eq!(rinode.nlink(), 2);

        RInode::del(&inode);
        assert!(RInode::find(&inode).is_some());
        RInode::del(&inode);
        assert!(RInode::find(&inode).is_none());
        assert!(inode.i_op.is(&fs_table));

        drop((rinode, again, found));
        rcu_barrier();
        assert!(registry.is_drained());
    }

    #[test]
    fn test_set_ops_follows_the_active_set() {
        let registry = Registry::new(RedirConfig::DEFAULT);
        let root = tmpfs::mount();
        let dir = root.inode().unwrap();
        let rinode = RInode::add(&dir, &registry, None).unwrap();

        let fs_unlink = dir.iop().unlink;
        let redir = Redirection::new(
            RPath::new("/"),
            Chain::new(Vec::new()),
            OperationSet::from_ops(&[OpId::DirCreate, OpId::DirPermission]),
        );
        rinode.set_config(&redir);
        RInode::set_ops(&rinode);

        let live = dir.iop();
        assert!(live.create.is_some_and(|f| f as usize == rfs_create as CreateFn as usize));
        assert!(live.permission.is_some());
        // Creators are wrapped even outside the set.
        assert!(live.mkdir.is_some_and(|f| f as usize == rfs_mkdir as MkdirFn as usize));
        assert!(live.link.is_some_and(|f| f as usize == rfs_link as LinkFn as usize));
        // Not in the set: the filesystem's own routine stays.
        assert_eq!(live.unlink.map(|f| f as usize), fs_unlink.map(|f| f as usize));
        assert!(live.unlink.is_some_and(|f| f as usize != rfs_unlink as UnlinkFn as usize));
        assert!(matches!(live.lookup, Some(Slot::Interposed { .. })));

        RInode::del(&dir);
        // Restored: a late set_ops must not republish the shadow.
        RInode::set_ops(&rinode);
        assert!(RInode::find(&dir).is_none());
        drop(rinode);
        rcu_barrier();
    }

    #[test]
    fn test_allocation_limit() {
        let registry = Registry::new(RedirConfig::DEFAULT.with_max_rinodes(1));
        let root = tmpfs::mount();
        let a = vfs::vfs_create(&root, "a", 0o644).unwrap().inode().unwrap();
        let b = vfs::vfs_create(&root, "b", 0o644).unwrap().inode().unwrap();

        let held = RInode::add(&a, &registry, None).unwrap();
        assert_eq!(RInode::add(&b, &registry, None).err(), Some(VfsError::OutOfMemory));
        drop(held);
        RInode::del(&a);
        rcu_barrier();
        assert!(RInode::add(&b, &registry, None).is_ok());
        RInode::del(&b);
    }

    #[test]
    fn test_inode_data_requires_filter_in_active_chain() {
        let registry = Registry::new(RedirConfig::DEFAULT);
        let (_root, inode) = regular_file();
        let member = FilterHandle::new("member", OperationSet::empty(), Nop);
        let stranger = FilterHandle::new("stranger", OperationSet::empty(), Nop);

        let data = PrivData::new(&member, 5u32);
        assert!(matches!(
            attach_data_inode(&member, &inode, data.clone()),
            Err(AttachError::Vfs(VfsError::NoData))
        ));

        let rinode = RInode::add(&inode, &registry, None).unwrap();
        rinode.set_config(&Redirection::new(
            RPath::new("/"),
            Chain::new(alloc::vec![member.clone()]),
            OperationSet::empty(),
        ));

        let foreign = PrivData::new(&stranger, ());
        assert!(matches!(
            attach_data_inode(&stranger, &inode, foreign),
            Err(AttachError::Vfs(VfsError::NotFound))
        ));
        assert!(matches!(
            attach_data_inode(&member, &inode, PrivData::new(&stranger, ())),
            Err(AttachError::Vfs(VfsError::InvalidArgument))
        ));

        attach_data_inode(&member, &inode, data.clone()).unwrap();
        let dup = attach_data_inode(&member, &inode, PrivData::new(&member, 6u32));
        assert!(matches!(dup, Err(AttachError::Exists(d)) if Arc::ptr_eq(&d, &data)));

        assert!(Arc::ptr_eq(&get_data_inode(&member, &inode).unwrap(), &data));
        assert!(Arc::ptr_eq(&detach_data_inode(&member, &inode).unwrap(), &data));
        assert_eq!(get_data_inode(&member, &inode).err(), Some(VfsError::NoData));
        assert_eq!(detach_data_inode(&member, &inode).err(), Some(VfsError::NoData));

        RInode::del(&inode);
        drop(rinode);
        rcu_barrier();
    }
}
