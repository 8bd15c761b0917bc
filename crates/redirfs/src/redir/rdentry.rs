//! TEAM_470: Shadow dentries
//!
//! An `RDentry` carries the active configuration of one directory entry and
//! holds the entry's reference on the shadow of the inode it resolves to.
//! Like inodes, a shadowed dentry is recognised by the interposed sentinel
//! in its published table, here the `d_iput` slot.
//!
//! The dentry hooks keep the two shadows in step with the cache: `d_iput`
//! drops the entry's hold on the inode shadow when the dentry goes negative,
//! and `d_release` removes the dentry shadow when the entry leaves the cache.
//!
//! Lock order is `d_lock` before `i_lock`.

use alloc::sync::{Arc, Weak};
use core::fmt;

use los_utils::{Mutex, call_rcu, rcu_poll, rcu_read_lock};

use super::call::rfs_call;
use super::context::{OpArgs, RfsArgs, Retv};
use super::iops::bad_args;
use super::ops::{OpId, OperationSet};
use super::path::Redirection;
use super::registry::{Registry, Reservation};
use super::rinode::RInode;
use crate::vfs::ops::{IputFn, ReleaseFn, RevalidateFn};
use crate::vfs::{Dentry, DentryOperations, DentryRef, InodeRef, Slot, VfsResult};

#[derive(Default)]
struct RDentryState {
    active: Option<Arc<Redirection>>,
    rinode: Option<Arc<RInode>>,
}

/// TEAM_470: Shadow of one redirected dentry
pub struct RDentry {
    dentry: Weak<Dentry>,
    op_old: Arc<DentryOperations>,
    op_new: Mutex<Option<Arc<DentryOperations>>>,
    state: Mutex<RDentryState>,
    registry: Arc<Registry>,
}

impl RDentry {
    fn alloc(
        dentry: &DentryRef,
        registry: &Arc<Registry>,
        reserved: Option<&Reservation>,
    ) -> VfsResult<Arc<Self>> {
        registry.charge_rdentry(reserved)?;

        let rdentry = Arc::new(Self {
            dentry: Arc::downgrade(dentry),
            op_old: dentry.ops(),
            op_new: Mutex::new(None),
            state: Mutex::new(RDentryState::default()),
            registry: registry.clone(),
        });

        let table = Self::derive(&rdentry, &OperationSet::empty());
        *rdentry.op_new.lock() = Some(Arc::new(table));
        log::debug!("redirfs: rdentry alloc {}", dentry.path());
        Ok(rdentry)
    }

    /// Entry table for `set`: the revalidate wrapper only when asked for,
    /// the iput sentinel and the release wrapper always.
    fn derive(this: &Arc<Self>, set: &OperationSet) -> DentryOperations {
        let old = &this.op_old;
        DentryOperations {
            d_revalidate: if set.contains(OpId::DentryRevalidate) {
                Some(rfs_d_revalidate as RevalidateFn)
            } else {
                old.d_revalidate
            },
            d_iput: Some(Slot::Interposed {
                route: rfs_d_iput as IputFn,
                owner: this.clone(),
            }),
            d_release: Some(rfs_d_release as ReleaseFn),
        }
    }

    /// TEAM_470: Shadow currently published on `dentry`, if any. Lock-free.
    pub fn find(dentry: &Dentry) -> Option<Arc<Self>> {
        let guard = rcu_read_lock();
        let owner = dentry.d_op.read(&guard).d_iput.as_ref()?.owner()?.clone();
        drop(guard);
        owner.downcast::<Self>().ok()
    }

    /// TEAM_470: Find or create the shadow of `dentry`.
    ///
    /// A positive dentry whose shadow holds no inode shadow yet gets one.
    pub(crate) fn add(
        dentry: &DentryRef,
        registry: &Arc<Registry>,
        reserved: Option<&Reservation>,
    ) -> VfsResult<Arc<Self>> {
        let _lock = dentry.d_lock.lock();

        let rdentry = match Self::find(dentry) {
            Some(found) => found,
            None => {
                let rdentry = Self::alloc(dentry, registry, reserved)?;
                if let Some(table) = rdentry.op_new.lock().clone() {
                    dentry.d_op.assign(table);
                }
                rdentry
            }
        };

        if let Some(inode) = dentry.inode() {
            if rdentry.state.lock().rinode.is_none() {
                let rinode = RInode::add(&inode, &rdentry.registry, reserved)?;
                rdentry.state.lock().rinode = Some(rinode);
            }
        }
        Ok(rdentry)
    }

    /// TEAM_470: Unshadow `dentry`. Returns false if it had no shadow.
    ///
    /// Same locking rule as [`RInode::del`].
    pub(crate) fn del(dentry: &DentryRef) -> bool {
        let lock = dentry.d_lock.lock();
        let Some(rdentry) = Self::find(dentry) else {
            return false;
        };
        dentry.d_op.assign(rdentry.op_old.clone());
        let rinode = rdentry.state.lock().rinode.take();
        drop(lock);

        if let Some(inode) = rinode.as_ref().and_then(|r| r.inode()) {
            RInode::del(&inode);
        }
        log::debug!("redirfs: rdentry restore {}", dentry.path());
        call_rcu(move || Self::detach(rdentry));
        rcu_poll();
        true
    }

    fn detach(this: Arc<Self>) {
        this.op_new.lock().take();
        let old = {
            let mut state = this.state.lock();
            (state.active.take(), state.rinode.take())
        };
        drop(old);
    }

    /// TEAM_470: Rebuild the published table from the active operation set.
    pub(crate) fn set_ops(this: &Arc<Self>) {
        let Some(dentry) = this.dentry.upgrade() else {
            return;
        };
        let set = this.active().map(|r| *r.ops).unwrap_or_default();
        let _lock = dentry.d_lock.lock();

        let mut op_new = this.op_new.lock();
        let Some(current) = op_new.as_ref() else {
            return;
        };
        if !dentry.d_op.is(current) {
            return;
        }
        let table = Arc::new(Self::derive(this, &set));
        *op_new = Some(table.clone());
        dentry.d_op.assign(table);
    }

    pub fn dentry(&self) -> Option<DentryRef> {
        self.dentry.upgrade()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn active(&self) -> Option<Arc<Redirection>> {
        self.state.lock().active.clone()
    }

    /// TEAM_470: Inode shadow this entry holds, if the entry is positive
    pub fn rinode(&self) -> Option<Arc<RInode>> {
        self.state.lock().rinode.clone()
    }

    pub(crate) fn set_active(&self, redir: &Arc<Redirection>) {
        let old = self.state.lock().active.replace(redir.clone());
        drop(old);
    }
}

impl Drop for RDentry {
    fn drop(&mut self) {
        log::debug!("redirfs: rdentry free");
        self.registry.release_rdentry();
    }
}

impl fmt::Debug for RDentry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RDentry")
            .field("dentry", &self.dentry.upgrade().map(|d| d.path()))
            .finish_non_exhaustive()
    }
}

/// TEAM_470: Make `redir` the configuration of `dentry` and of its inode.
///
/// The entry gets it as its active configuration; the inode gets it as both
/// active and pending, so that entries created below inherit it. Both tables
/// are re-derived from its operation set. New shadows draw on `reserved`
/// first.
pub(crate) fn apply_redirection(
    dentry: &DentryRef,
    registry: &Arc<Registry>,
    redir: &Arc<Redirection>,
    reserved: Option<&Reservation>,
) -> VfsResult<()> {
    let rdentry = RDentry::add(dentry, registry, reserved)?;
    rdentry.set_active(redir);
    RDentry::set_ops(&rdentry);

    if let Some(rinode) = rdentry.rinode() {
        rinode.set_config(redir);
        RInode::set_ops(&rinode);
    }
    Ok(())
}

// ============================================================================
// Dentry operation wrappers
// ============================================================================

fn rfs_d_iput(dentry: &DentryRef, inode: InodeRef) {
    let Some(rdentry) = RDentry::find(dentry) else {
        // Unshadowed since the caller loaded the table: the live one holds
        // no sentinel of ours.
        match dentry.ops().d_iput.as_ref().map(Slot::routine) {
            Some(iput) => iput(dentry, inode),
            None => drop(inode),
        }
        return;
    };

    let rinode = {
        let _lock = dentry.d_lock.lock();
        rdentry.state.lock().rinode.take()
    };
    if rinode.is_some() {
        RInode::del(&inode);
    }
    drop(rinode);

    match rdentry.op_old.d_iput.as_ref().map(Slot::routine) {
        Some(iput) => iput(dentry, inode),
        None => drop(inode),
    }
}

fn rfs_d_release(dentry: &DentryRef) {
    let old = RDentry::find(dentry).and_then(|r| r.op_old.d_release);
    RDentry::del(dentry);
    if let Some(release) = old {
        release(dentry);
    }
}

fn rfs_d_revalidate(dentry: &DentryRef) -> VfsResult<bool> {
    let Some(rdentry) = RDentry::find(dentry) else {
        return Ok(true);
    };

    let old = rdentry.op_old.d_revalidate;
    let active = rdentry.active();
    let chain = active.as_ref().map(|redir| redir.chain.as_ref());
    let args = OpArgs::Revalidate {
        dentry: dentry.clone(),
    };
    let done = rfs_call(chain, 0, RfsArgs::new(OpId::DentryRevalidate, args), |args| {
        let OpArgs::Revalidate { dentry } = args else {
            bad_args(OpId::DentryRevalidate)
        };
        Retv::Valid(old.map_or(Ok(true), |revalidate| revalidate(dentry)))
    });
    done.retv.into_valid()
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::config::RedirConfig;
    use crate::redir::chain::{Chain, Filter, FilterHandle, Verdict};
    use crate::redir::context::Context;
    use crate::redir::path::RPath;
    use crate::tmpfs;
    use crate::vfs::{self, VfsError};
    use alloc::vec::Vec;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use los_utils::rcu_barrier;

    static IPUTS: AtomicUsize = AtomicUsize::new(0);

    fn counting_iput(_dentry: &DentryRef, inode: InodeRef) {
        IPUTS.fetch_add(1, Ordering::SeqCst);
        drop(inode);
    }

    #[test]
    fn test_positive_dentry_shadow_holds_inode_shadow() {
        let registry = Registry::new(RedirConfig::DEFAULT);
        let root = tmpfs::mount();
        let file = vfs::vfs_create(&root, "f", 0o644).unwrap();
        let inode = file.inode().unwrap();

        let rdentry = RDentry::add(&file, &registry, None).unwrap();
        assert!(Arc::ptr_eq(&RDentry::find(&file).unwrap(), &rdentry));
        let rinode = rdentry.rinode().unwrap();
        assert!(Arc::ptr_eq(&RInode::find(&inode).unwrap(), &rinode));

        // Adding again neither allocates nor takes a second link.
        RDentry::add(&file, &registry, None).unwrap();
        assert_eq!(rinode.nlink(), 1);
        assert_eq!(registry.rdentries(), 1);

        assert!(RDentry::del(&file));
        assert!(!RDentry::del(&file));
        assert!(RInode::find(&inode).is_none());
        drop((rdentry, rinode));
        rcu_barrier();
        assert!(registry.is_drained());
    }

    #[test]
    fn test_unlink_drops_the_inode_shadow() {
        let registry = Registry::new(RedirConfig::DEFAULT);
        let root = tmpfs::mount();
        let file = vfs::vfs_create(&root, "gone", 0o644).unwrap();
        let inode = file.inode().unwrap();
        RDentry::add(&file, &registry, None).unwrap();

        vfs::vfs_unlink(&root, "gone").unwrap();
        assert!(RInode::find(&inode).is_none());
        // The negative dentry keeps its own shadow until it is released.
        let rdentry = RDentry::find(&file).unwrap();
        assert!(rdentry.rinode().is_none());

        vfs::d_invalidate(&file);
        assert!(RDentry::find(&file).is_none());
        drop(rdentry);
        rcu_barrier();
        assert!(registry.is_drained());
    }

    /// A caller still holding the shadowed table after the shadow is gone
    /// ends up in the filesystem's own `d_iput`.
    #[test]
    fn test_late_iput_uses_live_table() {
        let registry = Registry::new(RedirConfig::DEFAULT);
        let root = tmpfs::mount();
        let file = vfs::vfs_create(&root, "late", 0o644).unwrap();
        let inode = file.inode().unwrap();
        file.d_op.assign(Arc::new(DentryOperations {
            d_iput: Some(Slot::Fs(counting_iput as IputFn)),
            ..DentryOperations::default()
        }));

        RDentry::add(&file, &registry, None).unwrap();
        let stale = file.ops();
        assert!(RDentry::del(&file));
        assert!(RDentry::find(&file).is_none());

        let iput = stale.d_iput.as_ref().map(Slot::routine).unwrap();
        iput(&file, inode);
        assert_eq!(IPUTS.load(Ordering::SeqCst), 1);

        drop(stale);
        rcu_barrier();
        assert!(registry.is_drained());
    }

    struct Stale;

    impl Filter for Stale {
        fn pre_call(&self, _cx: &mut Context, args: &mut RfsArgs) -> Verdict {
            args.retv = Retv::Valid(Ok(false));
            Verdict::Stop
        }
    }

    #[test]
    fn test_revalidate_goes_through_the_chain() {
        let registry = Registry::new(RedirConfig::DEFAULT);
        let root = tmpfs::mount();
        let file = vfs::vfs_create(&root, "r", 0o644).unwrap();

        let ops = OperationSet::from_ops(&[OpId::DentryRevalidate]);
        let chain = Chain::new(alloc::vec![FilterHandle::new("stale", ops, Stale)]);
        let redir = Redirection::new(RPath::new("/r"), chain, ops);
        apply_redirection(&file, &registry, &redir, None).unwrap();
        assert_eq!(vfs::dentry::d_revalidate(&file), Ok(false));

        // A stale entry is dropped from the cache and looked up afresh.
        let fresh = vfs::lookup_one(&root, "r").unwrap();
        assert!(!Arc::ptr_eq(&fresh, &file));
        assert!(RDentry::find(&file).is_none());
        assert!(!fresh.is_negative());

        registry.shutdown(&root);
        assert!(registry.is_drained());
    }

    #[test]
    fn test_empty_set_keeps_fs_revalidate() {
        let registry = Registry::new(RedirConfig::DEFAULT);
        let root = tmpfs::mount();
        let redir = Redirection::new(RPath::new("/"), Chain::new(Vec::new()), OperationSet::empty());
        apply_redirection(&root, &registry, &redir, None).unwrap();
        assert!(root.ops().d_revalidate.is_none());
        assert_eq!(vfs::dentry::d_revalidate(&root), Ok(true));
        assert_eq!(registry.unredirect(&root).map(|n| n > 0), Ok(true));
        assert_eq!(registry.unredirect(&root).err(), Some(VfsError::NoData));
        rcu_barrier();
    }
}
