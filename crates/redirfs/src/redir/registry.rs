//! TEAM_470: Redirection registry
//!
//! Bookkeeping for one redirection instance: how many shadows are alive,
//! how many may be, and the entry points that attach a configuration at a
//! subtree root or take it away again.
//!
//! A shadow stays charged until its last reference is dropped, which for an
//! unshadowed object happens in a deferred callback. When a charge hits the
//! cap the registry polls for callbacks whose grace period is over before
//! giving up.

use alloc::sync::Arc;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use los_utils::{cpu_relax, rcu_barrier, rcu_poll};

use super::path::Redirection;
use super::rdentry::{self, RDentry};
use crate::config::RedirConfig;
use crate::vfs::{DentryRef, VfsError, VfsResult};

/// TEAM_470: Live shadow counts and limits of one redirection instance
#[derive(Debug)]
pub struct Registry {
    config: RedirConfig,
    rinodes: AtomicUsize,
    rdentries: AtomicUsize,
    shutting_down: AtomicBool,
}

/// Polls for finished grace periods before a full cap is reported.
const RECLAIM_POLLS: usize = 128;

fn charge(count: &AtomicUsize, max: usize) -> VfsResult<()> {
    count
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
        .map(|_| ())
        .map_err(|_| VfsError::OutOfMemory)
}

/// Take one unit off `count` if there is one left.
fn take_one(count: &AtomicUsize) -> bool {
    count
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

/// TEAM_470: Shadow allocations charged ahead of a call that creates an entry.
///
/// Allocations made while propagating the call's result draw on the
/// reservation instead of charging the registry again. Whatever is left
/// unused is given back on drop.
#[derive(Debug)]
pub(crate) struct Reservation {
    registry: Arc<Registry>,
    rdentries: AtomicUsize,
    rinodes: AtomicUsize,
}

impl Reservation {
    fn holds(&self, registry: &Registry) -> bool {
        ptr::eq(Arc::as_ptr(&self.registry), registry)
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let rdentries = *self.rdentries.get_mut();
        let rinodes = *self.rinodes.get_mut();
        self.registry.rdentries.fetch_sub(rdentries, Ordering::AcqRel);
        self.registry.rinodes.fetch_sub(rinodes, Ordering::AcqRel);
    }
}

impl Registry {
    pub fn new(config: RedirConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            rinodes: AtomicUsize::new(0),
            rdentries: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &RedirConfig {
        &self.config
    }

    pub fn rinodes(&self) -> usize {
        self.rinodes.load(Ordering::Acquire)
    }

    pub fn rdentries(&self) -> usize {
        self.rdentries.load(Ordering::Acquire)
    }

    /// TEAM_470: Charge one inode shadow, from `reserved` if it holds one.
    pub(crate) fn charge_rinode(&self, reserved: Option<&Reservation>) -> VfsResult<()> {
        if reserved.is_some_and(|r| r.holds(self) && take_one(&r.rinodes)) {
            return Ok(());
        }
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(VfsError::OutOfMemory);
        }
        charge(&self.rinodes, self.config.max_rinodes)
    }

    pub(crate) fn release_rinode(&self) {
        self.rinodes.fetch_sub(1, Ordering::AcqRel);
    }

    /// TEAM_470: Charge one dentry shadow, from `reserved` if it holds one.
    pub(crate) fn charge_rdentry(&self, reserved: Option<&Reservation>) -> VfsResult<()> {
        if reserved.is_some_and(|r| r.holds(self) && take_one(&r.rdentries)) {
            return Ok(());
        }
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(VfsError::OutOfMemory);
        }
        charge(&self.rdentries, self.config.max_rdentries)
    }

    pub(crate) fn release_rdentry(&self) {
        self.rdentries.fetch_sub(1, Ordering::AcqRel);
    }

    /// TEAM_470: Charge `rdentries` dentry and `rinodes` inode shadows up front.
    ///
    /// Must be called without any inode or dentry lock held: a full cap makes
    /// it run deferred frees whose grace period is already over.
    pub(crate) fn reserve(self: &Arc<Self>, rdentries: usize, rinodes: usize) -> VfsResult<Reservation> {
        let reservation = Reservation {
            registry: self.clone(),
            rdentries: AtomicUsize::new(0),
            rinodes: AtomicUsize::new(0),
        };
        for _ in 0..rdentries {
            self.charge_reclaiming(|r| r.charge_rdentry(None))?;
            reservation.rdentries.fetch_add(1, Ordering::AcqRel);
        }
        for _ in 0..rinodes {
            self.charge_reclaiming(|r| r.charge_rinode(None))?;
            reservation.rinodes.fetch_add(1, Ordering::AcqRel);
        }
        Ok(reservation)
    }

    fn charge_reclaiming(&self, charge: impl Fn(&Self) -> VfsResult<()>) -> VfsResult<()> {
        let mut polls = 0;
        loop {
            match charge(self) {
                Err(VfsError::OutOfMemory) if polls < RECLAIM_POLLS && !self.is_shutting_down() => {
                    polls += 1;
                    if rcu_poll() == 0 {
                        cpu_relax();
                    }
                }
                result => return result,
            }
        }
    }

    /// TEAM_470: True once every shadow of this registry has been freed
    pub fn is_drained(&self) -> bool {
        self.rinodes() == 0 && self.rdentries() == 0
    }

    /// TEAM_470: Run deferred frees until every shadow is gone.
    ///
    /// Spins for as long as anything still holds a shadow.
    pub fn wait_drained(&self) {
        loop {
            rcu_barrier();
            if self.is_drained() {
                return;
            }
            cpu_relax();
        }
    }

    // ========================================================================
    // Attaching and removing redirections
    // ========================================================================

    /// TEAM_470: Attach `redir` at `root`.
    ///
    /// The root entry and its inode take it as their configuration; entries
    /// created or looked up below inherit it from there.
    pub fn redirect(self: &Arc<Self>, root: &DentryRef, redir: Arc<Redirection>) -> VfsResult<()> {
        rdentry::apply_redirection(root, self, &redir, None)?;
        log::debug!(
            "redirfs: redirected {} ({} filters)",
            root.path(),
            redir.chain.len()
        );
        Ok(())
    }

    /// TEAM_470: Remove this registry's shadows from `root` and every cached
    /// entry below it. Returns how many entries were unshadowed.
    ///
    /// `NoData` if `root` itself is not shadowed by this registry.
    pub fn unredirect(&self, root: &DentryRef) -> VfsResult<usize> {
        if !RDentry::find(root).is_some_and(|r| self.owns(&r)) {
            return Err(VfsError::NoData);
        }
        let removed = self.walk_del(root);
        log::debug!("redirfs: unredirected {} ({removed} entries)", root.path());
        Ok(removed)
    }

    /// TEAM_470: Unshadow everything of ours below `root` and run the
    /// deferred frees. Returns how many entries were unshadowed.
    pub fn reclaim(&self, root: &DentryRef) -> usize {
        let removed = self.walk_del(root);
        rcu_barrier();
        removed
    }

    /// TEAM_470: Refuse new shadows, reclaim the tree under `root` and wait
    /// until the last shadow is freed.
    pub fn shutdown(&self, root: &DentryRef) {
        self.shutting_down.store(true, Ordering::Release);
        let removed = self.reclaim(root);
        self.wait_drained();
        log::debug!("redirfs: registry shut down, {removed} entries reclaimed");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    fn owns(&self, rdentry: &RDentry) -> bool {
        ptr::eq(Arc::as_ptr(rdentry.registry()), self)
    }

    fn walk_del(&self, dentry: &DentryRef) -> usize {
        let mut removed: usize = dentry
            .children()
            .iter()
            .map(|child| self.walk_del(child))
            .sum();
        if RDentry::find(dentry).is_some_and(|r| self.owns(&r)) && RDentry::del(dentry) {
            removed += 1;
        }
        removed
    }
}
