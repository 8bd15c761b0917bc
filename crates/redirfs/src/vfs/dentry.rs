//! TEAM_202: Dentry (Directory Entry Cache) Implementation
//!
//! The dentry cache (dcache) caches path→inode lookups to avoid
//! repeated filesystem traversals.
//!
//! TEAM_470: Dentries carry a swappable operation table. Its hooks run when
//! the dentry drops its inode (`d_iput`), when it leaves the cache
//! (`d_release`) and when a cached dentry is about to be reused
//! (`d_revalidate`).

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use los_utils::{Lazy, Mutex, RcuCell, RwLock};

use super::error::VfsResult;
use super::inode::InodeRef;
use super::ops::DentryOperations;

/// TEAM_202: Reference to a dentry
pub type DentryRef = Arc<Dentry>;

/// TEAM_202: Weak reference to a dentry
pub type WeakDentryRef = Weak<Dentry>;

static NO_DENTRY_OPS: Lazy<Arc<DentryOperations>> =
    Lazy::new(|| Arc::new(DentryOperations::default()));

/// TEAM_202: Directory Entry Cache Entry
///
/// A dentry caches the mapping from a name to an inode within a directory.
/// Dentries form a tree structure that mirrors the directory hierarchy.
pub struct Dentry {
    /// Name of this entry (e.g., "foo" in "/bar/foo")
    pub name: String,
    /// Parent dentry (None for root)
    pub parent: Option<WeakDentryRef>,
    /// Inode this dentry points to (None = negative dentry)
    inode: RwLock<Option<InodeRef>>,
    /// Child dentries
    children: RwLock<BTreeMap<String, DentryRef>>,
    /// Live dentry operations
    pub d_op: RcuCell<DentryOperations>,
    /// Serializes swaps of the live table
    pub d_lock: Mutex<()>,
    /// Set once the dentry has left the cache
    killed: AtomicBool,
}

impl Dentry {
    fn new(name: String, parent: Option<WeakDentryRef>, inode: Option<InodeRef>) -> Self {
        Self {
            name,
            parent,
            inode: RwLock::new(inode),
            children: RwLock::new(BTreeMap::new()),
            d_op: RcuCell::new(NO_DENTRY_OPS.clone()),
            d_lock: Mutex::new(()),
            killed: AtomicBool::new(false),
        }
    }

    /// TEAM_202: Create a root dentry
    pub fn root(inode: InodeRef) -> DentryRef {
        Arc::new(Self::new(String::from("/"), None, Some(inode)))
    }

    /// TEAM_470: Allocate a negative child of `parent`, not yet in the cache
    pub fn alloc(parent: &DentryRef, name: &str) -> DentryRef {
        Arc::new(Self::new(String::from(name), Some(Arc::downgrade(parent)), None))
    }

    pub fn inode(&self) -> Option<InodeRef> {
        self.inode.read().clone()
    }

    /// TEAM_202: Check if this is a negative dentry (no inode)
    pub fn is_negative(&self) -> bool {
        self.inode.read().is_none()
    }

    pub fn parent(&self) -> Option<DentryRef> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// TEAM_470: Current dentry operations
    pub fn ops(&self) -> Arc<DentryOperations> {
        self.d_op.load()
    }

    /// TEAM_202: Look up a child by name
    pub fn lookup_child(&self, name: &str) -> Option<DentryRef> {
        self.children.read().get(name).cloned()
    }

    /// TEAM_202: Add a child dentry
    pub fn add_child(&self, child: DentryRef) {
        self.children.write().insert(child.name.clone(), child);
    }

    /// TEAM_202: Remove a child dentry
    pub fn remove_child(&self, name: &str) -> Option<DentryRef> {
        self.children.write().remove(name)
    }

    pub fn children(&self) -> Vec<DentryRef> {
        self.children.read().values().cloned().collect()
    }

    /// TEAM_202: Get the full path from root
    pub fn path(&self) -> String {
        let mut components = Vec::new();
        if self.parent.is_some() {
            components.push(self.name.clone());
        }

        let mut parent = self.parent();
        while let Some(p) = parent {
            if p.parent.is_some() {
                components.push(p.name.clone());
            }
            parent = p.parent();
        }

        components.reverse();
        let mut path = String::from("/");
        path.push_str(&components.join("/"));
        path
    }
}

impl core::fmt::Debug for Dentry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dentry")
            .field("name", &self.name)
            .field("is_negative", &self.is_negative())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Dentry lifetime
// ============================================================================

/// TEAM_470: Bind `inode` to a negative dentry
pub fn d_instantiate(dentry: &Dentry, inode: InodeRef) {
    *dentry.inode.write() = Some(inode);
}

/// TEAM_470: Drop the dentry's inode reference through its `d_iput` hook
pub fn d_iput(dentry: &DentryRef) {
    let Some(inode) = dentry.inode.write().take() else {
        return;
    };
    match dentry.ops().d_iput.as_ref().map(|slot| slot.routine()) {
        Some(iput) => iput(dentry, inode),
        None => drop(inode),
    }
}

/// TEAM_470: Turn a dentry negative after its inode was unlinked
pub fn d_delete(dentry: &DentryRef) {
    d_iput(dentry);
}

/// TEAM_470: Ask the dentry's `d_revalidate` hook whether it can be reused
pub fn d_revalidate(dentry: &DentryRef) -> VfsResult<bool> {
    match dentry.ops().d_revalidate {
        Some(revalidate) => revalidate(dentry),
        None => Ok(true),
    }
}

/// TEAM_470: Remove a dentry and everything below it from the cache.
///
/// Children go first. Each dentry drops its inode through `d_iput` and then
/// runs its `d_release` hook. Killing a dentry twice is a no-op.
pub fn d_invalidate(dentry: &DentryRef) {
    if dentry.killed.swap(true, Ordering::AcqRel) {
        return;
    }

    for child in dentry.children() {
        d_invalidate(&child);
    }

    if let Some(parent) = dentry.parent() {
        if parent
            .lookup_child(&dentry.name)
            .is_some_and(|cached| Arc::ptr_eq(&cached, dentry))
        {
            parent.remove_child(&dentry.name);
        }
    }

    d_iput(dentry);
    if let Some(release) = dentry.ops().d_release {
        release(dentry);
    }
}
