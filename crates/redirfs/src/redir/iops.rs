//! TEAM_470: Inode operation wrappers
//!
//! Each wrapper has the exact signature of the slot it replaces. It finds
//! the shadow through the sentinel, runs the active chain around the
//! original routine and, for calls that produce a new entry, hands the
//! parent's pending configuration down to that entry and its inode.
//!
//! If the shadow is gone by the time the wrapper runs (the tables were
//! restored under a caller that had already loaded them), the wrapper
//! behaves exactly like the inode's live table.

use alloc::sync::Arc;

use super::call::rfs_call;
use super::context::{OpArgs, RfsArgs, Retv};
use super::ops::OpId;
use super::path::Redirection;
use super::rdentry::{self, RDentry};
use super::registry::Reservation;
use super::rinode::RInode;
use crate::vfs::ops::{generic_permission, inode_setattr};
use crate::vfs::{DentryRef, FileKind, InodeRef, MayMask, SetAttr, Slot, VfsError, VfsResult};

pub(crate) fn bad_args(op: OpId) -> ! {
    unreachable!("redirfs: a filter replaced the arguments of {op:?}")
}

/// TEAM_470: Chain run shared by the directory operations.
///
/// `propagate` is false for calls that remove entries. On success the
/// parent's pending configuration is applied to the produced entry: the
/// alias a lookup returned if there is one, else the argument dentry.
///
/// Calls that create an entry charge the shadows it will need before
/// anything runs, so a full registry refuses the call instead of leaving an
/// entry behind that the caller was told does not exist.
fn dir_call<O>(parent: &Arc<RInode>, op: OpId, args: OpArgs, propagate: bool, original: O) -> Retv
where
    O: FnOnce(&OpArgs) -> Retv,
{
    assert_eq!(
        parent.kind(),
        FileKind::Directory,
        "redirfs: {op:?} on a non-directory inode"
    );

    let (active, pending) = parent.config();
    let reserved = match (&pending, propagate) {
        (Some(_), true) => match reserve_for(parent, &args) {
            Ok(reserved) => reserved,
            Err(e) => {
                log::warn!("redirfs: {op:?} refused, no room for shadows: {e}");
                return Retv::Status(Err(e));
            }
        },
        _ => None,
    };

    // Creators and lookup always route through here; they only reach
    // filters when asked for.
    let chain = active
        .as_ref()
        .filter(|redir| redir.ops.contains(op))
        .map(|redir| redir.chain.as_ref());
    let mut done = rfs_call(chain, 0, RfsArgs::new(op, args), original);

    let Some(pending) = pending else {
        return done.retv;
    };
    if !propagate || !done.retv.is_ok() {
        return done.retv;
    }

    let target = match &done.retv {
        Retv::Dentry(Ok(Some(alias))) => Some(alias.clone()),
        _ => done.args.dentry().cloned(),
    };
    if let Some(target) = target {
        if let Err(e) = propagate_to(parent, &target, &pending, reserved.as_ref()) {
            log::warn!("redirfs: {op:?} {} not redirected: {e}", target.path());
            // A lookup changed nothing and can fail; a creator's entry exists.
            if reserved.is_none() {
                done.retv = Retv::Status(Err(e));
            }
        }
    }
    done.retv
}

/// Charge the shadows a creating call will need for its new entry. Lookups
/// create nothing on the filesystem and charge as they go.
fn reserve_for(parent: &RInode, args: &OpArgs) -> VfsResult<Option<Reservation>> {
    let needs_rinode = match args {
        OpArgs::Lookup { .. } => return Ok(None),
        OpArgs::Link { old, .. } => old.inode().is_none_or(|inode| RInode::find(&inode).is_none()),
        _ => true,
    };
    let Some(dentry) = args.dentry() else {
        return Ok(None);
    };
    let needs_rdentry = RDentry::find(dentry).is_none();
    parent
        .registry()
        .reserve(usize::from(needs_rdentry), usize::from(needs_rinode))
        .map(Some)
}

fn propagate_to(
    parent: &RInode,
    dentry: &DentryRef,
    pending: &Arc<Redirection>,
    reserved: Option<&Reservation>,
) -> VfsResult<()> {
    rdentry::apply_redirection(dentry, parent.registry(), pending, reserved)
}

// ============================================================================
// Directory operations
// ============================================================================

pub(crate) fn rfs_lookup(dir: &InodeRef, dentry: &DentryRef) -> VfsResult<Option<DentryRef>> {
    let Some(parent) = RInode::find(dir) else {
        return match dir.iop().lookup.as_ref().map(Slot::routine) {
            Some(lookup) => lookup(dir, dentry),
            None => Err(VfsError::NoSys),
        };
    };

    let old = parent.op_old.lookup.as_ref().map(Slot::routine);
    let args = OpArgs::Lookup {
        dir: dir.clone(),
        dentry: dentry.clone(),
    };
    dir_call(&parent, OpId::DirLookup, args, true, |args| {
        let OpArgs::Lookup { dir, dentry } = args else {
            bad_args(OpId::DirLookup)
        };
        Retv::Dentry(old.map_or(Err(VfsError::NoSys), |lookup| lookup(dir, dentry)))
    })
    .into_dentry()
}

pub(crate) fn rfs_create(dir: &InodeRef, dentry: &DentryRef, mode: u32) -> VfsResult<()> {
    let Some(parent) = RInode::find(dir) else {
        return match dir.iop().create {
            Some(create) => create(dir, dentry, mode),
            None => Err(VfsError::AccessDenied),
        };
    };

    let old = parent.op_old.create;
    let args = OpArgs::Create {
        dir: dir.clone(),
        dentry: dentry.clone(),
        mode,
    };
    dir_call(&parent, OpId::DirCreate, args, true, |args| {
        let OpArgs::Create { dir, dentry, mode } = args else {
            bad_args(OpId::DirCreate)
        };
        Retv::Status(old.map_or(Err(VfsError::AccessDenied), |create| create(dir, dentry, *mode)))
    })
    .into_status()
}

pub(crate) fn rfs_mkdir(dir: &InodeRef, dentry: &DentryRef, mode: u32) -> VfsResult<()> {
    let Some(parent) = RInode::find(dir) else {
        return match dir.iop().mkdir {
            Some(mkdir) => mkdir(dir, dentry, mode),
            None => Err(VfsError::PermissionDenied),
        };
    };

    let old = parent.op_old.mkdir;
    let args = OpArgs::Mkdir {
        dir: dir.clone(),
        dentry: dentry.clone(),
        mode,
    };
    dir_call(&parent, OpId::DirMkdir, args, true, |args| {
        let OpArgs::Mkdir { dir, dentry, mode } = args else {
            bad_args(OpId::DirMkdir)
        };
        Retv::Status(old.map_or(Err(VfsError::PermissionDenied), |mkdir| mkdir(dir, dentry, *mode)))
    })
    .into_status()
}

pub(crate) fn rfs_mknod(dir: &InodeRef, dentry: &DentryRef, mode: u32, rdev: u64) -> VfsResult<()> {
    let Some(parent) = RInode::find(dir) else {
        return match dir.iop().mknod {
            Some(mknod) => mknod(dir, dentry, mode, rdev),
            None => Err(VfsError::PermissionDenied),
        };
    };

    let old = parent.op_old.mknod;
    let args = OpArgs::Mknod {
        dir: dir.clone(),
        dentry: dentry.clone(),
        mode,
        rdev,
    };
    dir_call(&parent, OpId::DirMknod, args, true, |args| {
        let OpArgs::Mknod { dir, dentry, mode, rdev } = args else {
            bad_args(OpId::DirMknod)
        };
        Retv::Status(old.map_or(Err(VfsError::PermissionDenied), |mknod| {
            mknod(dir, dentry, *mode, *rdev)
        }))
    })
    .into_status()
}

pub(crate) fn rfs_symlink(dir: &InodeRef, dentry: &DentryRef, target: &str) -> VfsResult<()> {
    let Some(parent) = RInode::find(dir) else {
        return match dir.iop().symlink {
            Some(symlink) => symlink(dir, dentry, target),
            None => Err(VfsError::PermissionDenied),
        };
    };

    let old = parent.op_old.symlink;
    let args = OpArgs::Symlink {
        dir: dir.clone(),
        dentry: dentry.clone(),
        target: target.into(),
    };
    dir_call(&parent, OpId::DirSymlink, args, true, |args| {
        let OpArgs::Symlink { dir, dentry, target } = args else {
            bad_args(OpId::DirSymlink)
        };
        Retv::Status(old.map_or(Err(VfsError::PermissionDenied), |symlink| {
            symlink(dir, dentry, target)
        }))
    })
    .into_status()
}

pub(crate) fn rfs_link(old_dentry: &DentryRef, dir: &InodeRef, dentry: &DentryRef) -> VfsResult<()> {
    let Some(parent) = RInode::find(dir) else {
        return match dir.iop().link {
            Some(link) => link(old_dentry, dir, dentry),
            None => Err(VfsError::PermissionDenied),
        };
    };

    let old = parent.op_old.link;
    let args = OpArgs::Link {
        old: old_dentry.clone(),
        dir: dir.clone(),
        dentry: dentry.clone(),
    };
    dir_call(&parent, OpId::DirLink, args, true, |args| {
        let OpArgs::Link { old: target, dir, dentry } = args else {
            bad_args(OpId::DirLink)
        };
        Retv::Status(old.map_or(Err(VfsError::PermissionDenied), |link| link(target, dir, dentry)))
    })
    .into_status()
}

pub(crate) fn rfs_unlink(dir: &InodeRef, dentry: &DentryRef) -> VfsResult<()> {
    let Some(parent) = RInode::find(dir) else {
        return match dir.iop().unlink {
            Some(unlink) => unlink(dir, dentry),
            None => Err(VfsError::PermissionDenied),
        };
    };

    let old = parent.op_old.unlink;
    let args = OpArgs::Unlink {
        dir: dir.clone(),
        dentry: dentry.clone(),
    };
    dir_call(&parent, OpId::DirUnlink, args, false, |args| {
        let OpArgs::Unlink { dir, dentry } = args else {
            bad_args(OpId::DirUnlink)
        };
        Retv::Status(old.map_or(Err(VfsError::PermissionDenied), |unlink| unlink(dir, dentry)))
    })
    .into_status()
}

pub(crate) fn rfs_rmdir(dir: &InodeRef, dentry: &DentryRef) -> VfsResult<()> {
    let Some(parent) = RInode::find(dir) else {
        return match dir.iop().rmdir {
            Some(rmdir) => rmdir(dir, dentry),
            None => Err(VfsError::PermissionDenied),
        };
    };

    let old = parent.op_old.rmdir;
    let args = OpArgs::Rmdir {
        dir: dir.clone(),
        dentry: dentry.clone(),
    };
    dir_call(&parent, OpId::DirRmdir, args, false, |args| {
        let OpArgs::Rmdir { dir, dentry } = args else {
            bad_args(OpId::DirRmdir)
        };
        Retv::Status(old.map_or(Err(VfsError::PermissionDenied), |rmdir| rmdir(dir, dentry)))
    })
    .into_status()
}

// ============================================================================
// Attribute operations
// ============================================================================

/// TEAM_470: Permission check. Without a routine of its own the inode gets
/// the generic mode-bit check, which knows nothing about append.
pub(crate) fn rfs_permission(inode: &InodeRef, mask: MayMask) -> VfsResult<()> {
    let Some(rinode) = RInode::find(inode) else {
        return match inode.iop().permission {
            Some(permission) => permission(inode, mask),
            None => generic_permission(inode, mask & !MayMask::APPEND),
        };
    };

    let op = OpId::permission(rinode.kind());
    let old = rinode.op_old.permission;
    let active = rinode.active();
    let args = OpArgs::Permission {
        inode: inode.clone(),
        mask,
    };
    let done = rfs_call(active.as_ref().map(|r| r.chain.as_ref()), 0, RfsArgs::new(op, args), |args| {
        let OpArgs::Permission { inode, mask } = args else {
            bad_args(op)
        };
        Retv::Status(match old {
            Some(permission) => permission(inode, *mask),
            None => generic_permission(inode, *mask & !MayMask::APPEND),
        })
    });
    done.retv.into_status()
}

pub(crate) fn rfs_setattr(dentry: &DentryRef, attr: &SetAttr) -> VfsResult<()> {
    let inode = dentry.inode().ok_or(VfsError::NotFound)?;
    let Some(rinode) = RInode::find(&inode) else {
        return match inode.iop().setattr {
            Some(setattr) => setattr(dentry, attr),
            None => inode_setattr(&inode, attr),
        };
    };

    let op = OpId::setattr(rinode.kind());
    let old = rinode.op_old.setattr;
    let active = rinode.active();
    let args = OpArgs::Setattr {
        dentry: dentry.clone(),
        attr: attr.clone(),
    };
    let done = rfs_call(active.as_ref().map(|r| r.chain.as_ref()), 0, RfsArgs::new(op, args), |args| {
        let OpArgs::Setattr { dentry, attr } = args else {
            bad_args(op)
        };
        Retv::Status(match (old, dentry.inode()) {
            (Some(setattr), _) => setattr(dentry, attr),
            (None, Some(inode)) => inode_setattr(&inode, attr),
            (None, None) => Err(VfsError::NotFound),
        })
    });
    done.retv.into_status()
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::config::RedirConfig;
    use crate::redir::chain::{Chain, Filter, FilterHandle, Verdict};
    use crate::redir::context::Context;
    use crate::redir::ops::OperationSet;
    use crate::redir::path::RPath;
    use crate::redir::registry::Registry;
    use crate::tmpfs;
    use crate::vfs;
    use alloc::vec::Vec;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use los_utils::rcu_barrier;

    struct Deny;

    impl Filter for Deny {
        fn pre_call(&self, _cx: &mut Context, args: &mut RfsArgs) -> Verdict {
            args.retv = Retv::Status(Err(VfsError::AccessDenied));
            Verdict::Stop
        }
    }

    struct Count(Arc<AtomicUsize>);

    impl Filter for Count {
        fn pre_call(&self, _cx: &mut Context, _args: &mut RfsArgs) -> Verdict {
            self.0.fetch_add(1, Ordering::SeqCst);
            Verdict::Continue
        }
    }

    #[test]
    fn test_stopped_create_leaves_fs_untouched() {
        let registry = Registry::new(RedirConfig::DEFAULT);
        let root = tmpfs::mount();
        let ops = OperationSet::from_ops(&[OpId::DirCreate]);
        let chain = Chain::new(alloc::vec![FilterHandle::new("deny", ops, Deny)]);
        registry
            .redirect(&root, Redirection::new(RPath::new("/"), chain, ops))
            .unwrap();

        assert_eq!(vfs::vfs_create(&root, "nope", 0o644).err(), Some(VfsError::AccessDenied));
        let dir = root.inode().unwrap();
        assert!(!tmpfs::node(&dir).unwrap().has_child("nope"));

        // Unintercepted ops still reach the filesystem.
        assert!(vfs::vfs_mkdir(&root, "dir", 0o755).is_ok());

        registry.shutdown(&root);
    }

    #[test]
    fn test_unlink_does_not_propagate() {
        let registry = Registry::new(RedirConfig::DEFAULT);
        let root = tmpfs::mount();
        let seen = Arc::new(AtomicUsize::new(0));
        let ops = OperationSet::from_ops(&[OpId::DirUnlink, OpId::RegPermission]);
        let chain = Chain::new(alloc::vec![FilterHandle::new("count", ops, Count(seen.clone()))]);

        vfs::vfs_create(&root, "f", 0o644).unwrap();
        registry
            .redirect(&root, Redirection::new(RPath::new("/"), chain, ops))
            .unwrap();

        vfs::vfs_unlink(&root, "f").unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        registry.shutdown(&root);
        assert!(registry.is_drained());
    }

    #[test]
    fn test_permission_without_fs_routine_masks_append() {
        let registry = Registry::new(RedirConfig::DEFAULT);
        let root = tmpfs::mount();
        let file = vfs::vfs_create(&root, "ro", 0o444).unwrap();
        let inode = file.inode().unwrap();
        let ops = OperationSet::from_ops(&[OpId::RegPermission]);
        registry
            .redirect(&file, Redirection::new(RPath::new("/ro"), Chain::new(Vec::new()), ops))
            .unwrap();

        assert!(vfs::vfs_permission(&inode, MayMask::READ | MayMask::APPEND).is_ok());
        assert_eq!(
            vfs::vfs_permission(&inode, MayMask::WRITE).err(),
            Some(VfsError::AccessDenied)
        );
        registry.shutdown(&root);
        rcu_barrier();
    }
}
