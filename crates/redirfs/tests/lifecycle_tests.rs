//! Integration tests for shadow lifetime: reclamation, link counts and
//! concurrent readers.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use common::{ALL_OPS, new_log, recorder, redirection, setup};
use los_redirfs::redir::{OpId, RDentry, RInode};
use los_redirfs::{RedirConfig, Registry, tmpfs};
use los_redirfs::vfs::{self, MayMask};
use los_utils::rcu_barrier;

// ============================================================================
// Reclamation
// ============================================================================

mod reclaim_tests {
    use super::*;

    /// Every reference the shadows took on the configuration is given back.
    #[test]
    fn test_shutdown_releases_configuration() {
        let (registry, root) = setup();
        let log = new_log();
        let filter = recorder("F1", &log, ALL_OPS);
        let redir = redirection("/", vec![filter.clone()], ALL_OPS);
        let filter_refs = Arc::strong_count(&filter);
        assert_eq!(Arc::strong_count(&redir), 1);

        registry.redirect(&root, redir.clone()).unwrap();
        let d = vfs::vfs_mkdir(&root, "d", 0o755).unwrap();
        vfs::vfs_create(&d, "f", 0o644).unwrap();
        vfs::vfs_symlink(&root, "l", "/d/f").unwrap();
        assert!(Arc::strong_count(&redir) > 1);

        registry.shutdown(&root);
        assert!(registry.is_drained());
        assert_eq!(Arc::strong_count(&redir), 1);
        assert_eq!(Arc::strong_count(&filter), filter_refs);
    }

    /// Dropping a subtree from the cache takes its shadows with it and
    /// leaves the rest alone.
    #[test]
    fn test_invalidate_subtree_frees_shadows() {
        let (registry, root) = setup();
        let redir = redirection("/", Vec::new(), &[
            OpId::DirLookup,
            OpId::DirMkdir,
            OpId::DirCreate,
        ]);
        registry.redirect(&root, redir).unwrap();

        let a = vfs::vfs_mkdir(&root, "a", 0o755).unwrap();
        let b = vfs::vfs_mkdir(&a, "b", 0o755).unwrap();
        vfs::vfs_create(&b, "f", 0o644).unwrap();
        let b_inode = b.inode().unwrap();
        assert_eq!(registry.rdentries(), 4);
        assert_eq!(registry.rinodes(), 4);

        vfs::d_invalidate(&a);
        rcu_barrier();
        assert_eq!(registry.rdentries(), 1);
        assert_eq!(registry.rinodes(), 1);
        assert!(RDentry::find(&a).is_none());
        assert!(b.is_negative());
        assert!(RInode::find(&b_inode).is_none());

        // Looking the directory up again shadows it afresh.
        let again = vfs::lookup_one(&root, "a").unwrap();
        assert!(!Arc::ptr_eq(&again, &a));
        assert!(RDentry::find(&again).is_some());
        assert_eq!(registry.rdentries(), 2);

        registry.shutdown(&root);
        assert!(registry.is_drained());
    }

    /// Unshadowed files are freed as the workload goes, without anybody
    /// waiting for a grace period, so a small cap is never exhausted by
    /// files that no longer exist.
    #[test]
    fn test_create_unlink_churn_stays_under_cap() {
        let registry = Registry::new(RedirConfig::DEFAULT.with_max_rinodes(2));
        let root = tmpfs::mount();
        let redir = redirection("/", Vec::new(), &[
            OpId::DirLookup,
            OpId::DirCreate,
            OpId::DirUnlink,
        ]);
        registry.redirect(&root, redir).unwrap();

        for round in 0..500 {
            let file = vfs::vfs_create(&root, "f", 0o644)
                .unwrap_or_else(|e| panic!("create failed in round {round}: {e}"));
            assert!(RInode::find(&file.inode().unwrap()).is_some());
            vfs::vfs_unlink(&root, "f").unwrap();
            assert!(registry.rinodes() <= 2);
        }

        registry.shutdown(&root);
        assert!(registry.is_drained());
    }

    #[test]
    fn test_unredirect_restores_tables() {
        let (registry, root) = setup();
        let file = vfs::vfs_create(&root, "f", 0o644).unwrap();
        let inode = file.inode().unwrap();
        let fs_iop = inode.iop();
        let fs_aops = inode.i_mapping.a_ops.load();

        registry
            .redirect(&file, redirection("/f", Vec::new(), ALL_OPS))
            .unwrap();
        assert!(!Arc::ptr_eq(&inode.iop(), &fs_iop));
        assert!(!Arc::ptr_eq(&inode.i_mapping.a_ops.load(), &fs_aops));

        assert_eq!(registry.unredirect(&file), Ok(1));
        assert!(Arc::ptr_eq(&inode.iop(), &fs_iop));
        assert!(Arc::ptr_eq(&inode.i_mapping.a_ops.load(), &fs_aops));
        assert_eq!(registry.unredirect(&file), Err(vfs::VfsError::NoData));

        registry.wait_drained();
    }
}

// ============================================================================
// Link counts
// ============================================================================

mod link_tests {
    use super::*;

    /// Two entries for one inode share one shadow; the tables come back only
    /// when the last entry lets go.
    #[test]
    fn test_hard_links_share_one_shadow() {
        let (registry, root) = setup();
        let redir = redirection("/", Vec::new(), &[
            OpId::DirLookup,
            OpId::DirCreate,
            OpId::DirLink,
            OpId::DirUnlink,
        ]);
        registry.redirect(&root, redir).unwrap();
        let plain = vfs::vfs_create(&tmpfs::mount(), "plain", 0o644).unwrap();

        let a = vfs::vfs_create(&root, "a", 0o644).unwrap();
        let b = vfs::vfs_link(&a, &root, "b").unwrap();
        let inode = a.inode().unwrap();
        let rinode = RInode::find(&inode).unwrap();
        assert_eq!(rinode.nlink(), 2);
        assert!(Arc::ptr_eq(&RDentry::find(&b).unwrap().rinode().unwrap(), &rinode));

        vfs::vfs_unlink(&root, "b").unwrap();
        assert!(b.is_negative());
        assert_eq!(rinode.nlink(), 1);
        assert!(RInode::find(&inode).is_some());

        vfs::vfs_unlink(&root, "a").unwrap();
        assert_eq!(rinode.nlink(), 0);
        assert!(RInode::find(&inode).is_none());
        assert!(Arc::ptr_eq(&inode.iop(), &plain.inode().unwrap().iop()));
        drop(rinode);

        registry.shutdown(&root);
        assert!(registry.is_drained());
    }
}

// ============================================================================
// Concurrency
// ============================================================================

mod concurrency_tests {
    use super::*;

    /// Readers dispatch through the inode while its shadow comes and goes.
    /// Every call must land either in the wrapper or in the filesystem,
    /// never in a half-restored table.
    #[test]
    fn test_dispatch_during_redirect_churn() {
        let (registry, root) = setup();
        let file = vfs::vfs_create(&root, "hot", 0o644).unwrap();
        let inode = file.inode().unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let inode = inode.clone();
                let stop = stop.clone();
                let calls = calls.clone();
                thread::spawn(move || {
                    while !stop.load(Ordering::Acquire) {
                        assert_eq!(vfs::vfs_permission(&inode, MayMask::READ), Ok(()));
                        if let Some(rinode) = RInode::find(&inode) {
                            assert_eq!(rinode.ino(), inode.ino);
                        }
                        calls.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();

        let log = new_log();
        let ops = &[OpId::RegPermission, OpId::RegSetattr];
        for _ in 0..200 {
            // The filter sits in the chain but never asks for permission.
            let redir = redirection("/hot", vec![recorder("F1", &log, &[OpId::RegSetattr])], ops);
            registry.redirect(&file, redir).unwrap();
            assert_eq!(registry.unredirect(&file), Ok(1));
        }

        while calls.load(Ordering::Relaxed) == 0 {
            thread::yield_now();
        }
        stop.store(true, Ordering::Release);
        for reader in readers {
            reader.join().unwrap();
        }

        registry.wait_drained();
        assert!(RInode::find(&inode).is_none());
        assert!(tmpfs::node(&inode).is_ok());
    }
}
