//! TEAM_470: Redirection records
//!
//! A redirection binds a chain and an operation set to the subtree root it
//! was attached at. Shadow objects hold it as an immutable `Arc` and replace
//! it wholesale, so a reader never sees a path from one configuration paired
//! with a chain from another.

use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use super::chain::Chain;
use super::ops::OperationSet;

static NEXT_PATH_ID: AtomicU64 = AtomicU64::new(1);

/// TEAM_470: Subtree root a configuration applies to
#[derive(Debug)]
pub struct RPath {
    id: u64,
    root: String,
}

impl RPath {
    pub fn new(root: &str) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_PATH_ID.fetch_add(1, Ordering::Relaxed),
            root: String::from(root),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn root(&self) -> &str {
        &self.root
    }
}

/// TEAM_470: One (path, chain, operation set) configuration
#[derive(Clone, Debug)]
pub struct Redirection {
    pub path: Arc<RPath>,
    pub chain: Arc<Chain>,
    pub ops: Arc<OperationSet>,
}

impl Redirection {
    pub fn new(path: Arc<RPath>, chain: Arc<Chain>, ops: OperationSet) -> Arc<Self> {
        Arc::new(Self {
            path,
            chain,
            ops: Arc::new(ops),
        })
    }

    /// TEAM_470: True if both records share the same path, chain and set
    pub fn same_as(&self, other: &Redirection) -> bool {
        Arc::ptr_eq(&self.path, &other.path)
            && Arc::ptr_eq(&self.chain, &other.chain)
            && Arc::ptr_eq(&self.ops, &other.ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redir::ops::OpId;

    #[test]
    fn test_clone_shares_components() {
        let redir = Redirection::new(
            RPath::new("/srv"),
            Chain::new(alloc::vec::Vec::new()),
            OperationSet::from_ops(&[OpId::DirLookup]),
        );
        let copy = Redirection::clone(&redir);
        assert!(copy.same_as(&redir));
        assert_eq!(copy.path.root(), "/srv");
        assert!(copy.ops.contains(OpId::DirLookup));
    }

    #[test]
    fn test_paths_get_distinct_ids() {
        assert_ne!(RPath::new("/a").id(), RPath::new("/a").id());
    }
}
