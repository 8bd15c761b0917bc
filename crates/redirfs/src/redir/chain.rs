//! TEAM_470: Filters and filter chains
//!
//! A chain is an ordered, immutable list of filter handles. Once a chain has
//! been published in a redirection it is never modified; attaching or
//! removing a filter means building a new chain and swapping it in.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::context::{Context, RfsArgs};
use super::ops::{OpId, OperationSet};

static NEXT_FILTER_ID: AtomicU64 = AtomicU64::new(1);

/// TEAM_470: What a filter wants done with the rest of the call
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verdict {
    Continue,
    /// Skip the original operation.
    Stop,
}

/// TEAM_470: Callbacks a filter registers for the operations it intercepts.
///
/// Both hooks get the call context, which knows which filter is running,
/// and the operation arguments together with the result slot. `post_call`
/// runs whether or not the original was skipped and may rewrite the result.
pub trait Filter: Send + Sync {
    fn pre_call(&self, _cx: &mut Context, _args: &mut RfsArgs) -> Verdict {
        Verdict::Continue
    }

    fn post_call(&self, _cx: &mut Context, _args: &mut RfsArgs) {}
}

/// TEAM_470: Process-unique filter identity
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FilterId(u64);

/// TEAM_470: A registered filter.
///
/// The handle is what chains hold and what private data is keyed by.
pub struct FilterHandle {
    id: FilterId,
    name: String,
    ops: OperationSet,
    active: AtomicBool,
    filter: Box<dyn Filter>,
}

impl FilterHandle {
    /// TEAM_470: Register `filter` for the operations in `ops`. Starts active.
    pub fn new<F: Filter + 'static>(name: &str, ops: OperationSet, filter: F) -> Arc<Self> {
        Arc::new(Self {
            id: FilterId(NEXT_FILTER_ID.fetch_add(1, Ordering::Relaxed)),
            name: String::from(name),
            ops,
            active: AtomicBool::new(true),
            filter: Box::new(filter),
        })
    }

    pub fn id(&self) -> FilterId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ops(&self) -> OperationSet {
        self.ops
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn activate(&self) {
        self.active.store(true, Ordering::Release);
    }

    /// TEAM_470: Stop receiving callbacks without leaving the chain
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub(crate) fn wants(&self, op: OpId) -> bool {
        self.is_active() && self.ops.contains(op)
    }

    pub(crate) fn filter(&self) -> &dyn Filter {
        self.filter.as_ref()
    }
}

impl fmt::Debug for FilterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// TEAM_470: Ordered filters attached at one subtree root
#[derive(Debug, Default)]
pub struct Chain {
    filters: Vec<Arc<FilterHandle>>,
}

impl Chain {
    pub fn new(filters: Vec<Arc<FilterHandle>>) -> Arc<Self> {
        Arc::new(Self { filters })
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn filters(&self) -> &[Arc<FilterHandle>] {
        &self.filters
    }

    /// TEAM_470: Position of `filter` in the chain
    pub fn find(&self, filter: &FilterHandle) -> Option<usize> {
        self.filters.iter().position(|f| ptr::eq(f.as_ref(), filter))
    }

    pub fn contains(&self, filter: &FilterHandle) -> bool {
        self.find(filter).is_some()
    }

    /// TEAM_470: Index a nested call issued by `filter` resumes at.
    ///
    /// The filters after `filter` see the nested call. A filter that is not
    /// part of the chain resumes past the end, so only the original runs.
    pub fn resume_index(&self, filter: &FilterHandle) -> usize {
        self.find(filter).map_or(self.filters.len(), |idx| idx + 1)
    }

    /// TEAM_470: New chain with `filter` appended
    #[must_use]
    pub fn with(&self, filter: Arc<FilterHandle>) -> Arc<Self> {
        let mut filters = self.filters.clone();
        filters.push(filter);
        Self::new(filters)
    }

    /// TEAM_470: New chain with `filter` left out
    #[must_use]
    pub fn without(&self, filter: &FilterHandle) -> Arc<Self> {
        let filters = self
            .filters
            .iter()
            .filter(|f| !ptr::eq(f.as_ref(), filter))
            .cloned()
            .collect();
        Self::new(filters)
    }
}
