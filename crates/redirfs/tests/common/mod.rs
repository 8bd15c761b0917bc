//! Shared fixtures for the redirection integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use los_redirfs::redir::{
    Chain, Context, Filter, FilterHandle, OpId, OperationSet, RPath, Redirection, RfsArgs, Verdict,
};
use los_redirfs::vfs::DentryRef;
use los_redirfs::{RedirConfig, Registry, tmpfs};

/// Ordered record of filter callbacks, shared between filters.
pub type Log = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub fn clear(log: &Log) {
    log.lock().unwrap().clear();
}

/// Filter that logs `"<name> pre <op>"` / `"<name> post <op>"` and otherwise
/// stays out of the way.
pub struct Recorder {
    pub name: &'static str,
    pub log: Log,
}

impl Filter for Recorder {
    fn pre_call(&self, _cx: &mut Context, args: &mut RfsArgs) -> Verdict {
        self.log
            .lock()
            .unwrap()
            .push(format!("{} pre {:?}", self.name, args.op));
        Verdict::Continue
    }

    fn post_call(&self, _cx: &mut Context, args: &mut RfsArgs) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{} post {:?}", self.name, args.op));
    }
}

pub fn recorder(name: &'static str, log: &Log, ops: &[OpId]) -> Arc<FilterHandle> {
    FilterHandle::new(name, OperationSet::from_ops(ops), Recorder {
        name,
        log: log.clone(),
    })
}

/// Fresh tmpfs plus a registry with default limits.
pub fn setup() -> (Arc<Registry>, DentryRef) {
    (Registry::new(RedirConfig::DEFAULT), tmpfs::mount())
}

pub fn redirection(root: &str, filters: Vec<Arc<FilterHandle>>, ops: &[OpId]) -> Arc<Redirection> {
    Redirection::new(RPath::new(root), Chain::new(filters), OperationSet::from_ops(ops))
}

/// Every directory operation plus the attribute ops of every kind.
pub const ALL_OPS: &[OpId] = &[
    OpId::RegPermission,
    OpId::RegSetattr,
    OpId::RegReadpage,
    OpId::RegWritepage,
    OpId::DirLookup,
    OpId::DirCreate,
    OpId::DirMkdir,
    OpId::DirMknod,
    OpId::DirSymlink,
    OpId::DirLink,
    OpId::DirUnlink,
    OpId::DirRmdir,
    OpId::DirPermission,
    OpId::DirSetattr,
    OpId::LnkPermission,
    OpId::LnkSetattr,
    OpId::ChrPermission,
    OpId::ChrSetattr,
    OpId::BlkPermission,
    OpId::BlkSetattr,
    OpId::FifoPermission,
    OpId::FifoSetattr,
    OpId::SockPermission,
    OpId::SockSetattr,
    OpId::DentryRevalidate,
];
