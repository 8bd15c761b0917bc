//! TEAM_470: Two-phase filter chain execution
//!
//! ```text
//! PRE (chain[start..] in order) --skip?--> ORIGINAL --> POST (same filters)
//!                                   \-----------------/
//! ```
//!
//! `start` is 0 for a call coming from the VFS. A filter that issues a nested
//! call on the same object resumes the chain just after itself, so it does
//! not see its own call again and the filters before it see nothing.

use super::chain::{Chain, Verdict};
use super::context::{CallPhase, Context, OpArgs, RfsArgs, Retv};
use crate::call_trace;

/// TEAM_470: Run the pre callbacks; true if any filter asked to skip the original.
///
/// Every filter gets its callback even after one of them returned `Stop`.
pub(crate) fn precall_flts(start: usize, chain: &Chain, cx: &mut Context, args: &mut RfsArgs) -> bool {
    args.phase = CallPhase::Pre;
    let mut skip = false;

    for handle in chain.filters().iter().skip(start) {
        if !handle.wants(args.op) {
            continue;
        }
        call_trace!("redirfs: pre {:?} -> {}", args.op, handle.name());
        cx.set_filter(Some(handle.clone()));
        skip |= handle.filter().pre_call(cx, args) == Verdict::Stop;
    }

    cx.set_filter(None);
    skip
}

/// TEAM_470: Run the post callbacks over the same filters, in the same order.
pub(crate) fn postcall_flts(start: usize, chain: &Chain, cx: &mut Context, args: &mut RfsArgs) {
    args.phase = CallPhase::Post;

    for handle in chain.filters().iter().skip(start) {
        if !handle.wants(args.op) {
            continue;
        }
        call_trace!("redirfs: post {:?} -> {}", args.op, handle.name());
        cx.set_filter(Some(handle.clone()));
        handle.filter().post_call(cx, args);
    }

    cx.set_filter(None);
}

/// TEAM_470: Drive one intercepted call through `chain` starting at `start`.
///
/// `original` runs on the (possibly rewritten) arguments unless a pre
/// callback stopped it. Returns the arguments with the final result.
pub(crate) fn rfs_call<O>(chain: Option<&Chain>, start: usize, mut args: RfsArgs, original: O) -> RfsArgs
where
    O: FnOnce(&OpArgs) -> Retv,
{
    let mut cx = Context::new();
    let skip = match chain {
        Some(chain) => precall_flts(start, chain, &mut cx, &mut args),
        None => false,
    };

    if skip {
        call_trace!("redirfs: {:?} original skipped", args.op);
    } else {
        args.retv = original(&args.args);
    }

    if let Some(chain) = chain {
        postcall_flts(start, chain, &mut cx, &mut args);
    }
    cx.finish();
    args
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::redir::chain::{Filter, FilterHandle};
    use crate::redir::ops::{OpId, OperationSet};
    use crate::tmpfs;
    use crate::vfs::{MayMask, VfsError};
    use alloc::string::String;
    use alloc::sync::Arc;
    use alloc::vec::Vec;
    use los_utils::Mutex;
    use std::format;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Tracer {
        name: &'static str,
        log: Log,
        stop: bool,
    }

    impl Filter for Tracer {
        fn pre_call(&self, cx: &mut Context, _args: &mut RfsArgs) -> Verdict {
            assert_eq!(cx.filter().map(|f| f.name()), Some(self.name));
            self.log.lock().push(format!("{}:pre", self.name));
            if self.stop { Verdict::Stop } else { Verdict::Continue }
        }

        fn post_call(&self, _cx: &mut Context, args: &mut RfsArgs) {
            assert_eq!(args.phase, CallPhase::Post);
            self.log.lock().push(format!("{}:post", self.name));
        }
    }

    fn tracer(name: &'static str, log: &Log, stop: bool, ops: &[OpId]) -> Arc<FilterHandle> {
        FilterHandle::new(name, OperationSet::from_ops(ops), Tracer {
            name,
            log: log.clone(),
            stop,
        })
    }

    fn permission_args() -> RfsArgs {
        let root = tmpfs::mount();
        let inode = root.inode().unwrap();
        RfsArgs::new(OpId::DirPermission, OpArgs::Permission {
            inode,
            mask: MayMask::READ,
        })
    }

    fn run(chain: &Chain, start: usize, log: &Log) -> RfsArgs {
        rfs_call(Some(chain), start, permission_args(), |_| {
            log.lock().push(String::from("original"));
            Retv::Status(Err(VfsError::Busy))
        })
    }

    #[test]
    fn test_pre_and_post_run_in_chain_order() {
        let log = Log::default();
        let chain = Chain::new(alloc::vec![
            tracer("a", &log, false, &[OpId::DirPermission]),
            tracer("b", &log, false, &[OpId::DirPermission]),
        ]);
        let args = run(&chain, 0, &log);
        assert_eq!(*log.lock(), ["a:pre", "b:pre", "original", "a:post", "b:post"]);
        assert_eq!(args.retv.err(), Some(VfsError::Busy));
    }

    #[test]
    fn test_stop_skips_original_but_not_other_filters() {
        let log = Log::default();
        let chain = Chain::new(alloc::vec![
            tracer("a", &log, true, &[OpId::DirPermission]),
            tracer("b", &log, false, &[OpId::DirPermission]),
        ]);
        let args = run(&chain, 0, &log);
        assert_eq!(*log.lock(), ["a:pre", "b:pre", "a:post", "b:post"]);
        assert!(args.retv.is_ok());
    }

    #[test]
    fn test_filters_without_the_op_are_passed_over() {
        let log = Log::default();
        let chain = Chain::new(alloc::vec![
            tracer("a", &log, false, &[OpId::DirCreate]),
            tracer("b", &log, false, &[OpId::DirPermission]),
        ]);
        run(&chain, 0, &log);
        assert_eq!(*log.lock(), ["b:pre", "original", "b:post"]);
    }

    #[test]
    fn test_start_index_limits_the_chain() {
        let log = Log::default();
        let chain = Chain::new(alloc::vec![
            tracer("a", &log, true, &[OpId::DirPermission]),
            tracer("b", &log, false, &[OpId::DirPermission]),
        ]);
        run(&chain, 1, &log);
        assert_eq!(*log.lock(), ["b:pre", "original", "b:post"]);

        log.lock().clear();
        run(&chain, chain.len(), &log);
        assert_eq!(*log.lock(), ["original"]);
    }

    #[test]
    fn test_no_chain_calls_original_only() {
        let log = Log::default();
        let args = rfs_call(None, 0, permission_args(), |_| {
            log.lock().push(String::from("original"));
            Retv::Status(Ok(()))
        });
        assert_eq!(*log.lock(), ["original"]);
        assert!(args.retv.is_ok());
    }
}
