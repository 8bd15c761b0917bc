//! TEAM_470: Page cache wrappers and subcalls
//!
//! Paged I/O is the operation filters most often re-issue themselves, e.g. a
//! filter that needs the plain page before transforming it. The subcall
//! entry points run such a nested call through the part of the chain that
//! comes after the calling filter.

use super::call::rfs_call;
use super::chain::FilterHandle;
use super::context::{OpArgs, RfsArgs, Retv};
use super::iops::bad_args;
use super::ops::OpId;
use super::rinode::RInode;
use crate::vfs::{FileKind, FileRef, PageRef, VfsError, VfsResult, WritebackControl};

fn readpage_call(caller: Option<&FilterHandle>, file: Option<&FileRef>, page: &PageRef) -> VfsResult<()> {
    let host = page.host().ok_or(VfsError::StaleHandle)?;
    let Some(rinode) = RInode::find(&host) else {
        return match host.i_mapping.a_ops.load().readpage {
            Some(readpage) => readpage(file, page),
            None => Err(VfsError::NotSupported),
        };
    };
    assert_eq!(rinode.kind(), FileKind::Regular, "redirfs: readpage on a non-regular inode");

    let active = rinode.active();
    let chain = active.as_ref().map(|redir| redir.chain.as_ref());
    let start = match (chain, caller) {
        (Some(chain), Some(caller)) => chain.resume_index(caller),
        _ => 0,
    };

    let old = rinode.aop_old.readpage;
    let args = OpArgs::Readpage {
        file: file.cloned(),
        page: page.clone(),
    };
    let done = rfs_call(chain, start, RfsArgs::new(OpId::RegReadpage, args), |args| {
        let OpArgs::Readpage { file, page } = args else {
            bad_args(OpId::RegReadpage)
        };
        Retv::Status(old.map_or(Err(VfsError::NotSupported), |readpage| readpage(file.as_ref(), page)))
    });
    done.retv.into_status()
}

fn writepage_call(caller: Option<&FilterHandle>, page: &PageRef, wbc: &WritebackControl) -> VfsResult<()> {
    let host = page.host().ok_or(VfsError::StaleHandle)?;
    let Some(rinode) = RInode::find(&host) else {
        return match host.i_mapping.a_ops.load().writepage {
            Some(writepage) => writepage(page, wbc),
            None => Err(VfsError::NotSupported),
        };
    };
    assert_eq!(rinode.kind(), FileKind::Regular, "redirfs: writepage on a non-regular inode");

    let active = rinode.active();
    let chain = active.as_ref().map(|redir| redir.chain.as_ref());
    let start = match (chain, caller) {
        (Some(chain), Some(caller)) => chain.resume_index(caller),
        _ => 0,
    };

    let old = rinode.aop_old.writepage;
    let args = OpArgs::Writepage {
        page: page.clone(),
        wbc: *wbc,
    };
    let done = rfs_call(chain, start, RfsArgs::new(OpId::RegWritepage, args), |args| {
        let OpArgs::Writepage { page, wbc } = args else {
            bad_args(OpId::RegWritepage)
        };
        Retv::Status(old.map_or(Err(VfsError::NotSupported), |writepage| writepage(page, wbc)))
    });
    done.retv.into_status()
}

pub(crate) fn rfs_readpage(file: Option<&FileRef>, page: &PageRef) -> VfsResult<()> {
    readpage_call(None, file, page)
}

pub(crate) fn rfs_writepage(page: &PageRef, wbc: &WritebackControl) -> VfsResult<()> {
    writepage_call(None, page, wbc)
}

/// TEAM_470: Re-issue a readpage from inside `filter`'s callback.
///
/// Only the filters after `filter` in the chain see the nested call.
/// `args` must be readpage arguments.
pub fn readpage_subcall(filter: &FilterHandle, args: &OpArgs) -> VfsResult<()> {
    let OpArgs::Readpage { file, page } = args else {
        return Err(VfsError::InvalidArgument);
    };
    readpage_call(Some(filter), file.as_ref(), page)
}

/// TEAM_470: Re-issue a writepage from inside `filter`'s callback.
pub fn writepage_subcall(filter: &FilterHandle, args: &OpArgs) -> VfsResult<()> {
    let OpArgs::Writepage { page, wbc } = args else {
        return Err(VfsError::InvalidArgument);
    };
    writepage_call(Some(filter), page, wbc)
}
