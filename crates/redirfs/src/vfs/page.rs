//! TEAM_470: Page cache
//!
//! Each inode owns an address space: a sparse map of `PAGE_SIZE` pages plus
//! the table that fills pages from and writes them back to the filesystem.

use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;
use los_utils::{Mutex, MutexGuard, RcuCell};

use super::error::{VfsError, VfsResult};
use super::file::FileRef;
use super::inode::{Inode, InodeRef};
use super::ops::AddressSpaceOperations;

pub const PAGE_SIZE: usize = 4096;

/// TEAM_470: Reference to a cached page
pub type PageRef = Arc<Page>;

bitflags! {
    /// TEAM_470: Page state bits
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct PageFlags: u32 {
        /// Contents match the backing store
        const UPTODATE = 1 << 0;
        /// Modified since the last writeback
        const DIRTY = 1 << 1;
        /// Last I/O on the page failed
        const ERROR = 1 << 2;
    }
}

/// TEAM_470: One cached page of file data
pub struct Page {
    pub index: u64,
    host: Weak<Inode>,
    data: Mutex<Vec<u8>>,
    flags: AtomicU32,
}

impl Page {
    fn new(host: &InodeRef, index: u64) -> Self {
        Self {
            index,
            host: Arc::downgrade(host),
            data: Mutex::new(vec![0; PAGE_SIZE]),
            flags: AtomicU32::new(0),
        }
    }

    /// TEAM_470: Inode owning this page, if still alive
    pub fn host(&self) -> Option<InodeRef> {
        self.host.upgrade()
    }

    /// TEAM_470: Byte offset of the page within the file
    pub fn offset(&self) -> u64 {
        self.index * PAGE_SIZE as u64
    }

    pub fn data(&self) -> MutexGuard<'_, Vec<u8>> {
        self.data.lock()
    }

    pub fn flags(&self) -> PageFlags {
        PageFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn set_flags(&self, flags: PageFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub fn clear_flags(&self, flags: PageFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }
}

impl core::fmt::Debug for Page {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Page")
            .field("index", &self.index)
            .field("flags", &self.flags())
            .finish_non_exhaustive()
    }
}

/// TEAM_470: How eagerly writeback should proceed
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncMode {
    /// Best effort, stop at the first error
    None,
    /// Data integrity: every dirty page is attempted
    All,
}

/// TEAM_470: Writeback request parameters
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WritebackControl {
    pub sync_mode: SyncMode,
    pub nr_to_write: usize,
}

impl WritebackControl {
    pub const fn all() -> Self {
        Self {
            sync_mode: SyncMode::All,
            nr_to_write: usize::MAX,
        }
    }
}

/// TEAM_470: Page cache of one inode
pub struct AddressSpace {
    pub a_ops: RcuCell<AddressSpaceOperations>,
    pages: Mutex<BTreeMap<u64, PageRef>>,
}

impl AddressSpace {
    pub fn new(a_ops: Arc<AddressSpaceOperations>) -> Self {
        Self {
            a_ops: RcuCell::new(a_ops),
            pages: Mutex::new(BTreeMap::new()),
        }
    }

    /// TEAM_470: Cached page at `index`, if any
    pub fn find(&self, index: u64) -> Option<PageRef> {
        self.pages.lock().get(&index).cloned()
    }

    /// TEAM_470: Cached page at `index`, inserting a blank one when missing
    pub fn find_or_create(&self, host: &InodeRef, index: u64) -> PageRef {
        self.pages
            .lock()
            .entry(index)
            .or_insert_with(|| Arc::new(Page::new(host, index)))
            .clone()
    }

    /// TEAM_470: Drop every page past `size` and zero the tail of the last one
    pub fn truncate(&self, size: u64) {
        let page_size = PAGE_SIZE as u64;
        let keep = size.div_ceil(page_size);
        let mut pages = self.pages.lock();
        pages.retain(|&index, _| index < keep);

        let tail = (size % page_size) as usize;
        if tail != 0 {
            if let Some(last) = pages.get(&(keep - 1)) {
                last.data()[tail..].fill(0);
            }
        }
    }

    pub fn dirty_pages(&self) -> Vec<PageRef> {
        self.pages
            .lock()
            .values()
            .filter(|p| p.flags().contains(PageFlags::DIRTY))
            .cloned()
            .collect()
    }

    pub fn nr_pages(&self) -> usize {
        self.pages.lock().len()
    }
}

/// TEAM_470: Return page `index` of `inode`, filling it through `readpage`
/// when it is not up to date.
pub fn read_cache_page(inode: &InodeRef, file: Option<&FileRef>, index: u64) -> VfsResult<PageRef> {
    let page = inode.i_mapping.find_or_create(inode, index);
    if page.flags().contains(PageFlags::UPTODATE) {
        return Ok(page);
    }

    let readpage = inode.i_mapping.a_ops.load().readpage;
    let readpage = readpage.ok_or(VfsError::NotSupported)?;
    if let Err(e) = readpage(file, &page) {
        page.set_flags(PageFlags::ERROR);
        return Err(e);
    }
    Ok(page)
}

/// TEAM_470: Push dirty pages of `inode` through `writepage`.
///
/// Returns the number of pages written.
pub fn writeback(inode: &InodeRef, wbc: &WritebackControl) -> VfsResult<usize> {
    let dirty = inode.i_mapping.dirty_pages();
    if dirty.is_empty() {
        return Ok(0);
    }

    let writepage = inode.i_mapping.a_ops.load().writepage;
    let writepage = writepage.ok_or(VfsError::NotSupported)?;

    let mut written = 0;
    let mut first_err = None;
    for page in dirty.iter().take(wbc.nr_to_write) {
        match writepage(page, wbc) {
            Ok(()) => written += 1,
            Err(e) => {
                page.set_flags(PageFlags::ERROR);
                if wbc.sync_mode == SyncMode::None {
                    return Err(e);
                }
                first_err.get_or_insert(e);
            }
        }
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(written),
    }
}
