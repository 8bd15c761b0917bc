//! TEAM_470: Grace-period based deferred reclamation (RCU style).
//!
//! Readers bracket lock-free accesses with [`rcu_read_lock`]. Writers publish a new
//! value with [`RcuCell::assign`]; the value it replaced is handed to [`call_rcu`] and
//! only released once every reader that might still be looking at it has left its
//! read-side section.
//!
//! ## Epochs
//!
//! A global epoch counter selects one of two reader slots. A reader increments the
//! slot of the epoch it observed and re-checks the epoch. Advancing the epoch from `e`
//! to `e + 1` and seeing slot `e` drain completes epoch `e`: no reader that entered at
//! `e` or earlier is still inside. The epoch only advances once the previous one has
//! completed, so at most one completion is ever outstanding.
//!
//! Every deferred callback is stamped with the epoch it was queued in and becomes
//! runnable once that epoch completes. [`synchronize_rcu`] and [`rcu_barrier`] wait for
//! this; [`rcu_poll`] only advances as far as it can without waiting, which makes it
//! safe to call from inside a read-side section.
//!
//! Waiting for a grace period from inside a read-side section deadlocks.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use spin::Mutex;

type Callback = Box<dyn FnOnce() + Send>;

static EPOCH: AtomicUsize = AtomicUsize::new(0);
/// Every epoch below this one has completed.
static COMPLETED: AtomicUsize = AtomicUsize::new(0);
static READERS: [AtomicUsize; 2] = [AtomicUsize::new(0), AtomicUsize::new(0)];
static WRITER: Mutex<()> = Mutex::new(());
static BARRIER: Mutex<()> = Mutex::new(());
static CALLBACKS: Mutex<Vec<(usize, Callback)>> = Mutex::new(Vec::new());
static GRACE_PERIODS: AtomicUsize = AtomicUsize::new(0);

/// TEAM_470: Proof of an active read-side section.
///
/// Not `Send`: the section belongs to the thread that opened it.
pub struct RcuReadGuard {
    slot: usize,
    _not_send: PhantomData<*const ()>,
}

impl Drop for RcuReadGuard {
    fn drop(&mut self) {
        READERS[self.slot].fetch_sub(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for RcuReadGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RcuReadGuard").field("slot", &self.slot).finish()
    }
}

/// TEAM_470: Enter a read-side critical section.
///
/// Never blocks. Sections may nest.
pub fn rcu_read_lock() -> RcuReadGuard {
    loop {
        let epoch = EPOCH.load(Ordering::SeqCst);
        let slot = epoch & 1;
        READERS[slot].fetch_add(1, Ordering::SeqCst);
        if EPOCH.load(Ordering::SeqCst) == epoch {
            return RcuReadGuard {
                slot,
                _not_send: PhantomData,
            };
        }
        // A writer flipped the epoch under us; register in the new slot instead.
        READERS[slot].fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mark the epoch before `epoch` complete if its readers are gone.
/// Caller holds `WRITER`.
fn try_complete(epoch: usize) -> bool {
    if COMPLETED.load(Ordering::SeqCst) >= epoch {
        return true;
    }
    if READERS[(epoch - 1) & 1].load(Ordering::SeqCst) != 0 {
        return false;
    }
    COMPLETED.store(epoch, Ordering::SeqCst);
    GRACE_PERIODS.fetch_add(1, Ordering::Relaxed);
    true
}

fn wait_complete(epoch: usize) {
    while !try_complete(epoch) {
        crate::cpu_relax();
    }
}

/// TEAM_470: Wait until every read-side section that was open on entry has closed.
pub fn synchronize_rcu() {
    let _writer = WRITER.lock();
    let epoch = EPOCH.load(Ordering::SeqCst);
    // A flip left behind by `rcu_poll` may still have readers in the other slot.
    wait_complete(epoch);
    EPOCH.store(epoch + 1, Ordering::SeqCst);
    wait_complete(epoch + 1);
}

/// TEAM_470: Queue `f` to run once every reader that is inside a read-side
/// section now has left it.
///
/// Callbacks run from [`rcu_poll`] or [`rcu_barrier`]; they must not wait for a grace
/// period themselves.
pub fn call_rcu<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    let epoch = EPOCH.load(Ordering::SeqCst);
    CALLBACKS.lock().push((epoch, Box::new(f)));
}

/// TEAM_470: Advance grace periods as far as possible without waiting and run
/// the callbacks that became safe. Returns how many ran.
///
/// Gives up immediately if another thread is already advancing or reclaiming.
/// Callbacks run on the calling thread, so it must not hold any lock a
/// callback could take.
pub fn rcu_poll() -> usize {
    let Some(_barrier) = BARRIER.try_lock() else {
        return 0;
    };

    {
        let Some(_writer) = WRITER.try_lock() else {
            return 0;
        };
        // Completing the outstanding epoch and one more flip is as far as
        // readers that are gone can take us.
        for _ in 0..2 {
            let epoch = EPOCH.load(Ordering::SeqCst);
            if !try_complete(epoch) {
                break;
            }
            let waiting = CALLBACKS.lock().iter().any(|(stamp, _)| *stamp >= epoch);
            if !waiting {
                break;
            }
            EPOCH.store(epoch + 1, Ordering::SeqCst);
        }
    }

    let completed = COMPLETED.load(Ordering::SeqCst);
    let ready: Vec<Callback> = {
        let mut queue = CALLBACKS.lock();
        let (ready, waiting) = core::mem::take(&mut *queue)
            .into_iter()
            .partition(|(stamp, _)| *stamp < completed);
        *queue = waiting;
        ready.into_iter().map(|(_, callback)| callback).collect()
    };

    let ran = ready.len();
    if ran > 0 {
        log::trace!("rcu: polled {ran} deferred callbacks");
    }
    for callback in ready {
        callback();
    }
    ran
}

/// TEAM_470: Run every callback queued before this call, after a grace period.
///
/// Concurrent barriers and polls are serialized, so on return no callback queued
/// before the call is still pending in another thread's batch.
pub fn rcu_barrier() {
    let _barrier = BARRIER.lock();
    let batch = core::mem::take(&mut *CALLBACKS.lock());
    if batch.is_empty() {
        return;
    }

    synchronize_rcu();
    log::trace!("rcu: running {} deferred callbacks", batch.len());
    for (_, callback) in batch {
        callback();
    }
}

/// TEAM_470: Number of callbacks whose grace period has not been seen to end.
pub fn pending_callbacks() -> usize {
    CALLBACKS.lock().len()
}

/// TEAM_470: Number of completed grace periods since boot.
pub fn grace_periods() -> usize {
    GRACE_PERIODS.load(Ordering::Relaxed)
}

// ============================================================================
// RcuCell
// ============================================================================

/// TEAM_470: An `Arc<T>` slot that readers dereference without taking a lock.
///
/// The cell owns one strong count of the published value. Replaced values are
/// released through [`call_rcu`], so a reference obtained with [`RcuCell::read`]
/// stays valid for the whole read-side section even if a writer swaps the slot.
pub struct RcuCell<T> {
    ptr: AtomicPtr<T>,
    _owns: PhantomData<Arc<T>>,
}

// SAFETY: the cell only hands out `&T` and `Arc<T>`, which require `T: Send + Sync`
// to cross threads.
unsafe impl<T: Send + Sync> Send for RcuCell<T> {}
unsafe impl<T: Send + Sync> Sync for RcuCell<T> {}

impl<T: Send + Sync + 'static> RcuCell<T> {
    /// TEAM_470: Publish `value` as the initial content.
    pub fn new(value: Arc<T>) -> Self {
        Self {
            ptr: AtomicPtr::new(Arc::into_raw(value).cast_mut()),
            _owns: PhantomData,
        }
    }

    /// TEAM_470: Borrow the current value for the lifetime of a read-side section.
    pub fn read<'a>(&'a self, _guard: &'a RcuReadGuard) -> &'a T {
        // SAFETY: the pointer came from `Arc::into_raw`. A value unpublished by
        // `assign` is dropped only after a grace period, and `_guard` keeps the
        // current one from completing.
        unsafe { &*self.ptr.load(Ordering::Acquire) }
    }

    /// TEAM_470: Take a strong reference to the current value.
    pub fn load(&self) -> Arc<T> {
        let _guard = rcu_read_lock();
        let ptr = self.ptr.load(Ordering::Acquire);
        // SAFETY: see `read`; the section keeps `ptr` alive while we bump its count.
        unsafe {
            Arc::increment_strong_count(ptr);
            Arc::from_raw(ptr)
        }
    }

    /// TEAM_470: Publish `value` and retire the previous one after a grace period.
    pub fn assign(&self, value: Arc<T>) {
        let new = Arc::into_raw(value).cast_mut();
        let old = self.ptr.swap(new, Ordering::AcqRel);
        // SAFETY: `old` was published by this cell, which held its strong count.
        let old = unsafe { Arc::from_raw(old) };
        call_rcu(move || drop(old));
    }

    /// TEAM_470: Check whether `other` is the value currently published.
    pub fn is(&self, other: &Arc<T>) -> bool {
        ptr::eq(self.ptr.load(Ordering::Acquire), Arc::as_ptr(other))
    }
}

impl<T> Drop for RcuCell<T> {
    fn drop(&mut self) {
        let ptr = *self.ptr.get_mut();
        // SAFETY: `&mut self` rules out any outstanding `read` borrow of this cell and
        // the cell owns one strong count of `ptr`.
        drop(unsafe { Arc::from_raw(ptr) });
    }
}

impl<T: fmt::Debug + Send + Sync + 'static> fmt::Debug for RcuCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = rcu_read_lock();
        f.debug_tuple("RcuCell").field(self.read(&guard)).finish()
    }
}
