#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod rcu;

// TEAM_211: Re-export spin crate types as our lock API
// Note: spin::Mutex is re-exported as Mutex for API compatibility
pub use spin::{Lazy, Once};
pub use spin::{Mutex, MutexGuard};
pub use spin::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use rcu::{
    RcuCell, RcuReadGuard, call_rcu, rcu_barrier, rcu_poll, rcu_read_lock, synchronize_rcu,
};

/// TEAM_470: Back off inside a busy-wait loop.
///
/// Bare metal just hints the CPU; host builds hand the core back to the scheduler so
/// that the thread we wait on can make progress.
#[inline]
pub fn cpu_relax() {
    #[cfg(feature = "std")]
    std::thread::yield_now();
    #[cfg(not(feature = "std"))]
    core::hint::spin_loop();
}

// ============================================================================
// Unit Tests
// ============================================================================
