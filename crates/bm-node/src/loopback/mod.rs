//! In-process bus runtime
//!
//! [`LoopbackBus`] implements [`BusRuntime`](bm_core::traits::BusRuntime)
//! for buses that share a [`LoopbackNetwork`] inside one process. It keeps
//! the runtime's threading contract: each started bus owns a dispatch thread
//! that delivers discovery callbacks, and a blocking call issued from that
//! thread fails with `BlockingCallNotAllowed` unless the callback enabled
//! concurrent callbacks first.
//!
//! Only buses created with discovery enabled receive
//! `found_advertised_name` and `lost_advertised_name`, and only for prefixes
//! they asked for with [`LoopbackBus::find_advertised_name`]. When a host
//! leaves the network, every bus that joined one of its sessions gets
//! `session_lost` through the listener it joined with.

mod bus;
mod network;

pub use bus::LoopbackBus;
pub use network::LoopbackNetwork;

use std::cell::Cell;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bm_core::{SessionId, TransportMask};

thread_local! {
    /// Id of the bus whose dispatcher runs on this thread
    static DISPATCHING_FOR: Cell<Option<u64>> = const { Cell::new(None) };
    /// Set by `enable_concurrent_callbacks` for the callback in progress
    static CONCURRENT_CALLBACKS: Cell<bool> = const { Cell::new(false) };
}

/// Events delivered on a bus's dispatch thread
#[derive(Debug)]
pub(crate) enum DispatchEvent {
    FoundAdvertisedName {
        name: String,
        transport: TransportMask,
        prefix: String,
    },
    LostAdvertisedName {
        name: String,
        transport: TransportMask,
        prefix: String,
    },
    NameOwnerChanged {
        name: String,
        previous_owner: Option<String>,
        new_owner: Option<String>,
    },
    SessionLost {
        id: SessionId,
    },
    Shutdown,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
