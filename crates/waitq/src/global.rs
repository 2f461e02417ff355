//! Global event queues.
//!
//! A fixed bank of shared queues for code that has an event but no queue of
//! its own. The address and length of the event descriptor are hashed to pick
//! a queue, so unrelated events can share one; waiters must re-check their
//! condition after waking.
//! The bank is created on first use and lives as long as its domain.

use core::hash::Hasher;

use siphasher::sip::SipHasher13;

use crate::config::SyncPolicy;
use crate::domain::WaitqDomain;
use crate::queue::WaitQueue;

const HASH_KEY0: u64 = 0x7761_6974_715f_6576;
const HASH_KEY1: u64 = 0x656e_745f_6861_7368;

const GLOBAL_POLICY: SyncPolicy = SyncPolicy::DISABLE_IRQ;

impl WaitqDomain {
    fn globals(&self) -> &[WaitQueue] {
        self.globals.get_or_init(|| {
            let count = self.shared.config.global_queue_count();
            log::debug!("{}: creating {} global event queues", self.name(), count);
            (0..count)
                .map(|_| WaitQueue::with_shared(&self.shared, GLOBAL_POLICY, true))
                .collect()
        })
    }

    /// Returns the global queue for the event described by `event`.
    ///
    /// The descriptor's address and length pick the queue, never its
    /// contents, so the event object may change while threads wait on it.
    pub fn global_eventq(&self, event: &[u8]) -> WaitQueue {
        self.global_eventq_at(event.as_ptr() as usize, event.len())
    }

    /// Returns the global queue for the event identified by `value`'s
    /// address and size.
    pub fn global_eventq_for<T>(&self, value: &T) -> WaitQueue {
        self.global_eventq_at(value as *const T as usize, core::mem::size_of::<T>())
    }

    fn global_eventq_at(&self, addr: usize, len: usize) -> WaitQueue {
        let mut descriptor = [0u8; 16];
        descriptor[..8].copy_from_slice(&(addr as u64).to_le_bytes());
        descriptor[8..].copy_from_slice(&(len as u64).to_le_bytes());

        let mut hasher = SipHasher13::new_with_keys(HASH_KEY0, HASH_KEY1);
        hasher.write(&descriptor);
        let globals = self.globals();
        let index = hasher.finish() as usize & (globals.len() - 1);
        globals[index].clone()
    }

    /// Returns a global queue by index, wrapping out-of-range indices.
    pub fn global_waitq(&self, index: usize) -> WaitQueue {
        let globals = self.globals();
        globals[index & (globals.len() - 1)].clone()
    }

    pub fn global_queue_count(&self) -> usize {
        self.globals().len()
    }
}

/// Global queue for `event` in the process-wide domain.
pub fn global_eventq(event: &[u8]) -> WaitQueue {
    WaitqDomain::global().global_eventq(event)
}

/// Global queue by index in the process-wide domain.
pub fn global_waitq(index: usize) -> WaitQueue {
    WaitqDomain::global().global_waitq(index)
}
