//! The event queue core.
//!
//! A [`WaitQueue`] is a lock around an ordered waiter list plus the head of
//! the queue's set memberships. Handles are cheap clones of one shared core.
//!
//! Every method on `WaitQueue` takes and releases the queue lock itself.
//! [`WaitQueue::lock`] hands out a [`WaitQueueGuard`] instead, whose methods
//! run with the lock already held and keep it until the guard drops. That is
//! how a caller does several things under one critical section, for example
//! test a condition, assert a wait, and only then release the lock.

use core::fmt;

use crate::config::SyncPolicy;
use crate::domain::{next_object_id, DomainShared, WaitqDomain};
use crate::error::{KernError, KernResult};
use crate::event::{Event, TimeoutUrgency, WaitInterrupt, WaitResult, WakeupPriority};
use crate::link::{self, LinkId};
use crate::prepost::{self, PrepostId, PrepostReservation};
use crate::set::WaitQueueSet;
use crate::sync::{Arc, Mutex, MutexGuard};
use crate::thread::{Thread, ThreadId, WaitDescriptor, WaitTarget};
use crate::trace::records;
use crate::waiters::WaiterList;
use crate::wakeup::{self, WakeMode};

pub(crate) struct QueueState {
    pub(crate) valid: bool,
    pub(crate) waiters: WaiterList,
    /// Head of this queue's membership list.
    pub(crate) set_links: Option<LinkId>,
    pub(crate) nlinks: usize,
    pub(crate) prepost_id: Option<PrepostId>,
}

pub(crate) struct QueueCore {
    pub(crate) id: u64,
    pub(crate) policy: SyncPolicy,
    pub(crate) global: bool,
    pub(crate) shared: Arc<DomainShared>,
    pub(crate) state: Mutex<QueueState>,
}

/// Handle to a wait queue.
#[derive(Clone)]
pub struct WaitQueue {
    pub(crate) core: Arc<QueueCore>,
}

impl WaitQueue {
    /// Creates a queue in the process-wide domain.
    pub fn init(policy: SyncPolicy) -> Self {
        Self::init_in(WaitqDomain::global(), policy)
    }

    pub fn init_in(domain: &WaitqDomain, policy: SyncPolicy) -> Self {
        Self::with_shared(&domain.shared, policy, false)
    }

    /// Creates a queue from a raw policy word, rejecting unknown bits.
    pub fn init_raw_in(domain: &WaitqDomain, policy: u32) -> KernResult<Self> {
        Ok(Self::init_in(domain, SyncPolicy::from_raw(policy)?))
    }

    pub(crate) fn with_shared(
        shared: &Arc<DomainShared>,
        policy: SyncPolicy,
        global: bool,
    ) -> Self {
        let core = QueueCore {
            id: next_object_id(),
            policy,
            global,
            shared: Arc::clone(shared),
            state: Mutex::new(QueueState {
                valid: true,
                waiters: WaiterList::new(policy),
                set_links: None,
                nlinks: 0,
                prepost_id: None,
            }),
        };
        log::trace!("waitq {} init ({:?})", core.id, policy);
        Self {
            core: Arc::new(core),
        }
    }

    /// Tears the queue down: waiters are resumed with `Restart`, every
    /// membership is dropped and the prepost identity is retired. Global
    /// queues cannot be torn down.
    pub fn deinit(&self) -> KernResult<()> {
        if self.core.global {
            log::warn!("refusing to deinit global waitq {}", self.core.id);
            return Err(KernError::InvalidQueue);
        }
        let shared = &self.core.shared;
        let mut qs = self.core.state.lock();
        if !qs.valid {
            return Err(KernError::InvalidQueue);
        }
        qs.valid = false;
        let restarted = qs
            .waiters
            .drain(|thread| shared.resume(thread, WaitResult::Restart, WakeupPriority::All));
        let unlinked = link::unlink_all_locked(&self.core, &mut qs);
        prepost::clear_prepost_locked(&self.core, &mut qs);
        log::debug!(
            "waitq {} deinit: {} waiter(s) restarted, {} link(s) dropped",
            self.core.id,
            restarted,
            unlinked
        );
        Ok(())
    }

    /// Locks the queue until the returned guard drops.
    pub fn lock(&self) -> WaitQueueGuard<'_> {
        WaitQueueGuard {
            queue: self,
            state: self.core.state.lock(),
        }
    }

    pub fn id(&self) -> u64 {
        self.core.id
    }

    pub fn policy(&self) -> SyncPolicy {
        self.core.policy
    }

    pub fn is_valid(&self) -> bool {
        self.core.state.lock().valid
    }

    pub fn is_global(&self) -> bool {
        self.core.global
    }

    /// True if the queue lock may be taken from interrupt context. Wakeups on
    /// such queues never grow the prepost table.
    pub fn irq_safe(&self) -> bool {
        self.core.policy.contains(SyncPolicy::DISABLE_IRQ)
    }

    pub fn waiter_count(&self) -> usize {
        self.core.state.lock().waiters.len()
    }

    /// True if both handles refer to the same queue.
    pub fn same(&self, other: &WaitQueue) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    /// Records that `thread` is about to block on `event`.
    ///
    /// Returns [`WaitResult::Waiting`] when the caller must now block, or
    /// [`WaitResult::Interrupted`] if a pending abort ended the wait early.
    pub fn assert_wait(
        &self,
        thread: &Thread,
        event: Event,
        interruptible: WaitInterrupt,
        deadline: Option<u64>,
    ) -> KernResult<WaitResult> {
        self.lock().assert_wait(thread, event, interruptible, deadline)
    }

    /// [`assert_wait`](Self::assert_wait) with timer coalescing hints.
    pub fn assert_wait_leeway(
        &self,
        thread: &Thread,
        event: Event,
        interruptible: WaitInterrupt,
        urgency: TimeoutUrgency,
        deadline: u64,
        leeway: u64,
    ) -> KernResult<WaitResult> {
        self.lock()
            .assert_wait_leeway(thread, event, interruptible, urgency, deadline, leeway)
    }

    /// Wakes the highest priority thread waiting for `event`.
    ///
    /// With no local waiter the wakeup propagates to the sets this queue
    /// belongs to, waking a set waiter or leaving a prepost on each set that
    /// accepts them. Returns `NotFound` if no thread was woken.
    pub fn wakeup_one(
        &self,
        event: Event,
        result: WaitResult,
        priority: WakeupPriority,
    ) -> KernResult<ThreadId> {
        let mut reservation = self.wakeup_reservation();
        let mut guard = self.lock();
        guard.wakeup_one(event, result, priority, &mut reservation)
    }

    /// Wakes every thread waiting for `event` here and on member sets.
    pub fn wakeup_all(
        &self,
        event: Event,
        result: WaitResult,
        priority: WakeupPriority,
    ) -> KernResult<usize> {
        let mut reservation = self.wakeup_reservation();
        let mut guard = self.lock();
        guard.wakeup_all(event, result, priority, &mut reservation)
    }

    /// Wakes `thread` if, and only if, it waits on this queue for `event`.
    pub fn wakeup_thread(
        &self,
        event: Event,
        thread: &Thread,
        result: WaitResult,
    ) -> KernResult<()> {
        self.lock().wakeup_thread(event, thread, result)
    }

    /// Reserves one prepost slot per membership, plus one for the queue's
    /// identity if it has none yet.
    fn wakeup_reservation(&self) -> PrepostReservation {
        let needed = {
            let qs = self.core.state.lock();
            if qs.nlinks == 0 {
                return PrepostReservation::new();
            }
            qs.nlinks + usize::from(qs.prepost_id.is_none())
        };
        PrepostReservation::fill(&self.core.shared, needed, !self.irq_safe())
    }
}

impl PartialEq for WaitQueue {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for WaitQueue {}

impl fmt::Debug for WaitQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitQueue")
            .field("id", &self.core.id)
            .field("policy", &self.core.policy)
            .field("global", &self.core.global)
            .finish()
    }
}

/// A locked wait queue.
///
/// Wakeups through a guard cannot reserve prepost slots (that may allocate),
/// so they take a [`PrepostReservation`] made before locking; an empty one
/// falls back to the table's free slots.
pub struct WaitQueueGuard<'a> {
    pub(crate) queue: &'a WaitQueue,
    pub(crate) state: MutexGuard<'a, QueueState>,
}

impl WaitQueueGuard<'_> {
    pub fn queue(&self) -> &WaitQueue {
        self.queue
    }

    pub fn is_valid(&self) -> bool {
        self.state.valid
    }

    pub fn waiter_count(&self) -> usize {
        self.state.waiters.len()
    }

    pub fn assert_wait(
        &mut self,
        thread: &Thread,
        event: Event,
        interruptible: WaitInterrupt,
        deadline: Option<u64>,
    ) -> KernResult<WaitResult> {
        let mut descriptor = WaitDescriptor::new(event, interruptible);
        descriptor.deadline = deadline;
        self.assert_wait_with(thread, descriptor)
    }

    pub fn assert_wait_leeway(
        &mut self,
        thread: &Thread,
        event: Event,
        interruptible: WaitInterrupt,
        urgency: TimeoutUrgency,
        deadline: u64,
        leeway: u64,
    ) -> KernResult<WaitResult> {
        let descriptor = WaitDescriptor::new(event, interruptible)
            .with_deadline(deadline)
            .with_leeway(urgency, leeway);
        self.assert_wait_with(thread, descriptor)
    }

    fn assert_wait_with(
        &mut self,
        thread: &Thread,
        descriptor: WaitDescriptor,
    ) -> KernResult<WaitResult> {
        let core = &self.queue.core;
        if !self.state.valid {
            return Err(KernError::InvalidQueue);
        }
        let target = WaitTarget::Queue(Arc::downgrade(core));
        let result = thread.begin_wait(target, descriptor)?;
        if result == WaitResult::Waiting {
            self.state.waiters.push(thread.clone(), descriptor.event);
            log::trace!("{} waits on waitq {} for {}", thread.id(), core.id, descriptor.event);
            core.shared
                .trace(records::ASSERT_WAIT, thread.id().0, descriptor.event.raw());
        }
        Ok(result)
    }

    pub fn wakeup_one(
        &mut self,
        event: Event,
        result: WaitResult,
        priority: WakeupPriority,
        reservation: &mut PrepostReservation,
    ) -> KernResult<ThreadId> {
        let woken = wakeup::wakeup_locked(
            &self.queue.core,
            &mut self.state,
            event,
            result,
            priority,
            WakeMode::One,
            reservation,
        )?;
        woken.first.ok_or(KernError::NotFound)
    }

    pub fn wakeup_all(
        &mut self,
        event: Event,
        result: WaitResult,
        priority: WakeupPriority,
        reservation: &mut PrepostReservation,
    ) -> KernResult<usize> {
        wakeup::wakeup_locked(
            &self.queue.core,
            &mut self.state,
            event,
            result,
            priority,
            WakeMode::All,
            reservation,
        )
        .map(|woken| woken.count)
    }

    pub fn wakeup_thread(
        &mut self,
        event: Event,
        thread: &Thread,
        result: WaitResult,
    ) -> KernResult<()> {
        if !self.state.valid {
            return Err(KernError::InvalidQueue);
        }
        let waiter = self
            .state
            .waiters
            .remove_thread(thread, Some(event))
            .ok_or(KernError::NotFound)?;
        self.queue
            .core
            .shared
            .resume(&waiter.thread, result, WakeupPriority::All);
        Ok(())
    }

    pub fn is_member(&self, set: &WaitQueueSet) -> bool {
        link::is_member_locked(&self.queue.core.shared, &self.state, set.id())
    }
}

/// Pulls `thread` off `core` and resumes it. Backs [`Thread::clear_wait`].
pub(crate) fn clear_waiter(
    core: &QueueCore,
    thread: &Thread,
    event: Option<Event>,
    result: WaitResult,
) -> KernResult<()> {
    let mut qs = core.state.lock();
    let waiter = qs
        .waiters
        .remove_thread(thread, event)
        .ok_or(KernError::NotFound)?;
    core.shared.resume(&waiter.thread, result, WakeupPriority::All);
    Ok(())
}
