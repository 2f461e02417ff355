//! Wait queue sets.
//!
//! A set lets one thread wait for whichever member queue fires first. Threads
//! wait on the set itself; wakeups on a member queue that find no local waiter
//! reach them through the membership list, or leave a prepost when nobody
//! waits on the set either. Sets cannot be members of other sets.

use core::fmt;

use crate::config::SyncPolicy;
use crate::domain::{next_object_id, DomainShared, WaitqDomain};
use crate::error::{KernError, KernResult};
use crate::event::{Event, TimeoutUrgency, WaitInterrupt, WaitResult, WakeupPriority};
use crate::link::{self, LinkId};
use crate::prepost::{self, PrepostId};
use crate::sync::{Arc, Mutex};
use crate::thread::{Thread, ThreadId, WaitDescriptor, WaitTarget};
use crate::trace::records;
use crate::waiters::WaiterList;
use crate::wakeup::{self, WakeMode, Woken};

pub(crate) struct SetState {
    pub(crate) valid: bool,
    pub(crate) waiters: WaiterList,
    /// Head of the member list.
    pub(crate) members: Option<LinkId>,
    pub(crate) nmembers: usize,
    /// Head of the post list.
    pub(crate) preposts: Option<PrepostId>,
    pub(crate) npreposts: usize,
}

pub(crate) struct SetCore {
    pub(crate) id: u64,
    pub(crate) policy: SyncPolicy,
    pub(crate) shared: Arc<DomainShared>,
    pub(crate) state: Mutex<SetState>,
}

/// Handle to a wait queue set.
#[derive(Clone)]
pub struct WaitQueueSet {
    pub(crate) core: Arc<SetCore>,
}

impl WaitQueueSet {
    /// Allocates and initializes a set in the process-wide domain.
    pub fn alloc(policy: SyncPolicy) -> Self {
        Self::alloc_in(WaitqDomain::global(), policy)
    }

    pub fn alloc_in(domain: &WaitqDomain, policy: SyncPolicy) -> Self {
        let core = SetCore {
            id: next_object_id(),
            policy,
            shared: Arc::clone(&domain.shared),
            state: Mutex::new(SetState {
                valid: true,
                waiters: WaiterList::new(policy),
                members: None,
                nmembers: 0,
                preposts: None,
                npreposts: 0,
            }),
        };
        log::trace!("set {} init ({:?})", core.id, policy);
        Self {
            core: Arc::new(core),
        }
    }

    /// Allocates a set from a raw policy word, rejecting unknown bits.
    pub fn alloc_raw_in(domain: &WaitqDomain, policy: u32) -> KernResult<Self> {
        Ok(Self::alloc_in(domain, SyncPolicy::from_raw(policy)?))
    }

    /// Unique id, shared with the queue id space.
    pub fn id(&self) -> u64 {
        self.core.id
    }

    pub fn policy(&self) -> SyncPolicy {
        self.core.policy
    }

    pub fn is_valid(&self) -> bool {
        self.core.state.lock().valid
    }

    pub fn member_count(&self) -> usize {
        self.core.state.lock().nmembers
    }

    pub fn waiter_count(&self) -> usize {
        self.core.state.lock().waiters.len()
    }

    pub fn same(&self, other: &WaitQueueSet) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    /// Records that `thread` blocks until a member fires `event`.
    pub fn assert_wait(
        &self,
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
        &self,
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
        &self,
        thread: &Thread,
        descriptor: WaitDescriptor,
    ) -> KernResult<WaitResult> {
        let mut ss = self.core.state.lock();
        if !ss.valid {
            return Err(KernError::InvalidSet);
        }
        let result = thread.begin_wait(WaitTarget::Set(Arc::downgrade(&self.core)), descriptor)?;
        if result == WaitResult::Waiting {
            ss.waiters.push(thread.clone(), descriptor.event);
            log::trace!("{} waits on set {} for {}", thread.id(), self.core.id, descriptor.event);
            self.core
                .shared
                .trace(records::ASSERT_WAIT, thread.id().0, descriptor.event.raw());
        }
        Ok(result)
    }

    /// Wakes the highest priority thread waiting directly on the set.
    pub fn wakeup_one(
        &self,
        event: Event,
        result: WaitResult,
        priority: WakeupPriority,
    ) -> KernResult<ThreadId> {
        self.wake(event, result, priority, WakeMode::One)?
            .first
            .ok_or(KernError::NotFound)
    }

    pub fn wakeup_all(
        &self,
        event: Event,
        result: WaitResult,
        priority: WakeupPriority,
    ) -> KernResult<usize> {
        self.wake(event, result, priority, WakeMode::All)
            .map(|woken| woken.count)
    }

    pub fn wakeup_thread(
        &self,
        event: Event,
        thread: &Thread,
        result: WaitResult,
    ) -> KernResult<()> {
        let mut ss = self.core.state.lock();
        if !ss.valid {
            return Err(KernError::InvalidSet);
        }
        let waiter = ss
            .waiters
            .remove_thread(thread, Some(event))
            .ok_or(KernError::NotFound)?;
        self.core
            .shared
            .resume(&waiter.thread, result, WakeupPriority::All);
        Ok(())
    }

    fn wake(
        &self,
        event: Event,
        result: WaitResult,
        priority: WakeupPriority,
        mode: WakeMode,
    ) -> KernResult<Woken> {
        let mut ss = self.core.state.lock();
        if !ss.valid {
            return Err(KernError::InvalidSet);
        }
        let mut woken = Woken::default();
        wakeup::wake_list(
            &self.core.shared,
            &mut ss.waiters,
            event,
            result,
            priority,
            mode,
            &mut woken,
        );
        if woken.count == 0 {
            return Err(KernError::NotFound);
        }
        Ok(woken)
    }

    /// Removes every member queue and returns how many were removed.
    pub fn unlink_all(&self) -> usize {
        link::set_unlink_all(&self.core)
    }

    /// Tears the set down: waiters are resumed with `Restart`, every member
    /// is unlinked and every post dropped.
    pub fn deinit(&self) -> KernResult<()> {
        self.teardown(false)
    }

    /// Frees the set. Fails with `SetBusy` while threads wait on it; freeing
    /// a set that was already torn down is a no-op.
    pub fn free(self) -> KernResult<()> {
        match self.teardown(true) {
            Err(KernError::InvalidSet) => Ok(()),
            other => other,
        }
    }

    fn teardown(&self, require_idle: bool) -> KernResult<()> {
        let shared = &self.core.shared;
        {
            let mut ss = self.core.state.lock();
            if !ss.valid {
                return Err(KernError::InvalidSet);
            }
            if require_idle && !ss.waiters.is_empty() {
                return Err(KernError::SetBusy(ss.waiters.len()));
            }
            ss.valid = false;
            let restarted = ss
                .waiters
                .drain(|thread| shared.resume(thread, WaitResult::Restart, WakeupPriority::All));
            if restarted > 0 {
                log::debug!("set {} restarted {} waiter(s)", self.core.id, restarted);
            }
        }

        let unlinked = link::set_unlink_all(&self.core);
        let cleared = prepost::clear_set_locked(shared, &mut self.core.state.lock());
        log::debug!(
            "set {} deinit: {} member(s) unlinked, {} stale prepost(s) dropped",
            self.core.id,
            unlinked,
            cleared
        );
        Ok(())
    }
}

impl PartialEq for WaitQueueSet {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for WaitQueueSet {}

impl fmt::Debug for WaitQueueSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitQueueSet")
            .field("id", &self.core.id)
            .field("policy", &self.core.policy)
            .finish()
    }
}

/// Pulls `thread` off the set and resumes it. Backs [`Thread::clear_wait`].
pub(crate) fn clear_waiter(
    core: &SetCore,
    thread: &Thread,
    event: Option<Event>,
    result: WaitResult,
) -> KernResult<()> {
    let mut ss = core.state.lock();
    let waiter = ss
        .waiters
        .remove_thread(thread, event)
        .ok_or(KernError::NotFound)?;
    core.shared.resume(&waiter.thread, result, WakeupPriority::All);
    Ok(())
}
