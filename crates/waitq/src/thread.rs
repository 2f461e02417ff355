//! Thread handles and their wait descriptors.
//!
//! A [`Thread`] is the engine's view of a schedulable entity: an identity,
//! a base and an effective priority, and a wait slot that records what the
//! thread is blocked on. The slot is written by `assert_wait`, consumed by the
//! wakeup that resumes the thread, and can be cut short from outside with
//! [`Thread::clear_wait_for`] (timer expiry) or [`Thread::interrupt`].
//!
//! Lock order: a queue or set lock is always taken before the wait slot lock.

use core::fmt;
use core::sync::atomic::{AtomicU64, AtomicU8, Ordering};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{KernError, KernResult};
use crate::event::{Event, TimeoutUrgency, WaitInterrupt, WaitResult};
use crate::queue::{self, QueueCore};
use crate::set::{self, SetCore};
use crate::sync::{Arc, Mutex, Weak};

/// Thread identifier.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// What a thread recorded when it asserted a wait.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WaitDescriptor {
    pub event: Event,
    pub interruptible: WaitInterrupt,
    /// Absolute deadline in timer ticks; `None` waits forever.
    pub deadline: Option<u64>,
    pub urgency: TimeoutUrgency,
    pub leeway: u64,
}

impl WaitDescriptor {
    pub fn new(event: Event, interruptible: WaitInterrupt) -> Self {
        Self {
            event,
            interruptible,
            ..Self::default()
        }
    }

    pub fn with_deadline(mut self, deadline: u64) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_leeway(mut self, urgency: TimeoutUrgency, leeway: u64) -> Self {
        self.urgency = urgency;
        self.leeway = leeway;
        self
    }
}

#[derive(Clone)]
pub(crate) enum WaitTarget {
    Queue(Weak<QueueCore>),
    Set(Weak<SetCore>),
}

struct WaitRecord {
    target: WaitTarget,
    descriptor: WaitDescriptor,
}

#[derive(Default)]
struct WaitSlot {
    wait: Option<WaitRecord>,
    result: Option<WaitResult>,
    abort_pending: bool,
}

struct ThreadInner {
    id: ThreadId,
    base_priority: AtomicU8,
    sched_priority: AtomicU8,
    wait: Mutex<WaitSlot>,
}

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

/// Shared handle to a thread; clones refer to the same thread.
#[derive(Clone)]
pub struct Thread {
    inner: Arc<ThreadInner>,
}

impl Thread {
    /// Creates a thread with a fresh id whose base and effective priority are
    /// both `priority`.
    pub fn new(priority: u8) -> Self {
        let id = ThreadId(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed));
        Self::with_id(id, priority)
    }

    pub fn with_id(id: ThreadId, priority: u8) -> Self {
        Self {
            inner: Arc::new(ThreadInner {
                id,
                base_priority: AtomicU8::new(priority),
                sched_priority: AtomicU8::new(priority),
                wait: Mutex::new(WaitSlot::default()),
            }),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.inner.id
    }

    /// Effective scheduling priority.
    pub fn priority(&self) -> u8 {
        self.inner.sched_priority.load(Ordering::Acquire)
    }

    pub fn base_priority(&self) -> u8 {
        self.inner.base_priority.load(Ordering::Acquire)
    }

    /// Changes the effective priority. A waiting thread keeps its place in
    /// the queue; selection reads the priority at wakeup time.
    pub fn set_priority(&self, priority: u8) {
        self.inner.sched_priority.store(priority, Ordering::Release);
    }

    pub fn set_base_priority(&self, priority: u8) {
        self.inner.base_priority.store(priority, Ordering::Release);
    }

    /// True while the effective priority is boosted above the base.
    pub fn is_promoted(&self) -> bool {
        self.priority() > self.base_priority()
    }

    pub fn is_waiting(&self) -> bool {
        self.inner.wait.lock().wait.is_some()
    }

    /// Descriptor of the current wait, if any.
    pub fn wait_descriptor(&self) -> Option<WaitDescriptor> {
        self.inner.wait.lock().wait.as_ref().map(|w| w.descriptor)
    }

    /// Outcome of the most recent wait, or `Waiting` while still blocked.
    pub fn wait_result(&self) -> WaitResult {
        let slot = self.inner.wait.lock();
        if slot.wait.is_some() {
            WaitResult::Waiting
        } else {
            slot.result.unwrap_or(WaitResult::NotWaiting)
        }
    }

    /// Consumes the outcome of the last completed wait.
    pub fn take_wait_result(&self) -> Option<WaitResult> {
        let mut slot = self.inner.wait.lock();
        if slot.wait.is_some() {
            return None;
        }
        slot.result.take()
    }

    /// Pulls the thread off whatever it waits on and resumes it with
    /// `result`, whatever event the wait is for.
    ///
    /// Timers should use [`clear_wait_for`](Self::clear_wait_for) so a late
    /// expiry cannot end a later, unrelated wait.
    ///
    /// Returns `NotFound` if the thread is not waiting, or was resumed by
    /// someone else before the queue lock could be taken.
    pub fn clear_wait(&self, result: WaitResult) -> KernResult<()> {
        self.clear_matching(None, result)
    }

    /// Like [`clear_wait`](Self::clear_wait), but only ends a wait for
    /// `event`. The timer collaborator delivers deadlines through this with
    /// [`WaitResult::TimedOut`].
    pub fn clear_wait_for(&self, event: Event, result: WaitResult) -> KernResult<()> {
        self.clear_matching(Some(event), result)
    }

    fn clear_matching(&self, event: Option<Event>, result: WaitResult) -> KernResult<()> {
        let target = {
            let slot = self.inner.wait.lock();
            match &slot.wait {
                Some(record) if event.map_or(true, |e| record.descriptor.event == e) => {
                    record.target.clone()
                }
                _ => return Err(KernError::NotFound),
            }
        };

        match target {
            WaitTarget::Queue(weak) => match weak.upgrade() {
                Some(core) => queue::clear_waiter(&core, self, event, result),
                None => self.abandon_wait(result),
            },
            WaitTarget::Set(weak) => match weak.upgrade() {
                Some(core) => set::clear_waiter(&core, self, event, result),
                None => self.abandon_wait(result),
            },
        }
    }

    /// Interrupts an interruptible wait, or arms an abort that the next
    /// interruptible `assert_wait` consumes. Returns true if a wait was ended.
    pub fn interrupt(&self) -> bool {
        {
            let mut slot = self.inner.wait.lock();
            match &slot.wait {
                None => {
                    slot.abort_pending = true;
                    return false;
                }
                Some(record) if !record.descriptor.interruptible.is_interruptible() => {
                    return false;
                }
                Some(_) => {}
            }
        }
        self.clear_wait(WaitResult::Interrupted).is_ok()
    }

    pub fn abort_pending(&self) -> bool {
        self.inner.wait.lock().abort_pending
    }

    /// Records a wait against `target`. Called with the target's lock held.
    ///
    /// Returns `Waiting` if the caller must enqueue the thread, or
    /// `Interrupted` when a pending abort ended the wait before it began.
    pub(crate) fn begin_wait(
        &self,
        target: WaitTarget,
        descriptor: WaitDescriptor,
    ) -> KernResult<WaitResult> {
        let mut slot = self.inner.wait.lock();
        if slot.wait.is_some() {
            return Err(KernError::AlreadyWaiting(self.id()));
        }
        if slot.abort_pending && descriptor.interruptible.is_interruptible() {
            slot.abort_pending = false;
            slot.result = Some(WaitResult::Interrupted);
            return Ok(WaitResult::Interrupted);
        }
        slot.wait = Some(WaitRecord { target, descriptor });
        slot.result = None;
        Ok(WaitResult::Waiting)
    }

    /// Stores the outcome and clears the wait. Called with the target's lock
    /// held, right before the scheduler is told to run the thread.
    pub(crate) fn finish_wait(&self, result: WaitResult) {
        let mut slot = self.inner.wait.lock();
        slot.wait = None;
        slot.result = Some(result);
    }

    fn abandon_wait(&self, result: WaitResult) -> KernResult<()> {
        log::warn!("{} waited on a destroyed object; resuming with {:?}", self.id(), result);
        self.finish_wait(result);
        Ok(())
    }

    pub(crate) fn same(&self, other: &Thread) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id())
            .field("priority", &self.priority())
            .field("base_priority", &self.base_priority())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_threads_get_distinct_ids() {
        let a = Thread::new(4);
        let b = Thread::new(4);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.wait_result(), WaitResult::NotWaiting);
    }

    #[test]
    fn promotion_compares_against_base() {
        let thread = Thread::new(10);
        assert!(!thread.is_promoted());
        thread.set_priority(20);
        assert!(thread.is_promoted());
        thread.set_base_priority(20);
        assert!(!thread.is_promoted());
    }

    #[test]
    fn interrupt_without_wait_arms_abort() {
        let thread = Thread::new(1);
        assert!(!thread.interrupt());
        assert!(thread.abort_pending());

        let descriptor = WaitDescriptor::new(Event(9), WaitInterrupt::Interruptible);
        let result = thread
            .begin_wait(WaitTarget::Queue(Weak::new()), descriptor)
            .expect("begin");
        assert_eq!(result, WaitResult::Interrupted);
        assert!(!thread.abort_pending());
        assert!(!thread.is_waiting());
    }

    #[test]
    fn uninterruptible_wait_ignores_pending_abort() {
        let thread = Thread::new(1);
        thread.interrupt();
        let descriptor = WaitDescriptor::new(Event(9), WaitInterrupt::Uninterruptible);
        let result = thread
            .begin_wait(WaitTarget::Queue(Weak::new()), descriptor)
            .expect("begin");
        assert_eq!(result, WaitResult::Waiting);
        assert!(thread.abort_pending());
    }

    #[test]
    fn second_wait_is_rejected() {
        let thread = Thread::new(1);
        let descriptor = WaitDescriptor::new(Event(1), WaitInterrupt::Uninterruptible);
        thread
            .begin_wait(WaitTarget::Queue(Weak::new()), descriptor)
            .expect("first wait");
        assert_eq!(
            thread.begin_wait(WaitTarget::Queue(Weak::new()), descriptor),
            Err(KernError::AlreadyWaiting(thread.id()))
        );
    }

    #[test]
    fn clear_wait_on_destroyed_target_still_resumes() {
        let thread = Thread::new(1);
        let descriptor = WaitDescriptor::new(Event(1), WaitInterrupt::Uninterruptible);
        thread
            .begin_wait(WaitTarget::Queue(Weak::new()), descriptor)
            .expect("wait");
        assert_eq!(thread.wait_result(), WaitResult::Waiting);

        thread.clear_wait(WaitResult::TimedOut).expect("clear");
        assert_eq!(thread.take_wait_result(), Some(WaitResult::TimedOut));
        assert_eq!(thread.clear_wait(WaitResult::TimedOut), Err(KernError::NotFound));
    }
}
