//! The scheduler collaborator boundary.
//!
//! The engine never switches context itself. Every thread it selects is
//! handed to [`Scheduler::thread_go`] with the queue lock still held, after the
//! outcome has been stored in the thread's wait slot.

use crate::event::{WaitResult, WakeupPriority};
use crate::sync::Mutex;
use crate::thread::{Thread, ThreadId};

/// Makes woken threads runnable.
///
/// Called with queue and set locks held; implementations must not call back
/// into the wait queue engine.
pub trait Scheduler: Send + Sync {
    fn thread_go(&self, thread: &Thread, result: WaitResult, priority: WakeupPriority);
}

/// Scheduler that discards every wakeup. Used when a domain is built
/// without one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullScheduler;

impl Scheduler for NullScheduler {
    fn thread_go(&self, _thread: &Thread, _result: WaitResult, _priority: WakeupPriority) {}
}

/// One resumed thread as observed by [`ReadyQueueScheduler`].
#[derive(Debug, Clone)]
pub struct Wakeup {
    pub thread: ThreadId,
    pub result: WaitResult,
    pub priority: WakeupPriority,
}

#[derive(Default)]
struct ReadyQueue {
    /// Kept sorted by priority, highest first.
    ready: Vec<(Thread, u8)>,
    history: Vec<Wakeup>,
}

impl ReadyQueue {
    fn insert(&mut self, thread: &Thread) {
        if self.ready.iter().any(|(t, _)| t.id() == thread.id()) {
            return;
        }
        let priority = thread.priority();
        // Stable position: after every entry of equal or higher priority.
        let at = self
            .ready
            .iter()
            .position(|(_, p)| *p < priority)
            .unwrap_or(self.ready.len());
        self.ready.insert(at, (thread.clone(), priority));
    }
}

/// Priority-ordered run queue that records every wakeup it receives.
///
/// Suitable for hosted embedders and tests: [`pop_ready`](Self::pop_ready)
/// yields resumed threads highest priority first.
#[derive(Default)]
pub struct ReadyQueueScheduler {
    state: Mutex<ReadyQueue>,
}

impl ReadyQueueScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns the highest priority runnable thread.
    pub fn pop_ready(&self) -> Option<Thread> {
        let mut state = self.state.lock();
        if state.ready.is_empty() {
            None
        } else {
            Some(state.ready.remove(0).0)
        }
    }

    pub fn ready_len(&self) -> usize {
        self.state.lock().ready.len()
    }

    /// Every wakeup delivered so far, oldest first.
    pub fn history(&self) -> Vec<Wakeup> {
        self.state.lock().history.clone()
    }

    pub fn take_history(&self) -> Vec<Wakeup> {
        core::mem::take(&mut self.state.lock().history)
    }

    /// Number of times `thread` was resumed.
    pub fn wakeups_of(&self, thread: ThreadId) -> usize {
        self.state
            .lock()
            .history
            .iter()
            .filter(|w| w.thread == thread)
            .count()
    }
}

impl Scheduler for ReadyQueueScheduler {
    fn thread_go(&self, thread: &Thread, result: WaitResult, priority: WakeupPriority) {
        let mut state = self.state.lock();
        state.insert(thread);
        state.history.push(Wakeup {
            thread: thread.id(),
            result,
            priority,
        });
    }
}
