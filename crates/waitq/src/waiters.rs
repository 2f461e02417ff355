//! Ordered waiter lists shared by queues and sets.

use std::collections::VecDeque;

use crate::config::SyncPolicy;
use crate::event::{Event, WakeupPriority};
use crate::thread::Thread;
#[cfg(test)]
use crate::thread::ThreadId;

pub(crate) struct Waiter {
    pub(crate) thread: Thread,
    pub(crate) event: Event,
}

impl Waiter {
    fn matches(&self, event: Event, filter: WakeupPriority) -> bool {
        self.event == event
            && match filter {
                WakeupPriority::All => true,
                WakeupPriority::Promote => self.thread.is_promoted(),
                WakeupPriority::Exact(priority) => self.thread.priority() == priority,
            }
    }
}

/// Waiters in arrival order (newest first for `REVERSED` policies).
pub(crate) struct WaiterList {
    waiters: VecDeque<Waiter>,
    reversed: bool,
}

impl WaiterList {
    pub(crate) fn new(policy: SyncPolicy) -> Self {
        Self {
            waiters: VecDeque::new(),
            reversed: policy.contains(SyncPolicy::REVERSED),
        }
    }

    pub(crate) fn push(&mut self, thread: Thread, event: Event) {
        let waiter = Waiter { thread, event };
        if self.reversed {
            self.waiters.push_front(waiter);
        } else {
            self.waiters.push_back(waiter);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, thread: ThreadId) -> bool {
        self.waiters.iter().any(|w| w.thread.id() == thread)
    }

    /// Removes the highest priority matching waiter. The earliest in list
    /// order wins ties.
    pub(crate) fn select_one(&mut self, event: Event, filter: WakeupPriority) -> Option<Waiter> {
        let mut best: Option<(usize, u8)> = None;
        for (index, waiter) in self.waiters.iter().enumerate() {
            if !waiter.matches(event, filter) {
                continue;
            }
            let priority = waiter.thread.priority();
            if best.map_or(true, |(_, p)| priority > p) {
                best = Some((index, priority));
            }
        }
        best.and_then(|(index, _)| self.waiters.remove(index))
    }

    /// Removes every matching waiter in list order, handing each to `wake`.
    pub(crate) fn take_matching(
        &mut self,
        event: Event,
        filter: WakeupPriority,
        mut wake: impl FnMut(&Thread),
    ) -> usize {
        let mut woken = 0;
        self.waiters.retain(|waiter| {
            if waiter.matches(event, filter) {
                wake(&waiter.thread);
                woken += 1;
                false
            } else {
                true
            }
        });
        woken
    }

    /// Removes `thread`, optionally only if it waits for `event`.
    pub(crate) fn remove_thread(
        &mut self,
        thread: &Thread,
        event: Option<Event>,
    ) -> Option<Waiter> {
        let index = self
            .waiters
            .iter()
            .position(|w| w.thread.same(thread) && event.map_or(true, |e| w.event == e))?;
        self.waiters.remove(index)
    }

    /// Empties the list, handing every waiter to `wake`.
    pub(crate) fn drain(&mut self, mut wake: impl FnMut(&Thread)) -> usize {
        let count = self.waiters.len();
        for waiter in self.waiters.drain(..) {
            wake(&waiter.thread);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const E: Event = Event(0x10);

    #[test]
    fn highest_priority_wins_then_fifo() {
        let mut list = WaiterList::new(SyncPolicy::FIFO);
        let a = Thread::new(5);
        let b = Thread::new(9);
        let c = Thread::new(9);
        list.push(a.clone(), E);
        list.push(b.clone(), E);
        list.push(c.clone(), E);

        let ids: Vec<_> = core::iter::from_fn(|| list.select_one(E, WakeupPriority::All))
            .map(|w| w.thread.id())
            .collect();
        assert_eq!(ids, vec![b.id(), c.id(), a.id()]);
    }

    #[test]
    fn reversed_policy_breaks_ties_lifo() {
        let mut list = WaiterList::new(SyncPolicy::LIFO);
        let first = Thread::new(3);
        let second = Thread::new(3);
        list.push(first.clone(), E);
        list.push(second.clone(), E);

        let woken = list.select_one(E, WakeupPriority::All).expect("waiter");
        assert_eq!(woken.thread.id(), second.id());
    }

    #[test]
    fn filters_restrict_selection() {
        let mut list = WaiterList::new(SyncPolicy::FIFO);
        let plain = Thread::new(4);
        let boosted = Thread::new(4);
        boosted.set_priority(8);
        list.push(plain.clone(), E);
        list.push(boosted.clone(), E);
        list.push(Thread::new(4), Event(0x20));

        assert!(list.select_one(E, WakeupPriority::Exact(6)).is_none());
        let promoted = list.select_one(E, WakeupPriority::Promote).expect("promoted");
        assert_eq!(promoted.thread.id(), boosted.id());
        assert!(list.select_one(E, WakeupPriority::Promote).is_none());

        let exact = list.select_one(E, WakeupPriority::Exact(4)).expect("exact");
        assert_eq!(exact.thread.id(), plain.id());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn take_matching_keeps_other_events() {
        let mut list = WaiterList::new(SyncPolicy::FIFO);
        for _ in 0..3 {
            list.push(Thread::new(1), E);
        }
        let other = Thread::new(1);
        list.push(other.clone(), Event(0x99));

        let mut seen = Vec::new();
        let woken = list.take_matching(E, WakeupPriority::All, |t| seen.push(t.id()));
        assert_eq!(woken, 3);
        assert_eq!(seen.len(), 3);
        assert!(list.contains(other.id()));
    }

    #[test]
    fn remove_thread_checks_event() {
        let mut list = WaiterList::new(SyncPolicy::FIFO);
        let thread = Thread::new(1);
        list.push(thread.clone(), E);

        assert!(list.remove_thread(&thread, Some(Event(0x11))).is_none());
        assert!(list.remove_thread(&thread, Some(E)).is_some());
        assert!(list.is_empty());
    }
}
