use std::sync::Arc;

use crate::config::SyncPolicy;
use crate::domain::WaitqDomain;
use crate::error::{KernError, KernReturn};
use crate::event::{Event, WaitInterrupt, WaitResult, WakeupPriority};
use crate::queue::WaitQueue;
use crate::scheduler::ReadyQueueScheduler;
use crate::set::WaitQueueSet;
use crate::thread::Thread;

const E: Event = Event(0x51);

fn domain() -> (WaitqDomain, Arc<ReadyQueueScheduler>) {
    let scheduler = Arc::new(ReadyQueueScheduler::new());
    let domain = WaitqDomain::builder().scheduler(scheduler.clone()).build();
    (domain, scheduler)
}

#[test]
fn one_queue_posts_to_every_set() {
    let (domain, _scheduler) = domain();
    let queue = WaitQueue::init_in(&domain, SyncPolicy::FIFO);
    let sets: Vec<_> = (0..3)
        .map(|_| WaitQueueSet::alloc_in(&domain, SyncPolicy::PREPOST))
        .collect();
    for set in &sets {
        queue.link_alloc(set).expect("link");
    }

    let _ = queue.wakeup_one(E, WaitResult::Awakened, WakeupPriority::All);
    assert!(sets.iter().all(|s| s.prepost_count() == 1));

    // Every post names the same queue identity.
    let ids: Vec<_> = sets.iter().map(|s| s.preposts()[0].prepost_id).collect();
    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(queue.get_prepost_id(), Ok(ids[0]));
}

#[test]
fn unlink_drops_posts_only_on_that_set() {
    let (domain, _scheduler) = domain();
    let queue = WaitQueue::init_in(&domain, SyncPolicy::FIFO);
    let kept = WaitQueueSet::alloc_in(&domain, SyncPolicy::PREPOST);
    let left = WaitQueueSet::alloc_in(&domain, SyncPolicy::PREPOST);
    queue.link_alloc(&kept).expect("link kept");
    queue.link_alloc(&left).expect("link left");
    let _ = queue.wakeup_all(E, WaitResult::Awakened, WakeupPriority::All);

    queue.unlink(&left).expect("unlink");
    assert!(!left.has_preposts());
    assert_eq!(kept.prepost_count(), 1);
    assert!(queue.is_member(&kept));
    assert!(!queue.is_member(&left));
}

#[test]
fn set_posts_are_ordered_by_sequence() {
    let (domain, _scheduler) = domain();
    let set = WaitQueueSet::alloc_in(&domain, SyncPolicy::PREPOST);
    let queues: Vec<_> = (0..3)
        .map(|_| WaitQueue::init_in(&domain, SyncPolicy::FIFO))
        .collect();
    for queue in &queues {
        queue.link_alloc(&set).expect("link");
        let _ = queue.wakeup_one(E, WaitResult::Awakened, WakeupPriority::All);
    }

    let tokens = set.preposts();
    assert_eq!(tokens.len(), 3);
    // Newest first.
    assert!(tokens.windows(2).all(|w| w[0].seq > w[1].seq));
    assert_eq!(tokens[0].queue_id, queues[2].id());
    for queue in &queues {
        assert!(tokens.iter().any(|t| t.queue_id == queue.id()));
    }
}

#[test]
fn exact_priority_filter_skips_set_waiters_of_other_priorities() {
    let (domain, scheduler) = domain();
    let queue = WaitQueue::init_in(&domain, SyncPolicy::FIFO);
    let set = WaitQueueSet::alloc_in(&domain, SyncPolicy::FIFO);
    queue.link_alloc(&set).expect("link");

    let low = Thread::new(2);
    let high = Thread::new(9);
    set.assert_wait(&low, E, WaitInterrupt::Interruptible, None)
        .expect("low");
    set.assert_wait(&high, E, WaitInterrupt::Interruptible, None)
        .expect("high");

    let woken = queue
        .wakeup_one(E, WaitResult::Awakened, WakeupPriority::Exact(2))
        .expect("exact wakeup");
    assert_eq!(woken, low.id());
    assert!(high.is_waiting());
    assert_eq!(scheduler.history()[0].priority, WakeupPriority::Exact(2));
}

#[test]
fn lifo_set_wakes_latest_waiter_first() {
    let (domain, _scheduler) = domain();
    let queue = WaitQueue::init_in(&domain, SyncPolicy::FIFO);
    let set = WaitQueueSet::alloc_in(&domain, SyncPolicy::LIFO | SyncPolicy::PREPOST);
    queue.link_alloc(&set).expect("link");

    let early = Thread::new(5);
    let late = Thread::new(5);
    set.assert_wait(&early, E, WaitInterrupt::Interruptible, None)
        .expect("early");
    set.assert_wait(&late, E, WaitInterrupt::Interruptible, None)
        .expect("late");

    assert_eq!(
        queue.wakeup_one(E, WaitResult::Awakened, WakeupPriority::All),
        Ok(late.id())
    );
}

#[test]
fn invalid_set_is_skipped_by_member_wakeups() {
    let (domain, _scheduler) = domain();
    let queue = WaitQueue::init_in(&domain, SyncPolicy::FIFO);
    let live = WaitQueueSet::alloc_in(&domain, SyncPolicy::PREPOST);
    let torn = WaitQueueSet::alloc_in(&domain, SyncPolicy::PREPOST);
    queue.link_alloc(&live).expect("link live");
    queue.link_alloc(&torn).expect("link torn");

    torn.deinit().expect("deinit");
    let result = queue.wakeup_one(E, WaitResult::Awakened, WakeupPriority::All);
    assert_eq!(KernReturn::from_result(&result), KernReturn::NotWaiting);
    assert_eq!(live.prepost_count(), 1);
    assert!(!torn.has_preposts());
    assert_eq!(torn.clear_preposts(), 0);
}

#[test]
fn set_wakeups_require_a_valid_set() {
    let (domain, _scheduler) = domain();
    let set = WaitQueueSet::alloc_in(&domain, SyncPolicy::PREPOST);
    set.deinit().expect("deinit");
    assert_eq!(
        set.wakeup_all(E, WaitResult::Awakened, WakeupPriority::All),
        Err(KernError::InvalidSet)
    );
    assert_eq!(
        set.assert_wait(&Thread::new(1), E, WaitInterrupt::Interruptible, None),
        Err(KernError::InvalidSet)
    );
}
