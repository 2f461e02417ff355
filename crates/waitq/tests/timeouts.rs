//! Waits ended from outside: timer expiry and interrupts.

use std::sync::Arc;

use waitq::{
    Event, KernError, ReadyQueueScheduler, SyncPolicy, Thread, TimeoutUrgency, WaitInterrupt,
    WaitQueue, WaitQueueSet, WaitResult, WaitqDomain, WakeupPriority,
};

const E: Event = Event(0x3000);

fn domain() -> (WaitqDomain, Arc<ReadyQueueScheduler>) {
    let scheduler = Arc::new(ReadyQueueScheduler::new());
    let domain = WaitqDomain::builder().scheduler(scheduler.clone()).build();
    (domain, scheduler)
}

#[test]
fn expired_deadline_resumes_with_timed_out() {
    let (domain, scheduler) = domain();
    let queue = WaitQueue::init_in(&domain, SyncPolicy::FIFO);
    let thread = Thread::new(8);
    queue
        .assert_wait_leeway(
            &thread,
            E,
            WaitInterrupt::Uninterruptible,
            TimeoutUrgency::USER_NORMAL | TimeoutUrgency::LEEWAY,
            1_000,
            50,
        )
        .expect("assert_wait");

    let descriptor = thread.wait_descriptor().expect("descriptor");
    assert_eq!(descriptor.deadline, Some(1_000));
    assert_eq!(descriptor.leeway, 50);

    // Timer fires.
    thread
        .clear_wait_for(E, WaitResult::TimedOut)
        .expect("clear_wait_for");
    assert_eq!(queue.waiter_count(), 0);
    assert_eq!(thread.take_wait_result(), Some(WaitResult::TimedOut));
    assert_eq!(scheduler.history()[0].result, WaitResult::TimedOut);

    // A wakeup that races in afterwards finds nobody.
    assert_eq!(
        queue.wakeup_one(E, WaitResult::Awakened, WakeupPriority::All),
        Err(KernError::NotFound)
    );
}

#[test]
fn wakeup_before_timer_makes_clear_wait_miss() {
    let (domain, scheduler) = domain();
    let queue = WaitQueue::init_in(&domain, SyncPolicy::FIFO);
    let thread = Thread::new(8);
    queue
        .assert_wait(&thread, E, WaitInterrupt::Uninterruptible, Some(10))
        .expect("assert_wait");

    queue
        .wakeup_thread(E, &thread, WaitResult::Awakened)
        .expect("wakeup_thread");
    assert_eq!(
        thread.clear_wait_for(E, WaitResult::TimedOut),
        Err(KernError::NotFound)
    );
    assert_eq!(thread.wait_result(), WaitResult::Awakened);
    assert_eq!(scheduler.wakeups_of(thread.id()), 1);
}

#[test]
fn late_timer_does_not_end_the_next_wait() {
    let (domain, scheduler) = domain();
    let queue = WaitQueue::init_in(&domain, SyncPolicy::FIFO);
    let thread = Thread::new(8);
    queue
        .assert_wait(&thread, E, WaitInterrupt::Uninterruptible, Some(10))
        .expect("first wait");
    queue
        .wakeup_one(E, WaitResult::Awakened, WakeupPriority::All)
        .expect("wakeup");
    assert_eq!(thread.take_wait_result(), Some(WaitResult::Awakened));

    let next = Event(0x3001);
    queue
        .assert_wait(&thread, next, WaitInterrupt::Uninterruptible, Some(20))
        .expect("second wait");

    // Expiry for the first wait arrives late.
    assert_eq!(
        thread.clear_wait_for(E, WaitResult::TimedOut),
        Err(KernError::NotFound)
    );
    assert!(thread.is_waiting());
    assert_eq!(queue.waiter_count(), 1);
    assert_eq!(scheduler.wakeups_of(thread.id()), 1);

    thread
        .clear_wait_for(next, WaitResult::TimedOut)
        .expect("matching expiry");
    assert_eq!(thread.take_wait_result(), Some(WaitResult::TimedOut));
}

#[test]
fn interrupt_ends_interruptible_set_wait() {
    let (domain, _scheduler) = domain();
    let set = WaitQueueSet::alloc_in(&domain, SyncPolicy::PREPOST);
    let thread = Thread::new(3);
    set.assert_wait(&thread, E, WaitInterrupt::AbortSafe, None)
        .expect("set wait");

    assert!(thread.interrupt());
    assert_eq!(set.waiter_count(), 0);
    assert_eq!(thread.take_wait_result(), Some(WaitResult::Interrupted));
}

#[test]
fn interrupt_leaves_uninterruptible_wait_alone() {
    let (domain, _scheduler) = domain();
    let queue = WaitQueue::init_in(&domain, SyncPolicy::FIFO);
    let thread = Thread::new(3);
    queue
        .assert_wait(&thread, E, WaitInterrupt::Uninterruptible, None)
        .expect("wait");

    assert!(!thread.interrupt());
    assert!(thread.is_waiting());
    assert_eq!(queue.waiter_count(), 1);
}

#[test]
fn pending_abort_fails_next_interruptible_wait() {
    let (domain, scheduler) = domain();
    let queue = WaitQueue::init_in(&domain, SyncPolicy::FIFO);
    let thread = Thread::new(3);
    assert!(!thread.interrupt());

    let result = queue
        .assert_wait(&thread, E, WaitInterrupt::Interruptible, None)
        .expect("assert_wait");
    assert_eq!(result, WaitResult::Interrupted);
    assert!(!result.must_block());
    assert_eq!(queue.waiter_count(), 0);
    assert!(scheduler.history().is_empty());

    let retry = queue
        .assert_wait(&thread, E, WaitInterrupt::Interruptible, None)
        .expect("retry");
    assert_eq!(retry, WaitResult::Waiting);
}

#[test]
fn thread_waits_on_one_object_at_a_time() {
    let (domain, _scheduler) = domain();
    let queue = WaitQueue::init_in(&domain, SyncPolicy::FIFO);
    let other = WaitQueue::init_in(&domain, SyncPolicy::FIFO);
    let thread = Thread::new(3);
    queue
        .assert_wait(&thread, E, WaitInterrupt::Uninterruptible, None)
        .expect("wait");

    assert_eq!(
        other.assert_wait(&thread, E, WaitInterrupt::Uninterruptible, None),
        Err(KernError::AlreadyWaiting(thread.id()))
    );
    assert_eq!(other.waiter_count(), 0);
}
