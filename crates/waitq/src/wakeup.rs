//! The wakeup engine.
//!
//! Runs with the source queue locked. Local waiters are served first; the
//! wakeup then walks the queue's memberships, taking each set lock in turn,
//! and either wakes set waiters or leaves a prepost on the set.

use crate::config::SyncPolicy;
use crate::domain::DomainShared;
use crate::error::{KernError, KernResult};
use crate::event::{Event, WaitResult, WakeupPriority};
use crate::link::{self, queue_step};
use crate::prepost::{self, PostOutcome, PrepostReservation};
use crate::queue::{QueueCore, QueueState};
use crate::sync::Arc;
use crate::table::TableKind;
use crate::thread::{Thread, ThreadId};
use crate::trace::records;
use crate::waiters::WaiterList;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WakeMode {
    One,
    All,
}

#[derive(Debug, Default)]
pub(crate) struct Woken {
    pub(crate) count: usize,
    pub(crate) first: Option<ThreadId>,
}

impl DomainShared {
    /// Stores `result` in the thread and hands it to the scheduler.
    pub(crate) fn resume(&self, thread: &Thread, result: WaitResult, priority: WakeupPriority) {
        thread.finish_wait(result);
        self.scheduler.thread_go(thread, result, priority);
        log::trace!("{} resumed with {:?}", thread.id(), result);
        self.trace(records::WAKEUP, thread.id().0, result.raw() as u64);
    }
}

/// Wakes matching waiters of one list, recording them in `woken`.
pub(crate) fn wake_list(
    shared: &DomainShared,
    waiters: &mut WaiterList,
    event: Event,
    result: WaitResult,
    priority: WakeupPriority,
    mode: WakeMode,
    woken: &mut Woken,
) -> usize {
    match mode {
        WakeMode::One => match waiters.select_one(event, priority) {
            Some(waiter) => {
                shared.resume(&waiter.thread, result, priority);
                woken.first.get_or_insert(waiter.thread.id());
                woken.count += 1;
                1
            }
            None => 0,
        },
        WakeMode::All => {
            let first = &mut woken.first;
            let count = waiters.take_matching(event, priority, |thread| {
                shared.resume(thread, result, priority);
                first.get_or_insert(thread.id());
            });
            woken.count += count;
            count
        }
    }
}

/// Wakes waiters of a locked queue and propagates to its sets.
///
/// Fails with `NotFound` when nobody was woken, even if preposts were left.
/// A prepost that could not get a slot is skipped; once every selected thread
/// has been delivered the call then reports `ReservationExhausted`.
pub(crate) fn wakeup_locked(
    queue: &Arc<QueueCore>,
    qs: &mut QueueState,
    event: Event,
    result: WaitResult,
    priority: WakeupPriority,
    mode: WakeMode,
    reservation: &mut PrepostReservation,
) -> KernResult<Woken> {
    if !qs.valid {
        return Err(KernError::InvalidQueue);
    }
    let shared = &queue.shared;
    let mut woken = Woken::default();

    let local = wake_list(shared, &mut qs.waiters, event, result, priority, mode, &mut woken);
    if mode == WakeMode::One && local > 0 {
        return Ok(woken);
    }

    let mut shortage = false;
    let mut cur = qs.set_links;
    while let Some(id) = cur {
        let Some((set, next)) = queue_step(&shared.links.lock(), id) else {
            break;
        };
        cur = next;
        let Some(set) = set.upgrade() else {
            link::reclaim_from_queue(&mut shared.links.lock(), qs, id);
            continue;
        };

        let mut ss = set.state.lock();
        if !ss.valid {
            continue;
        }
        let on_set = wake_list(shared, &mut ss.waiters, event, result, priority, mode, &mut woken);
        if on_set > 0 {
            if mode == WakeMode::One {
                break;
            }
            continue;
        }
        if local == 0 && set.policy.contains(SyncPolicy::PREPOST) {
            let outcome = prepost::post_locked(queue, qs, &set, &mut ss, reservation);
            if outcome == PostOutcome::Shortage {
                log::warn!(
                    "{}: no prepost slot for waitq {} on set {}",
                    shared.config.name,
                    queue.id,
                    set.id
                );
                shortage = true;
            }
        }
    }

    if shortage {
        return Err(KernError::ReservationExhausted(TableKind::Prepost));
    }
    if woken.count == 0 {
        return Err(KernError::NotFound);
    }
    Ok(woken)
}
