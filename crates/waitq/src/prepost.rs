//! Prepost tokens.
//!
//! When a wakeup reaches a set through a member queue and finds nobody to
//! wake, the set records a post naming that queue so the event is not lost
//! before someone next examines the set. Every queue that has ever posted owns
//! an identity element in the prepost table ([`WaitQueue::get_prepost_id`]);
//! posts are threaded on the set and point back at that identity.
//!
//! A set holds at most one post per queue.

use core::fmt;
use core::sync::atomic::Ordering;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::domain::{DomainShared, WaitqDomain};
use crate::error::{KernError, KernResult};
use crate::link::{self, queue_step};
use crate::queue::{QueueCore, QueueState, WaitQueue};
use crate::set::{SetCore, SetState, WaitQueueSet};
use crate::sync::{Arc, Weak};
use crate::table::{ElemId, Table, TableKind};
use crate::trace::records;

/// Prepost identity of a queue.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrepostId(pub(crate) ElemId);

impl PrepostId {
    pub const fn raw(self) -> u64 {
        self.0.raw()
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(ElemId::from_raw(raw))
    }
}

impl fmt::Display for PrepostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "prepost#{}", self.0)
    }
}

/// One outstanding post as seen by a reader of the set.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepostToken {
    pub set_id: u64,
    pub queue_id: u64,
    /// Identity of the posting queue; accepted by
    /// [`WaitQueueSet::unlink_by_prepost_id`].
    pub prepost_id: PrepostId,
    /// Domain-wide post sequence number; later posts compare greater.
    pub seq: u64,
}

pub(crate) enum PrepostElem {
    Queue(Weak<QueueCore>),
    Post {
        queue_elem: PrepostId,
        queue_id: u64,
        seq: u64,
        next: Option<PrepostId>,
    },
}

pub(crate) type PrepostTable = Table<PrepostElem>;

/// Prepost slots taken ahead of a wakeup.
///
/// Unused slots go back to the table when the reservation drops.
#[derive(Default)]
pub struct PrepostReservation {
    ids: Vec<PrepostId>,
    shared: Option<Arc<DomainShared>>,
}

impl PrepostReservation {
    /// An empty reservation; wakeups using it fall back to free table slots.
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes up to `count` slots. Growth is only attempted when `grow` is
    /// set; a short reservation is not an error.
    pub(crate) fn fill(shared: &Arc<DomainShared>, count: usize, grow: bool) -> Self {
        let mut ids = Vec::with_capacity(count);
        {
            let mut table = shared.preposts.lock();
            for _ in 0..count {
                let slot = if grow {
                    table.reserve().ok()
                } else {
                    table.reserve_no_grow()
                };
                match slot {
                    Some(slot) => ids.push(PrepostId(slot)),
                    None => break,
                }
            }
        }
        if ids.len() < count {
            log::debug!(
                "{}: reserved {} of {} prepost slots",
                shared.config.name,
                ids.len(),
                count
            );
        }
        Self {
            ids,
            shared: Some(Arc::clone(shared)),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn take(&mut self, shared: &Arc<DomainShared>) -> Option<PrepostId> {
        match &self.shared {
            Some(own) if Arc::ptr_eq(own, shared) => self.ids.pop(),
            _ => None,
        }
    }
}

impl Drop for PrepostReservation {
    fn drop(&mut self) {
        let Some(shared) = &self.shared else {
            return;
        };
        if self.ids.is_empty() {
            return;
        }
        let mut table = shared.preposts.lock();
        for id in self.ids.drain(..) {
            let _ = table.release(id.0);
        }
    }
}

impl fmt::Debug for PrepostReservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrepostReservation")
            .field("ids", &self.ids)
            .finish()
    }
}

/// Takes a slot from `reservation`, else from the table's free list.
fn take_slot(
    shared: &Arc<DomainShared>,
    reservation: &mut PrepostReservation,
) -> Option<PrepostId> {
    reservation
        .take(shared)
        .or_else(|| shared.preposts.lock().reserve_no_grow().map(PrepostId))
}

/// Returns the queue's identity, creating it from reserved slots if needed.
fn ensure_identity(
    queue: &Arc<QueueCore>,
    qs: &mut QueueState,
    reservation: &mut PrepostReservation,
) -> Option<PrepostId> {
    if let Some(id) = qs.prepost_id {
        return Some(id);
    }
    let slot = take_slot(&queue.shared, reservation)?;
    queue
        .shared
        .preposts
        .lock()
        .commit(slot.0, PrepostElem::Queue(Arc::downgrade(queue)))
        .ok()?;
    qs.prepost_id = Some(slot);
    Some(slot)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PostOutcome {
    Posted,
    AlreadyPosted,
    Shortage,
}

/// Records a post for `queue` on `set`. Queue and set locks held.
pub(crate) fn post_locked(
    queue: &Arc<QueueCore>,
    qs: &mut QueueState,
    set: &SetCore,
    ss: &mut SetState,
    reservation: &mut PrepostReservation,
) -> PostOutcome {
    let shared = &queue.shared;
    if posts(&shared.preposts.lock(), ss.preposts).any(|(_, queue_id, _)| queue_id == queue.id) {
        return PostOutcome::AlreadyPosted;
    }
    let Some(identity) = ensure_identity(queue, qs, reservation) else {
        return PostOutcome::Shortage;
    };
    let Some(slot) = take_slot(shared, reservation) else {
        return PostOutcome::Shortage;
    };

    let seq = shared.prepost_seq.fetch_add(1, Ordering::Relaxed) + 1;
    {
        let mut table = shared.preposts.lock();
        let post = PrepostElem::Post {
            queue_elem: identity,
            queue_id: queue.id,
            seq,
            next: ss.preposts,
        };
        if table.commit(slot.0, post).is_err() {
            return PostOutcome::Shortage;
        }
        table.note_prepost();
    }
    ss.preposts = Some(slot);
    ss.npreposts += 1;

    log::debug!("waitq {} preposted to set {} (seq {})", queue.id, set.id, seq);
    shared.trace(records::PREPOST, set.id, queue.id);
    PostOutcome::Posted
}

/// Iterates the posts on a set as `(id, queue_id, seq)`.
fn posts(
    table: &PrepostTable,
    head: Option<PrepostId>,
) -> impl Iterator<Item = (PrepostId, u64, u64)> + '_ {
    let mut cur = head;
    core::iter::from_fn(move || {
        let id = cur?;
        match table.get(id.0)? {
            PrepostElem::Post {
                queue_id, seq, next, ..
            } => {
                cur = *next;
                Some((id, *queue_id, *seq))
            }
            PrepostElem::Queue(_) => None,
        }
    })
}

/// Removes the posts on `ss` accepted by `matches`. Set lock held.
fn remove_posts(
    shared: &DomainShared,
    ss: &mut SetState,
    mut matches: impl FnMut(u64) -> bool,
) -> usize {
    let mut table = shared.preposts.lock();
    let mut removed = 0;
    let mut prev: Option<PrepostId> = None;
    let mut cur = ss.preposts;
    while let Some(id) = cur {
        let (queue_id, next) = match table.get(id.0) {
            Some(PrepostElem::Post { queue_id, next, .. }) => (*queue_id, *next),
            _ => break,
        };
        cur = next;
        if !matches(queue_id) {
            prev = Some(id);
            continue;
        }
        match prev {
            None => ss.preposts = next,
            Some(prev) => {
                if let Some(PrepostElem::Post { next: link, .. }) = table.get_mut(prev.0) {
                    *link = next;
                }
            }
        }
        table.remove(id.0);
        ss.npreposts -= 1;
        removed += 1;
    }
    removed
}

/// Drops the post of queue `queue_id` from a locked set.
pub(crate) fn remove_posts_for(shared: &DomainShared, ss: &mut SetState, queue_id: u64) -> usize {
    remove_posts(shared, ss, |id| id == queue_id)
}

/// Drops every post on a locked set.
pub(crate) fn clear_set_locked(shared: &DomainShared, ss: &mut SetState) -> usize {
    remove_posts(shared, ss, |_| true)
}

/// Removes the queue's posts from every set and retires its identity.
pub(crate) fn clear_prepost_locked(queue: &QueueCore, qs: &mut QueueState) -> usize {
    let shared = &queue.shared;
    let mut removed = 0;
    let mut cur = qs.set_links;
    while let Some(id) = cur {
        let Some((set, next)) = queue_step(&shared.links.lock(), id) else {
            break;
        };
        cur = next;
        if let Some(set) = set.upgrade() {
            let mut ss = set.state.lock();
            removed += remove_posts_for(shared, &mut ss, queue.id);
        }
    }
    if let Some(identity) = qs.prepost_id.take() {
        shared.preposts.lock().remove(identity.0);
        shared.trace(records::CLEAR_PREPOST, queue.id, removed as u64);
        log::debug!("waitq {} cleared {} prepost(s)", queue.id, removed);
    }
    removed
}

impl WaitqDomain {
    /// Reserves up to `count` prepost slots for wakeups issued through a
    /// held [`WaitQueueGuard`](crate::WaitQueueGuard). May grow the table.
    pub fn prepost_reserve(&self, count: usize) -> PrepostReservation {
        PrepostReservation::fill(&self.shared, count, true)
    }

    /// Live prepost elements plus unconsumed reservations.
    pub fn prepost_outstanding(&self) -> usize {
        self.shared.preposts.lock().outstanding()
    }
}

impl WaitQueue {
    /// Returns the queue's prepost identity, creating it if needed.
    pub fn get_prepost_id(&self) -> KernResult<PrepostId> {
        let shared = &self.core.shared;
        {
            let qs = self.core.state.lock();
            if !qs.valid {
                return Err(KernError::InvalidQueue);
            }
            if let Some(id) = qs.prepost_id {
                return Ok(id);
            }
        }

        let mut reservation = PrepostReservation::fill(shared, 1, !self.irq_safe());
        if reservation.is_empty() {
            return Err(KernError::ReservationExhausted(TableKind::Prepost));
        }
        let mut qs = self.core.state.lock();
        if !qs.valid {
            return Err(KernError::InvalidQueue);
        }
        ensure_identity(&self.core, &mut qs, &mut reservation)
            .ok_or(KernError::ReservationExhausted(TableKind::Prepost))
    }

    /// Removes this queue's posts from every set it belongs to and retires
    /// its identity; the next [`get_prepost_id`](Self::get_prepost_id)
    /// returns a fresh id. Returns the number of posts removed.
    pub fn clear_prepost(&self) -> usize {
        let mut qs = self.core.state.lock();
        clear_prepost_locked(&self.core, &mut qs)
    }
}

impl WaitQueueSet {
    /// Drops every post on this set and returns how many there were.
    pub fn clear_preposts(&self) -> usize {
        let shared = &self.core.shared;
        let mut ss = self.core.state.lock();
        let removed = clear_set_locked(shared, &mut ss);
        if removed > 0 {
            log::debug!("set {} cleared {} prepost(s)", self.core.id, removed);
            shared.trace(records::CLEAR_PREPOST, self.core.id, removed as u64);
        }
        removed
    }

    /// Snapshot of outstanding posts, newest first.
    pub fn preposts(&self) -> Vec<PrepostToken> {
        let shared = &self.core.shared;
        let ss = self.core.state.lock();
        let table = shared.preposts.lock();
        let mut tokens = Vec::with_capacity(ss.npreposts);
        let mut cur = ss.preposts;
        while let Some(id) = cur {
            let Some(PrepostElem::Post {
                queue_elem,
                queue_id,
                seq,
                next,
            }) = table.get(id.0)
            else {
                break;
            };
            tokens.push(PrepostToken {
                set_id: self.core.id,
                queue_id: *queue_id,
                prepost_id: *queue_elem,
                seq: *seq,
            });
            cur = *next;
        }
        tokens
    }

    pub fn has_preposts(&self) -> bool {
        self.core.state.lock().preposts.is_some()
    }

    pub fn prepost_count(&self) -> usize {
        self.core.state.lock().npreposts
    }

    /// Unlinks the queue identified by `id` from this set.
    ///
    /// Returns `Ok(false)` without side effects when the id is stale or the
    /// queue is not a member.
    pub fn unlink_by_prepost_id(&self, id: PrepostId) -> KernResult<bool> {
        let queue = match self.core.shared.preposts.lock().get(id.0) {
            Some(PrepostElem::Queue(queue)) => queue.upgrade(),
            _ => None,
        };
        let Some(queue) = queue else {
            return Ok(false);
        };

        let mut qs = queue.state.lock();
        let mut ss = self.core.state.lock();
        if !ss.valid {
            return Err(KernError::InvalidSet);
        }
        if qs.prepost_id != Some(id) {
            return Ok(false);
        }
        match link::unlink_locked(&queue, &mut qs, &self.core, &mut ss) {
            Ok(()) => Ok(true),
            Err(KernError::NotMember) => Ok(false),
            Err(err) => Err(err),
        }
    }
}
