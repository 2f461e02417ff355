//! Set membership.
//!
//! Each membership is one [`LinkRecord`] in the domain's link table, threaded
//! onto two intrusive lists at once: the queue's list of sets and the set's
//! list of member queues. Queues and sets only hold the list heads.
//!
//! Linking is split in two. [`WaitqDomain::link_reserve`] takes a slot
//! (growing the table if needed) with no queue or set lock held, and
//! [`WaitQueue::link`] later commits it under both locks without allocating.
//!
//! Lock order is queue, then set, then the link table. No path holds two queue
//! locks or two set locks.
//!
//! A record whose queue or set was dropped without being torn down is
//! reclaimed by whichever side walks past it next.

use core::fmt;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::domain::{DomainShared, WaitqDomain};
use crate::error::{KernError, KernResult};
use crate::prepost;
use crate::queue::{QueueCore, QueueState, WaitQueue, WaitQueueGuard};
use crate::set::{SetCore, SetState, WaitQueueSet};
use crate::sync::{Arc, Weak};
use crate::table::{ElemId, Table};
use crate::trace::records;

/// Reservation id for one membership record.
///
/// Obtained from [`WaitqDomain::link_reserve`]; consumed by a successful
/// [`WaitQueue::link`] or returned with [`WaitqDomain::link_release`].
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub(crate) ElemId);

impl LinkId {
    pub const fn raw(self) -> u64 {
        self.0.raw()
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(ElemId::from_raw(raw))
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

pub(crate) struct LinkRecord {
    pub(crate) queue: Weak<QueueCore>,
    pub(crate) queue_id: u64,
    pub(crate) set: Weak<SetCore>,
    pub(crate) set_id: u64,
    next_in_queue: Option<LinkId>,
    next_in_set: Option<LinkId>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Side {
    Queue,
    Set,
}

impl LinkRecord {
    fn next(&self, side: Side) -> Option<LinkId> {
        match side {
            Side::Queue => self.next_in_queue,
            Side::Set => self.next_in_set,
        }
    }

    fn next_mut(&mut self, side: Side) -> &mut Option<LinkId> {
        match side {
            Side::Queue => &mut self.next_in_queue,
            Side::Set => &mut self.next_in_set,
        }
    }
}

pub(crate) type LinkTable = Table<LinkRecord>;

/// Iterates one membership list starting at `head`.
pub(crate) fn walk(
    links: &LinkTable,
    head: Option<LinkId>,
    side: Side,
) -> impl Iterator<Item = (LinkId, &LinkRecord)> + '_ {
    let mut cur = head;
    core::iter::from_fn(move || {
        let id = cur?;
        let record = links.get(id.0)?;
        cur = record.next(side);
        Some((id, record))
    })
}

/// Returns the record following `id` on the queue side with its set.
pub(crate) fn queue_step(links: &LinkTable, id: LinkId) -> Option<(Weak<SetCore>, Option<LinkId>)> {
    links.get(id.0).map(|r| (r.set.clone(), r.next_in_queue))
}

/// Unthreads `id` from the list rooted at `head`.
fn unthread(links: &mut LinkTable, head: &mut Option<LinkId>, id: LinkId, side: Side) -> bool {
    let Some(next) = links.get(id.0).map(|r| r.next(side)) else {
        return false;
    };
    if *head == Some(id) {
        *head = next;
        return true;
    }
    let mut cur = *head;
    while let Some(at) = cur {
        let Some(record) = links.get_mut(at.0) else {
            return false;
        };
        if record.next(side) == Some(id) {
            *record.next_mut(side) = next;
            return true;
        }
        cur = record.next(side);
    }
    false
}

/// Drops a record whose set no longer exists. Queue lock held.
pub(crate) fn reclaim_from_queue(links: &mut LinkTable, state: &mut QueueState, id: LinkId) {
    if unthread(links, &mut state.set_links, id, Side::Queue) {
        state.nlinks -= 1;
    }
    links.remove(id.0);
}

/// Commits reservation `id` as the membership of `queue` in `set`. Both
/// locks held; never allocates.
pub(crate) fn link_locked(
    queue: &Arc<QueueCore>,
    qs: &mut QueueState,
    set: &Arc<SetCore>,
    ss: &mut SetState,
    id: LinkId,
) -> KernResult<()> {
    let shared = &queue.shared;
    if !Arc::ptr_eq(shared, &set.shared) {
        return Err(KernError::ForeignDomain);
    }
    if !qs.valid {
        return Err(KernError::InvalidQueue);
    }
    if !ss.valid {
        return Err(KernError::InvalidSet);
    }

    {
        let mut links = shared.links.lock();
        if !links.is_reserved(id.0) {
            return Err(KernError::InvalidReservation(id.raw()));
        }
        if walk(&links, qs.set_links, Side::Queue).any(|(_, r)| r.set_id == set.id) {
            return Err(KernError::AlreadyMember);
        }
        links.commit(
            id.0,
            LinkRecord {
                queue: Arc::downgrade(queue),
                queue_id: queue.id,
                set: Arc::downgrade(set),
                set_id: set.id,
                next_in_queue: qs.set_links,
                next_in_set: ss.members,
            },
        )?;
    }
    qs.set_links = Some(id);
    qs.nlinks += 1;
    ss.members = Some(id);
    ss.nmembers += 1;

    log::debug!("waitq {} linked to set {} ({})", queue.id, set.id, id);
    shared.trace(records::LINK, queue.id, set.id);
    Ok(())
}

/// Removes the membership of `queue` in `set` and the queue's posts on it.
pub(crate) fn unlink_locked(
    queue: &QueueCore,
    qs: &mut QueueState,
    set: &SetCore,
    ss: &mut SetState,
) -> KernResult<()> {
    let shared = &queue.shared;
    {
        let mut links = shared.links.lock();
        let id = walk(&links, qs.set_links, Side::Queue)
            .find(|(_, r)| r.set_id == set.id)
            .map(|(id, _)| id)
            .ok_or(KernError::NotMember)?;
        unthread(&mut links, &mut qs.set_links, id, Side::Queue);
        unthread(&mut links, &mut ss.members, id, Side::Set);
        links.remove(id.0);
    }
    qs.nlinks -= 1;
    ss.nmembers -= 1;
    prepost::remove_posts_for(shared, ss, queue.id);

    log::debug!("waitq {} unlinked from set {}", queue.id, set.id);
    shared.trace(records::UNLINK, queue.id, set.id);
    Ok(())
}

/// Removes every membership of a locked queue, taking each set lock in turn.
pub(crate) fn unlink_all_locked(queue: &QueueCore, qs: &mut QueueState) -> usize {
    let shared = &queue.shared;
    let mut removed = 0;
    let mut cur = qs.set_links.take();
    while let Some(id) = cur {
        let Some((set, next)) = queue_step(&shared.links.lock(), id) else {
            break;
        };
        cur = next;

        let set_id = match set.upgrade() {
            Some(set) => {
                let mut ss = set.state.lock();
                if unthread(&mut shared.links.lock(), &mut ss.members, id, Side::Set) {
                    ss.nmembers -= 1;
                }
                prepost::remove_posts_for(shared, &mut ss, queue.id);
                drop(ss);
                set.id
            }
            None => 0,
        };
        shared.links.lock().remove(id.0);
        removed += 1;
        shared.trace(records::UNLINK, queue.id, set_id);
    }
    qs.nlinks = 0;
    if removed > 0 {
        log::debug!("waitq {} unlinked from {} set(s)", queue.id, removed);
    }
    removed
}

/// Removes every member of `set`.
///
/// The set lock is dropped between members so each queue lock can be taken
/// first; the head is re-validated by generation after relocking.
pub(crate) fn set_unlink_all(set: &SetCore) -> usize {
    let shared = &set.shared;
    let mut removed = 0;
    loop {
        let head = set.state.lock().members;
        let Some(id) = head else {
            break;
        };
        let Some((queue, queue_id)) = shared
            .links
            .lock()
            .get(id.0)
            .map(|r| (r.queue.clone(), r.queue_id))
        else {
            continue;
        };

        let queue = queue.upgrade();
        let mut qs = queue.as_ref().map(|q| q.state.lock());
        let mut ss = set.state.lock();
        {
            let mut links = shared.links.lock();
            if links.get(id.0).is_none() {
                continue;
            }
            if let Some(qs) = qs.as_deref_mut() {
                if unthread(&mut links, &mut qs.set_links, id, Side::Queue) {
                    qs.nlinks -= 1;
                }
            }
            if unthread(&mut links, &mut ss.members, id, Side::Set) {
                ss.nmembers -= 1;
            }
            links.remove(id.0);
        }
        prepost::remove_posts_for(shared, &mut ss, queue_id);
        drop(ss);
        drop(qs);

        removed += 1;
        shared.trace(records::UNLINK, queue_id, set.id);
    }
    if removed > 0 {
        log::debug!("set {} dropped {} member(s)", set.id, removed);
    }
    removed
}

/// Returns true if `state` has a membership record for set `set_id`.
pub(crate) fn is_member_locked(shared: &DomainShared, state: &QueueState, set_id: u64) -> bool {
    walk(&shared.links.lock(), state.set_links, Side::Queue).any(|(_, r)| r.set_id == set_id)
}

/// Returns true if `state` belongs to at least one live set.
pub(crate) fn in_any_set_locked(shared: &DomainShared, state: &QueueState) -> bool {
    walk(&shared.links.lock(), state.set_links, Side::Queue).any(|(_, r)| r.set.strong_count() > 0)
}

impl DomainShared {
    pub(crate) fn link_reserve(&self) -> KernResult<LinkId> {
        let id = self.links.lock().reserve()?;
        log::trace!("{}: link reservation {}", self.config.name, id);
        Ok(LinkId(id))
    }

    pub(crate) fn link_release(&self, id: LinkId) -> KernResult<()> {
        self.links.lock().release(id.0)
    }
}

impl WaitqDomain {
    /// Reserves a link record. May grow the link table; call it with no
    /// queue or set lock held.
    pub fn link_reserve(&self) -> KernResult<LinkId> {
        self.shared.link_reserve()
    }

    /// Returns an unconsumed reservation.
    pub fn link_release(&self, id: LinkId) -> KernResult<()> {
        self.shared.link_release(id)
    }

    /// Live link records plus unconsumed reservations.
    pub fn link_outstanding(&self) -> usize {
        self.shared.links.lock().outstanding()
    }
}

impl WaitQueue {
    /// Links this queue into `set`, consuming reservation `id`.
    ///
    /// On any error the reservation is left untouched and still belongs to
    /// the caller.
    pub fn link(&self, set: &WaitQueueSet, id: LinkId) -> KernResult<()> {
        let mut qs = self.core.state.lock();
        let mut ss = set.core.state.lock();
        link_locked(&self.core, &mut qs, &set.core, &mut ss, id)
    }

    /// Reserves a link record, links, and releases the reservation on error.
    pub fn link_alloc(&self, set: &WaitQueueSet) -> KernResult<()> {
        let shared = &self.core.shared;
        let id = shared.link_reserve()?;
        self.link(set, id).map_err(|err| {
            // A failed link never consumes the reservation.
            let _ = shared.link_release(id);
            err
        })
    }

    /// Removes this queue from `set`. `NotMember` leaves everything as is.
    pub fn unlink(&self, set: &WaitQueueSet) -> KernResult<()> {
        let mut qs = self.core.state.lock();
        let mut ss = set.core.state.lock();
        unlink_locked(&self.core, &mut qs, &set.core, &mut ss)
    }

    /// Removes this queue from every set and returns how many memberships
    /// were dropped.
    pub fn unlink_all(&self) -> usize {
        let mut qs = self.core.state.lock();
        unlink_all_locked(&self.core, &mut qs)
    }

    pub fn is_member(&self, set: &WaitQueueSet) -> bool {
        let qs = self.core.state.lock();
        is_member_locked(&self.core.shared, &qs, set.core.id)
    }

    pub fn in_any_set(&self) -> bool {
        let qs = self.core.state.lock();
        in_any_set_locked(&self.core.shared, &qs)
    }

    /// Reserves a link record in this queue's domain.
    pub fn link_reserve(&self) -> KernResult<LinkId> {
        self.core.shared.link_reserve()
    }

    pub fn link_release(&self, id: LinkId) -> KernResult<()> {
        self.core.shared.link_release(id)
    }
}

impl WaitQueueGuard<'_> {
    /// Links the locked queue into `set`; the set lock is taken and released.
    pub fn link(&mut self, set: &WaitQueueSet, id: LinkId) -> KernResult<()> {
        let mut ss = set.core.state.lock();
        link_locked(&self.queue.core, &mut self.state, &set.core, &mut ss, id)
    }

    pub fn unlink(&mut self, set: &WaitQueueSet) -> KernResult<()> {
        let mut ss = set.core.state.lock();
        unlink_locked(&self.queue.core, &mut self.state, &set.core, &mut ss)
    }

    pub fn in_any_set(&self) -> bool {
        in_any_set_locked(&self.queue.core.shared, &self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SyncPolicy, WaitqConfig};

    fn domain() -> WaitqDomain {
        WaitqDomain::new(WaitqConfig::builder().slab_elems(4).build())
    }

    #[test]
    fn link_and_unlink_round() {
        let domain = domain();
        let queue = WaitQueue::init_in(&domain, SyncPolicy::FIFO);
        let set = WaitQueueSet::alloc_in(&domain, SyncPolicy::PREPOST);

        let id = domain.link_reserve().expect("reserve");
        queue.link(&set, id).expect("link");
        assert!(queue.is_member(&set));
        assert!(queue.in_any_set());
        assert_eq!(set.member_count(), 1);

        queue.unlink(&set).expect("unlink");
        assert!(!queue.is_member(&set));
        assert_eq!(domain.link_outstanding(), 0);
        assert_eq!(queue.unlink(&set), Err(KernError::NotMember));
    }

    #[test]
    fn duplicate_link_keeps_reservation() {
        let domain = domain();
        let queue = WaitQueue::init_in(&domain, SyncPolicy::FIFO);
        let set = WaitQueueSet::alloc_in(&domain, SyncPolicy::FIFO);

        queue.link_alloc(&set).expect("first link");
        let spare = domain.link_reserve().expect("reserve");
        assert_eq!(queue.link(&set, spare), Err(KernError::AlreadyMember));
        assert_eq!(domain.link_outstanding(), 2);
        domain.link_release(spare).expect("spare still reserved");
        assert_eq!(domain.link_outstanding(), 1);
    }

    #[test]
    fn consumed_reservation_is_rejected() {
        let domain = domain();
        let queue = WaitQueue::init_in(&domain, SyncPolicy::FIFO);
        let a = WaitQueueSet::alloc_in(&domain, SyncPolicy::FIFO);
        let b = WaitQueueSet::alloc_in(&domain, SyncPolicy::FIFO);

        let id = domain.link_reserve().expect("reserve");
        queue.link(&a, id).expect("link");
        assert_eq!(queue.link(&b, id), Err(KernError::InvalidReservation(id.raw())));
        assert!(!queue.is_member(&b));
        assert_eq!(domain.link_release(id), Err(KernError::InvalidReservation(id.raw())));
    }

    #[test]
    fn unlinking_middle_member_keeps_both_lists_intact() {
        let domain = domain();
        let set = WaitQueueSet::alloc_in(&domain, SyncPolicy::FIFO);
        let queues: Vec<_> = (0..3)
            .map(|_| WaitQueue::init_in(&domain, SyncPolicy::FIFO))
            .collect();
        for queue in &queues {
            queue.link_alloc(&set).expect("link");
        }

        queues[1].unlink(&set).expect("unlink middle");
        assert!(queues[0].is_member(&set));
        assert!(!queues[1].is_member(&set));
        assert!(queues[2].is_member(&set));
        assert_eq!(set.member_count(), 2);
        assert_eq!(set.unlink_all(), 2);
        assert_eq!(domain.link_outstanding(), 0);
    }

    #[test]
    fn foreign_domains_cannot_link() {
        let left = domain();
        let right = domain();
        let queue = WaitQueue::init_in(&left, SyncPolicy::FIFO);
        let set = WaitQueueSet::alloc_in(&right, SyncPolicy::FIFO);
        let id = left.link_reserve().expect("reserve");
        assert_eq!(queue.link(&set, id), Err(KernError::ForeignDomain));
    }

    #[test]
    fn dropped_set_is_reclaimed_by_queue() {
        let domain = domain();
        let queue = WaitQueue::init_in(&domain, SyncPolicy::FIFO);
        {
            let set = WaitQueueSet::alloc_in(&domain, SyncPolicy::FIFO);
            queue.link_alloc(&set).expect("link");
        }
        assert!(!queue.in_any_set());
        assert_eq!(queue.unlink_all(), 1);
        assert_eq!(domain.link_outstanding(), 0);
    }

    #[test]
    fn guard_links_while_locked() {
        let domain = domain();
        let queue = WaitQueue::init_in(&domain, SyncPolicy::FIFO);
        let set = WaitQueueSet::alloc_in(&domain, SyncPolicy::FIFO);
        let id = domain.link_reserve().expect("reserve");

        let mut guard = queue.lock();
        guard.link(&set, id).expect("link under guard");
        assert!(guard.in_any_set());
        drop(guard);
        assert!(queue.is_member(&set));
    }
}
