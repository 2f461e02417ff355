//! Reservation-backed element arena shared by the link and prepost tables.
//!
//! Slots move through three states: free, reserved and live. `reserve` is the
//! only operation that can grow the arena, and it is always called before any
//! queue or set lock is taken; `commit` turns a reservation into a live
//! element without allocating. Every release bumps the slot generation, so an
//! [`ElemId`] names exactly one reservation for its whole life and stale ids
//! are rejected instead of aliasing a newer element.

use core::fmt;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{KernError, KernResult};

/// Slot index (low 32 bits) plus generation (high 32 bits).
///
/// Generations start at 1, so the raw value 0 never names an element.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElemId(u64);

impl ElemId {
    const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | index as u64)
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Display for ElemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.index(), self.generation())
    }
}

/// Which arena an error or statistic refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    Link,
    Prepost,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Link => write!(f, "link"),
            Self::Prepost => write!(f, "prepost"),
        }
    }
}

enum Slot<T> {
    Free { next: Option<u32> },
    Reserved,
    Live(T),
}

struct Entry<T> {
    generation: u32,
    slot: Slot<T>,
}

/// Running counters behind the statistics snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TableCounters {
    pub(crate) live: usize,
    pub(crate) reserved: usize,
    pub(crate) slabs: usize,
    pub(crate) num_allocs: u64,
    pub(crate) num_preposts: u64,
    pub(crate) num_reservations: u64,
    pub(crate) max_used: u64,
    pub(crate) avg_used: u64,
    pub(crate) max_reservations: u64,
    pub(crate) avg_reservations: u64,
}

pub(crate) struct Table<T> {
    kind: TableKind,
    entries: Vec<Entry<T>>,
    free_head: Option<u32>,
    slab_elems: usize,
    max_elems: usize,
    counters: TableCounters,
}

impl<T> Table<T> {
    /// Creates a table with its first slab already in place.
    pub(crate) fn new(kind: TableKind, slab_elems: usize, max_elems: usize) -> Self {
        let mut table = Self {
            kind,
            entries: Vec::new(),
            free_head: None,
            slab_elems: slab_elems.max(1),
            max_elems,
            counters: TableCounters::default(),
        };
        // A zero cap leaves the table empty; reserve then reports exhaustion.
        let _ = table.grow();
        table
    }

    /// Reserves a slot, growing the arena if the free list is empty.
    pub(crate) fn reserve(&mut self) -> KernResult<ElemId> {
        if self.free_head.is_none() {
            self.grow()?;
        }
        self.reserve_no_grow()
            .ok_or(KernError::ReservationExhausted(self.kind))
    }

    /// Reserves a slot from the free list only. Safe under any lock.
    pub(crate) fn reserve_no_grow(&mut self) -> Option<ElemId> {
        let index = self.free_head?;
        let entry = &mut self.entries[index as usize];
        let Slot::Free { next } = entry.slot else {
            return None;
        };
        self.free_head = next;
        entry.slot = Slot::Reserved;
        let id = ElemId::new(index, entry.generation);

        self.counters.reserved += 1;
        self.counters.num_reservations += 1;
        let reserved = self.counters.reserved as u64;
        self.counters.max_reservations = self.counters.max_reservations.max(reserved);
        self.counters.avg_reservations = (self.counters.avg_reservations + reserved) / 2;
        self.note_used();
        Some(id)
    }

    /// Returns an unconsumed reservation to the free list.
    pub(crate) fn release(&mut self, id: ElemId) -> KernResult<()> {
        if !self.is_reserved(id) {
            return Err(KernError::InvalidReservation(id.raw()));
        }
        self.counters.reserved -= 1;
        self.free_slot(id.index());
        Ok(())
    }

    /// Turns a reservation into a live element. Never allocates.
    pub(crate) fn commit(&mut self, id: ElemId, value: T) -> KernResult<()> {
        if !self.is_reserved(id) {
            return Err(KernError::InvalidReservation(id.raw()));
        }
        self.entries[id.index() as usize].slot = Slot::Live(value);
        self.counters.reserved -= 1;
        self.counters.live += 1;
        self.counters.num_allocs += 1;
        Ok(())
    }

    /// Removes a live element and frees its slot.
    pub(crate) fn remove(&mut self, id: ElemId) -> Option<T> {
        let entry = self.entry_mut(id)?;
        if !matches!(entry.slot, Slot::Live(_)) {
            return None;
        }
        let Slot::Live(value) = core::mem::replace(&mut entry.slot, Slot::Reserved) else {
            return None;
        };
        self.counters.live -= 1;
        self.free_slot(id.index());
        Some(value)
    }

    pub(crate) fn get(&self, id: ElemId) -> Option<&T> {
        let entry = self.entries.get(id.index() as usize)?;
        match &entry.slot {
            Slot::Live(value) if entry.generation == id.generation() => Some(value),
            _ => None,
        }
    }

    pub(crate) fn get_mut(&mut self, id: ElemId) -> Option<&mut T> {
        match &mut self.entry_mut(id)?.slot {
            Slot::Live(value) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn is_reserved(&self, id: ElemId) -> bool {
        self.entries
            .get(id.index() as usize)
            .is_some_and(|e| e.generation == id.generation() && matches!(e.slot, Slot::Reserved))
    }

    /// Live elements plus outstanding reservations.
    pub(crate) fn outstanding(&self) -> usize {
        self.counters.live + self.counters.reserved
    }

    #[cfg(test)]
    pub(crate) fn live(&self) -> usize {
        self.counters.live
    }

    #[cfg(test)]
    pub(crate) fn reserved(&self) -> usize {
        self.counters.reserved
    }

    pub(crate) fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn note_prepost(&mut self) {
        self.counters.num_preposts += 1;
    }

    pub(crate) fn counters(&self) -> TableCounters {
        self.counters
    }

    pub(crate) fn slab_elems(&self) -> usize {
        self.slab_elems
    }

    /// Size of one slot in bytes.
    pub(crate) fn elem_size(&self) -> usize {
        core::mem::size_of::<Entry<T>>()
    }

    fn entry_mut(&mut self, id: ElemId) -> Option<&mut Entry<T>> {
        self.entries
            .get_mut(id.index() as usize)
            .filter(|e| e.generation == id.generation())
    }

    fn free_slot(&mut self, index: u32) {
        let entry = &mut self.entries[index as usize];
        entry.generation = entry.generation.wrapping_add(1).max(1);
        entry.slot = Slot::Free {
            next: self.free_head,
        };
        self.free_head = Some(index);
    }

    fn note_used(&mut self) {
        let used = self.outstanding() as u64;
        self.counters.max_used = self.counters.max_used.max(used);
        self.counters.avg_used = (self.counters.avg_used + used) / 2;
    }

    fn grow(&mut self) -> KernResult<()> {
        let start = self.entries.len();
        let end = (start + self.slab_elems).min(self.max_elems);
        if end <= start {
            return Err(KernError::ReservationExhausted(self.kind));
        }
        self.entries.reserve_exact(end - start);
        self.entries.extend((start..end).map(|_| Entry {
            generation: 1,
            slot: Slot::Free { next: None },
        }));
        // Thread the new slab onto the free list in ascending order.
        for index in (start..end).rev() {
            self.entries[index].slot = Slot::Free {
                next: self.free_head,
            };
            self.free_head = Some(index as u32);
        }
        self.counters.slabs += 1;
        log::debug!(
            "{} table grew to {} elements ({} slabs)",
            self.kind,
            end,
            self.counters.slabs
        );
        Ok(())
    }
}
