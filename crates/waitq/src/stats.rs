//! Link and prepost table statistics.
//!
//! Layout matches the `wq_table_stats` structure read by existing tooling.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::domain::WaitqDomain;
use crate::table::Table;

pub const WAITQ_STATS_VERSION: u32 = 1;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TableStats {
    pub version: u32,
    pub table_elements: u32,
    pub table_used_elems: u32,
    pub table_elem_sz: u32,
    pub table_slabs: u32,
    pub table_slab_sz: u32,

    pub table_num_allocs: u64,
    pub table_num_preposts: u64,
    pub table_num_reservations: u64,

    pub table_max_used: u64,
    pub table_avg_used: u64,
    pub table_max_reservations: u64,
    pub table_avg_reservations: u64,
}

static_assertions::const_assert_eq!(core::mem::size_of::<TableStats>(), 80);

fn clamp(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

impl TableStats {
    pub(crate) fn snapshot<T>(table: &Table<T>) -> Self {
        let counters = table.counters();
        let elem_sz = table.elem_size();
        Self {
            version: WAITQ_STATS_VERSION,
            table_elements: clamp(table.capacity()),
            table_used_elems: clamp(table.outstanding()),
            table_elem_sz: clamp(elem_sz),
            table_slabs: clamp(counters.slabs),
            table_slab_sz: clamp(elem_sz * table.slab_elems()),
            table_num_allocs: counters.num_allocs,
            table_num_preposts: counters.num_preposts,
            table_num_reservations: counters.num_reservations,
            table_max_used: counters.max_used,
            table_avg_used: counters.avg_used,
            table_max_reservations: counters.max_reservations,
            table_avg_reservations: counters.avg_reservations,
        }
    }
}

impl WaitqDomain {
    pub fn link_stats(&self) -> TableStats {
        TableStats::snapshot(&self.shared.links.lock())
    }

    pub fn prepost_stats(&self) -> TableStats {
        TableStats::snapshot(&self.shared.preposts.lock())
    }
}
