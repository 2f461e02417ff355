//! # waitq
//!
//! Kernel wait queues and wait queue sets.
//!
//! A [`WaitQueue`] records threads that asserted intent to block on an
//! [`Event`]; producers wake them through the wakeup engine, which hands each
//! selected thread to the embedding [`Scheduler`]. Queues can be linked into
//! any number of [`WaitQueueSet`]s so that a single thread can wait for
//! whichever member fires first. A wakeup on a member queue that finds nobody
//! waiting leaves a *prepost* token on each set instead, so the event is still
//! visible to the next reader of the set.
//!
//! ## Module Overview
//! - [`config`]    – Sync policies and domain sizing.
//! - [`domain`]    – Link/prepost tables, scheduler hook, global queues.
//! - [`event`]     – Event identities, wait results and wakeup filters.
//! - [`queue`]     – The event queue core and its lock guard.
//! - [`set`]       – Wait queue sets.
//! - [`link`]      – Set membership (reserve / link / unlink).
//! - [`prepost`]   – Prepost tokens.
//! - [`global`]    – Hashed bank of shared process-lifetime queues.
//! - [`thread`]    – Thread handles and their wait descriptors.
//! - [`scheduler`] – The scheduler collaborator boundary.
//! - [`abi`]       – Opaque layout sizes for C embedders.
//! - [`error`]     – `KernError` and its `kern_return_t` codes.
//! - [`trace`]     – Binary trace records for an optional hook.
//! - `stats`       – Link/prepost table statistics (feature `stats`).
//!
//! Membership is kept in arenas addressed by generation-checked ids: queues
//! and sets only ever store ids of link records, never references to each
//! other. Link and prepost slots are reserved before any queue or set lock is
//! taken, so committing them under a lock never allocates.

pub mod abi;
pub mod config;
pub mod domain;
pub mod error;
pub mod event;
pub mod global;
pub mod link;
pub mod prepost;
pub mod queue;
pub mod scheduler;
pub mod set;
#[cfg(feature = "stats")]
pub mod stats;
pub mod table;
pub mod thread;
pub mod trace;

mod sync;
mod waiters;
mod wakeup;

pub use config::{SyncPolicy, WaitqConfig, WaitqConfigBuilder};
pub use domain::{WaitqDomain, WaitqDomainBuilder};
pub use error::{KernError, KernResult, KernReturn};
pub use event::{Event, TimeoutUrgency, WaitInterrupt, WaitResult, WakeupPriority};
pub use link::LinkId;
pub use prepost::{PrepostId, PrepostReservation, PrepostToken};
pub use queue::{WaitQueue, WaitQueueGuard};
pub use scheduler::{NullScheduler, ReadyQueueScheduler, Scheduler, Wakeup};
pub use set::WaitQueueSet;
#[cfg(feature = "stats")]
pub use stats::{TableStats, WAITQ_STATS_VERSION};
pub use table::{ElemId, TableKind};
pub use thread::{Thread, ThreadId, WaitDescriptor};
pub use trace::{TraceError, TraceHook};

#[cfg(test)]
mod tests;
