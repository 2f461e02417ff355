//! Sync policies and domain sizing.

use bitflags::bitflags;

use crate::error::{KernError, KernResult};

bitflags! {
    /// Behaviour flags for queues and sets.
    ///
    /// The empty set is a plain FIFO queue.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SyncPolicy: u32 {
        /// Waiters are kept in priority order (selection is always by
        /// priority; the flag is recorded for callers that inspect it).
        const FIXED_PRIORITY = 0x1;
        /// Ties between equal priorities go to the most recent waiter.
        const REVERSED = 0x2;
        /// The set records preposts from member queues.
        const PREPOST = 0x4;
        /// The queue lock may be taken from interrupt context.
        const DISABLE_IRQ = 0x8;
    }
}

impl SyncPolicy {
    pub const FIFO: Self = Self::empty();
    pub const LIFO: Self = Self::REVERSED;

    /// Validates a raw policy word from a C caller.
    pub fn from_raw(raw: u32) -> KernResult<Self> {
        Self::from_bits(raw).ok_or(KernError::InvalidPolicy(raw))
    }
}

/// Sizing of a [`WaitqDomain`](crate::WaitqDomain).
#[derive(Debug, Clone)]
pub struct WaitqConfig {
    pub name: &'static str,
    /// Upper bound on link table elements.
    pub link_table_max: usize,
    /// Upper bound on prepost table elements.
    pub prepost_table_max: usize,
    /// Elements added each time a table grows.
    pub slab_elems: usize,
    /// Number of global event queues; rounded up to a power of two.
    pub global_queues: usize,
}

impl Default for WaitqConfig {
    fn default() -> Self {
        Self {
            name: "waitq",
            link_table_max: 1 << 20,
            prepost_table_max: 1 << 20,
            slab_elems: 128,
            global_queues: 64,
        }
    }
}

impl WaitqConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> WaitqConfigBuilder {
        WaitqConfigBuilder::default()
    }

    /// Global queue count after rounding.
    pub fn global_queue_count(&self) -> usize {
        self.global_queues.max(1).next_power_of_two()
    }
}

/// Builder for ergonomic configuration construction.
#[derive(Debug, Clone, Default)]
pub struct WaitqConfigBuilder {
    config: WaitqConfig,
}

impl WaitqConfigBuilder {
    /// Sets the domain name used in log output.
    pub fn name(mut self, name: &'static str) -> Self {
        self.config.name = name;
        self
    }

    /// Caps the number of link records (memberships plus reservations).
    pub fn link_table_max(mut self, max: usize) -> Self {
        self.config.link_table_max = max;
        self
    }

    /// Caps the number of prepost elements.
    pub fn prepost_table_max(mut self, max: usize) -> Self {
        self.config.prepost_table_max = max;
        self
    }

    /// Sets the table growth granularity.
    pub fn slab_elems(mut self, elems: usize) -> Self {
        self.config.slab_elems = elems.max(1);
        self
    }

    /// Sets the size of the global event queue bank.
    pub fn global_queues(mut self, count: usize) -> Self {
        self.config.global_queues = count;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> WaitqConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = WaitqConfig::builder()
            .name("io")
            .link_table_max(64)
            .prepost_table_max(32)
            .slab_elems(8)
            .global_queues(5)
            .build();

        assert_eq!(config.name, "io");
        assert_eq!(config.link_table_max, 64);
        assert_eq!(config.prepost_table_max, 32);
        assert_eq!(config.slab_elems, 8);
        assert_eq!(config.global_queue_count(), 8);
    }

    #[test]
    fn config_default() {
        let config = WaitqConfig::default();
        assert_eq!(config.name, "waitq");
        assert_eq!(config.slab_elems, 128);
        assert_eq!(config.global_queue_count(), 64);
    }

    #[test]
    fn policy_rejects_unknown_bits() {
        assert_eq!(SyncPolicy::from_raw(0x4), Ok(SyncPolicy::PREPOST));
        assert_eq!(SyncPolicy::from_raw(0x100), Err(KernError::InvalidPolicy(0x100)));
        assert!(SyncPolicy::FIFO.is_empty());
    }
}
