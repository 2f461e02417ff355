//! Wait queue domains.
//!
//! A domain owns everything queues and sets share: the link and prepost
//! tables, the scheduler collaborator, an optional trace hook and the bank of
//! global event queues. Most embedders use the process-wide domain returned
//! by [`WaitqDomain::global`]; separate domains keep accounting apart, which
//! is what the tests rely on.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::OnceCell;

use crate::config::WaitqConfig;
use crate::link::LinkTable;
use crate::prepost::PrepostTable;
use crate::queue::WaitQueue;
use crate::scheduler::{NullScheduler, Scheduler};
use crate::sync::{Arc, Mutex};
use crate::table::{Table, TableKind};
use crate::trace::{self, TraceHook};

/// State shared by every queue and set of one domain.
pub(crate) struct DomainShared {
    pub(crate) config: WaitqConfig,
    pub(crate) links: Mutex<LinkTable>,
    pub(crate) preposts: Mutex<PrepostTable>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    trace_hook: Option<TraceHook>,
    pub(crate) prepost_seq: AtomicU64,
}

impl DomainShared {
    pub(crate) fn trace(&self, record: u8, a: u64, b: u64) {
        trace::emit(self.trace_hook.as_ref(), record, a, b);
    }
}

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Ids for queues and sets come from one space, so a set id never equals a
/// queue id.
pub(crate) fn next_object_id() -> u64 {
    NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}

static GLOBAL: OnceCell<WaitqDomain> = OnceCell::new();

/// Handle to a domain; clones share the same tables.
#[derive(Clone)]
pub struct WaitqDomain {
    pub(crate) shared: Arc<DomainShared>,
    /// Kept outside `DomainShared`: global queues point back at it.
    pub(crate) globals: Arc<OnceCell<Box<[WaitQueue]>>>,
}

impl WaitqDomain {
    /// Creates a domain with no scheduler and no trace hook.
    pub fn new(config: WaitqConfig) -> Self {
        Self::with_config(config).build()
    }

    pub fn builder() -> WaitqDomainBuilder {
        WaitqDomainBuilder::new(WaitqConfig::default())
    }

    pub fn with_config(config: WaitqConfig) -> WaitqDomainBuilder {
        WaitqDomainBuilder::new(config)
    }

    /// The process-wide domain. Created with the default configuration on
    /// first use unless [`install_global`](Self::install_global) ran first.
    pub fn global() -> &'static WaitqDomain {
        GLOBAL.get_or_init(|| {
            log::debug!("initializing process-wide waitq domain");
            WaitqDomain::new(WaitqConfig::default())
        })
    }

    /// Installs `domain` as the process-wide domain. Fails, handing the
    /// domain back, once the global domain exists.
    pub fn install_global(domain: WaitqDomain) -> Result<(), WaitqDomain> {
        GLOBAL.set(domain)
    }

    pub fn config(&self) -> &WaitqConfig {
        &self.shared.config
    }

    pub fn name(&self) -> &'static str {
        self.shared.config.name
    }

    pub fn same(&self, other: &WaitqDomain) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl fmt::Debug for WaitqDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitqDomain")
            .field("name", &self.shared.config.name)
            .field("links", &self.shared.links.lock().outstanding())
            .field("preposts", &self.shared.preposts.lock().outstanding())
            .finish()
    }
}

pub struct WaitqDomainBuilder {
    config: WaitqConfig,
    scheduler: Option<Arc<dyn Scheduler>>,
    trace: Option<TraceHook>,
}

impl WaitqDomainBuilder {
    pub fn new(config: WaitqConfig) -> Self {
        Self {
            config,
            scheduler: None,
            trace: None,
        }
    }

    pub fn config(mut self, config: WaitqConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the collaborator that receives every woken thread.
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_trace_hook(mut self, hook: TraceHook) -> Self {
        self.trace = Some(hook);
        self
    }

    pub fn build(self) -> WaitqDomain {
        let config = self.config;
        let links = Table::new(TableKind::Link, config.slab_elems, config.link_table_max);
        let preposts = Table::new(TableKind::Prepost, config.slab_elems, config.prepost_table_max);
        log::debug!(
            "{}: domain up (links <= {}, preposts <= {}, {} global queues)",
            config.name,
            config.link_table_max,
            config.prepost_table_max,
            config.global_queue_count()
        );
        WaitqDomain {
            shared: Arc::new(DomainShared {
                config,
                links: Mutex::new(links),
                preposts: Mutex::new(preposts),
                scheduler: self.scheduler.unwrap_or_else(|| Arc::new(NullScheduler)),
                trace_hook: self.trace,
                prepost_seq: AtomicU64::new(0),
            }),
            globals: Arc::new(OnceCell::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::records;

    #[test]
    fn builder_applies_config() {
        let domain = WaitqDomain::with_config(WaitqConfig::builder().name("net").build()).build();
        assert_eq!(domain.name(), "net");
        assert_eq!(domain.link_outstanding(), 0);
        assert!(domain.same(&domain.clone()));
        assert!(!domain.same(&WaitqDomain::new(WaitqConfig::default())));
    }

    #[test]
    fn global_domain_is_a_singleton() {
        assert!(WaitqDomain::global().same(WaitqDomain::global()));
        let other = WaitqDomain::new(WaitqConfig::default());
        assert!(WaitqDomain::install_global(other).is_err());
    }

    #[test]
    fn trace_hook_sees_link_records() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let domain = WaitqDomain::builder()
            .with_trace_hook(Arc::new(move |record: u8, _payload: &[u8], _stamp: bool| {
                sink.lock().push(record);
                Ok(())
            }))
            .build();

        let queue = WaitQueue::init_in(&domain, crate::SyncPolicy::FIFO);
        let set = crate::WaitQueueSet::alloc_in(&domain, crate::SyncPolicy::FIFO);
        queue.link_alloc(&set).expect("link");
        queue.unlink(&set).expect("unlink");

        assert_eq!(seen.lock().as_slice(), &[records::LINK, records::UNLINK]);
    }
}
