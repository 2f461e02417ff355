//! Binary trace records.
//!
//! A domain may carry a [`TraceHook`] that receives one compact record per
//! engine action. Payloads are little-endian pairs of 64-bit ids; the record
//! type says what the pair means. Hook errors never fail the traced operation.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Errors a [`TraceHook`] reports back. The engine only logs them.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("record {0} rejected by trace consumer")]
    Rejected(u8),
    /// For hooks that write records to a sink; lets them use `?` on I/O.
    #[error("backend error: {0}")]
    Io(#[from] io::Error),
}

pub type TraceResult = Result<(), TraceError>;

/// `(record_type, payload, with_timestamp)`.
pub type TraceHook = Arc<dyn Fn(u8, &[u8], bool) -> TraceResult + Send + Sync>;

pub mod records {
    /// `(thread id, event)`
    pub const ASSERT_WAIT: u8 = 70;
    /// `(thread id, wait result)`
    pub const WAKEUP: u8 = 71;
    /// `(set id, queue id)`
    pub const PREPOST: u8 = 72;
    /// `(queue id, set id)`
    pub const LINK: u8 = 73;
    /// `(queue id, set id)`
    pub const UNLINK: u8 = 74;
    /// `(queue id, number of tokens dropped)`
    pub const CLEAR_PREPOST: u8 = 75;
}

pub(crate) fn pair(a: u64, b: u64) -> [u8; 16] {
    let mut payload = [0u8; 16];
    payload[..8].copy_from_slice(&a.to_le_bytes());
    payload[8..].copy_from_slice(&b.to_le_bytes());
    payload
}

/// Sends one record to `hook`, logging and dropping any error.
pub(crate) fn emit(hook: Option<&TraceHook>, record: u8, a: u64, b: u64) {
    if let Some(hook) = hook {
        if let Err(err) = hook(record, &pair(a, b), true) {
            log::trace!("trace record {} dropped: {}", record, err);
        }
    }
}
