//! Administrative result codes.
//!
//! Every fallible call returns [`KernResult`]. [`KernError::code`] maps an
//! error onto the numeric `kern_return_t` space used by existing C callers.

use thiserror::Error;

use crate::table::TableKind;
use crate::thread::ThreadId;

/// Result type used throughout the crate.
pub type KernResult<T> = Result<T, KernError>;

/// Errors reported by queue, set, membership and prepost operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernError {
    #[error("wait queue is not initialized or has been torn down")]
    InvalidQueue,
    #[error("wait queue set is not initialized or has been freed")]
    InvalidSet,
    #[error("queue is already a member of the set")]
    AlreadyMember,
    #[error("queue is not a member of the set")]
    NotMember,
    #[error("{0} table cannot grow any further")]
    ReservationExhausted(TableKind),
    #[error("id {0:#x} is not a live reservation")]
    InvalidReservation(u64),
    #[error("no matching waiter")]
    NotFound,
    #[error("unknown sync policy bits {0:#x}")]
    InvalidPolicy(u32),
    #[error("queue and set belong to different domains")]
    ForeignDomain,
    #[error("set still has {0} waiter(s)")]
    SetBusy(usize),
    #[error("thread {0} is already waiting")]
    AlreadyWaiting(ThreadId),
}

/// Numeric `kern_return_t` values.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernReturn {
    Success = 0,
    InvalidArgument = 4,
    Failure = 5,
    ResourceShortage = 6,
    AlreadyInSet = 11,
    NotInSet = 12,
    InvalidName = 15,
    NotWaiting = 48,
}

impl KernError {
    /// Returns the `kern_return_t` code reported for this error.
    pub const fn code(self) -> KernReturn {
        match self {
            Self::InvalidQueue
            | Self::InvalidSet
            | Self::InvalidPolicy(_)
            | Self::ForeignDomain => KernReturn::InvalidArgument,
            Self::AlreadyMember => KernReturn::AlreadyInSet,
            Self::NotMember => KernReturn::NotInSet,
            Self::ReservationExhausted(_) => KernReturn::ResourceShortage,
            Self::InvalidReservation(_) => KernReturn::InvalidName,
            Self::NotFound => KernReturn::NotWaiting,
            Self::SetBusy(_) | Self::AlreadyWaiting(_) => KernReturn::Failure,
        }
    }
}

impl KernReturn {
    /// Collapses a result into its status code.
    pub fn from_result<T>(result: &KernResult<T>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(err) => err.code(),
        }
    }

    pub const fn raw(self) -> i32 {
        self as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_errors_use_set_codes() {
        assert_eq!(KernError::AlreadyMember.code(), KernReturn::AlreadyInSet);
        assert_eq!(KernError::NotMember.code().raw(), 12);
        assert_eq!(
            KernError::ReservationExhausted(TableKind::Link).code(),
            KernReturn::ResourceShortage
        );
    }

    #[test]
    fn results_collapse_to_status() {
        let ok: KernResult<()> = Ok(());
        let missing: KernResult<()> = Err(KernError::NotFound);
        assert_eq!(KernReturn::from_result(&ok), KernReturn::Success);
        assert_eq!(KernReturn::from_result(&missing).raw(), 48);
    }

    #[test]
    fn display_names_the_table() {
        let msg = KernError::ReservationExhausted(TableKind::Prepost).to_string();
        assert_eq!(msg, "prepost table cannot grow any further");
    }
}
