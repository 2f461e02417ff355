//! Event identities, wait outcomes and wakeup filters.

use core::fmt;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use bitflags::bitflags;

/// 64-bit event identity a thread waits on.
///
/// Events are opaque to the engine; they are compared for equality only.
/// Addresses of kernel objects are the usual source of event values.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Event(pub u64);

impl Event {
    /// The "no particular event" identity used by readiness polling.
    pub const NONE: Event = Event(0);

    /// Uses the address of `value` as the event identity.
    pub fn from_addr<T: ?Sized>(value: &T) -> Self {
        Self(value as *const T as *const u8 as usize as u64)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for Event {
    #[inline]
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EVT({:#x})", self.0)
    }
}

/// Outcome of an assert-wait or delivered to a resumed thread.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitResult {
    /// The wait was recorded; the caller should block.
    Waiting = -1,
    /// Woken normally by a producer.
    Awakened = 0,
    /// Woken because the deadline passed.
    TimedOut = 1,
    /// Woken because the wait was interrupted.
    Interrupted = 2,
    /// The queue was torn down underneath the waiter.
    Restart = 3,
    /// The thread was not waiting.
    NotWaiting = 10,
}

impl WaitResult {
    pub const fn raw(self) -> i32 {
        self as i32
    }

    /// Returns true when the caller must hand control to the scheduler.
    pub const fn must_block(self) -> bool {
        matches!(self, Self::Waiting)
    }
}

/// Whether a wait may be cut short by an interrupt.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum WaitInterrupt {
    /// Only a wakeup or timeout ends the wait.
    #[default]
    Uninterruptible,
    /// Interrupts end the wait.
    Interruptible,
    /// Only safe aborts end the wait.
    AbortSafe,
}

impl WaitInterrupt {
    pub const fn is_interruptible(self) -> bool {
        !matches!(self, Self::Uninterruptible)
    }
}

bitflags! {
    /// Timer coalescing hints for deadline-bound waits.
    ///
    /// The engine stores these untouched for the timer collaborator.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TimeoutUrgency: u32 {
        const SYS_CRITICAL = 0x01;
        const SYS_BACKGROUND = 0x02;
        const USER = 0x10;
        const LEEWAY = 0x20;
        const FIRST_AVAIL = 0x40;
        const RATELIMITED = 0x80;
    }
}

impl TimeoutUrgency {
    pub const SYS_NORMAL: Self = Self::empty();
    pub const USER_NORMAL: Self = Self::USER;
}

/// Which waiters a wakeup is allowed to select.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum WakeupPriority {
    /// Any matching waiter.
    #[default]
    All,
    /// Only waiters running above their base priority. The mode is also
    /// forwarded to the scheduler, which decides whether to boost the waker.
    Promote,
    /// Only waiters whose effective priority equals the value.
    Exact(u8),
}

impl WakeupPriority {
    const RAW_ALL: i32 = -1;
    const RAW_PROMOTE: i32 = -2;

    /// Decodes the C `int priority` argument.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            Self::RAW_ALL => Some(Self::All),
            Self::RAW_PROMOTE => Some(Self::Promote),
            0..=255 => Some(Self::Exact(raw as u8)),
            _ => None,
        }
    }

    pub const fn raw(self) -> i32 {
        match self {
            Self::All => Self::RAW_ALL,
            Self::Promote => Self::RAW_PROMOTE,
            Self::Exact(prio) => prio as i32,
        }
    }
}
