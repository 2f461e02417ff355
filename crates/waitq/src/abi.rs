//! Opaque layouts for C embedders.
//!
//! C code that embeds a queue or set in its own structures only needs the
//! size and alignment; the contents are private to this crate.

use static_assertions::const_assert_eq;

#[cfg(target_pointer_width = "32")]
mod sizes {
    pub const WAITQ: usize = 32;
    pub const WAITQ_SET: usize = 48;
}

#[cfg(all(target_pointer_width = "64", target_arch = "x86_64"))]
mod sizes {
    pub const WAITQ: usize = 48;
    pub const WAITQ_SET: usize = 64;
}

#[cfg(all(target_pointer_width = "64", not(target_arch = "x86_64")))]
mod sizes {
    pub const WAITQ: usize = 40;
    pub const WAITQ_SET: usize = 56;
}

/// Bytes reserved for one wait queue.
pub const WQ_OPAQUE_SIZE: usize = sizes::WAITQ;
/// Bytes reserved for one wait queue set.
pub const WQS_OPAQUE_SIZE: usize = sizes::WAITQ_SET;

#[repr(C, align(8))]
#[derive(Debug, Clone, Copy)]
pub struct WaitqOpaque {
    pub opaque: [u8; WQ_OPAQUE_SIZE],
}

#[repr(C, align(8))]
#[derive(Debug, Clone, Copy)]
pub struct WaitqSetOpaque {
    pub opaque: [u8; WQS_OPAQUE_SIZE],
}

impl Default for WaitqOpaque {
    fn default() -> Self {
        Self {
            opaque: [0; WQ_OPAQUE_SIZE],
        }
    }
}

impl Default for WaitqSetOpaque {
    fn default() -> Self {
        Self {
            opaque: [0; WQS_OPAQUE_SIZE],
        }
    }
}

const_assert_eq!(core::mem::size_of::<WaitqOpaque>(), WQ_OPAQUE_SIZE);
const_assert_eq!(core::mem::size_of::<WaitqSetOpaque>(), WQS_OPAQUE_SIZE);
const_assert_eq!(WQS_OPAQUE_SIZE - WQ_OPAQUE_SIZE, 16);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_is_queue_plus_two_words() {
        assert_eq!(WQS_OPAQUE_SIZE, WQ_OPAQUE_SIZE + 16);
        assert_eq!(core::mem::align_of::<WaitqOpaque>(), 8);
    }

    #[cfg(all(target_pointer_width = "64", target_arch = "x86_64"))]
    #[test]
    fn x86_64_sizes() {
        assert_eq!(WQ_OPAQUE_SIZE, 48);
        assert_eq!(WQS_OPAQUE_SIZE, 64);
    }
}
