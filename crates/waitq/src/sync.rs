//! Lock backend selection.
//!
//! Provides the `Mutex` used for every queue, set, thread and table lock.
//! With the default `parking_lot` feature the lock parks contended waiters;
//! with the `spin` feature it busy-waits, which is how the queue locks behave
//! when taken from interrupt context.

pub use std::sync::{Arc, Weak};

#[cfg(not(any(feature = "spin", feature = "parking_lot")))]
compile_error!("enable either the `parking_lot` or the `spin` feature");

#[cfg(feature = "spin")]
pub type MutexGuard<'a, T> = spin::MutexGuard<'a, T>;
#[cfg(all(feature = "parking_lot", not(feature = "spin")))]
pub type MutexGuard<'a, T> = parking_lot::MutexGuard<'a, T>;

/// Platform-agnostic mutex wrapper.
///
/// Neither backend poisons, so a panic while a queue lock is held leaves the
/// queue usable by other threads.
pub struct Mutex<T> {
    #[cfg(feature = "spin")]
    inner: spin::Mutex<T>,
    #[cfg(all(feature = "parking_lot", not(feature = "spin")))]
    inner: parking_lot::Mutex<T>,
}

impl<T> Mutex<T> {
    /// Creates a new mutex protecting the given value.
    pub fn new(value: T) -> Self {
        Self {
            #[cfg(feature = "spin")]
            inner: spin::Mutex::new(value),
            #[cfg(all(feature = "parking_lot", not(feature = "spin")))]
            inner: parking_lot::Mutex::new(value),
        }
    }

    /// Acquires the mutex, blocking until it becomes available.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
