// Reader/writer guard protecting the swappable track list
// Cooperative spin-based discipline: reads are frequent and short (one audio
// block), writes are rare (user edits, record flush) and swap whole values.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Fast-path retries before a reader starts yielding to the scheduler.
const READ_SPIN_RETRIES: usize = 20;

/// Fast-path retries before a writer starts yielding to the scheduler.
const WRITE_SPIN_RETRIES: usize = 100;

/// Guards one swappable value against concurrent read (realtime context)
/// and write (background context) access.
///
/// Readers never block on anything a writer could hold for unbounded time:
/// they spin a bounded number of retries and then yield. There is no
/// fairness guarantee; writer starvation is accepted because writes are
/// rare. A reader that races a writer backs out and retries, so a held
/// `ReadGuard` always sees a fully-old or fully-new value, never a torn one.
#[derive(Debug)]
pub struct SwapLock<T> {
    readers: AtomicUsize,
    writing: AtomicBool,
    value: UnsafeCell<T>,
}

// Access to `value` is mediated by the reader count / writer flag below.
unsafe impl<T: Send> Send for SwapLock<T> {}
unsafe impl<T: Send + Sync> Sync for SwapLock<T> {}

impl<T> SwapLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            readers: AtomicUsize::new(0),
            writing: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquire shared read access.
    ///
    /// Spins a bounded number of fast retries while a writer is active,
    /// then falls back to yielding. Safe to call from the audio callback.
    pub fn read(&self) -> ReadGuard<'_, T> {
        loop {
            let mut spins = 0;
            while self.writing.load(Ordering::Acquire) {
                if spins < READ_SPIN_RETRIES {
                    spins += 1;
                    std::hint::spin_loop();
                } else {
                    std::thread::yield_now();
                }
            }

            self.readers.fetch_add(1, Ordering::AcqRel);

            // A writer may have raised its flag between the check and the
            // increment. Back out and retry so the guard never observes a
            // value mid-swap.
            if self.writing.load(Ordering::Acquire) {
                self.readers.fetch_sub(1, Ordering::AcqRel);
                continue;
            }

            return ReadGuard { lock: self };
        }
    }

    /// Acquire exclusive write access, or `None` if a writer is already
    /// active. Nested write acquisition is a logic fault: it asserts in
    /// debug builds and abandons the acquisition in release builds.
    pub fn write(&self) -> Option<WriteGuard<'_, T>> {
        if self.writing.swap(true, Ordering::AcqRel) {
            debug_assert!(false, "write lock acquired while already writing");
            return None;
        }

        // Wait for active readers to drain, including any that raced the
        // flag above and are about to back out.
        let mut spins = 0;
        while self.readers.load(Ordering::Acquire) > 0 {
            if spins < WRITE_SPIN_RETRIES {
                spins += 1;
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }

        Some(WriteGuard { lock: self })
    }
}

impl<T: Default> Default for SwapLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// RAII shared access to the guarded value.
pub struct ReadGuard<'a, T> {
    lock: &'a SwapLock<T>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.readers.fetch_sub(1, Ordering::AcqRel);
    }
}

/// RAII exclusive access to the guarded value.
pub struct WriteGuard<'a, T> {
    lock: &'a SwapLock<T>,
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.writing.store(false, Ordering::Release);
    }
}
