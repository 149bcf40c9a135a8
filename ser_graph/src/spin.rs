use std::{
	cell::UnsafeCell,
	hint,
	ops::{Deref, DerefMut},
	sync::atomic::{AtomicBool, Ordering},
};

/// Busy-wait lock around a value.
///
/// Only for critical sections which are O(1), never block, and never
/// re-enter the same lock. Acquiring the lock again on a thread which
/// already holds it spins forever.
pub(crate) struct SpinLock<T> {
	locked: AtomicBool,
	value: UnsafeCell<T>,
}

// `SpinLock` hands out access to `value` to one thread at a time,
// so sharing it only requires `T: Send`
unsafe impl<T: Send> Sync for SpinLock<T> {}
unsafe impl<T: Send> Send for SpinLock<T> {}

impl<T> SpinLock<T> {
	pub const fn new(value: T) -> Self {
		Self {
			locked: AtomicBool::new(false),
			value: UnsafeCell::new(value),
		}
	}

	/// Spin until the flag is acquired.
	#[inline]
	pub fn lock(&self) -> SpinGuard<'_, T> {
		while self
			.locked
			.compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
			.is_err()
		{
			// Wait for flag to clear before retrying CAS, to avoid hammering the cache line
			while self.locked.load(Ordering::Relaxed) {
				hint::spin_loop();
			}
		}
		SpinGuard { lock: self }
	}
}

pub(crate) struct SpinGuard<'a, T> {
	lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinGuard<'_, T> {
	type Target = T;

	#[inline]
	fn deref(&self) -> &T {
		// Flag is held, so no other reference to `value` exists
		unsafe { &*self.lock.value.get() }
	}
}

impl<T> DerefMut for SpinGuard<'_, T> {
	#[inline]
	fn deref_mut(&mut self) -> &mut T {
		// Flag is held, so no other reference to `value` exists
		unsafe { &mut *self.lock.value.get() }
	}
}

impl<T> Drop for SpinGuard<'_, T> {
	#[inline]
	fn drop(&mut self) {
		self.lock.locked.store(false, Ordering::Release);
	}
}
