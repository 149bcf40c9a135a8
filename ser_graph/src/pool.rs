//! Pool of discarded objects available for reuse.

use std::{
	any::{Any, TypeId},
	sync::atomic::{AtomicU64, Ordering},
};

use rustc_hash::FxHashMap;

use crate::spin::SpinLock;

/// Maximum number of cached objects per type.
pub const MAX_CACHED_PER_TYPE: usize = 5;

struct Cached {
	generation: u64,
	object: Box<dyn Any + Send>,
}

/// Stale objects taken out under the lock, dropped once it is released.
///
/// Fixed size, as a type never has more than [`MAX_CACHED_PER_TYPE`] objects cached.
struct Discarded {
	slots: [Option<Cached>; MAX_CACHED_PER_TYPE],
	len: usize,
}

impl Discarded {
	fn new() -> Self {
		Self {
			slots: std::array::from_fn(|_| None),
			len: 0,
		}
	}

	#[inline]
	fn push(&mut self, cached: Cached) {
		self.slots[self.len] = Some(cached);
		self.len += 1;
	}
}

/// Bounded per-type pool of objects available for reuse.
///
/// Holds at most [`MAX_CACHED_PER_TYPE`] objects of each type. Cached
/// objects are advisory: [`invalidate`] discards all of them at once
/// (e.g. under memory pressure), and a `get` may return `None` at any time.
///
/// Guarded by a spin lock. Critical sections only move boxes around.
/// Nothing is allocated or dropped while the lock is held, except the
/// map entry for a type cached for the first time.
///
/// [`invalidate`]: RecyclePool::invalidate
pub struct RecyclePool {
	entries: SpinLock<FxHashMap<TypeId, Vec<Cached>>>,
	generation: AtomicU64,
}

impl RecyclePool {
	pub fn new() -> Self {
		Self {
			entries: SpinLock::new(FxHashMap::default()),
			generation: AtomicU64::new(0),
		}
	}

	/// Offer `object` for reuse. Dropped if pool for its type is full.
	pub fn put<T: Any + Send>(&self, object: T) {
		let id = TypeId::of::<T>();
		let generation = self.generation.load(Ordering::Acquire);
		let object: Box<dyn Any + Send> = Box::new(object);
		let mut stale = Discarded::new();

		// Per-type lists are never removed, so only first `put` of a type needs one.
		// Allocate it at full size before taking the lock.
		let mut list = if self.entries.lock().contains_key(&id) {
			None
		} else {
			Some(Vec::with_capacity(MAX_CACHED_PER_TYPE))
		};

		let rejected = {
			let mut entries = self.entries.lock();
			let cached = entries
				.entry(id)
				.or_insert_with(|| list.take().unwrap_or_default());
			let mut index = 0;
			while index < cached.len() {
				if cached[index].generation == generation {
					index += 1;
				} else {
					stale.push(cached.remove(index));
				}
			}

			if cached.len() < MAX_CACHED_PER_TYPE {
				cached.push(Cached { generation, object });
				None
			} else {
				Some(object)
			}
		};

		drop(list);
		drop(stale);
		drop(rejected);
	}

	/// Take an object of type `T`, most recently cached first.
	pub fn get<T: Any + Send>(&self) -> Option<T> {
		let generation = self.generation.load(Ordering::Acquire);
		let mut stale = Discarded::new();

		let found = {
			let mut entries = self.entries.lock();
			let mut found = None;
			if let Some(cached) = entries.get_mut(&TypeId::of::<T>()) {
				while let Some(entry) = cached.pop() {
					if entry.generation == generation {
						found = Some(entry.object);
						break;
					}
					stale.push(entry);
				}
			}
			found
		};

		drop(stale);
		found
			.and_then(|object| object.downcast::<T>().ok())
			.map(|object| *object)
	}

	/// Discard all cached objects.
	///
	/// Objects are released lazily, next time their type's pool is touched.
	pub fn invalidate(&self) {
		self.generation.fetch_add(1, Ordering::AcqRel);
	}

	/// Number of live cached objects of type `T`.
	pub fn cached<T: Any>(&self) -> usize {
		let generation = self.generation.load(Ordering::Acquire);
		let entries = self.entries.lock();
		entries.get(&TypeId::of::<T>()).map_or(0, |cached| {
			cached
				.iter()
				.filter(|entry| entry.generation == generation)
				.count()
		})
	}
}

impl Default for RecyclePool {
	fn default() -> Self {
		Self::new()
	}
}

