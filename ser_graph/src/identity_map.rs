//! Per-pass hash map tracking object identity.

use std::{
	any::TypeId,
	fmt,
	hash::{Hash, Hasher},
};

use rustc_hash::FxHasher;
use tracing::trace;

/// Levels grow when `count * GROWTH_FACTOR > capacity`, and grow by this factor.
const GROWTH_FACTOR: usize = 2;

/// Minimum requested size for a level.
const MIN_SIZE: usize = 2;

/// Size requested for the top level when none is specified.
const DEFAULT_SIZE: usize = 8;

/// Level capacities. Primes, each roughly 1.5x the last, which keeps load
/// factor near 0.5 with the growth policy, and avoids tiny even sizes where
/// `hash % capacity` degenerates.
const CAPACITIES: [usize; 52] = [
	3, 5, 7, 11, 13, 17, 19, 23, 37, 59, 89, 137, 211, 317, 479, 719, 1087, 1637, 2459, 3691, 5557,
	8353, 12539, 18839, 28277, 42433, 63659, 95507, 143261, 214913, 322397, 483611, 725423,
	1088159, 1632259, 2448389, 3672593, 5508913, 8263373, 12395069, 18592631, 27888947, 41833427,
	62750147, 94125247, 141187901, 211781873, 317672813, 476509223, 714763843, 1072145771,
	1608218669,
];

/// Get capacity to use for a requested size.
///
/// First entry in capacity table which is not smaller than `size`.
/// Sizes beyond the end of the table are used as is.
pub fn adjust_capacity(size: usize) -> usize {
	CAPACITIES
		.iter()
		.copied()
		.find(|&capacity| capacity >= size)
		.unwrap_or(size)
}

/// Capacity of a level created for `size` elements.
#[inline]
fn level_capacity(size: usize) -> usize {
	adjust_capacity(size.max(MIN_SIZE) * GROWTH_FACTOR)
}

/// Keys usable in an [`IdentityMap`].
///
/// `type_tag` is only consulted in [`EqualityMode::Strict`], where two keys
/// which compare equal are only considered the same key if their type tags
/// also match.
pub trait IdentityKey: Hash + Eq {
	fn type_tag(&self) -> TypeId;
}

macro_rules! impl_identity_key {
	($($ty:ty),* $(,)?) => {
		$(
			impl IdentityKey for $ty {
				#[inline]
				fn type_tag(&self) -> TypeId {
					TypeId::of::<Self>()
				}
			}
		)*
	};
}

impl_identity_key!(
	u8,
	u16,
	u32,
	u64,
	usize,
	i8,
	i16,
	i32,
	i64,
	isize,
	bool,
	char,
	String,
	&'static str,
);

/// How stored keys are compared with queried keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EqualityMode {
	/// `==` only
	#[default]
	Value,
	/// `==` and identical `type_tag()`
	Strict,
}

#[inline]
fn keys_match<K: IdentityKey>(mode: EqualityMode, stored: &K, key: &K) -> bool {
	stored == key && (mode == EqualityMode::Value || stored.type_tag() == key.type_tag())
}

#[inline]
fn hash_of<K: Hash>(key: &K) -> usize {
	let mut hasher = FxHasher::default();
	key.hash(&mut hasher);
	(hasher.finish() & (i64::MAX as u64)) as usize
}

/// One level of an [`IdentityMap`].
///
/// Parallel key / value slot arrays. An occupied key slot always has an
/// occupied value slot.
struct Level<K, V> {
	keys: Box<[Option<K>]>,
	values: Box<[Option<V>]>,
	count: usize,
}

impl<K, V> Level<K, V> {
	fn with_capacity(capacity: usize) -> Self {
		Self {
			keys: (0..capacity).map(|_| None).collect(),
			values: (0..capacity).map(|_| None).collect(),
			count: 0,
		}
	}

	#[inline]
	fn capacity(&self) -> usize {
		self.keys.len()
	}

	#[inline]
	fn is_overloaded(&self) -> bool {
		self.count * GROWTH_FACTOR > self.capacity()
	}

	fn clear(&mut self) {
		if self.count > 0 {
			self.keys.iter_mut().for_each(|key| *key = None);
			self.values.iter_mut().for_each(|value| *value = None);
			self.count = 0;
		}
	}

	fn drain_into(self, entries: &mut Vec<(K, V)>) {
		let pairs = self.keys.into_vec().into_iter().zip(self.values.into_vec());
		entries.extend(pairs.filter_map(|pair| match pair {
			(Some(key), Some(value)) => Some((key, value)),
			_ => None,
		}));
	}
}

/// Hash map from object identity to per-pass metadata.
///
/// Used for one encode or decode pass, then cleared or dropped.
/// There is no removal.
///
/// Collisions are not chained per bucket. Instead each level is a flat table,
/// and a key which lands on an occupied slot holding a different key moves
/// on to the next level, which is created on demand, sized at about a third
/// of the overflowing level's element count.
///
/// Levels are stored in a `Vec`. Level `n + 1` holds the overflow of level `n`.
///
/// # Growth
///
/// A level grows when `count * 2 > capacity`. Before a level grows, it checks
/// whether its parent's combined load (`parent.count + count`) would exceed
/// the parent's headroom. If so, the parent grows instead. Growing a level
/// rehashes every entry in that level and all levels below it into the new
/// table, and discards the lower levels. So growing the top level flattens
/// the whole map.
///
/// # Example
///
/// ```
/// use ser_graph::IdentityMap;
///
/// let mut map = IdentityMap::new();
/// map.put(0x1000usize, 1u32);
/// map.put(0x2000usize, 2u32);
/// map.put(0x1000usize, 3u32);
///
/// assert_eq!(map.get(&0x1000), Some(&3));
/// assert_eq!(map.get(&0x2000), Some(&2));
/// assert_eq!(map.get(&0x3000), None);
/// assert_eq!(map.len(), 2);
/// ```
pub struct IdentityMap<K, V> {
	levels: Vec<Level<K, V>>,
	initial_size: usize,
	mode: EqualityMode,
}

impl<K: IdentityKey, V> IdentityMap<K, V> {
	/// Create new [`IdentityMap`] with default initial size.
	pub fn new() -> Self {
		Self::with_capacity(DEFAULT_SIZE)
	}

	/// Create new [`IdentityMap`] sized for `size` entries.
	///
	/// Top level capacity is the first capacity in the size table which is not
	/// smaller than `size * 2`.
	pub fn with_capacity(size: usize) -> Self {
		Self {
			levels: vec![Level::with_capacity(level_capacity(size))],
			initial_size: size,
			mode: EqualityMode::Value,
		}
	}

	/// Create new [`IdentityMap`] using strict key equality.
	///
	/// See [`EqualityMode::Strict`].
	pub fn with_strict_types(size: usize) -> Self {
		let mut map = Self::with_capacity(size);
		map.mode = EqualityMode::Strict;
		map
	}

	/// Get equality mode.
	#[inline]
	pub fn equality_mode(&self) -> EqualityMode {
		self.mode
	}

	/// Get value for `key`.
	#[inline]
	pub fn get(&self, key: &K) -> Option<&V> {
		let hash = hash_of(key);
		for level in &self.levels {
			let index = hash % level.capacity();
			match &level.keys[index] {
				None => return None,
				Some(stored) if keys_match(self.mode, stored, key) => {
					return level.values[index].as_ref();
				}
				Some(_) => {}
			}
		}
		None
	}

	/// Check if map contains `key`.
	#[inline]
	pub fn contains_key(&self, key: &K) -> bool {
		self.get(key).is_some()
	}

	/// Insert `value` for `key`, overwriting any existing value.
	pub fn put(&mut self, key: K, value: V) {
		if self.levels.is_empty() {
			self
				.levels
				.push(Level::with_capacity(level_capacity(self.initial_size)));
		}
		let hash = hash_of(&key);
		self.insert(0, key, value, hash);
	}

	/// Insert starting at level `start`, which acts as its own parent.
	fn insert(&mut self, start: usize, key: K, value: V, hash: usize) {
		let mode = self.mode;
		let mut index = start;
		let mut parent = start;
		loop {
			if self.levels[index].is_overloaded() {
				let combined = self.levels[parent].count + self.levels[index].count;
				if combined * GROWTH_FACTOR > self.levels[parent].capacity() {
					// Parent has no headroom either. Grow parent, and retry from there.
					let size = self.levels[parent].capacity() * GROWTH_FACTOR;
					self.resize(parent, size);
					index = parent;
					continue;
				}
				let size = self.levels[index].capacity() * GROWTH_FACTOR;
				self.resize(index, size);
			}

			let level = &mut self.levels[index];
			let slot = hash % level.capacity();
			let collision = match &level.keys[slot] {
				None => false,
				Some(stored) => !keys_match(mode, stored, &key),
			};

			if !collision {
				// Empty slot, or same key (overwrite value, keep stored key)
				if level.keys[slot].is_none() {
					level.keys[slot] = Some(key);
					level.count += 1;
				}
				level.values[slot] = Some(value);
				return;
			}

			let count = level.count;
			if index + 1 == self.levels.len() {
				let size = count / 3;
				self.levels.push(Level::with_capacity(level_capacity(size)));
			}
			parent = index;
			index += 1;
		}
	}

	/// Grow level `index` to at least `size`, folding all levels below it back in.
	fn resize(&mut self, index: usize, size: usize) {
		let capacity = adjust_capacity(size);
		trace!(level = index, capacity, "growing identity map level");

		let count = self.levels[index..].iter().map(|level| level.count).sum();
		let mut entries = Vec::with_capacity(count);
		for level in self.levels.drain(index..) {
			level.drain_into(&mut entries);
		}
		self.levels.push(Level::with_capacity(capacity));

		for (key, value) in entries {
			let hash = hash_of(&key);
			self.insert(index, key, value, hash);
		}
	}
}

impl<K, V> IdentityMap<K, V> {
	/// Number of entries.
	pub fn len(&self) -> usize {
		self.levels.iter().map(|level| level.count).sum()
	}

	/// Returns `true` if map contains no entries.
	pub fn is_empty(&self) -> bool {
		self.levels.iter().all(|level| level.count == 0)
	}

	/// Capacity of top level. 0 if nothing has been allocated yet.
	pub fn capacity(&self) -> usize {
		self.levels.first().map_or(0, Level::capacity)
	}

	/// Number of levels currently in use.
	pub fn depth(&self) -> usize {
		self.levels.len()
	}

	/// Remove all entries, ready for next pass.
	///
	/// Keeps top level's allocation. Overflow levels are dropped.
	pub fn clear(&mut self) {
		self.levels.truncate(1);
		if let Some(level) = self.levels.first_mut() {
			level.clear();
		}
	}
}

impl<K, V> Default for IdentityMap<K, V> {
	/// Create an empty [`IdentityMap`] which allocates nothing until first `put`.
	fn default() -> Self {
		Self {
			levels: Vec::new(),
			initial_size: DEFAULT_SIZE,
			mode: EqualityMode::Value,
		}
	}
}

impl<K, V> fmt::Debug for IdentityMap<K, V> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("IdentityMap")
			.field("len", &self.len())
			.field("capacity", &self.capacity())
			.field("depth", &self.depth())
			.field("mode", &self.mode)
			.finish()
	}
}
