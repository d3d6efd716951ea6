//! Shard implementation for partitioned byte storage.
//!
//! A `Shard` is a single partition of a [`MemoryStore`](super::MemoryStore). Entries are kept in
//! an `IndexMap` whose order doubles as the clock ring, and a "clock hand" sweeps it when space
//! is needed:
//! - If an entry's clock bit is set, clear it and move to the next entry
//! - If the clock bit is clear but frequency > 0, decrement frequency and move to next entry
//! - If both clock bit and frequency are 0, evict the entry immediately
//! - After a full sweep with no evictions, force-evict the entry at the hand position
//!
//! Clock bits and frequency counters are atomics so reads can touch them under a read lock.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use ahash::RandomState;
use indexmap::IndexMap;

/// Stored value plus its clock metadata.
pub(crate) struct Entry {
	data: Box<[u8]>,
	/// Charged size: key plus value bytes
	size: usize,
	clock_bit: AtomicBool,
	frequency: AtomicU8,
}

impl Entry {
	fn new(key: &str, data: &[u8]) -> Self {
		Self {
			data: data.into(),
			size: charge(key, data),
			clock_bit: AtomicBool::new(false),
			frequency: AtomicU8::new(0),
		}
	}

	pub fn data(&self) -> &[u8] {
		&self.data
	}

	/// Record an access.
	fn touch(&self) {
		self.clock_bit.store(true, Ordering::Relaxed);
		// load+store instead of a CAS loop; a lost increment only skews the heuristic
		let freq = self.frequency.load(Ordering::Relaxed);
		if freq < u8::MAX {
			self.frequency.store(freq + 1, Ordering::Relaxed);
		}
	}
}

/// Bytes an entry counts against capacity.
pub(crate) fn charge(key: &str, data: &[u8]) -> usize {
	key.len() + data.len()
}

/// What an insert did to the shard.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InsertOutcome {
	/// Charged size of the entry previously stored under the key
	pub replaced: Option<usize>,
	/// Whether the new entry was retained
	pub stored: bool,
	pub evictions: usize,
	pub evicted_size: usize,
}

/// A single shard with clock eviction.
///
/// The shard is not thread-safe on its own; the store wraps it in RwLock.
pub(crate) struct Shard {
	entries: IndexMap<Box<str>, Entry, RandomState>,
	/// Clock hand position (index into entries)
	hand: usize,
	size_current: usize,
	size_capacity: usize,
}

impl Shard {
	pub fn new(size_capacity: usize) -> Self {
		Self {
			entries: IndexMap::with_hasher(RandomState::new()),
			hand: 0,
			size_current: 0,
			size_capacity,
		}
	}

	/// Insert or replace an entry, evicting others until it fits.
	///
	/// An entry larger than the whole shard is not retained; any previous
	/// value under the key is dropped so a stale blob is never served.
	pub fn insert(&mut self, key: &str, data: &[u8]) -> InsertOutcome {
		let size = charge(key, data);
		let mut outcome = InsertOutcome {
			replaced: self.remove(key).map(|old| old.size),
			..InsertOutcome::default()
		};

		if size > self.size_capacity {
			return outcome;
		}

		// Evict before inserting so the new entry cannot evict itself
		let (evictions, evicted_size) = self.evict_until(self.size_capacity - size);
		outcome.evictions = evictions;
		outcome.evicted_size = evicted_size;

		self.entries.insert(key.into(), Entry::new(key, data));
		self.size_current += size;
		if self.hand >= self.entries.len() {
			self.hand = 0;
		}
		outcome.stored = true;
		outcome
	}

	/// Look up an entry, updating its clock bit and frequency.
	pub fn get(&self, key: &str) -> Option<&Entry> {
		let entry = self.entries.get(key)?;
		entry.touch();
		Some(entry)
	}

	/// Remove an entry using O(1) swap_remove.
	///
	/// swap_remove moves the last element into the gap, so the hand is
	/// adjusted to keep pointing at the same logical entry.
	pub fn remove(&mut self, key: &str) -> Option<Entry> {
		let old_len = self.entries.len();
		let (removed_idx, _, entry) = self.entries.swap_remove_full(key)?;
		let new_len = self.entries.len();

		if new_len == 0 {
			self.hand = 0;
		} else if removed_idx < self.hand {
			self.hand -= 1;
		} else if self.hand == old_len - 1 && removed_idx != old_len - 1 {
			// Hand was on the last element, which now sits at removed_idx
			self.hand = removed_idx;
		}
		if self.hand >= new_len && new_len > 0 {
			self.hand = 0;
		}

		self.size_current -= entry.size;
		Some(entry)
	}

	/// Change the capacity, evicting until the shard fits.
	///
	/// Returns (num_evictions, total_evicted_size).
	pub fn set_capacity(&mut self, size_capacity: usize) -> (usize, usize) {
		self.size_capacity = size_capacity;
		self.evict_until(size_capacity)
	}

	pub fn clear(&mut self) {
		self.entries.clear();
		self.hand = 0;
		self.size_current = 0;
	}

	#[cfg(test)]
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	#[cfg(test)]
	pub fn size(&self) -> usize {
		self.size_current
	}

	/// Membership test that leaves clock metadata untouched.
	pub fn contains(&self, key: &str) -> bool {
		self.entries.contains_key(key)
	}

	/// Evict entries until at most `limit` bytes are in use.
	///
	/// Returns (num_evictions, total_evicted_size).
	fn evict_until(&mut self, limit: usize) -> (usize, usize) {
		let mut num_evictions = 0;
		let mut total_evicted_size = 0;
		while self.size_current > limit {
			match self.evict_one() {
				Some(size) => {
					num_evictions += 1;
					total_evicted_size += size;
				}
				None => break,
			}
		}
		(num_evictions, total_evicted_size)
	}

	/// Evict one entry with the clock sweep. Returns its charged size.
	fn evict_one(&mut self) -> Option<usize> {
		let len = self.entries.len();
		if len == 0 {
			return None;
		}

		let mut hand = self.hand.min(len - 1);
		let mut victim = None;
		for _ in 0..len {
			let (_, entry) = self.entries.get_index(hand)?;
			if entry.clock_bit.load(Ordering::Relaxed) {
				entry.clock_bit.store(false, Ordering::Relaxed);
			} else if entry.frequency.load(Ordering::Relaxed) == 0 {
				victim = Some(hand);
				break;
			} else {
				entry.frequency.fetch_sub(1, Ordering::Relaxed);
			}
			hand = (hand + 1) % len;
		}

		// A full sweep without a victim force-evicts at the hand so eviction always progresses
		let index = victim.unwrap_or(hand);
		self.hand = index;
		let (key, _) = self.entries.get_index(index)?;
		let key = key.clone();
		let evicted = self.remove(&key)?;
		tracing::debug!(key = &*key, bytes = evicted.size, "evicted entry");
		Some(evicted.size)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_shard_insert() {
		let mut shard = Shard::new(1000);

		let outcome = shard.insert("a", &[1, 2, 3]);
		assert!(outcome.stored);
		assert_eq!(outcome.replaced, None);
		assert!(shard.contains("a"));
		assert_eq!(shard.len(), 1);
		assert_eq!(shard.size(), 4);
	}

	#[test]
	fn test_shard_replace_reports_old_size() {
		let mut shard = Shard::new(1000);
		shard.insert("a", &[0; 10]);

		let outcome = shard.insert("a", &[0; 3]);
		assert_eq!(outcome.replaced, Some(11));
		assert_eq!(shard.size(), 4);
		assert_eq!(shard.get("a").unwrap().data(), &[0, 0, 0]);
	}

	#[test]
	fn test_shard_remove() {
		let mut shard = Shard::new(1000);
		shard.insert("a", b"x");

		assert!(shard.remove("a").is_some());
		assert!(!shard.contains("a"));
		assert_eq!(shard.len(), 0);
		assert_eq!(shard.size(), 0);
	}

	#[test]
	fn test_get_updates_clock_and_frequency() {
		let mut shard = Shard::new(1000);
		shard.insert("a", b"x");

		let e = shard.get("a").expect("entry should exist");
		assert!(e.clock_bit.load(Ordering::Relaxed));
		assert_eq!(e.frequency.load(Ordering::Relaxed), 1);

		let e = shard.get("a").expect("entry should exist");
		assert_eq!(e.frequency.load(Ordering::Relaxed), 2);
	}

	#[test]
	fn test_eviction_keeps_size_within_capacity() {
		let mut shard = Shard::new(100);
		for i in 0..20 {
			shard.insert(&format!("k{i:02}"), &[0; 17]);
			assert!(shard.size() <= 100);
		}
		assert_eq!(shard.len(), 5);
	}

	#[test]
	fn test_accessed_entry_survives_sweep() {
		let mut shard = Shard::new(60);
		shard.insert("hot", &[0; 17]);
		shard.insert("c1", &[0; 18]);
		shard.insert("c2", &[0; 18]);
		for _ in 0..3 {
			shard.get("hot");
		}

		shard.insert("c3", &[0; 18]);
		assert!(shard.contains("hot"));
		assert!(shard.contains("c3"));
	}

	#[test]
	fn test_oversized_entry_is_rejected() {
		let mut shard = Shard::new(100);
		shard.insert("big", &[1; 10]);

		let outcome = shard.insert("big", &[0; 200]);
		assert!(!outcome.stored);
		assert_eq!(outcome.replaced, Some(13));
		assert!(!shard.contains("big"));
		assert_eq!(shard.size(), 0);
	}

	#[test]
	fn test_shrinking_capacity_evicts() {
		let mut shard = Shard::new(1000);
		for i in 0..10 {
			shard.insert(&format!("k{i}"), &[0; 48]);
		}
		assert_eq!(shard.size(), 500);

		let (evictions, evicted_size) = shard.set_capacity(200);
		assert_eq!(evictions, 6);
		assert_eq!(evicted_size, 300);
		assert!(shard.size() <= 200);
	}

	#[test]
	fn test_hand_stays_in_bounds_after_removals() {
		let mut shard = Shard::new(1000);
		for i in 0..5 {
			shard.insert(&format!("k{i}"), b"v");
		}
		shard.hand = 4;
		shard.remove("k1");
		assert_eq!(shard.hand, 3);
		shard.remove("k0");
		shard.remove("k2");
		shard.remove("k3");
		shard.remove("k4");
		assert_eq!(shard.hand, 0);
		assert_eq!(shard.len(), 0);
	}
}
