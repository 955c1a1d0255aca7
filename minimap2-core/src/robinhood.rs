//! Robin Hood open-addressed hash table with 64-bit keys and values
//! (§4.3). Shared primitive: the index's per-bucket second-level table and
//! the extension scheduler's dedup hash are both built on this.

/// Sentinel marking a slot that has never held an entry.
pub const EMPTY: u64 = u64::MAX;
/// Sentinel marking a slot whose entry was relocated during a grow pass.
pub const TOMBSTONE: u64 = u64::MAX - 1;
/// Returned by [`RobinhoodTable::get`] when the key is absent.
pub const NOT_FOUND: u64 = u64::MAX;

const MAX_LOAD_FACTOR: f64 = 0.4;
const INITIAL_SIZE: usize = 256;

#[derive(Debug, Clone, Copy)]
struct Slot {
    key: u64,
    value: u64,
}

/// Robin Hood hash table keyed and valued by raw `u64`s.
///
/// Grows by doubling whenever `count >= 0.4 * size`. Lookup terminates at
/// the first never-used ([`EMPTY`]) slot; [`TOMBSTONE`] slots (left behind
/// by a grow pass) are skipped over rather than treated as a stop
/// condition, matching §4.3: "Lookup terminates when a strictly-empty
/// (never-used) slot is hit; moved entries continue probing."
#[derive(Debug, Clone)]
pub struct RobinhoodTable {
    slots: Vec<Slot>,
    mask: usize,
    count: usize,
}

impl Default for RobinhoodTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RobinhoodTable {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let size = capacity.next_power_of_two().max(INITIAL_SIZE);
        Self {
            slots: vec![Slot { key: EMPTY, value: 0 }; size],
            mask: size - 1,
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn home(&self, key: u64) -> usize {
        (key as usize) & self.mask
    }

    fn distance(&self, home: usize, pos: usize) -> usize {
        pos.wrapping_sub(home) & self.mask
    }

    /// Inserts or overwrites `key -> value`.
    pub fn put(&mut self, key: u64, value: u64) {
        if (self.count + 1) as f64 >= MAX_LOAD_FACTOR * self.slots.len() as f64 {
            self.grow();
        }
        self.insert_inner(key, value);
    }

    fn insert_inner(&mut self, key: u64, mut value: u64) {
        let mut probe_key = key;
        let mut pos = self.home(key);
        let mut dist = 0usize;
        loop {
            let slot = self.slots[pos];
            if slot.key == EMPTY || slot.key == TOMBSTONE {
                self.slots[pos] = Slot { key: probe_key, value };
                self.count += 1;
                return;
            }
            if slot.key == probe_key {
                self.slots[pos].value = value;
                return;
            }
            let slot_home = self.home(slot.key);
            let slot_dist = self.distance(slot_home, pos);
            if slot_dist < dist {
                // Displace: the incoming entry has probed further than the
                // resident, so it takes this slot and the resident keeps
                // looking (§4.3: "displace slots whose distance-from-home
                // is less than the probe's current displacement").
                let displaced = self.slots[pos];
                self.slots[pos] = Slot { key: probe_key, value };
                probe_key = displaced.key;
                value = displaced.value;
                dist = slot_dist;
            }
            pos = (pos + 1) & self.mask;
            dist += 1;
        }
    }

    /// Looks up `key`, returning its value or [`NOT_FOUND`].
    pub fn get(&self, key: u64) -> u64 {
        let mut pos = self.home(key);
        loop {
            let slot = self.slots[pos];
            if slot.key == EMPTY {
                return NOT_FOUND;
            }
            if slot.key == key {
                return slot.value;
            }
            pos = (pos + 1) & self.mask;
        }
    }

    /// Returns a mutable pointer-like index to the value cell for `key`,
    /// inserting a new slot with `extend()`'s result if absent. Mirrors
    /// the source's `put_ptr(k, extend) -> *v` contract without exposing
    /// a raw pointer.
    pub fn put_ptr(&mut self, key: u64, extend: impl FnOnce() -> u64) -> &mut u64 {
        if self.get(key) == NOT_FOUND {
            let v = extend();
            self.put(key, v);
        }
        let mut pos = self.home(key);
        loop {
            if self.slots[pos].key == key {
                return &mut self.slots[pos].value;
            }
            pos = (pos + 1) & self.mask;
        }
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.key = EMPTY;
        }
        self.count = 0;
    }

    fn grow(&mut self) {
        let old = std::mem::replace(&mut self.slots, Vec::new());
        let new_size = (old.len() * 2).max(INITIAL_SIZE);
        self.slots = vec![Slot { key: EMPTY, value: 0 }; new_size];
        self.mask = new_size - 1;
        self.count = 0;
        for slot in old {
            if slot.key != EMPTY && slot.key != TOMBSTONE {
                self.insert_inner(slot.key, slot.value);
            }
        }
    }

    /// Iterates all live `(key, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.slots
            .iter()
            .filter(|s| s.key != EMPTY && s.key != TOMBSTONE)
            .map(|s| (s.key, s.value))
    }

    /// Serializes to a flat `(key, value)` pair vector; paired with
    /// [`RobinhoodTable::deserialize`] for the index's §4.2 dump format.
    pub fn serialize(&self) -> Vec<(u64, u64)> {
        self.iter().collect()
    }

    /// Rebuilds a table from the pairs produced by [`Self::serialize`].
    pub fn deserialize(pairs: &[(u64, u64)]) -> Self {
        let mut table = Self::with_capacity(pairs.len().max(1) * 3);
        for &(k, v) in pairs {
            table.put(k, v);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_round_trip() {
        let mut t = RobinhoodTable::new();
        for i in 0..1000u64 {
            t.put(i, i * 7 + 1);
        }
        for i in 0..1000u64 {
            assert_eq!(t.get(i), i * 7 + 1);
        }
        assert_eq!(t.get(999_999), NOT_FOUND);
    }

    #[test]
    fn grows_past_load_factor() {
        let mut t = RobinhoodTable::with_capacity(16);
        for i in 0..10_000u64 {
            t.put(i, i);
        }
        assert_eq!(t.len(), 10_000);
        for i in 0..10_000u64 {
            assert_eq!(t.get(i), i);
        }
    }

    #[test]
    fn put_ptr_allocates_once() {
        let mut t = RobinhoodTable::new();
        *t.put_ptr(42, || 0) += 1;
        *t.put_ptr(42, || 0) += 1;
        assert_eq!(t.get(42), 2);
    }

    #[test]
    fn serialize_round_trip_preserves_entries() {
        let mut t = RobinhoodTable::new();
        for i in 0..500u64 {
            t.put(i * 3, i);
        }
        let pairs = t.serialize();
        let t2 = RobinhoodTable::deserialize(&pairs);
        for i in 0..500u64 {
            assert_eq!(t2.get(i * 3), i);
        }
    }
}
