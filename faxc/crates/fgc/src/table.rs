//! Open-addressed hash table with tombstones (spec.md §3, §4.3).
//!
//! One implementation backs three uses: the process-wide string intern
//! table, each VM's globals table, and every instance's field table /
//! class's method table. Every key is an interned string handle, and the
//! caller always has its precomputed hash on hand (from `ObjString::hash`),
//! so entries cache that hash alongside the key rather than re-deriving it
//! through the heap on every probe or grow.

use crate::heap::Heap;
use crate::object::ObjHandle;
use crate::value::Value;

const MAX_LOAD: f64 = 0.75;
const MIN_CAPACITY: usize = 8;

#[derive(Clone, Copy, Debug)]
struct Entry {
    key: Option<ObjHandle>,
    hash: u32,
    value: Value,
}

impl Entry {
    fn empty() -> Self {
        Entry {
            key: None,
            hash: 0,
            value: Value::Nil,
        }
    }

    fn is_tombstone(&self) -> bool {
        self.key.is_none() && matches!(self.value, Value::Bool(true))
    }

    fn is_empty_slot(&self) -> bool {
        self.key.is_none() && !self.is_tombstone()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Table {
    entries: Vec<Entry>,
    /// Count of live entries *and* tombstones — deletion never decrements
    /// this, which is what keeps a table full of tombstones from looking
    /// like it has room and growing unboundedly on repeated
    /// insert/delete cycles (spec.md §4.3).
    count: usize,
}

impl Table {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Finds the slot a key belongs in: the first matching key, else the
    /// first tombstone seen along the probe sequence, else the terminating
    /// empty slot.
    fn find_slot(entries: &[Entry], key: ObjHandle, hash: u32) -> usize {
        let capacity = entries.len();
        let mut index = hash as usize % capacity;
        let mut first_tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index];
            if entry.is_empty_slot() {
                return first_tombstone.unwrap_or(index);
            } else if entry.is_tombstone() {
                if first_tombstone.is_none() {
                    first_tombstone = Some(index);
                }
            } else if entry.key == Some(key) {
                return index;
            }
            index = (index + 1) % capacity;
        }
    }

    fn ensure_capacity_for_insert(&mut self) {
        if self.entries.is_empty() || (self.count + 1) as f64 > self.capacity() as f64 * MAX_LOAD {
            let new_capacity = (self.capacity() * 2).max(MIN_CAPACITY);
            let mut new_entries = vec![Entry::empty(); new_capacity];
            let mut new_count = 0;
            for entry in self.entries.drain(..) {
                if let Some(key) = entry.key {
                    let index = Self::find_slot(&new_entries, key, entry.hash);
                    new_entries[index] = entry;
                    new_count += 1;
                }
            }
            self.entries = new_entries;
            self.count = new_count;
        }
    }

    /// `get` returns the value for `key`, or `None` for an absent key or a
    /// tombstone.
    pub fn get(&self, key: ObjHandle, hash: u32) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let index = Self::find_slot(&self.entries, key, hash);
        let entry = &self.entries[index];
        if entry.key == Some(key) {
            Some(entry.value)
        } else {
            None
        }
    }

    /// `set` inserts or overwrites `key`, growing the table first if the
    /// load factor would exceed 0.75. Returns `true` if this created a new
    /// entry rather than overwriting one — true for both an empty slot and
    /// a reused tombstone, matching `tableSet`'s `isNewKey` in
    /// `examples/original_source/clox/table.c`. `count` itself is only
    /// incremented for a genuinely empty slot, since a tombstone was
    /// already counted when it was first inserted.
    pub fn set(&mut self, key: ObjHandle, hash: u32, value: Value) -> bool {
        self.ensure_capacity_for_insert();
        let index = Self::find_slot(&self.entries, key, hash);
        let entry = &mut self.entries[index];
        let is_new = entry.key.is_none();
        if is_new && matches!(entry.value, Value::Nil) {
            self.count += 1;
        }
        entry.key = Some(key);
        entry.hash = hash;
        entry.value = value;
        is_new
    }

    /// Converts `key`'s slot to a tombstone. Returns whether the key was
    /// present. Does not decrement `count` (see the field doc comment).
    pub fn delete(&mut self, key: ObjHandle, hash: u32) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let index = Self::find_slot(&self.entries, key, hash);
        let entry = &mut self.entries[index];
        if entry.key != Some(key) {
            return false;
        }
        entry.key = None;
        entry.value = Value::Bool(true);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjHandle, Value)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| e.key.map(|k| (k, e.value)))
    }

    /// Required for interning: scans the probe sequence for an entry whose
    /// key's bytes match `bytes` exactly (not identity — this is how a
    /// brand-new string discovers whether it already has an interned
    /// twin).
    pub fn find_string(&self, heap: &Heap, bytes: &[u8], hash: u32) -> Option<ObjHandle> {
        if self.entries.is_empty() {
            return None;
        }
        let capacity = self.capacity();
        let mut index = hash as usize % capacity;
        loop {
            let entry = &self.entries[index];
            if entry.is_empty_slot() {
                return None;
            }
            if let Some(key) = entry.key {
                if entry.hash == hash {
                    if let Some(s) = heap.as_string(key) {
                        if s.bytes.as_bytes() == bytes {
                            return Some(key);
                        }
                    }
                }
            }
            index = (index + 1) % capacity;
        }
    }

    /// GC cooperator: drop every entry whose key is about to be swept,
    /// keeping the intern table from handing out dangling handles.
    pub fn remove_white(&mut self, heap: &Heap) {
        for entry in &mut self.entries {
            if let Some(key) = entry.key {
                if !heap.is_marked(key) {
                    entry.key = None;
                    entry.value = Value::Bool(true);
                }
            }
        }
    }

    /// GC cooperator: mark every live key and value.
    pub fn mark(&self, heap: &mut Heap) {
        for entry in &self.entries {
            if let Some(key) = entry.key {
                heap.mark_object(key);
                heap.mark_value(entry.value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(n: u32) -> ObjHandle {
        ObjHandle(n)
    }

    #[test]
    fn set_then_get_roundtrips() {
        let mut t = Table::new();
        assert!(t.set(h(1), 10, Value::Number(1.0)));
        assert!(matches!(t.get(h(1), 10), Some(Value::Number(n)) if n == 1.0));
    }

    #[test]
    fn set_on_existing_key_overwrites_and_reports_not_new() {
        let mut t = Table::new();
        assert!(t.set(h(1), 10, Value::Number(1.0)));
        assert!(!t.set(h(1), 10, Value::Number(2.0)));
        assert!(matches!(t.get(h(1), 10), Some(Value::Number(n)) if n == 2.0));
    }

    #[test]
    fn delete_then_get_is_absent_but_slot_reusable() {
        let mut t = Table::new();
        t.set(h(1), 10, Value::Number(1.0));
        assert!(t.delete(h(1), 10));
        assert!(t.get(h(1), 10).is_none());
        // Re-inserting the same key after deletion must still work
        // (proves the tombstone is reused, not treated as occupied).
        assert!(t.set(h(1), 10, Value::Number(3.0)));
        assert!(matches!(t.get(h(1), 10), Some(Value::Number(n)) if n == 3.0));
    }

    #[test]
    fn delete_of_absent_key_is_a_no_op() {
        let mut t = Table::new();
        assert!(!t.delete(h(99), 99));
    }

    #[test]
    fn grows_past_load_factor_without_losing_entries() {
        let mut t = Table::new();
        for i in 0..200u32 {
            t.set(h(i), i, Value::Number(i as f64));
        }
        for i in 0..200u32 {
            assert!(matches!(t.get(h(i), i), Some(Value::Number(n)) if n == i as f64));
        }
    }

    #[test]
    fn repeated_insert_delete_does_not_lose_capacity_accounting() {
        let mut t = Table::new();
        for i in 0..50u32 {
            t.set(h(i), i, Value::Bool(true));
            t.delete(h(i), i);
        }
        // Table must still function correctly after many tombstones pile up.
        assert!(t.set(h(1000), 1000, Value::Number(42.0)));
        assert!(matches!(t.get(h(1000), 1000), Some(Value::Number(n)) if n == 42.0));
    }
}
