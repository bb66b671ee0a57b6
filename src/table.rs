//! Hash table keyed by interned strings.
//!
//! The table uses open addressing with linear probing. Because strings are interned, two
//! keys are compared by their handles only, the content is looked at only when searching
//! for a string that is not interned yet (see [`Table::find_string`]).

use std::mem;

use crate::{ObjRef, Value};

const TABLE_MAX_LOAD: f64 = 0.75;

/// A table key: the handle of an interned string along with the string's hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Key {
    /// The interned string
    pub string: ObjRef,
    /// The cached hash of the string
    pub hash: u32,
}

/// An empty bucket has no key and a `nil` value. A tombstone has no key and a
/// `true` value, probing must go past it.
#[derive(Debug, Clone, Copy)]
struct Entry {
    key: Option<Key>,
    value: Value,
}

impl Entry {
    const EMPTY: Self = Self {
        key: None,
        value: Value::Nil,
    };

    const TOMBSTONE: Self = Self {
        key: None,
        value: Value::Bool(true),
    };
}

/// Open-addressing hash map from interned strings to values. The capacity is always
/// zero or a power of two.
#[derive(Debug, Default, Clone)]
pub struct Table {
    /// Number of occupied buckets, tombstones included.
    count: usize,
    entries: Vec<Entry>,
}

impl Table {
    /// Get the value stored under `key`.
    pub fn get(&self, key: Key) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let entry = &self.entries[find_entry(&self.entries, key)];
        entry.key.map(|_| entry.value)
    }

    /// Store `value` under `key`. Returns `true` if the key was not in the table.
    pub fn set(&mut self, key: Key, value: Value) -> bool {
        if (self.count + 1) as f64 > self.entries.len() as f64 * TABLE_MAX_LOAD {
            let capacity = if self.entries.len() < 8 {
                8
            } else {
                self.entries.len() * 2
            };
            self.adjust_capacity(capacity);
        }

        let idx = find_entry(&self.entries, key);
        let entry = &mut self.entries[idx];
        let is_new_key = entry.key.is_none();
        // Reusing a tombstone does not change the count, it was already counted.
        if is_new_key && entry.value.is_nil() {
            self.count += 1;
        }
        entry.key = Some(key);
        entry.value = value;
        is_new_key
    }

    /// Remove `key` from the table. Returns `false` if the key was not in the table.
    pub fn delete(&mut self, key: Key) -> bool {
        if self.count == 0 {
            return false;
        }
        let idx = find_entry(&self.entries, key);
        if self.entries[idx].key.is_none() {
            return false;
        }
        self.entries[idx] = Entry::TOMBSTONE;
        true
    }

    /// Copy every entry of this table into `to`.
    pub fn add_all(&self, to: &mut Table) {
        for (key, value) in self.iter() {
            to.set(key, value);
        }
    }

    /// Find a string with the given hash whose content satisfies `matches`. This is the
    /// only lookup that does not already have an interned handle.
    pub fn find_string(&self, hash: u32, mut matches: impl FnMut(ObjRef) -> bool) -> Option<ObjRef> {
        if self.count == 0 {
            return None;
        }
        let capacity = self.entries.len();
        let mut index = hash as usize & (capacity - 1);
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None if entry.value.is_nil() => return None,
                None => {}
                Some(key) if key.hash == hash && matches(key.string) => return Some(key.string),
                Some(_) => {}
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    /// Delete every entry whose key does not satisfy `keep`.
    pub fn retain_keys(&mut self, mut keep: impl FnMut(Key) -> bool) {
        for entry in self.entries.iter_mut() {
            if let Some(key) = entry.key {
                if !keep(key) {
                    *entry = Entry::TOMBSTONE;
                }
            }
        }
    }

    /// Iterate over the live entries of the table.
    pub fn iter(&self) -> impl Iterator<Item = (Key, Value)> + '_ {
        self.entries
            .iter()
            .filter_map(|entry| entry.key.map(|key| (key, entry.value)))
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Return true if the table has no live entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of buckets.
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Bytes used by the buckets.
    pub fn size(&self) -> usize {
        self.entries.capacity() * mem::size_of::<Entry>()
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        let mut entries = vec![Entry::EMPTY; capacity];
        // Tombstones are dropped while rehashing, so the count is rebuilt.
        self.count = 0;
        for entry in self.entries.iter() {
            if let Some(key) = entry.key {
                let idx = find_entry(&entries, key);
                entries[idx] = *entry;
                self.count += 1;
            }
        }
        self.entries = entries;
    }
}

/// Find the bucket holding `key`, or the bucket where `key` should be inserted. The
/// first tombstone seen is reused for insertion.
fn find_entry(entries: &[Entry], key: Key) -> usize {
    let capacity = entries.len();
    let mut index = key.hash as usize & (capacity - 1);
    let mut tombstone = None;
    loop {
        let entry = &entries[index];
        match entry.key {
            None if entry.value.is_nil() => return tombstone.unwrap_or(index),
            None => {
                tombstone.get_or_insert(index);
            }
            Some(k) if k.string == key.string => return index,
            Some(_) => {}
        }
        index = (index + 1) & (capacity - 1);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use proptest::prelude::*;

    use super::*;

    /// Keys with a tiny hash range so that probe chains collide a lot.
    fn key(id: u32) -> Key {
        Key {
            string: ObjRef::new(id as usize),
            hash: id % 3,
        }
    }

    #[test]
    fn get_after_set() {
        let mut table = Table::default();
        assert!(table.get(key(1)).is_none());
        assert!(table.set(key(1), Value::Number(1.0)));
        assert!(!table.set(key(1), Value::Number(2.0)));
        assert_eq!(table.get(key(1)), Some(Value::Number(2.0)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn delete_missing_key() {
        let mut table = Table::default();
        assert!(!table.delete(key(1)));
        table.set(key(1), Value::Nil);
        assert!(!table.delete(key(4)));
        assert_eq!(table.get(key(1)), Some(Value::Nil));
    }

    #[test]
    fn lookups_probe_past_tombstones() {
        let mut table = Table::default();
        // All three keys share the same hash and therefore the same probe chain.
        table.set(key(0), Value::Number(0.0));
        table.set(key(3), Value::Number(3.0));
        table.set(key(6), Value::Number(6.0));
        assert!(table.delete(key(3)));
        assert_eq!(table.get(key(6)), Some(Value::Number(6.0)));
        assert_eq!(table.find_string(0, |s| s == ObjRef::new(6)), Some(ObjRef::new(6)));
        assert!(table.get(key(3)).is_none());
    }

    #[test]
    fn tombstones_are_reused() {
        let mut table = Table::default();
        table.set(key(0), Value::Nil);
        table.set(key(3), Value::Nil);
        let count = table.count;
        table.delete(key(0));
        assert!(table.set(key(6), Value::Nil));
        assert_eq!(table.count, count);
    }

    #[test]
    fn add_all_copies_entries() {
        let mut from = Table::default();
        let mut to = Table::default();
        from.set(key(1), Value::Bool(true));
        from.set(key(2), Value::Bool(false));
        to.set(key(2), Value::Nil);
        from.add_all(&mut to);
        assert_eq!(to.get(key(1)), Some(Value::Bool(true)));
        assert_eq!(to.get(key(2)), Some(Value::Bool(false)));
    }

    #[test]
    fn retain_keys_removes_entries() {
        let mut table = Table::default();
        for id in 0..10 {
            table.set(key(id), Value::Number(id as f64));
        }
        table.retain_keys(|k| k.string.index() % 2 == 0);
        assert_eq!(table.len(), 5);
        assert!(table.get(key(3)).is_none());
        assert_eq!(table.get(key(4)), Some(Value::Number(4.0)));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Set(u32, i32),
        Delete(u32),
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u32..32, any::<i32>()).prop_map(|(k, v)| Op::Set(k, v)),
            (0u32..32).prop_map(Op::Delete),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// The table behaves like a `HashMap` for every sequence of operations.
        #[test]
        fn matches_hash_map_model(ops in prop::collection::vec(arb_op(), 0..200)) {
            let mut table = Table::default();
            let mut model = HashMap::new();
            for op in ops {
                match op {
                    Op::Set(k, v) => {
                        let is_new = table.set(key(k), Value::Number(v as f64));
                        prop_assert_eq!(is_new, model.insert(k, v).is_none());
                        prop_assert!(table.count as f64 <= table.capacity() as f64 * TABLE_MAX_LOAD);
                    }
                    Op::Delete(k) => {
                        prop_assert_eq!(table.delete(key(k)), model.remove(&k).is_some());
                    }
                }
                for k in 0..32 {
                    let expected = model.get(&k).map(|v| Value::Number(*v as f64));
                    prop_assert_eq!(table.get(key(k)), expected);
                }
            }
            prop_assert_eq!(table.len(), model.len());
        }
    }
}
