// File: src/table.rs
//
// Open-addressed, linear-probing hash table used both as the VM's globals
// namespaine and as the string-intern pool (`spec.md` §4.6).

use std::cell::RefCell;
use std::rc::Rc;

use crate::value::{ObjString, Value};

const INITIAL_CAPACITY: usize = 8;
const MAX_LOAD: f64 = 0.75;

/// FNV-1a, 32-bit, exactly as `spec.md` §4.6 specifies: seed `0x811C9DC5`,
/// multiplier `0x01000193`, byte-wise xor-then-multiply.
pub fn fnv1a_hash(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811C_9DC5;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

#[derive(Clone)]
enum Slot {
    Empty,
    Tombstone,
    Occupied(Rc<ObjString>, Value),
}

/// Keyed by interned `ObjString` identity; doubles as the globals table and
/// the string-intern pool (`find_string` is what enforces interning).
pub struct Table {
    entries: Vec<Slot>,
    count: usize,
}

impl Table {
    pub fn new() -> Self {
        Table { entries: vec![Slot::Empty; 0], count: 0 }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn get(&self, key: &Rc<ObjString>) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let idx = self.find_entry_index(&self.entries, key);
        match &self.entries[idx] {
            Slot::Occupied(_, v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Returns `true` if this inserted a brand-new key.
    pub fn set(&mut self, key: Rc<ObjString>, value: Value) -> bool {
        if (self.count + 1) as f64 > self.entries.len() as f64 * MAX_LOAD {
            let new_cap = if self.entries.is_empty() { INITIAL_CAPACITY } else { self.entries.len() * 2 };
            self.adjust_capacity(new_cap);
        }

        let idx = self.find_entry_index(&self.entries, &key);
        let is_new_key = !matches!(self.entries[idx], Slot::Occupied(..));
        if is_new_key && matches!(self.entries[idx], Slot::Empty) {
            self.count += 1;
        }
        self.entries[idx] = Slot::Occupied(key, value);
        is_new_key
    }

    /// Writes a tombstone; `count` is deliberately not decremented, since
    /// tombstones still occupy load (`spec.md` §4.6).
    pub fn delete(&mut self, key: &Rc<ObjString>) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let idx = self.find_entry_index(&self.entries, key);
        if !matches!(self.entries[idx], Slot::Occupied(..)) {
            return false;
        }
        self.entries[idx] = Slot::Tombstone;
        true
    }

    /// Like `find_entry` but compares candidate content/hash rather than
    /// object identity — this is what makes interning possible: a new
    /// string literal that matches an already-interned string resolves to
    /// the existing `Rc`.
    pub fn find_string(&self, chars: &str, hash: u32) -> Option<Rc<ObjString>> {
        if self.entries.is_empty() {
            return None;
        }
        let cap = self.entries.len();
        let mut index = (hash as usize) % cap;
        loop {
            match &self.entries[index] {
                Slot::Empty => return None,
                Slot::Tombstone => {}
                Slot::Occupied(key, _) => {
                    if key.hash == hash && key.chars == chars {
                        return Some(key.clone());
                    }
                }
            }
            index = (index + 1) % cap;
        }
    }

    pub fn add_all(&mut self, src: &Table) {
        for slot in &src.entries {
            if let Slot::Occupied(k, v) = slot {
                self.set(k.clone(), v.clone());
            }
        }
    }

    fn find_entry_index(&self, entries: &[Slot], key: &Rc<ObjString>) -> usize {
        let cap = entries.len();
        let mut index = (key.hash as usize) % cap;
        let mut tombstone: Option<usize> = None;
        loop {
            match &entries[index] {
                Slot::Empty => return tombstone.unwrap_or(index),
                Slot::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Slot::Occupied(k, _) => {
                    if Rc::ptr_eq(k, key) || (k.hash == key.hash && k.chars == key.chars) {
                        return index;
                    }
                }
            }
            index = (index + 1) % cap;
        }
    }

    fn adjust_capacity(&mut self, new_cap: usize) {
        let mut new_entries = vec![Slot::Empty; new_cap];
        let mut new_count = 0;
        for slot in self.entries.drain(..) {
            if let Slot::Occupied(key, value) = slot {
                let idx = {
                    let cap = new_entries.len();
                    let mut index = (key.hash as usize) % cap;
                    loop {
                        match &new_entries[index] {
                            Slot::Empty => break index,
                            _ => index = (index + 1) % cap,
                        }
                    }
                };
                new_entries[idx] = Slot::Occupied(key, value);
                new_count += 1;
            }
        }
        self.entries = new_entries;
        self.count = new_count;
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

/// Interns `content` against a shared pool: compiler and VM must resolve the
/// same literal to the same `Rc<ObjString>`, so both go through this
/// function against the one intern table the VM owns (`spec.md` §5).
pub fn intern(strings: &RefCell<Table>, content: &str) -> Rc<ObjString> {
    let hash = fnv1a_hash(content.as_bytes());
    let mut table = strings.borrow_mut();
    if let Some(existing) = table.find_string(content, hash) {
        return existing;
    }
    let s = Rc::new(ObjString::new(content.to_string()));
    table.set(s.clone(), Value::Nil);
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Rc<ObjString> {
        Rc::new(ObjString::new(s.to_string()))
    }

    #[test]
    fn fnv1a_is_deterministic_and_distinguishes_bytes() {
        assert_eq!(fnv1a_hash(b"a"), fnv1a_hash(b"a"));
        assert_ne!(fnv1a_hash(b"a"), fnv1a_hash(b"b"));
    }

    #[test]
    fn set_then_get_roundtrips() {
        let mut t = Table::new();
        let k = key("x");
        assert!(t.set(k.clone(), Value::Number(1.0)));
        match t.get(&k) {
            Some(Value::Number(n)) => assert_eq!(n, 1.0),
            _ => panic!("expected value"),
        }
    }

    #[test]
    fn delete_then_get_fails() {
        let mut t = Table::new();
        let k = key("y");
        t.set(k.clone(), Value::Bool(true));
        assert!(t.delete(&k));
        assert!(t.get(&k).is_none());
    }

    #[test]
    fn set_returns_false_for_existing_key() {
        let mut t = Table::new();
        let k = key("z");
        assert!(t.set(k.clone(), Value::Nil));
        assert!(!t.set(k, Value::Number(2.0)));
    }

    #[test]
    fn grows_and_keeps_all_keys_findable() {
        let mut t = Table::new();
        let keys: Vec<_> = (0..64).map(|i| key(&format!("k{i}"))).collect();
        for (i, k) in keys.iter().enumerate() {
            t.set(k.clone(), Value::Number(i as f64));
        }
        for (i, k) in keys.iter().enumerate() {
            match t.get(k) {
                Some(Value::Number(n)) => assert_eq!(n, i as f64),
                other => panic!("missing key {i}: {:?}", other.is_some()),
            }
        }
    }

    #[test]
    fn find_string_matches_by_content() {
        let mut t = Table::new();
        let k = key("hello");
        t.set(k.clone(), Value::Nil);
        let found = t.find_string("hello", fnv1a_hash(b"hello"));
        assert!(found.is_some());
        assert!(Rc::ptr_eq(&found.unwrap(), &k));
    }
}
