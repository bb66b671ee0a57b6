//! String interning. Every string object is created through the functions here so that at
//! most one object exists for each distinct content.

use std::hash::Hasher;

use rustc_hash::FxHasher;

use crate::{GcRoots, Heap, Key, ObjRef, ObjString, Value};

/// Hash the content of a string. The result is cached in the string object and used
/// by every table lookup.
pub fn hash_str(s: &str) -> u32 {
    let mut hasher = FxHasher::default();
    hasher.write(s.as_bytes());
    hasher.finish() as u32
}

impl Heap {
    /// Intern a string if it has not been allocated by the heap, otherwise, returning the
    /// existing reference for that string.
    pub fn intern(&mut self, s: &str, roots: &dyn GcRoots) -> ObjRef {
        let hash = hash_str(s);
        match self.find_interned(s, hash) {
            Some(o) => o,
            None => self.insert_string(s.into(), hash, roots),
        }
    }

    /// Same as [`Heap::intern`] but takes ownership of the characters, so no copy is
    /// made when the string is new.
    pub fn take_string(&mut self, s: String, roots: &dyn GcRoots) -> ObjRef {
        let hash = hash_str(&s);
        match self.find_interned(&s, hash) {
            Some(o) => o,
            None => self.insert_string(s.into_boxed_str(), hash, roots),
        }
    }

    fn find_interned(&self, s: &str, hash: u32) -> Option<ObjRef> {
        self.strings.find_string(hash, |o| self.str(o) == s)
    }

    fn insert_string(&mut self, chars: Box<str>, hash: u32, roots: &dyn GcRoots) -> ObjRef {
        let string = self.alloc(ObjString { chars, hash }, roots);
        self.strings.set(Key { string, hash }, Value::Nil);
        string
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_content_is_the_same_object() {
        let mut heap = Heap::default();
        let a = heap.intern("hello", &());
        let b = heap.take_string(String::from("hel") + "lo", &());
        let c = heap.intern("world", &());
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(heap.str(b), "hello");
    }

    #[test]
    fn init_string_is_interned() {
        let mut heap = Heap::default();
        let init = heap.init_string();
        assert_eq!(heap.intern("init", &()), init);
    }
}
