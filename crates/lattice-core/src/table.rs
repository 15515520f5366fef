//! Id-keyed object tables.
//!
//! Caches own their entries by value; cross-references between objects are
//! plain ids into the owning table, cleared explicitly by the invalidation
//! routines. No object holds a pointer to another.

use std::collections::HashMap;

#[derive(Debug)]
pub(crate) struct Table<T> {
    entries: HashMap<u32, T>,
    next: u32,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Table {
            entries: HashMap::new(),
            next: 0,
        }
    }
}

impl<T> Table<T> {
    pub fn insert(&mut self, value: T) -> u32 {
        let id = self.next;
        self.next += 1;
        self.entries.insert(id, value);
        id
    }

    pub fn get(&self, id: u32) -> Option<&T> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.entries.get_mut(&id)
    }

    pub fn remove(&mut self, id: u32) -> Option<T> {
        self.entries.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
