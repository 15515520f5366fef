//! Reference-counted sharing of native object names.
//!
//! Resources can outlive the context that created them and be referenced
//! from several contexts of the same device, so raw names are held in a
//! device-wide pool behind a reference count. The pool never talks to the
//! driver itself: when the last reference goes away, [`NamePool::release`]
//! hands the raw name back to the caller, who owns the actual delete call
//! on a current context.

use std::sync::Mutex;

use crate::driver::RawName;

/// Handle into a [`NamePool`] slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NameHandle(u32);

struct Slot {
    raw: RawName,
    refs: u32,
}

#[derive(Default)]
struct PoolInner {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

/// Device-wide pool of reference-counted native names.
#[derive(Default)]
pub struct NamePool {
    inner: Mutex<PoolInner>,
}

impl NamePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `raw` with an initial reference count of one.
    pub fn create(&self, raw: RawName) -> NameHandle {
        let mut inner = self.lock();
        match inner.free.pop() {
            Some(index) => {
                inner.slots[index as usize] = Slot { raw, refs: 1 };
                NameHandle(index)
            }
            None => {
                let index = inner.slots.len() as u32;
                inner.slots.push(Slot { raw, refs: 1 });
                NameHandle(index)
            }
        }
    }

    /// Adds a reference to `handle`.
    pub fn retain(&self, handle: NameHandle) {
        let mut inner = self.lock();
        inner.slots[handle.0 as usize].refs += 1;
    }

    /// Drops a reference to `handle`. Returns the raw name when this was
    /// the last reference; the caller must then delete the native object.
    #[must_use]
    pub fn release(&self, handle: NameHandle) -> Option<RawName> {
        let mut inner = self.lock();
        let slot = &mut inner.slots[handle.0 as usize];
        slot.refs -= 1;
        if slot.refs == 0 {
            let raw = slot.raw;
            inner.free.push(handle.0);
            Some(raw)
        } else {
            None
        }
    }

    /// The raw native name behind `handle`.
    pub fn raw(&self, handle: NameHandle) -> RawName {
        self.lock().slots[handle.0 as usize].raw
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        // Slot bookkeeping cannot panic mid-update, so a poisoned lock only
        // means another thread panicked elsewhere; the data is still sound.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
