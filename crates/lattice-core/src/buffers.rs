//! Buffer objects.

use lattice_gl::NameHandle;

/// Handle to a buffer owned by a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub(crate) u32);

/// A live buffer: a refcounted native name plus its allocated size.
#[derive(Debug)]
pub struct Buffer {
    pub(crate) handle: NameHandle,
    pub(crate) size: usize,
}

impl Buffer {
    pub fn size(&self) -> usize {
        self.size
    }
}
