//! A growing bump-pointer allocator backing memtable values.
//!
//! One arena exists per memtable generation; values are copied in on write
//! and copied out on read, so nothing outside the generation ever aliases
//! arena memory. Allocation hands out offset/length handles rather than
//! references, which keeps the arena free to reallocate as it grows.

use parking_lot::Mutex;

use crate::{MemtableError, Result};

/// Smallest capacity the buffer grows to from empty.
const ARENA_FLOOR: usize = 1024;

/// A handle to a byte range inside an [`Arena`].
///
/// Only meaningful to the arena that issued it, and only until that arena is
/// dropped with its owning memtable generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaRef {
    offset: usize,
    len: usize,
}

impl ArenaRef {
    /// Length of the referenced range in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the referenced range is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

struct ArenaInner {
    buf: Vec<u8>,
    off: usize,
}

impl ArenaInner {
    /// Grows the buffer, doubling until `n` more bytes fit.
    fn ensure(&mut self, n: usize) -> Result<()> {
        let need = self.off + n;
        if self.buf.len() >= need {
            return Ok(());
        }
        let mut cap = self.buf.len().max(ARENA_FLOOR);
        while cap < need {
            cap *= 2;
        }
        let grow_by = cap - self.buf.len();
        self.buf
            .try_reserve_exact(grow_by)
            .map_err(|_| MemtableError::OutOfMemory(grow_by))?;
        self.buf.resize(cap, 0);
        Ok(())
    }
}

/// A serial bump allocator over one contiguous, growing byte region.
pub struct Arena {
    inner: Mutex<ArenaInner>,
}

impl Arena {
    /// Creates an empty arena; the buffer is sized lazily by the first
    /// allocation.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an arena pre-sized to `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(ArenaInner {
                buf: vec![0u8; capacity],
                off: 0,
            }),
        }
    }

    /// Reserves `n` contiguous bytes with unspecified contents.
    pub fn alloc(&self, n: usize) -> Result<ArenaRef> {
        let mut inner = self.inner.lock();
        inner.ensure(n)?;
        let offset = inner.off;
        inner.off += n;
        Ok(ArenaRef { offset, len: n })
    }

    /// Allocates `src.len()` bytes and copies `src` into them.
    pub fn copy_in(&self, src: &[u8]) -> Result<ArenaRef> {
        let mut inner = self.inner.lock();
        inner.ensure(src.len())?;
        let offset = inner.off;
        inner.off += src.len();
        inner.buf[offset..offset + src.len()].copy_from_slice(src);
        Ok(ArenaRef {
            offset,
            len: src.len(),
        })
    }

    /// Returns a freshly allocated copy of the referenced bytes.
    pub fn copy_out(&self, r: ArenaRef) -> Vec<u8> {
        let inner = self.inner.lock();
        inner.buf[r.offset..r.offset + r.len].to_vec()
    }

    /// Bytes handed out so far.
    pub fn allocated(&self) -> usize {
        self.inner.lock().off
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}
