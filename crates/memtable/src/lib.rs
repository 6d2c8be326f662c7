//! # Memtable — versioned in-memory state
//!
//! The in-memory half of the engine's write path: an ordered, sequence-
//! versioned map of recent mutations, organized as a two-generation
//! pipeline.
//!
//! ## Architecture
//!
//! ```text
//! put/delete ──> Memtable (controller)
//!                 ├── current Table    <- all writes land here
//!                 └── immutable Table  <- sealed on flip, awaiting flush
//! ```
//!
//! Each [`Table`] is one *generation*: an ordered map from user key to the
//! newest `(seq, value | tombstone)` record for that key, with values stored
//! in a per-generation bump [`Arena`]. When a put would push the current
//! generation past its byte threshold, the controller *flips*: the current
//! table is sealed into the immutable slot and a fresh one takes over with
//! no pause. An external flusher drains the sealed generation through
//! [`Memtable::pop_immutable`] and drops it once persisted.
//!
//! Reads merge both generations, with the current one shadowing the
//! immutable one — including tombstone shadowing, so a key deleted after a
//! flip stays dead even while its old value sits in the sealed table.
//! Values returned from reads and iterators are always detached copies;
//! arena memory never escapes its generation.

use std::cmp::Ordering;
use std::mem;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

mod arena;
mod table;

pub use arena::{Arena, ArenaRef};
pub use table::{Table, TableIterator};

use table::Lookup;

/// Errors from the in-memory layer. Sequence rejections are not errors;
/// the only failure is the allocator running dry.
#[derive(Debug, Error)]
pub enum MemtableError {
    /// The host allocator could not provide backing memory.
    #[error("arena allocation failed while reserving {0} bytes")]
    OutOfMemory(usize),
}

/// Result alias for the memtable crate.
pub type Result<T> = std::result::Result<T, MemtableError>;

/// The generation pair, published atomically together under one lock so a
/// reader never sees a post-flip current next to a pre-flip immutable.
struct State {
    current: Arc<Table>,
    immutable: Option<Arc<Table>>,
    /// Rough byte count (key + value lengths) applied to `current`.
    size_bytes: usize,
}

/// Two-generation memtable controller.
///
/// Presents a single-table façade over the current and at-most-one sealed
/// generation. Writers and `pop_immutable` take the write lock briefly;
/// `get` and `new_iterator` take the read lock only long enough to clone
/// the generation handles and then operate without blocking writers.
pub struct Memtable {
    state: RwLock<State>,
    /// Byte threshold that triggers a flip; 0 disables flipping.
    threshold: usize,
    /// Arena seed size for each new generation.
    arena_capacity: usize,
}

impl Memtable {
    /// Creates a controller with a flip `threshold` in bytes (0 disables
    /// flipping) and a per-generation arena seed capacity.
    pub fn new(threshold: usize, arena_capacity: usize) -> Self {
        Self {
            state: RwLock::new(State {
                current: Arc::new(Table::with_arena_capacity(arena_capacity)),
                immutable: None,
                size_bytes: 0,
            }),
            threshold,
            arena_capacity,
        }
    }

    /// Applies a versioned put, flipping first if this write would push the
    /// current generation past the threshold and the immutable slot is
    /// free. While a sealed generation is waiting to be popped, writes keep
    /// landing in the current table with no further threshold checks.
    pub fn put(&self, key: &[u8], value: &[u8], seq: u64) -> Result<()> {
        let mut state = self.state.write();
        let projected = state.size_bytes + key.len() + value.len();
        if state.immutable.is_none() && self.threshold > 0 && projected > self.threshold {
            let fresh = Arc::new(Table::with_arena_capacity(self.arena_capacity));
            let sealed = mem::replace(&mut state.current, fresh);
            tracing::debug!(
                sealed_bytes = state.size_bytes,
                sealed_entries = sealed.len(),
                "sealed memtable generation"
            );
            state.immutable = Some(sealed);
            state.size_bytes = 0;
        }
        state.current.put(key, value, seq)?;
        state.size_bytes += key.len() + value.len();
        Ok(())
    }

    /// Applies a versioned delete. Deletes always go to the current
    /// generation: the tombstone must sit *above* any value the sealed
    /// generation still holds for the key.
    pub fn delete(&self, key: &[u8], seq: u64) -> Result<()> {
        let state = self.state.write();
        state.current.delete(key, seq)
    }

    /// Merged point lookup: the current generation first, then the sealed
    /// one. A tombstone in the current generation shadows anything below.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let (current, immutable) = self.generations();
        match current.lookup(key) {
            Lookup::Hit(value) => Some(value),
            Lookup::Tombstone => None,
            Lookup::Miss => immutable.and_then(|table| table.get(key)),
        }
    }

    /// Whether a sealed generation is waiting for the flusher.
    pub fn has_immutable(&self) -> bool {
        self.state.read().immutable.is_some()
    }

    /// Hands the sealed generation to the caller and clears the slot,
    /// re-enabling flips. Returns `None` if nothing is sealed.
    pub fn pop_immutable(&self) -> Option<Arc<Table>> {
        self.state.write().immutable.take()
    }

    /// Rough byte footprint of the current generation.
    pub fn approx_size_bytes(&self) -> usize {
        self.state.read().size_bytes
    }

    /// Builds a merged snapshot iterator over both generations, positioned
    /// at the first visible entry. Later writes are invisible to it.
    pub fn new_iterator(&self) -> MergedIterator {
        let (current, immutable) = self.generations();
        MergedIterator::new(
            current.snapshot(),
            immutable.map(|table| table.snapshot()).unwrap_or_default(),
        )
    }

    /// Clones the generation handles under the read lock; everything after
    /// proceeds without blocking writers. A concurrent flip is seen either
    /// entirely or not at all.
    fn generations(&self) -> (Arc<Table>, Option<Arc<Table>>) {
        let state = self.state.read();
        (Arc::clone(&state.current), state.immutable.clone())
    }
}

/// Which generation currently supplies the merged iterator's head entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Current,
    Immutable,
    Exhausted,
}

/// Forward merge of the two generations' snapshots.
///
/// Yields visible records in ascending key order. When both generations
/// hold the same key, the current generation's record wins — and if that
/// record is a tombstone, the key is omitted entirely, which is why the
/// merge consumes tombstone-inclusive snapshots and filters at the end.
pub struct MergedIterator {
    current: Vec<(Vec<u8>, Option<Vec<u8>>)>,
    immutable: Vec<(Vec<u8>, Option<Vec<u8>>)>,
    ci: usize,
    ii: usize,
    head: Side,
}

impl MergedIterator {
    fn new(
        current: Vec<(Vec<u8>, Option<Vec<u8>>)>,
        immutable: Vec<(Vec<u8>, Option<Vec<u8>>)>,
    ) -> Self {
        let mut it = Self {
            current,
            immutable,
            ci: 0,
            ii: 0,
            head: Side::Exhausted,
        };
        it.normalize();
        it
    }

    /// Positions the iterator at the first visible key `>= target`.
    pub fn seek_ge(&mut self, target: &[u8]) {
        self.ci = self
            .current
            .partition_point(|(key, _)| key.as_slice() < target);
        self.ii = self
            .immutable
            .partition_point(|(key, _)| key.as_slice() < target);
        self.normalize();
    }

    /// Whether the iterator is positioned on a visible entry.
    pub fn valid(&self) -> bool {
        self.head != Side::Exhausted
    }

    /// The current key. Panics if the iterator is not valid.
    pub fn key(&self) -> &[u8] {
        match self.head {
            Side::Current => &self.current[self.ci].0,
            Side::Immutable => &self.immutable[self.ii].0,
            Side::Exhausted => panic!("key() called on an exhausted iterator"),
        }
    }

    /// The current value. Panics if the iterator is not valid.
    pub fn value(&self) -> &[u8] {
        let entry = match self.head {
            Side::Current => &self.current[self.ci],
            Side::Immutable => &self.immutable[self.ii],
            Side::Exhausted => panic!("value() called on an exhausted iterator"),
        };
        match &entry.1 {
            Some(value) => value,
            None => unreachable!("merged iterator never stops on a tombstone"),
        }
    }

    /// Advances past the current entry.
    pub fn next(&mut self) {
        match self.head {
            Side::Current => self.ci += 1,
            Side::Immutable => self.ii += 1,
            Side::Exhausted => return,
        }
        self.normalize();
    }

    /// Advances both cursors until the head is a visible record: smallest
    /// key first, current generation winning ties (its shadowed immutable
    /// twin is skipped), tombstones stepped over after they shadow.
    fn normalize(&mut self) {
        loop {
            match (self.current.get(self.ci), self.immutable.get(self.ii)) {
                (None, None) => {
                    self.head = Side::Exhausted;
                    return;
                }
                (Some((_, cur_val)), None) => {
                    if cur_val.is_some() {
                        self.head = Side::Current;
                        return;
                    }
                    self.ci += 1;
                }
                (None, Some((_, imm_val))) => {
                    if imm_val.is_some() {
                        self.head = Side::Immutable;
                        return;
                    }
                    self.ii += 1;
                }
                (Some((cur_key, cur_val)), Some((imm_key, imm_val))) => {
                    match cur_key.cmp(imm_key) {
                        Ordering::Less => {
                            if cur_val.is_some() {
                                self.head = Side::Current;
                                return;
                            }
                            self.ci += 1;
                        }
                        Ordering::Greater => {
                            if imm_val.is_some() {
                                self.head = Side::Immutable;
                                return;
                            }
                            self.ii += 1;
                        }
                        Ordering::Equal => {
                            // Same key in both generations: current wins,
                            // the immutable record is shadowed either way.
                            self.ii += 1;
                            if cur_val.is_some() {
                                self.head = Side::Current;
                                return;
                            }
                            self.ci += 1;
                        }
                    }
                }
            }
        }
    }
}
