//! A single generation of writes: an ordered map from user key to the
//! newest version record seen for that key.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::arena::{Arena, ArenaRef};
use crate::Result;

/// The version record held per key: the highest accepted sequence number
/// and either an arena-backed value or a tombstone (`value == None`).
#[derive(Debug, Clone, Copy)]
struct VersionEntry {
    seq: u64,
    value: Option<ArenaRef>,
}

/// Outcome of a point lookup that still distinguishes a tombstone from a
/// key that was never written. The controller needs the distinction so a
/// tombstone in the current generation can shadow the immutable one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Lookup {
    Hit(Vec<u8>),
    Tombstone,
    Miss,
}

/// An ordered in-memory table with sequence-aware writes, point reads, and
/// snapshot iteration.
///
/// Writes for a key are accepted only if their sequence number strictly
/// exceeds the stored one; a rejected write is a silent no-op. Values are
/// copied into the table's arena on insert and copied out again on read, so
/// callers never observe arena memory.
pub struct Table {
    map: RwLock<BTreeMap<Vec<u8>, VersionEntry>>,
    arena: Arena,
}

impl Table {
    /// Creates an empty table whose arena is pre-sized to `arena_capacity`.
    pub fn with_arena_capacity(arena_capacity: usize) -> Self {
        Self {
            map: RwLock::new(BTreeMap::new()),
            arena: Arena::with_capacity(arena_capacity),
        }
    }

    /// Creates an empty table with a lazily sized arena.
    pub fn new() -> Self {
        Self::with_arena_capacity(0)
    }

    /// Inserts or replaces the version record for `key`.
    ///
    /// A call whose `seq` does not strictly exceed the stored sequence is
    /// ignored: sequences are a total order assigned by the writer, and an
    /// equal or older one means the stored record is already the newest.
    pub fn put(&self, key: &[u8], value: &[u8], seq: u64) -> Result<()> {
        let mut map = self.map.write();
        if let Some(existing) = map.get(key) {
            if seq <= existing.seq {
                return Ok(());
            }
        }
        let stored = self.arena.copy_in(value)?;
        map.insert(
            key.to_vec(),
            VersionEntry {
                seq,
                value: Some(stored),
            },
        );
        Ok(())
    }

    /// Records a tombstone for `key` under the same sequence rule as
    /// [`Table::put`].
    pub fn delete(&self, key: &[u8], seq: u64) -> Result<()> {
        let mut map = self.map.write();
        if let Some(existing) = map.get(key) {
            if seq <= existing.seq {
                return Ok(());
            }
        }
        map.insert(key.to_vec(), VersionEntry { seq, value: None });
        Ok(())
    }

    /// Returns a copy of the visible value for `key`, if any. Tombstoned
    /// and absent keys are both `None`.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.lookup(key) {
            Lookup::Hit(v) => Some(v),
            Lookup::Tombstone | Lookup::Miss => None,
        }
    }

    pub(crate) fn lookup(&self, key: &[u8]) -> Lookup {
        let map = self.map.read();
        match map.get(key) {
            None => Lookup::Miss,
            Some(VersionEntry { value: None, .. }) => Lookup::Tombstone,
            Some(VersionEntry {
                value: Some(r), ..
            }) => Lookup::Hit(self.arena.copy_out(*r)),
        }
    }

    /// Takes a consistent snapshot of all non-tombstoned entries and returns
    /// a forward iterator over it. Later mutations do not affect the
    /// iterator, and it holds no locks while being traversed.
    pub fn new_iterator(&self) -> TableIterator {
        let map = self.map.read();
        let mut entries = Vec::with_capacity(map.len());
        for (key, entry) in map.iter() {
            if let Some(r) = entry.value {
                entries.push((key.clone(), self.arena.copy_out(r)));
            }
        }
        TableIterator { entries, idx: 0 }
    }

    /// Snapshot including tombstones, for generation merging: the merged
    /// view needs a current-generation tombstone to shadow an older value.
    pub(crate) fn snapshot(&self) -> Vec<(Vec<u8>, Option<Vec<u8>>)> {
        let map = self.map.read();
        map.iter()
            .map(|(key, entry)| {
                (key.clone(), entry.value.map(|r| self.arena.copy_out(r)))
            })
            .collect()
    }

    /// Number of version records held, tombstones included.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Whether the table holds no records at all.
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot iterator over one table's visible entries in ascending key
/// order. Starts positioned on the first entry.
pub struct TableIterator {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    idx: usize,
}

impl TableIterator {
    /// Positions the iterator at the first key `>= target`.
    pub fn seek_ge(&mut self, target: &[u8]) {
        self.idx = self
            .entries
            .partition_point(|(key, _)| key.as_slice() < target);
    }

    /// Whether the iterator is positioned on an entry.
    pub fn valid(&self) -> bool {
        self.idx < self.entries.len()
    }

    /// The current key. Panics if the iterator is not valid.
    pub fn key(&self) -> &[u8] {
        &self.entries[self.idx].0
    }

    /// The current value. Panics if the iterator is not valid.
    pub fn value(&self) -> &[u8] {
        &self.entries[self.idx].1
    }

    /// Advances to the next entry.
    pub fn next(&mut self) {
        if self.valid() {
            self.idx += 1;
        }
    }
}
