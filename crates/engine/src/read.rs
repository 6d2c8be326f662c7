//! Read path: `get()`, `iter()`, and `scan()`.
//!
//! Point lookups consult the current generation first, then the sealed
//! one; a tombstone in the current generation shadows anything below it.
//! Range reads run over a merged snapshot of both generations and are
//! unaffected by concurrent writes.

use memtable::MergedIterator;

use crate::Engine;

impl Engine {
    /// Looks up a key, returning a detached copy of the visible value.
    ///
    /// Returns `None` for keys that were never written and for keys whose
    /// newest version is a tombstone.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.mem.get(key)
    }

    /// Returns a merged snapshot iterator over both memtable generations,
    /// positioned at the first visible entry. Writes made after this call
    /// do not appear.
    #[must_use]
    pub fn iter(&self) -> MergedIterator {
        self.mem.new_iterator()
    }

    /// Collects all live pairs with `start <= key < end` in ascending key
    /// order. An empty `end` means "to the end of the keyspace".
    #[must_use]
    pub fn scan(&self, start: &[u8], end: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut it = self.iter();
        it.seek_ge(start);
        let mut out = Vec::new();
        while it.valid() {
            if !end.is_empty() && it.key() >= end {
                break;
            }
            out.push((it.key().to_vec(), it.value().to_vec()));
            it.next();
        }
        out
    }
}
