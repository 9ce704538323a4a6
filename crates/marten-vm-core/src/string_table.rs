//! String intern table
//!
//! Open hashing with per-bucket chains. Every heap string lives in exactly
//! one chain; interning the same byte sequence twice always yields the same
//! handle, so string equality elsewhere is handle equality. Resizes happen
//! before the new string is allocated, and a guard rejects any resize
//! re-entered from within a resize.

use marten_vm_gc::{CellHeader, CellTag, StringId};

use crate::error::{VmError, VmResult};
use crate::heap::{Cell, CellKind, Heap};
use crate::string::HString;

/// Grow when the chain load factor (count / buckets) exceeds this.
const GROW_LOAD: usize = 4;
/// Shrink when count drops below buckets / 8, but never below the initial size.
const SHRINK_DIVISOR: usize = 8;

pub(crate) struct StringTable {
    buckets: Vec<Vec<StringId>>,
    count: usize,
    initial: usize,
    resizing: bool,
}

impl StringTable {
    pub(crate) fn new(initial: usize) -> Self {
        debug_assert!(initial.is_power_of_two());
        Self {
            buckets: vec![Vec::new(); initial],
            count: 0,
            initial,
            resizing: false,
        }
    }

    #[inline]
    fn bucket_of(&self, hash: u32) -> usize {
        (hash as usize) & (self.buckets.len() - 1)
    }

    pub(crate) fn count(&self) -> usize {
        self.count
    }
}

impl Heap {
    /// Intern a byte string, returning the canonical handle.
    ///
    /// The returned handle is uncounted: the intern table itself does not
    /// own a reference, so the caller must count (or stash on the value
    /// stack) before any operation that can run GC.
    pub fn intern(&mut self, data: &[u8]) -> VmResult<StringId> {
        let hash = HString::compute_hash(data);
        let bucket = self.strings.bucket_of(hash);
        for i in 0..self.strings.buckets[bucket].len() {
            let id = self.strings.buckets[bucket][i];
            let s = self.string(id);
            if s.hash_value() == hash && s.as_bytes() == data {
                return Ok(id);
            }
        }

        // Resize before allocating so a mid-insert failure leaves the
        // table consistent.
        if self.strings.count + 1 > self.strings.buckets.len() * GROW_LOAD {
            self.resize_string_table(self.strings.buckets.len() * 2)?;
        }

        let hstr = HString::new(data.to_vec().into_boxed_slice());
        let id = StringId(self.alloc_cell(Cell {
            header: CellHeader::new(CellTag::String),
            kind: CellKind::String(hstr),
        }));
        let bucket = self.strings.bucket_of(hash);
        self.strings.buckets[bucket].push(id);
        self.strings.count += 1;
        Ok(id)
    }

    /// Intern a UTF-8 string slice.
    pub fn intern_str(&mut self, s: &str) -> VmResult<StringId> {
        self.intern(s.as_bytes())
    }

    /// Intern the canonical decimal form of `n`.
    pub fn intern_u32(&mut self, n: u32) -> VmResult<StringId> {
        let mut buf = itoa::Buffer::new();
        self.intern(buf.format(n).as_bytes())
    }

    /// Remove a dying string from the table. Called from string free,
    /// before the cell is torn down.
    pub(crate) fn unlink_string(&mut self, id: StringId) {
        let hash = self.string(id).hash_value();
        let bucket = self.strings.bucket_of(hash);
        let chain = &mut self.strings.buckets[bucket];
        if let Some(pos) = chain.iter().position(|&s| s == id) {
            chain.swap_remove(pos);
            self.strings.count -= 1;
        } else {
            debug_assert!(false, "dying string not found in intern table");
        }
        self.maybe_shrink_string_table();
    }

    fn maybe_shrink_string_table(&mut self) {
        let buckets = self.strings.buckets.len();
        if buckets > self.strings.initial && self.strings.count < buckets / SHRINK_DIVISOR {
            // Shrink failure is non-fatal; the table just stays large.
            let _ = self.resize_string_table(buckets / 2);
        }
    }

    fn resize_string_table(&mut self, new_size: usize) -> VmResult<()> {
        if self.strings.resizing {
            return Err(VmError::internal("re-entrant string table resize"));
        }
        self.strings.resizing = true;

        let old = std::mem::replace(&mut self.strings.buckets, vec![Vec::new(); new_size]);
        for chain in old {
            for id in chain {
                let hash = self.string(id).hash_value();
                let bucket = (hash as usize) & (new_size - 1);
                self.strings.buckets[bucket].push(id);
            }
        }

        self.strings.resizing = false;
        Ok(())
    }

    /// Number of interned strings; test/diagnostic aid.
    pub fn interned_string_count(&self) -> usize {
        self.strings.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_dedup() {
        let mut heap = Heap::new().unwrap();
        let a = heap.intern(b"hello").unwrap();
        let b = heap.intern(b"hello").unwrap();
        assert_eq!(a, b);
        let c = heap.intern(b"world").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_intern_survives_resize() {
        let mut heap = Heap::new().unwrap();
        let before = heap.intern(b"anchor").unwrap();
        // Push well past the grow threshold.
        let mut ids = Vec::new();
        for i in 0..2048u32 {
            ids.push(heap.intern(format!("key-{i}").as_bytes()).unwrap());
        }
        assert_eq!(heap.intern(b"anchor").unwrap(), before);
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(heap.intern(format!("key-{i}").as_bytes()).unwrap(), *id);
        }
    }

    #[test]
    fn test_unlink_then_reintern() {
        let mut heap = Heap::new().unwrap();
        let a = heap.intern(b"transient").unwrap();
        heap.incref_id(a.heap_id());
        heap.decref_id(a.heap_id());
        // The old cell is gone; a fresh intern must produce a live string
        // with the same contents.
        let b = heap.intern(b"transient").unwrap();
        assert_eq!(heap.string(b).as_bytes(), b"transient");
    }
}
