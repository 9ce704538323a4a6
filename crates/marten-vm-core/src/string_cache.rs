//! Char-offset cache
//!
//! Char-to-byte conversion on WTF-8 strings is linear-time in general, so
//! repeated indexing into the same long string (the common `s[i]` loop)
//! would be quadratic. A tiny LRU cache of (string, char offset, byte
//! offset) triples makes forward scans resume from the last position.
//!
//! Char offsets count UTF-16 code units: a 4-byte WTF-8 sequence is two
//! units. An offset landing on the trailing half of such a pair clamps back
//! to the start of the sequence.

use marten_vm_gc::StringId;

use crate::heap::Heap;
use crate::string::{string_flags, wtf8_seq_len};

#[derive(Debug, Clone, Copy)]
struct Entry {
    id: StringId,
    char_offset: u32,
    byte_offset: u32,
}

/// Fixed-size LRU of resume points, most recent first.
pub(crate) struct StringCache {
    entries: Vec<Option<Entry>>,
}

impl StringCache {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            entries: vec![None; size.max(1)],
        }
    }

    fn lookup(&mut self, id: StringId) -> Option<Entry> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.is_some_and(|e| e.id == id))?;
        let entry = self.entries[pos];
        // Move to front.
        self.entries[..=pos].rotate_right(1);
        self.entries[0] = entry;
        entry
    }

    fn insert(&mut self, entry: Entry) {
        if let Some(pos) = self
            .entries
            .iter()
            .position(|e| e.is_some_and(|e| e.id == entry.id))
        {
            self.entries[..=pos].rotate_right(1);
        } else {
            self.entries.rotate_right(1);
        }
        self.entries[0] = Some(entry);
    }

    /// Drop resume points for a dying string.
    pub(crate) fn invalidate(&mut self, id: StringId) {
        for e in &mut self.entries {
            if e.is_some_and(|e| e.id == id) {
                *e = None;
            }
        }
    }
}

impl Heap {
    /// Convert a char offset (UTF-16 code units) into a byte offset.
    ///
    /// Offsets past the end clamp to the string's byte length; an offset
    /// splitting a surrogate pair clamps to the pair's start.
    pub fn string_char_to_byte(&mut self, id: StringId, char_offset: u32) -> u32 {
        self.string_char_to_byte_clamped(id, char_offset).0
    }

    /// Like [`Heap::string_char_to_byte`], but also reports the char offset
    /// actually reached. The second component differs from the request when
    /// the offset lay past the end of the string or split a surrogate pair.
    pub fn string_char_to_byte_clamped(&mut self, id: StringId, char_offset: u32) -> (u32, u32) {
        let s = self.string(id);
        let charlen = s.charlen();
        let bytelen = s.len() as u32;
        let target = char_offset.min(charlen);

        if s.has_flag(string_flags::ASCII) {
            return (target, target);
        }
        if target == 0 {
            return (0, 0);
        }
        if target == charlen {
            return (bytelen, charlen);
        }

        // Pick the cheapest scan start among {cache entry, string start,
        // string end}, preferring forward scans on a tie since backward
        // scanning has to step over continuation bytes one at a time.
        let (fwd, back) = match self.string_cache.lookup(id) {
            Some(e) if e.char_offset <= target => {
                ((e.char_offset, e.byte_offset), (charlen, bytelen))
            }
            Some(e) => ((0, 0), (e.char_offset, e.byte_offset)),
            None => ((0, 0), (charlen, bytelen)),
        };
        let forward = target - fwd.0 <= back.0 - target;
        let (mut chars, mut bytes) = if forward { fwd } else { back };

        let s = self.string(id);
        let data = s.as_bytes();
        if forward {
            while chars < target {
                let lead = data[bytes as usize];
                let seq = wtf8_seq_len(lead) as u32;
                let units = if seq == 4 { 2 } else { 1 };
                if chars + units > target {
                    // Target points into a surrogate pair; clamp down.
                    break;
                }
                chars += units;
                bytes += seq;
            }
        } else {
            while chars > target {
                bytes -= 1;
                while data[bytes as usize] & 0xC0 == 0x80 {
                    bytes -= 1;
                }
                let seq = wtf8_seq_len(data[bytes as usize]) as u32;
                // Overshooting here means the target split a surrogate
                // pair; the clamp lands on the pair's start.
                chars -= if seq == 4 { 2 } else { 1 };
            }
        }

        self.string_cache.insert(Entry {
            id,
            char_offset: chars,
            byte_offset: bytes,
        });
        (bytes, chars)
    }

    /// The substring covering char offsets `[start, end)`, as raw bytes.
    pub fn string_char_slice(&mut self, id: StringId, start: u32, end: u32) -> &[u8] {
        let b0 = self.string_char_to_byte(id, start);
        let b1 = self.string_char_to_byte(id, end.max(start));
        &self.string(id).as_bytes()[b0 as usize..b1 as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_fast_path() {
        let mut heap = Heap::new().unwrap();
        let id = heap.intern(b"hello").unwrap();
        assert_eq!(heap.string_char_to_byte(id, 0), 0);
        assert_eq!(heap.string_char_to_byte(id, 3), 3);
        assert_eq!(heap.string_char_to_byte(id, 99), 5);
    }

    #[test]
    fn test_multibyte_offsets() {
        let mut heap = Heap::new().unwrap();
        // "aÿb" : 'a' (1 byte), U+00FF (2 bytes), 'b'
        let id = heap.intern("a\u{ff}b".as_bytes()).unwrap();
        assert_eq!(heap.string_char_to_byte(id, 0), 0);
        assert_eq!(heap.string_char_to_byte(id, 1), 1);
        assert_eq!(heap.string_char_to_byte(id, 2), 3);
        assert_eq!(heap.string_char_to_byte(id, 3), 4);
    }

    #[test]
    fn test_surrogate_pair_clamps() {
        let mut heap = Heap::new().unwrap();
        // "a😀b" : U+1F600 is 4 bytes, two UTF-16 units.
        let id = heap.intern("a\u{1F600}b".as_bytes()).unwrap();
        assert_eq!(heap.string(id).charlen(), 4);
        assert_eq!(heap.string_char_to_byte(id, 1), 1);
        // Offset 2 splits the pair: clamps back to the pair's start.
        assert_eq!(heap.string_char_to_byte(id, 2), 1);
        assert_eq!(heap.string_char_to_byte(id, 3), 5);
        assert_eq!(heap.string_char_to_byte(id, 4), 6);
    }

    #[test]
    fn test_forward_scan_resumes() {
        let mut heap = Heap::new().unwrap();
        let s: String = "\u{e9}".repeat(100);
        let id = heap.intern(s.as_bytes()).unwrap();
        // Ascending offsets each resume from the previous position.
        for i in 0..100u32 {
            assert_eq!(heap.string_char_to_byte(id, i), i * 2);
        }
        // A backward query scans back from the cached position.
        assert_eq!(heap.string_char_to_byte(id, 5), 10);
    }

    #[test]
    fn test_backward_scan_from_end() {
        let mut heap = Heap::new().unwrap();
        let s: String = "\u{e9}".repeat(100);
        let id = heap.intern(s.as_bytes()).unwrap();
        // No cache entry yet and the target is near the end, so the scan
        // runs backward from the string end.
        assert_eq!(heap.string_char_to_byte(id, 95), 190);
    }

    #[test]
    fn test_backward_scan_surrogate_clamp() {
        let mut heap = Heap::new().unwrap();
        let s: String = "\u{1F600}".repeat(10);
        let id = heap.intern(s.as_bytes()).unwrap();
        assert_eq!(heap.string(id).charlen(), 20);
        // Offset 17 splits the ninth pair; backward scan clamps to its start.
        assert_eq!(heap.string_char_to_byte(id, 17), 32);
        assert_eq!(heap.string_char_to_byte(id, 18), 36);
    }

    #[test]
    fn test_clamped_offset_reported() {
        let mut heap = Heap::new().unwrap();
        let id = heap.intern("a\u{1F600}b".as_bytes()).unwrap();
        // Splitting the pair reports the pair's start, not the request.
        assert_eq!(heap.string_char_to_byte_clamped(id, 2), (1, 1));
        assert_eq!(heap.string_char_to_byte_clamped(id, 3), (5, 3));
        // Past-the-end requests clamp to the string's length.
        assert_eq!(heap.string_char_to_byte_clamped(id, 99), (6, 4));
        // ASCII fast path clamps too.
        let id = heap.intern(b"abc").unwrap();
        assert_eq!(heap.string_char_to_byte_clamped(id, 99), (3, 3));
    }

    #[test]
    fn test_char_slice() {
        let mut heap = Heap::new().unwrap();
        let id = heap.intern("a\u{1F600}b".as_bytes()).unwrap();
        assert_eq!(heap.string_char_slice(id, 1, 3), "\u{1F600}".as_bytes());
    }
}
