//! Interned heap strings
//!
//! Strings are immutable byte sequences in WTF-8: UTF-8 plus permissive
//! encodings of lone surrogate halves, so arbitrary 16-bit code unit
//! sequences round-trip even though storage is byte-oriented. Character
//! addressing uses UTF-16 code-unit semantics: BMP codepoints count as one
//! unit, non-BMP (4-byte) codepoints as two.
//!
//! Strings are created only through the interner ([`crate::heap::Heap::intern`]);
//! handle equality therefore implies content equality.

use rustc_hash::FxHasher;
use std::hash::Hasher;

/// Content flag bits, computed once at intern time.
pub mod string_flags {
    /// Every byte < 0x80; char offsets equal byte offsets.
    pub const ASCII: u8 = 1 << 0;
    /// Content spells a canonical array index (see [`crate::conv::parse_array_index`]).
    pub const ARRAY_INDEX: u8 = 1 << 1;
    /// Engine-internal hidden key (leading 0xFF byte); excluded from normal
    /// enumeration and invisible to script.
    pub const HIDDEN: u8 = 1 << 2;
    /// An ECMAScript reserved word ("if", "return", ...); consulted by the
    /// (external) compiler, carried here because it is an intern-time fact.
    pub const RESERVED_WORD: u8 = 1 << 3;
}

/// Sentinel for "not an array index" in [`HString::array_index`].
pub const NO_ARRAY_INDEX: u32 = u32::MAX;

/// An immutable interned string.
///
/// Content is immutable after creation; two `HString`s with identical bytes
/// are always the same heap cell.
#[derive(Debug)]
pub struct HString {
    data: Box<[u8]>,
    /// Precomputed content hash
    hash: u32,
    /// Length in UTF-16 code units
    charlen: u32,
    /// Parsed index value when ARRAY_INDEX is set, else [`NO_ARRAY_INDEX`]
    array_index: u32,
    flags: u8,
}

impl HString {
    /// Build a string, computing hash, char length and content flags.
    /// Only the interner calls this.
    pub(crate) fn new(data: Box<[u8]>) -> Self {
        let hash = Self::compute_hash(&data);
        let charlen = wtf8_charlen(&data);
        let ascii = data.iter().all(|&b| b < 0x80);
        let hidden = data.first() == Some(&0xFF);
        let array_index = crate::conv::parse_array_index(&data);
        let reserved = is_reserved_word(&data);

        let mut flags = 0;
        if ascii {
            flags |= string_flags::ASCII;
        }
        if array_index.is_some() {
            flags |= string_flags::ARRAY_INDEX;
        }
        if hidden {
            flags |= string_flags::HIDDEN;
        }
        if reserved {
            flags |= string_flags::RESERVED_WORD;
        }

        Self {
            data,
            hash,
            charlen,
            array_index: array_index.unwrap_or(NO_ARRAY_INDEX),
            flags,
        }
    }

    /// Content hash, shared by the intern table and property tables.
    pub fn compute_hash(data: &[u8]) -> u32 {
        let mut hasher = FxHasher::default();
        hasher.write(data);
        hasher.finish() as u32
    }

    /// The raw WTF-8 bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Byte length.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for the empty string.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Length in UTF-16 code units.
    #[inline]
    pub fn charlen(&self) -> u32 {
        self.charlen
    }

    /// Precomputed content hash.
    #[inline]
    pub fn hash_value(&self) -> u32 {
        self.hash
    }

    /// Test a content flag.
    #[inline]
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    /// Parsed canonical array index, if the content spells one.
    #[inline]
    pub fn array_index(&self) -> Option<u32> {
        if self.has_flag(string_flags::ARRAY_INDEX) {
            Some(self.array_index)
        } else {
            None
        }
    }

    /// Lossy UTF-8 view for diagnostics.
    pub fn to_display(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

/// Count UTF-16 code units in a WTF-8 byte sequence.
///
/// Lead bytes classify sequence length; 4-byte sequences (non-BMP) count as
/// two units, everything else as one. Continuation bytes contribute nothing.
pub fn wtf8_charlen(data: &[u8]) -> u32 {
    let mut units = 0u32;
    for &b in data {
        if b & 0xC0 != 0x80 {
            units += if b >= 0xF0 { 2 } else { 1 };
        }
    }
    units
}

/// Byte length of the WTF-8 sequence starting with the given lead byte.
#[inline]
pub(crate) fn wtf8_seq_len(lead: u8) -> usize {
    if lead < 0x80 {
        1
    } else if lead < 0xE0 {
        2
    } else if lead < 0xF0 {
        3
    } else {
        4
    }
}

fn is_reserved_word(data: &[u8]) -> bool {
    // ES5.1 keywords + future reserved words; strict-mode-only words included.
    const WORDS: &[&[u8]] = &[
        b"break", b"case", b"catch", b"class", b"const", b"continue", b"debugger",
        b"default", b"delete", b"do", b"else", b"enum", b"export", b"extends",
        b"false", b"finally", b"for", b"function", b"if", b"implements",
        b"import", b"in", b"instanceof", b"interface", b"let", b"new", b"null",
        b"package", b"private", b"protected", b"public", b"return", b"static",
        b"super", b"switch", b"this", b"throw", b"true", b"try", b"typeof",
        b"var", b"void", b"while", b"with", b"yield",
    ];
    WORDS.contains(&data)
}
