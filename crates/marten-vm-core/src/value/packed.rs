//! Packed NaN-boxed value layout (`packed-values` feature)
//!
//! Encodes every value in 64 bits using the IEEE 754 quiet-NaN space:
//!
//! ```text
//! 64 bits: TTTTTTTT TTTTTTTT PPPPPPPP ... PPPPPPPP
//!          T = 16-bit tag, P = 48-bit payload
//!
//! Doubles:   stored directly after NaN canonicalization
//! NaN:       0x7FF8_0000_0000_0000 (the one normalized NaN)
//! FastInt:   0xFFF1_PPPP_PPPP_PPPP (48-bit signed, sign-extended on read)
//! Unused:    0xFFF2_0000_0000_0000
//! Undefined: 0xFFF3_0000_0000_0000
//! Null:      0xFFF4_0000_0000_0000
//! Boolean:   0xFFF5_0000_0000_000B
//! Pointer:   0xFFF6_PPPP_PPPP_PPPP (48-bit host pointer)
//! LightFunc: 0xFFF7_PPPP_PPPP_PPPP (48-bit &'static LightFuncEntry)
//! String:    0xFFF8_0000_IIII_IIII (32-bit arena handle)
//! Object:    0xFFF9_0000_IIII_IIII
//! Buffer:    0xFFFA_0000_IIII_IIII
//! ```
//!
//! Real doubles never reach tag space: the largest top-16 pattern a
//! canonicalized double can produce is 0xFFF0 (-Infinity), and every NaN is
//! remapped to the normalized quiet NaN before storage. That makes "is this
//! a number" a single comparison (`tag <= TAG_FASTINT`).
//!
//! The in-register representation is a plain `u64`; byte order only matters
//! when values are written to external storage, which this core never does.

use super::{LightFuncEntry, double_fits_fastint};
use marten_vm_gc::{BufferId, HeapId, ObjectId, StringId};

const TAG_SHIFT: u32 = 48;
const PAYLOAD_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

/// The one normalized NaN bit pattern.
const CANONICAL_NAN: u64 = 0x7FF8_0000_0000_0000;

const TAG_FASTINT: u64 = 0xFFF1;
const TAG_UNUSED: u64 = 0xFFF2;
const TAG_UNDEFINED: u64 = 0xFFF3;
const TAG_NULL: u64 = 0xFFF4;
const TAG_BOOLEAN: u64 = 0xFFF5;
const TAG_POINTER: u64 = 0xFFF6;
const TAG_LIGHTFUNC: u64 = 0xFFF7;
const TAG_STRING: u64 = 0xFFF8;
const TAG_OBJECT: u64 = 0xFFF9;
const TAG_BUFFER: u64 = 0xFFFA;

const fn pack(tag: u64, payload: u64) -> u64 {
    (tag << TAG_SHIFT) | (payload & PAYLOAD_MASK)
}

/// A tagged JavaScript value (packed 8-byte layout).
///
/// See the module docs for the layout-independent contract.
#[derive(Clone, Copy)]
pub struct Value {
    bits: u64,
}

impl Value {
    #[inline]
    fn tag(&self) -> u64 {
        self.bits >> TAG_SHIFT
    }

    /// The internal "unused" sentinel.
    #[inline]
    pub const fn unused() -> Self {
        Self {
            bits: pack(TAG_UNUSED, 0),
        }
    }

    /// `undefined`
    #[inline]
    pub const fn undefined() -> Self {
        Self {
            bits: pack(TAG_UNDEFINED, 0),
        }
    }

    /// `null`
    #[inline]
    pub const fn null() -> Self {
        Self {
            bits: pack(TAG_NULL, 0),
        }
    }

    /// Boolean value
    #[inline]
    pub const fn boolean(b: bool) -> Self {
        Self {
            bits: pack(TAG_BOOLEAN, b as u64),
        }
    }

    /// Fastint value. Caller must stay within the 48-bit signed range.
    #[inline]
    pub fn fastint(i: i64) -> Self {
        debug_assert!((super::FASTINT_MIN..=super::FASTINT_MAX).contains(&i));
        Self {
            bits: pack(TAG_FASTINT, i as u64),
        }
    }

    /// Double value, canonicalizing NaN so tag detection stays reliable.
    /// No implicit fastint demotion; apply [`Value::compact`] explicitly.
    #[inline]
    pub fn number(n: f64) -> Self {
        let bits = if n.is_nan() {
            CANONICAL_NAN
        } else {
            n.to_bits()
        };
        Self { bits }
    }

    /// Opaque pointer value
    #[inline]
    pub fn pointer(p: *mut ()) -> Self {
        Self {
            bits: pack(TAG_POINTER, p as usize as u64),
        }
    }

    /// Lightweight function value
    #[inline]
    pub fn lightfunc(entry: &'static LightFuncEntry) -> Self {
        Self {
            bits: pack(TAG_LIGHTFUNC, entry as *const LightFuncEntry as usize as u64),
        }
    }

    /// String value
    #[inline]
    pub fn string(id: StringId) -> Self {
        Self {
            bits: pack(TAG_STRING, id.heap_id().0 as u64),
        }
    }

    /// Object value
    #[inline]
    pub fn object(id: ObjectId) -> Self {
        Self {
            bits: pack(TAG_OBJECT, id.heap_id().0 as u64),
        }
    }

    /// Buffer value
    #[inline]
    pub fn buffer(id: BufferId) -> Self {
        Self {
            bits: pack(TAG_BUFFER, id.heap_id().0 as u64),
        }
    }

    /// Demote a double to a fastint when exactly representable.
    #[inline]
    pub fn compact(self) -> Self {
        if self.tag() <= 0xFFF0
            && let Some(i) = double_fits_fastint(f64::from_bits(self.bits))
        {
            return Self::fastint(i);
        }
        self
    }

    /// Check for the internal "unused" sentinel
    #[inline]
    pub fn is_unused(&self) -> bool {
        self.tag() == TAG_UNUSED
    }

    /// Check for `undefined`
    #[inline]
    pub fn is_undefined(&self) -> bool {
        self.tag() == TAG_UNDEFINED
    }

    /// Check for `null`
    #[inline]
    pub fn is_null(&self) -> bool {
        self.tag() == TAG_NULL
    }

    /// Check for `null` or `undefined`
    #[inline]
    pub fn is_nullish(&self) -> bool {
        self.is_undefined() || self.is_null()
    }

    /// Check for a boolean
    #[inline]
    pub fn is_boolean(&self) -> bool {
        self.tag() == TAG_BOOLEAN
    }

    /// Check for a number (double or fastint): a single tag comparison.
    #[inline]
    pub fn is_number(&self) -> bool {
        self.tag() <= TAG_FASTINT
    }

    /// Check for the fastint representation specifically
    #[inline]
    pub fn is_fastint(&self) -> bool {
        self.tag() == TAG_FASTINT
    }

    /// Check for a pointer
    #[inline]
    pub fn is_pointer(&self) -> bool {
        self.tag() == TAG_POINTER
    }

    /// Check for a lightweight function
    #[inline]
    pub fn is_lightfunc(&self) -> bool {
        self.tag() == TAG_LIGHTFUNC
    }

    /// Check for a string
    #[inline]
    pub fn is_string(&self) -> bool {
        self.tag() == TAG_STRING
    }

    /// Check for an object
    #[inline]
    pub fn is_object(&self) -> bool {
        self.tag() == TAG_OBJECT
    }

    /// Check for a buffer
    #[inline]
    pub fn is_buffer(&self) -> bool {
        self.tag() == TAG_BUFFER
    }

    /// Get as boolean
    #[inline]
    pub fn as_boolean(&self) -> Option<bool> {
        if self.is_boolean() {
            Some(self.bits & 1 != 0)
        } else {
            None
        }
    }

    /// Get as number; fastints widen to double
    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        if self.is_fastint() {
            Some(self.fastint_payload() as f64)
        } else if self.tag() <= 0xFFF0 {
            Some(f64::from_bits(self.bits))
        } else {
            None
        }
    }

    /// Get the fastint payload (only when the fastint representation is
    /// active; use [`Value::as_number`] for the logical Number value)
    #[inline]
    pub fn as_fastint(&self) -> Option<i64> {
        if self.is_fastint() {
            Some(self.fastint_payload())
        } else {
            None
        }
    }

    #[inline]
    fn fastint_payload(&self) -> i64 {
        // Sign-extend the 48-bit payload
        ((self.bits << 16) as i64) >> 16
    }

    /// Get as pointer
    #[inline]
    pub fn as_pointer(&self) -> Option<*mut ()> {
        if self.is_pointer() {
            Some((self.bits & PAYLOAD_MASK) as usize as *mut ())
        } else {
            None
        }
    }

    /// Get as lightweight function
    #[inline]
    pub fn as_lightfunc(&self) -> Option<&'static LightFuncEntry> {
        if self.is_lightfunc() {
            let ptr = (self.bits & PAYLOAD_MASK) as usize as *const LightFuncEntry;
            // SAFETY: the payload was produced from a &'static LightFuncEntry
            // in Value::lightfunc; userspace pointers on supported 64-bit
            // targets fit in 48 bits.
            Some(unsafe { &*ptr })
        } else {
            None
        }
    }

    /// Get as string handle
    #[inline]
    pub fn as_string(&self) -> Option<StringId> {
        if self.is_string() {
            Some(StringId(HeapId(self.bits as u32)))
        } else {
            None
        }
    }

    /// Get as object handle
    #[inline]
    pub fn as_object(&self) -> Option<ObjectId> {
        if self.is_object() {
            Some(ObjectId(HeapId(self.bits as u32)))
        } else {
            None
        }
    }

    /// Get as buffer handle
    #[inline]
    pub fn as_buffer(&self) -> Option<BufferId> {
        if self.is_buffer() {
            Some(BufferId(HeapId(self.bits as u32)))
        } else {
            None
        }
    }

    /// The heap handle for refcounted variants (string/object/buffer).
    #[inline]
    pub fn heap_id(&self) -> Option<HeapId> {
        match self.tag() {
            TAG_STRING | TAG_OBJECT | TAG_BUFFER => Some(HeapId(self.bits as u32)),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::undefined()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        // NaN != NaN: the canonical NaN never equals anything
        if self.bits == CANONICAL_NAN || other.bits == CANONICAL_NAN {
            return false;
        }
        if self.bits == other.bits {
            return true;
        }
        // Cross-representation number comparison (fastint vs double, +0/-0)
        if self.is_number() && other.is_number() {
            return self.as_number() == other.as_number();
        }
        false
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.tag() {
            TAG_UNUSED => write!(f, "unused"),
            TAG_UNDEFINED => write!(f, "undefined"),
            TAG_NULL => write!(f, "null"),
            TAG_BOOLEAN => write!(f, "{}", self.bits & 1 != 0),
            TAG_FASTINT => write!(f, "{}", self.fastint_payload()),
            TAG_POINTER => write!(f, "pointer({:#x})", self.bits & PAYLOAD_MASK),
            TAG_LIGHTFUNC => write!(f, "lightfunc({:#x})", self.bits & PAYLOAD_MASK),
            TAG_STRING => write!(f, "string(#{})", self.bits as u32),
            TAG_OBJECT => write!(f, "object(#{})", self.bits as u32),
            TAG_BUFFER => write!(f, "buffer(#{})", self.bits as u32),
            _ => write!(f, "{}", f64::from_bits(self.bits)),
        }
    }
}
