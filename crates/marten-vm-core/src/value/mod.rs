//! Tagged JavaScript values
//!
//! A [`Value`] represents any ECMAScript value plus the engine-internal
//! "unused" sentinel. Two binary layouts implement the same accessor API:
//!
//! - the portable layout (default): an explicit tag plus payload, identical
//!   behavior on any host;
//! - the packed layout (`packed-values` feature): an 8-byte NaN-boxed `u64`
//!   reusing the quiet-NaN space of IEEE 754 doubles for tags, with doubles
//!   canonicalized so tag detection never misfires.
//!
//! Heap-referencing variants carry arena handles ([`StringId`]/[`ObjectId`]/
//! [`BufferId`]); a `Value` is plain `Copy` data and does not own its
//! referent. Every `Value` stored into a heap-reachable location must be
//! reflected in the referent's reference count.
//!
//! Numbers have a 48-bit signed integer fast path ([`Value::fastint`])
//! alongside full doubles. Demotion from double to fastint is explicit via
//! [`Value::compact`], applied after arithmetic that produced a double; a
//! Number is unpacked by the same API regardless of which representation it
//! happens to use.

use crate::error::VmResult;
use crate::heap::Heap;

#[cfg(feature = "packed-values")]
mod packed;
#[cfg(feature = "packed-values")]
pub use packed::Value;

#[cfg(not(feature = "packed-values"))]
mod portable;
#[cfg(not(feature = "packed-values"))]
pub use portable::Value;

/// Smallest fastint value (-(2^47)).
pub const FASTINT_MIN: i64 = -(1 << 47);
/// Largest fastint value (2^47 - 1).
pub const FASTINT_MAX: i64 = (1 << 47) - 1;

/// Check whether a double is exactly representable as a fastint.
///
/// Negative zero is excluded: demoting it to integer 0 would lose the sign.
pub fn double_fits_fastint(x: f64) -> Option<i64> {
    if x.fract() != 0.0 || !x.is_finite() {
        return None;
    }
    if x == 0.0 && x.is_sign_negative() {
        return None;
    }
    let i = x as i64;
    if (FASTINT_MIN..=FASTINT_MAX).contains(&i) && i as f64 == x {
        Some(i)
    } else {
        None
    }
}

/// Native function handler.
///
/// Receives the heap, the `this` binding, and the call arguments. The
/// returned value is owned by the caller (its refcount includes the
/// caller's reference).
pub type NativeFunc = fn(&mut Heap, Value, &[Value]) -> VmResult<Value>;

/// Packed arity/length/magic metadata of a lightweight function.
///
/// Layout: bits 0..8 magic (signed), bits 8..12 `length`, bits 12..16
/// `nargs` (`0xF` = varargs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightFuncFlags(u16);

impl LightFuncFlags {
    /// `nargs` value meaning "accept any argument count".
    pub const VARARGS: u8 = 0xF;

    /// Pack flags. `length` and `nargs` must fit in 4 bits.
    pub const fn new(magic: i8, length: u8, nargs: u8) -> Self {
        debug_assert!(length <= 0xF);
        debug_assert!(nargs <= 0xF);
        Self((magic as u8 as u16) | ((length as u16) << 8) | ((nargs as u16) << 12))
    }

    /// Magic value baked into the function.
    pub const fn magic(self) -> i8 {
        (self.0 & 0xFF) as u8 as i8
    }

    /// Virtual `length` property value.
    pub const fn length(self) -> u8 {
        ((self.0 >> 8) & 0xF) as u8
    }

    /// Declared argument count, or [`Self::VARARGS`].
    pub const fn nargs(self) -> u8 {
        ((self.0 >> 12) & 0xF) as u8
    }
}

/// A lightweight function: a callable representable without a heap
/// allocation. Embedders register these as statics; the value payload is
/// just the reference.
#[derive(Debug)]
pub struct LightFuncEntry {
    /// The native handler.
    pub func: NativeFunc,
    /// Packed arity/length/magic metadata.
    pub flags: LightFuncFlags,
}

#[cfg(test)]
mod tests {
    use super::*;
    use marten_vm_gc::{HeapId, ObjectId, StringId};

    fn dummy_native(
        _heap: &mut Heap,
        _this: Value,
        _args: &[Value],
    ) -> VmResult<Value> {
        Ok(Value::undefined())
    }

    static DUMMY_LF: LightFuncEntry = LightFuncEntry {
        func: dummy_native,
        flags: LightFuncFlags::new(3, 2, 1),
    };

    #[test]
    fn test_simple_tags() {
        let u = Value::undefined();
        assert!(u.is_undefined());
        assert!(u.is_nullish());
        assert!(!u.is_unused());

        let n = Value::null();
        assert!(n.is_null());
        assert!(n.is_nullish());

        let s = Value::unused();
        assert!(s.is_unused());
        assert!(!s.is_undefined());

        let b = Value::boolean(true);
        assert!(b.is_boolean());
        assert_eq!(b.as_boolean(), Some(true));
    }

    #[test]
    fn test_fastint_roundtrip() {
        for i in [0i64, 1, -1, 42, FASTINT_MIN, FASTINT_MAX] {
            let v = Value::fastint(i);
            assert!(v.is_fastint(), "{i} should be fastint");
            assert!(v.is_number());
            assert_eq!(v.as_fastint(), Some(i));
            assert_eq!(v.as_number(), Some(i as f64));
        }
    }

    #[test]
    fn test_double_roundtrip() {
        let v = Value::number(3.25);
        assert!(v.is_number());
        assert!(!v.is_fastint());
        assert_eq!(v.as_number(), Some(3.25));
    }

    #[test]
    fn test_nan_is_number_not_undefined() {
        let v = Value::number(f64::NAN);
        assert!(v.is_number());
        assert!(!v.is_undefined());
        assert!(v.as_number().unwrap().is_nan());
    }

    #[test]
    fn test_compact_demotes() {
        let v = Value::number(7.0).compact();
        assert!(v.is_fastint());
        assert_eq!(v.as_fastint(), Some(7));

        // Not exactly representable: stays a double
        let v = Value::number(7.5).compact();
        assert!(!v.is_fastint());
        assert_eq!(v.as_number(), Some(7.5));

        // Negative zero must keep its sign
        let v = Value::number(-0.0).compact();
        assert!(!v.is_fastint());
        assert!(v.as_number().unwrap().is_sign_negative());

        // Out of fastint range
        let v = Value::number(2f64.powi(50)).compact();
        assert!(!v.is_fastint());
    }

    #[test]
    fn test_handles() {
        let s = Value::string(StringId(HeapId(3)));
        assert!(s.is_string());
        assert!(!s.is_object());
        assert_eq!(s.as_string(), Some(StringId(HeapId(3))));
        assert_eq!(s.heap_id(), Some(HeapId(3)));

        let o = Value::object(ObjectId(HeapId(9)));
        assert!(o.is_object());
        assert_eq!(o.as_object(), Some(ObjectId(HeapId(9))));
        assert_eq!(o.heap_id(), Some(HeapId(9)));

        assert_eq!(Value::undefined().heap_id(), None);
    }

    #[test]
    fn test_lightfunc() {
        let v = Value::lightfunc(&DUMMY_LF);
        assert!(v.is_lightfunc());
        let entry = v.as_lightfunc().unwrap();
        assert_eq!(entry.flags.magic(), 3);
        assert_eq!(entry.flags.length(), 2);
        assert_eq!(entry.flags.nargs(), 1);
    }

    #[test]
    fn test_pointer() {
        let mut x = 5u32;
        let p = Value::pointer(&mut x as *mut u32 as *mut ());
        assert!(p.is_pointer());
        assert_eq!(p.as_pointer(), Some(&mut x as *mut u32 as *mut ()));
    }

    #[test]
    fn test_equality() {
        assert_eq!(Value::fastint(5), Value::number(5.0));
        assert_eq!(Value::undefined(), Value::undefined());
        assert_ne!(Value::undefined(), Value::null());
        assert_ne!(Value::number(f64::NAN), Value::number(f64::NAN));
        assert_eq!(
            Value::string(StringId(HeapId(1))),
            Value::string(StringId(HeapId(1)))
        );
        assert_ne!(
            Value::string(StringId(HeapId(1))),
            Value::string(StringId(HeapId(2)))
        );
    }

    #[test]
    fn test_lightfunc_flags_packing() {
        let f = LightFuncFlags::new(-2, 0xF, LightFuncFlags::VARARGS);
        assert_eq!(f.magic(), -2);
        assert_eq!(f.length(), 0xF);
        assert_eq!(f.nargs(), LightFuncFlags::VARARGS);
    }
}
