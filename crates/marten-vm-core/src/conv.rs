//! Small conversions shared across the heap: canonical array-index
//! parsing and number-to-string for property keys.

use crate::error::VmResult;
use crate::heap::Heap;
use crate::string::NO_ARRAY_INDEX;
use crate::value::Value;
use marten_vm_gc::StringId;

/// Parse a byte string as a canonical array index.
///
/// Accepts exactly the decimal strings with no leading zero (except `"0"`
/// itself), no sign, no whitespace, whose value is at most `2^32 - 2`.
/// `"042"`, `""`, `"4294967295"` and anything non-digit all fail.
pub(crate) fn parse_array_index(bytes: &[u8]) -> Option<u32> {
    if bytes.is_empty() || bytes.len() > 10 {
        return None;
    }
    if bytes[0] == b'0' && bytes.len() > 1 {
        return None;
    }
    let mut acc: u64 = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            return None;
        }
        acc = acc * 10 + (b - b'0') as u64;
    }
    if acc >= NO_ARRAY_INDEX as u64 {
        return None;
    }
    Some(acc as u32)
}

/// Format a number the way property keys and `String(n)` require:
/// integral fast-path through itoa, shortest-roundtrip doubles through
/// ryu, and the usual NaN/Infinity spellings.
pub fn number_to_string(heap: &mut Heap, v: Value) -> VmResult<StringId> {
    if let Some(i) = v.as_fastint() {
        let mut buf = itoa::Buffer::new();
        return heap.intern(buf.format(i).as_bytes());
    }
    let d = match v.as_number() {
        Some(d) => d,
        None => return heap.intern(b"undefined"),
    };
    if d.is_nan() {
        return heap.intern(b"NaN");
    }
    if d.is_infinite() {
        return heap.intern(if d > 0.0 { b"Infinity" } else { b"-Infinity" });
    }
    if d == d.trunc() && d.abs() < 1e21 {
        // Integral doubles print without a fractional part. -0 prints "0".
        let i = d as i64;
        if i as f64 == d {
            let mut buf = itoa::Buffer::new();
            return heap.intern(buf.format(i).as_bytes());
        }
    }
    let mut buf = ryu::Buffer::new();
    heap.intern(buf.format(d).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_array_index() {
        assert_eq!(parse_array_index(b"0"), Some(0));
        assert_eq!(parse_array_index(b"1"), Some(1));
        assert_eq!(parse_array_index(b"4294967294"), Some(4294967294));
        assert_eq!(parse_array_index(b"4294967295"), None);
        assert_eq!(parse_array_index(b"042"), None);
        assert_eq!(parse_array_index(b"-1"), None);
        assert_eq!(parse_array_index(b""), None);
        assert_eq!(parse_array_index(b"1.0"), None);
        assert_eq!(parse_array_index(b"99999999999"), None);
    }

    #[test]
    fn test_number_to_string() {
        let mut heap = Heap::new().unwrap();
        let id = number_to_string(&mut heap, Value::fastint(42)).unwrap();
        assert_eq!(heap.string(id).as_bytes(), b"42");
        let id = number_to_string(&mut heap, Value::number(f64::NAN)).unwrap();
        assert_eq!(heap.string(id).as_bytes(), b"NaN");
        let id = number_to_string(&mut heap, Value::number(-0.0)).unwrap();
        assert_eq!(heap.string(id).as_bytes(), b"0");
        let id = number_to_string(&mut heap, Value::number(1.5)).unwrap();
        assert_eq!(heap.string(id).as_bytes(), b"1.5");
    }
}
