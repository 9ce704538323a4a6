//! Portable tagged value layout
//!
//! Explicit tag plus payload. Costs more memory than the packed layout but
//! involves no bit-level reasoning and behaves identically regardless of
//! host endianness.

use super::{LightFuncEntry, double_fits_fastint};
use marten_vm_gc::{BufferId, HeapId, ObjectId, StringId};

/// A tagged JavaScript value (portable layout).
///
/// See the module docs for the layout-independent contract.
#[derive(Clone, Copy)]
pub enum Value {
    /// Internal "slot not yet written" sentinel; never script-visible.
    Unused,
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// `true` / `false`
    Boolean(bool),
    /// 48-bit signed integer fast path (invariant: within fastint range)
    FastInt(i64),
    /// Full double
    Double(f64),
    /// Opaque embedder pointer
    Pointer(*mut ()),
    /// Heap-free callable
    LightFunc(&'static LightFuncEntry),
    /// Interned string handle
    String(StringId),
    /// Object handle
    Object(ObjectId),
    /// Buffer handle
    Buffer(BufferId),
}

impl Value {
    /// The internal "unused" sentinel.
    #[inline]
    pub const fn unused() -> Self {
        Self::Unused
    }

    /// `undefined`
    #[inline]
    pub const fn undefined() -> Self {
        Self::Undefined
    }

    /// `null`
    #[inline]
    pub const fn null() -> Self {
        Self::Null
    }

    /// Boolean value
    #[inline]
    pub const fn boolean(b: bool) -> Self {
        Self::Boolean(b)
    }

    /// Fastint value. Caller must stay within the 48-bit signed range.
    #[inline]
    pub fn fastint(i: i64) -> Self {
        debug_assert!((super::FASTINT_MIN..=super::FASTINT_MAX).contains(&i));
        Self::FastInt(i)
    }

    /// Double value. No implicit fastint demotion; apply [`Value::compact`]
    /// explicitly where wanted.
    #[inline]
    pub fn number(n: f64) -> Self {
        Self::Double(n)
    }

    /// Opaque pointer value
    #[inline]
    pub const fn pointer(p: *mut ()) -> Self {
        Self::Pointer(p)
    }

    /// Lightweight function value
    #[inline]
    pub const fn lightfunc(entry: &'static LightFuncEntry) -> Self {
        Self::LightFunc(entry)
    }

    /// String value
    #[inline]
    pub const fn string(id: StringId) -> Self {
        Self::String(id)
    }

    /// Object value
    #[inline]
    pub const fn object(id: ObjectId) -> Self {
        Self::Object(id)
    }

    /// Buffer value
    #[inline]
    pub const fn buffer(id: BufferId) -> Self {
        Self::Buffer(id)
    }

    /// Demote a double to a fastint when exactly representable.
    #[inline]
    pub fn compact(self) -> Self {
        if let Self::Double(x) = self
            && let Some(i) = double_fits_fastint(x)
        {
            return Self::FastInt(i);
        }
        self
    }

    /// Check for the internal "unused" sentinel
    #[inline]
    pub fn is_unused(&self) -> bool {
        matches!(self, Self::Unused)
    }

    /// Check for `undefined`
    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Check for `null`
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Check for `null` or `undefined`
    #[inline]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// Check for a boolean
    #[inline]
    pub fn is_boolean(&self) -> bool {
        matches!(self, Self::Boolean(_))
    }

    /// Check for a number (fastint or double)
    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self, Self::FastInt(_) | Self::Double(_))
    }

    /// Check for the fastint representation specifically
    #[inline]
    pub fn is_fastint(&self) -> bool {
        matches!(self, Self::FastInt(_))
    }

    /// Check for a pointer
    #[inline]
    pub fn is_pointer(&self) -> bool {
        matches!(self, Self::Pointer(_))
    }

    /// Check for a lightweight function
    #[inline]
    pub fn is_lightfunc(&self) -> bool {
        matches!(self, Self::LightFunc(_))
    }

    /// Check for a string
    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    /// Check for an object
    #[inline]
    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    /// Check for a buffer
    #[inline]
    pub fn is_buffer(&self) -> bool {
        matches!(self, Self::Buffer(_))
    }

    /// Get as boolean
    #[inline]
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as number; fastints widen to double
    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::FastInt(i) => Some(*i as f64),
            Self::Double(x) => Some(*x),
            _ => None,
        }
    }

    /// Get the fastint payload (only when the fastint representation is
    /// active; use [`Value::as_number`] for the logical Number value)
    #[inline]
    pub fn as_fastint(&self) -> Option<i64> {
        match self {
            Self::FastInt(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as pointer
    #[inline]
    pub fn as_pointer(&self) -> Option<*mut ()> {
        match self {
            Self::Pointer(p) => Some(*p),
            _ => None,
        }
    }

    /// Get as lightweight function
    #[inline]
    pub fn as_lightfunc(&self) -> Option<&'static LightFuncEntry> {
        match self {
            Self::LightFunc(e) => Some(e),
            _ => None,
        }
    }

    /// Get as string handle
    #[inline]
    pub fn as_string(&self) -> Option<StringId> {
        match self {
            Self::String(id) => Some(*id),
            _ => None,
        }
    }

    /// Get as object handle
    #[inline]
    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Self::Object(id) => Some(*id),
            _ => None,
        }
    }

    /// Get as buffer handle
    #[inline]
    pub fn as_buffer(&self) -> Option<BufferId> {
        match self {
            Self::Buffer(id) => Some(*id),
            _ => None,
        }
    }

    /// The heap handle for refcounted variants (string/object/buffer).
    #[inline]
    pub fn heap_id(&self) -> Option<HeapId> {
        match self {
            Self::String(id) => Some(id.heap_id()),
            Self::Object(id) => Some(id.heap_id()),
            Self::Buffer(id) => Some(id.heap_id()),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Undefined
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Unused, Self::Unused) => true,
            (Self::Undefined, Self::Undefined) => true,
            (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            // Numbers compare numerically across representations; NaN != NaN
            (a, b) if a.is_number() && b.is_number() => {
                a.as_number() == b.as_number()
            }
            (Self::Pointer(a), Self::Pointer(b)) => a == b,
            (Self::LightFunc(a), Self::LightFunc(b)) => std::ptr::eq(*a, *b),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Buffer(a), Self::Buffer(b)) => a == b,
            _ => false,
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unused => write!(f, "unused"),
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::FastInt(i) => write!(f, "{i}"),
            Self::Double(x) => write!(f, "{x}"),
            Self::Pointer(p) => write!(f, "pointer({p:?})"),
            Self::LightFunc(e) => write!(f, "lightfunc({:p})", *e),
            Self::String(id) => write!(f, "string(#{})", id.index()),
            Self::Object(id) => write!(f, "object(#{})", id.index()),
            Self::Buffer(id) => write!(f, "buffer(#{})", id.index()),
        }
    }
}
