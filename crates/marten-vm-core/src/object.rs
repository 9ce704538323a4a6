//! Heap object model
//!
//! All object flavors share one structure: a prototype link, an extensible
//! flag, an insertion-ordered property table, and a kind payload carrying
//! the per-type ("exotic") state: the dense items vector of arrays, the
//! wrapped string of String objects, buffer views, function data, proxy
//! target/handler pairs, and parked coroutine stacks.

use indexmap::IndexMap;
use marten_vm_gc::{BufferId, ObjectId, StringId};
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;

use crate::call::{Activation, Catcher};
use crate::value::{NativeFunc, Value};

/// Property attribute bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PropAttrs(u8);

impl PropAttrs {
    /// Value may be replaced through `[[Put]]`.
    pub const WRITABLE: u8 = 1 << 0;
    /// Visible to for-in / `Object.keys`.
    pub const ENUMERABLE: u8 = 1 << 1;
    /// May be deleted or redefined.
    pub const CONFIGURABLE: u8 = 1 << 2;

    /// Writable + enumerable + configurable: a plain data property.
    pub const DATA: Self = Self(Self::WRITABLE | Self::ENUMERABLE | Self::CONFIGURABLE);
    /// No attributes set.
    pub const NONE: Self = Self(0);
    /// Writable + configurable, not enumerable.
    pub const DATA_NON_ENUMERABLE: Self = Self(Self::WRITABLE | Self::CONFIGURABLE);

    /// Build from raw bits.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Test a bit.
    #[inline]
    pub const fn has(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    /// Writable?
    #[inline]
    pub const fn writable(self) -> bool {
        self.has(Self::WRITABLE)
    }

    /// Enumerable?
    #[inline]
    pub const fn enumerable(self) -> bool {
        self.has(Self::ENUMERABLE)
    }

    /// Configurable?
    #[inline]
    pub const fn configurable(self) -> bool {
        self.has(Self::CONFIGURABLE)
    }
}

/// A property value slot: plain data or accessor pair.
///
/// Absent getter/setter halves are `Value::unused()`.
#[derive(Debug, Clone, Copy)]
pub enum PropertySlot {
    /// Data property
    Data(Value),
    /// Accessor property
    Accessor {
        /// Getter, or unused
        get: Value,
        /// Setter, or unused
        set: Value,
    },
}

impl PropertySlot {
    /// Data value, if this is a data slot.
    pub fn data(&self) -> Option<Value> {
        match self {
            Self::Data(v) => Some(*v),
            Self::Accessor { .. } => None,
        }
    }

    /// Is this an accessor slot?
    pub fn is_accessor(&self) -> bool {
        matches!(self, Self::Accessor { .. })
    }
}

/// One own property: slot plus attributes.
#[derive(Debug, Clone, Copy)]
pub struct Property {
    /// Data value or accessor pair
    pub slot: PropertySlot,
    /// Attribute bits
    pub attrs: PropAttrs,
}

impl Property {
    /// Plain writable/enumerable/configurable data property.
    pub fn data(value: Value) -> Self {
        Self {
            slot: PropertySlot::Data(value),
            attrs: PropAttrs::DATA,
        }
    }

    /// Data property with explicit attributes.
    pub fn data_with_attrs(value: Value, attrs: PropAttrs) -> Self {
        Self {
            slot: PropertySlot::Data(value),
            attrs,
        }
    }

    /// Accessor property.
    pub fn accessor(get: Value, set: Value, attrs: PropAttrs) -> Self {
        Self {
            slot: PropertySlot::Accessor { get, set },
            attrs,
        }
    }
}

/// Insertion-ordered own property table, keyed by interned string handles.
///
/// Interning makes key comparison handle equality, so the hash is cheap and
/// the map stays O(1) at any size; insertion order is what string-keyed
/// enumeration must produce.
pub type PropTable = IndexMap<StringId, Property, FxBuildHasher>;

/// Dense array storage: contiguous items plus the virtual `length`.
///
/// Holes are `Value::unused()`. Indices beyond the dense part live in the
/// generic property table as interned index strings.
#[derive(Debug, Default)]
pub struct ArrayPart {
    /// Dense items; `items[i]` is index `i`
    pub items: Vec<Value>,
    /// Virtual `length` slot (not a stored property)
    pub length: u32,
}

/// Element type of a buffer view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemKind {
    /// 8-bit unsigned
    Uint8,
    /// 8-bit unsigned, clamped stores
    Uint8Clamped,
    /// 8-bit signed
    Int8,
    /// 16-bit unsigned
    Uint16,
    /// 16-bit signed
    Int16,
    /// 32-bit unsigned
    Uint32,
    /// 32-bit signed
    Int32,
    /// 32-bit float
    Float32,
    /// 64-bit float
    Float64,
}

impl ElemKind {
    /// Element size in bytes.
    pub fn element_size(self) -> usize {
        match self {
            Self::Uint8 | Self::Uint8Clamped | Self::Int8 => 1,
            Self::Uint16 | Self::Int16 => 2,
            Self::Uint32 | Self::Int32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    /// Constructor name for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Self::Uint8 => "Uint8Array",
            Self::Uint8Clamped => "Uint8ClampedArray",
            Self::Int8 => "Int8Array",
            Self::Uint16 => "Uint16Array",
            Self::Int16 => "Int16Array",
            Self::Uint32 => "Uint32Array",
            Self::Int32 => "Int32Array",
            Self::Float32 => "Float32Array",
            Self::Float64 => "Float64Array",
        }
    }
}

/// A typed view over a byte buffer.
#[derive(Debug, Clone, Copy)]
pub struct BufferView {
    /// Backing buffer cell
    pub buffer: BufferId,
    /// Element type
    pub kind: ElemKind,
    /// Byte offset of element 0 into the buffer
    pub byte_offset: usize,
    /// View length in elements (not bytes)
    pub length: usize,
}

/// Native function payload.
pub struct NativeFuncData {
    /// The handler
    pub func: NativeFunc,
    /// Declared argument count (`0xFF` = varargs)
    pub nargs: u8,
    /// Magic value available to the handler
    pub magic: i16,
}

impl std::fmt::Debug for NativeFuncData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFuncData")
            .field("nargs", &self.nargs)
            .field("magic", &self.magic)
            .finish()
    }
}

/// Compiled function payload. The bytecode itself is opaque to this core;
/// dispatch goes through the heap's executor hook.
#[derive(Debug, Default)]
pub struct CompiledFuncData {
    /// Constant pool (owned references)
    pub consts: Vec<Value>,
    /// Inner function templates (owned references)
    pub inner_funcs: Vec<Value>,
    /// Bytecode buffer
    pub code: Option<BufferId>,
    /// Declared argument count
    pub nargs: u16,
    /// Register file size
    pub nregs: u16,
    /// Strict-mode code
    pub strict: bool,
}

/// Bound function payload: target chain link plus pre-bound this/args.
#[derive(Debug)]
pub struct BoundFuncData {
    /// Bound call target (callable; possibly another bound function)
    pub target: Value,
    /// Pre-bound `this`
    pub bound_this: Value,
    /// Pre-bound leading arguments
    pub bound_args: Vec<Value>,
}

/// Proxy payload.
#[derive(Debug)]
pub struct ProxyData {
    /// Proxied target object
    pub target: Value,
    /// Handler object holding the traps
    pub handler: Value,
}

/// Execution state of a green thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadRunState {
    /// Never resumed or currently suspended
    Suspended,
    /// Currently executing (its stacks are swapped onto the heap)
    Running,
    /// Finished; cannot be resumed again
    Terminated,
}

/// A green-thread coroutine: parked stack set plus resume bookkeeping.
///
/// The *running* thread's stacks live directly on the heap; suspension swaps
/// them back in here. Threads never run in parallel.
#[derive(Debug, Default)]
pub struct ThreadState {
    /// Parked value stack (owned references)
    pub value_stack: Vec<Value>,
    /// Parked call stack
    pub call_stack: Vec<Activation>,
    /// Parked catch stack
    pub catch_stack: Vec<Catcher>,
    /// Thread that resumed this one, for yield routing
    pub resumer: Option<ObjectId>,
    /// Run state
    pub state: ThreadRunState,
}

impl Default for ThreadRunState {
    fn default() -> Self {
        Self::Suspended
    }
}

/// Per-type payload of a heap object.
#[derive(Debug)]
pub enum ObjectKind {
    /// Plain object
    Ordinary,
    /// Array with dense item storage and a virtual `length`
    Array(ArrayPart),
    /// Arguments object (ordinary storage; register aliasing is the
    /// executor's concern)
    Arguments,
    /// String wrapper: virtual `length` and read-only char indices
    StringObject(StringId),
    /// Typed-array view over a buffer
    BufferView(BufferView),
    /// Native function
    NativeFunction(NativeFuncData),
    /// Compiled function (dispatched through the executor hook)
    CompiledFunction(CompiledFuncData),
    /// Bound function wrapper
    BoundFunction(BoundFuncData),
    /// Proxy with handler traps
    Proxy(ProxyData),
    /// Green-thread coroutine
    Thread(Box<ThreadState>),
}

/// A heap object.
#[derive(Debug)]
pub struct HObject {
    /// Internal prototype (owned reference), or none
    pub prototype: Option<ObjectId>,
    /// New own properties may be added
    pub extensible: bool,
    /// Own properties in insertion order
    pub props: PropTable,
    /// Per-type payload
    pub kind: ObjectKind,
}

impl HObject {
    fn with_kind(prototype: Option<ObjectId>, kind: ObjectKind) -> Self {
        Self {
            prototype,
            extensible: true,
            props: PropTable::default(),
            kind,
        }
    }

    /// Plain object.
    pub fn ordinary(prototype: Option<ObjectId>) -> Self {
        Self::with_kind(prototype, ObjectKind::Ordinary)
    }

    /// Array with an empty dense part.
    pub fn array(prototype: Option<ObjectId>) -> Self {
        Self::with_kind(prototype, ObjectKind::Array(ArrayPart::default()))
    }

    /// Arguments object.
    pub fn arguments(prototype: Option<ObjectId>) -> Self {
        Self::with_kind(prototype, ObjectKind::Arguments)
    }

    /// String wrapper object.
    pub fn string_object(prototype: Option<ObjectId>, value: StringId) -> Self {
        Self::with_kind(prototype, ObjectKind::StringObject(value))
    }

    /// Typed-array view.
    pub fn buffer_view(prototype: Option<ObjectId>, view: BufferView) -> Self {
        Self::with_kind(prototype, ObjectKind::BufferView(view))
    }

    /// Native function object.
    pub fn native_function(prototype: Option<ObjectId>, data: NativeFuncData) -> Self {
        Self::with_kind(prototype, ObjectKind::NativeFunction(data))
    }

    /// Compiled function object.
    pub fn compiled_function(prototype: Option<ObjectId>, data: CompiledFuncData) -> Self {
        Self::with_kind(prototype, ObjectKind::CompiledFunction(data))
    }

    /// Bound function object.
    pub fn bound_function(prototype: Option<ObjectId>, data: BoundFuncData) -> Self {
        Self::with_kind(prototype, ObjectKind::BoundFunction(data))
    }

    /// Proxy object.
    pub fn proxy(target: Value, handler: Value) -> Self {
        // A proxy has no prototype of its own; the walk continues through
        // the target.
        Self::with_kind(None, ObjectKind::Proxy(ProxyData { target, handler }))
    }

    /// Suspended thread object.
    pub fn thread(prototype: Option<ObjectId>) -> Self {
        Self::with_kind(prototype, ObjectKind::Thread(Box::default()))
    }

    /// Is this object callable?
    pub fn is_callable(&self) -> bool {
        matches!(
            self.kind,
            ObjectKind::NativeFunction(_)
                | ObjectKind::CompiledFunction(_)
                | ObjectKind::BoundFunction(_)
        )
    }

    /// Dense array part, if this is an array.
    pub fn array_part(&self) -> Option<&ArrayPart> {
        match &self.kind {
            ObjectKind::Array(part) => Some(part),
            _ => None,
        }
    }

    /// Mutable dense array part.
    pub fn array_part_mut(&mut self) -> Option<&mut ArrayPart> {
        match &mut self.kind {
            ObjectKind::Array(part) => Some(part),
            _ => None,
        }
    }

    /// Class name for diagnostics and TypeError messages.
    pub fn class_name(&self) -> &'static str {
        match &self.kind {
            ObjectKind::Ordinary => "Object",
            ObjectKind::Array(_) => "Array",
            ObjectKind::Arguments => "Arguments",
            ObjectKind::StringObject(_) => "String",
            ObjectKind::BufferView(view) => view.kind.name(),
            ObjectKind::NativeFunction(_)
            | ObjectKind::CompiledFunction(_)
            | ObjectKind::BoundFunction(_) => "Function",
            ObjectKind::Proxy(_) => "Proxy",
            ObjectKind::Thread(_) => "Thread",
        }
    }

    /// Visit every owned heap reference of this object: the prototype,
    /// property keys and slots, and all kind-specific references.
    ///
    /// This single walk backs both mark-and-sweep marking and the shared
    /// teardown routine, so the two can never disagree about ownership.
    pub(crate) fn for_each_ref(&self, f: &mut dyn FnMut(Value)) {
        if let Some(proto) = self.prototype {
            f(Value::object(proto));
        }
        for (key, prop) in &self.props {
            f(Value::string(*key));
            match prop.slot {
                PropertySlot::Data(v) => f(v),
                PropertySlot::Accessor { get, set } => {
                    f(get);
                    f(set);
                }
            }
        }
        match &self.kind {
            ObjectKind::Ordinary | ObjectKind::Arguments => {}
            ObjectKind::Array(part) => {
                for item in &part.items {
                    f(*item);
                }
            }
            ObjectKind::StringObject(s) => f(Value::string(*s)),
            ObjectKind::BufferView(view) => f(Value::buffer(view.buffer)),
            ObjectKind::NativeFunction(_) => {}
            ObjectKind::CompiledFunction(data) => {
                for c in &data.consts {
                    f(*c);
                }
                for inner in &data.inner_funcs {
                    f(*inner);
                }
                if let Some(code) = data.code {
                    f(Value::buffer(code));
                }
            }
            ObjectKind::BoundFunction(data) => {
                f(data.target);
                f(data.bound_this);
                for arg in &data.bound_args {
                    f(*arg);
                }
            }
            ObjectKind::Proxy(data) => {
                f(data.target);
                f(data.handler);
            }
            ObjectKind::Thread(state) => {
                for v in &state.value_stack {
                    f(*v);
                }
                for act in &state.call_stack {
                    act.for_each_ref(f);
                }
                for catcher in &state.catch_stack {
                    catcher.for_each_ref(f);
                }
                if let Some(resumer) = state.resumer {
                    f(Value::object(resumer));
                }
            }
        }
    }

    /// Collect the owned references into a buffer (teardown convenience;
    /// the object is about to be destroyed, so ordering does not matter
    /// beyond FIFO queueing in the refzero worklist).
    pub(crate) fn collect_refs(&self) -> SmallVec<[Value; 16]> {
        let mut out = SmallVec::new();
        self.for_each_ref(&mut |v| out.push(v));
        out
    }
}
