//! Core object and value runtime for the Marten engine
//!
//! Tagged values (NaN-boxed or portable, by feature), the interned string
//! table with its char-offset cache, the heap object model, hybrid
//! refcounting plus mark-and-sweep collection with finalizers, the property
//! access protocol with exotic object dispatch and proxy traps, property
//! enumeration, and the call/construct protocol.
//!
//! Everything hangs off [`Heap`]; see its docs for the ownership rules
//! (counted returns, borrowed arguments, value-stack stabilization).

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod call;
pub mod conv;
pub mod enumeration;
pub mod error;
pub mod heap;
mod mark_sweep;
pub mod object;
pub mod property;
mod proxy;
mod refcount;
pub mod runtime;
pub mod string;
mod string_cache;
mod string_table;
pub mod value;

pub use call::{Activation, Catcher};
pub use enumeration::{Enumerator, enum_flags};
pub use error::{VmError, VmResult};
pub use heap::{Builtin, ExecutorFn, HBuffer, Heap, HeapConfig, WellKnown};
pub use object::{
    ArrayPart, BoundFuncData, BufferView, CompiledFuncData, ElemKind, HObject, NativeFuncData,
    ObjectKind, PropAttrs, PropTable, Property, PropertySlot, ProxyData, ThreadRunState,
    ThreadState,
};
pub use property::PropKey;
pub use runtime::Runtime;
pub use string::HString;
pub use value::{FASTINT_MAX, FASTINT_MIN, LightFuncEntry, LightFuncFlags, NativeFunc, Value};

pub use marten_vm_gc::{BufferId, HeapId, ObjectId, StringId};
