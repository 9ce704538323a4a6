//! The heap: arena storage, builtins, and lifecycle
//!
//! All heap-global mutable state lives on [`Heap`]: the cell arena, the
//! string intern table, the char-offset cache, the refzero worklist, and the
//! running thread's stacks. Nothing is process-global; independent heaps can
//! coexist in one process. Access is single-threaded (`&mut Heap`
//! everywhere); embeddings with OS-thread concurrency wrap the heap in
//! [`crate::runtime::Runtime`]'s coarse lock.
//!
//! Cells are addressed by arena slot indices with an intrusive free list:
//! O(1) allocate and release without walking anything, and no raw aliasing
//! pointers.

use std::collections::VecDeque;

use marten_vm_gc::{
    BOUND_CHAIN_SANITY_LIMIT, BufferId, CellHeader, CellTag, HeapId, ObjectId,
    PROTOTYPE_CHAIN_SANITY_LIMIT, StringId, flags,
};

use crate::call::{Activation, Catcher};
use crate::error::{VmError, VmResult};
use crate::object::{
    BoundFuncData, BufferView, CompiledFuncData, ElemKind, HObject, NativeFuncData,
};
use crate::string::HString;
use crate::string_cache::StringCache;
use crate::string_table::StringTable;
use crate::value::{NativeFunc, Value};

/// Heap tuning knobs.
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Objects freed through refzero between voluntary mark-and-sweep runs.
    pub gc_trigger_interval: u32,
    /// Initial string-table bucket count (must be a power of two).
    pub string_table_initial: usize,
    /// Char-offset cache entry count.
    pub string_cache_entries: usize,
    /// Prototype-chain iteration budget.
    pub prototype_chain_sanity: u32,
    /// Bound-function-chain iteration budget.
    pub bound_chain_sanity: u32,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            gc_trigger_interval: 10_000,
            string_table_initial: 128,
            string_cache_entries: 4,
            prototype_chain_sanity: PROTOTYPE_CHAIN_SANITY_LIMIT,
            bound_chain_sanity: BOUND_CHAIN_SANITY_LIMIT,
        }
    }
}

/// Bytecode dispatch hook. The executor is an external collaborator; the
/// core only routes compiled-function calls through it.
pub type ExecutorFn = fn(&mut Heap, ObjectId, Value, &[Value]) -> VmResult<Value>;

/// A raw byte buffer cell.
#[derive(Debug)]
pub struct HBuffer {
    data: Box<[u8]>,
}

impl HBuffer {
    /// Byte length.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read access.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Write access.
    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Payload of a heap cell.
#[derive(Debug)]
pub(crate) enum CellKind {
    String(HString),
    Object(HObject),
    Buffer(HBuffer),
}

/// A heap cell: common header plus payload.
#[derive(Debug)]
pub(crate) struct Cell {
    pub header: CellHeader,
    pub kind: CellKind,
}

#[derive(Debug)]
pub(crate) enum Slot {
    Free { next: Option<u32> },
    Used(Box<Cell>),
}

/// Always-present built-in singletons, created at heap bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// The global object
    Global = 0,
    /// `Object.prototype`
    ObjectPrototype,
    /// `Function.prototype`
    FunctionPrototype,
    /// `Array.prototype`
    ArrayPrototype,
    /// `String.prototype`
    StringPrototype,
    /// Shared typed-array prototype
    TypedArrayPrototype,
}

const BUILTIN_COUNT: usize = 6;

/// Interned handles of strings the core itself needs.
#[derive(Debug, Clone, Copy)]
pub struct WellKnown {
    /// `""`
    pub empty: StringId,
    /// `"length"`
    pub length: StringId,
    /// `"prototype"`
    pub prototype: StringId,
    /// `"constructor"`
    pub constructor: StringId,
    /// `"name"`
    pub name: StringId,
    /// `"caller"`
    pub caller: StringId,
    /// Hidden finalizer key (0xFF-prefixed, invisible to script)
    pub finalizer: StringId,
}

/// The heap. See the module docs.
pub struct Heap {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    pub(crate) strings: StringTable,
    pub(crate) string_cache: StringCache,
    /// FIFO refzero worklist; tail-insert, drain from head.
    pub(crate) refzero_queue: VecDeque<ObjectId>,
    /// Reentrancy guard: a nested decref queues work but never re-drains.
    pub(crate) refzero_running: bool,
    /// Mark-and-sweep is running; refzero side effects are suppressed.
    pub(crate) ms_running: bool,
    /// Decrementing voluntary-GC trigger.
    pub(crate) ms_trigger: i64,
    /// Counted temproot pins; the header bit tracks presence here.
    pub(crate) temproots: rustc_hash::FxHashMap<HeapId, u32>,
    config: HeapConfig,
    pub(crate) builtins: Vec<Value>,
    well_known: WellKnown,
    /// Running thread's value stack. Also the stabilization area: pushing a
    /// value pins its referent across re-entrant calls into user code.
    pub(crate) value_stack: Vec<Value>,
    /// Running thread's call stack.
    pub(crate) call_stack: Vec<Activation>,
    /// Running thread's catch stack.
    pub(crate) catch_stack: Vec<Catcher>,
    /// Handle of the running thread object, if threads are in use.
    pub(crate) current_thread: Option<ObjectId>,
    executor: Option<ExecutorFn>,
}

impl Heap {
    /// Create a heap with default configuration.
    pub fn new() -> VmResult<Self> {
        Self::with_config(HeapConfig::default())
    }

    /// Create a heap with explicit configuration. Bootstraps the string
    /// table, the well-known string set, and the built-in singletons.
    pub fn with_config(config: HeapConfig) -> VmResult<Self> {
        let dummy = StringId(HeapId(0));
        let mut heap = Self {
            slots: Vec::new(),
            free_head: None,
            strings: StringTable::new(config.string_table_initial),
            string_cache: StringCache::new(config.string_cache_entries),
            refzero_queue: VecDeque::new(),
            refzero_running: false,
            ms_running: false,
            ms_trigger: config.gc_trigger_interval as i64,
            temproots: rustc_hash::FxHashMap::default(),
            config,
            builtins: Vec::new(),
            // Placeholder until the strings below are interned; nothing
            // reads well_known before then.
            well_known: WellKnown {
                empty: dummy,
                length: dummy,
                prototype: dummy,
                constructor: dummy,
                name: dummy,
                caller: dummy,
                finalizer: dummy,
            },
            value_stack: Vec::new(),
            call_stack: Vec::new(),
            catch_stack: Vec::new(),
            current_thread: None,
            executor: None,
        };

        let wk = WellKnown {
            empty: heap.intern(b"")?,
            length: heap.intern(b"length")?,
            prototype: heap.intern(b"prototype")?,
            constructor: heap.intern(b"constructor")?,
            name: heap.intern(b"name")?,
            caller: heap.intern(b"caller")?,
            finalizer: heap.intern(b"\xFFfinalizer")?,
        };
        // Well-known strings are roots for the heap's lifetime.
        for id in [
            wk.empty,
            wk.length,
            wk.prototype,
            wk.constructor,
            wk.name,
            wk.caller,
            wk.finalizer,
        ] {
            heap.incref_id(id.heap_id());
        }
        heap.well_known = wk;

        // Builtin singletons. Object.prototype terminates every default
        // prototype chain.
        let object_proto = heap.alloc_object(HObject::ordinary(None))?;
        let function_proto = heap.alloc_object(HObject::ordinary(Some(object_proto)))?;
        heap.incref_id(object_proto.heap_id());
        let array_proto = heap.alloc_object(HObject::ordinary(Some(object_proto)))?;
        heap.incref_id(object_proto.heap_id());
        let string_proto = heap.alloc_object(HObject::ordinary(Some(object_proto)))?;
        heap.incref_id(object_proto.heap_id());
        let typed_array_proto = heap.alloc_object(HObject::ordinary(Some(object_proto)))?;
        heap.incref_id(object_proto.heap_id());
        let global = heap.alloc_object(HObject::ordinary(Some(object_proto)))?;
        heap.incref_id(object_proto.heap_id());

        let mut builtins = vec![Value::undefined(); BUILTIN_COUNT];
        builtins[Builtin::Global as usize] = Value::object(global);
        builtins[Builtin::ObjectPrototype as usize] = Value::object(object_proto);
        builtins[Builtin::FunctionPrototype as usize] = Value::object(function_proto);
        builtins[Builtin::ArrayPrototype as usize] = Value::object(array_proto);
        builtins[Builtin::StringPrototype as usize] = Value::object(string_proto);
        builtins[Builtin::TypedArrayPrototype as usize] = Value::object(typed_array_proto);
        for b in &builtins {
            heap.incref(*b);
        }
        heap.builtins = builtins;

        Ok(heap)
    }

    /// Heap configuration.
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Well-known string handles.
    pub fn well_known(&self) -> &WellKnown {
        &self.well_known
    }

    /// A built-in singleton value.
    pub fn builtin(&self, which: Builtin) -> Value {
        self.builtins[which as usize]
    }

    /// A built-in singleton as an object handle.
    pub fn builtin_object(&self, which: Builtin) -> ObjectId {
        // Builtins are always objects by construction.
        self.builtins[which as usize]
            .as_object()
            .unwrap_or_else(|| unreachable!("builtin is not an object"))
    }

    /// The global object.
    pub fn global_object(&self) -> ObjectId {
        self.builtin_object(Builtin::Global)
    }

    /// Install the bytecode executor hook.
    pub fn set_executor(&mut self, executor: ExecutorFn) {
        self.executor = Some(executor);
    }

    pub(crate) fn executor(&self) -> Option<ExecutorFn> {
        self.executor
    }

    // ------------------------------------------------------------------
    // Arena
    // ------------------------------------------------------------------

    pub(crate) fn alloc_cell(&mut self, cell: Cell) -> HeapId {
        let boxed = Box::new(cell);
        match self.free_head {
            Some(index) => {
                let next = match &self.slots[index as usize] {
                    Slot::Free { next } => *next,
                    Slot::Used(_) => unreachable!("free list points at a used slot"),
                };
                self.free_head = next;
                self.slots[index as usize] = Slot::Used(boxed);
                HeapId(index)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot::Used(boxed));
                HeapId(index)
            }
        }
    }

    /// Detach a cell for teardown. The slot is parked (not yet reusable)
    /// until [`Heap::release_slot`].
    pub(crate) fn take_cell(&mut self, id: HeapId) -> Box<Cell> {
        match std::mem::replace(&mut self.slots[id.index()], Slot::Free { next: None }) {
            Slot::Used(cell) => cell,
            Slot::Free { .. } => unreachable!("double free of heap cell"),
        }
    }

    /// Return a parked slot to the free list.
    pub(crate) fn release_slot(&mut self, id: HeapId) {
        self.slots[id.index()] = Slot::Free {
            next: self.free_head,
        };
        self.free_head = Some(id.0);
    }

    #[inline]
    pub(crate) fn cell(&self, id: HeapId) -> &Cell {
        match &self.slots[id.index()] {
            Slot::Used(cell) => cell,
            Slot::Free { .. } => panic!("stale heap handle #{}", id.0),
        }
    }

    #[inline]
    pub(crate) fn cell_mut(&mut self, id: HeapId) -> &mut Cell {
        match &mut self.slots[id.index()] {
            Slot::Used(cell) => cell,
            Slot::Free { .. } => panic!("stale heap handle #{}", id.0),
        }
    }

    /// Is the handle live (slot in use)?
    pub fn is_live(&self, id: HeapId) -> bool {
        matches!(self.slots.get(id.index()), Some(Slot::Used(_)))
    }

    #[inline]
    pub(crate) fn header(&self, id: HeapId) -> &CellHeader {
        &self.cell(id).header
    }

    #[inline]
    pub(crate) fn header_mut(&mut self, id: HeapId) -> &mut CellHeader {
        &mut self.cell_mut(id).header
    }

    /// Shared access to a string cell.
    #[inline]
    pub fn string(&self, id: StringId) -> &HString {
        match &self.cell(id.heap_id()).kind {
            CellKind::String(s) => s,
            _ => panic!("heap cell type confusion: expected string"),
        }
    }

    /// Shared access to an object cell.
    #[inline]
    pub fn object(&self, id: ObjectId) -> &HObject {
        match &self.cell(id.heap_id()).kind {
            CellKind::Object(o) => o,
            _ => panic!("heap cell type confusion: expected object"),
        }
    }

    /// Mutable access to an object cell.
    #[inline]
    pub fn object_mut(&mut self, id: ObjectId) -> &mut HObject {
        match &mut self.cell_mut(id.heap_id()).kind {
            CellKind::Object(o) => o,
            _ => panic!("heap cell type confusion: expected object"),
        }
    }

    /// Shared access to a buffer cell.
    #[inline]
    pub fn buffer(&self, id: BufferId) -> &HBuffer {
        match &self.cell(id.heap_id()).kind {
            CellKind::Buffer(b) => b,
            _ => panic!("heap cell type confusion: expected buffer"),
        }
    }

    /// Mutable access to a buffer cell.
    #[inline]
    pub fn buffer_mut(&mut self, id: BufferId) -> &mut HBuffer {
        match &mut self.cell_mut(id.heap_id()).kind {
            CellKind::Buffer(b) => b,
            _ => panic!("heap cell type confusion: expected buffer"),
        }
    }

    /// All live object handles (snapshot). Used by sweep and teardown.
    pub(crate) fn live_objects(&self) -> Vec<ObjectId> {
        let mut out = Vec::new();
        for (i, slot) in self.slots.iter().enumerate() {
            if let Slot::Used(cell) = slot
                && cell.header.tag() == CellTag::Object
            {
                out.push(ObjectId(HeapId(i as u32)));
            }
        }
        out
    }

    /// All live handles (snapshot).
    pub(crate) fn live_cells(&self) -> Vec<HeapId> {
        let mut out = Vec::new();
        for (i, slot) in self.slots.iter().enumerate() {
            if matches!(slot, Slot::Used(_)) {
                out.push(HeapId(i as u32));
            }
        }
        out
    }

    /// Number of live cells; test/diagnostic aid.
    pub fn live_cell_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Used(_)))
            .count()
    }

    // ------------------------------------------------------------------
    // Allocation helpers
    // ------------------------------------------------------------------

    /// Allocate an object cell. References already stored inside `obj`
    /// (prototype, kind payload) must have been counted by the caller;
    /// the `new_*` helpers below do this.
    pub fn alloc_object(&mut self, obj: HObject) -> VmResult<ObjectId> {
        let id = self.alloc_cell(Cell {
            header: CellHeader::new(CellTag::Object),
            kind: CellKind::Object(obj),
        });
        Ok(ObjectId(id))
    }

    /// Allocate a zero-filled buffer cell.
    pub fn alloc_buffer(&mut self, len: usize) -> VmResult<BufferId> {
        let id = self.alloc_cell(Cell {
            header: CellHeader::new(CellTag::Buffer),
            kind: CellKind::Buffer(HBuffer {
                data: vec![0u8; len].into_boxed_slice(),
            }),
        });
        Ok(BufferId(id))
    }

    /// Allocate a buffer cell with initial contents.
    pub fn alloc_buffer_from(&mut self, data: &[u8]) -> VmResult<BufferId> {
        let id = self.alloc_buffer(data.len())?;
        self.buffer_mut(id).bytes_mut().copy_from_slice(data);
        Ok(id)
    }

    fn default_proto(&mut self, which: Builtin) -> ObjectId {
        let proto = self.builtin_object(which);
        self.incref_id(proto.heap_id());
        proto
    }

    /// New plain object with `Object.prototype`.
    pub fn new_object(&mut self) -> VmResult<ObjectId> {
        let proto = self.default_proto(Builtin::ObjectPrototype);
        self.alloc_object(HObject::ordinary(Some(proto)))
    }

    /// New plain object with an explicit prototype.
    pub fn new_object_with_proto(&mut self, proto: Option<ObjectId>) -> VmResult<ObjectId> {
        if let Some(p) = proto {
            self.incref_id(p.heap_id());
        }
        self.alloc_object(HObject::ordinary(proto))
    }

    /// Replace an object's prototype link. No cycle detection: a cyclic
    /// chain is legal to build and is caught by the walk budget at lookup
    /// time instead.
    pub fn set_prototype(&mut self, id: ObjectId, proto: Option<ObjectId>) {
        if let Some(p) = proto {
            self.incref_id(p.heap_id());
        }
        let old = std::mem::replace(&mut self.object_mut(id).prototype, proto);
        if let Some(p) = old {
            self.decref_id(p.heap_id());
        }
    }

    /// New empty array with `Array.prototype`.
    pub fn new_array(&mut self) -> VmResult<ObjectId> {
        let proto = self.default_proto(Builtin::ArrayPrototype);
        self.alloc_object(HObject::array(Some(proto)))
    }

    /// New array with initial dense elements.
    pub fn new_array_from(&mut self, elements: &[Value]) -> VmResult<ObjectId> {
        let id = self.new_array()?;
        for v in elements {
            self.incref(*v);
        }
        let obj = self.object_mut(id);
        if let Some(part) = obj.array_part_mut() {
            part.items.extend_from_slice(elements);
            part.length = elements.len() as u32;
        }
        Ok(id)
    }

    /// New arguments object.
    pub fn new_arguments(&mut self) -> VmResult<ObjectId> {
        let proto = self.default_proto(Builtin::ObjectPrototype);
        self.alloc_object(HObject::arguments(Some(proto)))
    }

    /// New String wrapper object.
    pub fn new_string_object(&mut self, value: StringId) -> VmResult<ObjectId> {
        let proto = self.default_proto(Builtin::StringPrototype);
        self.incref_id(value.heap_id());
        self.alloc_object(HObject::string_object(Some(proto), value))
    }

    /// New typed-array view over a fresh zero-filled buffer.
    pub fn new_typed_array(&mut self, kind: ElemKind, length: usize) -> VmResult<ObjectId> {
        let byte_len = length
            .checked_mul(kind.element_size())
            .ok_or_else(|| VmError::range_error("typed array length overflow"))?;
        let buffer = self.alloc_buffer(byte_len)?;
        self.incref_id(buffer.heap_id());
        let proto = self.default_proto(Builtin::TypedArrayPrototype);
        self.alloc_object(HObject::buffer_view(
            Some(proto),
            BufferView {
                buffer,
                kind,
                byte_offset: 0,
                length,
            },
        ))
    }

    /// New typed-array view over an existing buffer.
    pub fn new_typed_array_view(
        &mut self,
        buffer: BufferId,
        kind: ElemKind,
        byte_offset: usize,
        length: usize,
    ) -> VmResult<ObjectId> {
        let needed = byte_offset
            .checked_add(
                length
                    .checked_mul(kind.element_size())
                    .ok_or_else(|| VmError::range_error("typed array length overflow"))?,
            )
            .ok_or_else(|| VmError::range_error("typed array length overflow"))?;
        if byte_offset % kind.element_size() != 0 {
            return Err(VmError::range_error(
                "byte offset must be aligned to element size",
            ));
        }
        if needed > self.buffer(buffer).len() {
            return Err(VmError::range_error("typed array out of buffer bounds"));
        }
        self.incref_id(buffer.heap_id());
        let proto = self.default_proto(Builtin::TypedArrayPrototype);
        self.alloc_object(HObject::buffer_view(
            Some(proto),
            BufferView {
                buffer,
                kind,
                byte_offset,
                length,
            },
        ))
    }

    /// New native function object.
    pub fn new_native_function(
        &mut self,
        func: NativeFunc,
        nargs: u8,
        magic: i16,
    ) -> VmResult<ObjectId> {
        let proto = self.default_proto(Builtin::FunctionPrototype);
        self.alloc_object(HObject::native_function(
            Some(proto),
            NativeFuncData { func, nargs, magic },
        ))
    }

    /// New compiled function object. Counts the references in `data`.
    pub fn new_compiled_function(&mut self, data: CompiledFuncData) -> VmResult<ObjectId> {
        for v in data.consts.iter().chain(data.inner_funcs.iter()) {
            self.incref(*v);
        }
        if let Some(code) = data.code {
            self.incref_id(code.heap_id());
        }
        let proto = self.default_proto(Builtin::FunctionPrototype);
        self.alloc_object(HObject::compiled_function(Some(proto), data))
    }

    /// New bound function wrapping `target`.
    pub fn new_bound_function(
        &mut self,
        target: Value,
        bound_this: Value,
        bound_args: &[Value],
    ) -> VmResult<ObjectId> {
        self.incref(target);
        self.incref(bound_this);
        for arg in bound_args {
            self.incref(*arg);
        }
        let proto = self.default_proto(Builtin::FunctionPrototype);
        self.alloc_object(HObject::bound_function(
            Some(proto),
            BoundFuncData {
                target,
                bound_this,
                bound_args: bound_args.to_vec(),
            },
        ))
    }

    /// New proxy. Target and handler must be objects.
    pub fn new_proxy(&mut self, target: Value, handler: Value) -> VmResult<ObjectId> {
        if !target.is_object() || !handler.is_object() {
            return Err(VmError::type_error(
                "Proxy target and handler must be objects",
            ));
        }
        self.incref(target);
        self.incref(handler);
        self.alloc_object(HObject::proxy(target, handler))
    }

    /// New suspended thread object.
    pub fn new_thread(&mut self) -> VmResult<ObjectId> {
        let proto = self.default_proto(Builtin::ObjectPrototype);
        self.alloc_object(HObject::thread(Some(proto)))
    }

    // ------------------------------------------------------------------
    // Value stack (stabilization area)
    // ------------------------------------------------------------------

    /// Push a value onto the running thread's value stack, counting the
    /// reference. This is the stabilization primitive: a pushed value's
    /// referent cannot be freed until the matching [`Heap::pop`].
    pub fn push(&mut self, v: Value) {
        self.incref(v);
        self.value_stack.push(v);
    }

    /// Pop and release the top of the value stack.
    pub fn pop(&mut self) {
        if let Some(v) = self.value_stack.pop() {
            self.decref(v);
        }
    }

    /// Current value stack depth.
    pub fn stack_depth(&self) -> usize {
        self.value_stack.len()
    }

    /// Pop back down to a recorded depth, releasing everything above it.
    pub(crate) fn truncate_stack(&mut self, depth: usize) {
        while self.value_stack.len() > depth {
            self.pop();
        }
    }
}

impl Drop for Heap {
    /// Heap teardown runs every remaining finalizer, even on reachable
    /// objects, so native resources get cleaned up on engine shutdown;
    /// storage is then released wholesale.
    fn drop(&mut self) {
        let objects = self.live_objects();
        for id in objects {
            if !self.is_live(id.heap_id()) {
                continue;
            }
            let header = self.header(id.heap_id());
            if header.has(flags::HAVE_FINALIZER) && !header.has(flags::FINALIZED) {
                self.run_finalizer(id);
            }
        }
        // Cell storage, stacks and tables drop with the struct.
    }
}
