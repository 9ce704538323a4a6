//! Reference counting and refzero processing
//!
//! Values are plain `Copy` data; ownership is explicit through
//! [`Heap::incref`] / [`Heap::decref`]. When an object's count reaches zero
//! it is appended to a FIFO worklist and torn down iteratively, so freeing
//! an arbitrarily long chain of objects uses constant native stack.
//! Strings and buffers reference no other cells and are freed immediately.
//!
//! Finalizers run from the worklist with the object's count artificially
//! held at one; if user code stores the object somewhere during the call,
//! the count stays positive afterwards and the object is rescued. The
//! `FINALIZED` bit survives a rescue, so a finalizer runs at most once per
//! object.

use marten_vm_gc::{CellTag, HeapId, ObjectId, StringId, flags};

use crate::heap::Heap;
use crate::object::PropertySlot;
use crate::value::Value;

impl Heap {
    /// Count a reference to `v`'s referent, if it has one.
    #[inline]
    pub fn incref(&mut self, v: Value) {
        if let Some(id) = v.heap_id() {
            self.incref_id(id);
        }
    }

    /// Release a reference to `v`'s referent, if it has one.
    #[inline]
    pub fn decref(&mut self, v: Value) {
        if let Some(id) = v.heap_id() {
            self.decref_id(id);
        }
    }

    /// Count a reference by handle.
    #[inline]
    pub fn incref_id(&mut self, id: HeapId) {
        self.header_mut(id).incref();
    }

    /// Release a reference by handle, processing refzero when the count
    /// reaches zero.
    pub fn decref_id(&mut self, id: HeapId) {
        if self.header_mut(id).decref() != 0 {
            return;
        }
        // Mark-and-sweep owns all freeing while it runs; counts still
        // decrement above, but zero triggers nothing.
        if self.ms_running {
            return;
        }
        match self.header(id).tag() {
            CellTag::String => self.free_string(StringId(id)),
            CellTag::Buffer => self.free_buffer_cell(id),
            CellTag::Object => self.refzero_object(ObjectId(id)),
        }
    }

    /// Current reference count of a handle; test/diagnostic aid.
    pub fn refcount(&self, id: HeapId) -> u32 {
        self.header(id).refcount()
    }

    // ------------------------------------------------------------------
    // Immediate frees
    // ------------------------------------------------------------------

    fn free_string(&mut self, id: StringId) {
        self.unlink_string(id);
        self.string_cache.invalidate(id);
        let cell = self.take_cell(id.heap_id());
        drop(cell);
        self.release_slot(id.heap_id());
        self.note_free();
    }

    fn free_buffer_cell(&mut self, id: HeapId) {
        let cell = self.take_cell(id);
        drop(cell);
        self.release_slot(id);
        self.note_free();
    }

    // ------------------------------------------------------------------
    // Refzero worklist
    // ------------------------------------------------------------------

    fn refzero_object(&mut self, id: ObjectId) {
        {
            let header = self.header_mut(id.heap_id());
            if header.has(flags::QUEUED) {
                return;
            }
            header.set(flags::QUEUED);
        }
        self.refzero_queue.push_back(id);
        // A nested decref (from a finalizer or a teardown) only queues;
        // the outermost call drains.
        if self.refzero_running {
            return;
        }
        self.refzero_running = true;
        while let Some(id) = self.refzero_queue.pop_front() {
            self.refzero_step(id);
        }
        self.refzero_running = false;
        self.maybe_collect();
    }

    fn refzero_step(&mut self, id: ObjectId) {
        {
            let header = self.header_mut(id.heap_id());
            header.clear(flags::QUEUED);
            // Resurrected while queued.
            if header.refcount() > 0 {
                return;
            }
        }

        let header = self.header(id.heap_id());
        if header.has(flags::HAVE_FINALIZER) && !header.has(flags::FINALIZED) {
            // Hold the object alive across the finalizer call.
            self.header_mut(id.heap_id()).set_refcount(1);
            self.run_finalizer(id);
            let rc = self.header(id.heap_id()).refcount();
            if rc > 1 {
                // Rescued. FINALIZED stays set; a later death skips the
                // finalizer and frees directly.
                self.header_mut(id.heap_id()).set_refcount(rc - 1);
                return;
            }
            self.header_mut(id.heap_id()).set_refcount(0);
        }

        self.teardown_object(id);
    }

    /// Free an object cell, releasing its outgoing references. Child
    /// objects that die land on the worklist; the caller's drain loop
    /// picks them up.
    pub(crate) fn teardown_object(&mut self, id: ObjectId) {
        let cell = self.take_cell(id.heap_id());
        let crate::heap::CellKind::Object(obj) = &cell.kind else {
            unreachable!("refzero teardown of non-object cell");
        };
        for child in obj.collect_refs() {
            self.decref(child);
        }
        drop(cell);
        self.release_slot(id.heap_id());
        self.note_free();
    }

    // ------------------------------------------------------------------
    // Finalizers
    // ------------------------------------------------------------------

    /// Install or remove an object's finalizer. The finalizer is stored
    /// under a hidden key and mirrored into a header flag so refzero can
    /// check it without a property lookup.
    pub fn set_finalizer(&mut self, id: ObjectId, finalizer: Value) {
        let key = self.well_known().finalizer;
        if finalizer.is_undefined() || finalizer.is_null() {
            if let Some(prop) = self.object_mut(id).props.shift_remove(&key) {
                self.decref_id(key.heap_id());
                self.release_property(prop);
            }
            self.header_mut(id.heap_id()).clear(flags::HAVE_FINALIZER);
            return;
        }
        self.incref(finalizer);
        let old = self
            .object_mut(id)
            .props
            .insert(key, crate::object::Property::data(finalizer));
        match old {
            Some(prop) => self.release_property(prop),
            None => self.incref_id(key.heap_id()),
        }
        let header = self.header_mut(id.heap_id());
        header.set(flags::HAVE_FINALIZER);
        // Re-arming a finalizer makes it eligible to run again.
        header.clear(flags::FINALIZED);
    }

    pub(crate) fn release_property(&mut self, prop: crate::object::Property) {
        match prop.slot {
            PropertySlot::Data(v) => self.decref(v),
            PropertySlot::Accessor { get, set } => {
                self.decref(get);
                self.decref(set);
            }
        }
    }

    /// Invoke an object's finalizer, swallowing errors. The caller has
    /// already arranged for the object to stay alive during the call.
    pub(crate) fn run_finalizer(&mut self, id: ObjectId) {
        self.header_mut(id.heap_id()).set(flags::FINALIZED);
        let key = self.well_known().finalizer;
        let func = match self.object(id).props.get(&key) {
            Some(prop) => match prop.slot.data() {
                Some(v) => v,
                None => return,
            },
            None => return,
        };
        let callable = func.is_lightfunc()
            || func
                .as_object()
                .is_some_and(|f| self.object(f).is_callable());
        if !callable {
            return;
        }
        // The finalizer may drop the property that owns `func`.
        self.push(func);
        let args = [Value::object(id)];
        if let Err(err) = self.call(func, Value::undefined(), &args) {
            tracing::warn!(object = id.index(), error = %err, "finalizer raised, ignoring");
        } else {
            tracing::trace!(object = id.index(), "finalizer completed");
        }
        self.pop();
    }

    // ------------------------------------------------------------------
    // Voluntary GC trigger
    // ------------------------------------------------------------------

    #[inline]
    pub(crate) fn note_free(&mut self) {
        self.ms_trigger -= 1;
    }

    fn maybe_collect(&mut self) {
        if self.ms_trigger <= 0 && !self.ms_running {
            self.collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;

    #[test]
    fn test_string_freed_at_zero() {
        let mut heap = Heap::new().unwrap();
        let baseline = heap.live_cell_count();
        let s = heap.intern(b"ephemeral-string").unwrap();
        heap.incref_id(s.heap_id());
        assert_eq!(heap.live_cell_count(), baseline + 1);
        heap.decref_id(s.heap_id());
        assert_eq!(heap.live_cell_count(), baseline);
    }

    #[test]
    fn test_chain_teardown_is_iterative() {
        let mut heap = Heap::new().unwrap();
        let baseline = heap.live_cell_count();
        // head -> o1 -> o2 -> ... as prototype links; dropping the head
        // must free the whole chain without recursing.
        let mut proto: Option<marten_vm_gc::ObjectId> = None;
        for _ in 0..10_000 {
            let o = heap.new_object_with_proto(proto).unwrap();
            if let Some(p) = proto {
                // Transfer ownership of the previous link into the chain.
                heap.decref_id(p.heap_id());
            }
            heap.incref_id(o.heap_id());
            proto = Some(o);
        }
        let head = proto.unwrap();
        heap.decref_id(head.heap_id());
        assert_eq!(heap.live_cell_count(), baseline);
    }

    #[test]
    fn test_refzero_frees_object() {
        let mut heap = Heap::new().unwrap();
        let o = heap.new_object().unwrap();
        heap.incref_id(o.heap_id());
        heap.incref_id(o.heap_id());
        heap.decref_id(o.heap_id());
        assert_eq!(heap.refcount(o.heap_id()), 1);
        heap.decref_id(o.heap_id());
        assert!(!heap.is_live(o.heap_id()));
    }
}
