//! Mark-and-sweep collector
//!
//! The backstop for reference cycles. Marking walks from the roots (built-in
//! singletons, well-known strings, the running thread's stacks, temproots)
//! with an explicit gray stack, so deeply nested structures never recurse.
//!
//! Unreachable objects with an un-run finalizer get their finalizer invoked
//! before anything is freed; because a finalizer can make its object (or
//! anything else) reachable again, marking restarts after each finalizer
//! round until no such object remains. Only then does the sweep free cells.
//!
//! The intern table holds strings weakly: a string nobody reachable points
//! at is swept, and its table and char-cache entries are dropped with it.
//! Reachability is what keeps a cell alive here; a raw reference count with
//! no reachable owner does not protect a cell from the sweep, which is why
//! transient values must sit on the value stack or carry a temproot bit.

use marten_vm_gc::{CellTag, HeapId, ObjectId, StringId, flags};

use crate::heap::Heap;

impl Heap {
    /// Run a full mark-and-sweep collection.
    pub fn collect(&mut self) {
        if self.ms_running {
            return;
        }
        self.ms_running = true;
        let before = self.live_cell_count();
        tracing::debug!(live = before, "mark-and-sweep start");

        // Finalizer rounds: mark, run finalizers of doomed objects, and
        // re-mark until the doomed set is finalizer-free.
        loop {
            self.mark_all();
            let pending = self.doomed_with_finalizers();
            if pending.is_empty() {
                break;
            }
            tracing::debug!(count = pending.len(), "running finalizers for unreachable objects");
            for id in &pending {
                self.header_mut(id.heap_id()).set(flags::FINALIZABLE);
            }
            for id in pending {
                // Sets FINALIZED, so each object appears in at most one round.
                self.run_finalizer(id);
                self.header_mut(id.heap_id()).clear(flags::FINALIZABLE);
            }
        }

        let freed = self.sweep();

        // Clear mark bits on survivors and drop dead worklist entries.
        for id in self.live_cells() {
            self.header_mut(id).clear(flags::REACHABLE);
        }
        let queue = std::mem::take(&mut self.refzero_queue);
        self.refzero_queue = queue.into_iter().filter(|id| self.is_live(id.heap_id())).collect();

        self.ms_trigger = self.config().gc_trigger_interval as i64;
        self.ms_running = false;
        tracing::debug!(freed, live = before - freed, "mark-and-sweep done");
    }

    /// Pin a cell as a GC root. Pins nest: each add needs a matching
    /// [`Heap::temproot_remove`]. Used for references held outside any
    /// heap-visible structure (enumerator snapshots, host handles).
    pub fn temproot_add(&mut self, id: HeapId) {
        let count = {
            let n = self.temproots.entry(id).or_insert(0);
            *n += 1;
            *n
        };
        if count == 1 {
            self.header_mut(id).set(flags::TEMPROOT);
        }
    }

    /// Drop one temproot pin.
    pub fn temproot_remove(&mut self, id: HeapId) {
        let count = match self.temproots.get_mut(&id) {
            Some(n) => {
                *n -= 1;
                *n
            }
            None => {
                debug_assert!(false, "unbalanced temproot remove");
                return;
            }
        };
        if count == 0 {
            self.temproots.remove(&id);
            if self.is_live(id) {
                self.header_mut(id).clear(flags::TEMPROOT);
            }
        }
    }

    // ------------------------------------------------------------------
    // Marking
    // ------------------------------------------------------------------

    fn mark_all(&mut self) {
        let all = self.live_cells();
        for id in &all {
            self.header_mut(*id).clear(flags::REACHABLE);
        }

        let mut gray: Vec<HeapId> = Vec::new();

        let wk = *self.well_known();
        for id in [
            wk.empty,
            wk.length,
            wk.prototype,
            wk.constructor,
            wk.name,
            wk.caller,
            wk.finalizer,
        ] {
            gray.push(id.heap_id());
        }
        for v in &self.builtins {
            if let Some(id) = v.heap_id() {
                gray.push(id);
            }
        }
        for v in &self.value_stack {
            if let Some(id) = v.heap_id() {
                gray.push(id);
            }
        }
        let mut stack_refs = Vec::new();
        for act in &self.call_stack {
            act.for_each_ref(&mut |v| {
                if let Some(id) = v.heap_id() {
                    stack_refs.push(id);
                }
            });
        }
        for catcher in &self.catch_stack {
            catcher.for_each_ref(&mut |v| {
                if let Some(id) = v.heap_id() {
                    stack_refs.push(id);
                }
            });
        }
        gray.extend(stack_refs);
        if let Some(thread) = self.current_thread {
            gray.push(thread.heap_id());
        }
        for id in &all {
            if self.header(*id).has(flags::TEMPROOT) {
                gray.push(*id);
            }
        }

        while let Some(id) = gray.pop() {
            if !self.is_live(id) {
                continue;
            }
            {
                let header = self.header_mut(id);
                if header.has(flags::REACHABLE) {
                    continue;
                }
                header.set(flags::REACHABLE);
            }
            if self.header(id).tag() == CellTag::Object {
                for child in self.object(ObjectId(id)).collect_refs() {
                    if let Some(cid) = child.heap_id() {
                        gray.push(cid);
                    }
                }
            }
        }
    }

    fn doomed_with_finalizers(&self) -> Vec<ObjectId> {
        let mut out = Vec::new();
        for id in self.live_objects() {
            let header = self.header(id.heap_id());
            if !header.has(flags::REACHABLE)
                && header.has(flags::HAVE_FINALIZER)
                && !header.has(flags::FINALIZED)
            {
                out.push(id);
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // Sweeping
    // ------------------------------------------------------------------

    fn sweep(&mut self) -> usize {
        let all = self.live_cells();

        // Pass 1: release references doomed objects hold on survivors so
        // their counts stay exact. Refzero stays suppressed (`ms_running`).
        for id in &all {
            if self.header(*id).has(flags::REACHABLE) {
                continue;
            }
            if self.header(*id).tag() == CellTag::Object {
                for child in self.object(ObjectId(*id)).collect_refs() {
                    if let Some(cid) = child.heap_id()
                        && self.header(cid).has(flags::REACHABLE)
                    {
                        self.decref_id(cid);
                    }
                }
            }
        }

        // Pass 2: free doomed cells.
        let mut freed = 0;
        for id in &all {
            if self.header(*id).has(flags::REACHABLE) {
                continue;
            }
            if self.header(*id).tag() == CellTag::String {
                self.unlink_string(StringId(*id));
                self.string_cache.invalidate(StringId(*id));
            }
            let cell = self.take_cell(*id);
            drop(cell);
            self.release_slot(*id);
            freed += 1;
        }
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Property;
    use crate::value::Value;

    #[test]
    fn test_cycle_collected() {
        let mut heap = Heap::new().unwrap();
        let baseline = heap.live_cell_count();

        let a = heap.new_object().unwrap();
        let b = heap.new_object().unwrap();
        let key = heap.intern(b"peer").unwrap();
        heap.incref_id(key.heap_id());
        heap.incref_id(key.heap_id());
        heap.incref_id(b.heap_id());
        heap.object_mut(a).props.insert(key, Property::data(Value::object(b)));
        heap.incref_id(a.heap_id());
        heap.object_mut(b).props.insert(key, Property::data(Value::object(a)));

        // Each object is kept alive only by the other; refcounting alone
        // can never free the pair.
        assert!(heap.refcount(a.heap_id()) > 0);
        assert!(heap.refcount(b.heap_id()) > 0);
        assert!(heap.live_cell_count() > baseline);

        heap.collect();
        assert_eq!(heap.live_cell_count(), baseline);
    }

    #[test]
    fn test_value_stack_roots_survive() {
        let mut heap = Heap::new().unwrap();
        let o = heap.new_object().unwrap();
        heap.push(Value::object(o));
        heap.collect();
        assert!(heap.is_live(o.heap_id()));
        heap.pop();
        heap.collect();
        assert!(!heap.is_live(o.heap_id()));
    }

    #[test]
    fn test_temproot_pins() {
        let mut heap = Heap::new().unwrap();
        let o = heap.new_object().unwrap();
        heap.temproot_add(o.heap_id());
        heap.collect();
        assert!(heap.is_live(o.heap_id()));
        heap.temproot_remove(o.heap_id());
        heap.collect();
        assert!(!heap.is_live(o.heap_id()));
    }

    #[test]
    fn test_unreachable_string_swept_from_table() {
        let mut heap = Heap::new().unwrap();
        heap.intern(b"nobody-owns-me").unwrap();
        let count = heap.interned_string_count();
        heap.collect();
        assert_eq!(heap.interned_string_count(), count - 1);
        // Re-interning after the sweep yields a fresh live string.
        let id = heap.intern(b"nobody-owns-me").unwrap();
        assert_eq!(heap.string(id).as_bytes(), b"nobody-owns-me");
    }
}
