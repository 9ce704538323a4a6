//! Call and construct protocol
//!
//! Callables come in four shapes: lightfuncs, native function objects,
//! compiled function objects (dispatched through the executor hook), and
//! proxies with an `apply`/`construct` trap. Bound functions are resolved
//! to their final target up front, with the accumulated bound arguments
//! prepended and the innermost bound `this` in effect; the resolution walk
//! is budget-limited so a corrupted or adversarial chain errors instead of
//! spinning.
//!
//! Both entry points return a counted value: the caller owns the result and
//! releases it with [`Heap::decref`] when done. Arguments are borrowed.

use marten_vm_gc::{ObjectId, StringId};

use crate::error::{VmError, VmResult};
use crate::heap::{Builtin, Heap};
use crate::object::{ObjectKind, ThreadRunState};
use crate::value::Value;

/// One call-stack frame.
#[derive(Debug, Clone)]
pub struct Activation {
    /// The function being executed (counted)
    pub func: Value,
    /// Variable environment, if the executor materialized one (counted)
    pub var_env: Option<ObjectId>,
    /// Lexical environment (counted)
    pub lex_env: Option<ObjectId>,
    /// Saved `caller` value for non-strict caller tracking (counted)
    pub prev_caller: Value,
    /// Value stack depth at entry; unwind truncates back to this.
    pub bottom: usize,
}

impl Activation {
    pub(crate) fn for_each_ref(&self, f: &mut dyn FnMut(Value)) {
        f(self.func);
        if let Some(env) = self.var_env {
            f(Value::object(env));
        }
        if let Some(env) = self.lex_env {
            f(Value::object(env));
        }
        f(self.prev_caller);
    }
}

/// One catch-stack entry, pushed by the executor for `try` scopes.
#[derive(Debug, Clone)]
pub struct Catcher {
    /// Binding name for the caught error, if the clause declares one (counted)
    pub var_name: Option<StringId>,
    /// Lexical environment to restore (counted)
    pub lex_env: Option<ObjectId>,
    /// Value stack depth to restore on catch.
    pub stack_bottom: usize,
    /// Owning call-stack frame; unwinding past that frame pops this entry.
    pub act_index: usize,
}

impl Catcher {
    pub(crate) fn for_each_ref(&self, f: &mut dyn FnMut(Value)) {
        if let Some(name) = self.var_name {
            f(Value::string(name));
        }
        if let Some(env) = self.lex_env {
            f(Value::object(env));
        }
    }
}

impl Heap {
    // ------------------------------------------------------------------
    // Bound function resolution
    // ------------------------------------------------------------------

    /// Follow a bound-function chain to its final target, accumulating
    /// bound arguments and the effective `this`.
    fn resolve_bound(
        &mut self,
        func: Value,
        this: Value,
        args: &[Value],
    ) -> VmResult<(Value, Value, Vec<Value>)> {
        let mut target = func;
        let mut eff_this = this;
        let mut full_args: Vec<Value> = args.to_vec();
        let mut budget = self.config().bound_chain_sanity;
        loop {
            let Some(id) = target.as_object() else {
                break;
            };
            let ObjectKind::BoundFunction(data) = &self.object(id).kind else {
                break;
            };
            if budget == 0 {
                return Err(VmError::range_error("bound function chain too long"));
            }
            budget -= 1;
            // Each level's bound arguments go in front of what has been
            // accumulated so far; the innermost bound `this` wins.
            let mut next_args = data.bound_args.clone();
            next_args.extend_from_slice(&full_args);
            full_args = next_args;
            eff_this = data.bound_this;
            target = data.target;
        }
        Ok((target, eff_this, full_args))
    }

    // ------------------------------------------------------------------
    // Call
    // ------------------------------------------------------------------

    /// Call `func` with the given `this` binding and arguments.
    pub fn call(&mut self, func: Value, this: Value, args: &[Value]) -> VmResult<Value> {
        let (target, this, full_args) = self.resolve_bound(func, this, args)?;
        let depth = self.stack_depth();
        let result = self.call_resolved(target, this, &full_args);
        self.truncate_stack(depth);
        result
    }

    /// Dispatch after bound resolution. Trap-less proxies forward the call
    /// to their target; every proxy hop is pinned on the value stack so its
    /// target and handler survive trap side effects, with the pins dropped
    /// once dispatch finishes.
    fn call_resolved(&mut self, target: Value, this: Value, args: &[Value]) -> VmResult<Value> {
        let mut target = target;
        let mut budget = self.config().bound_chain_sanity;
        loop {
            let Some(id) = target.as_object() else {
                break;
            };
            let ObjectKind::Proxy(data) = &self.object(id).kind else {
                break;
            };
            let (ptarget, handler) = (data.target, data.handler);
            self.push(Value::object(id));
            if let Some(trap) = self.proxy_trap(id, b"apply")? {
                return self.call_apply_trap(trap, ptarget, handler, this, args);
            }
            if budget == 0 {
                return Err(VmError::range_error("proxy chain too long"));
            }
            budget -= 1;
            target = ptarget;
        }
        self.call_unbound(target, this, args)
    }

    fn call_apply_trap(
        &mut self,
        trap: Value,
        target: Value,
        handler: Value,
        this: Value,
        args: &[Value],
    ) -> VmResult<Value> {
        // Trap value is counted; pin it and the materialized args array
        // across the call.
        self.push(trap);
        let result = (|| {
            let arr = self.new_array_from(args)?;
            self.push(Value::object(arr));
            let trap_args = [target, this, Value::object(arr)];
            let result = self.call(trap, handler, &trap_args);
            self.pop();
            result
        })();
        self.pop();
        self.decref(trap);
        result
    }

    /// Invoke a non-bound, non-proxy callable.
    fn call_unbound(&mut self, func: Value, this: Value, args: &[Value]) -> VmResult<Value> {
        if let Some(entry) = func.as_lightfunc() {
            self.enter_activation(func);
            let result = (entry.func)(self, this, args);
            self.exit_activation(result.is_err());
            return result;
        }
        let Some(id) = func.as_object() else {
            return Err(VmError::type_error("value is not callable"));
        };
        match &self.object(id).kind {
            ObjectKind::NativeFunction(data) => {
                let native = data.func;
                self.enter_activation(func);
                let result = native(self, this, args);
                self.exit_activation(result.is_err());
                result
            }
            ObjectKind::CompiledFunction(_) => {
                let Some(executor) = self.executor() else {
                    return Err(VmError::internal("no executor installed"));
                };
                self.enter_activation(func);
                let result = executor(self, id, this, args);
                self.exit_activation(result.is_err());
                result
            }
            _ => Err(VmError::type_error("value is not callable")),
        }
    }

    // ------------------------------------------------------------------
    // Construct
    // ------------------------------------------------------------------

    /// `new func(...args)`.
    pub fn construct(&mut self, func: Value, args: &[Value]) -> VmResult<Value> {
        let (target, _this, full_args) = self.resolve_bound(func, Value::undefined(), args)?;
        let depth = self.stack_depth();
        let result = self.construct_resolved(target, &full_args);
        self.truncate_stack(depth);
        result
    }

    fn construct_resolved(&mut self, target: Value, args: &[Value]) -> VmResult<Value> {
        let mut target = target;
        let mut budget = self.config().bound_chain_sanity;
        loop {
            let Some(id) = target.as_object() else {
                break;
            };
            let ObjectKind::Proxy(data) = &self.object(id).kind else {
                break;
            };
            let (ptarget, handler) = (data.target, data.handler);
            self.push(Value::object(id));
            if let Some(trap) = self.proxy_trap(id, b"construct")? {
                return self.construct_trap(trap, ptarget, handler, args);
            }
            if budget == 0 {
                return Err(VmError::range_error("proxy chain too long"));
            }
            budget -= 1;
            target = ptarget;
        }
        self.construct_unbound(target, args)
    }

    fn construct_trap(
        &mut self,
        trap: Value,
        target: Value,
        handler: Value,
        args: &[Value],
    ) -> VmResult<Value> {
        self.push(trap);
        let result = (|| {
            let arr = self.new_array_from(args)?;
            self.push(Value::object(arr));
            let trap_args = [target, Value::object(arr)];
            let result = self.call(trap, handler, &trap_args);
            self.pop();
            result
        })();
        self.pop();
        self.decref(trap);
        let result = result?;
        if !result.is_object() {
            self.decref(result);
            return Err(VmError::type_error("construct trap did not return an object"));
        }
        Ok(result)
    }

    fn construct_unbound(&mut self, target: Value, args: &[Value]) -> VmResult<Value> {
        let callable = target.is_lightfunc()
            || target
                .as_object()
                .is_some_and(|id| self.object(id).is_callable());
        if !callable {
            return Err(VmError::type_error("value is not constructable"));
        }

        // The fresh instance's prototype comes from the final target's
        // `prototype` property, falling back to Object.prototype.
        let proto_key = self.well_known().prototype;
        let protov = self.get_property(target, Value::string(proto_key))?;
        let proto = protov
            .as_object()
            .unwrap_or_else(|| self.builtin_object(Builtin::ObjectPrototype));
        let obj = self.new_object_with_proto(Some(proto));
        self.decref(protov);
        let obj = obj?;

        self.push(Value::object(obj));
        let result = self.call(target, Value::object(obj), args);
        match result {
            // An object return value replaces the fresh instance.
            Ok(r) if r.is_object() => {
                self.pop();
                Ok(r)
            }
            Ok(r) => {
                self.decref(r);
                let out = Value::object(obj);
                self.incref(out);
                self.pop();
                Ok(out)
            }
            Err(e) => {
                self.pop();
                Err(e)
            }
        }
    }

    /// `value instanceof ctor`: walks `value`'s prototype chain looking for
    /// the (unbound) constructor's `prototype` object.
    pub fn instanceof(&mut self, value: Value, ctor: Value) -> VmResult<bool> {
        let (target, _, _) = self.resolve_bound(ctor, Value::undefined(), &[])?;
        let callable = target.is_lightfunc()
            || target
                .as_object()
                .is_some_and(|id| self.object(id).is_callable());
        if !callable {
            return Err(VmError::type_error("right-hand side is not callable"));
        }
        let proto_key = self.well_known().prototype;
        let protov = self.get_property(target, Value::string(proto_key))?;
        let Some(proto) = protov.as_object() else {
            self.decref(protov);
            return Err(VmError::type_error("prototype is not an object"));
        };

        let mut current = value.as_object().and_then(|id| self.object(id).prototype);
        let mut budget = self.config().prototype_chain_sanity;
        let found = loop {
            let Some(id) = current else {
                break false;
            };
            if id == proto {
                break true;
            }
            if budget == 0 {
                self.decref(protov);
                return Err(VmError::range_error("prototype chain too long"));
            }
            budget -= 1;
            current = self.object(id).prototype;
        };
        self.decref(protov);
        Ok(found)
    }

    // ------------------------------------------------------------------
    // Activations and unwinding
    // ------------------------------------------------------------------

    fn enter_activation(&mut self, func: Value) {
        self.incref(func);
        self.call_stack.push(Activation {
            func,
            var_env: None,
            lex_env: None,
            prev_caller: Value::undefined(),
            bottom: self.value_stack.len(),
        });
    }

    fn exit_activation(&mut self, unwinding: bool) {
        let Some(act) = self.call_stack.pop() else {
            debug_assert!(false, "activation stack underflow");
            return;
        };
        // Catchers belonging to the departing frame go first.
        while self
            .catch_stack
            .last()
            .is_some_and(|c| c.act_index >= self.call_stack.len())
        {
            let catcher = match self.catch_stack.pop() {
                Some(c) => c,
                None => break,
            };
            if let Some(name) = catcher.var_name {
                self.decref_id(name.heap_id());
            }
            if let Some(env) = catcher.lex_env {
                self.decref_id(env.heap_id());
            }
        }
        // On error, values pushed by the frame are abandoned; drop them.
        if unwinding {
            while self.value_stack.len() > act.bottom {
                if let Some(v) = self.value_stack.pop() {
                    self.decref(v);
                }
            }
        }
        debug_assert!(
            unwinding || self.value_stack.len() == act.bottom,
            "value stack imbalance across call"
        );
        self.decref(act.func);
        if let Some(env) = act.var_env {
            self.decref_id(env.heap_id());
        }
        if let Some(env) = act.lex_env {
            self.decref_id(env.heap_id());
        }
        self.decref(act.prev_caller);
    }

    /// Open a `try` scope for the current frame. The executor pairs this
    /// with [`Heap::pop_catcher`].
    pub fn push_catcher(&mut self, var_name: Option<StringId>, lex_env: Option<ObjectId>) {
        if let Some(name) = var_name {
            self.incref_id(name.heap_id());
        }
        if let Some(env) = lex_env {
            self.incref_id(env.heap_id());
        }
        let act_index = self.call_stack.len().saturating_sub(1);
        self.catch_stack.push(Catcher {
            var_name,
            lex_env,
            stack_bottom: self.value_stack.len(),
            act_index,
        });
    }

    /// Close the innermost `try` scope.
    pub fn pop_catcher(&mut self) {
        if let Some(catcher) = self.catch_stack.pop() {
            if let Some(name) = catcher.var_name {
                self.decref_id(name.heap_id());
            }
            if let Some(env) = catcher.lex_env {
                self.decref_id(env.heap_id());
            }
        }
    }

    // ------------------------------------------------------------------
    // Threads
    // ------------------------------------------------------------------

    /// Resume a suspended thread: the current thread's stacks are parked
    /// into its thread object and the target's stacks are swapped in.
    pub fn resume_thread(&mut self, thread: ObjectId) -> VmResult<()> {
        {
            let ObjectKind::Thread(state) = &self.object(thread).kind else {
                return Err(VmError::type_error("not a thread"));
            };
            if state.state != ThreadRunState::Suspended {
                return Err(VmError::type_error("thread is not resumable"));
            }
        }
        let prev = self.current_thread;
        if let Some(prev_id) = prev {
            if prev_id == thread {
                return Err(VmError::type_error("thread is already running"));
            }
            self.park_current_stacks(prev_id);
        } else if !self.value_stack.is_empty() || !self.call_stack.is_empty() {
            return Err(VmError::internal(
                "cannot resume a thread with an active unthreaded stack",
            ));
        }

        // The thread object owns a reference to its resumer.
        if let Some(prev_id) = prev {
            self.incref_id(prev_id.heap_id());
        }
        let (vs, cs, chs, old_resumer) = {
            let obj = self.object_mut(thread);
            let ObjectKind::Thread(state) = &mut obj.kind else {
                unreachable!("thread kind changed during resume");
            };
            state.state = ThreadRunState::Running;
            let old = state.resumer.take();
            state.resumer = prev;
            (
                std::mem::take(&mut state.value_stack),
                std::mem::take(&mut state.call_stack),
                std::mem::take(&mut state.catch_stack),
                old,
            )
        };
        self.value_stack = vs;
        self.call_stack = cs;
        self.catch_stack = chs;
        if let Some(old) = old_resumer {
            self.decref_id(old.heap_id());
        }

        self.incref_id(thread.heap_id());
        if let Some(prev_id) = prev {
            self.decref_id(prev_id.heap_id());
        }
        self.current_thread = Some(thread);
        tracing::trace!(thread = thread.heap_id().index(), "thread resumed");
        Ok(())
    }

    /// Suspend the running thread and return control to its resumer (or to
    /// the unthreaded state when it has none).
    pub fn suspend_current_thread(&mut self) -> VmResult<()> {
        let Some(current) = self.current_thread else {
            return Err(VmError::type_error("no thread is running"));
        };
        let resumer = {
            let ObjectKind::Thread(state) = &mut self.object_mut(current).kind else {
                unreachable!("current thread is not a thread object");
            };
            state.resumer.take()
        };
        self.park_current_stacks(current);

        self.current_thread = None;
        tracing::trace!(thread = current.heap_id().index(), "thread suspended");
        let result = match resumer {
            Some(resumer_id) => {
                // Transfer control back; the resumer was parked as Suspended.
                let r = self.resume_thread(resumer_id);
                // Release the resumer reference the thread object held.
                self.decref_id(resumer_id.heap_id());
                r
            }
            None => Ok(()),
        };
        self.decref_id(current.heap_id());
        result
    }

    fn park_current_stacks(&mut self, thread: ObjectId) {
        let vs = std::mem::take(&mut self.value_stack);
        let cs = std::mem::take(&mut self.call_stack);
        let chs = std::mem::take(&mut self.catch_stack);
        let obj = self.object_mut(thread);
        let ObjectKind::Thread(state) = &mut obj.kind else {
            unreachable!("parking stacks into a non-thread object");
        };
        state.value_stack = vs;
        state.call_stack = cs;
        state.catch_stack = chs;
        state.state = ThreadRunState::Suspended;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{LightFuncEntry, LightFuncFlags};

    fn sum_args(_heap: &mut Heap, _this: Value, args: &[Value]) -> VmResult<Value> {
        let mut total = 0i64;
        for a in args {
            total += a.as_fastint().unwrap_or(0);
        }
        Ok(Value::fastint(total))
    }

    fn return_this(_heap: &mut Heap, this: Value, _args: &[Value]) -> VmResult<Value> {
        Ok(this)
    }

    #[test]
    fn test_native_call() {
        let mut heap = Heap::new().unwrap();
        let f = heap.new_native_function(sum_args, 2, 0).unwrap();
        heap.push(Value::object(f));
        let r = heap
            .call(
                Value::object(f),
                Value::undefined(),
                &[Value::fastint(2), Value::fastint(40)],
            )
            .unwrap();
        assert_eq!(r.as_fastint(), Some(42));
        heap.pop();
    }

    #[test]
    fn test_lightfunc_call() {
        let mut heap = Heap::new().unwrap();
        static ENTRY: LightFuncEntry = LightFuncEntry {
            func: sum_args,
            flags: LightFuncFlags::new(0, 2, 2),
        };
        let f = Value::lightfunc(&ENTRY);
        let r = heap
            .call(f, Value::undefined(), &[Value::fastint(1), Value::fastint(2)])
            .unwrap();
        assert_eq!(r.as_fastint(), Some(3));
    }

    #[test]
    fn test_bound_chain_resolution() {
        let mut heap = Heap::new().unwrap();
        let f = heap.new_native_function(sum_args, 0, 0).unwrap();
        heap.push(Value::object(f));
        let b1 = heap
            .new_bound_function(Value::object(f), Value::undefined(), &[Value::fastint(1)])
            .unwrap();
        heap.push(Value::object(b1));
        let b2 = heap
            .new_bound_function(Value::object(b1), Value::undefined(), &[Value::fastint(2)])
            .unwrap();
        heap.push(Value::object(b2));
        let b3 = heap
            .new_bound_function(Value::object(b2), Value::undefined(), &[Value::fastint(4)])
            .unwrap();
        heap.push(Value::object(b3));

        // f.bind(1).bind(2).bind(4)(8) sees args [1, 2, 4, 8].
        let r = heap
            .call(Value::object(b3), Value::undefined(), &[Value::fastint(8)])
            .unwrap();
        assert_eq!(r.as_fastint(), Some(15));
        for _ in 0..4 {
            heap.pop();
        }
    }

    #[test]
    fn test_bound_this_is_innermost() {
        let mut heap = Heap::new().unwrap();
        let f = heap.new_native_function(return_this, 0, 0).unwrap();
        heap.push(Value::object(f));
        let inner_this = Value::fastint(7);
        let b1 = heap
            .new_bound_function(Value::object(f), inner_this, &[])
            .unwrap();
        heap.push(Value::object(b1));
        let b2 = heap
            .new_bound_function(Value::object(b1), Value::fastint(99), &[])
            .unwrap();
        heap.push(Value::object(b2));

        let r = heap
            .call(Value::object(b2), Value::undefined(), &[])
            .unwrap();
        assert_eq!(r.as_fastint(), Some(7));
        for _ in 0..3 {
            heap.pop();
        }
    }

    #[test]
    fn test_construct_returns_fresh_instance() {
        fn ctor(_heap: &mut Heap, _this: Value, _args: &[Value]) -> VmResult<Value> {
            Ok(Value::undefined())
        }
        let mut heap = Heap::new().unwrap();
        let f = heap.new_native_function(ctor, 0, 0).unwrap();
        heap.push(Value::object(f));
        let r = heap.construct(Value::object(f), &[]).unwrap();
        assert!(r.is_object());
        // Prototype falls back to Object.prototype when the constructor
        // has no `prototype` property.
        let inst = r.as_object().unwrap();
        assert_eq!(
            heap.object(inst).prototype,
            Some(heap.builtin_object(Builtin::ObjectPrototype))
        );
        heap.decref(r);
        heap.pop();
    }

    #[test]
    fn test_construct_object_return_overrides() {
        fn ctor(heap: &mut Heap, _this: Value, _args: &[Value]) -> VmResult<Value> {
            let o = heap.new_array()?;
            let v = Value::object(o);
            heap.incref(v);
            Ok(v)
        }
        let mut heap = Heap::new().unwrap();
        let f = heap.new_native_function(ctor, 0, 0).unwrap();
        heap.push(Value::object(f));
        let r = heap.construct(Value::object(f), &[]).unwrap();
        let id = r.as_object().unwrap();
        assert!(heap.object(id).array_part().is_some());
        heap.decref(r);
        heap.pop();
    }

    #[test]
    fn test_not_callable() {
        let mut heap = Heap::new().unwrap();
        let o = heap.new_object().unwrap();
        heap.push(Value::object(o));
        let err = heap
            .call(Value::object(o), Value::undefined(), &[])
            .unwrap_err();
        assert!(err.is_type_error());
        let err = heap.call(Value::fastint(3), Value::undefined(), &[]).unwrap_err();
        assert!(err.is_type_error());
        heap.pop();
    }

    #[test]
    fn test_thread_stack_swap() {
        let mut heap = Heap::new().unwrap();
        let t = heap.new_thread().unwrap();
        heap.incref_id(t.heap_id());

        heap.resume_thread(t).unwrap();
        heap.push(Value::fastint(1));
        heap.push(Value::fastint(2));
        assert_eq!(heap.stack_depth(), 2);

        heap.suspend_current_thread().unwrap();
        // The parked thread keeps its values; the unthreaded stack is empty.
        assert_eq!(heap.stack_depth(), 0);

        heap.resume_thread(t).unwrap();
        assert_eq!(heap.stack_depth(), 2);
        heap.pop();
        heap.pop();
        heap.suspend_current_thread().unwrap();
        heap.decref_id(t.heap_id());
    }
}
