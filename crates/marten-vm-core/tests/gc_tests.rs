//! End-to-end collector behavior: finalizer lifecycle, rescue semantics,
//! and refcount conservation across the public API.

use std::sync::atomic::{AtomicUsize, Ordering};

use marten_vm_core::{Builtin, Heap, Value, VmResult};

// Each test gets a private counter; tests in this binary run in parallel.
static REFZERO_RUNS: AtomicUsize = AtomicUsize::new(0);
static RESCUE_RUNS: AtomicUsize = AtomicUsize::new(0);
static FAIL_RUNS: AtomicUsize = AtomicUsize::new(0);
static CYCLE_RUNS: AtomicUsize = AtomicUsize::new(0);

fn refzero_finalizer(_heap: &mut Heap, _this: Value, _args: &[Value]) -> VmResult<Value> {
    REFZERO_RUNS.fetch_add(1, Ordering::SeqCst);
    Ok(Value::undefined())
}

fn rescuing_finalizer(heap: &mut Heap, _this: Value, args: &[Value]) -> VmResult<Value> {
    RESCUE_RUNS.fetch_add(1, Ordering::SeqCst);
    // Stash the dying object on the global object: rescue.
    let global = heap.global_object();
    let key = Value::string(heap.intern(b"rescued")?);
    heap.put_property(Value::object(global), key, args[0], true)?;
    Ok(Value::undefined())
}

fn failing_finalizer(_heap: &mut Heap, _this: Value, _args: &[Value]) -> VmResult<Value> {
    FAIL_RUNS.fetch_add(1, Ordering::SeqCst);
    Err(marten_vm_core::VmError::type_error("finalizer exploded"))
}

fn cycle_finalizer(_heap: &mut Heap, _this: Value, _args: &[Value]) -> VmResult<Value> {
    CYCLE_RUNS.fetch_add(1, Ordering::SeqCst);
    Ok(Value::undefined())
}

#[test]
fn test_finalizer_runs_once_on_refzero() {
    let mut heap = Heap::new().unwrap();
    let before = REFZERO_RUNS.load(Ordering::SeqCst);

    let o = heap.new_object().unwrap();
    heap.incref_id(o.heap_id());
    let f = heap.new_native_function(refzero_finalizer, 1, 0).unwrap();
    heap.set_finalizer(o, Value::object(f));

    heap.decref_id(o.heap_id());
    assert_eq!(REFZERO_RUNS.load(Ordering::SeqCst), before + 1);
    assert!(!heap.is_live(o.heap_id()));
}

#[test]
fn test_finalizer_rescue_then_final_death() {
    let mut heap = Heap::new().unwrap();
    let before = RESCUE_RUNS.load(Ordering::SeqCst);

    let o = heap.new_object().unwrap();
    heap.incref_id(o.heap_id());
    let f = heap.new_native_function(rescuing_finalizer, 1, 0).unwrap();
    heap.set_finalizer(o, Value::object(f));

    heap.decref_id(o.heap_id());
    // The finalizer ran, and the global reference keeps the object alive.
    assert_eq!(RESCUE_RUNS.load(Ordering::SeqCst), before + 1);
    assert!(heap.is_live(o.heap_id()));

    // Second death: the finalizer must not run again.
    let global = heap.global_object();
    let key = Value::string(heap.intern(b"rescued").unwrap());
    heap.delete_property(Value::object(global), key, true).unwrap();
    assert_eq!(RESCUE_RUNS.load(Ordering::SeqCst), before + 1);
    assert!(!heap.is_live(o.heap_id()));
}

#[test]
fn test_finalizer_error_is_swallowed() {
    let mut heap = Heap::new().unwrap();
    let before = FAIL_RUNS.load(Ordering::SeqCst);

    let o = heap.new_object().unwrap();
    heap.incref_id(o.heap_id());
    let f = heap.new_native_function(failing_finalizer, 1, 0).unwrap();
    heap.set_finalizer(o, Value::object(f));

    // The error does not propagate and teardown still happens.
    heap.decref_id(o.heap_id());
    assert_eq!(FAIL_RUNS.load(Ordering::SeqCst), before + 1);
    assert!(!heap.is_live(o.heap_id()));
}

#[test]
fn test_cycle_with_finalizer_collected() {
    let mut heap = Heap::new().unwrap();
    let before = CYCLE_RUNS.load(Ordering::SeqCst);

    let a = heap.new_object().unwrap();
    heap.push(Value::object(a));
    let b = heap.new_object().unwrap();
    heap.push(Value::object(b));
    let key = Value::string(heap.intern(b"peer").unwrap());
    heap.put_property(Value::object(a), key, Value::object(b), true)
        .unwrap();
    heap.put_property(Value::object(b), key, Value::object(a), true)
        .unwrap();
    let f = heap.new_native_function(cycle_finalizer, 1, 0).unwrap();
    heap.set_finalizer(a, Value::object(f));

    heap.pop();
    heap.pop();
    // The pair is cyclic garbage now; refcounting cannot free it.
    assert!(heap.is_live(a.heap_id()));

    heap.collect();
    assert_eq!(CYCLE_RUNS.load(Ordering::SeqCst), before + 1);
    assert!(!heap.is_live(a.heap_id()));
    assert!(!heap.is_live(b.heap_id()));
}

#[test]
fn test_refcount_conservation_across_property_ops() {
    let mut heap = Heap::new().unwrap();
    let baseline = heap.live_cell_count();

    {
        let o = heap.new_object().unwrap();
        heap.push(Value::object(o));
        let ov = Value::object(o);
        for i in 0..50 {
            let k = Value::string(heap.intern(format!("key-{i}").as_bytes()).unwrap());
            let inner = heap.new_object().unwrap();
            heap.put_property(ov, k, Value::object(inner), true).unwrap();
        }
        // Overwrite half of them, delete the other half.
        for i in 0..25 {
            let k = Value::string(heap.intern(format!("key-{i}").as_bytes()).unwrap());
            heap.put_property(ov, k, Value::fastint(0), true).unwrap();
        }
        for i in 25..50 {
            let k = Value::string(heap.intern(format!("key-{i}").as_bytes()).unwrap());
            heap.delete_property(ov, k, true).unwrap();
        }
        heap.pop();
    }
    // Key strings with no owner left are unreachable; sweep them.
    heap.collect();
    assert_eq!(heap.live_cell_count(), baseline);
}

#[test]
fn test_nested_container_teardown() {
    let mut heap = Heap::new().unwrap();
    let baseline = heap.live_cell_count();

    let arr = heap.new_array().unwrap();
    heap.push(Value::object(arr));
    for i in 0..100i64 {
        let inner = heap.new_array().unwrap();
        heap.push(Value::object(inner));
        heap.put_property(
            Value::object(inner),
            Value::fastint(0),
            Value::fastint(i),
            true,
        )
        .unwrap();
        heap.put_property(
            Value::object(arr),
            Value::fastint(i),
            Value::object(inner),
            true,
        )
        .unwrap();
        heap.pop();
    }
    heap.pop();
    heap.collect();
    assert_eq!(heap.live_cell_count(), baseline);
}

#[test]
fn test_builtins_survive_collection() {
    let mut heap = Heap::new().unwrap();
    heap.collect();
    heap.collect();
    let global = heap.builtin(Builtin::Global);
    assert!(global.is_object());
    // The heap still works after back-to-back collections.
    let o = heap.new_object().unwrap();
    heap.push(Value::object(o));
    let k = Value::string(heap.intern(b"alive").unwrap());
    heap.put_property(Value::object(o), k, Value::fastint(1), true)
        .unwrap();
    let v = heap.get_property(Value::object(o), k).unwrap();
    assert_eq!(v.as_fastint(), Some(1));
    heap.pop();
}
