//! Coarse-grained thread-safe wrapper
//!
//! The heap itself is single-threaded. Embeddings that share an engine
//! across OS threads serialize access through [`Runtime`]: one mutex, one
//! heap, one critical section per operation batch.

use parking_lot::Mutex;

use crate::error::VmResult;
use crate::heap::{Heap, HeapConfig};

/// A heap behind a mutex. Cheap to share behind an `Arc`.
pub struct Runtime {
    heap: Mutex<Heap>,
}

// SAFETY: the heap is only reachable through `with_heap`, which serializes
// all access behind the mutex; the raw pointers inside `Value` payloads are
// opaque embedder data never dereferenced by the engine.
unsafe impl Send for Runtime {}
unsafe impl Sync for Runtime {}

impl Runtime {
    /// Create a runtime with default configuration.
    pub fn new() -> VmResult<Self> {
        Ok(Self {
            heap: Mutex::new(Heap::new()?),
        })
    }

    /// Create a runtime with explicit configuration.
    pub fn with_config(config: HeapConfig) -> VmResult<Self> {
        Ok(Self {
            heap: Mutex::new(Heap::with_config(config)?),
        })
    }

    /// Run a batch of operations with exclusive heap access.
    ///
    /// Handles and uncounted values must not escape the closure; stabilize
    /// anything that needs to outlive it on the value stack or behind a
    /// temproot first.
    pub fn with_heap<R>(&self, f: impl FnOnce(&mut Heap) -> R) -> R {
        f(&mut self.heap.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_shared_access() {
        let rt = std::sync::Arc::new(Runtime::new().unwrap());
        let rt2 = rt.clone();
        let handle = std::thread::spawn(move || {
            rt2.with_heap(|heap| {
                let id = heap.intern(b"from-other-thread").unwrap();
                heap.string(id).len()
            })
        });
        let len = rt.with_heap(|heap| {
            let o = heap.new_object().unwrap();
            heap.push(Value::object(o));
            let k = Value::string(heap.intern(b"x").unwrap());
            heap.put_property(Value::object(o), k, Value::fastint(1), true)
                .unwrap();
            heap.pop();
            heap.interned_string_count()
        });
        assert!(len > 0);
        assert_eq!(handle.join().unwrap(), "from-other-thread".len());
    }
}
