//! Property enumeration
//!
//! An enumerator snapshots the key order at creation time: per prototype
//! level, array indices ascending, then string keys in insertion order,
//! hidden keys last (when requested at all). Keys shadowed by a nearer
//! level appear once, and a non-enumerable shadow hides an enumerable
//! inherited key entirely.
//!
//! `next` re-validates each key against the live object, so keys deleted
//! mid-enumeration are skipped; proxy-backed enumerations trust the trap
//! snapshot instead, since re-validation would fire traps again.
//!
//! The snapshot lives outside the heap, so the enumerator pins its target
//! and key strings (refcount plus temproot) until [`Enumerator::close`].

use rustc_hash::FxHashSet;

use crate::error::VmResult;
use crate::heap::Heap;
use crate::object::ObjectKind;
use crate::property::PropKey;
use crate::value::Value;

/// Enumeration behavior flags.
pub mod enum_flags {
    /// Own properties only; no prototype walk.
    pub const OWN_ONLY: u32 = 1 << 0;
    /// Include non-enumerable properties.
    pub const INCLUDE_NONENUMERABLE: u32 = 1 << 1;
    /// Include hidden (0xFF-prefixed) keys.
    pub const INCLUDE_HIDDEN: u32 = 1 << 2;
    /// Array index keys only.
    pub const ARRAY_INDICES_ONLY: u32 = 1 << 3;
    /// Sort the index-key subset ascending across prototype levels.
    pub const SORT_ARRAY_INDICES: u32 = 1 << 4;
}

/// A property enumeration in progress. Must be closed with
/// [`Enumerator::close`] to release its pins.
#[derive(Debug)]
pub struct Enumerator {
    target: Value,
    keys: Vec<PropKey>,
    index: usize,
    /// Trap answers are authoritative; skip per-key re-validation.
    proxy_backed: bool,
    own_only: bool,
}

impl Heap {
    /// Start enumerating `target` under `enum_flags` bits.
    pub fn enumerate(&mut self, target: Value, flags: u32) -> VmResult<Enumerator> {
        let own_only = flags & enum_flags::OWN_ONLY != 0;
        let include_nonenum = flags & enum_flags::INCLUDE_NONENUMERABLE != 0;
        let include_hidden = flags & enum_flags::INCLUDE_HIDDEN != 0;
        let indices_only = flags & enum_flags::ARRAY_INDICES_ONLY != 0;
        let sort_indices = flags & enum_flags::SORT_ARRAY_INDICES != 0;

        let mut keys: Vec<PropKey> = Vec::new();
        let mut proxy_backed = false;

        if let Some(s) = target.as_string() {
            // Primitive string: its char indices (and nothing inherited).
            keys.extend((0..self.string(s).charlen()).map(PropKey::Index));
        } else if let Some(start) = target.as_object() {
            let mut seen: FxHashSet<PropKey> = FxHashSet::default();
            let mut cur = Some(start);
            let mut budget = self.config().prototype_chain_sanity;
            while let Some(id) = cur {
                if matches!(self.object(id).kind, ObjectKind::Proxy(_)) {
                    proxy_backed = true;
                }
                // Always gather non-enumerable keys here: a non-enumerable
                // shadow must still hide deeper keys of the same name.
                let level = self.own_property_keys(id, true, include_hidden)?;
                for key in level {
                    if !seen.insert(key) {
                        continue;
                    }
                    if indices_only && !matches!(key, PropKey::Index(_)) {
                        continue;
                    }
                    if !include_nonenum {
                        let enumerable = match self.own_property_raw(id, key)? {
                            Some(prop) => prop.attrs.enumerable(),
                            // Proxy-trapped keys have no raw descriptor;
                            // take the trap's word for it.
                            None => matches!(self.object(id).kind, ObjectKind::Proxy(_)),
                        };
                        if !enumerable {
                            continue;
                        }
                    }
                    keys.push(key);
                }
                if own_only {
                    break;
                }
                cur = match &self.object(id).kind {
                    ObjectKind::Proxy(data) => data.target.as_object(),
                    _ => self.object(id).prototype,
                };
                if budget == 0 {
                    return Err(crate::error::VmError::range_error(
                        "prototype chain too long",
                    ));
                }
                budget -= 1;
            }
        }

        if sort_indices {
            // Each level's indices already ascend, but inherited indices land
            // after the child's. Reorder the index subset in place, leaving
            // string keys where they are.
            let mut indices: Vec<u32> = keys
                .iter()
                .filter_map(|k| match k {
                    PropKey::Index(i) => Some(*i),
                    PropKey::Str(_) => None,
                })
                .collect();
            indices.sort_unstable();
            let mut next_index = indices.into_iter();
            for key in keys.iter_mut() {
                if let PropKey::Index(slot) = key
                    && let Some(i) = next_index.next()
                {
                    *slot = i;
                }
            }
        }

        // Pin the snapshot: mid-enumeration GC must not reclaim the target
        // or any snapshotted key string.
        self.incref(target);
        if let Some(id) = target.heap_id() {
            self.temproot_add(id);
        }
        for key in &keys {
            if let PropKey::Str(s) = key {
                self.incref_id(s.heap_id());
                self.temproot_add(s.heap_id());
            }
        }

        Ok(Enumerator {
            target,
            keys,
            index: 0,
            proxy_backed,
            own_only,
        })
    }
}

impl Enumerator {
    /// Advance to the next live key. Returns the key as a counted string
    /// value, plus the counted property value when `want_value` is set.
    pub fn next(
        &mut self,
        heap: &mut Heap,
        want_value: bool,
    ) -> VmResult<Option<(Value, Option<Value>)>> {
        while self.index < self.keys.len() {
            let key = self.keys[self.index];
            self.index += 1;

            if !self.proxy_backed {
                let live = if self.own_only {
                    match self.target.as_object() {
                        Some(id) => heap.own_property_raw(id, key)?.is_some(),
                        None => true,
                    }
                } else {
                    heap.has_property_k(self.target, key)?
                };
                if !live {
                    continue;
                }
            }

            let skey = heap.key_string(key)?;
            let keyv = Value::string(skey);
            heap.incref(keyv);
            let value = if want_value {
                match heap.get_property_k(self.target, key) {
                    Ok(v) => Some(v),
                    Err(e) => {
                        heap.decref(keyv);
                        return Err(e);
                    }
                }
            } else {
                None
            };
            return Ok(Some((keyv, value)));
        }
        Ok(None)
    }

    /// Release the snapshot's pins. Dropping without closing leaks the
    /// pins until heap teardown.
    pub fn close(self, heap: &mut Heap) {
        for key in &self.keys {
            if let PropKey::Str(s) = key {
                heap.temproot_remove(s.heap_id());
                heap.decref_id(s.heap_id());
            }
        }
        if let Some(id) = self.target.heap_id() {
            heap.temproot_remove(id);
        }
        heap.decref(self.target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(heap: &mut Heap, o: Value, key: &str, v: i64) {
        let k = Value::string(heap.intern_str(key).unwrap());
        heap.put_property(o, k, Value::fastint(v), true).unwrap();
    }

    fn next_key_str(heap: &mut Heap, e: &mut Enumerator) -> Option<String> {
        let (k, _) = e.next(heap, false).unwrap()?;
        let s = heap
            .string(k.as_string().unwrap())
            .to_display()
            .into_owned();
        heap.decref(k);
        Some(s)
    }

    #[test]
    fn test_for_in_order() {
        let mut heap = Heap::new().unwrap();
        let o = heap.new_object().unwrap();
        heap.push(Value::object(o));
        let ov = Value::object(o);
        put(&mut heap, ov, "b", 1);
        put(&mut heap, ov, "3", 1);
        put(&mut heap, ov, "a", 1);
        put(&mut heap, ov, "1", 1);

        let mut e = heap.enumerate(ov, 0).unwrap();
        let mut got = Vec::new();
        while let Some(k) = next_key_str(&mut heap, &mut e) {
            got.push(k);
        }
        e.close(&mut heap);
        assert_eq!(got, vec!["1", "3", "b", "a"]);
        heap.pop();
    }

    #[test]
    fn test_inherited_keys_and_shadowing() {
        let mut heap = Heap::new().unwrap();
        let proto = heap.new_object().unwrap();
        heap.push(Value::object(proto));
        put(&mut heap, Value::object(proto), "shared", 1);
        put(&mut heap, Value::object(proto), "base", 1);
        let child = heap.new_object_with_proto(Some(proto)).unwrap();
        heap.push(Value::object(child));
        put(&mut heap, Value::object(child), "shared", 2);
        put(&mut heap, Value::object(child), "own", 2);

        let mut e = heap.enumerate(Value::object(child), 0).unwrap();
        let mut got = Vec::new();
        while let Some(k) = next_key_str(&mut heap, &mut e) {
            got.push(k);
        }
        e.close(&mut heap);
        // Own keys first; "shared" appears once.
        assert_eq!(got, vec!["shared", "own", "base"]);

        let mut e = heap
            .enumerate(Value::object(child), enum_flags::OWN_ONLY)
            .unwrap();
        let mut got = Vec::new();
        while let Some(k) = next_key_str(&mut heap, &mut e) {
            got.push(k);
        }
        e.close(&mut heap);
        assert_eq!(got, vec!["shared", "own"]);
        heap.pop();
        heap.pop();
    }

    #[test]
    fn test_deleted_key_skipped() {
        let mut heap = Heap::new().unwrap();
        let o = heap.new_object().unwrap();
        heap.push(Value::object(o));
        let ov = Value::object(o);
        put(&mut heap, ov, "first", 1);
        put(&mut heap, ov, "second", 1);
        put(&mut heap, ov, "third", 1);

        let mut e = heap.enumerate(ov, enum_flags::OWN_ONLY).unwrap();
        let k = next_key_str(&mut heap, &mut e).unwrap();
        assert_eq!(k, "first");
        // Delete "second" mid-walk; the enumerator skips it.
        let dk = Value::string(heap.intern(b"second").unwrap());
        heap.delete_property(ov, dk, true).unwrap();
        let k = next_key_str(&mut heap, &mut e).unwrap();
        assert_eq!(k, "third");
        assert!(e.next(&mut heap, false).unwrap().is_none());
        e.close(&mut heap);
        heap.pop();
    }

    #[test]
    fn test_values_delivered() {
        let mut heap = Heap::new().unwrap();
        let a = heap.new_array().unwrap();
        heap.push(Value::object(a));
        let av = Value::object(a);
        for i in 0..3 {
            heap.put_property(av, Value::fastint(i), Value::fastint(i * 10), true)
                .unwrap();
        }
        let mut e = heap
            .enumerate(av, enum_flags::OWN_ONLY | enum_flags::ARRAY_INDICES_ONLY)
            .unwrap();
        let mut sum = 0;
        while let Some((k, v)) = e.next(&mut heap, true).unwrap() {
            sum += v.unwrap().as_fastint().unwrap();
            heap.decref(k);
        }
        e.close(&mut heap);
        assert_eq!(sum, 0 + 10 + 20);
        heap.pop();
    }

    #[test]
    fn test_snapshot_survives_collection() {
        let mut heap = Heap::new().unwrap();
        let o = heap.new_object().unwrap();
        heap.push(Value::object(o));
        let ov = Value::object(o);
        put(&mut heap, ov, "alpha", 1);
        put(&mut heap, ov, "beta", 2);

        let mut e = heap.enumerate(ov, enum_flags::OWN_ONLY).unwrap();
        // A full collection between steps must not invalidate the snapshot.
        heap.collect();
        let mut got = Vec::new();
        while let Some(k) = next_key_str(&mut heap, &mut e) {
            got.push(k);
        }
        e.close(&mut heap);
        assert_eq!(got, vec!["alpha", "beta"]);
        heap.pop();
    }

    #[test]
    fn test_sorted_indices_across_levels() {
        let mut heap = Heap::new().unwrap();
        let proto = heap.new_object().unwrap();
        heap.push(Value::object(proto));
        heap.put_property(Value::object(proto), Value::fastint(5), Value::fastint(1), true)
            .unwrap();
        let child = heap.new_object_with_proto(Some(proto)).unwrap();
        heap.push(Value::object(child));
        for i in [2i64, 9] {
            heap.put_property(Value::object(child), Value::fastint(i), Value::fastint(1), true)
                .unwrap();
        }

        let mut e = heap
            .enumerate(
                Value::object(child),
                enum_flags::ARRAY_INDICES_ONLY | enum_flags::SORT_ARRAY_INDICES,
            )
            .unwrap();
        let mut got = Vec::new();
        while let Some(k) = next_key_str(&mut heap, &mut e) {
            got.push(k);
        }
        e.close(&mut heap);
        // Without the sort flag the inherited 5 would trail the own 9.
        assert_eq!(got, vec!["2", "5", "9"]);
        heap.pop();
        heap.pop();
    }

    #[test]
    fn test_string_enumeration() {
        let mut heap = Heap::new().unwrap();
        let s = Value::string(heap.intern(b"ab").unwrap());
        heap.push(s);
        let mut e = heap.enumerate(s, 0).unwrap();
        let mut got = Vec::new();
        while let Some(k) = next_key_str(&mut heap, &mut e) {
            got.push(k);
        }
        e.close(&mut heap);
        assert_eq!(got, vec!["0", "1"]);
        heap.pop();
    }
}
