//! Property access protocol
//!
//! One uniform prototype-chain walk backs get/put/has/delete, with exotic
//! per-kind behavior dispatched at each hop: arrays virtualize `length` and
//! keep dense elements out of the property table, string objects expose
//! read-only char indices, buffer views short-circuit all canonical numeric
//! indices (in-bounds or not) without ever touching the prototype chain,
//! and proxies route through handler traps with invariant checks against
//! the target.
//!
//! Keys are classified once up front: a canonical array index (`0` ..
//! `2^32-2`, no leading zeros) or an interned string. The walk is
//! budget-limited so a cyclic or absurdly deep prototype chain raises a
//! `RangeError` instead of hanging.
//!
//! `get_property` and friends return counted values; arguments are
//! borrowed.

use marten_vm_gc::{ObjectId, StringId};

use crate::conv;
use crate::error::{VmError, VmResult};
use crate::heap::{Builtin, Heap};
use crate::object::{BufferView, ElemKind, ObjectKind, PropAttrs, Property, PropertySlot};
use crate::string::{NO_ARRAY_INDEX, string_flags};
use crate::value::Value;

/// A classified property key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropKey {
    /// Canonical array index, at most `2^32 - 2`
    Index(u32),
    /// Anything else, as an interned string
    Str(StringId),
}

impl Heap {
    /// Classify a key value into an index or an interned string.
    ///
    /// Object keys would require re-entrant `toString` coercion and are
    /// rejected here; callers coerce first.
    pub fn classify_key(&mut self, key: Value) -> VmResult<PropKey> {
        if let Some(i) = key.as_fastint()
            && i >= 0
            && (i as u64) < NO_ARRAY_INDEX as u64
        {
            return Ok(PropKey::Index(i as u32));
        }
        if let Some(id) = key.as_string() {
            return Ok(match self.string(id).array_index() {
                Some(i) => PropKey::Index(i),
                None => PropKey::Str(id),
            });
        }
        let id = if key.is_number() {
            conv::number_to_string(self, key)?
        } else if let Some(b) = key.as_boolean() {
            self.intern(if b { b"true" } else { b"false" })?
        } else if key.is_undefined() {
            self.intern(b"undefined")?
        } else if key.is_null() {
            self.intern(b"null")?
        } else {
            return Err(VmError::type_error("cannot coerce value to property key"));
        };
        Ok(match self.string(id).array_index() {
            Some(i) => PropKey::Index(i),
            None => PropKey::Str(id),
        })
    }

    /// Interned string form of a classified key.
    pub fn key_string(&mut self, key: PropKey) -> VmResult<StringId> {
        match key {
            PropKey::Index(i) => self.intern_u32(i),
            PropKey::Str(id) => Ok(id),
        }
    }

    fn key_value(&mut self, key: PropKey) -> VmResult<Value> {
        Ok(Value::string(self.key_string(key)?))
    }

    // ------------------------------------------------------------------
    // Get
    // ------------------------------------------------------------------

    /// `base[key]`.
    pub fn get_property(&mut self, base: Value, key: Value) -> VmResult<Value> {
        let pkey = self.classify_key(key)?;
        self.get_property_k(base, pkey)
    }

    /// Get with a pre-classified key.
    pub fn get_property_k(&mut self, base: Value, key: PropKey) -> VmResult<Value> {
        let depth = self.stack_depth();
        let result = self.get_walk(base, key);
        self.truncate_stack(depth);
        result
    }

    /// The bounded chain walk behind [`Heap::get_property_k`]. Every proxy
    /// hop pins the proxy on the value stack before any handler lookup, so
    /// its target and handler outlive whatever the trap does to the object
    /// graph; the wrapper drops the pins once the walk is over.
    fn get_walk(&mut self, base: Value, key: PropKey) -> VmResult<Value> {
        if base.is_nullish() {
            return Err(VmError::type_error(
                "cannot read property of null or undefined",
            ));
        }
        let receiver = base;
        let mut cur = match base.as_object() {
            Some(id) => Some(id),
            None => {
                if let Some(v) = self.primitive_own_get(base, key)? {
                    return Ok(v);
                }
                self.primitive_proto(base)
            }
        };

        let mut budget = self.config().prototype_chain_sanity;
        while let Some(id) = cur {
            match &self.object(id).kind {
                ObjectKind::Proxy(data) => {
                    let (target, handler) = (data.target, data.handler);
                    self.push(Value::object(id));
                    if let Some(trap) = self.proxy_trap(id, b"get")? {
                        let keyv = self.key_value(key)?;
                        self.push(trap);
                        self.push(keyv);
                        let result = self.call(trap, handler, &[target, keyv, receiver]);
                        self.pop();
                        self.pop();
                        self.decref(trap);
                        let result = result?;
                        if let Err(e) = self.check_get_invariant(target, key, result) {
                            self.decref(result);
                            return Err(e);
                        }
                        return Ok(result);
                    }
                    // No trap: continue the walk at the target, keeping the
                    // original receiver.
                    cur = target.as_object();
                }
                ObjectKind::BufferView(view) => {
                    if let PropKey::Index(i) = key {
                        // Canonical indices never reach the prototype chain,
                        // in bounds or not.
                        let view = *view;
                        return if (i as usize) < view.length {
                            Ok(self.read_view_element(view, i as usize))
                        } else {
                            Ok(Value::undefined())
                        };
                    }
                    if let Some(prop) = self.own_property_raw(id, key)? {
                        return self.load_found(prop, receiver);
                    }
                    cur = self.object(id).prototype;
                }
                _ => {
                    if let Some(prop) = self.own_property_raw(id, key)? {
                        return self.load_found(prop, receiver);
                    }
                    cur = self.object(id).prototype;
                }
            }
            if budget == 0 {
                return Err(VmError::range_error("prototype chain too long"));
            }
            budget -= 1;
        }
        Ok(Value::undefined())
    }

    fn load_found(&mut self, prop: Property, receiver: Value) -> VmResult<Value> {
        match prop.slot {
            PropertySlot::Data(v) => {
                self.incref(v);
                Ok(v)
            }
            PropertySlot::Accessor { get, .. } => {
                if get.is_unused() {
                    return Ok(Value::undefined());
                }
                // The getter may delete the property that owns it.
                self.push(get);
                let result = self.call(get, receiver, &[]);
                self.pop();
                result
            }
        }
    }

    /// Own property of one object, virtual slots included, no traps.
    /// `None` for a proxy (its own properties live behind traps).
    pub(crate) fn own_property_raw(
        &mut self,
        id: ObjectId,
        key: PropKey,
    ) -> VmResult<Option<Property>> {
        let wk_length = self.well_known().length;
        match &self.object(id).kind {
            ObjectKind::Array(part) => {
                if let PropKey::Str(s) = key
                    && s == wk_length
                {
                    let len = part.length;
                    return Ok(Some(Property::data_with_attrs(
                        Value::fastint(len as i64),
                        PropAttrs::from_bits(PropAttrs::WRITABLE),
                    )));
                }
                if let PropKey::Index(i) = key
                    && (i as usize) < part.items.len()
                {
                    let v = part.items[i as usize];
                    if !v.is_unused() {
                        return Ok(Some(Property::data(v)));
                    }
                    return Ok(None);
                }
            }
            ObjectKind::StringObject(s) => {
                let s = *s;
                if let PropKey::Str(k) = key
                    && k == wk_length
                {
                    let len = self.string(s).charlen();
                    return Ok(Some(Property::data_with_attrs(
                        Value::fastint(len as i64),
                        PropAttrs::NONE,
                    )));
                }
                if let PropKey::Index(i) = key {
                    if i < self.string(s).charlen() {
                        let ch = self.string_char_at(s, i)?;
                        return Ok(Some(Property::data_with_attrs(
                            Value::string(ch),
                            PropAttrs::from_bits(PropAttrs::ENUMERABLE),
                        )));
                    }
                    return Ok(None);
                }
            }
            ObjectKind::BufferView(view) => {
                if let PropKey::Str(k) = key
                    && k == wk_length
                {
                    let len = view.length;
                    return Ok(Some(Property::data_with_attrs(
                        Value::fastint(len as i64),
                        PropAttrs::NONE,
                    )));
                }
                if let PropKey::Index(i) = key {
                    let view = *view;
                    if (i as usize) < view.length {
                        let v = self.read_view_element(view, i as usize);
                        return Ok(Some(Property::data_with_attrs(
                            v,
                            PropAttrs::from_bits(PropAttrs::WRITABLE | PropAttrs::ENUMERABLE),
                        )));
                    }
                    return Ok(None);
                }
            }
            ObjectKind::NativeFunction(data) => {
                if let PropKey::Str(k) = key
                    && k == wk_length
                    && !self.object(id).props.contains_key(&k)
                {
                    let nargs = data.nargs;
                    return Ok(Some(Property::data_with_attrs(
                        Value::fastint(nargs as i64),
                        PropAttrs::NONE,
                    )));
                }
            }
            ObjectKind::Proxy(_) => return Ok(None),
            _ => {}
        }
        let skey = self.key_string(key)?;
        Ok(self.object(id).props.get(&skey).copied())
    }

    /// One-char string at a char offset.
    fn string_char_at(&mut self, s: StringId, i: u32) -> VmResult<StringId> {
        let b0 = self.string_char_to_byte(s, i);
        let b1 = self.string_char_to_byte(s, i + 1);
        let bytes: smallvec::SmallVec<[u8; 8]> =
            self.string(s).as_bytes()[b0 as usize..b1 as usize].into();
        self.intern(&bytes)
    }

    fn primitive_own_get(&mut self, base: Value, key: PropKey) -> VmResult<Option<Value>> {
        let wk_length = self.well_known().length;
        if let Some(s) = base.as_string() {
            match key {
                PropKey::Str(k) if k == wk_length => {
                    return Ok(Some(Value::fastint(self.string(s).charlen() as i64)));
                }
                PropKey::Index(i) if i < self.string(s).charlen() => {
                    let ch = self.string_char_at(s, i)?;
                    let v = Value::string(ch);
                    self.incref(v);
                    return Ok(Some(v));
                }
                _ => {}
            }
        }
        if let Some(entry) = base.as_lightfunc()
            && let PropKey::Str(k) = key
            && k == wk_length
        {
            return Ok(Some(Value::fastint(entry.flags.length() as i64)));
        }
        if let Some(b) = base.as_buffer() {
            match key {
                PropKey::Str(k) if k == wk_length => {
                    return Ok(Some(Value::fastint(self.buffer(b).len() as i64)));
                }
                PropKey::Index(i) => {
                    // A plain buffer reads like a Uint8 view.
                    let byte = self.buffer(b).bytes().get(i as usize).copied();
                    return Ok(Some(match byte {
                        Some(byte) => Value::fastint(byte as i64),
                        None => Value::undefined(),
                    }));
                }
                _ => {}
            }
        }
        Ok(None)
    }

    fn primitive_proto(&self, base: Value) -> Option<ObjectId> {
        let which = if base.is_string() {
            Builtin::StringPrototype
        } else if base.is_lightfunc() {
            Builtin::FunctionPrototype
        } else if base.is_buffer() {
            Builtin::TypedArrayPrototype
        } else {
            Builtin::ObjectPrototype
        };
        Some(self.builtin_object(which))
    }

    // ------------------------------------------------------------------
    // Put
    // ------------------------------------------------------------------

    /// `base[key] = value`, with strict-mode error semantics.
    pub fn put_property(
        &mut self,
        base: Value,
        key: Value,
        value: Value,
        strict: bool,
    ) -> VmResult<()> {
        let pkey = self.classify_key(key)?;
        self.put_property_k(base, pkey, value, strict)
    }

    /// Put with a pre-classified key.
    pub fn put_property_k(
        &mut self,
        base: Value,
        key: PropKey,
        value: Value,
        strict: bool,
    ) -> VmResult<()> {
        let depth = self.stack_depth();
        let result = self.put_walk(base, key, value, strict);
        self.truncate_stack(depth);
        result
    }

    /// Chain walk behind [`Heap::put_property_k`], same proxy pinning
    /// discipline as [`Heap::get_walk`].
    fn put_walk(
        &mut self,
        base: Value,
        key: PropKey,
        value: Value,
        strict: bool,
    ) -> VmResult<()> {
        if base.is_nullish() {
            return Err(VmError::type_error(
                "cannot write property of null or undefined",
            ));
        }
        let Some(recv) = base.as_object() else {
            // Plain buffers accept in-range byte writes; everything else on
            // a primitive base is a silent no-op (TypeError when strict).
            if let Some(b) = base.as_buffer()
                && let PropKey::Index(i) = key
            {
                let Some(d) = value.as_number() else {
                    return Err(VmError::type_error("buffer write requires a number"));
                };
                let byte = to_uint32(d) as u8;
                if let Some(slot) = self.buffer_mut(b).bytes_mut().get_mut(i as usize) {
                    *slot = byte;
                }
                return Ok(());
            }
            return put_reject(strict, "cannot create property on primitive value");
        };

        let wk_length = self.well_known().length;
        let mut cur = Some(recv);
        let mut budget = self.config().prototype_chain_sanity;
        while let Some(id) = cur {
            match &self.object(id).kind {
                ObjectKind::Proxy(data) => {
                    let (target, handler) = (data.target, data.handler);
                    self.push(Value::object(id));
                    if let Some(trap) = self.proxy_trap(id, b"set")? {
                        let keyv = self.key_value(key)?;
                        self.push(trap);
                        self.push(keyv);
                        let result = self.call(trap, handler, &[target, keyv, value, base]);
                        self.pop();
                        self.pop();
                        self.decref(trap);
                        let result = result?;
                        let accepted = result.to_boolean();
                        self.decref(result);
                        if !accepted {
                            return put_reject(strict, "proxy set trap rejected the write");
                        }
                        self.check_set_invariant(target, key, value)?;
                        return Ok(());
                    }
                    cur = target.as_object();
                }
                ObjectKind::Array(_) => {
                    if let PropKey::Str(k) = key
                        && k == wk_length
                    {
                        if id == recv {
                            return self.array_set_length(id, value, strict);
                        }
                        // A writable data slot on a prototype: fall through
                        // to creating an own property on the receiver.
                        break;
                    }
                    if let PropKey::Index(i) = key
                        && id == recv
                        && self.array_has_own_dense(id, i)
                    {
                        // Fast path: overwriting an existing dense element
                        // cannot hit a prototype setter.
                        let old = {
                            let part = self
                                .object_mut(id)
                                .array_part_mut()
                                .unwrap_or_else(|| unreachable!("array kind changed"));
                            std::mem::replace(&mut part.items[i as usize], value)
                        };
                        self.incref(value);
                        self.decref(old);
                        return Ok(());
                    }
                    match self.own_property_raw(id, key)? {
                        Some(prop) => {
                            return self.put_found(id, recv, key, prop, value, base, strict);
                        }
                        None => cur = self.object(id).prototype,
                    }
                }
                ObjectKind::StringObject(_) => {
                    let virt = matches!(key, PropKey::Str(k) if k == wk_length)
                        || matches!(key, PropKey::Index(i)
                            if matches!(&self.object(id).kind, ObjectKind::StringObject(s)
                                if i < self.string(*s).charlen()));
                    if virt {
                        return put_reject(strict, "string characters are read-only");
                    }
                    match self.own_property_raw(id, key)? {
                        Some(prop) => {
                            return self.put_found(id, recv, key, prop, value, base, strict);
                        }
                        None => cur = self.object(id).prototype,
                    }
                }
                ObjectKind::BufferView(view) => {
                    if let PropKey::Index(i) = key {
                        let view = *view;
                        // In range: write. Out of range: swallowed, and the
                        // prototype chain is never consulted.
                        if (i as usize) < view.length {
                            self.write_view_element(view, i as usize, value)?;
                        }
                        return Ok(());
                    }
                    if let PropKey::Str(k) = key
                        && k == wk_length
                    {
                        return put_reject(strict, "typed array length is read-only");
                    }
                    match self.own_property_raw(id, key)? {
                        Some(prop) => {
                            return self.put_found(id, recv, key, prop, value, base, strict);
                        }
                        None => cur = self.object(id).prototype,
                    }
                }
                _ => match self.own_property_raw(id, key)? {
                    Some(prop) => {
                        return self.put_found(id, recv, key, prop, value, base, strict);
                    }
                    None => cur = self.object(id).prototype,
                },
            }
            if budget == 0 {
                return Err(VmError::range_error("prototype chain too long"));
            }
            budget -= 1;
        }

        self.create_own_data(recv, key, value, strict)
    }

    fn put_found(
        &mut self,
        holder: ObjectId,
        recv: ObjectId,
        key: PropKey,
        prop: Property,
        value: Value,
        receiver: Value,
        strict: bool,
    ) -> VmResult<()> {
        match prop.slot {
            PropertySlot::Accessor { set, .. } => {
                if set.is_unused() {
                    return put_reject(strict, "property has no setter");
                }
                self.push(set);
                let result = self.call(set, receiver, &[value]);
                self.pop();
                let r = result?;
                self.decref(r);
                Ok(())
            }
            PropertySlot::Data(_) => {
                if !prop.attrs.writable() {
                    return put_reject(strict, "property is not writable");
                }
                if holder == recv {
                    let skey = self.key_string(key)?;
                    self.incref(value);
                    if self.object(recv).props.contains_key(&skey) {
                        let obj = self.object_mut(recv);
                        let p = obj
                            .props
                            .get_mut(&skey)
                            .unwrap_or_else(|| unreachable!("property vanished"));
                        let old = p.slot.data();
                        p.slot = PropertySlot::Data(value);
                        if let Some(old) = old {
                            self.decref(old);
                        }
                    } else {
                        // A virtual slot (e.g. a function's `length`) is
                        // shadowed by a real own property.
                        self.incref_id(skey.heap_id());
                        self.object_mut(recv)
                            .props
                            .insert(skey, Property::data_with_attrs(value, prop.attrs));
                    }
                    Ok(())
                } else {
                    // Writable data on a prototype: shadow it on the receiver.
                    self.create_own_data(recv, key, value, strict)
                }
            }
        }
    }

    fn create_own_data(
        &mut self,
        recv: ObjectId,
        key: PropKey,
        value: Value,
        strict: bool,
    ) -> VmResult<()> {
        if !self.object(recv).extensible {
            return put_reject(strict, "object is not extensible");
        }
        if let PropKey::Index(i) = key
            && self.object(recv).array_part().is_some()
        {
            return self.array_put_index(recv, i, value);
        }
        let skey = self.key_string(key)?;
        self.incref(value);
        self.incref_id(skey.heap_id());
        let old = self.object_mut(recv).props.insert(skey, Property::data(value));
        if let Some(old) = old {
            // Raced with itself through a side effect; release the stale key ref.
            self.decref_id(skey.heap_id());
            self.release_property(old);
        }
        Ok(())
    }

    fn array_has_own_dense(&self, id: ObjectId, index: u32) -> bool {
        self.object(id)
            .array_part()
            .is_some_and(|p| (index as usize) < p.items.len() && !p.items[index as usize].is_unused())
    }

    fn array_put_index(&mut self, id: ObjectId, index: u32, value: Value) -> VmResult<()> {
        self.incref(value);
        let dense_len = self
            .object(id)
            .array_part()
            .map(|p| p.items.len())
            .unwrap_or(0);
        if (index as usize) <= dense_len {
            let part = self
                .object_mut(id)
                .array_part_mut()
                .unwrap_or_else(|| unreachable!("array kind changed"));
            if (index as usize) == part.items.len() {
                part.items.push(value);
            } else {
                let old = std::mem::replace(&mut part.items[index as usize], value);
                part.length = part.length.max(index + 1);
                self.decref(old);
                return Ok(());
            }
            part.length = part.length.max(index + 1);
            return Ok(());
        }
        // Sparse write: spill to the property table as an index string.
        let skey = self.intern_u32(index)?;
        self.incref_id(skey.heap_id());
        let old = self.object_mut(id).props.insert(skey, Property::data(value));
        if let Some(old) = old {
            self.decref_id(skey.heap_id());
            self.release_property(old);
        }
        let part = self
            .object_mut(id)
            .array_part_mut()
            .unwrap_or_else(|| unreachable!("array kind changed"));
        part.length = part.length.max(index + 1);
        Ok(())
    }

    fn array_set_length(&mut self, id: ObjectId, value: Value, strict: bool) -> VmResult<()> {
        let Some(d) = value.as_number() else {
            return Err(VmError::range_error("invalid array length"));
        };
        let new_len = to_uint32(d);
        if new_len as f64 != d {
            return Err(VmError::range_error("invalid array length"));
        }
        let old_len = self
            .object(id)
            .array_part()
            .map(|p| p.length)
            .unwrap_or(0);
        let _ = strict;
        if new_len < old_len {
            // Truncate the dense part.
            let dropped: Vec<Value> = {
                let part = self
                    .object_mut(id)
                    .array_part_mut()
                    .unwrap_or_else(|| unreachable!("array kind changed"));
                if (new_len as usize) < part.items.len() {
                    part.items.split_off(new_len as usize)
                } else {
                    Vec::new()
                }
            };
            for v in dropped {
                if !v.is_unused() {
                    self.decref(v);
                }
            }
            // Drop spilled indices at or past the new length.
            let doomed: Vec<StringId> = self
                .object(id)
                .props
                .keys()
                .filter(|k| {
                    self.string(**k)
                        .array_index()
                        .is_some_and(|i| i >= new_len)
                })
                .copied()
                .collect();
            for k in doomed {
                if let Some(prop) = self.object_mut(id).props.shift_remove(&k) {
                    self.decref_id(k.heap_id());
                    self.release_property(prop);
                }
            }
        }
        let part = self
            .object_mut(id)
            .array_part_mut()
            .unwrap_or_else(|| unreachable!("array kind changed"));
        part.length = new_len;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Has / delete
    // ------------------------------------------------------------------

    /// `key in base`.
    pub fn has_property(&mut self, base: Value, key: Value) -> VmResult<bool> {
        let pkey = self.classify_key(key)?;
        self.has_property_k(base, pkey)
    }

    /// Has with a pre-classified key.
    pub fn has_property_k(&mut self, base: Value, key: PropKey) -> VmResult<bool> {
        let depth = self.stack_depth();
        let result = self.has_walk(base, key);
        self.truncate_stack(depth);
        result
    }

    fn has_walk(&mut self, base: Value, key: PropKey) -> VmResult<bool> {
        if base.is_nullish() {
            return Err(VmError::type_error(
                "cannot test property of null or undefined",
            ));
        }
        let mut cur = match base.as_object() {
            Some(id) => Some(id),
            None => {
                if self.primitive_own_get(base, key)?.is_some_and(|v| {
                    let hit = !v.is_undefined();
                    self.decref(v);
                    hit
                }) {
                    return Ok(true);
                }
                self.primitive_proto(base)
            }
        };
        let mut budget = self.config().prototype_chain_sanity;
        while let Some(id) = cur {
            match &self.object(id).kind {
                ObjectKind::Proxy(data) => {
                    let (target, handler) = (data.target, data.handler);
                    self.push(Value::object(id));
                    if let Some(trap) = self.proxy_trap(id, b"has")? {
                        let keyv = self.key_value(key)?;
                        self.push(trap);
                        self.push(keyv);
                        let result = self.call(trap, handler, &[target, keyv]);
                        self.pop();
                        self.pop();
                        self.decref(trap);
                        let result = result?;
                        let found = result.to_boolean();
                        self.decref(result);
                        if !found {
                            self.check_has_invariant(target, key)?;
                        }
                        return Ok(found);
                    }
                    cur = target.as_object();
                }
                ObjectKind::BufferView(view) => {
                    if let PropKey::Index(i) = key {
                        return Ok((i as usize) < view.length);
                    }
                    if self.own_property_raw(id, key)?.is_some() {
                        return Ok(true);
                    }
                    cur = self.object(id).prototype;
                }
                _ => {
                    if self.own_property_raw(id, key)?.is_some() {
                        return Ok(true);
                    }
                    cur = self.object(id).prototype;
                }
            }
            if budget == 0 {
                return Err(VmError::range_error("prototype chain too long"));
            }
            budget -= 1;
        }
        Ok(false)
    }

    /// `delete base[key]`. Returns whether the deletion succeeded; in
    /// strict mode a failure raises instead.
    pub fn delete_property(&mut self, base: Value, key: Value, strict: bool) -> VmResult<bool> {
        let pkey = self.classify_key(key)?;
        self.delete_property_k(base, pkey, strict)
    }

    /// Delete with a pre-classified key.
    pub fn delete_property_k(
        &mut self,
        base: Value,
        key: PropKey,
        strict: bool,
    ) -> VmResult<bool> {
        let depth = self.stack_depth();
        let result = self.delete_walk(base, key, strict);
        self.truncate_stack(depth);
        result
    }

    fn delete_walk(&mut self, base: Value, key: PropKey, strict: bool) -> VmResult<bool> {
        if base.is_nullish() {
            return Err(VmError::type_error(
                "cannot delete property of null or undefined",
            ));
        }

        // Trap-less proxies forward to their target; the hop count shares
        // the chain sanity limit, and each hop stays pinned like the other
        // walks.
        let mut base = base;
        let mut budget = self.config().prototype_chain_sanity;
        let id = loop {
            let Some(id) = base.as_object() else {
                // Virtual properties of primitives are non-configurable.
                let virt = self.primitive_own_get(base, key)?;
                if let Some(v) = virt {
                    self.decref(v);
                    if !v.is_undefined() {
                        return delete_reject(strict, "cannot delete virtual property");
                    }
                }
                return Ok(true);
            };
            let ObjectKind::Proxy(data) = &self.object(id).kind else {
                break id;
            };
            let (target, handler) = (data.target, data.handler);
            self.push(Value::object(id));
            if let Some(trap) = self.proxy_trap(id, b"deleteProperty")? {
                let keyv = self.key_value(key)?;
                self.push(trap);
                self.push(keyv);
                let result = self.call(trap, handler, &[target, keyv]);
                self.pop();
                self.pop();
                self.decref(trap);
                let result = result?;
                let ok = result.to_boolean();
                self.decref(result);
                if ok {
                    self.check_delete_invariant(target, key)?;
                    return Ok(true);
                }
                return delete_reject(strict, "proxy deleteProperty trap rejected");
            }
            if budget == 0 {
                return Err(VmError::range_error("proxy chain too long"));
            }
            budget -= 1;
            base = target;
        };

        let wk_length = self.well_known().length;
        match &self.object(id).kind {
            ObjectKind::Array(part) => {
                if let PropKey::Str(k) = key
                    && k == wk_length
                {
                    return delete_reject(strict, "cannot delete array length");
                }
                if let PropKey::Index(i) = key
                    && (i as usize) < part.items.len()
                {
                    let part = self
                        .object_mut(id)
                        .array_part_mut()
                        .unwrap_or_else(|| unreachable!("array kind changed"));
                    let old = std::mem::replace(&mut part.items[i as usize], Value::unused());
                    if !old.is_unused() {
                        self.decref(old);
                    }
                    return Ok(true);
                }
            }
            ObjectKind::StringObject(s) => {
                let virt = matches!(key, PropKey::Str(k) if k == wk_length)
                    || matches!(key, PropKey::Index(i) if i < self.string(*s).charlen());
                if virt {
                    return delete_reject(strict, "cannot delete virtual property");
                }
            }
            ObjectKind::BufferView(view) => {
                if let PropKey::Index(i) = key {
                    if (i as usize) < view.length {
                        return delete_reject(strict, "cannot delete typed array element");
                    }
                    return Ok(true);
                }
                if let PropKey::Str(k) = key
                    && k == wk_length
                {
                    return delete_reject(strict, "cannot delete virtual property");
                }
            }
            _ => {}
        }

        let skey = self.key_string(key)?;
        let Some(prop) = self.object(id).props.get(&skey).copied() else {
            return Ok(true);
        };
        if !prop.attrs.configurable() {
            return delete_reject(strict, "property is not configurable");
        }
        if let Some(prop) = self.object_mut(id).props.shift_remove(&skey) {
            self.decref_id(skey.heap_id());
            self.release_property(prop);
        }
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Define / descriptor queries
    // ------------------------------------------------------------------

    /// `Object.getOwnPropertyDescriptor`-level query: no traps fire except
    /// on proxies, where the walk is delegated to the target.
    pub fn get_own_property(&mut self, base: Value, key: Value) -> VmResult<Option<Property>> {
        let pkey = self.classify_key(key)?;
        let Some(mut id) = base.as_object() else {
            return Ok(None);
        };
        let mut budget = self.config().prototype_chain_sanity;
        while let ObjectKind::Proxy(data) = &self.object(id).kind {
            let target = data.target;
            if budget == 0 {
                return Err(VmError::range_error("proxy chain too long"));
            }
            budget -= 1;
            let Some(tid) = target.as_object() else {
                return Ok(None);
            };
            id = tid;
        }
        self.own_property_raw(id, pkey)
    }

    /// `Object.defineProperty`-level define with descriptor semantics.
    ///
    /// Counts references for everything stored. Proxies delegate to their
    /// target (the defineProperty trap is not implemented).
    pub fn define_own_property(
        &mut self,
        base: Value,
        key: Value,
        desc: Property,
    ) -> VmResult<()> {
        let pkey = self.classify_key(key)?;
        let Some(mut id) = base.as_object() else {
            return Err(VmError::type_error("cannot define property on primitive"));
        };
        let mut budget = self.config().prototype_chain_sanity;
        while let ObjectKind::Proxy(data) = &self.object(id).kind {
            let target = data.target;
            if budget == 0 {
                return Err(VmError::range_error("proxy chain too long"));
            }
            budget -= 1;
            let Some(tid) = target.as_object() else {
                return Err(VmError::type_error("cannot define property on primitive"));
            };
            id = tid;
        }

        // Virtual slots cannot be redefined.
        let wk_length = self.well_known().length;
        let virt = match &self.object(id).kind {
            ObjectKind::Array(_) => matches!(pkey, PropKey::Str(k) if k == wk_length),
            ObjectKind::StringObject(s) => {
                matches!(pkey, PropKey::Str(k) if k == wk_length)
                    || matches!(pkey, PropKey::Index(i) if i < self.string(*s).charlen())
            }
            ObjectKind::BufferView(_) => {
                matches!(pkey, PropKey::Index(_))
                    || matches!(pkey, PropKey::Str(k) if k == wk_length)
            }
            _ => false,
        };
        if virt {
            return Err(VmError::type_error("cannot redefine virtual property"));
        }

        // A plain data define on an array index routes through element
        // storage.
        if let PropKey::Index(i) = pkey
            && self.object(id).array_part().is_some()
            && desc.attrs == PropAttrs::DATA
            && !desc.slot.is_accessor()
        {
            if !self.object(id).extensible && !self.array_has_own_dense(id, i) {
                return Err(VmError::type_error("object is not extensible"));
            }
            if let PropertySlot::Data(v) = desc.slot {
                return self.array_put_index(id, i, v);
            }
        }

        let skey = self.key_string(pkey)?;
        let existing = self.object(id).props.get(&skey).copied();
        match existing {
            None => {
                if !self.object(id).extensible {
                    return Err(VmError::type_error("object is not extensible"));
                }
                self.count_property_refs(&desc);
                self.incref_id(skey.heap_id());
                self.object_mut(id).props.insert(skey, desc);
                Ok(())
            }
            Some(old) => {
                if !old.attrs.configurable() {
                    let same_shape = old.slot.is_accessor() == desc.slot.is_accessor()
                        && old.attrs.enumerable() == desc.attrs.enumerable()
                        && (!desc.attrs.configurable());
                    let write_ok = match (&old.slot, &desc.slot) {
                        (PropertySlot::Data(_), PropertySlot::Data(_)) => {
                            old.attrs.writable() || !desc.attrs.writable()
                        }
                        (
                            PropertySlot::Accessor { get: g0, set: s0 },
                            PropertySlot::Accessor { get: g1, set: s1 },
                        ) => g0 == g1 && s0 == s1,
                        _ => false,
                    };
                    if !same_shape || !write_ok {
                        return Err(VmError::type_error("cannot redefine property"));
                    }
                    if let (PropertySlot::Data(old_v), PropertySlot::Data(new_v)) =
                        (&old.slot, &desc.slot)
                        && !old.attrs.writable()
                        && old_v != new_v
                    {
                        return Err(VmError::type_error("cannot redefine property"));
                    }
                }
                self.count_property_refs(&desc);
                self.object_mut(id).props.insert(skey, desc);
                self.release_property(old);
                Ok(())
            }
        }
    }

    fn count_property_refs(&mut self, prop: &Property) {
        match prop.slot {
            PropertySlot::Data(v) => self.incref(v),
            PropertySlot::Accessor { get, set } => {
                self.incref(get);
                self.incref(set);
            }
        }
    }

    // ------------------------------------------------------------------
    // Own keys
    // ------------------------------------------------------------------

    /// Own keys of one object in canonical order: array indices ascending,
    /// then string keys in insertion order, hidden keys last (and only when
    /// `include_hidden`).
    pub fn own_property_keys(
        &mut self,
        id: ObjectId,
        include_nonenumerable: bool,
        include_hidden: bool,
    ) -> VmResult<Vec<PropKey>> {
        let depth = self.stack_depth();
        let result = self.own_keys_walk(id, include_nonenumerable, include_hidden);
        self.truncate_stack(depth);
        result
    }

    fn own_keys_walk(
        &mut self,
        id: ObjectId,
        include_nonenumerable: bool,
        include_hidden: bool,
    ) -> VmResult<Vec<PropKey>> {
        let mut id = id;
        let mut budget = self.config().prototype_chain_sanity;
        while let ObjectKind::Proxy(data) = &self.object(id).kind {
            let (target, handler) = (data.target, data.handler);
            self.push(Value::object(id));
            if let Some(trap) = self.proxy_trap(id, b"ownKeys")? {
                return self.own_keys_from_trap(trap, target, handler, include_hidden);
            }
            if budget == 0 {
                return Err(VmError::range_error("proxy chain too long"));
            }
            budget -= 1;
            let Some(tid) = target.as_object() else {
                return Err(VmError::type_error("proxy target is not an object"));
            };
            id = tid;
        }

        let mut indices: Vec<u32> = Vec::new();
        let mut strings: Vec<StringId> = Vec::new();
        let mut hidden: Vec<StringId> = Vec::new();

        // Virtual index ranges first.
        match &self.object(id).kind {
            ObjectKind::Array(part) => {
                for (i, v) in part.items.iter().enumerate() {
                    if !v.is_unused() {
                        indices.push(i as u32);
                    }
                }
            }
            ObjectKind::StringObject(s) => {
                indices.extend(0..self.string(*s).charlen());
            }
            ObjectKind::BufferView(view) => {
                indices.extend(0..view.length as u32);
            }
            _ => {}
        }

        for (k, prop) in &self.object(id).props {
            let s = self.string(*k);
            if s.has_flag(string_flags::HIDDEN) {
                if include_hidden {
                    hidden.push(*k);
                }
                continue;
            }
            if !include_nonenumerable && !prop.attrs.enumerable() {
                continue;
            }
            match s.array_index() {
                Some(i) => indices.push(i),
                None => strings.push(*k),
            }
        }

        indices.sort_unstable();
        indices.dedup();

        let mut out: Vec<PropKey> = Vec::with_capacity(indices.len() + strings.len() + hidden.len() + 1);
        out.extend(indices.into_iter().map(PropKey::Index));
        if include_nonenumerable {
            // Virtual `length` slots count as own non-enumerable keys.
            let has_virtual_length = matches!(
                self.object(id).kind,
                ObjectKind::Array(_) | ObjectKind::StringObject(_) | ObjectKind::BufferView(_)
            );
            if has_virtual_length {
                out.push(PropKey::Str(self.well_known().length));
            }
        }
        out.extend(strings.into_iter().map(PropKey::Str));
        out.extend(hidden.into_iter().map(PropKey::Str));
        Ok(out)
    }

    fn own_keys_from_trap(
        &mut self,
        trap: Value,
        target: Value,
        handler: Value,
        include_hidden: bool,
    ) -> VmResult<Vec<PropKey>> {
        self.push(trap);
        let result = self.call(trap, handler, &[target]);
        self.pop();
        self.decref(trap);
        let result = result?;
        let keys = (|| {
            let Some(arr) = result.as_object() else {
                return Err(VmError::type_error("ownKeys trap must return an array"));
            };
            let len = self
                .object(arr)
                .array_part()
                .map(|p| p.length)
                .ok_or_else(|| VmError::type_error("ownKeys trap must return an array"))?;
            let mut keys = Vec::with_capacity(len as usize);
            for i in 0..len {
                let v = self.get_property_k(result, PropKey::Index(i))?;
                let key = self.classify_key(v);
                self.decref(v);
                let key = key?;
                if let PropKey::Str(s) = key
                    && self.string(s).has_flag(string_flags::HIDDEN)
                    && !include_hidden
                {
                    continue;
                }
                keys.push(key);
            }
            self.check_own_keys_invariant(target, &keys)?;
            Ok(keys)
        })();
        self.decref(result);
        keys
    }

    // ------------------------------------------------------------------
    // Buffer view element access
    // ------------------------------------------------------------------

    pub(crate) fn read_view_element(&self, view: BufferView, index: usize) -> Value {
        let off = view.byte_offset + index * view.kind.element_size();
        let bytes = self.buffer(view.buffer).bytes();
        match view.kind {
            ElemKind::Uint8 | ElemKind::Uint8Clamped => Value::fastint(bytes[off] as i64),
            ElemKind::Int8 => Value::fastint(bytes[off] as i8 as i64),
            ElemKind::Uint16 => {
                Value::fastint(u16::from_ne_bytes([bytes[off], bytes[off + 1]]) as i64)
            }
            ElemKind::Int16 => {
                Value::fastint(i16::from_ne_bytes([bytes[off], bytes[off + 1]]) as i64)
            }
            ElemKind::Uint32 => Value::fastint(u32::from_ne_bytes([
                bytes[off],
                bytes[off + 1],
                bytes[off + 2],
                bytes[off + 3],
            ]) as i64),
            ElemKind::Int32 => Value::fastint(i32::from_ne_bytes([
                bytes[off],
                bytes[off + 1],
                bytes[off + 2],
                bytes[off + 3],
            ]) as i64),
            ElemKind::Float32 => Value::number(f32::from_ne_bytes([
                bytes[off],
                bytes[off + 1],
                bytes[off + 2],
                bytes[off + 3],
            ]) as f64),
            ElemKind::Float64 => {
                let mut b = [0u8; 8];
                b.copy_from_slice(&bytes[off..off + 8]);
                Value::number(f64::from_ne_bytes(b))
            }
        }
    }

    pub(crate) fn write_view_element(
        &mut self,
        view: BufferView,
        index: usize,
        value: Value,
    ) -> VmResult<()> {
        let Some(d) = value.as_number() else {
            return Err(VmError::type_error("typed array write requires a number"));
        };
        let off = view.byte_offset + index * view.kind.element_size();
        let bytes = self.buffer_mut(view.buffer).bytes_mut();
        match view.kind {
            ElemKind::Uint8 => bytes[off] = to_uint32(d) as u8,
            ElemKind::Int8 => bytes[off] = to_uint32(d) as u8,
            ElemKind::Uint8Clamped => {
                let clamped = if d.is_nan() { 0.0 } else { d.clamp(0.0, 255.0) };
                bytes[off] = clamped.round_ties_even() as u8;
            }
            ElemKind::Uint16 | ElemKind::Int16 => {
                bytes[off..off + 2].copy_from_slice(&(to_uint32(d) as u16).to_ne_bytes());
            }
            ElemKind::Uint32 | ElemKind::Int32 => {
                bytes[off..off + 4].copy_from_slice(&to_uint32(d).to_ne_bytes());
            }
            ElemKind::Float32 => {
                bytes[off..off + 4].copy_from_slice(&(d as f32).to_ne_bytes());
            }
            ElemKind::Float64 => {
                bytes[off..off + 8].copy_from_slice(&d.to_ne_bytes());
            }
        }
        Ok(())
    }
}

#[inline]
fn put_reject(strict: bool, msg: &str) -> VmResult<()> {
    if strict {
        Err(VmError::type_error(msg))
    } else {
        Ok(())
    }
}

#[inline]
fn delete_reject(strict: bool, msg: &str) -> VmResult<bool> {
    if strict {
        Err(VmError::type_error(msg))
    } else {
        Ok(false)
    }
}

/// ToUint32: truncate toward zero, then fold modulo 2^32. The remainder is
/// exact at any magnitude because large doubles are themselves multiples of
/// large powers of two.
pub(crate) fn to_uint32(d: f64) -> u32 {
    if !d.is_finite() || d == 0.0 {
        return 0;
    }
    d.trunc().rem_euclid(4_294_967_296.0) as u32
}

impl Value {
    /// Boolean coercion without heap access. String handles count as
    /// truthy; empty-string falsiness needs the heap and is applied by the
    /// callers that care.
    #[inline]
    pub fn to_boolean(&self) -> bool {
        if self.is_undefined() || self.is_null() || self.is_unused() {
            return false;
        }
        if let Some(b) = self.as_boolean() {
            return b;
        }
        if let Some(i) = self.as_fastint() {
            return i != 0;
        }
        if let Some(d) = self.as_number() {
            return d != 0.0 && !d.is_nan();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(heap: &mut Heap, s: &str) -> Value {
        Value::string(heap.intern_str(s).unwrap())
    }

    #[test]
    fn test_key_classification() {
        let mut heap = Heap::new().unwrap();
        let kv = k(&mut heap, "0");
        assert_eq!(heap.classify_key(kv).unwrap(), PropKey::Index(0));
        let kv = k(&mut heap, "042");
        assert!(matches!(heap.classify_key(kv).unwrap(), PropKey::Str(_)));
        assert_eq!(
            heap.classify_key(Value::fastint(7)).unwrap(),
            PropKey::Index(7)
        );
        let kv = k(&mut heap, "4294967295");
        assert!(matches!(heap.classify_key(kv).unwrap(), PropKey::Str(_)));
        assert!(matches!(
            heap.classify_key(Value::number(1.5)).unwrap(),
            PropKey::Str(_)
        ));
    }

    #[test]
    fn test_get_put_roundtrip() {
        let mut heap = Heap::new().unwrap();
        let o = heap.new_object().unwrap();
        heap.push(Value::object(o));
        let key = k(&mut heap, "answer");
        heap.put_property(Value::object(o), key, Value::fastint(42), true)
            .unwrap();
        let v = heap.get_property(Value::object(o), key).unwrap();
        assert_eq!(v.as_fastint(), Some(42));
        heap.pop();
    }

    #[test]
    fn test_missing_property_is_undefined() {
        let mut heap = Heap::new().unwrap();
        let o = heap.new_object().unwrap();
        heap.push(Value::object(o));
        let key = k(&mut heap, "ghost");
        assert!(heap.get_property(Value::object(o), key).unwrap().is_undefined());
        heap.pop();
    }

    #[test]
    fn test_prototype_inheritance() {
        let mut heap = Heap::new().unwrap();
        let proto = heap.new_object().unwrap();
        heap.push(Value::object(proto));
        let key = k(&mut heap, "inherited");
        heap.put_property(Value::object(proto), key, Value::fastint(1), true)
            .unwrap();
        let child = heap.new_object_with_proto(Some(proto)).unwrap();
        heap.push(Value::object(child));
        let v = heap.get_property(Value::object(child), key).unwrap();
        assert_eq!(v.as_fastint(), Some(1));
        // Writing shadows on the child; the prototype is untouched.
        heap.put_property(Value::object(child), key, Value::fastint(2), true)
            .unwrap();
        let v = heap.get_property(Value::object(child), key).unwrap();
        assert_eq!(v.as_fastint(), Some(2));
        let v = heap.get_property(Value::object(proto), key).unwrap();
        assert_eq!(v.as_fastint(), Some(1));
        heap.pop();
        heap.pop();
    }

    #[test]
    fn test_cyclic_prototype_errors() {
        let mut heap = Heap::new().unwrap();
        let a = heap.new_object().unwrap();
        heap.push(Value::object(a));
        let b = heap.new_object_with_proto(Some(a)).unwrap();
        heap.push(Value::object(b));
        // Cycle: a -> b -> a.
        heap.set_prototype(a, Some(b));
        let key = k(&mut heap, "nope");
        let err = heap.get_property(Value::object(a), key).unwrap_err();
        assert!(err.is_range_error());
        let err = heap.has_property(Value::object(a), key).unwrap_err();
        assert!(err.is_range_error());
        // Break the cycle so refzero can settle the pair.
        heap.set_prototype(a, None);
        heap.pop();
        heap.pop();
    }

    #[test]
    fn test_array_dense_and_length() {
        let mut heap = Heap::new().unwrap();
        let a = heap.new_array().unwrap();
        heap.push(Value::object(a));
        let av = Value::object(a);
        heap.put_property(av, Value::fastint(0), Value::fastint(10), true)
            .unwrap();
        heap.put_property(av, Value::fastint(1), Value::fastint(11), true)
            .unwrap();
        let lk = k(&mut heap, "length");
        let len = heap.get_property(av, lk).unwrap();
        assert_eq!(len.as_fastint(), Some(2));
        // Sparse write spills past the dense part and stretches length.
        heap.put_property(av, Value::fastint(100), Value::fastint(1), true)
            .unwrap();
        let len = heap.get_property(av, lk).unwrap();
        assert_eq!(len.as_fastint(), Some(101));
        let v = heap.get_property(av, Value::fastint(100)).unwrap();
        assert_eq!(v.as_fastint(), Some(1));
        // Truncation drops both dense and spilled elements.
        heap.put_property(av, lk, Value::fastint(1), true).unwrap();
        let v = heap.get_property(av, Value::fastint(1)).unwrap();
        assert!(v.is_undefined());
        let v = heap.get_property(av, Value::fastint(100)).unwrap();
        assert!(v.is_undefined());
        let v = heap.get_property(av, Value::fastint(0)).unwrap();
        assert_eq!(v.as_fastint(), Some(10));
        heap.pop();
    }

    #[test]
    fn test_string_object_chars() {
        let mut heap = Heap::new().unwrap();
        let s = heap.intern(b"abc").unwrap();
        let o = heap.new_string_object(s).unwrap();
        heap.push(Value::object(o));
        let ov = Value::object(o);
        let v = heap.get_property(ov, Value::fastint(1)).unwrap();
        let cs = v.as_string().unwrap();
        assert_eq!(heap.string(cs).as_bytes(), b"b");
        heap.decref(v);
        let lk = k(&mut heap, "length");
        assert_eq!(heap.get_property(ov, lk).unwrap().as_fastint(), Some(3));
        // Char slots are read-only.
        let err = heap
            .put_property(ov, Value::fastint(1), Value::fastint(0), true)
            .unwrap_err();
        assert!(err.is_type_error());
        heap.pop();
    }

    #[test]
    fn test_typed_array_short_circuit() {
        let mut heap = Heap::new().unwrap();
        let ta = heap.new_typed_array(ElemKind::Uint8, 4).unwrap();
        heap.push(Value::object(ta));
        let tav = Value::object(ta);
        heap.put_property(tav, Value::fastint(0), Value::fastint(200), true)
            .unwrap();
        let v = heap.get_property(tav, Value::fastint(0)).unwrap();
        assert_eq!(v.as_fastint(), Some(200));

        // Shadow index 10 on the prototype; an out-of-bounds read must
        // still be undefined, never the inherited value.
        let proto = heap.builtin_object(Builtin::TypedArrayPrototype);
        heap.put_property(Value::object(proto), Value::fastint(10), Value::fastint(7), true)
            .unwrap();
        let v = heap.get_property(tav, Value::fastint(10)).unwrap();
        assert!(v.is_undefined());
        // Out-of-bounds write is swallowed, not spilled to the table.
        heap.put_property(tav, Value::fastint(10), Value::fastint(3), false)
            .unwrap();
        let v = heap.get_property(tav, Value::fastint(10)).unwrap();
        assert!(v.is_undefined());
        heap.pop();
    }

    #[test]
    fn test_accessor_dispatch() {
        fn getter(_heap: &mut Heap, _this: Value, _args: &[Value]) -> VmResult<Value> {
            Ok(Value::fastint(5))
        }
        fn setter(heap: &mut Heap, this: Value, args: &[Value]) -> VmResult<Value> {
            let key = heap.intern(b"stored")?;
            heap.put_property_k(this, PropKey::Str(key), args[0], true)?;
            Ok(Value::undefined())
        }
        let mut heap = Heap::new().unwrap();
        let o = heap.new_object().unwrap();
        heap.push(Value::object(o));
        let g = heap.new_native_function(getter, 0, 0).unwrap();
        heap.push(Value::object(g));
        let s = heap.new_native_function(setter, 1, 0).unwrap();
        heap.push(Value::object(s));
        let key = k(&mut heap, "acc");
        heap.define_own_property(
            Value::object(o),
            key,
            Property::accessor(
                Value::object(g),
                Value::object(s),
                PropAttrs::from_bits(PropAttrs::ENUMERABLE | PropAttrs::CONFIGURABLE),
            ),
        )
        .unwrap();

        let v = heap.get_property(Value::object(o), key).unwrap();
        assert_eq!(v.as_fastint(), Some(5));
        heap.put_property(Value::object(o), key, Value::fastint(9), true)
            .unwrap();
        let sk = k(&mut heap, "stored");
        let v = heap.get_property(Value::object(o), sk).unwrap();
        assert_eq!(v.as_fastint(), Some(9));
        heap.pop();
        heap.pop();
        heap.pop();
    }

    #[test]
    fn test_non_writable_rejects() {
        let mut heap = Heap::new().unwrap();
        let o = heap.new_object().unwrap();
        heap.push(Value::object(o));
        let key = k(&mut heap, "ro");
        heap.define_own_property(
            Value::object(o),
            key,
            Property::data_with_attrs(Value::fastint(1), PropAttrs::NONE),
        )
        .unwrap();
        let err = heap
            .put_property(Value::object(o), key, Value::fastint(2), true)
            .unwrap_err();
        assert!(err.is_type_error());
        // Sloppy mode swallows the failure.
        heap.put_property(Value::object(o), key, Value::fastint(2), false)
            .unwrap();
        let v = heap.get_property(Value::object(o), key).unwrap();
        assert_eq!(v.as_fastint(), Some(1));
        // Non-configurable: delete fails too.
        let err = heap.delete_property(Value::object(o), key, true).unwrap_err();
        assert!(err.is_type_error());
        assert!(!heap.delete_property(Value::object(o), key, false).unwrap());
        heap.pop();
    }

    #[test]
    fn test_delete() {
        let mut heap = Heap::new().unwrap();
        let o = heap.new_object().unwrap();
        heap.push(Value::object(o));
        let key = k(&mut heap, "tmp");
        heap.put_property(Value::object(o), key, Value::fastint(1), true)
            .unwrap();
        assert!(heap.has_property(Value::object(o), key).unwrap());
        assert!(heap.delete_property(Value::object(o), key, true).unwrap());
        assert!(!heap.has_property(Value::object(o), key).unwrap());
        // Deleting an absent key succeeds.
        assert!(heap.delete_property(Value::object(o), key, true).unwrap());
        heap.pop();
    }

    #[test]
    fn test_own_keys_ordering() {
        let mut heap = Heap::new().unwrap();
        let o = heap.new_object().unwrap();
        heap.push(Value::object(o));
        let ov = Value::object(o);
        // Inserted out of order: string, index 2, string, index 0.
        let kb = k(&mut heap, "beta");
        heap.put_property(ov, kb, Value::fastint(1), true).unwrap();
        heap.put_property(ov, Value::fastint(2), Value::fastint(1), true)
            .unwrap();
        let ka = k(&mut heap, "alpha");
        heap.put_property(ov, ka, Value::fastint(1), true).unwrap();
        heap.put_property(ov, Value::fastint(0), Value::fastint(1), true)
            .unwrap();

        let keys = heap.own_property_keys(o, false, false).unwrap();
        let alpha = heap.intern(b"alpha").unwrap();
        let beta = heap.intern(b"beta").unwrap();
        assert_eq!(
            keys,
            vec![
                PropKey::Index(0),
                PropKey::Index(2),
                PropKey::Str(beta),
                PropKey::Str(alpha),
            ]
        );
        heap.pop();
    }

    #[test]
    fn test_sparse_array_own_keys() {
        let mut heap = Heap::new().unwrap();
        let a = heap.new_array().unwrap();
        heap.push(Value::object(a));
        let gap = k(&mut heap, "gap-after");
        heap.put_property(Value::object(a), Value::fastint(5), gap, true)
            .unwrap();

        // Holes produce no keys; only index 5 is present.
        let keys = heap.own_property_keys(a, false, false).unwrap();
        assert_eq!(keys, vec![PropKey::Index(5)]);
        // `length` shows up only when non-enumerable keys are requested.
        let keys = heap.own_property_keys(a, true, false).unwrap();
        let length = heap.intern(b"length").unwrap();
        assert_eq!(keys, vec![PropKey::Index(5), PropKey::Str(length)]);
        let lk = k(&mut heap, "length");
        assert_eq!(
            heap.get_property(Value::object(a), lk).unwrap().as_fastint(),
            Some(6)
        );
        heap.pop();
    }

    #[test]
    fn test_hidden_keys_last_and_filtered() {
        let mut heap = Heap::new().unwrap();
        let o = heap.new_object().unwrap();
        heap.push(Value::object(o));
        let ov = Value::object(o);
        let hk = Value::string(heap.intern(b"\xFFinternal").unwrap());
        heap.put_property(ov, hk, Value::fastint(1), true).unwrap();
        let vk = k(&mut heap, "visible");
        heap.put_property(ov, vk, Value::fastint(1), true).unwrap();

        let keys = heap.own_property_keys(o, false, false).unwrap();
        assert_eq!(keys.len(), 1);
        let keys = heap.own_property_keys(o, false, true).unwrap();
        assert_eq!(keys.len(), 2);
        let hidden = heap.intern(b"\xFFinternal").unwrap();
        assert_eq!(keys[1], PropKey::Str(hidden));
        heap.pop();
    }

    #[test]
    fn test_primitive_string_base() {
        let mut heap = Heap::new().unwrap();
        let s = Value::string(heap.intern(b"hi").unwrap());
        heap.push(s);
        let lk = k(&mut heap, "length");
        assert_eq!(heap.get_property(s, lk).unwrap().as_fastint(), Some(2));
        let c = heap.get_property(s, Value::fastint(0)).unwrap();
        assert_eq!(heap.string(c.as_string().unwrap()).as_bytes(), b"h");
        heap.decref(c);
        heap.pop();
    }

    #[test]
    fn test_to_uint32_folds_modulo() {
        assert_eq!(to_uint32(0.0), 0);
        assert_eq!(to_uint32(-0.0), 0);
        assert_eq!(to_uint32(-1.0), 0xFFFF_FFFF);
        assert_eq!(to_uint32(4_294_967_296.0), 0);
        assert_eq!(to_uint32(4_294_967_297.5), 1);
        assert_eq!(to_uint32(f64::NAN), 0);
        assert_eq!(to_uint32(f64::NEG_INFINITY), 0);
        // Magnitudes beyond the i64 range still wrap, they do not saturate.
        assert_eq!(to_uint32(2f64.powi(64) + 65_536.0), 65_536);
        assert_eq!(to_uint32(-(2f64.powi(64)) - 65_536.0), 0xFFFF_0000);
    }

    #[test]
    fn test_nullish_base_errors() {
        let mut heap = Heap::new().unwrap();
        let key = k(&mut heap, "x");
        assert!(heap.get_property(Value::null(), key).unwrap_err().is_type_error());
        assert!(
            heap.put_property(Value::undefined(), key, Value::fastint(1), false)
                .unwrap_err()
                .is_type_error()
        );
    }
}
