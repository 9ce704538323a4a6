//! Proxy trap plumbing
//!
//! Trap lookup is an ordinary property get on the handler, so handler
//! getters and handler proxies compose. A missing (or nullish) trap means
//! the operation forwards to the target; a non-callable trap is a
//! `TypeError` at lookup time.
//!
//! After a trap runs, its answer is validated against the target's own
//! non-configurable properties. The checks are skipped when the target is
//! itself a proxy; its own invariants apply when the walk reaches it.

use marten_vm_gc::ObjectId;

use crate::error::{VmError, VmResult};
use crate::heap::Heap;
use crate::object::{ObjectKind, Property, PropertySlot};
use crate::property::PropKey;
use crate::value::Value;

impl Heap {
    /// Look up a trap on a proxy's handler. Returns a counted callable, or
    /// `None` when the trap is absent.
    pub(crate) fn proxy_trap(&mut self, id: ObjectId, name: &[u8]) -> VmResult<Option<Value>> {
        let ObjectKind::Proxy(data) = &self.object(id).kind else {
            return Err(VmError::internal("trap lookup on a non-proxy"));
        };
        let handler = data.handler;
        let name_id = self.intern(name)?;
        let trap = self.get_property_k(handler, PropKey::Str(name_id))?;
        if trap.is_undefined() || trap.is_null() {
            self.decref(trap);
            return Ok(None);
        }
        let callable = trap.is_lightfunc()
            || trap
                .as_object()
                .is_some_and(|f| self.object(f).is_callable() || matches!(self.object(f).kind, ObjectKind::Proxy(_)));
        if !callable {
            self.decref(trap);
            return Err(VmError::type_error("proxy trap is not callable"));
        }
        Ok(Some(trap))
    }

    /// Target's own descriptor for invariant checks, or `None` when the
    /// target is itself a proxy (its own traps enforce its invariants).
    fn target_own(&mut self, target: Value, key: PropKey) -> VmResult<Option<Property>> {
        let Some(id) = target.as_object() else {
            return Ok(None);
        };
        if matches!(self.object(id).kind, ObjectKind::Proxy(_)) {
            return Ok(None);
        }
        self.own_property_raw(id, key)
    }

    pub(crate) fn check_get_invariant(
        &mut self,
        target: Value,
        key: PropKey,
        result: Value,
    ) -> VmResult<()> {
        let Some(prop) = self.target_own(target, key)? else {
            return Ok(());
        };
        if prop.attrs.configurable() {
            return Ok(());
        }
        match prop.slot {
            PropertySlot::Data(v) => {
                if !prop.attrs.writable() && result != v {
                    return Err(VmError::type_error(
                        "get trap disagrees with non-configurable non-writable property",
                    ));
                }
            }
            PropertySlot::Accessor { get, .. } => {
                if get.is_unused() && !result.is_undefined() {
                    return Err(VmError::type_error(
                        "get trap returned a value for a getter-less accessor",
                    ));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn check_set_invariant(
        &mut self,
        target: Value,
        key: PropKey,
        value: Value,
    ) -> VmResult<()> {
        let Some(prop) = self.target_own(target, key)? else {
            return Ok(());
        };
        if prop.attrs.configurable() {
            return Ok(());
        }
        match prop.slot {
            PropertySlot::Data(v) => {
                if !prop.attrs.writable() && value != v {
                    return Err(VmError::type_error(
                        "set trap changed a non-configurable non-writable property",
                    ));
                }
            }
            PropertySlot::Accessor { set, .. } => {
                if set.is_unused() {
                    return Err(VmError::type_error(
                        "set trap wrote through a setter-less accessor",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Checked when a `has` trap answers false.
    pub(crate) fn check_has_invariant(&mut self, target: Value, key: PropKey) -> VmResult<()> {
        let Some(prop) = self.target_own(target, key)? else {
            return Ok(());
        };
        if !prop.attrs.configurable() {
            return Err(VmError::type_error(
                "has trap hid a non-configurable property",
            ));
        }
        if let Some(id) = target.as_object()
            && !self.object(id).extensible
        {
            return Err(VmError::type_error(
                "has trap hid a property of a non-extensible target",
            ));
        }
        Ok(())
    }

    /// Checked when a `deleteProperty` trap answers true.
    pub(crate) fn check_delete_invariant(&mut self, target: Value, key: PropKey) -> VmResult<()> {
        let Some(prop) = self.target_own(target, key)? else {
            return Ok(());
        };
        if !prop.attrs.configurable() {
            return Err(VmError::type_error(
                "deleteProperty trap deleted a non-configurable property",
            ));
        }
        Ok(())
    }

    /// `ownKeys` answers must cover every non-configurable own key of the
    /// target, and may not invent keys on a non-extensible target.
    pub(crate) fn check_own_keys_invariant(
        &mut self,
        target: Value,
        keys: &[PropKey],
    ) -> VmResult<()> {
        let Some(id) = target.as_object() else {
            return Ok(());
        };
        if matches!(self.object(id).kind, ObjectKind::Proxy(_)) {
            return Ok(());
        }
        let target_keys = self.own_property_keys(id, true, true)?;
        for tk in &target_keys {
            let Some(prop) = self.own_property_raw(id, *tk)? else {
                continue;
            };
            if !prop.attrs.configurable() && !keys.contains(tk) {
                return Err(VmError::type_error(
                    "ownKeys trap omitted a non-configurable key",
                ));
            }
        }
        if !self.object(id).extensible {
            for k in keys {
                if !target_keys.contains(k) {
                    return Err(VmError::type_error(
                        "ownKeys trap invented a key on a non-extensible target",
                    ));
                }
            }
        }
        Ok(())
    }
}
