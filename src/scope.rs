//! Variable bindings shared across one Runner's Operation chain (§9
//! "Reference cycles"). A `Reference` node never owns the value it names —
//! it carries only a slot identifier, looked up here at evaluation time.
//! This is the same indirection the teacher uses for pattern variables
//! (`Rc<RefCell<NodePattern<'a>>>` in `ConnectedPattern`), generalized to
//! every kind of binding (WITH alias, UNWIND element, MATCH-bound
//! variable).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::value::Value;

#[derive(Default)]
pub struct Scope {
    bindings: RefCell<HashMap<String, Rc<RefCell<Value>>>>,
}

impl Scope {
    pub fn new() -> Self {
        Scope::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.bindings.borrow().get(name).map(|slot| slot.borrow().clone())
    }

    /// Sets (creating the slot on first use) the named binding to `value`.
    /// Operations call this once per emitted row; rows flow strictly in
    /// order (§5), so overwriting in place is safe — no consumer holds a
    /// reference across two different bindings of the same name.
    pub fn bind(&self, name: &str, value: Value) {
        let mut bindings = self.bindings.borrow_mut();
        match bindings.get(name) {
            Some(slot) => *slot.borrow_mut() = value,
            None => {
                bindings.insert(name.to_string(), Rc::new(RefCell::new(value)));
            }
        }
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.bindings.borrow().contains_key(name)
    }

    pub fn unbind(&self, name: &str) {
        self.bindings.borrow_mut().remove(name);
    }

    pub fn names(&self) -> Vec<String> {
        self.bindings.borrow().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_then_get_round_trips() {
        let scope = Scope::new();
        scope.bind("x", Value::Integer(1));
        assert_eq!(scope.get("x"), Some(Value::Integer(1)));
    }

    #[test]
    fn rebinding_overwrites_existing_slot() {
        let scope = Scope::new();
        scope.bind("x", Value::Integer(1));
        scope.bind("x", Value::Integer(2));
        assert_eq!(scope.get("x"), Some(Value::Integer(2)));
    }

    #[test]
    fn unbound_name_is_none() {
        let scope = Scope::new();
        assert_eq!(scope.get("missing"), None);
    }
}
