//! TSD state: dynamic keyed children with the key-observer protocol.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use crate::errors::EvalError;
use crate::ts::input::{Input, InputKind, InputOwner};
use crate::ts::output::{Output, OutputKind, OutputOwner};
use crate::types::meta::{ScalarMeta, TsMeta};
use crate::types::value::{DictValue, ScalarValue, SetDelta};

/// The dynamic children of a TSD output, plus its per-cycle key deltas.
///
/// Child outputs are owned here, not by any node that indexes into them; a
/// removed child is parked in `removed` until the after-evaluation sweep so
/// that consumers can still observe it during the cycle it disappeared.
pub struct DictOutputState {
    key_meta: ScalarMeta,
    value_meta: TsMeta,
    children: BTreeMap<ScalarValue, Rc<Output>>,
    removed: BTreeMap<ScalarValue, Rc<Output>>,
    added: Vec<ScalarValue>,
    observers: Vec<Weak<Input>>,
    key_set: Rc<Output>,
    cleanup_pending: bool,
}

impl DictOutputState {
    pub fn new(key_meta: ScalarMeta, value_meta: TsMeta, owner: &Weak<Output>) -> Self {
        let key_set = Output::build(&TsMeta::Set(key_meta.clone()), OutputOwner::Parent(owner.clone()));
        DictOutputState {
            key_meta,
            value_meta,
            children: BTreeMap::new(),
            removed: BTreeMap::new(),
            added: Vec::new(),
            observers: Vec::new(),
            key_set,
            cleanup_pending: false,
        }
    }

    pub fn children(&self) -> &BTreeMap<ScalarValue, Rc<Output>> {
        &self.children
    }

    pub fn removed_keys(&self) -> impl Iterator<Item = &ScalarValue> {
        self.removed.keys()
    }

    pub fn removed_child(&self, key: &ScalarValue) -> Option<Rc<Output>> {
        self.removed.get(key).cloned()
    }

    pub fn added_keys(&self) -> &[ScalarValue] {
        &self.added
    }

    pub fn invalidate(&mut self) {
        for child in self.children.values() {
            child.mark_invalid();
        }
        self.removed.clear();
        self.added.clear();
    }
}

impl Output {
    /// Applies a dict result entry-by-entry, creating and removing children.
    pub(crate) fn apply_dict_result(
        self: &Rc<Self>,
        entries: Vec<(ScalarValue, DictValue)>,
    ) -> Result<(), EvalError> {
        for (key, entry) in entries {
            {
                let OutputKind::Dict(state) = self.kind() else { unreachable!() };
                let state = state.borrow();
                if !state.key_meta.matches(&key) {
                    return Err(EvalError::TypeMismatch {
                        expected: state.key_meta.to_string(),
                        actual: key.kind_name().to_string(),
                    });
                }
            }
            match entry {
                DictValue::Remove | DictValue::RemoveIfExists => {
                    let strict = matches!(entry, DictValue::Remove);
                    if !self.dict_remove_key(&key)? && strict {
                        return Err(EvalError::MissingKey(key.to_string()));
                    }
                }
                DictValue::Value(value) => {
                    let child = self.dict_get_or_create(&key)?;
                    child.apply_result(value)?;
                }
            }
        }
        Ok(())
    }

    /// The child output for `key`, if the key exists.
    pub fn dict_child(&self, key: &ScalarValue) -> Option<Rc<Output>> {
        match self.kind() {
            OutputKind::Dict(state) => state.borrow().children.get(key).cloned(),
            _ => None,
        }
    }

    /// The current keys of a TSD output.
    pub fn dict_keys(&self) -> Vec<ScalarValue> {
        match self.kind() {
            OutputKind::Dict(state) => state.borrow().children.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// The TSS-shaped view of a TSD output's key set.
    pub fn key_set_output(&self) -> Option<Rc<Output>> {
        match self.kind() {
            OutputKind::Dict(state) => Some(state.borrow().key_set.clone()),
            _ => None,
        }
    }

    /// The child output for `key`, created (and announced to observers) if
    /// absent. A freshly created child appears in value snapshots once it
    /// first ticks.
    pub fn dict_get_or_create(self: &Rc<Self>, key: &ScalarValue) -> Result<Rc<Output>, EvalError> {
        let OutputKind::Dict(state) = self.kind() else {
            return Err(EvalError::TypeMismatch {
                expected: "TSD".to_string(),
                actual: self.meta().to_string(),
            });
        };
        if let Some(child) = state.borrow().children.get(key) {
            return Ok(child.clone());
        }
        let (child, key_set, observers) = {
            let mut state = state.borrow_mut();
            let child = Output::build(&state.value_meta, OutputOwner::Parent(self.weak_self()));
            state.children.insert(key.clone(), child.clone());
            state.added.push(key.clone());
            (child, state.key_set.clone(), state.observers.clone())
        };
        key_set.apply_set_delta(SetDelta::adds([key.clone()]))?;
        for observer in observers {
            if let Some(input) = observer.upgrade() {
                input.dict_on_key_added(key, &child);
            }
        }
        self.ensure_dict_cleanup();
        Ok(child)
    }

    /// Removes `key`, parking its child for the remainder of the cycle.
    /// Returns false when the key was absent.
    pub fn dict_remove_key(self: &Rc<Self>, key: &ScalarValue) -> Result<bool, EvalError> {
        let OutputKind::Dict(state) = self.kind() else {
            return Err(EvalError::TypeMismatch {
                expected: "TSD".to_string(),
                actual: self.meta().to_string(),
            });
        };
        let (key_set, observers) = {
            let mut state = state.borrow_mut();
            let Some(child) = state.children.remove(key) else {
                return Ok(false);
            };
            state.removed.insert(key.clone(), child);
            state.added.retain(|k| k != key);
            (state.key_set.clone(), state.observers.clone())
        };
        key_set.apply_set_delta(SetDelta::removes([key.clone()]))?;
        for observer in observers {
            if let Some(input) = observer.upgrade() {
                input.dict_on_key_removed(key);
            }
        }
        self.mark_modified();
        self.ensure_dict_cleanup();
        Ok(true)
    }

    pub fn add_key_observer(&self, input: &Rc<Input>) {
        if let OutputKind::Dict(state) = self.kind() {
            state.borrow_mut().observers.push(Rc::downgrade(input));
        }
    }

    pub fn remove_key_observer(&self, input: &Rc<Input>) {
        if let OutputKind::Dict(state) = self.kind() {
            let target = Rc::downgrade(input);
            state.borrow_mut().observers.retain(|o| !o.ptr_eq(&target));
        }
    }

    fn ensure_dict_cleanup(self: &Rc<Self>) {
        let OutputKind::Dict(state) = self.kind() else { return };
        {
            let mut state = state.borrow_mut();
            if state.cleanup_pending || (state.added.is_empty() && state.removed.is_empty()) {
                return;
            }
            state.cleanup_pending = true;
        }
        let weak = self.weak_self();
        self.schedule_after_evaluation(Box::new(move || {
            if let Some(output) = weak.upgrade() {
                if let OutputKind::Dict(state) = output.kind() {
                    let mut state = state.borrow_mut();
                    state.removed.clear();
                    state.added.clear();
                    state.cleanup_pending = false;
                }
            }
        }));
    }
}

/// The dynamic children of a TSD input, mirroring its bound output's keys.
pub struct DictInputState {
    value_meta: TsMeta,
    children: BTreeMap<ScalarValue, Rc<Input>>,
    removed: BTreeMap<ScalarValue, Rc<Input>>,
    cleanup_pending: bool,
}

impl DictInputState {
    pub fn new(value_meta: TsMeta) -> Self {
        DictInputState {
            value_meta,
            children: BTreeMap::new(),
            removed: BTreeMap::new(),
            cleanup_pending: false,
        }
    }

    pub fn children(&self) -> &BTreeMap<ScalarValue, Rc<Input>> {
        &self.children
    }

    pub fn removed_child(&self, key: &ScalarValue) -> Option<Rc<Input>> {
        self.removed.get(key).cloned()
    }
}

impl Input {
    /// Responds to a key addition on the bound output: constructs a matching
    /// child input and binds it to the new child output.
    pub(crate) fn dict_on_key_added(self: &Rc<Self>, key: &ScalarValue, child_output: &Rc<Output>) {
        let InputKind::Dict(state) = self.kind() else { return };
        let child = {
            let state = state.borrow();
            Input::build(&state.value_meta, InputOwner::Parent(Rc::downgrade(self)))
        };
        // Binding failures here indicate corrupted wiring; the shapes were
        // checked when the parent dict was bound.
        if child.bind_output(child_output).is_ok() {
            state.borrow_mut().children.insert(key.clone(), child);
        }
    }

    /// Responds to a key removal: parks the child until after evaluation.
    pub(crate) fn dict_on_key_removed(self: &Rc<Self>, key: &ScalarValue) {
        let InputKind::Dict(state) = self.kind() else { return };
        let (child, schedule) = {
            let mut state = state.borrow_mut();
            let Some(child) = state.children.remove(key) else {
                return;
            };
            state.removed.insert(key.clone(), child.clone());
            let schedule = !state.cleanup_pending;
            if schedule {
                state.cleanup_pending = true;
            }
            (child, schedule)
        };
        child.un_bind_output();
        if schedule {
            let weak = Rc::downgrade(self);
            if let Some(node) = self.owning_node() {
                node.add_after_evaluation_notification(Box::new(move || {
                    if let Some(input) = weak.upgrade() {
                        if let InputKind::Dict(state) = input.kind() {
                            let mut state = state.borrow_mut();
                            state.removed.clear();
                            state.cleanup_pending = false;
                        }
                    }
                }));
            }
        }
    }

    /// The child input for `key`.
    pub fn dict_child(&self, key: &ScalarValue) -> Option<Rc<Input>> {
        match self.kind() {
            InputKind::Dict(state) => state.borrow().children.get(key).cloned(),
            _ => None,
        }
    }

    /// The current keys of a TSD input.
    pub fn dict_keys(&self) -> Vec<ScalarValue> {
        match self.kind() {
            InputKind::Dict(state) => state.borrow().children.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Keys added to the bound output during the current cycle.
    pub fn dict_added_keys(&self) -> Vec<ScalarValue> {
        match self.peer_output() {
            Some(output) => match output.kind() {
                OutputKind::Dict(state) => state.borrow().added_keys().to_vec(),
                _ => Vec::new(),
            },
            None => Vec::new(),
        }
    }

    /// Keys removed during the current cycle, as seen from this input.
    pub fn dict_removed_keys(&self) -> Vec<ScalarValue> {
        match self.kind() {
            InputKind::Dict(state) => state.borrow().removed.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn dict_bind_existing(self: &Rc<Self>, output: &Rc<Output>) {
        for key in output.dict_keys() {
            if let Some(child_output) = output.dict_child(&key) {
                self.dict_on_key_added(&key, &child_output);
            }
        }
    }

    pub(crate) fn dict_unbind_all(self: &Rc<Self>) {
        let InputKind::Dict(state) = self.kind() else { return };
        let children = std::mem::take(&mut state.borrow_mut().children);
        for (key, child) in children {
            child.un_bind_output();
            state.borrow_mut().removed.insert(key, child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tsd_meta() -> TsMeta {
        TsMeta::tsd(ScalarMeta::Str, TsMeta::Value(ScalarMeta::Int))
    }

    fn key(k: &str) -> ScalarValue {
        ScalarValue::Str(k.to_string())
    }

    #[test]
    fn remove_if_exists_on_absent_key_is_a_no_op() {
        let output = Output::build(&tsd_meta(), OutputOwner::Node(Weak::new()));
        output
            .apply_dict_result(vec![(key("a"), DictValue::RemoveIfExists)])
            .unwrap();
        assert!(output.dict_keys().is_empty());
        // A strict remove on an absent key is an error.
        assert!(output.apply_dict_result(vec![(key("a"), DictValue::Remove)]).is_err());
    }

    #[test]
    fn remove_if_exists_then_add_recreates_the_child() {
        let output = Output::build(&tsd_meta(), OutputOwner::Node(Weak::new()));
        let input = Input::build(&tsd_meta(), InputOwner::Node(Weak::new()));
        input.bind_output(&output).unwrap();

        output
            .apply_dict_result(vec![(key("a"), DictValue::Value(1.into()))])
            .unwrap();
        let old_child = output.dict_child(&key("a")).unwrap();
        let old_input_child = input.dict_child(&key("a")).unwrap();

        // Remove and add for the same key in one result: the removal
        // applies first, the add re-creates the key.
        output
            .apply_dict_result(vec![
                (key("a"), DictValue::RemoveIfExists),
                (key("a"), DictValue::Value(2.into())),
            ])
            .unwrap();

        // The key survives, held by a fresh child carrying the new value;
        // the old child is parked with the cycle's removals.
        let new_child = output.dict_child(&key("a")).unwrap();
        assert!(!Rc::ptr_eq(&old_child, &new_child));
        if let OutputKind::Value(cell) = new_child.kind() {
            assert_eq!(*cell.borrow(), Some(ScalarValue::Int(2)));
        } else {
            panic!("expected a scalar child");
        }
        let OutputKind::Dict(state) = output.kind() else { unreachable!() };
        {
            let state = state.borrow();
            assert!(state.removed_child(&key("a")).is_some_and(|c| Rc::ptr_eq(&c, &old_child)));
            assert!(state.added_keys().contains(&key("a")));
        }

        // Observers saw the removal and then the re-addition: the input's
        // child was rebuilt and bound to the new child output.
        let new_input_child = input.dict_child(&key("a")).unwrap();
        assert!(!Rc::ptr_eq(&old_input_child, &new_input_child));
        assert!(new_input_child
            .peer_output()
            .is_some_and(|o| Rc::ptr_eq(&o, &new_child)));
    }
}
