//! Time-series outputs: the producing side of every edge.

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::{Rc, Weak};

use crate::errors::EvalError;
use crate::runtime::node::Node;
use crate::time::{EngineTime, MIN_DT};
use crate::ts::common::{self, NodeSubscribers};
use crate::ts::dict::DictOutputState;
use crate::ts::reference::{RefOutputState, TimeSeriesReference};
use crate::ts::set::SetOutputState;
use crate::ts::window::WindowState;
use crate::types::meta::{BundleSchema, TsMeta};
use crate::types::value::{DictValue, ScalarValue, TsValue};

/// The owner of an output: the producing node for a top-level output, or the
/// enclosing composite output for a child. Both pointers are weak; ownership
/// flows strictly downward.
#[derive(Clone)]
pub enum OutputOwner {
    Node(Weak<Node>),
    Parent(Weak<Output>),
}

/// Per-kind payload of an output.
pub enum OutputKind {
    Value(RefCell<Option<ScalarValue>>),
    Bundle { schema: Rc<BundleSchema>, children: Vec<Rc<Output>> },
    List(Vec<Rc<Output>>),
    Dict(RefCell<DictOutputState>),
    Set(RefCell<SetOutputState>),
    Window(RefCell<WindowState>),
    Reference(RefCell<RefOutputState>),
}

/// A change-tracked output cell.
///
/// Every output tracks the engine time of its last modification; `modified`
/// holds exactly when that time equals the current engine time, and `valid`
/// once it has ever ticked. Mutation notifies subscribed nodes once per
/// cycle and propagates up the parent chain for composite outputs.
pub struct Output {
    meta: TsMeta,
    owner: RefCell<OutputOwner>,
    weak_self: Weak<Output>,
    last_modified: Cell<EngineTime>,
    feedback: Cell<bool>,
    subscribers: RefCell<NodeSubscribers>,
    kind: OutputKind,
}

impl Output {
    /// Constructs an output tree for `meta`, children included.
    pub fn build(meta: &TsMeta, owner: OutputOwner) -> Rc<Output> {
        Rc::new_cyclic(|weak: &Weak<Output>| {
            let kind = match meta {
                TsMeta::Value(_) | TsMeta::Signal => OutputKind::Value(RefCell::new(None)),
                TsMeta::Bundle(schema) => OutputKind::Bundle {
                    schema: schema.clone(),
                    children: schema
                        .fields
                        .iter()
                        .map(|(_, m)| Output::build(m, OutputOwner::Parent(weak.clone())))
                        .collect(),
                },
                TsMeta::List { element, size } => OutputKind::List(
                    (0..*size).map(|_| Output::build(element, OutputOwner::Parent(weak.clone()))).collect(),
                ),
                TsMeta::Dict { key, value } => {
                    OutputKind::Dict(RefCell::new(DictOutputState::new(key.clone(), (**value).clone(), weak)))
                }
                TsMeta::Set(_) => OutputKind::Set(RefCell::new(SetOutputState::default())),
                TsMeta::Window { size, min_size, .. } => {
                    OutputKind::Window(RefCell::new(WindowState::new(*size, *min_size)))
                }
                TsMeta::Reference(_) => OutputKind::Reference(RefCell::new(RefOutputState::default())),
            };
            Output {
                meta: meta.clone(),
                owner: RefCell::new(owner),
                weak_self: weak.clone(),
                last_modified: Cell::new(MIN_DT),
                feedback: Cell::new(false),
                subscribers: RefCell::new(NodeSubscribers::default()),
                kind,
            }
        })
    }

    pub fn meta(&self) -> &TsMeta {
        &self.meta
    }

    pub(crate) fn kind(&self) -> &OutputKind {
        &self.kind
    }

    pub fn weak_self(&self) -> Weak<Output> {
        self.weak_self.clone()
    }

    /// Marks this output as a feedback point: ticks wake subscribers on the
    /// next engine cycle rather than the current one.
    pub fn set_feedback(&self) {
        self.feedback.set(true);
    }

    /// The node that owns this output, walking up through composite parents.
    pub fn owning_node(&self) -> Option<Rc<Node>> {
        match &*self.owner.borrow() {
            OutputOwner::Node(node) => node.upgrade(),
            OutputOwner::Parent(parent) => parent.upgrade().and_then(|p| p.owning_node()),
        }
    }

    /// The enclosing composite output, if any.
    pub fn parent_output(&self) -> Option<Rc<Output>> {
        match &*self.owner.borrow() {
            OutputOwner::Parent(parent) => parent.upgrade(),
            OutputOwner::Node(_) => None,
        }
    }

    /// Re-owns the output; used when a nested node adopts a stub's output.
    pub fn set_owner(&self, owner: OutputOwner) {
        *self.owner.borrow_mut() = owner;
    }

    pub(crate) fn current_time(&self) -> Option<EngineTime> {
        self.owning_node().and_then(|n| n.current_engine_time())
    }

    pub(crate) fn schedule_after_evaluation(&self, f: Box<dyn FnOnce()>) {
        if let Some(node) = self.owning_node() {
            node.add_after_evaluation_notification(f);
        }
    }

    pub fn last_modified_time(&self) -> EngineTime {
        self.last_modified.get()
    }

    pub fn valid(&self) -> bool {
        if self.last_modified.get() <= MIN_DT {
            return false;
        }
        match &self.kind {
            // A window is valid only once its minimum size is reached.
            OutputKind::Window(state) => state.borrow().has_min(),
            _ => true,
        }
    }

    pub fn modified(&self) -> bool {
        self.current_time().is_some_and(|now| now == self.last_modified.get())
    }

    /// Deep validity: every child of a composite output is valid.
    pub fn all_valid(&self) -> bool {
        match &self.kind {
            OutputKind::Bundle { children, .. } => children.iter().all(|c| c.all_valid()),
            OutputKind::List(children) => children.iter().all(|c| c.all_valid()),
            OutputKind::Dict(state) => {
                self.valid() && state.borrow().children().values().all(|c| c.all_valid())
            }
            _ => self.valid(),
        }
    }

    pub fn subscribe_node(&self, node: &Rc<Node>) {
        self.subscribers.borrow_mut().subscribe(node);
    }

    pub fn un_subscribe_node(&self, node: &Rc<Node>) {
        self.subscribers.borrow_mut().unsubscribe(node);
    }

    /// Stamps the output at the current engine time, propagating to the
    /// parent output and notifying subscribers; idempotent within a cycle.
    pub fn mark_modified(&self) {
        if let Some(now) = self.current_time() {
            self.mark_modified_at(now);
        }
    }

    pub(crate) fn mark_modified_at(&self, now: EngineTime) {
        if self.last_modified.get() < now {
            self.last_modified.set(now);
            if let Some(parent) = self.parent_output() {
                parent.mark_modified_at(now);
            }
            self.notify(now);
        }
    }

    /// Resets the output to never-modified and notifies subscribers once.
    pub fn mark_invalid(&self) {
        match &self.kind {
            OutputKind::Value(cell) => *cell.borrow_mut() = None,
            OutputKind::Bundle { children, .. } => {
                for child in children {
                    child.mark_invalid();
                }
            }
            OutputKind::List(children) => {
                for child in children {
                    child.mark_invalid();
                }
            }
            OutputKind::Dict(state) => state.borrow_mut().invalidate(),
            OutputKind::Set(state) => state.borrow_mut().invalidate(),
            OutputKind::Window(state) => state.borrow_mut().invalidate(),
            OutputKind::Reference(state) => state.borrow_mut().invalidate(),
        }
        self.last_modified.set(MIN_DT);
        if let Some(now) = self.current_time() {
            self.notify(now);
        }
    }

    fn notify(&self, now: EngineTime) {
        let when = if self.feedback.get() { now.next() } else { now };
        common::notify_all(&mut self.subscribers.borrow_mut(), when);
    }

    /// The positional child of a composite output (bundle field or list slot).
    pub fn child(&self, index: usize) -> Option<Rc<Output>> {
        match &self.kind {
            OutputKind::Bundle { children, .. } => children.get(index).cloned(),
            OutputKind::List(children) => children.get(index).cloned(),
            _ => None,
        }
    }

    /// The named field of a bundle output.
    pub fn field(&self, name: &str) -> Option<Rc<Output>> {
        match &self.kind {
            OutputKind::Bundle { schema, children } => schema.index_of(name).and_then(|i| children.get(i).cloned()),
            _ => None,
        }
    }

    /// The current value as a composite snapshot, `None` when invalid.
    pub fn value(&self) -> Option<TsValue> {
        if !self.valid() {
            return None;
        }
        match &self.kind {
            OutputKind::Value(cell) => cell.borrow().clone().map(TsValue::Scalar),
            OutputKind::Bundle { schema, children } => Some(TsValue::Bundle(
                schema
                    .fields
                    .iter()
                    .zip(children)
                    .filter(|(_, c)| c.valid())
                    .filter_map(|((name, _), c)| c.value().map(|v| (name.clone(), v)))
                    .collect(),
            )),
            OutputKind::List(children) => Some(TsValue::List(
                children
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.valid())
                    .filter_map(|(i, c)| c.value().map(|v| (i, v)))
                    .collect(),
            )),
            OutputKind::Dict(state) => Some(TsValue::Dict(
                state
                    .borrow()
                    .children()
                    .iter()
                    .filter(|(_, c)| c.valid())
                    .filter_map(|(k, c)| c.value().map(|v| (k.clone(), DictValue::Value(v))))
                    .collect(),
            )),
            OutputKind::Set(state) => {
                Some(TsValue::Scalar(ScalarValue::Set(state.borrow().values().clone())))
            }
            OutputKind::Window(state) => Some(TsValue::Scalar(ScalarValue::Tuple(state.borrow().values()))),
            OutputKind::Reference(_) => None,
        }
    }

    /// The change applied during the current cycle, `None` when unmodified.
    pub fn delta_value(&self) -> Option<TsValue> {
        if !self.modified() {
            return None;
        }
        match &self.kind {
            OutputKind::Value(cell) => cell.borrow().clone().map(TsValue::Scalar),
            OutputKind::Bundle { schema, children } => Some(TsValue::Bundle(
                schema
                    .fields
                    .iter()
                    .zip(children)
                    .filter(|(_, c)| c.modified())
                    .filter_map(|((name, _), c)| c.delta_value().map(|v| (name.clone(), v)))
                    .collect(),
            )),
            OutputKind::List(children) => Some(TsValue::List(
                children
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.modified())
                    .filter_map(|(i, c)| c.delta_value().map(|v| (i, v)))
                    .collect(),
            )),
            OutputKind::Dict(state) => {
                let state = state.borrow();
                let mut entries: Vec<(ScalarValue, DictValue)> = state
                    .children()
                    .iter()
                    .filter(|(_, c)| c.modified())
                    .filter_map(|(k, c)| c.delta_value().map(|v| (k.clone(), DictValue::Value(v))))
                    .collect();
                entries.extend(state.removed_keys().map(|k| (k.clone(), DictValue::Remove)));
                Some(TsValue::Dict(entries))
            }
            OutputKind::Set(state) => Some(TsValue::Set(state.borrow().delta())),
            OutputKind::Window(state) => state.borrow().last().map(TsValue::Scalar),
            OutputKind::Reference(_) => None,
        }
    }

    /// The reference held by a REF output.
    pub fn reference_value(&self) -> Option<TimeSeriesReference> {
        match &self.kind {
            OutputKind::Reference(state) => state.borrow().value().cloned(),
            _ => None,
        }
    }

    /// Applies a result value, recursing into composite children.
    pub fn apply_result(self: &Rc<Self>, value: TsValue) -> Result<(), EvalError> {
        match (&self.kind, value) {
            (OutputKind::Value(cell), TsValue::Scalar(v)) => {
                if let TsMeta::Value(meta) = &self.meta {
                    if !meta.matches(&v) {
                        return Err(EvalError::TypeMismatch {
                            expected: meta.to_string(),
                            actual: v.kind_name().to_string(),
                        });
                    }
                }
                *cell.borrow_mut() = Some(v);
                self.mark_modified();
                Ok(())
            }
            (OutputKind::Bundle { schema, children }, TsValue::Bundle(entries)) => {
                for (name, entry) in entries {
                    let index = schema
                        .index_of(&name)
                        .ok_or_else(|| EvalError::MissingKey(name.clone()))?;
                    children[index].apply_result(entry)?;
                }
                Ok(())
            }
            (OutputKind::List(children), TsValue::List(entries)) => {
                for (index, entry) in entries {
                    let child = children.get(index).ok_or_else(|| EvalError::MissingKey(index.to_string()))?;
                    child.apply_result(entry)?;
                }
                Ok(())
            }
            (OutputKind::Dict(_), TsValue::Dict(entries)) => self.apply_dict_result(entries),
            (OutputKind::Set(_), TsValue::Set(delta)) => self.apply_set_delta(delta),
            (OutputKind::Set(_), TsValue::Scalar(ScalarValue::Set(values))) => {
                self.apply_set_delta(crate::types::value::SetDelta { added: values, removed: BTreeSet::new() })
            }
            (OutputKind::Window(state), TsValue::Scalar(v)) => {
                if let TsMeta::Window { element, .. } = &self.meta {
                    if !element.matches(&v) {
                        return Err(EvalError::TypeMismatch {
                            expected: element.to_string(),
                            actual: v.kind_name().to_string(),
                        });
                    }
                }
                let now = self.current_time().unwrap_or(MIN_DT);
                state.borrow_mut().push(now, v);
                self.mark_modified();
                Ok(())
            }
            (OutputKind::Reference(_), value) => Err(EvalError::TypeMismatch {
                expected: self.meta.to_string(),
                actual: value.kind_name().to_string(),
            }),
            (_, value) => Err(EvalError::TypeMismatch {
                expected: self.meta.to_string(),
                actual: value.kind_name().to_string(),
            }),
        }
    }

    /// Copies another output's current value into this one, kind-wise.
    pub fn copy_from_output(self: &Rc<Self>, other: &Rc<Output>) -> Result<(), EvalError> {
        match (&self.kind, &other.kind) {
            (OutputKind::Reference(_), OutputKind::Reference(_)) => {
                if let Some(reference) = other.reference_value() {
                    self.apply_reference(reference)
                } else {
                    Ok(())
                }
            }
            (OutputKind::Set(_), OutputKind::Set(_)) => {
                // Set copies only add; extra local elements are kept.
                let theirs = other.set_values().unwrap_or_default();
                let ours = self.set_values().unwrap_or_default();
                let additions: BTreeSet<ScalarValue> = theirs.difference(&ours).cloned().collect();
                if !additions.is_empty() {
                    self.apply_set_delta(crate::types::value::SetDelta {
                        added: additions,
                        removed: BTreeSet::new(),
                    })?;
                }
                Ok(())
            }
            _ => match other.value() {
                Some(value) => self.apply_result(value),
                None => Ok(()),
            },
        }
    }

    /// Copies an input's current view into this output, kind-wise.
    pub fn copy_from_input(self: &Rc<Self>, input: &crate::ts::input::Input) -> Result<(), EvalError> {
        if let Some(reference) = input.reference_value() {
            return self.apply_reference(reference);
        }
        match (&self.kind, input.value()) {
            (OutputKind::Set(_), Some(TsValue::Scalar(ScalarValue::Set(theirs)))) => {
                let ours = self.set_values().unwrap_or_default();
                let additions: BTreeSet<ScalarValue> = theirs.difference(&ours).cloned().collect();
                if !additions.is_empty() {
                    self.apply_set_delta(crate::types::value::SetDelta {
                        added: additions,
                        removed: BTreeSet::new(),
                    })?;
                }
                Ok(())
            }
            (_, Some(value)) => self.apply_result(value),
            (_, None) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::meta::ScalarMeta;

    #[test]
    fn build_shapes_follow_meta() {
        let schema = BundleSchema::new(
            "Pair",
            vec![
                ("a".to_string(), TsMeta::ts(ScalarMeta::Int)),
                ("b".to_string(), TsMeta::ts(ScalarMeta::Str)),
            ],
        );
        let output = Output::build(&TsMeta::Bundle(schema), OutputOwner::Node(Weak::new()));
        assert!(output.field("a").is_some());
        assert!(output.field("c").is_none());
        assert!(!output.valid());

        let list = Output::build(
            &TsMeta::List { element: Box::new(TsMeta::ts(ScalarMeta::Int)), size: 3 },
            OutputOwner::Node(Weak::new()),
        );
        assert!(list.child(2).is_some());
        assert!(list.child(3).is_none());
    }

    #[test]
    fn child_parents_are_weak() {
        let schema = BundleSchema::new("One", vec![("x".to_string(), TsMeta::ts(ScalarMeta::Int))]);
        let output = Output::build(&TsMeta::Bundle(schema), OutputOwner::Node(Weak::new()));
        let child = output.field("x").unwrap();
        assert!(child.parent_output().is_some());
        drop(output);
        assert!(child.parent_output().is_none());
    }
}
