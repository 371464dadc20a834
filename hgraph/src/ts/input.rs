//! Time-series inputs: the consuming side of every edge, and the binding
//! protocol that attaches them to outputs.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::errors::EvalError;
use crate::runtime::node::Node;
use crate::time::{EngineTime, MIN_DT, MIN_ST};
use crate::ts::dict::DictInputState;
use crate::ts::output::{Output, OutputKind};
use crate::ts::reference::RefInputState;
use crate::ts::set::SetInputState;
use crate::types::meta::{BundleSchema, TsMeta};
use crate::types::value::{ScalarValue, TsValue};

/// The owner of an input: the consuming node, or the enclosing composite.
#[derive(Clone)]
pub enum InputOwner {
    Node(Weak<Node>),
    Parent(Weak<Input>),
}

/// Per-kind payload of an input.
pub enum InputKind {
    Value,
    /// Observes ticks of any output kind, surfacing no value of its own.
    Signal,
    Window,
    Bundle { schema: Rc<BundleSchema>, children: Vec<Rc<Input>> },
    List(Vec<Rc<Input>>),
    Dict(RefCell<DictInputState>),
    Set(RefCell<SetInputState>),
    Reference(RefCell<RefInputState>),
}

/// A consuming endpoint that can be bound to an output (peer) or composed of
/// child inputs with their own bindings (non-peer).
///
/// An active input wakes its owning node when its bound output ticks; a
/// passive input can still be read but never wakes the node.
pub struct Input {
    meta: TsMeta,
    owner: RefCell<InputOwner>,
    weak_self: Weak<Input>,
    active: Cell<bool>,
    sample_time: Cell<EngineTime>,
    bound_output: RefCell<Option<Rc<Output>>>,
    /// The REF output this input observes for rewiring, when bound through
    /// reference indirection.
    ref_source: RefCell<Option<Weak<Output>>>,
    kind: InputKind,
}

impl Input {
    /// Constructs an input tree for `meta`, children included.
    pub fn build(meta: &TsMeta, owner: InputOwner) -> Rc<Input> {
        Rc::new_cyclic(|weak: &Weak<Input>| {
            let kind = match meta {
                TsMeta::Value(_) => InputKind::Value,
                TsMeta::Signal => InputKind::Signal,
                TsMeta::Window { .. } => InputKind::Window,
                TsMeta::Bundle(schema) => InputKind::Bundle {
                    schema: schema.clone(),
                    children: schema
                        .fields
                        .iter()
                        .map(|(_, m)| Input::build(m, InputOwner::Parent(weak.clone())))
                        .collect(),
                },
                TsMeta::List { element, size } => InputKind::List(
                    (0..*size).map(|_| Input::build(element, InputOwner::Parent(weak.clone()))).collect(),
                ),
                TsMeta::Dict { value, .. } => {
                    InputKind::Dict(RefCell::new(DictInputState::new((**value).clone())))
                }
                TsMeta::Set(_) => InputKind::Set(RefCell::new(SetInputState::default())),
                TsMeta::Reference(_) => InputKind::Reference(RefCell::new(RefInputState::default())),
            };
            Input {
                meta: meta.clone(),
                owner: RefCell::new(owner),
                weak_self: weak.clone(),
                active: Cell::new(false),
                sample_time: Cell::new(MIN_DT),
                bound_output: RefCell::new(None),
                ref_source: RefCell::new(None),
                kind,
            }
        })
    }

    pub fn meta(&self) -> &TsMeta {
        &self.meta
    }

    pub(crate) fn kind(&self) -> &InputKind {
        &self.kind
    }

    pub fn weak_self(&self) -> Weak<Input> {
        self.weak_self.clone()
    }

    /// The node that owns this input, walking up through composite parents.
    pub fn owning_node(&self) -> Option<Rc<Node>> {
        match &*self.owner.borrow() {
            InputOwner::Node(node) => node.upgrade(),
            InputOwner::Parent(parent) => parent.upgrade().and_then(|p| p.owning_node()),
        }
    }

    pub fn parent_input(&self) -> Option<Rc<Input>> {
        match &*self.owner.borrow() {
            InputOwner::Parent(parent) => parent.upgrade(),
            InputOwner::Node(_) => None,
        }
    }

    /// Re-owns the input; used when a nested node adopts a stub's input.
    pub fn set_owner(&self, owner: InputOwner) {
        *self.owner.borrow_mut() = owner;
    }

    fn current_time(&self) -> Option<EngineTime> {
        self.owning_node().and_then(|n| n.current_engine_time())
    }

    fn sampled_now(&self) -> bool {
        let sample = self.sample_time.get();
        sample != MIN_DT && self.current_time() == Some(sample)
    }

    /// The directly bound peer output, if any.
    pub fn peer_output(&self) -> Option<Rc<Output>> {
        self.bound_output.borrow().clone()
    }

    pub fn has_peer(&self) -> bool {
        self.bound_output.borrow().is_some()
    }

    /// Whether this input reaches any output, directly or through children.
    pub fn bound(&self) -> bool {
        if self.has_peer() {
            return true;
        }
        match &self.kind {
            InputKind::Bundle { children, .. } => children.iter().any(|c| c.bound()),
            InputKind::List(children) => children.iter().any(|c| c.bound()),
            InputKind::Reference(state) => {
                let state = state.borrow();
                state.value.is_some() || state.inner.is_some()
            }
            _ => false,
        }
    }

    pub fn active(&self) -> bool {
        if self.has_peer() {
            return self.active.get();
        }
        match &self.kind {
            InputKind::Bundle { children, .. } => children.iter().any(|c| c.active()),
            InputKind::List(children) => children.iter().any(|c| c.active()),
            _ => self.active.get(),
        }
    }

    /// Subscribes the owning node to ticks of the bound output(s).
    pub fn make_active(self: &Rc<Self>) {
        if self.active.get() {
            return;
        }
        self.active.set(true);
        if let Some(output) = self.peer_output() {
            if let Some(node) = self.owning_node() {
                output.subscribe_node(&node);
            }
        } else {
            match &self.kind {
                InputKind::Bundle { children, .. } => {
                    for child in children {
                        child.make_active();
                    }
                }
                InputKind::List(children) => {
                    for child in children {
                        child.make_active();
                    }
                }
                _ => {}
            }
        }
    }

    /// Unsubscribes without unbinding; values remain readable.
    pub fn make_passive(self: &Rc<Self>) {
        if !self.active.get() {
            return;
        }
        self.active.set(false);
        if let Some(output) = self.peer_output() {
            if let Some(node) = self.owning_node() {
                output.un_subscribe_node(&node);
            }
        } else {
            match &self.kind {
                InputKind::Bundle { children, .. } => {
                    for child in children {
                        child.make_passive();
                    }
                }
                InputKind::List(children) => {
                    for child in children {
                        child.make_passive();
                    }
                }
                _ => {}
            }
        }
    }

    /// Binds this input to an output; the single rewiring entry point.
    ///
    /// Returns true for a peer binding. Reference indirection and REF
    /// wrapping return false: the input either waits for the reference value
    /// to rewire it or holds a locally constructed reference.
    pub fn bind_output(self: &Rc<Self>, output: &Rc<Output>) -> Result<bool, EvalError> {
        if self.has_peer() {
            self.un_bind_output();
        }
        let peer = match (&self.kind, output.kind()) {
            (InputKind::Reference(_), OutputKind::Reference(_)) => {
                self.do_bind_output(output);
                true
            }
            (InputKind::Reference(state), _) => {
                // Wrap the concrete output in a locally held reference.
                let inner = {
                    let mut state = state.borrow_mut();
                    state.inner.take()
                }
                .unwrap_or_else(|| {
                    Input::build(self.meta.dereferenced(), InputOwner::Parent(self.weak_self.clone()))
                });
                inner.bind_output(output)?;
                let reference = crate::ts::reference::TimeSeriesReference::from_input(&inner);
                {
                    let mut state = state.borrow_mut();
                    state.inner = Some(inner);
                    state.value = Some(reference);
                }
                if let Some(node) = self.owning_node() {
                    self.sample_time.set(if node.is_started() {
                        self.current_time().unwrap_or(MIN_ST)
                    } else {
                        MIN_ST
                    });
                    node.notify();
                }
                false
            }
            (_, OutputKind::Reference(_)) => {
                // Reference indirection: wait for the reference value, then
                // rewire to its target whenever it changes.
                *self.ref_source.borrow_mut() = Some(Rc::downgrade(output));
                output.observe_reference(self);
                if let Some(reference) = output.reference_value() {
                    reference.bind_input(self)?;
                }
                false
            }
            (InputKind::Signal, _) => {
                self.do_bind_output(output);
                true
            }
            (InputKind::Value, OutputKind::Value(_)) | (InputKind::Window, OutputKind::Window(_)) => {
                self.do_bind_output(output);
                true
            }
            (InputKind::Bundle { children, .. }, OutputKind::Bundle { .. }) => {
                self.do_bind_output(output);
                for (index, child) in children.iter().enumerate() {
                    let child_output = output.child(index).ok_or_else(|| EvalError::TypeMismatch {
                        expected: self.meta.to_string(),
                        actual: output.meta().to_string(),
                    })?;
                    child.bind_output(&child_output)?;
                }
                true
            }
            (InputKind::List(children), OutputKind::List(_)) => {
                self.do_bind_output(output);
                for (index, child) in children.iter().enumerate() {
                    let child_output = output.child(index).ok_or_else(|| EvalError::TypeMismatch {
                        expected: self.meta.to_string(),
                        actual: output.meta().to_string(),
                    })?;
                    child.bind_output(&child_output)?;
                }
                true
            }
            (InputKind::Dict(_), OutputKind::Dict(_)) => {
                self.do_bind_output(output);
                output.add_key_observer(self);
                self.dict_bind_existing(output);
                true
            }
            (InputKind::Set(_), OutputKind::Set(_)) => {
                self.do_bind_output(output);
                true
            }
            _ => {
                return Err(EvalError::TypeMismatch {
                    expected: self.meta.to_string(),
                    actual: output.meta().to_string(),
                })
            }
        };
        if peer {
            if let Some(node) = self.owning_node() {
                if node.is_started() && output.valid() {
                    if let Some(now) = self.current_time() {
                        self.sample_time.set(now);
                    }
                    if self.active.get() {
                        node.notify();
                    }
                }
            }
        }
        Ok(peer)
    }

    fn do_bind_output(self: &Rc<Self>, output: &Rc<Output>) {
        *self.bound_output.borrow_mut() = Some(output.clone());
        if self.active.get() {
            if let Some(node) = self.owning_node() {
                output.subscribe_node(&node);
            }
        }
    }

    /// Reverses a binding, recursing into children for composite inputs.
    pub fn un_bind_output(self: &Rc<Self>) {
        match &self.kind {
            InputKind::Bundle { children, .. } => {
                for child in children {
                    child.un_bind_output();
                }
            }
            InputKind::List(children) => {
                for child in children {
                    child.un_bind_output();
                }
            }
            InputKind::Dict(_) => {
                if let Some(output) = self.peer_output() {
                    output.remove_key_observer(self);
                }
                self.dict_unbind_all();
            }
            InputKind::Set(state) => {
                // Keep the previous output for the rest of this cycle so set
                // deltas remain coherent across the rebind.
                let prev = self.peer_output();
                if prev.is_some() {
                    let schedule = {
                        let mut state = state.borrow_mut();
                        state.prev_output = prev;
                        let schedule = !state.reset_pending;
                        state.reset_pending = schedule;
                        schedule
                    };
                    if schedule {
                        if let Some(node) = self.owning_node() {
                            let weak = self.weak_self.clone();
                            node.add_after_evaluation_notification(Box::new(move || {
                                if let Some(input) = weak.upgrade() {
                                    if let InputKind::Set(state) = input.kind() {
                                        let mut state = state.borrow_mut();
                                        state.prev_output = None;
                                        state.reset_pending = false;
                                    }
                                }
                            }));
                        }
                    }
                }
            }
            InputKind::Reference(state) => {
                let inner = {
                    let mut state = state.borrow_mut();
                    state.value = None;
                    state.inner.take()
                };
                if let Some(inner) = inner {
                    inner.un_bind_output();
                }
            }
            _ => {}
        }
        if let Some(output) = self.bound_output.borrow_mut().take() {
            if self.active.get() {
                if let Some(node) = self.owning_node() {
                    output.un_subscribe_node(&node);
                }
            }
        }
    }

    /// Drops the reference-observer registration, if one exists.
    pub fn stop_observing_reference(self: &Rc<Self>) {
        if let Some(source) = self.ref_source.borrow_mut().take() {
            if let Some(output) = source.upgrade() {
                output.stop_observing_reference(self);
            }
        }
    }

    pub fn modified(&self) -> bool {
        if self.sampled_now() {
            return true;
        }
        if let Some(output) = self.peer_output() {
            return output.modified();
        }
        match &self.kind {
            InputKind::Bundle { children, .. } => children.iter().any(|c| c.modified()),
            InputKind::List(children) => children.iter().any(|c| c.modified()),
            InputKind::Reference(state) => {
                state.borrow().inner.as_ref().is_some_and(|inner| inner.modified())
            }
            _ => false,
        }
    }

    pub fn valid(&self) -> bool {
        if self.local_reference_value().is_some() {
            return true;
        }
        if let Some(output) = self.peer_output() {
            return output.valid();
        }
        match &self.kind {
            InputKind::Bundle { children, .. } => children.iter().any(|c| c.valid()),
            InputKind::List(children) => children.iter().any(|c| c.valid()),
            _ => false,
        }
    }

    /// Deep validity: every leaf this input reaches is valid.
    pub fn all_valid(&self) -> bool {
        if self.local_reference_value().is_some() {
            return true;
        }
        if let Some(output) = self.peer_output() {
            return output.all_valid();
        }
        match &self.kind {
            InputKind::Bundle { children, .. } => children.iter().all(|c| c.all_valid()),
            InputKind::List(children) => children.iter().all(|c| c.all_valid()),
            _ => false,
        }
    }

    pub fn last_modified_time(&self) -> EngineTime {
        if let Some(output) = self.peer_output() {
            return output.last_modified_time();
        }
        match &self.kind {
            InputKind::Bundle { children, .. } => {
                children.iter().map(|c| c.last_modified_time()).max().unwrap_or(MIN_DT)
            }
            InputKind::List(children) => {
                children.iter().map(|c| c.last_modified_time()).max().unwrap_or(MIN_DT)
            }
            _ => self.sample_time.get(),
        }
    }

    /// The input's value: the peer output's value, or a composite view over
    /// the valid children. Signals surface whether they ticked this cycle.
    pub fn value(&self) -> Option<TsValue> {
        match &self.kind {
            InputKind::Signal => Some(TsValue::Scalar(ScalarValue::Bool(self.modified()))),
            InputKind::Reference(_) => None,
            InputKind::Bundle { schema, children } if !self.has_peer() => Some(TsValue::Bundle(
                schema
                    .fields
                    .iter()
                    .zip(children)
                    .filter(|(_, c)| c.valid())
                    .filter_map(|((name, _), c)| c.value().map(|v| (name.clone(), v)))
                    .collect(),
            )),
            InputKind::List(children) if !self.has_peer() => Some(TsValue::List(
                children
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.valid())
                    .filter_map(|(i, c)| c.value().map(|v| (i, v)))
                    .collect(),
            )),
            _ => self.peer_output().and_then(|o| o.value()),
        }
    }

    /// The change visible this cycle, shaped like the peer's delta.
    pub fn delta_value(&self) -> Option<TsValue> {
        match &self.kind {
            InputKind::Signal => {
                if self.modified() {
                    Some(TsValue::Scalar(ScalarValue::Bool(true)))
                } else {
                    None
                }
            }
            InputKind::Reference(_) => None,
            InputKind::Bundle { schema, children } if !self.has_peer() => Some(TsValue::Bundle(
                schema
                    .fields
                    .iter()
                    .zip(children)
                    .filter(|(_, c)| c.modified())
                    .filter_map(|((name, _), c)| c.delta_value().map(|v| (name.clone(), v)))
                    .collect(),
            )),
            InputKind::List(children) if !self.has_peer() => Some(TsValue::List(
                children
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.modified())
                    .filter_map(|(i, c)| c.delta_value().map(|v| (i, v)))
                    .collect(),
            )),
            _ => self.peer_output().and_then(|o| o.delta_value()),
        }
    }

    /// The positional child of a composite input (bundle field or list slot).
    /// REF inputs of composite kinds build their child references lazily.
    pub fn child(self: &Rc<Self>, index: usize) -> Option<Rc<Input>> {
        match &self.kind {
            InputKind::Bundle { children, .. } => children.get(index).cloned(),
            InputKind::List(children) => children.get(index).cloned(),
            InputKind::Reference(_) => {
                self.ensure_ref_children();
                if let InputKind::Reference(state) = &self.kind {
                    state.borrow().children.get(index).cloned()
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// The named field of a bundle input.
    pub fn field(self: &Rc<Self>, name: &str) -> Option<Rc<Input>> {
        match &self.kind {
            InputKind::Bundle { schema, .. } => schema.index_of(name).and_then(|i| self.child(i)),
            _ => None,
        }
    }

    /// All positional children, in declaration order.
    pub fn positional_children(self: &Rc<Self>) -> Vec<Rc<Input>> {
        match &self.kind {
            InputKind::Bundle { children, .. } => children.clone(),
            InputKind::List(children) => children.clone(),
            InputKind::Reference(_) => {
                self.ensure_ref_children();
                if let InputKind::Reference(state) = &self.kind {
                    state.borrow().children.clone()
                } else {
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }

    /// Builds the child REF inputs of a composite reference on first use,
    /// enabling non-peer passthrough where the outer REF carries a composite
    /// of references.
    fn ensure_ref_children(self: &Rc<Self>) {
        let InputKind::Reference(state) = &self.kind else { return };
        if !state.borrow().children.is_empty() {
            return;
        }
        let child_metas: Vec<TsMeta> = match self.meta.dereferenced() {
            TsMeta::Bundle(schema) => {
                schema.fields.iter().map(|(_, m)| TsMeta::reference(m.clone())).collect()
            }
            TsMeta::List { element, size } => {
                (0..*size).map(|_| TsMeta::reference((**element).clone())).collect()
            }
            _ => return,
        };
        let children: Vec<Rc<Input>> = child_metas
            .iter()
            .map(|m| Input::build(m, InputOwner::Parent(self.weak_self.clone())))
            .collect();
        state.borrow_mut().children = children;
    }
}
