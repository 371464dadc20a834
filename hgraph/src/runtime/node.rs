//! Nodes: signature metadata, runtime state, and evaluation.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::{Rc, Weak};
use std::sync::{Arc, Mutex};

use crate::errors::{EvalError, NodeError};
use crate::logging::NodeLogger;
use crate::nested::NestedMachine;
use crate::runtime::clock::{EvaluationClock, PushSignal};
use crate::runtime::engine::EvaluationEngine;
use crate::runtime::graph::{Graph, GraphId};
use crate::time::{EngineTime, MIN_DT};
use crate::ts::input::Input;
use crate::ts::output::Output;
use crate::ts::reference::TimeSeriesReference;
use crate::types::meta::{BundleSchema, ScalarMeta, TsMeta};
use crate::types::value::{ScalarValue, TsValue};

/// The four node kinds, in rank order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeKind {
    /// Produces values enqueued from outside the engine thread.
    PushSource,
    /// Produces values from a generator driven by the engine.
    PullSource,
    /// Transforms inputs to an output.
    Compute,
    /// Consumes inputs for side effects; no time-series output.
    Sink,
}

impl NodeKind {
    pub fn is_source(self) -> bool {
        matches!(self, NodeKind::PushSource | NodeKind::PullSource)
    }
}

/// The authoring-time contract of a node, surfaced to the runtime.
#[derive(Debug, Clone)]
pub struct NodeSignature {
    pub name: String,
    pub node_type: NodeKind,
    pub args: Vec<String>,
    pub time_series_inputs: Vec<(String, TsMeta)>,
    pub scalar_inputs: Vec<(String, ScalarMeta)>,
    pub time_series_output: Option<TsMeta>,
    pub error_output: Option<TsMeta>,
    /// Inputs that wake the node when they tick; `None` means all of them.
    pub active_inputs: Option<BTreeSet<String>>,
    /// Inputs that must be valid before the node evaluates; `None` means all.
    pub valid_inputs: Option<BTreeSet<String>>,
    /// Inputs whose whole subtree must be valid before the node evaluates.
    pub all_valid_inputs: Option<BTreeSet<String>>,
    pub uses_scheduler: bool,
    pub uses_clock: bool,
    pub uses_state: bool,
    pub uses_engine_api: bool,
    pub uses_output: bool,
}

impl NodeSignature {
    pub fn new<S: Into<String>>(name: S, node_type: NodeKind) -> Self {
        NodeSignature {
            name: name.into(),
            node_type,
            args: Vec::new(),
            time_series_inputs: Vec::new(),
            scalar_inputs: Vec::new(),
            time_series_output: None,
            error_output: None,
            active_inputs: None,
            valid_inputs: None,
            all_valid_inputs: None,
            uses_scheduler: false,
            uses_clock: false,
            uses_state: false,
            uses_engine_api: false,
            uses_output: false,
        }
    }

    pub fn with_ts_input<S: Into<String>>(mut self, name: S, meta: TsMeta) -> Self {
        let name = name.into();
        self.args.push(name.clone());
        self.time_series_inputs.push((name, meta));
        self
    }

    pub fn with_scalar_input<S: Into<String>>(mut self, name: S, meta: ScalarMeta) -> Self {
        let name = name.into();
        self.args.push(name.clone());
        self.scalar_inputs.push((name, meta));
        self
    }

    pub fn with_output(mut self, meta: TsMeta) -> Self {
        self.time_series_output = Some(meta);
        self
    }

    pub fn with_error_output(mut self, meta: TsMeta) -> Self {
        self.error_output = Some(meta);
        self
    }

    pub fn with_active_inputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.active_inputs = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_valid_inputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.valid_inputs = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_all_valid_inputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.all_valid_inputs = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_uses_scheduler(mut self) -> Self {
        self.uses_scheduler = true;
        self
    }

    pub fn with_uses_state(mut self) -> Self {
        self.uses_state = true;
        self
    }

    /// The bundle schema of the node's time-series inputs.
    pub fn input_bundle_schema(&self) -> Rc<BundleSchema> {
        BundleSchema::new(self.name.clone(), self.time_series_inputs.clone())
    }
}

/// A value produced by an evaluation function.
pub enum EvalResult {
    Value(TsValue),
    Reference(TimeSeriesReference),
}

impl From<TsValue> for EvalResult {
    fn from(v: TsValue) -> Self {
        EvalResult::Value(v)
    }
}

impl From<ScalarValue> for EvalResult {
    fn from(v: ScalarValue) -> Self {
        EvalResult::Value(TsValue::Scalar(v))
    }
}

impl From<TimeSeriesReference> for EvalResult {
    fn from(r: TimeSeriesReference) -> Self {
        EvalResult::Reference(r)
    }
}

/// A node evaluation function. Shared between instances built from the same
/// builder; per-node mutable state lives behind the STATE injectable.
pub type EvalFn = Rc<dyn Fn(&mut EvalContext<'_>) -> Result<Option<EvalResult>, EvalError>>;
/// A start/stop hook.
pub type LifecycleFn = Rc<dyn Fn(&mut EvalContext<'_>) -> Result<(), EvalError>>;
/// A pull-source generator factory, called once at start.
pub type GeneratorFn =
    Rc<dyn Fn(&mut EvalContext<'_>) -> Result<Box<dyn Iterator<Item = (EngineTime, TsValue)>>, EvalError>>;

pub(crate) struct GeneratorState {
    pub(crate) iter: Option<Box<dyn Iterator<Item = (EngineTime, TsValue)>>>,
    pub(crate) next: Option<(EngineTime, TsValue)>,
}

/// The thread-safe sending half of a push source.
///
/// `send` may be called from any thread: it appends to the node's FIFO,
/// raises the push-pending flag, and wakes the engine if it is blocked in
/// the real-time wait. Values are drained in FIFO order within this node;
/// there is no cross-node ordering of push arrivals.
#[derive(Clone, Default)]
pub struct PushQueue {
    inner: Arc<PushQueueInner>,
}

#[derive(Default)]
struct PushQueueInner {
    values: Mutex<VecDeque<TsValue>>,
    signal: Mutex<Option<Arc<PushSignal>>>,
}

impl PushQueue {
    pub fn send(&self, value: TsValue) {
        self.inner.values.lock().unwrap_or_else(|e| e.into_inner()).push_back(value);
        if let Some(signal) = &*self.inner.signal.lock().unwrap_or_else(|e| e.into_inner()) {
            signal.set_pending();
        }
    }

    pub(crate) fn attach_signal(&self, signal: Arc<PushSignal>) {
        *self.inner.signal.lock().unwrap_or_else(|e| e.into_inner()) = Some(signal);
        if !self.inner.values.lock().unwrap_or_else(|e| e.into_inner()).is_empty() {
            if let Some(signal) = &*self.inner.signal.lock().unwrap_or_else(|e| e.into_inner()) {
                signal.set_pending();
            }
        }
    }

    pub(crate) fn drain(&self) -> Vec<TsValue> {
        self.inner.values.lock().unwrap_or_else(|e| e.into_inner()).drain(..).collect()
    }
}

/// Runtime machinery behind a node, selected by its builder.
pub(crate) enum NodeBody {
    Compute { eval_fn: EvalFn, start_fn: Option<LifecycleFn>, stop_fn: Option<LifecycleFn> },
    Generator { gen_fn: GeneratorFn, state: RefCell<GeneratorState> },
    Push { queue: PushQueue },
    Nested(Box<dyn NestedMachine>),
}

/// A runtime node: signature, frozen scalars, inputs, output, and body.
pub struct Node {
    node_ndx: Cell<usize>,
    owning_graph_id: RefCell<GraphId>,
    signature: Rc<NodeSignature>,
    scalars: RefCell<BTreeMap<String, ScalarValue>>,
    graph: RefCell<Weak<Graph>>,
    input: RefCell<Option<Rc<Input>>>,
    output: RefCell<Option<Rc<Output>>>,
    error_output: RefCell<Option<Rc<Output>>>,
    pub(crate) body: NodeBody,
    state: RefCell<Option<Box<dyn Any>>>,
    scheduler_tags: RefCell<BTreeMap<String, EngineTime>>,
    is_initialised: Cell<bool>,
    is_started: Cell<bool>,
}

impl Node {
    pub(crate) fn new(
        node_ndx: usize,
        owning_graph_id: GraphId,
        signature: Rc<NodeSignature>,
        scalars: BTreeMap<String, ScalarValue>,
        body: NodeBody,
    ) -> Node {
        Node {
            node_ndx: Cell::new(node_ndx),
            owning_graph_id: RefCell::new(owning_graph_id),
            signature,
            scalars: RefCell::new(scalars),
            graph: RefCell::new(Weak::new()),
            input: RefCell::new(None),
            output: RefCell::new(None),
            error_output: RefCell::new(None),
            body,
            state: RefCell::new(None),
            scheduler_tags: RefCell::new(BTreeMap::new()),
            is_initialised: Cell::new(false),
            is_started: Cell::new(false),
        }
    }

    pub fn signature(&self) -> &Rc<NodeSignature> {
        &self.signature
    }

    pub fn node_ndx(&self) -> usize {
        self.node_ndx.get()
    }

    pub(crate) fn set_node_ndx(&self, ndx: usize) {
        self.node_ndx.set(ndx);
    }

    /// The absolute id: the owning graph's id extended by the node index.
    pub fn node_id(&self) -> GraphId {
        self.owning_graph_id.borrow().child(self.node_ndx.get())
    }

    /// The node's name qualified by its id, for diagnostics.
    pub fn qualified_name(&self) -> String {
        format!("{}<{}>", self.signature.name, self.node_id())
    }

    pub fn graph(&self) -> Option<Rc<Graph>> {
        self.graph.borrow().upgrade()
    }

    pub(crate) fn set_graph(&self, graph: &Rc<Graph>) {
        *self.graph.borrow_mut() = Rc::downgrade(graph);
    }

    pub fn scalar(&self, name: &str) -> Option<ScalarValue> {
        self.scalars.borrow().get(name).cloned()
    }

    /// Overrides a scalar; used by nested nodes to inject per-instance keys.
    pub fn set_scalar<S: Into<String>>(&self, name: S, value: ScalarValue) {
        self.scalars.borrow_mut().insert(name.into(), value);
    }

    pub fn input(&self) -> Option<Rc<Input>> {
        self.input.borrow().clone()
    }

    pub fn named_input(&self, name: &str) -> Option<Rc<Input>> {
        self.input().and_then(|bundle| bundle.field(name))
    }

    pub fn output(&self) -> Option<Rc<Output>> {
        self.output.borrow().clone()
    }

    pub fn error_output(&self) -> Option<Rc<Output>> {
        self.error_output.borrow().clone()
    }

    pub(crate) fn set_input(&self, input: Rc<Input>) {
        *self.input.borrow_mut() = Some(input);
    }

    /// Replaces the node's output slot; nested nodes route a stub's output
    /// to an output owned further out.
    pub fn set_output(&self, output: Rc<Output>) {
        *self.output.borrow_mut() = Some(output);
    }

    pub(crate) fn set_error_output(&self, output: Rc<Output>) {
        *self.error_output.borrow_mut() = Some(output);
    }

    pub fn is_started(&self) -> bool {
        self.is_started.get()
    }

    /// The push queue of a push-source node.
    pub fn push_queue(&self) -> Option<PushQueue> {
        match &self.body {
            NodeBody::Push { queue } => Some(queue.clone()),
            _ => None,
        }
    }

    pub(crate) fn nested_machine(&self) -> Option<&dyn NestedMachine> {
        match &self.body {
            NodeBody::Nested(machine) => Some(machine.as_ref()),
            _ => None,
        }
    }

    pub fn engine(&self) -> Option<Rc<dyn EvaluationEngine>> {
        self.graph().and_then(|g| g.evaluation_engine())
    }

    pub fn current_engine_time(&self) -> Option<EngineTime> {
        self.engine().map(|e| e.engine_evaluation_clock().evaluation_time())
    }

    pub fn add_after_evaluation_notification(&self, f: Box<dyn FnOnce()>) {
        if let Some(engine) = self.engine() {
            engine.add_after_evaluation_notification(f);
        }
    }

    /// Schedules this node for evaluation at the current engine time.
    pub fn notify(&self) {
        if let Some(now) = self.current_engine_time() {
            self.notify_at(now);
        }
    }

    /// Schedules this node for evaluation at `when`.
    pub fn notify_at(&self, when: EngineTime) {
        if let Some(graph) = self.graph() {
            graph.schedule_node(self.node_ndx.get(), when, false);
        }
    }

    pub(crate) fn initialise(&self, graph: &Rc<Graph>, owning_graph_id: GraphId) {
        assert!(!self.is_initialised.get(), "node {} initialised twice", self.qualified_name());
        self.set_graph(graph);
        *self.owning_graph_id.borrow_mut() = owning_graph_id;
        self.is_initialised.set(true);
    }

    pub(crate) fn start(self: &Rc<Self>) -> Result<(), NodeError> {
        assert!(self.is_initialised.get(), "node {} started before initialise", self.qualified_name());
        assert!(!self.is_started.get(), "node {} started twice", self.qualified_name());
        self.activate_inputs();
        let result: Result<(), NodeError> = match &self.body {
            NodeBody::Compute { start_fn, .. } => match start_fn {
                Some(f) => {
                    let mut ctx = EvalContext { node: self };
                    f(&mut ctx).map_err(|e| self.to_node_error(e))
                }
                None => Ok(()),
            },
            NodeBody::Generator { gen_fn, state } => {
                let mut ctx = EvalContext { node: self };
                match gen_fn(&mut ctx) {
                    Ok(iter) => {
                        let mut state = state.borrow_mut();
                        state.iter = Some(iter);
                        state.next = None;
                        drop(state);
                        self.notify();
                        Ok(())
                    }
                    Err(e) => Err(self.to_node_error(e)),
                }
            }
            NodeBody::Push { queue } => {
                if let Some(engine) = self.engine() {
                    queue.attach_signal(engine.engine_evaluation_clock().push_signal());
                    if let Some(ScalarValue::Str(key)) = self.scalar("__push_queue__") {
                        engine.global_state().set(&key, Arc::new(queue.clone()));
                    }
                }
                Ok(())
            }
            NodeBody::Nested(machine) => machine.start(self),
        };
        if result.is_ok() {
            self.is_started.set(true);
        }
        result
    }

    pub(crate) fn stop(self: &Rc<Self>) {
        if !self.is_started.get() {
            return;
        }
        match &self.body {
            NodeBody::Compute { stop_fn, .. } => {
                if let Some(f) = stop_fn {
                    let mut ctx = EvalContext { node: self };
                    if let Err(e) = f(&mut ctx) {
                        tracing::warn!(node = %self.qualified_name(), error = %e, "stop hook failed");
                    }
                }
            }
            NodeBody::Nested(machine) => machine.stop(self),
            _ => {}
        }
        self.deactivate_inputs();
        self.is_started.set(false);
    }

    pub(crate) fn dispose(self: &Rc<Self>) {
        if let NodeBody::Nested(machine) = &self.body {
            machine.dispose(self);
        }
        *self.state.borrow_mut() = None;
        if let Some(input) = self.input() {
            for child in input.positional_children() {
                child.stop_observing_reference();
            }
            input.stop_observing_reference();
        }
    }

    fn activate_inputs(self: &Rc<Self>) {
        let Some(bundle) = self.input() else { return };
        for (name, _) in &self.signature.time_series_inputs {
            let active = match &self.signature.active_inputs {
                None => true,
                Some(names) => names.contains(name),
            };
            if active {
                if let Some(child) = bundle.field(name) {
                    child.make_active();
                }
            }
        }
    }

    fn deactivate_inputs(self: &Rc<Self>) {
        if let Some(bundle) = self.input() {
            for child in bundle.positional_children() {
                child.make_passive();
            }
        }
    }

    /// Whether the validity gate admits an evaluation (§ input gating).
    fn inputs_valid(self: &Rc<Self>) -> bool {
        if self.signature.time_series_inputs.is_empty() {
            return true;
        }
        let Some(bundle) = self.input() else { return true };
        let names: Vec<&String> = match &self.signature.valid_inputs {
            Some(names) => names.iter().collect(),
            None => self.signature.time_series_inputs.iter().map(|(n, _)| n).collect(),
        };
        for name in names {
            if let Some(child) = bundle.field(name) {
                if !child.valid() {
                    return false;
                }
            }
        }
        if let Some(deep) = &self.signature.all_valid_inputs {
            for name in deep {
                if let Some(child) = bundle.field(name) {
                    if !child.all_valid() {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Evaluates the node once. The validity gate may skip the evaluation
    /// silently; errors are wrapped with this node's identity.
    pub fn eval(self: &Rc<Self>) -> Result<(), NodeError> {
        if !self.inputs_valid() {
            return Ok(());
        }
        match &self.body {
            NodeBody::Compute { eval_fn, .. } => {
                let result = {
                    let mut ctx = EvalContext { node: self };
                    eval_fn(&mut ctx)
                };
                match result {
                    Ok(Some(result)) => self.apply_eval_result(result).map_err(|e| self.to_node_error(e)),
                    Ok(None) => Ok(()),
                    Err(e) => Err(self.to_node_error(e)),
                }
            }
            NodeBody::Generator { state, .. } => self.generator_eval(state).map_err(|e| self.to_node_error(e)),
            NodeBody::Push { queue } => {
                for value in queue.drain() {
                    // A bad push value is logged and dropped; external
                    // producers must not take the engine down.
                    if let Err(e) = self.apply_eval_result(EvalResult::Value(value)) {
                        tracing::warn!(node = %self.qualified_name(), error = %e, "push value dropped");
                    }
                }
                Ok(())
            }
            NodeBody::Nested(machine) => machine.eval(self),
        }
    }

    fn generator_eval(self: &Rc<Self>, state: &RefCell<GeneratorState>) -> Result<(), EvalError> {
        let now = self.current_engine_time().unwrap_or(MIN_DT);
        loop {
            let fetched = {
                let mut state = state.borrow_mut();
                state.iter.as_mut().and_then(|it| it.next())
            };
            match fetched {
                Some((time, value)) if time <= now => {
                    self.apply_eval_result(EvalResult::Value(value))?;
                }
                other => {
                    let pending = state.borrow_mut().next.take();
                    if let Some((_, value)) = pending {
                        self.apply_eval_result(EvalResult::Value(value))?;
                    }
                    if let Some((time, value)) = other {
                        state.borrow_mut().next = Some((time, value));
                        self.notify_at(time);
                    }
                    return Ok(());
                }
            }
        }
    }

    fn apply_eval_result(self: &Rc<Self>, result: EvalResult) -> Result<(), EvalError> {
        let Some(output) = self.output() else {
            return Err(EvalError::Message("node produced a result but has no output".to_string()));
        };
        match result {
            EvalResult::Value(value) => output.apply_result(value),
            EvalResult::Reference(reference) => output.apply_reference(reference),
        }
    }

    /// Wraps an evaluation error with this node's identity, capturing input
    /// values when the engine is configured to.
    pub(crate) fn to_node_error(self: &Rc<Self>, error: EvalError) -> NodeError {
        let capture = self.engine().is_some_and(|e| e.capture_error_inputs());
        let captured_inputs = if capture {
            self.input().map(|bundle| {
                self.signature
                    .time_series_inputs
                    .iter()
                    .filter_map(|(name, _)| {
                        bundle
                            .field(name)
                            .and_then(|i| i.value())
                            .map(|v| (name.clone(), format!("{v:?}")))
                    })
                    .collect()
            })
        } else {
            None
        };
        NodeError {
            name: self.signature.name.clone(),
            node_id: self.node_id().to_string(),
            error,
            captured_inputs,
        }
    }

    pub(crate) fn scheduler_tags(&self) -> &RefCell<BTreeMap<String, EngineTime>> {
        &self.scheduler_tags
    }
}

/// The evaluation-time view a node function receives: inputs, scalars, the
/// output, and the injectable engine services.
pub struct EvalContext<'a> {
    node: &'a Rc<Node>,
}

impl<'a> EvalContext<'a> {
    pub fn node(&self) -> &Rc<Node> {
        self.node
    }

    pub fn input(&self, name: &str) -> Option<Rc<Input>> {
        self.node.named_input(name)
    }

    /// The current value of a named input.
    pub fn value(&self, name: &str) -> Option<TsValue> {
        self.input(name).and_then(|i| i.value())
    }

    /// The delta of a named input for this cycle.
    pub fn delta(&self, name: &str) -> Option<TsValue> {
        self.input(name).and_then(|i| i.delta_value())
    }

    pub fn modified(&self, name: &str) -> bool {
        self.input(name).is_some_and(|i| i.modified())
    }

    pub fn scalar(&self, name: &str) -> Option<ScalarValue> {
        self.node.scalar(name)
    }

    pub fn output(&self) -> Option<Rc<Output>> {
        self.node.output()
    }

    /// The current engine time.
    pub fn evaluation_time(&self) -> EngineTime {
        self.node.current_engine_time().unwrap_or(MIN_DT)
    }

    /// The engine clock's wall-clock view.
    pub fn wall_clock_time(&self) -> EngineTime {
        self.node
            .engine()
            .map(|e| e.engine_evaluation_clock().wall_clock_time())
            .unwrap_or(MIN_DT)
    }

    /// Requests the engine to stop after this cycle.
    pub fn request_engine_stop(&self) {
        if let Some(engine) = self.node.engine() {
            engine.request_engine_stop();
        }
    }

    pub fn add_after_evaluation_notification(&self, f: Box<dyn FnOnce()>) {
        self.node.add_after_evaluation_notification(f);
    }

    /// The node's scheduler injectable.
    pub fn scheduler(&self) -> Scheduler<'_> {
        Scheduler { node: self.node }
    }

    /// Runs `f` against the node's typed state, constructing it on first use.
    pub fn with_state<T, R>(&self, f: impl FnOnce(&mut T) -> R) -> R
    where
        T: Default + 'static,
    {
        let mut slot = self.node.state.borrow_mut();
        let boxed = slot.get_or_insert_with(|| Box::new(T::default()) as Box<dyn Any>);
        match boxed.downcast_mut::<T>() {
            Some(state) => f(state),
            None => {
                *boxed = Box::new(T::default());
                f(boxed.downcast_mut::<T>().expect("state was just replaced"))
            }
        }
    }

    /// A logger stamped with the node's identity.
    pub fn logger(&self) -> NodeLogger {
        NodeLogger::new(self.node.signature().name.clone(), self.node.node_id().to_string())
    }
}

/// The SCHEDULER injectable: tagged self-scheduling over the node's row in
/// the graph's schedule array.
pub struct Scheduler<'a> {
    node: &'a Rc<Node>,
}

impl Scheduler<'_> {
    /// Schedules the node at `when`; a tagged request replaces any earlier
    /// request with the same tag.
    pub fn schedule(&self, when: EngineTime, tag: Option<&str>) {
        match tag {
            None => self.node.notify_at(when),
            Some(tag) => {
                self.node.scheduler_tags().borrow_mut().insert(tag.to_string(), when);
                self.reschedule_from_tags();
            }
        }
    }

    /// Cancels a tagged request.
    pub fn un_schedule(&self, tag: &str) {
        self.node.scheduler_tags().borrow_mut().remove(tag);
        self.reschedule_from_tags();
    }

    fn reschedule_from_tags(&self) {
        let earliest = self.node.scheduler_tags().borrow().values().min().copied();
        if let Some(graph) = self.node.graph() {
            match earliest {
                Some(when) => graph.schedule_node(self.node.node_ndx(), when, true),
                None => graph.clear_schedule(self.node.node_ndx()),
            }
        }
    }

    pub fn next_scheduled_time(&self) -> EngineTime {
        self.node
            .graph()
            .map(|g| g.scheduled_time(self.node.node_ndx()))
            .unwrap_or(MIN_DT)
    }

    pub fn is_scheduled(&self) -> bool {
        self.next_scheduled_time() != MIN_DT
    }

    pub fn is_scheduled_now(&self) -> bool {
        self.node.current_engine_time() == Some(self.next_scheduled_time())
    }
}
