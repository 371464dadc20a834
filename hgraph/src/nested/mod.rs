//! Higher-order nodes: map, switch, reduce, mesh, try_except, component.
//!
//! A nested node owns one or more inner graphs built from a graph builder.
//! Outer inputs are routed to inner stub nodes and the inner output stub
//! forwards to (part of) the outer output. Inner graphs run on a nested
//! engine whose clock bubbles scheduled times back to the outer node.

pub mod component;
pub mod map;
pub mod mesh;
pub mod reduce;
pub mod switch;
pub mod try_except;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use crate::builder::GraphBuilder;
use crate::errors::{EvalError, NodeError};
use crate::logging::EvaluationLifeCycleObserver;
use crate::runtime::clock::{EngineEvaluationClock, EvaluationClock, PushSignal};
use crate::runtime::engine::{delegate_engine, EvaluationEngine, EvaluationMode};
use crate::runtime::global::GlobalState;
use crate::runtime::graph::Graph;
use crate::runtime::node::Node;
use crate::time::{EngineDelta, EngineTime, MIN_DT};
use crate::ts::output::Output;
use crate::types::value::ScalarValue;

pub use component::{ComponentConfig, ComponentMachine};
pub use map::{MapConfig, MapMachine};
pub use mesh::{MeshConfig, MeshMachine};
pub use reduce::{ReduceConfig, ReduceMachine};
pub use switch::{SwitchCase, SwitchConfig, SwitchMachine};
pub use try_except::{TryExceptConfig, TryExceptMachine};

/// The runtime behaviour of a nested node; one implementation per kind.
pub trait NestedMachine {
    fn start(&self, node: &Rc<Node>) -> Result<(), NodeError>;
    fn eval(&self, node: &Rc<Node>) -> Result<(), NodeError>;
    fn stop(&self, node: &Rc<Node>);
    fn dispose(&self, node: &Rc<Node>);
    /// The currently live inner graphs, for observers and inspection.
    fn nested_graphs(&self) -> Vec<Rc<Graph>> {
        Vec::new()
    }
}

/// Per-instance next-scheduled times published by inner graphs, keyed by the
/// nested node's instance key.
pub type ScheduledKeys = Rc<RefCell<BTreeMap<ScalarValue, EngineTime>>>;

/// The clock handed to an inner graph: reads delegate to the outer engine
/// clock; scheduling proposals are recorded against the instance key and
/// bubble up by scheduling the outer nested node.
pub struct NestedEngineEvaluationClock {
    engine_clock: Rc<dyn EngineEvaluationClock>,
    node: Weak<Node>,
    instance_key: ScalarValue,
    scheduled: ScheduledKeys,
}

impl NestedEngineEvaluationClock {
    pub fn new(
        engine_clock: Rc<dyn EngineEvaluationClock>,
        node: &Rc<Node>,
        instance_key: ScalarValue,
        scheduled: ScheduledKeys,
    ) -> Rc<Self> {
        Rc::new(NestedEngineEvaluationClock {
            engine_clock,
            node: Rc::downgrade(node),
            instance_key,
            scheduled,
        })
    }
}

impl EvaluationClock for NestedEngineEvaluationClock {
    fn evaluation_time(&self) -> EngineTime {
        self.engine_clock.evaluation_time()
    }

    fn wall_clock_time(&self) -> EngineTime {
        self.engine_clock.wall_clock_time()
    }

    fn engine_lag(&self) -> EngineDelta {
        self.engine_clock.engine_lag()
    }

    fn next_scheduled_evaluation_time(&self) -> EngineTime {
        self.engine_clock.next_scheduled_evaluation_time()
    }
}

impl EngineEvaluationClock for NestedEngineEvaluationClock {
    fn set_evaluation_time(&self, when: EngineTime) {
        self.engine_clock.set_evaluation_time(when);
    }

    fn update_next_scheduled_evaluation_time(&self, when: EngineTime) {
        let now = self.engine_clock.evaluation_time();
        {
            let mut scheduled = self.scheduled.borrow_mut();
            let entry = scheduled.entry(self.instance_key.clone()).or_insert(MIN_DT);
            if *entry <= now || *entry > when {
                *entry = when;
            }
        }
        if let Some(node) = self.node.upgrade() {
            if let Some(graph) = node.graph() {
                graph.schedule_node(node.node_ndx(), when, false);
            }
        }
    }

    fn advance_to_next_scheduled_time(&self) {
        self.engine_clock.advance_to_next_scheduled_time();
    }

    fn push_has_pending_values(&self) -> bool {
        self.engine_clock.push_has_pending_values()
    }

    fn reset_push_has_pending_values(&self) {
        self.engine_clock.reset_push_has_pending_values();
    }

    fn push_signal(&self) -> Arc<PushSignal> {
        self.engine_clock.push_signal()
    }
}

/// The engine handed to inner graphs: everything delegates to the outer
/// engine except the clock.
pub struct NestedEvaluationEngine {
    inner: Rc<dyn EvaluationEngine>,
    clock: Rc<NestedEngineEvaluationClock>,
}

impl NestedEvaluationEngine {
    pub fn new(inner: Rc<dyn EvaluationEngine>, clock: Rc<NestedEngineEvaluationClock>) -> Rc<Self> {
        Rc::new(NestedEvaluationEngine { inner, clock })
    }

    fn delegate(&self) -> &Rc<dyn EvaluationEngine> {
        &self.inner
    }
}

impl EvaluationEngine for NestedEvaluationEngine {
    fn engine_evaluation_clock(&self) -> Rc<dyn EngineEvaluationClock> {
        self.clock.clone()
    }
    delegate_engine!();
}

/// Everything needed to instantiate and wire one inner graph.
pub(crate) struct InnerWiring<'a> {
    pub builder: &'a Rc<GraphBuilder>,
    /// Outer-arg name → inner stub node index.
    pub input_node_ids: &'a BTreeMap<String, usize>,
    /// Outer-arg name → the output its stub binds to.
    pub bindings: BTreeMap<String, Rc<Output>>,
    /// The arg whose stub receives the instance key as a scalar.
    pub key: Option<(String, ScalarValue)>,
    /// Inner stub sink whose output slot is replaced by `output_target`.
    pub output_node_id: Option<usize>,
    pub output_target: Option<Rc<Output>>,
}

fn wiring_error(node: &Rc<Node>, message: String) -> NodeError {
    node.to_node_error(EvalError::Message(message))
}

/// Builds, wires, and initialises one inner graph instance for a nested
/// node. The caller starts and evaluates it.
pub(crate) fn instantiate_inner_graph(
    node: &Rc<Node>,
    wiring: InnerWiring<'_>,
    instance_key: ScalarValue,
    scheduled: &ScheduledKeys,
    count: usize,
) -> Result<Rc<Graph>, NodeError> {
    let outer_engine = node
        .engine()
        .ok_or_else(|| wiring_error(node, "nested node has no engine".to_string()))?;
    let graph_id = node.node_id().child(count);
    let graph = wiring
        .builder
        .make_instance(graph_id, Some(node))
        .map_err(|e| wiring_error(node, format!("failed to build inner graph: {e}")))?;
    let clock = NestedEngineEvaluationClock::new(
        outer_engine.engine_evaluation_clock(),
        node,
        instance_key,
        scheduled.clone(),
    );
    graph.set_evaluation_engine(NestedEvaluationEngine::new(outer_engine, clock));
    graph.initialise();

    for (arg, ndx) in wiring.input_node_ids {
        let stub = graph
            .node(*ndx)
            .ok_or_else(|| wiring_error(node, format!("no stub node {ndx} for argument {arg}")))?;
        if let Some((key_arg, key_value)) = &wiring.key {
            if key_arg == arg {
                stub.set_scalar("key", key_value.clone());
                stub.notify();
                continue;
            }
        }
        let source = wiring
            .bindings
            .get(arg)
            .ok_or_else(|| wiring_error(node, format!("no binding for argument {arg}")))?;
        let stub_input = stub
            .named_input("ts")
            .ok_or_else(|| wiring_error(node, format!("stub for {arg} has no ts input")))?;
        stub_input
            .bind_output(source)
            .map_err(|e| wiring_error(node, format!("cannot wire argument {arg}: {e}")))?;
        stub.notify();
    }

    if let (Some(out_ndx), Some(target)) = (wiring.output_node_id, wiring.output_target) {
        let out_node = graph
            .node(out_ndx)
            .ok_or_else(|| wiring_error(node, format!("no output stub node {out_ndx}")))?;
        out_node.set_output(target);
    }

    Ok(graph)
}

/// Starts an inner graph and evaluates it once so freshly wired stubs
/// propagate current values.
pub(crate) fn start_and_prime(
    node: &Rc<Node>,
    graph: &Rc<Graph>,
    scheduled: &ScheduledKeys,
    instance_key: &ScalarValue,
) -> Result<(), NodeError> {
    graph.start()?;
    graph.evaluate_graph()?;
    // The priming evaluation consumed this cycle's schedule slot.
    let now = node.current_engine_time().unwrap_or(MIN_DT);
    let mut scheduled = scheduled.borrow_mut();
    if scheduled.get(instance_key) == Some(&now) {
        scheduled.remove(instance_key);
    }
    Ok(())
}

/// Evaluates every inner graph whose published schedule says "now", looping
/// until the cycle quiesces; future times re-arm the outer node.
pub(crate) fn drain_scheduled(
    node: &Rc<Node>,
    scheduled: &ScheduledKeys,
    mut lookup: impl FnMut(&ScalarValue) -> Option<Rc<Graph>>,
) -> Result<(), NodeError> {
    let now = node.current_engine_time().unwrap_or(MIN_DT);
    loop {
        let due = {
            let mut scheduled = scheduled.borrow_mut();
            let key = scheduled
                .iter()
                .find(|(_, when)| **when == now)
                .map(|(key, _)| key.clone());
            if let Some(key) = &key {
                scheduled.remove(key);
            }
            key
        };
        let Some(key) = due else { break };
        if let Some(graph) = lookup(&key) {
            graph.evaluate_graph()?;
        }
    }
    let mut scheduled = scheduled.borrow_mut();
    scheduled.retain(|_, when| *when > now);
    for when in scheduled.values() {
        node.notify_at(*when);
    }
    Ok(())
}
