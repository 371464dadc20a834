//! The graph runtime: a flat, rank-ordered node vector with a parallel
//! schedule of next evaluation times.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::builder::GraphBuilder;
use crate::errors::{EngineError, NodeError};
use crate::runtime::clock::{EngineEvaluationClock, EvaluationClock};
use crate::runtime::engine::EvaluationEngine;
use crate::runtime::node::{Node, NodeKind};
use crate::time::{EngineTime, MIN_DT};
use crate::types::value::TsValue;

/// The absolute id of a graph (or node): the empty path for the root graph,
/// extended by a per-level index for nested graphs and nodes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct GraphId(SmallVec<[usize; 4]>);

impl GraphId {
    /// The root graph's id: the empty path.
    pub fn root() -> Self {
        GraphId(SmallVec::new())
    }

    /// Extends the path by one index.
    pub fn child(&self, ndx: usize) -> Self {
        let mut path = self.0.clone();
        path.push(ndx);
        GraphId(path)
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, ndx) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{ndx}")?;
        }
        Ok(())
    }
}

/// A running graph: nodes in rank order (push sources, pull sources,
/// compute nodes in topological order, sinks), a parallel schedule array,
/// and a back-pointer to the nested node that owns it, if any.
pub struct Graph {
    graph_id: RefCell<GraphId>,
    weak_self: Weak<Graph>,
    nodes: RefCell<Vec<Rc<Node>>>,
    schedule: RefCell<Vec<EngineTime>>,
    push_source_nodes_end: Cell<usize>,
    engine: RefCell<Option<Rc<dyn EvaluationEngine>>>,
    parent_node: RefCell<Weak<Node>>,
    is_initialised: Cell<bool>,
    is_started: Cell<bool>,
}

impl Graph {
    pub(crate) fn new(graph_id: GraphId, nodes: Vec<Rc<Node>>, parent_node: Option<&Rc<Node>>) -> Rc<Graph> {
        Rc::new_cyclic(|weak| Graph {
            graph_id: RefCell::new(graph_id),
            weak_self: weak.clone(),
            nodes: RefCell::new(nodes),
            schedule: RefCell::new(Vec::new()),
            push_source_nodes_end: Cell::new(0),
            engine: RefCell::new(None),
            parent_node: RefCell::new(parent_node.map(Rc::downgrade).unwrap_or_default()),
            is_initialised: Cell::new(false),
            is_started: Cell::new(false),
        })
    }

    pub fn graph_id(&self) -> GraphId {
        self.graph_id.borrow().clone()
    }

    pub fn node(&self, ndx: usize) -> Option<Rc<Node>> {
        self.nodes.borrow().get(ndx).cloned()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn push_source_nodes_end(&self) -> usize {
        self.push_source_nodes_end.get()
    }

    /// The nested node that owns this graph, `None` for the root graph.
    pub fn parent_node(&self) -> Option<Rc<Node>> {
        self.parent_node.borrow().upgrade()
    }

    pub fn is_started(&self) -> bool {
        self.is_started.get()
    }

    pub fn set_evaluation_engine(&self, engine: Rc<dyn EvaluationEngine>) {
        *self.engine.borrow_mut() = Some(engine);
    }

    pub fn evaluation_engine(&self) -> Option<Rc<dyn EvaluationEngine>> {
        self.engine.borrow().clone()
    }

    pub fn evaluation_clock(&self) -> Option<Rc<dyn EngineEvaluationClock>> {
        self.evaluation_engine().map(|e| e.engine_evaluation_clock())
    }

    pub fn evaluation_time(&self) -> Option<EngineTime> {
        self.evaluation_clock().map(|c| c.evaluation_time())
    }

    /// Wires node back-pointers and resets the schedule. Must run after the
    /// evaluation engine is attached and before `start`.
    pub fn initialise(self: &Rc<Self>) {
        assert!(!self.is_initialised.get(), "graph {} initialised twice", self.graph_id());
        let nodes = self.nodes.borrow().clone();
        let first_non_push = nodes
            .iter()
            .position(|n| n.signature().node_type != NodeKind::PushSource)
            .unwrap_or(nodes.len());
        self.push_source_nodes_end.set(first_non_push);
        *self.schedule.borrow_mut() = vec![MIN_DT; nodes.len()];
        let graph_id = self.graph_id.borrow().clone();
        for node in &nodes {
            node.initialise(self, graph_id.clone());
        }
        self.is_initialised.set(true);
    }

    /// The next scheduled time for a node; `MIN_DT` means not scheduled.
    pub fn scheduled_time(&self, ndx: usize) -> EngineTime {
        self.schedule.borrow().get(ndx).copied().unwrap_or(MIN_DT)
    }

    pub(crate) fn clear_schedule(&self, ndx: usize) {
        if let Some(slot) = self.schedule.borrow_mut().get_mut(ndx) {
            *slot = MIN_DT;
        }
    }

    /// Schedules a node for evaluation at `when`.
    ///
    /// The request replaces the node's scheduled time when `force_set` is
    /// set, when the current entry is stale (at or before the current engine
    /// time), or when it is later than `when`; an earlier future time wins
    /// otherwise. Scheduling before the current engine time is a programmer
    /// error.
    pub fn schedule_node(&self, ndx: usize, when: EngineTime, force_set: bool) {
        let Some(clock) = self.evaluation_clock() else {
            // Not running yet; record the request so start-time wiring is
            // honoured once evaluation begins.
            if let Some(slot) = self.schedule.borrow_mut().get_mut(ndx) {
                if force_set || *slot == MIN_DT || *slot > when {
                    *slot = when;
                }
            }
            return;
        };
        let now = clock.evaluation_time();
        assert!(
            when >= now,
            "node {} of graph {} scheduled at {when}, before the current engine time {now}",
            ndx,
            self.graph_id(),
        );
        let effective = {
            let mut schedule = self.schedule.borrow_mut();
            let Some(slot) = schedule.get_mut(ndx) else { return };
            if force_set || *slot <= now || *slot > when {
                *slot = when;
            }
            *slot
        };
        clock.update_next_scheduled_evaluation_time(effective);
    }

    /// Evaluates one engine cycle: push sources with pending values first,
    /// then every non-source node whose scheduled time is now, in rank order.
    pub fn evaluate_graph(self: &Rc<Self>) -> Result<(), NodeError> {
        let Some(engine) = self.evaluation_engine() else { return Ok(()) };
        let clock = engine.engine_evaluation_clock();
        let now = clock.evaluation_time();
        engine.notify_before_graph_evaluation(self);
        let result = self.evaluate_nodes(&engine, &clock, now);
        engine.notify_after_graph_evaluation(self);
        result
    }

    fn evaluate_nodes(
        self: &Rc<Self>,
        engine: &Rc<dyn EvaluationEngine>,
        clock: &Rc<dyn EngineEvaluationClock>,
        now: EngineTime,
    ) -> Result<(), NodeError> {
        if clock.push_has_pending_values() {
            clock.reset_push_has_pending_values();
            for ndx in 0..self.push_source_nodes_end.get() {
                if let Some(node) = self.node(ndx) {
                    node.eval()?;
                }
            }
            engine.notify_after_graph_push_nodes_evaluation(self);
        }
        let mut ndx = self.push_source_nodes_end.get();
        while ndx < self.node_count() {
            let scheduled = self.scheduled_time(ndx);
            if scheduled == now {
                // Consume the slot so a nested re-drain of this cycle does
                // not evaluate the node twice; self-scheduling re-arms it.
                self.clear_schedule(ndx);
                let Some(node) = self.node(ndx) else { break };
                engine.notify_before_node_evaluation(&node);
                let outcome = node.eval();
                engine.notify_after_node_evaluation(&node);
                if let Err(error) = outcome {
                    match node.error_output() {
                        Some(error_output)
                            if error_output
                                .apply_result(TsValue::Scalar(error.to_scalar_value()))
                                .is_ok() =>
                        {
                            tracing::error!(node = %node.qualified_name(), error = %error.error,
                                "evaluation error routed to error output");
                        }
                        _ => return Err(error),
                    }
                }
            } else if scheduled > now {
                clock.update_next_scheduled_evaluation_time(scheduled);
            }
            ndx += 1;
        }
        Ok(())
    }

    /// Starts every node in rank order, bracketed by observer events.
    pub fn start(self: &Rc<Self>) -> Result<(), NodeError> {
        assert!(!self.is_started.get(), "graph {} started twice", self.graph_id());
        let Some(engine) = self.evaluation_engine() else { return Ok(()) };
        engine.notify_before_start_graph(self);
        let mut ndx = 0;
        while let Some(node) = self.node(ndx) {
            engine.notify_before_start_node(&node);
            node.start()?;
            engine.notify_after_start_node(&node);
            ndx += 1;
        }
        engine.notify_after_start_graph(self);
        self.is_started.set(true);
        Ok(())
    }

    /// Stops every node in rank order; idempotent.
    pub fn stop(self: &Rc<Self>) {
        if !self.is_started.get() {
            return;
        }
        if let Some(engine) = self.evaluation_engine() {
            engine.notify_before_stop_graph(self);
            let mut ndx = 0;
            while let Some(node) = self.node(ndx) {
                engine.notify_before_stop_node(&node);
                node.stop();
                engine.notify_after_stop_node(&node);
                ndx += 1;
            }
            engine.notify_after_stop_graph(self);
        }
        self.is_started.set(false);
    }

    pub fn dispose(self: &Rc<Self>) {
        let nodes = self.nodes.borrow().clone();
        for node in &nodes {
            node.dispose();
        }
        *self.engine.borrow_mut() = None;
    }

    /// Dynamically appends the nodes of `builder`, wiring its internal
    /// edges. New nodes start immediately when the graph is already started,
    /// unless `delay_start` holds. Returns the index of the first new node.
    pub fn extend_graph(self: &Rc<Self>, builder: &GraphBuilder, delay_start: bool) -> Result<usize, EngineError> {
        let offset = self.node_count();
        let graph_id = self.graph_id.borrow().clone();
        let new_nodes = builder.make_nodes(&graph_id, offset)?;
        {
            self.nodes.borrow_mut().extend(new_nodes.iter().cloned());
            let mut schedule = self.schedule.borrow_mut();
            schedule.resize(offset + new_nodes.len(), MIN_DT);
        }
        for node in &new_nodes {
            node.initialise(self, graph_id.clone());
        }
        if self.is_started.get() && !delay_start {
            if let Some(engine) = self.evaluation_engine() {
                for node in &new_nodes {
                    engine.notify_before_start_node(node);
                    node.start()?;
                    engine.notify_after_start_node(node);
                }
            }
        }
        Ok(offset)
    }

    /// Truncates the node vector at `start`, stopping and disposing the
    /// removed nodes.
    pub fn reduce_graph(self: &Rc<Self>, start: usize) {
        let removed: Vec<Rc<Node>> = {
            let mut nodes = self.nodes.borrow_mut();
            if start >= nodes.len() {
                return;
            }
            nodes.split_off(start)
        };
        self.schedule.borrow_mut().truncate(start);
        let engine = self.evaluation_engine();
        for node in &removed {
            if self.is_started.get() {
                if let Some(engine) = &engine {
                    engine.notify_before_stop_node(node);
                    node.stop();
                    engine.notify_after_stop_node(node);
                } else {
                    node.stop();
                }
            }
            node.dispose();
        }
        let end = self.push_source_nodes_end.get().min(start);
        self.push_source_nodes_end.set(end);
    }

    pub fn weak_self(&self) -> Weak<Graph> {
        self.weak_self.clone()
    }
}
