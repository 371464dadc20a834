//! Life-cycle observation and diagnostics.

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::runtime::graph::Graph;
use crate::runtime::node::Node;
use crate::time::{EngineTime, MIN_DT};

/// Callbacks delivered around every graph and node life-cycle transition.
///
/// Observers monitor; the engine performs the actual work. Each registered
/// observer adds a little to every cycle, so keep them cheap.
pub trait EvaluationLifeCycleObserver {
    fn on_before_start_graph(&self, _graph: &Rc<Graph>) {}
    fn on_after_start_graph(&self, _graph: &Rc<Graph>) {}
    fn on_before_start_node(&self, _node: &Rc<Node>) {}
    fn on_after_start_node(&self, _node: &Rc<Node>) {}
    fn on_before_graph_evaluation(&self, _graph: &Rc<Graph>) {}
    fn on_before_node_evaluation(&self, _node: &Rc<Node>) {}
    fn on_after_node_evaluation(&self, _node: &Rc<Node>) {}
    fn on_after_graph_push_nodes_evaluation(&self, _graph: &Rc<Graph>) {}
    fn on_after_graph_evaluation(&self, _graph: &Rc<Graph>) {}
    fn on_before_stop_node(&self, _node: &Rc<Node>) {}
    fn on_after_stop_node(&self, _node: &Rc<Node>) {}
    fn on_before_stop_graph(&self, _graph: &Rc<Graph>) {}
    fn on_after_stop_graph(&self, _graph: &Rc<Graph>) {}
}

/// Whether an event was emitted before or after its transition.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum Phase {
    Before,
    After,
}

#[derive(Serialize, Deserialize, Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
/// A graph starting.
pub struct GraphStartEvent {
    /// The graph's absolute id, rendered as a dotted path.
    pub graph_id: String,
    pub phase: Phase,
}

#[derive(Serialize, Deserialize, Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
/// A graph stopping.
pub struct GraphStopEvent {
    pub graph_id: String,
    pub phase: Phase,
}

#[derive(Serialize, Deserialize, Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
/// One evaluation pass over a graph.
pub struct GraphEvaluationEvent {
    pub graph_id: String,
    pub phase: Phase,
}

#[derive(Serialize, Deserialize, Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
/// A graph finished draining its push sources for the cycle.
pub struct PushNodesEvaluationEvent {
    pub graph_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
/// A node starting.
pub struct NodeStartEvent {
    /// The node's absolute id, rendered as a dotted path.
    pub node_id: String,
    /// The node's signature name.
    pub name: String,
    pub phase: Phase,
}

#[derive(Serialize, Deserialize, Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
/// A node stopping.
pub struct NodeStopEvent {
    pub node_id: String,
    pub name: String,
    pub phase: Phase,
}

#[derive(Serialize, Deserialize, Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
/// One evaluation of a node.
pub struct NodeEvaluationEvent {
    pub node_id: String,
    pub name: String,
    pub phase: Phase,
}

#[derive(Serialize, Deserialize, Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
/// An event in the engine's life cycle, one variant per observer transition.
pub enum LifeCycleEvent {
    /// Graph start.
    StartGraph(GraphStartEvent),
    /// Graph stop.
    StopGraph(GraphStopEvent),
    /// Graph evaluation pass.
    GraphEvaluation(GraphEvaluationEvent),
    /// Push-source drain completed.
    PushNodesEvaluation(PushNodesEvaluationEvent),
    /// Node start.
    StartNode(NodeStartEvent),
    /// Node stop.
    StopNode(NodeStopEvent),
    /// Node evaluation.
    NodeEvaluation(NodeEvaluationEvent),
}

impl From<GraphStartEvent> for LifeCycleEvent {
    fn from(v: GraphStartEvent) -> LifeCycleEvent {
        LifeCycleEvent::StartGraph(v)
    }
}

impl From<GraphStopEvent> for LifeCycleEvent {
    fn from(v: GraphStopEvent) -> LifeCycleEvent {
        LifeCycleEvent::StopGraph(v)
    }
}

impl From<GraphEvaluationEvent> for LifeCycleEvent {
    fn from(v: GraphEvaluationEvent) -> LifeCycleEvent {
        LifeCycleEvent::GraphEvaluation(v)
    }
}

impl From<PushNodesEvaluationEvent> for LifeCycleEvent {
    fn from(v: PushNodesEvaluationEvent) -> LifeCycleEvent {
        LifeCycleEvent::PushNodesEvaluation(v)
    }
}

impl From<NodeStartEvent> for LifeCycleEvent {
    fn from(v: NodeStartEvent) -> LifeCycleEvent {
        LifeCycleEvent::StartNode(v)
    }
}

impl From<NodeStopEvent> for LifeCycleEvent {
    fn from(v: NodeStopEvent) -> LifeCycleEvent {
        LifeCycleEvent::StopNode(v)
    }
}

impl From<NodeEvaluationEvent> for LifeCycleEvent {
    fn from(v: NodeEvaluationEvent) -> LifeCycleEvent {
        LifeCycleEvent::NodeEvaluation(v)
    }
}

/// An observer that records every life-cycle event with its engine time.
///
/// Used by tests to assert start/stop bracketing and evaluation order; the
/// recorded stream is plain data and serializes like any other value.
#[derive(Default)]
pub struct CaptureObserver {
    events: RefCell<Vec<(EngineTime, LifeCycleEvent)>>,
}

impl CaptureObserver {
    pub fn new() -> Rc<Self> {
        Rc::new(CaptureObserver::default())
    }

    /// The captured events, in emission order.
    pub fn events(&self) -> Vec<(EngineTime, LifeCycleEvent)> {
        self.events.borrow().clone()
    }

    fn push(&self, time: EngineTime, event: impl Into<LifeCycleEvent>) {
        self.events.borrow_mut().push((time, event.into()));
    }

    fn graph_time(graph: &Rc<Graph>) -> EngineTime {
        graph.evaluation_time().unwrap_or(MIN_DT)
    }

    fn node_time(node: &Rc<Node>) -> EngineTime {
        node.current_engine_time().unwrap_or(MIN_DT)
    }

    fn graph_id_of(graph: &Rc<Graph>) -> String {
        graph.graph_id().to_string()
    }
}

impl EvaluationLifeCycleObserver for CaptureObserver {
    fn on_before_start_graph(&self, graph: &Rc<Graph>) {
        self.push(
            Self::graph_time(graph),
            GraphStartEvent { graph_id: Self::graph_id_of(graph), phase: Phase::Before },
        );
    }

    fn on_after_start_graph(&self, graph: &Rc<Graph>) {
        self.push(
            Self::graph_time(graph),
            GraphStartEvent { graph_id: Self::graph_id_of(graph), phase: Phase::After },
        );
    }

    fn on_before_start_node(&self, node: &Rc<Node>) {
        self.push(
            Self::node_time(node),
            NodeStartEvent {
                node_id: node.node_id().to_string(),
                name: node.signature().name.clone(),
                phase: Phase::Before,
            },
        );
    }

    fn on_after_start_node(&self, node: &Rc<Node>) {
        self.push(
            Self::node_time(node),
            NodeStartEvent {
                node_id: node.node_id().to_string(),
                name: node.signature().name.clone(),
                phase: Phase::After,
            },
        );
    }

    fn on_before_graph_evaluation(&self, graph: &Rc<Graph>) {
        self.push(
            Self::graph_time(graph),
            GraphEvaluationEvent { graph_id: Self::graph_id_of(graph), phase: Phase::Before },
        );
    }

    fn on_before_node_evaluation(&self, node: &Rc<Node>) {
        self.push(
            Self::node_time(node),
            NodeEvaluationEvent {
                node_id: node.node_id().to_string(),
                name: node.signature().name.clone(),
                phase: Phase::Before,
            },
        );
    }

    fn on_after_node_evaluation(&self, node: &Rc<Node>) {
        self.push(
            Self::node_time(node),
            NodeEvaluationEvent {
                node_id: node.node_id().to_string(),
                name: node.signature().name.clone(),
                phase: Phase::After,
            },
        );
    }

    fn on_after_graph_push_nodes_evaluation(&self, graph: &Rc<Graph>) {
        self.push(
            Self::graph_time(graph),
            PushNodesEvaluationEvent { graph_id: Self::graph_id_of(graph) },
        );
    }

    fn on_after_graph_evaluation(&self, graph: &Rc<Graph>) {
        self.push(
            Self::graph_time(graph),
            GraphEvaluationEvent { graph_id: Self::graph_id_of(graph), phase: Phase::After },
        );
    }

    fn on_before_stop_node(&self, node: &Rc<Node>) {
        self.push(
            Self::node_time(node),
            NodeStopEvent {
                node_id: node.node_id().to_string(),
                name: node.signature().name.clone(),
                phase: Phase::Before,
            },
        );
    }

    fn on_after_stop_node(&self, node: &Rc<Node>) {
        self.push(
            Self::node_time(node),
            NodeStopEvent {
                node_id: node.node_id().to_string(),
                name: node.signature().name.clone(),
                phase: Phase::After,
            },
        );
    }

    fn on_before_stop_graph(&self, graph: &Rc<Graph>) {
        self.push(
            Self::graph_time(graph),
            GraphStopEvent { graph_id: Self::graph_id_of(graph), phase: Phase::Before },
        );
    }

    fn on_after_stop_graph(&self, graph: &Rc<Graph>) {
        self.push(
            Self::graph_time(graph),
            GraphStopEvent { graph_id: Self::graph_id_of(graph), phase: Phase::After },
        );
    }
}

/// An observer that traces life-cycle events through `tracing`.
pub struct TraceObserver;

impl TraceObserver {
    pub fn new() -> Rc<Self> {
        Rc::new(TraceObserver)
    }
}

impl EvaluationLifeCycleObserver for TraceObserver {
    fn on_after_start_graph(&self, graph: &Rc<Graph>) {
        tracing::debug!(graph = %graph.graph_id(), nodes = graph.node_count(), "graph started");
    }

    fn on_before_node_evaluation(&self, node: &Rc<Node>) {
        tracing::trace!(node = %node.qualified_name(), "eval");
    }

    fn on_after_graph_evaluation(&self, graph: &Rc<Graph>) {
        if let Some(time) = graph.evaluation_time() {
            tracing::trace!(graph = %graph.graph_id(), %time, "cycle complete");
        }
    }

    fn on_after_stop_graph(&self, graph: &Rc<Graph>) {
        tracing::debug!(graph = %graph.graph_id(), "graph stopped");
    }
}

/// The LOGGER injectable: a facade stamped with the node's identity.
pub struct NodeLogger {
    name: String,
    node_id: String,
}

impl NodeLogger {
    pub(crate) fn new(name: String, node_id: String) -> Self {
        NodeLogger { name, node_id }
    }

    pub fn debug(&self, message: &str) {
        tracing::debug!(node = %self.name, id = %self.node_id, "{message}");
    }

    pub fn info(&self, message: &str) {
        tracing::info!(node = %self.name, id = %self.node_id, "{message}");
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(node = %self.name, id = %self.node_id, "{message}");
    }

    pub fn error(&self, message: &str) {
        tracing::error!(node = %self.name, id = %self.node_id, "{message}");
    }
}
