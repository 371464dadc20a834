//! Record and replay: capture source ticks during a run, replay them later
//! in place of the live sources.

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::builder::{GraphBuilder, NodeBuilder, NodeBodyBuilder};
use crate::logging::EvaluationLifeCycleObserver;
use crate::runtime::graph::Graph;
use crate::runtime::node::{Node, NodeKind, NodeSignature};
use crate::time::{EngineTime, MIN_DT};
use crate::types::value::TsValue;

/// One recorded source tick.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RecordedTick {
    /// The source node's absolute id, rendered as a dotted path.
    pub node_id: String,
    pub time: EngineTime,
    pub value: TsValue,
}

/// Sink for recorded ticks and source for replays.
pub trait GraphRecorder {
    fn record(&self, tick: RecordedTick);
    fn ticks(&self) -> Vec<RecordedTick>;
    /// The time of the last recorded tick, `MIN_DT` when empty.
    fn last_recorded_time(&self) -> EngineTime;
}

/// An in-memory recorder that round-trips through `bincode`.
#[derive(Default)]
pub struct InMemoryRecorder {
    ticks: RefCell<Vec<RecordedTick>>,
}

impl InMemoryRecorder {
    pub fn new() -> Rc<Self> {
        Rc::new(InMemoryRecorder::default())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(&*self.ticks.borrow())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Rc<Self>, bincode::Error> {
        let ticks: Vec<RecordedTick> = bincode::deserialize(bytes)?;
        Ok(Rc::new(InMemoryRecorder { ticks: RefCell::new(ticks) }))
    }
}

impl GraphRecorder for InMemoryRecorder {
    fn record(&self, tick: RecordedTick) {
        self.ticks.borrow_mut().push(tick);
    }

    fn ticks(&self) -> Vec<RecordedTick> {
        self.ticks.borrow().clone()
    }

    fn last_recorded_time(&self) -> EngineTime {
        self.ticks.borrow().last().map(|t| t.time).unwrap_or(MIN_DT)
    }
}

/// An observer that captures every source tick into a recorder.
pub struct RecordingObserver {
    recorder: Rc<dyn GraphRecorder>,
}

impl RecordingObserver {
    pub fn new(recorder: Rc<dyn GraphRecorder>) -> Rc<Self> {
        Rc::new(RecordingObserver { recorder })
    }

    fn record_node(&self, node: &Rc<Node>) {
        if !node.signature().node_type.is_source() {
            return;
        }
        let Some(output) = node.output() else { return };
        if !output.modified() {
            return;
        }
        let Some(time) = node.current_engine_time() else { return };
        if let Some(value) = output.delta_value() {
            self.recorder.record(RecordedTick { node_id: node.node_id().to_string(), time, value });
        }
    }
}

impl EvaluationLifeCycleObserver for RecordingObserver {
    fn on_after_node_evaluation(&self, node: &Rc<Node>) {
        self.record_node(node);
    }

    // Push-source evaluations are not bracketed by node events; sweep them
    // once the push pass completes.
    fn on_after_graph_push_nodes_evaluation(&self, graph: &Rc<Graph>) {
        for ndx in 0..graph.push_source_nodes_end() {
            if let Some(node) = graph.node(ndx) {
                self.record_node(&node);
            }
        }
    }
}

/// Rewrites a graph builder so every source node replays its recorded ticks
/// instead of producing live values. Non-source nodes are untouched; edges
/// and node indices are preserved.
pub fn with_replay_sources(builder: &GraphBuilder, recorder: &Rc<dyn GraphRecorder>) -> GraphBuilder {
    let ticks = recorder.ticks();
    let node_builders = builder
        .node_builders()
        .iter()
        .enumerate()
        .map(|(ndx, nb)| {
            if !nb.signature().node_type.is_source() {
                return nb.clone();
            }
            let node_id = ndx.to_string();
            let recorded: Vec<(EngineTime, TsValue)> = ticks
                .iter()
                .filter(|t| t.node_id == node_id)
                .map(|t| (t.time, t.value.clone()))
                .collect();
            let mut signature = NodeSignature::clone(nb.signature());
            signature.node_type = NodeKind::PullSource;
            let body = NodeBodyBuilder::Generator {
                gen_fn: Rc::new(move |_ctx| {
                    Ok(Box::new(recorded.clone().into_iter())
                        as Box<dyn Iterator<Item = (EngineTime, TsValue)>>)
                }),
            };
            Rc::new(NodeBuilder::from_parts(Rc::new(signature), nb.scalars().clone(), body))
        })
        .collect();
    GraphBuilder::new(node_builders, builder.edges().to_vec())
}
