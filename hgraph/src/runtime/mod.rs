//! The runtime: nodes, graphs, clocks, the evaluation engine, and the
//! executor that drives a graph from start time to end time.

pub mod clock;
pub mod engine;
pub mod executor;
pub mod global;
pub mod graph;
pub mod node;
pub mod record;

pub use clock::{EngineEvaluationClock, EvaluationClock, PushSignal, RealTimeClock, SimulationClock};
pub use engine::{EvaluationEngine, EvaluationEngineDelegate, EvaluationMode, MasterEvaluationEngine};
pub use executor::{evaluate_graph, GraphConfiguration, GraphExecutor};
pub use global::GlobalState;
pub use graph::{Graph, GraphId};
pub use node::{EvalContext, EvalResult, Node, NodeKind, NodeSignature, PushQueue};
pub use record::{GraphRecorder, InMemoryRecorder, RecordedTick};
