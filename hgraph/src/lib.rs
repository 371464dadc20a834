//! hgraph is a functional reactive computation engine: a computation is
//! described as a directed acyclic graph of strongly-typed time-series
//! nodes, and the engine drives those nodes forward in engine time,
//! propagating change events.
//!
//! The crate is organised in modules that depend as little as possible on
//! each other.
//!
//! **Values**: the [`types`] module holds the polymorphic value model —
//! scalar values, composite results, and the type metadata the builders
//! resolve against.
//!
//! **Time-series**: the [`ts`] module implements the seven time-series
//! kinds (TS, TSB, TSL, TSD, TSS, TSW, REF) as change-tracked cells, and
//! the binding protocol that attaches inputs to outputs.
//!
//! **Runtime**: the [`runtime`] module holds nodes, graphs, the evaluation
//! clocks, the evaluation engine, and the executor that runs the master
//! loop. Higher-order nodes (map, switch, reduce, mesh, try_except,
//! component) live in [`nested`].
//!
//! **Builders**: the [`builder`] module consumes the output of wiring — a
//! tree of graph, node, and input/output builders — and turns it into a
//! running graph.
//!
//! # Examples
//!
//! A constant wired into a sink, run for one millisecond of simulated time:
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use hgraph::builder::ops::{const_node, sink_node};
//! use hgraph::builder::{Edge, GraphBuilder};
//! use hgraph::runtime::{evaluate_graph, GraphConfiguration};
//! use hgraph::time::{EngineDelta, EngineTime};
//! use hgraph::types::{ScalarMeta, TsMeta};
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let sink_seen = seen.clone();
//!
//! let builder = GraphBuilder::new(
//!     vec![
//!         Rc::new(const_node("answer", 42.into(), TsMeta::ts(ScalarMeta::Int))),
//!         Rc::new(sink_node("record", TsMeta::ts(ScalarMeta::Int), move |ctx| {
//!             if let Some(value) = ctx.value("ts") {
//!                 sink_seen.borrow_mut().push((ctx.evaluation_time(), value));
//!             }
//!             Ok(())
//!         })),
//!     ],
//!     vec![Edge::new(0, vec![], 1, vec![0])],
//! );
//!
//! let start = EngineTime::from_ymd_hms(2024, 1, 1, 0, 0, 0);
//! let config = GraphConfiguration::simulation(start, start + EngineDelta::from_millis(1));
//! evaluate_graph(&builder, config).unwrap();
//!
//! assert_eq!(seen.borrow().len(), 1);
//! ```

pub mod builder;
pub mod errors;
pub mod logging;
pub mod nested;
pub mod runtime;
pub mod time;
pub mod ts;
pub mod types;

pub use errors::{BuilderError, EngineError, EvalError, NodeError};
pub use logging::EvaluationLifeCycleObserver;
pub use runtime::{
    evaluate_graph, EvaluationMode, GraphConfiguration, GraphExecutor, GraphRecorder,
    InMemoryRecorder, PushQueue,
};
pub use time::{EngineDelta, EngineTime, MAX_DT, MAX_ET, MIN_DT, MIN_ST, MIN_TD};
pub use ts::TimeSeriesReference;
pub use types::{ScalarMeta, ScalarValue, SetDelta, TsMeta, TsValue};
