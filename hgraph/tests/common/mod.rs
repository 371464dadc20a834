//! Shared helpers for the end-to-end scenarios.
#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use hgraph::builder::ops::sink_node;
use hgraph::builder::{GraphBuilder, NodeBuilder};
use hgraph::runtime::{evaluate_graph, GraphConfiguration};
use hgraph::time::{EngineDelta, EngineTime};
use hgraph::types::TsMeta;
use hgraph::{EngineError, TsValue};

pub type Ticks = Rc<RefCell<Vec<(EngineTime, TsValue)>>>;

/// A sink that records `(time, delta)` for every tick of its input.
pub fn recording_sink(meta: TsMeta) -> (NodeBuilder, Ticks) {
    let ticks: Ticks = Rc::new(RefCell::new(Vec::new()));
    let seen = ticks.clone();
    let sink = sink_node("record", meta, move |ctx| {
        if let Some(input) = ctx.input("ts") {
            if input.modified() {
                if let Some(delta) = input.delta_value() {
                    seen.borrow_mut().push((ctx.evaluation_time(), delta));
                }
            }
        }
        Ok(())
    });
    (sink, ticks)
}

/// A fixed start time for simulation scenarios.
pub fn t0() -> EngineTime {
    EngineTime::from_ymd_hms(2024, 1, 1, 0, 0, 0)
}

/// `t0` plus `n` milliseconds.
pub fn t(n: i64) -> EngineTime {
    t0() + EngineDelta::from_millis(n)
}

/// Runs a simulation over `[t0, t0 + millis)`.
pub fn run_simulation(builder: &GraphBuilder, millis: i64) -> Result<(), EngineError> {
    evaluate_graph(builder, GraphConfiguration::simulation(t0(), t(millis)))
}
