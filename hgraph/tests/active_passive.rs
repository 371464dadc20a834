mod common;

use std::rc::Rc;

use hgraph::builder::ops::{compute_node, ticks_source};
use hgraph::builder::{Edge, GraphBuilder};
use hgraph::runtime::{NodeKind, NodeSignature};
use hgraph::types::{ScalarMeta, TsMeta};
use hgraph::{EvalError, TsValue};

use common::{recording_sink, run_simulation, t, t0};

fn int_ts() -> TsMeta {
    TsMeta::ts(ScalarMeta::Int)
}

fn add_node() -> hgraph::builder::NodeBuilder {
    let signature = NodeSignature::new("add", NodeKind::Compute)
        .with_ts_input("a", int_ts())
        .with_ts_input("b", int_ts())
        .with_active_inputs(["a"])
        .with_output(int_ts());
    compute_node(signature, |ctx| {
        let read = |name: &str| {
            ctx.value(name)
                .and_then(|v| v.as_scalar().and_then(|s| s.as_int()))
                .ok_or_else(|| EvalError::from(format!("missing input {name}")))
        };
        Ok(Some(TsValue::from(read("a")? + read("b")?).into()))
    })
}

#[test]
fn passive_input_does_not_wake_the_node() {
    let a = ticks_source("a", int_ts(), vec![(t0(), 1.into()), (t(2), 3.into())]);
    let b = ticks_source("b", int_ts(), vec![(t0(), 10.into()), (t(1), 20.into())]);
    let (sink, ticks) = recording_sink(int_ts());
    let builder = GraphBuilder::new(
        vec![Rc::new(a), Rc::new(b), Rc::new(add_node()), Rc::new(sink)],
        vec![
            Edge::new(0, vec![], 2, vec![0]),
            Edge::new(1, vec![], 2, vec![1]),
            Edge::new(2, vec![], 3, vec![0]),
        ],
    );
    run_simulation(&builder, 3).unwrap();
    // No tick at t(1): only the passive input changed. The t(2) tick reads
    // the passive input's latest value.
    assert_eq!(
        &*ticks.borrow(),
        &[(t0(), TsValue::from(11)), (t(2), TsValue::from(23))]
    );
}

#[test]
fn invalid_inputs_gate_evaluation() {
    // b first ticks at t(1); the node stays silent until every declared
    // input is valid.
    let a = ticks_source("a", int_ts(), vec![(t0(), 1.into()), (t(2), 2.into())]);
    let b = ticks_source("b", int_ts(), vec![(t(1), 10.into())]);
    let (sink, ticks) = recording_sink(int_ts());
    let builder = GraphBuilder::new(
        vec![Rc::new(a), Rc::new(b), Rc::new(add_node()), Rc::new(sink)],
        vec![
            Edge::new(0, vec![], 2, vec![0]),
            Edge::new(1, vec![], 2, vec![1]),
            Edge::new(2, vec![], 3, vec![0]),
        ],
    );
    run_simulation(&builder, 3).unwrap();
    assert_eq!(&*ticks.borrow(), &[(t(2), TsValue::from(12))]);
}
