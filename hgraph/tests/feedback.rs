mod common;

use std::rc::Rc;

use hgraph::builder::ops::{compute_node, ticks_source};
use hgraph::builder::stubs::pass_through_stub;
use hgraph::builder::{Edge, GraphBuilder};
use hgraph::runtime::{NodeKind, NodeSignature};
use hgraph::time::MIN_TD;
use hgraph::types::{ScalarMeta, TsMeta};
use hgraph::{EvalError, TsValue};

use common::{recording_sink, t0};

fn int_ts() -> TsMeta {
    TsMeta::ts(ScalarMeta::Int)
}

#[test]
fn feedback_defers_notification_to_the_next_cycle() {
    // acc = src + fb, where fb feeds acc's own output back. The feedback
    // output wakes acc one cycle later, so the loop steps one addition per
    // engine cycle instead of spinning inside a single one.
    let source = ticks_source("src", int_ts(), vec![(t0(), 1.into())]);
    let signature = NodeSignature::new("acc", NodeKind::Compute)
        .with_ts_input("ts", int_ts())
        .with_ts_input("fb", int_ts())
        .with_valid_inputs(["ts"])
        .with_output(int_ts());
    let acc = compute_node(signature, |ctx| {
        let read = |name: &str| {
            ctx.value(name)
                .and_then(|v| v.as_scalar().and_then(|s| s.as_int()))
        };
        let ts = read("ts").ok_or_else(|| EvalError::from("expected an int"))?;
        Ok(Some(TsValue::from(ts + read("fb").unwrap_or(0)).into()))
    });
    let feedback = pass_through_stub("feedback", int_ts()).with_feedback();
    let (sink, ticks) = recording_sink(int_ts());

    let builder = GraphBuilder::new(
        vec![Rc::new(source), Rc::new(acc), Rc::new(feedback), Rc::new(sink)],
        vec![
            Edge::new(0, vec![], 1, vec![0]),
            Edge::new(1, vec![], 2, vec![0]),
            // The deliberate cycle: feedback output back into acc.
            Edge::new(2, vec![], 1, vec![1]),
            Edge::new(1, vec![], 3, vec![0]),
        ],
    );
    // Three microseconds of engine time: the cascade steps once per cycle.
    let config = hgraph::GraphConfiguration::simulation(t0(), t0() + MIN_TD + MIN_TD + MIN_TD);
    hgraph::evaluate_graph(&builder, config).unwrap();

    assert_eq!(
        &*ticks.borrow(),
        &[
            (t0(), TsValue::from(1)),
            (t0() + MIN_TD, TsValue::from(2)),
            (t0() + MIN_TD + MIN_TD, TsValue::from(3)),
        ]
    );
}
