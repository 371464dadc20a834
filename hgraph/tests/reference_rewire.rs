mod common;

use std::cell::RefCell;
use std::rc::Rc;

use hgraph::builder::ops::{compute_node, sink_node, ticks_source};
use hgraph::builder::{Edge, GraphBuilder};
use hgraph::runtime::{NodeKind, NodeSignature};
use hgraph::types::{ScalarMeta, TsMeta};
use hgraph::{EvalError, TimeSeriesReference, TsValue};

use common::{run_simulation, t, t0};

fn int_ts() -> TsMeta {
    TsMeta::ts(ScalarMeta::Int)
}

/// Emits a reference to whichever of its `a`/`b` inputs the selector picks.
fn selector_node() -> hgraph::builder::NodeBuilder {
    let signature = NodeSignature::new("select", NodeKind::Compute)
        .with_ts_input("sel", int_ts())
        .with_ts_input("a", int_ts())
        .with_ts_input("b", int_ts())
        .with_active_inputs(["sel"])
        .with_valid_inputs(["sel"])
        .with_output(TsMeta::reference(int_ts()));
    compute_node(signature, |ctx| {
        let selector = ctx
            .value("sel")
            .and_then(|v| v.as_scalar().and_then(|s| s.as_int()))
            .ok_or_else(|| EvalError::from("expected a selector"))?;
        let chosen = if selector == 0 { ctx.input("a") } else { ctx.input("b") };
        let chosen = chosen.ok_or_else(|| EvalError::from("selector input missing"))?;
        Ok(Some(TimeSeriesReference::from_input(&chosen).into()))
    })
}

#[test]
fn reference_ticks_rewire_their_observers() {
    let sel = ticks_source("sel", int_ts(), vec![(t0(), 0.into()), (t(2), 1.into())]);
    let a = ticks_source("a", int_ts(), vec![(t0(), 1.into()), (t(2), 3.into())]);
    let b = ticks_source("b", int_ts(), vec![(t0(), 10.into()), (t(1), 20.into())]);

    let seen: Rc<RefCell<Vec<(hgraph::EngineTime, TsValue)>>> = Rc::new(RefCell::new(Vec::new()));
    let sink_seen = seen.clone();
    let sink = sink_node("observe", int_ts(), move |ctx| {
        if let Some(input) = ctx.input("ts") {
            if input.modified() {
                if let Some(value) = input.value() {
                    sink_seen.borrow_mut().push((ctx.evaluation_time(), value));
                }
            }
        }
        Ok(())
    });

    let builder = GraphBuilder::new(
        vec![Rc::new(sel), Rc::new(a), Rc::new(b), Rc::new(selector_node()), Rc::new(sink)],
        vec![
            Edge::new(0, vec![], 3, vec![0]),
            Edge::new(1, vec![], 3, vec![1]),
            Edge::new(2, vec![], 3, vec![2]),
            // The sink's plain input binds through the reference output and
            // is rewired whenever the reference changes.
            Edge::new(3, vec![], 4, vec![0]),
        ],
    );
    run_simulation(&builder, 3).unwrap();

    // t0: rewired to a, observes 1. t(1): bound to a, so b's tick is not
    // seen. t(2): rewired to b, observes its current value.
    assert_eq!(
        &*seen.borrow(),
        &[(t0(), TsValue::from(1)), (t(2), TsValue::from(20))]
    );
}
