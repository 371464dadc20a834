mod common;

use std::collections::BTreeMap;
use std::rc::Rc;

use hgraph::builder::ops::{compute_node, ticks_source};
use hgraph::builder::stubs::pass_through_stub;
use hgraph::builder::{Edge, GraphBuilder, NodeBodyBuilder, NodeBuilder};
use hgraph::nested::{SwitchCase, SwitchConfig};
use hgraph::runtime::{NodeKind, NodeSignature};
use hgraph::types::{ScalarMeta, TsMeta};
use hgraph::{EvalError, ScalarValue, TsValue};

use common::{recording_sink, run_simulation, t, t0};

fn int_ts() -> TsMeta {
    TsMeta::ts(ScalarMeta::Int)
}

/// Inner graph applying `f` to its single input.
fn unary_graph(name: &str, f: impl Fn(i64) -> i64 + 'static) -> Rc<GraphBuilder> {
    let signature = NodeSignature::new(name, NodeKind::Compute)
        .with_ts_input("ts", int_ts())
        .with_output(int_ts());
    let body = compute_node(signature, move |ctx| {
        let value = ctx
            .value("ts")
            .and_then(|v| v.as_scalar().and_then(|s| s.as_int()))
            .ok_or_else(|| EvalError::from("expected an int"))?;
        Ok(Some(TsValue::from(f(value)).into()))
    });
    Rc::new(GraphBuilder::new(
        vec![
            Rc::new(pass_through_stub("ts", int_ts())),
            Rc::new(body),
            Rc::new(pass_through_stub("out", int_ts())),
        ],
        vec![Edge::new(0, vec![], 1, vec![0]), Edge::new(1, vec![], 2, vec![0])],
    ))
}

fn case(builder: Rc<GraphBuilder>) -> SwitchCase {
    SwitchCase {
        graph_builder: builder,
        input_node_ids: BTreeMap::from([("ts".to_string(), 0)]),
        output_node_id: Some(2),
        key_arg: None,
    }
}

fn switch_node(reload_on_ticked: bool) -> NodeBuilder {
    let signature = NodeSignature::new("switch", NodeKind::Compute)
        .with_ts_input("key", int_ts())
        .with_ts_input("ts", int_ts())
        .with_active_inputs(["key"])
        .with_valid_inputs(["key"])
        .with_output(int_ts());
    let config = SwitchConfig {
        cases: BTreeMap::from([
            (ScalarValue::Int(0), case(unary_graph("double", |v| v * 2))),
            (ScalarValue::Int(1), case(unary_graph("plus_ten", |v| v + 10))),
        ]),
        default_case: None,
        key_arg: "key".to_string(),
        reload_on_ticked,
    };
    NodeBuilder::new(signature, NodeBodyBuilder::Switch(config))
}

#[test]
fn switch_rebuilds_on_key_change() {
    let key = ticks_source(
        "key",
        int_ts(),
        vec![
            (t0(), 0.into()),
            (t(1), 0.into()),
            (t(2), 1.into()),
            (t(3), 1.into()),
            (t(4), 0.into()),
        ],
    );
    let input = ticks_source(
        "in",
        int_ts(),
        vec![
            (t0(), 5.into()),
            (t(1), 6.into()),
            (t(2), 7.into()),
            (t(3), 8.into()),
            (t(4), 9.into()),
        ],
    );
    let (sink, ticks) = recording_sink(int_ts());
    let builder = GraphBuilder::new(
        vec![Rc::new(key), Rc::new(input), Rc::new(switch_node(false)), Rc::new(sink)],
        vec![
            Edge::new(0, vec![], 2, vec![0]),
            Edge::new(1, vec![], 2, vec![1]),
            Edge::new(2, vec![], 3, vec![0]),
        ],
    );
    run_simulation(&builder, 5).unwrap();
    assert_eq!(
        &*ticks.borrow(),
        &[
            (t0(), TsValue::from(10)),
            (t(1), TsValue::from(12)),
            (t(2), TsValue::from(17)),
            (t(3), TsValue::from(18)),
            (t(4), TsValue::from(18)),
        ]
    );
}

#[test]
fn reload_on_ticked_rebuilds_for_equal_keys() {
    // With reload, the equal key tick at t(1) still rebuilds; the rebuilt
    // graph replays the input's current value, so the output re-ticks even
    // though nothing changed upstream of the switch.
    let key = ticks_source("key", int_ts(), vec![(t0(), 0.into()), (t(1), 0.into())]);
    let input = ticks_source("in", int_ts(), vec![(t0(), 5.into())]);
    let (sink, ticks) = recording_sink(int_ts());
    let builder = GraphBuilder::new(
        vec![Rc::new(key), Rc::new(input), Rc::new(switch_node(true)), Rc::new(sink)],
        vec![
            Edge::new(0, vec![], 2, vec![0]),
            Edge::new(1, vec![], 2, vec![1]),
            Edge::new(2, vec![], 3, vec![0]),
        ],
    );
    run_simulation(&builder, 2).unwrap();
    assert_eq!(
        &*ticks.borrow(),
        &[(t0(), TsValue::from(10)), (t(1), TsValue::from(10))]
    );
}
