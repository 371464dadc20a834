mod common;

use std::collections::BTreeMap;
use std::rc::Rc;

use hgraph::builder::ops::{compute_node, const_node, ticks_source};
use hgraph::builder::stubs::pass_through_stub;
use hgraph::builder::{Edge, GraphBuilder, NodeBodyBuilder, NodeBuilder, KEY_SET_PATH};
use hgraph::nested::ReduceConfig;
use hgraph::runtime::{NodeKind, NodeSignature};
use hgraph::types::{ScalarMeta, TsMeta};
use hgraph::{EvalError, TsValue};

use common::{recording_sink, run_simulation, t, t0};

fn int_ts() -> TsMeta {
    TsMeta::ts(ScalarMeta::Int)
}

fn tsd_meta() -> TsMeta {
    TsMeta::tsd(ScalarMeta::Str, int_ts())
}

/// The binary inner graph: lhs stub + rhs stub → add → output stub.
fn add_graph() -> Rc<GraphBuilder> {
    let signature = NodeSignature::new("add", NodeKind::Compute)
        .with_ts_input("lhs", int_ts())
        .with_ts_input("rhs", int_ts())
        .with_output(int_ts());
    let add = compute_node(signature, |ctx| {
        let read = |name: &str| {
            ctx.value(name)
                .and_then(|v| v.as_scalar().and_then(|s| s.as_int()))
                .ok_or_else(|| EvalError::from(format!("missing operand {name}")))
        };
        Ok(Some(TsValue::from(read("lhs")? + read("rhs")?).into()))
    });
    Rc::new(GraphBuilder::new(
        vec![
            Rc::new(pass_through_stub("lhs", int_ts())),
            Rc::new(pass_through_stub("rhs", int_ts())),
            Rc::new(add),
            Rc::new(pass_through_stub("out", int_ts())),
        ],
        vec![
            Edge::new(0, vec![], 2, vec![0]),
            Edge::new(1, vec![], 2, vec![1]),
            Edge::new(2, vec![], 3, vec![0]),
        ],
    ))
}

fn reduce_node() -> NodeBuilder {
    let signature = NodeSignature::new("sum", NodeKind::Compute)
        .with_ts_input("__keys__", TsMeta::Set(ScalarMeta::Str))
        .with_ts_input("ts", tsd_meta())
        .with_ts_input("zero", int_ts())
        .with_active_inputs(["__keys__"])
        .with_valid_inputs(["__keys__", "zero"])
        .with_output(int_ts());
    let config = ReduceConfig {
        graph_builder: add_graph(),
        input_node_ids: BTreeMap::from([("lhs".to_string(), 0), ("rhs".to_string(), 1)]),
        output_node_id: Some(3),
        ts_arg: "ts".to_string(),
        zero_arg: "zero".to_string(),
        keys_arg: "__keys__".to_string(),
    };
    NodeBuilder::new(signature, NodeBodyBuilder::Reduce(config))
}

#[test]
fn reduce_sums_a_tsd_across_key_changes() {
    let zero = const_node("zero", 0.into(), int_ts());
    let source = ticks_source(
        "src",
        tsd_meta(),
        vec![
            (
                t0(),
                TsValue::dict([
                    ("a".into(), 1.into()),
                    ("b".into(), 2.into()),
                    ("c".into(), 3.into()),
                ]),
            ),
            (t(1), TsValue::dict_remove("c".into())),
            (t(2), TsValue::dict([("a".into(), 5.into())])),
        ],
    );
    let (sink, ticks) = recording_sink(int_ts());
    let builder = GraphBuilder::new(
        vec![Rc::new(zero), Rc::new(source), Rc::new(reduce_node()), Rc::new(sink)],
        vec![
            Edge::new(1, vec![KEY_SET_PATH], 2, vec![0]),
            Edge::new(1, vec![], 2, vec![1]),
            Edge::new(0, vec![], 2, vec![2]),
            Edge::new(2, vec![], 3, vec![0]),
        ],
    );
    run_simulation(&builder, 3).unwrap();
    assert_eq!(
        &*ticks.borrow(),
        &[
            (t0(), TsValue::from(6)),
            (t(1), TsValue::from(3)),
            (t(2), TsValue::from(7)),
        ]
    );
}
