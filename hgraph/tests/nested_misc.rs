mod common;

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use hgraph::builder::ops::{compute_node, ticks_source};
use hgraph::builder::stubs::pass_through_stub;
use hgraph::builder::{Edge, GraphBuilder, NodeBodyBuilder, NodeBuilder};
use hgraph::nested::{ComponentConfig, MapConfig, MeshConfig, TryExceptConfig};
use hgraph::runtime::{NodeKind, NodeSignature};
use hgraph::types::meta::BundleSchema;
use hgraph::types::value::DictValue;
use hgraph::types::{ScalarMeta, TsMeta};
use hgraph::{EvalError, SetDelta, TsValue};

use common::{recording_sink, run_simulation, t, t0};

fn int_ts() -> TsMeta {
    TsMeta::ts(ScalarMeta::Int)
}

/// Inner graph applying `f`, failing when `f` returns an error.
fn unary_graph(
    f: impl Fn(i64) -> Result<i64, EvalError> + 'static,
) -> Rc<GraphBuilder> {
    let signature = NodeSignature::new("apply", NodeKind::Compute)
        .with_ts_input("ts", int_ts())
        .with_output(int_ts());
    let body = compute_node(signature, move |ctx| {
        let value = ctx
            .value("ts")
            .and_then(|v| v.as_scalar().and_then(|s| s.as_int()))
            .ok_or_else(|| EvalError::from("expected an int"))?;
        Ok(Some(TsValue::from(f(value)?).into()))
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

#[test]
fn try_except_traps_inner_errors() {
    let outer_meta = TsMeta::Bundle(BundleSchema::new(
        "TryResult",
        vec![
            ("out".to_string(), int_ts()),
            ("exception".to_string(), TsMeta::ts(ScalarMeta::Any)),
        ],
    ));
    let signature = NodeSignature::new("guarded", NodeKind::Compute)
        .with_ts_input("ts", int_ts())
        .with_output(outer_meta);
    let config = TryExceptConfig {
        graph_builder: unary_graph(|v| {
            if v == 2 {
                Err(EvalError::raised("ValueError", "boom"))
            } else {
                Ok(v * 10)
            }
        }),
        input_node_ids: BTreeMap::from([("ts".to_string(), 0)]),
        output_node_id: Some(2),
    };
    let guarded = NodeBuilder::new(signature, NodeBodyBuilder::TryExcept(config));

    let source = ticks_source(
        "src",
        int_ts(),
        vec![(t0(), 1.into()), (t(1), 2.into()), (t(2), 3.into())],
    );
    let (out_sink, out_ticks) = recording_sink(int_ts());
    let (exc_sink, exc_ticks) = recording_sink(TsMeta::ts(ScalarMeta::Any));
    let builder = GraphBuilder::new(
        vec![Rc::new(source), Rc::new(guarded), Rc::new(out_sink), Rc::new(exc_sink)],
        vec![
            Edge::new(0, vec![], 1, vec![0]),
            Edge::new(1, vec![0], 2, vec![0]),
            Edge::new(1, vec![1], 3, vec![0]),
        ],
    );
    run_simulation(&builder, 3).unwrap();

    assert_eq!(
        &*out_ticks.borrow(),
        &[(t0(), TsValue::from(10)), (t(2), TsValue::from(30))]
    );
    let exc_ticks = exc_ticks.borrow();
    assert_eq!(exc_ticks.len(), 1);
    assert_eq!(exc_ticks[0].0, t(1));
    let error = exc_ticks[0].1.as_scalar().and_then(|s| s.as_struct()).unwrap();
    assert_eq!(error.field("kind").and_then(|v| v.as_str()), Some("ValueError"));
}

#[test]
fn component_forwards_like_a_named_boundary() {
    let signature = NodeSignature::new("times_ten", NodeKind::Compute)
        .with_ts_input("ts", int_ts())
        .with_output(int_ts());
    let config = ComponentConfig {
        graph_builder: unary_graph(|v| Ok(v * 10)),
        input_node_ids: BTreeMap::from([("ts".to_string(), 0)]),
        output_node_id: Some(2),
    };
    let component = NodeBuilder::new(signature, NodeBodyBuilder::Component(config));

    let source = ticks_source("src", int_ts(), vec![(t0(), 1.into()), (t(1), 2.into())]);
    let (sink, ticks) = recording_sink(int_ts());
    let builder = GraphBuilder::new(
        vec![Rc::new(source), Rc::new(component), Rc::new(sink)],
        vec![Edge::new(0, vec![], 1, vec![0]), Edge::new(1, vec![], 2, vec![0])],
    );
    run_simulation(&builder, 2).unwrap();
    assert_eq!(
        &*ticks.borrow(),
        &[(t0(), TsValue::from(10)), (t(1), TsValue::from(20))]
    );
}

#[test]
fn mesh_instantiates_requested_keys_on_demand() {
    let tsd_meta = TsMeta::tsd(ScalarMeta::Str, int_ts());
    let signature = NodeSignature::new("mesh_inc", NodeKind::Compute)
        .with_ts_input("__keys__", TsMeta::Set(ScalarMeta::Str))
        .with_ts_input("__request__", TsMeta::Set(ScalarMeta::Str))
        .with_ts_input("ts", tsd_meta.clone())
        .with_active_inputs(["__keys__", "__request__"])
        .with_valid_inputs(["__keys__"])
        .with_output(tsd_meta.clone());
    let config = MeshConfig {
        map: MapConfig {
            graph_builder: unary_graph(|v| Ok(v + 1)),
            input_node_ids: BTreeMap::from([("ts".to_string(), 0)]),
            output_node_id: Some(2),
            multiplexed_args: BTreeSet::from(["ts".to_string()]),
            key_arg: None,
            keys_arg: "__keys__".to_string(),
        },
        request_arg: Some("__request__".to_string()),
    };
    let mesh = NodeBuilder::new(signature, NodeBodyBuilder::Mesh(config));

    let keys = ticks_source(
        "keys",
        TsMeta::Set(ScalarMeta::Str),
        vec![(t0(), TsValue::Set(SetDelta::adds(["a".into()])))],
    );
    let requests = ticks_source(
        "requests",
        TsMeta::Set(ScalarMeta::Str),
        vec![(t(1), TsValue::Set(SetDelta::adds(["b".into()])))],
    );
    let values = ticks_source(
        "values",
        tsd_meta.clone(),
        vec![(t0(), TsValue::dict([("a".into(), 1.into()), ("b".into(), 2.into())]))],
    );
    let (sink, ticks) = recording_sink(tsd_meta);
    let builder = GraphBuilder::new(
        vec![Rc::new(keys), Rc::new(requests), Rc::new(values), Rc::new(mesh), Rc::new(sink)],
        vec![
            Edge::new(0, vec![], 3, vec![0]),
            Edge::new(1, vec![], 3, vec![1]),
            Edge::new(2, vec![], 3, vec![2]),
            Edge::new(3, vec![], 4, vec![0]),
        ],
    );
    run_simulation(&builder, 2).unwrap();

    assert_eq!(
        &*ticks.borrow(),
        &[
            (t0(), TsValue::Dict(vec![("a".into(), DictValue::Value(2.into()))])),
            (t(1), TsValue::Dict(vec![("b".into(), DictValue::Value(3.into()))])),
        ]
    );
}
