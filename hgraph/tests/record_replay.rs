mod common;

use std::rc::Rc;

use hgraph::builder::ops::{compute_node, ticks_source};
use hgraph::builder::{Edge, GraphBuilder};
use hgraph::runtime::record::RecordingObserver;
use hgraph::runtime::{evaluate_graph, GraphConfiguration, NodeKind, NodeSignature};
use hgraph::types::{ScalarMeta, TsMeta};
use hgraph::{EvalError, EvaluationMode, GraphRecorder, InMemoryRecorder, TsValue};

use common::{recording_sink, t, t0, Ticks};

fn int_ts() -> TsMeta {
    TsMeta::ts(ScalarMeta::Int)
}

fn doubler() -> hgraph::builder::NodeBuilder {
    let signature = NodeSignature::new("double", NodeKind::Compute)
        .with_ts_input("ts", int_ts())
        .with_output(int_ts());
    compute_node(signature, |ctx| {
        let value = ctx
            .value("ts")
            .and_then(|v| v.as_scalar().and_then(|s| s.as_int()))
            .ok_or_else(|| EvalError::from("expected an int"))?;
        Ok(Some(TsValue::from(value * 2).into()))
    })
}

fn wiring() -> (GraphBuilder, Ticks) {
    let source = ticks_source(
        "src",
        int_ts(),
        vec![(t0(), 1.into()), (t(1), 2.into()), (t(3), 5.into())],
    );
    let (sink, ticks) = recording_sink(int_ts());
    let builder = GraphBuilder::new(
        vec![Rc::new(source), Rc::new(doubler()), Rc::new(sink)],
        vec![Edge::new(0, vec![], 1, vec![0]), Edge::new(1, vec![], 2, vec![0])],
    );
    (builder, ticks)
}

#[test]
fn replayed_sources_reproduce_the_original_trace() {
    // First run: record source ticks.
    let recorder = InMemoryRecorder::new();
    let (builder, live_ticks) = wiring();
    let mut config = GraphConfiguration::simulation(t0(), t(5));
    config
        .life_cycle_observers
        .push(RecordingObserver::new(recorder.clone()));
    evaluate_graph(&builder, config).unwrap();

    let recorded = recorder.ticks();
    assert_eq!(recorded.len(), 3);
    assert_eq!(recorder.last_recorded_time(), t(3));

    // Round-trip the trace through bytes, as a persistence hook would.
    let bytes = recorder.to_bytes().unwrap();
    let restored = InMemoryRecorder::from_bytes(&bytes).unwrap();

    // Second run: replay in place of the live source.
    let (builder, replay_ticks) = wiring();
    let mut config = GraphConfiguration::simulation(t0(), t(5));
    config.run_mode = EvaluationMode::Replay;
    config.recorder = Some(restored);
    evaluate_graph(&builder, config).unwrap();

    assert_eq!(&*live_ticks.borrow(), &*replay_ticks.borrow());
    assert_eq!(replay_ticks.borrow().len(), 3);
}
