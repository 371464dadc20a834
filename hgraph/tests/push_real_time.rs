mod common;

use std::rc::Rc;
use std::time::Duration;

use hgraph::builder::ops::push_source;
use hgraph::builder::{Edge, GraphBuilder};
use hgraph::runtime::{evaluate_graph, GlobalState, GraphConfiguration};
use hgraph::time::{EngineDelta, EngineTime};
use hgraph::types::{ScalarMeta, TsMeta};
use hgraph::{PushQueue, TsValue};

use common::recording_sink;

#[test]
#[cfg_attr(miri, ignore)]
fn push_values_wake_the_real_time_engine_in_order() {
    let meta = TsMeta::ts(ScalarMeta::Int);
    let source = push_source("p", meta.clone()).with_scalar("__push_queue__", "queue/p".into());
    let (sink, ticks) = recording_sink(meta);
    let builder = GraphBuilder::new(
        vec![Rc::new(source), Rc::new(sink)],
        vec![Edge::new(0, vec![], 1, vec![0])],
    );

    let start = EngineTime::wall_clock_now();
    let end = start + EngineDelta::from_millis(400);
    let state = GlobalState::new();
    let mut config = GraphConfiguration::real_time(start, end);
    config.global_state = state.clone();

    let sender = std::thread::spawn(move || {
        let queue = loop {
            if let Some(queue) = state.get::<PushQueue>("queue/p") {
                break queue;
            }
            std::thread::sleep(Duration::from_millis(1));
        };
        for value in [1i64, 2, 3] {
            queue.send(value.into());
            std::thread::sleep(Duration::from_millis(50));
        }
    });

    evaluate_graph(&builder, config).unwrap();
    sender.join().unwrap();

    let ticks = ticks.borrow();
    let values: Vec<TsValue> = ticks.iter().map(|(_, v)| v.clone()).collect();
    assert_eq!(values, vec![TsValue::from(1), TsValue::from(2), TsValue::from(3)]);
    // Engine stamps are assigned when values are drained: monotone and
    // within the run window.
    for window in ticks.windows(2) {
        assert!(window[0].0 <= window[1].0);
    }
    for (time, _) in ticks.iter() {
        assert!(*time >= start && *time <= end);
    }
}
