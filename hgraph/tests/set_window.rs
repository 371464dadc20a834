mod common;

use std::cell::RefCell;
use std::rc::Rc;

use hgraph::builder::ops::{compute_node, sink_node, ticks_source};
use hgraph::builder::{Edge, GraphBuilder};
use hgraph::runtime::{NodeKind, NodeSignature};
use hgraph::types::meta::WindowSize;
use hgraph::types::{ScalarMeta, TsMeta};
use hgraph::{ScalarValue, SetDelta, TsValue};

use common::{recording_sink, run_simulation, t, t0};

#[test]
fn set_deltas_are_net_and_reset_each_cycle() {
    let meta = TsMeta::Set(ScalarMeta::Int);
    let source = ticks_source(
        "src",
        meta.clone(),
        vec![
            (t0(), TsValue::Set(SetDelta::adds([1.into(), 2.into()]))),
            (
                t(1),
                TsValue::Set(SetDelta {
                    added: [3.into()].into(),
                    removed: [1.into()].into(),
                }),
            ),
            // Removing an absent element and re-adding a present one nets
            // out to nothing: no tick.
            (t(2), TsValue::Set(SetDelta { added: [3.into()].into(), removed: [7.into()].into() })),
            (t(3), TsValue::Set(SetDelta::removes([2.into()]))),
        ],
    );
    let (sink, ticks) = recording_sink(meta);
    let builder = GraphBuilder::new(
        vec![Rc::new(source), Rc::new(sink)],
        vec![Edge::new(0, vec![], 1, vec![0])],
    );
    run_simulation(&builder, 4).unwrap();

    let ticks = ticks.borrow();
    assert_eq!(ticks.len(), 3);
    assert_eq!(ticks[0], (t0(), TsValue::Set(SetDelta::adds([1.into(), 2.into()]))));
    assert_eq!(
        ticks[1],
        (t(1), TsValue::Set(SetDelta { added: [3.into()].into(), removed: [1.into()].into() }))
    );
    assert_eq!(ticks[2], (t(3), TsValue::Set(SetDelta::removes([2.into()]))));
    for (_, delta) in ticks.iter() {
        if let TsValue::Set(delta) = delta {
            assert!(delta.added.intersection(&delta.removed).next().is_none());
        }
    }
}

#[test]
fn window_evicts_by_count() {
    let int_ts = TsMeta::ts(ScalarMeta::Int);
    let window_meta = TsMeta::Window {
        element: ScalarMeta::Int,
        size: WindowSize::Count(3),
        min_size: None,
    };
    let source = ticks_source(
        "src",
        int_ts.clone(),
        vec![
            (t0(), 1.into()),
            (t(1), 2.into()),
            (t(2), 3.into()),
            (t(3), 4.into()),
        ],
    );
    let signature = NodeSignature::new("collect", NodeKind::Compute)
        .with_ts_input("ts", int_ts)
        .with_output(window_meta.clone());
    let collect = compute_node(signature, |ctx| Ok(ctx.delta("ts").map(Into::into)));

    let snapshots: Rc<RefCell<Vec<TsValue>>> = Rc::new(RefCell::new(Vec::new()));
    let seen = snapshots.clone();
    let sink = sink_node("snapshot", window_meta, move |ctx| {
        if let Some(value) = ctx.value("ts") {
            seen.borrow_mut().push(value);
        }
        Ok(())
    });

    let builder = GraphBuilder::new(
        vec![Rc::new(source), Rc::new(collect), Rc::new(sink)],
        vec![Edge::new(0, vec![], 1, vec![0]), Edge::new(1, vec![], 2, vec![0])],
    );
    run_simulation(&builder, 4).unwrap();

    let tuple = |items: &[i64]| {
        TsValue::Scalar(ScalarValue::Tuple(items.iter().map(|i| ScalarValue::Int(*i)).collect()))
    };
    assert_eq!(
        &*snapshots.borrow(),
        &[
            tuple(&[1]),
            tuple(&[1, 2]),
            tuple(&[1, 2, 3]),
            tuple(&[2, 3, 4]),
        ]
    );
}
