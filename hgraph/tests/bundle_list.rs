mod common;

use std::rc::Rc;

use hgraph::builder::ops::ticks_source;
use hgraph::builder::{Edge, GraphBuilder};
use hgraph::types::meta::BundleSchema;
use hgraph::types::{ScalarMeta, TsMeta};
use hgraph::TsValue;

use common::{recording_sink, run_simulation, t, t0};

fn pair_meta() -> TsMeta {
    TsMeta::Bundle(BundleSchema::new(
        "Pair",
        vec![
            ("x".to_string(), TsMeta::ts(ScalarMeta::Int)),
            ("y".to_string(), TsMeta::ts(ScalarMeta::Str)),
        ],
    ))
}

#[test]
fn bundle_deltas_carry_only_ticked_fields() {
    let source = ticks_source(
        "src",
        pair_meta(),
        vec![
            (
                t0(),
                TsValue::Bundle(vec![
                    ("x".to_string(), 1.into()),
                    ("y".to_string(), "a".into()),
                ]),
            ),
            (t(1), TsValue::Bundle(vec![("x".to_string(), 2.into())])),
        ],
    );
    let (sink, ticks) = recording_sink(pair_meta());
    let (field_sink, field_ticks) = recording_sink(TsMeta::ts(ScalarMeta::Str));
    let builder = GraphBuilder::new(
        vec![Rc::new(source), Rc::new(sink), Rc::new(field_sink)],
        vec![
            Edge::new(0, vec![], 1, vec![0]),
            // A second consumer bound to the y field alone.
            Edge::new(0, vec![1], 2, vec![0]),
        ],
    );
    run_simulation(&builder, 2).unwrap();

    assert_eq!(
        &*ticks.borrow(),
        &[
            (
                t0(),
                TsValue::Bundle(vec![
                    ("x".to_string(), 1.into()),
                    ("y".to_string(), "a".into()),
                ]),
            ),
            (t(1), TsValue::Bundle(vec![("x".to_string(), 2.into())])),
        ]
    );
    // The field consumer only sees y's single tick.
    assert_eq!(&*field_ticks.borrow(), &[(t0(), TsValue::from("a"))]);
}

#[test]
fn list_entries_tick_independently() {
    let list_meta = TsMeta::List { element: Box::new(TsMeta::ts(ScalarMeta::Int)), size: 2 };
    let source = ticks_source(
        "src",
        list_meta.clone(),
        vec![
            (t0(), TsValue::List(vec![(0, 10.into()), (1, 20.into())])),
            (t(1), TsValue::List(vec![(1, 21.into())])),
        ],
    );
    let (sink, ticks) = recording_sink(list_meta);
    let builder = GraphBuilder::new(
        vec![Rc::new(source), Rc::new(sink)],
        vec![Edge::new(0, vec![], 1, vec![0])],
    );
    run_simulation(&builder, 2).unwrap();
    assert_eq!(
        &*ticks.borrow(),
        &[
            (t0(), TsValue::List(vec![(0, 10.into()), (1, 20.into())])),
            (t(1), TsValue::List(vec![(1, 21.into())])),
        ]
    );
}
