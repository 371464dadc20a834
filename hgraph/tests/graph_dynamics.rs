//! Scheduling semantics and dynamic graph membership, driven by hand
//! through the engine surface rather than the executor.

mod common;

use std::rc::Rc;

use hgraph::builder::ops::{const_node, ticks_source};
use hgraph::builder::{Edge, GraphBuilder};
use hgraph::runtime::{
    EvaluationEngine, EvaluationMode, GlobalState, GraphId, MasterEvaluationEngine, SimulationClock,
};
use hgraph::time::{EngineDelta, MIN_DT};
use hgraph::types::{ScalarMeta, TsMeta};
use hgraph::TsValue;

use common::{recording_sink, t, t0};

fn engine_for(
    graph: &Rc<hgraph::runtime::Graph>,
) -> Rc<MasterEvaluationEngine> {
    let clock = Rc::new(SimulationClock::new(t0()));
    let engine = MasterEvaluationEngine::new(
        clock,
        EvaluationMode::Simulation,
        t0(),
        t(60_000),
        GlobalState::new(),
        false,
    );
    graph.set_evaluation_engine(engine.clone());
    engine
}

#[test]
fn schedule_replacement_rules() {
    let meta = TsMeta::ts(ScalarMeta::Int);
    let builder = GraphBuilder::new(vec![Rc::new(const_node("c", 1.into(), meta))], vec![]);
    let graph = builder.make_instance(GraphId::root(), None).unwrap();
    let _engine = engine_for(&graph);
    graph.initialise();

    let ms = EngineDelta::from_millis;
    // An unscheduled node takes any future time.
    graph.schedule_node(0, t0() + ms(10), false);
    assert_eq!(graph.scheduled_time(0), t0() + ms(10));
    // An earlier request wins.
    graph.schedule_node(0, t0() + ms(5), false);
    assert_eq!(graph.scheduled_time(0), t0() + ms(5));
    // A later request does not displace an earlier future time...
    graph.schedule_node(0, t0() + ms(8), false);
    assert_eq!(graph.scheduled_time(0), t0() + ms(5));
    // ...unless forced.
    graph.schedule_node(0, t0() + ms(8), true);
    assert_eq!(graph.scheduled_time(0), t0() + ms(8));
}

#[test]
#[should_panic(expected = "before the current engine time")]
fn scheduling_in_the_past_is_a_programmer_error() {
    let meta = TsMeta::ts(ScalarMeta::Int);
    let builder = GraphBuilder::new(vec![Rc::new(const_node("c", 1.into(), meta))], vec![]);
    let graph = builder.make_instance(GraphId::root(), None).unwrap();
    let _engine = engine_for(&graph);
    graph.initialise();
    graph.schedule_node(0, t0() - EngineDelta::from_millis(1), false);
}

#[test]
fn extend_and_reduce_graph_membership() {
    let meta = TsMeta::ts(ScalarMeta::Int);
    let (sink, ticks) = recording_sink(meta.clone());
    let base = GraphBuilder::new(
        vec![Rc::new(const_node("c", 1.into(), meta.clone())), Rc::new(sink)],
        vec![Edge::new(0, vec![], 1, vec![0])],
    );
    let graph = base.make_instance(GraphId::root(), None).unwrap();
    let engine = engine_for(&graph);
    graph.initialise();
    graph.start().unwrap();

    engine.notify_before_evaluation();
    graph.evaluate_graph().unwrap();
    engine.notify_after_evaluation();
    assert_eq!(ticks.borrow().len(), 1);

    // Extend with a self-contained pair; new nodes start immediately and
    // tick within the same engine cycle.
    let (late_sink, late_ticks) = recording_sink(meta.clone());
    let extension = GraphBuilder::new(
        vec![
            Rc::new(ticks_source("late", meta, vec![(t0(), 9.into())])),
            Rc::new(late_sink),
        ],
        vec![Edge::new(0, vec![], 1, vec![0])],
    );
    let first_new = graph.extend_graph(&extension, false).unwrap();
    assert_eq!(first_new, 2);
    assert_eq!(graph.node_count(), 4);

    engine.notify_before_evaluation();
    graph.evaluate_graph().unwrap();
    engine.notify_after_evaluation();
    assert_eq!(&*late_ticks.borrow(), &[(t0(), TsValue::from(9))]);

    // Reduce back: the appended nodes are stopped and disposed.
    graph.reduce_graph(first_new);
    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.scheduled_time(2), MIN_DT);

    graph.stop();
    graph.dispose();
}
