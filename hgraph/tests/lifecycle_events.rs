mod common;

use std::rc::Rc;

use hgraph::builder::ops::const_node;
use hgraph::builder::{Edge, GraphBuilder};
use hgraph::logging::{CaptureObserver, LifeCycleEvent, Phase};
use hgraph::runtime::{evaluate_graph, GraphConfiguration};
use hgraph::types::{ScalarMeta, TsMeta};

use common::{recording_sink, t, t0};

#[test]
fn observer_events_bracket_the_run() {
    let meta = TsMeta::ts(ScalarMeta::Int);
    let (sink, _ticks) = recording_sink(meta.clone());
    let builder = GraphBuilder::new(
        vec![Rc::new(const_node("answer", 42.into(), meta)), Rc::new(sink)],
        vec![Edge::new(0, vec![], 1, vec![0])],
    );

    let observer = CaptureObserver::new();
    let mut config = GraphConfiguration::simulation(t0(), t(1));
    config.life_cycle_observers.push(observer.clone());
    evaluate_graph(&builder, config).unwrap();

    let events: Vec<LifeCycleEvent> = observer.events().into_iter().map(|(_, e)| e).collect();

    // The run opens with the graph-start bracket and closes with the
    // graph-stop bracket.
    assert!(
        matches!(events.first(), Some(LifeCycleEvent::StartGraph(e)) if e.phase == Phase::Before)
    );
    assert!(matches!(events.last(), Some(LifeCycleEvent::StopGraph(e)) if e.phase == Phase::After));

    let count = |f: &dyn Fn(&LifeCycleEvent) -> bool| events.iter().filter(|e| f(*e)).count();

    // Every node is started and stopped exactly once, with both phases.
    for phase in [Phase::Before, Phase::After] {
        assert_eq!(
            count(&|e| matches!(e, LifeCycleEvent::StartNode(s) if s.phase == phase)),
            2
        );
        assert_eq!(
            count(&|e| matches!(e, LifeCycleEvent::StopNode(s) if s.phase == phase)),
            2
        );
    }

    // Node evaluations are bracketed, and both nodes evaluated once.
    assert_eq!(
        count(&|e| matches!(e, LifeCycleEvent::NodeEvaluation(n) if n.phase == Phase::Before)),
        2
    );
    assert_eq!(
        count(&|e| matches!(e, LifeCycleEvent::NodeEvaluation(n) if n.phase == Phase::Before)),
        count(&|e| matches!(e, LifeCycleEvent::NodeEvaluation(n) if n.phase == Phase::After)),
    );

    // Every node evaluation falls inside a graph-evaluation bracket.
    let position = |f: &dyn Fn(&LifeCycleEvent) -> bool| events.iter().position(|e| f(e));
    let first_graph_eval = position(&|e| {
        matches!(e, LifeCycleEvent::GraphEvaluation(g) if g.phase == Phase::Before)
    })
    .unwrap();
    let first_node_eval =
        position(&|e| matches!(e, LifeCycleEvent::NodeEvaluation(_))).unwrap();
    let last_graph_eval = events
        .iter()
        .rposition(|e| matches!(e, LifeCycleEvent::GraphEvaluation(g) if g.phase == Phase::After))
        .unwrap();
    let last_node_eval = events
        .iter()
        .rposition(|e| matches!(e, LifeCycleEvent::NodeEvaluation(_)))
        .unwrap();
    assert!(first_graph_eval < first_node_eval);
    assert!(last_node_eval < last_graph_eval);
}
