//! The evaluation engine: life-cycle observer fan-out, before/after cycle
//! notifications, and engine-time advancement.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::logging::EvaluationLifeCycleObserver;
use crate::runtime::clock::EngineEvaluationClock;
use crate::runtime::global::GlobalState;
use crate::runtime::graph::Graph;
use crate::runtime::node::Node;
use crate::time::EngineTime;

/// The mode a graph is executed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationMode {
    /// Track the wall clock; push sources are live.
    RealTime,
    /// Advance as fast as possible; push sources are not evaluated.
    Simulation,
    /// Simulation driven by a recorded trace in place of source nodes.
    Replay,
    /// Real time with source ticks captured by the configured recorder.
    Recording,
}

impl EvaluationMode {
    /// Whether this mode runs against the wall clock.
    pub fn is_real_time(self) -> bool {
        matches!(self, EvaluationMode::RealTime | EvaluationMode::Recording)
    }
}

/// Engine services available to graphs and nodes.
///
/// The user-facing half (clock, stop requests, cycle notifications) is
/// injectable into nodes; the notify methods fan life-cycle events out to
/// observers and are called by graphs as they start, evaluate, and stop.
pub trait EvaluationEngine {
    fn evaluation_mode(&self) -> EvaluationMode;
    fn start_time(&self) -> EngineTime;
    fn end_time(&self) -> EngineTime;
    fn engine_evaluation_clock(&self) -> Rc<dyn EngineEvaluationClock>;
    fn global_state(&self) -> GlobalState;

    /// Requests the engine to stop after the current cycle. Thread-safe.
    fn request_engine_stop(&self);
    fn is_stop_requested(&self) -> bool;

    /// Whether node errors should capture the failing node's input values.
    fn capture_error_inputs(&self) -> bool {
        false
    }

    /// Registers a callback to run once before the next evaluation cycle.
    fn add_before_evaluation_notification(&self, f: Box<dyn FnOnce()>);
    /// Registers a callback to run once after the current evaluation cycle.
    fn add_after_evaluation_notification(&self, f: Box<dyn FnOnce()>);

    fn add_life_cycle_observer(&self, observer: Rc<dyn EvaluationLifeCycleObserver>);

    /// Advances engine time, honouring a pending stop request by jumping
    /// past the end time.
    fn advance_engine_time(&self);

    fn notify_before_evaluation(&self);
    fn notify_after_evaluation(&self);
    fn notify_before_graph_evaluation(&self, graph: &Rc<Graph>);
    fn notify_after_graph_evaluation(&self, graph: &Rc<Graph>);
    fn notify_after_graph_push_nodes_evaluation(&self, graph: &Rc<Graph>);
    fn notify_before_node_evaluation(&self, node: &Rc<Node>);
    fn notify_after_node_evaluation(&self, node: &Rc<Node>);
    fn notify_before_start_graph(&self, graph: &Rc<Graph>);
    fn notify_after_start_graph(&self, graph: &Rc<Graph>);
    fn notify_before_stop_graph(&self, graph: &Rc<Graph>);
    fn notify_after_stop_graph(&self, graph: &Rc<Graph>);
    fn notify_before_start_node(&self, node: &Rc<Node>);
    fn notify_after_start_node(&self, node: &Rc<Node>);
    fn notify_before_stop_node(&self, node: &Rc<Node>);
    fn notify_after_stop_node(&self, node: &Rc<Node>);
}

/// The engine owned by the graph executor.
pub struct MasterEvaluationEngine {
    clock: Rc<dyn EngineEvaluationClock>,
    mode: EvaluationMode,
    start_time: EngineTime,
    end_time: EngineTime,
    stop_requested: Arc<AtomicBool>,
    global_state: GlobalState,
    capture_error_inputs: bool,
    observers: RefCell<Vec<Rc<dyn EvaluationLifeCycleObserver>>>,
    before_notifications: RefCell<Vec<Box<dyn FnOnce()>>>,
    after_notifications: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl MasterEvaluationEngine {
    pub fn new(
        clock: Rc<dyn EngineEvaluationClock>,
        mode: EvaluationMode,
        start_time: EngineTime,
        end_time: EngineTime,
        global_state: GlobalState,
        capture_error_inputs: bool,
    ) -> Rc<Self> {
        Rc::new(MasterEvaluationEngine {
            clock,
            mode,
            start_time,
            end_time,
            stop_requested: Arc::new(AtomicBool::new(false)),
            global_state,
            capture_error_inputs,
            observers: RefCell::new(Vec::new()),
            before_notifications: RefCell::new(Vec::new()),
            after_notifications: RefCell::new(Vec::new()),
        })
    }

    fn for_each_observer(&self, f: impl Fn(&Rc<dyn EvaluationLifeCycleObserver>)) {
        for observer in self.observers.borrow().iter() {
            f(observer);
        }
    }
}

impl EvaluationEngine for MasterEvaluationEngine {
    fn evaluation_mode(&self) -> EvaluationMode {
        self.mode
    }

    fn start_time(&self) -> EngineTime {
        self.start_time
    }

    fn end_time(&self) -> EngineTime {
        self.end_time
    }

    fn engine_evaluation_clock(&self) -> Rc<dyn EngineEvaluationClock> {
        self.clock.clone()
    }

    fn global_state(&self) -> GlobalState {
        self.global_state.clone()
    }

    fn request_engine_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        // Wake the real-time wait so the stop is observed promptly.
        self.clock.push_signal().set_pending();
    }

    fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn capture_error_inputs(&self) -> bool {
        self.capture_error_inputs
    }

    fn add_before_evaluation_notification(&self, f: Box<dyn FnOnce()>) {
        self.before_notifications.borrow_mut().push(f);
    }

    fn add_after_evaluation_notification(&self, f: Box<dyn FnOnce()>) {
        self.after_notifications.borrow_mut().push(f);
    }

    fn add_life_cycle_observer(&self, observer: Rc<dyn EvaluationLifeCycleObserver>) {
        self.observers.borrow_mut().push(observer);
    }

    fn advance_engine_time(&self) {
        if self.is_stop_requested() {
            self.clock.set_evaluation_time(self.end_time.next());
            return;
        }
        // Bound the advance at just past the end time so an idle graph ends.
        self.clock.update_next_scheduled_evaluation_time(self.end_time.next());
        self.clock.advance_to_next_scheduled_time();
    }

    fn notify_before_evaluation(&self) {
        let callbacks = std::mem::take(&mut *self.before_notifications.borrow_mut());
        for callback in callbacks {
            callback();
        }
    }

    fn notify_after_evaluation(&self) {
        let callbacks = std::mem::take(&mut *self.after_notifications.borrow_mut());
        for callback in callbacks {
            callback();
        }
    }

    fn notify_before_graph_evaluation(&self, graph: &Rc<Graph>) {
        self.for_each_observer(|o| o.on_before_graph_evaluation(graph));
    }

    fn notify_after_graph_evaluation(&self, graph: &Rc<Graph>) {
        self.for_each_observer(|o| o.on_after_graph_evaluation(graph));
    }

    fn notify_after_graph_push_nodes_evaluation(&self, graph: &Rc<Graph>) {
        self.for_each_observer(|o| o.on_after_graph_push_nodes_evaluation(graph));
    }

    fn notify_before_node_evaluation(&self, node: &Rc<Node>) {
        self.for_each_observer(|o| o.on_before_node_evaluation(node));
    }

    fn notify_after_node_evaluation(&self, node: &Rc<Node>) {
        self.for_each_observer(|o| o.on_after_node_evaluation(node));
    }

    fn notify_before_start_graph(&self, graph: &Rc<Graph>) {
        self.for_each_observer(|o| o.on_before_start_graph(graph));
    }

    fn notify_after_start_graph(&self, graph: &Rc<Graph>) {
        self.for_each_observer(|o| o.on_after_start_graph(graph));
    }

    fn notify_before_stop_graph(&self, graph: &Rc<Graph>) {
        self.for_each_observer(|o| o.on_before_stop_graph(graph));
    }

    fn notify_after_stop_graph(&self, graph: &Rc<Graph>) {
        self.for_each_observer(|o| o.on_after_stop_graph(graph));
    }

    fn notify_before_start_node(&self, node: &Rc<Node>) {
        self.for_each_observer(|o| o.on_before_start_node(node));
    }

    fn notify_after_start_node(&self, node: &Rc<Node>) {
        self.for_each_observer(|o| o.on_after_start_node(node));
    }

    fn notify_before_stop_node(&self, node: &Rc<Node>) {
        self.for_each_observer(|o| o.on_before_stop_node(node));
    }

    fn notify_after_stop_node(&self, node: &Rc<Node>) {
        self.for_each_observer(|o| o.on_after_stop_node(node));
    }
}

/// Forwards every engine call to a wrapped engine; nested engines embed this
/// and override only the clock.
pub struct EvaluationEngineDelegate {
    inner: Rc<dyn EvaluationEngine>,
}

impl EvaluationEngineDelegate {
    pub fn new(inner: Rc<dyn EvaluationEngine>) -> Self {
        EvaluationEngineDelegate { inner }
    }

    pub fn inner(&self) -> &Rc<dyn EvaluationEngine> {
        &self.inner
    }
}

macro_rules! delegate_engine {
    () => {
        fn evaluation_mode(&self) -> EvaluationMode {
            self.delegate().evaluation_mode()
        }
        fn start_time(&self) -> EngineTime {
            self.delegate().start_time()
        }
        fn end_time(&self) -> EngineTime {
            self.delegate().end_time()
        }
        fn global_state(&self) -> GlobalState {
            self.delegate().global_state()
        }
        fn request_engine_stop(&self) {
            self.delegate().request_engine_stop()
        }
        fn is_stop_requested(&self) -> bool {
            self.delegate().is_stop_requested()
        }
        fn capture_error_inputs(&self) -> bool {
            self.delegate().capture_error_inputs()
        }
        fn add_before_evaluation_notification(&self, f: Box<dyn FnOnce()>) {
            self.delegate().add_before_evaluation_notification(f)
        }
        fn add_after_evaluation_notification(&self, f: Box<dyn FnOnce()>) {
            self.delegate().add_after_evaluation_notification(f)
        }
        fn add_life_cycle_observer(&self, observer: Rc<dyn EvaluationLifeCycleObserver>) {
            self.delegate().add_life_cycle_observer(observer)
        }
        fn advance_engine_time(&self) {
            self.delegate().advance_engine_time()
        }
        fn notify_before_evaluation(&self) {
            self.delegate().notify_before_evaluation()
        }
        fn notify_after_evaluation(&self) {
            self.delegate().notify_after_evaluation()
        }
        fn notify_before_graph_evaluation(&self, graph: &Rc<Graph>) {
            self.delegate().notify_before_graph_evaluation(graph)
        }
        fn notify_after_graph_evaluation(&self, graph: &Rc<Graph>) {
            self.delegate().notify_after_graph_evaluation(graph)
        }
        fn notify_after_graph_push_nodes_evaluation(&self, graph: &Rc<Graph>) {
            self.delegate().notify_after_graph_push_nodes_evaluation(graph)
        }
        fn notify_before_node_evaluation(&self, node: &Rc<Node>) {
            self.delegate().notify_before_node_evaluation(node)
        }
        fn notify_after_node_evaluation(&self, node: &Rc<Node>) {
            self.delegate().notify_after_node_evaluation(node)
        }
        fn notify_before_start_graph(&self, graph: &Rc<Graph>) {
            self.delegate().notify_before_start_graph(graph)
        }
        fn notify_after_start_graph(&self, graph: &Rc<Graph>) {
            self.delegate().notify_after_start_graph(graph)
        }
        fn notify_before_stop_graph(&self, graph: &Rc<Graph>) {
            self.delegate().notify_before_stop_graph(graph)
        }
        fn notify_after_stop_graph(&self, graph: &Rc<Graph>) {
            self.delegate().notify_after_stop_graph(graph)
        }
        fn notify_before_start_node(&self, node: &Rc<Node>) {
            self.delegate().notify_before_start_node(node)
        }
        fn notify_after_start_node(&self, node: &Rc<Node>) {
            self.delegate().notify_after_start_node(node)
        }
        fn notify_before_stop_node(&self, node: &Rc<Node>) {
            self.delegate().notify_before_stop_node(node)
        }
        fn notify_after_stop_node(&self, node: &Rc<Node>) {
            self.delegate().notify_after_stop_node(node)
        }
    };
}

impl EvaluationEngineDelegate {
    fn delegate(&self) -> &Rc<dyn EvaluationEngine> {
        &self.inner
    }
}

impl EvaluationEngine for EvaluationEngineDelegate {
    fn engine_evaluation_clock(&self) -> Rc<dyn EngineEvaluationClock> {
        self.delegate().engine_evaluation_clock()
    }
    delegate_engine!();
}

pub(crate) use delegate_engine;
