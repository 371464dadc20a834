//! Switch: one active inner graph selected by the value of a key input.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::builder::GraphBuilder;
use crate::errors::{EvalError, NodeError};
use crate::nested::{
    drain_scheduled, instantiate_inner_graph, start_and_prime, InnerWiring, NestedMachine,
    ScheduledKeys,
};
use crate::runtime::graph::Graph;
use crate::runtime::node::Node;
use crate::ts::output::Output;
use crate::types::value::{ScalarValue, TsValue};

/// The inner graph and stub wiring for one switch branch.
#[derive(Clone)]
pub struct SwitchCase {
    pub graph_builder: Rc<GraphBuilder>,
    pub input_node_ids: BTreeMap<String, usize>,
    pub output_node_id: Option<usize>,
    /// The inner arg that receives the selected key, if the branch wants it.
    pub key_arg: Option<String>,
}

/// Wiring description of a switch node.
#[derive(Clone)]
pub struct SwitchConfig {
    pub cases: BTreeMap<ScalarValue, SwitchCase>,
    /// The branch used when no case matches the key.
    pub default_case: Option<SwitchCase>,
    /// The TS input carrying the selector; conventionally `key`.
    pub key_arg: String,
    /// Rebuild the active branch on every key tick, even for equal keys.
    pub reload_on_ticked: bool,
}

/// Holds at most one inner graph; a key tick that changes the selection
/// (or any tick, with `reload_on_ticked`) disposes the current graph and
/// builds the branch for the new key.
pub struct SwitchMachine {
    config: SwitchConfig,
    active: RefCell<Option<(ScalarValue, Rc<Graph>)>>,
    scheduled: ScheduledKeys,
    count: Cell<usize>,
}

impl SwitchMachine {
    pub fn new(config: SwitchConfig) -> Self {
        SwitchMachine {
            config,
            active: RefCell::new(None),
            scheduled: ScheduledKeys::default(),
            count: Cell::new(0),
        }
    }

    fn selected_key(&self, node: &Rc<Node>) -> Option<ScalarValue> {
        node.named_input(&self.config.key_arg)
            .and_then(|input| input.value())
            .and_then(|value| match value {
                TsValue::Scalar(key) => Some(key),
                _ => None,
            })
    }

    fn rebuild(&self, node: &Rc<Node>, key: &ScalarValue) -> Result<(), NodeError> {
        if let Some((_, graph)) = self.active.borrow_mut().take() {
            graph.stop();
            graph.dispose();
        }
        self.scheduled.borrow_mut().clear();

        let case = self
            .config
            .cases
            .get(key)
            .or(self.config.default_case.as_ref())
            .ok_or_else(|| node.to_node_error(EvalError::MissingKey(key.to_string())))?;
        let mut bindings: BTreeMap<String, Rc<Output>> = BTreeMap::new();
        for arg in case.input_node_ids.keys() {
            if Some(arg.as_str()) == case.key_arg.as_deref() {
                continue;
            }
            let outer_input = node.named_input(arg).ok_or_else(|| {
                node.to_node_error(EvalError::Message(format!("switch node has no input {arg}")))
            })?;
            let outer_output = outer_input.peer_output().ok_or_else(|| {
                node.to_node_error(EvalError::Message(format!("switch input {arg} is not peer-bound")))
            })?;
            bindings.insert(arg.clone(), outer_output);
        }
        let wiring = InnerWiring {
            builder: &case.graph_builder,
            input_node_ids: &case.input_node_ids,
            bindings,
            key: case.key_arg.clone().map(|arg| (arg, key.clone())),
            output_node_id: case.output_node_id,
            output_target: node.output(),
        };
        let graph = instantiate_inner_graph(node, wiring, key.clone(), &self.scheduled, self.count.get())?;
        self.count.set(self.count.get() + 1);
        start_and_prime(node, &graph, &self.scheduled, key)?;
        *self.active.borrow_mut() = Some((key.clone(), graph));
        Ok(())
    }
}

impl NestedMachine for SwitchMachine {
    fn start(&self, node: &Rc<Node>) -> Result<(), NodeError> {
        node.notify();
        Ok(())
    }

    fn eval(&self, node: &Rc<Node>) -> Result<(), NodeError> {
        let key_ticked = node
            .named_input(&self.config.key_arg)
            .is_some_and(|input| input.modified());
        if key_ticked || self.active.borrow().is_none() {
            if let Some(key) = self.selected_key(node) {
                let stale = match &*self.active.borrow() {
                    Some((active_key, _)) => *active_key != key || self.config.reload_on_ticked,
                    None => true,
                };
                if stale {
                    self.rebuild(node, &key)?;
                }
            }
        }
        let active = &self.active;
        drain_scheduled(node, &self.scheduled, |key| {
            active
                .borrow()
                .as_ref()
                .filter(|(active_key, _)| active_key == key)
                .map(|(_, graph)| graph.clone())
        })
    }

    fn stop(&self, node: &Rc<Node>) {
        let _ = node;
        if let Some((_, graph)) = &*self.active.borrow() {
            graph.stop();
        }
    }

    fn dispose(&self, node: &Rc<Node>) {
        let _ = node;
        if let Some((_, graph)) = self.active.borrow_mut().take() {
            graph.dispose();
        }
    }

    fn nested_graphs(&self) -> Vec<Rc<Graph>> {
        self.active.borrow().iter().map(|(_, g)| g.clone()).collect()
    }
}
