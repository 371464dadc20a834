//! Component: a single inner graph behind a named boundary.

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
use crate::types::value::ScalarValue;

/// Wiring description of a component's inner graph.
#[derive(Clone)]
pub struct ComponentConfig {
    pub graph_builder: Rc<GraphBuilder>,
    pub input_node_ids: BTreeMap<String, usize>,
    pub output_node_id: Option<usize>,
}

/// A pass-through nested node: errors propagate unchanged, outputs forward
/// directly to the outer output.
pub struct ComponentMachine {
    config: ComponentConfig,
    active: RefCell<Option<Rc<Graph>>>,
    scheduled: ScheduledKeys,
    count: Cell<usize>,
}

impl ComponentMachine {
    pub fn new(config: ComponentConfig) -> Self {
        ComponentMachine {
            config,
            active: RefCell::new(None),
            scheduled: ScheduledKeys::default(),
            count: Cell::new(0),
        }
    }

    fn instance_key() -> ScalarValue {
        ScalarValue::Int(0)
    }

    fn build(&self, node: &Rc<Node>) -> Result<(), NodeError> {
        let mut bindings: BTreeMap<String, Rc<Output>> = BTreeMap::new();
        for arg in self.config.input_node_ids.keys() {
            let outer_input = node.named_input(arg).ok_or_else(|| {
                node.to_node_error(EvalError::Message(format!("component has no input {arg}")))
            })?;
            let outer_output = outer_input.peer_output().ok_or_else(|| {
                node.to_node_error(EvalError::Message(format!(
                    "component input {arg} is not peer-bound"
                )))
            })?;
            bindings.insert(arg.clone(), outer_output);
        }
        let wiring = InnerWiring {
            builder: &self.config.graph_builder,
            input_node_ids: &self.config.input_node_ids,
            bindings,
            key: None,
            output_node_id: self.config.output_node_id,
            output_target: node.output(),
        };
        let graph = instantiate_inner_graph(node, wiring, Self::instance_key(), &self.scheduled, self.count.get())?;
        self.count.set(self.count.get() + 1);
        start_and_prime(node, &graph, &self.scheduled, &Self::instance_key())?;
        *self.active.borrow_mut() = Some(graph);
        Ok(())
    }
}

impl NestedMachine for ComponentMachine {
    fn start(&self, node: &Rc<Node>) -> Result<(), NodeError> {
        self.build(node)?;
        node.notify();
        Ok(())
    }

    fn eval(&self, node: &Rc<Node>) -> Result<(), NodeError> {
        let active = &self.active;
        drain_scheduled(node, &self.scheduled, |_| active.borrow().clone())
    }

    fn stop(&self, node: &Rc<Node>) {
        let _ = node;
        if let Some(graph) = &*self.active.borrow() {
            graph.stop();
        }
    }

    fn dispose(&self, node: &Rc<Node>) {
        let _ = node;
        if let Some(graph) = self.active.borrow_mut().take() {
            graph.dispose();
        }
    }

    fn nested_graphs(&self) -> Vec<Rc<Graph>> {
        self.active.borrow().iter().cloned().collect()
    }
}
