//! TryExcept: a single inner graph whose errors are trapped and published
//! to a dedicated exception output instead of unwinding the engine.

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

/// Wiring description of a try_except node's inner graph.
///
/// The outer output is a bundle with an `exception` field and, when the
/// inner graph produces a value, an `out` field the output stub feeds.
#[derive(Clone)]
pub struct TryExceptConfig {
    pub graph_builder: Rc<GraphBuilder>,
    pub input_node_ids: BTreeMap<String, usize>,
    pub output_node_id: Option<usize>,
}

pub struct TryExceptMachine {
    config: TryExceptConfig,
    active: RefCell<Option<Rc<Graph>>>,
    scheduled: ScheduledKeys,
    count: Cell<usize>,
}

impl TryExceptMachine {
    pub fn new(config: TryExceptConfig) -> Self {
        TryExceptMachine {
            config,
            active: RefCell::new(None),
            scheduled: ScheduledKeys::default(),
            count: Cell::new(0),
        }
    }

    fn instance_key() -> ScalarValue {
        ScalarValue::Int(0)
    }

    fn out_target(&self, node: &Rc<Node>) -> Option<Rc<Output>> {
        let output = node.output()?;
        output.field("out").or(Some(output))
    }

    fn build(&self, node: &Rc<Node>) -> Result<(), NodeError> {
        let mut bindings: BTreeMap<String, Rc<Output>> = BTreeMap::new();
        for arg in self.config.input_node_ids.keys() {
            let outer_input = node.named_input(arg).ok_or_else(|| {
                node.to_node_error(EvalError::Message(format!("try_except node has no input {arg}")))
            })?;
            let outer_output = outer_input.peer_output().ok_or_else(|| {
                node.to_node_error(EvalError::Message(format!(
                    "try_except input {arg} is not peer-bound"
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
            output_target: self.out_target(node),
        };
        let graph = instantiate_inner_graph(node, wiring, Self::instance_key(), &self.scheduled, self.count.get())?;
        self.count.set(self.count.get() + 1);
        *self.active.borrow_mut() = Some(graph);
        Ok(())
    }

    /// Publishes a trapped inner error to the `exception` output.
    fn publish(&self, node: &Rc<Node>, error: NodeError) -> Result<(), NodeError> {
        let exception = node
            .output()
            .and_then(|output| output.field("exception"))
            .ok_or_else(|| error.clone())?;
        tracing::warn!(node = %node.qualified_name(), inner = %error, "inner graph error trapped");
        exception
            .apply_result(TsValue::Scalar(error.to_scalar_value()))
            .map_err(|e| node.to_node_error(e))
    }
}

impl NestedMachine for TryExceptMachine {
    fn start(&self, node: &Rc<Node>) -> Result<(), NodeError> {
        self.build(node)?;
        if let Some(graph) = &*self.active.borrow() {
            match start_and_prime(node, graph, &self.scheduled, &Self::instance_key()) {
                Ok(()) => {}
                Err(error) => self.publish(node, error)?,
            }
        }
        node.notify();
        Ok(())
    }

    fn eval(&self, node: &Rc<Node>) -> Result<(), NodeError> {
        let active = &self.active;
        let result = drain_scheduled(node, &self.scheduled, |_| active.borrow().clone());
        match result {
            Ok(()) => Ok(()),
            Err(error) => self.publish(node, error),
        }
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
