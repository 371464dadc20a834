//! Reduce: fold a TSD through a tree of binary inner graphs.

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

/// Wiring description of a reduce node's binary inner graph.
///
/// The inner graph folds two operands (`lhs`/`rhs` stubs) into one result;
/// the combining function is expected to be associative with `zero` as its
/// identity, so the fold tree's shape does not affect the result.
#[derive(Clone)]
pub struct ReduceConfig {
    pub graph_builder: Rc<GraphBuilder>,
    /// Stub indices for the two operands, conventionally `lhs` and `rhs`.
    pub input_node_ids: BTreeMap<String, usize>,
    pub output_node_id: Option<usize>,
    /// The TSD input being folded.
    pub ts_arg: String,
    /// The TS input providing the fold identity.
    pub zero_arg: String,
    /// The TSS input carrying the key set; conventionally `__keys__`.
    pub keys_arg: String,
}

/// Maintains a balanced tree of binary instances over the current key set,
/// rebuilt when keys are added or removed.
pub struct ReduceMachine {
    config: ReduceConfig,
    instances: RefCell<Vec<Rc<Graph>>>,
    scheduled: ScheduledKeys,
    count: Cell<usize>,
    built: Cell<bool>,
}

impl ReduceMachine {
    pub fn new(config: ReduceConfig) -> Self {
        ReduceMachine {
            config,
            instances: RefCell::new(Vec::new()),
            scheduled: ScheduledKeys::default(),
            count: Cell::new(0),
            built: Cell::new(false),
        }
    }

    fn zero_output(&self, node: &Rc<Node>) -> Result<Rc<Output>, NodeError> {
        node.named_input(&self.config.zero_arg)
            .and_then(|input| input.peer_output())
            .ok_or_else(|| {
                node.to_node_error(EvalError::Message(format!(
                    "reduce input {} is not peer-bound",
                    self.config.zero_arg
                )))
            })
    }

    /// Builds one pair instance folding `lhs` and `rhs`; the root instance
    /// writes into the outer output, inner ones keep their stub output.
    fn make_pair(
        &self,
        node: &Rc<Node>,
        lhs: Rc<Output>,
        rhs: Rc<Output>,
        target: Option<Rc<Output>>,
    ) -> Result<Rc<Graph>, NodeError> {
        let mut bindings: BTreeMap<String, Rc<Output>> = BTreeMap::new();
        bindings.insert("lhs".to_string(), lhs);
        bindings.insert("rhs".to_string(), rhs);
        let index = self.instances.borrow().len();
        let wiring = InnerWiring {
            builder: &self.config.graph_builder,
            input_node_ids: &self.config.input_node_ids,
            bindings,
            key: None,
            output_node_id: self.config.output_node_id,
            output_target: target,
        };
        let instance_key = ScalarValue::Int(index as i64);
        let graph =
            instantiate_inner_graph(node, wiring, instance_key.clone(), &self.scheduled, self.count.get())?;
        self.count.set(self.count.get() + 1);
        start_and_prime(node, &graph, &self.scheduled, &instance_key)?;
        Ok(graph)
    }

    /// The intermediate output of an instance's output stub.
    fn instance_output(&self, node: &Rc<Node>, graph: &Rc<Graph>) -> Result<Rc<Output>, NodeError> {
        self.config
            .output_node_id
            .and_then(|ndx| graph.node(ndx))
            .and_then(|stub| stub.output())
            .ok_or_else(|| node.to_node_error(EvalError::Message("reduce instance has no output".to_string())))
    }

    fn rebuild(&self, node: &Rc<Node>) -> Result<(), NodeError> {
        for graph in self.instances.borrow_mut().drain(..) {
            graph.stop();
            graph.dispose();
        }
        self.scheduled.borrow_mut().clear();
        let zero = self.zero_output(node)?;
        let ts_output = node
            .named_input(&self.config.ts_arg)
            .and_then(|input| input.peer_output())
            .ok_or_else(|| {
                node.to_node_error(EvalError::Message(format!(
                    "reduce input {} is not peer-bound",
                    self.config.ts_arg
                )))
            })?;

        let mut level: Vec<Rc<Output>> = ts_output
            .dict_keys()
            .iter()
            .filter_map(|key| ts_output.dict_child(key))
            .collect();
        if level.is_empty() {
            level.push(zero.clone());
        }
        loop {
            if level.len() == 1 {
                // Normalise the final shape: combine the survivor with zero
                // straight into the outer output.
                let graph = self.make_pair(node, level[0].clone(), zero.clone(), node.output())?;
                self.instances.borrow_mut().push(graph);
                break;
            }
            let root = level.len() == 2;
            let mut next: Vec<Rc<Output>> = Vec::with_capacity(level.len().div_ceil(2));
            for pair in level.chunks(2) {
                let lhs = pair[0].clone();
                let rhs = pair.get(1).cloned().unwrap_or_else(|| zero.clone());
                let target = if root { node.output() } else { None };
                let graph = self.make_pair(node, lhs, rhs, target)?;
                if !root {
                    next.push(self.instance_output(node, &graph)?);
                }
                self.instances.borrow_mut().push(graph);
            }
            if root {
                break;
            }
            level = next;
        }
        self.built.set(true);
        Ok(())
    }
}

impl NestedMachine for ReduceMachine {
    fn start(&self, node: &Rc<Node>) -> Result<(), NodeError> {
        node.notify();
        Ok(())
    }

    fn eval(&self, node: &Rc<Node>) -> Result<(), NodeError> {
        let keys_ticked = node
            .named_input(&self.config.keys_arg)
            .is_some_and(|input| input.modified());
        if keys_ticked || !self.built.get() {
            self.rebuild(node)?;
        }
        let instances = &self.instances;
        drain_scheduled(node, &self.scheduled, |key| match key {
            ScalarValue::Int(index) => instances.borrow().get(*index as usize).cloned(),
            _ => None,
        })
    }

    fn stop(&self, node: &Rc<Node>) {
        let _ = node;
        for graph in self.instances.borrow().iter() {
            graph.stop();
        }
    }

    fn dispose(&self, node: &Rc<Node>) {
        let _ = node;
        for graph in self.instances.borrow_mut().drain(..) {
            graph.dispose();
        }
    }

    fn nested_graphs(&self) -> Vec<Rc<Graph>> {
        self.instances.borrow().clone()
    }
}
