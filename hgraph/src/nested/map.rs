//! Map over a TSD: one inner graph instance per key.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use crate::builder::GraphBuilder;
use crate::errors::EvalError;
use crate::errors::NodeError;
use crate::nested::{
    drain_scheduled, instantiate_inner_graph, start_and_prime, InnerWiring, NestedMachine,
    ScheduledKeys,
};
use crate::runtime::graph::Graph;
use crate::runtime::node::Node;
use crate::ts::output::Output;
use crate::types::value::ScalarValue;

/// Wiring description of a map node's inner graph.
#[derive(Clone)]
pub struct MapConfig {
    pub graph_builder: Rc<GraphBuilder>,
    /// Outer-arg name → inner stub node index.
    pub input_node_ids: BTreeMap<String, usize>,
    /// Inner stub sink forwarding to the outer output's per-key child.
    pub output_node_id: Option<usize>,
    /// Args demultiplexed per key (TSD inputs); the rest pass through whole.
    pub multiplexed_args: BTreeSet<String>,
    /// The inner arg that receives the key itself, if the function wants it.
    pub key_arg: Option<String>,
    /// The TSS input carrying the key set; conventionally `__keys__`.
    pub keys_arg: String,
}

/// One inner graph per key in the keys set; keys arriving create instances,
/// keys leaving stop and dispose them.
pub struct MapMachine {
    config: MapConfig,
    /// A second TSS input whose elements also demand instances (mesh).
    extra_keys_arg: Option<String>,
    instances: RefCell<BTreeMap<ScalarValue, Rc<Graph>>>,
    scheduled: ScheduledKeys,
    count: Cell<usize>,
}

impl MapMachine {
    pub fn new(config: MapConfig) -> Self {
        MapMachine {
            config,
            extra_keys_arg: None,
            instances: RefCell::new(BTreeMap::new()),
            scheduled: ScheduledKeys::default(),
            count: Cell::new(0),
        }
    }

    pub(crate) fn with_extra_keys(config: MapConfig, extra_keys_arg: Option<String>) -> Self {
        let mut machine = MapMachine::new(config);
        machine.extra_keys_arg = extra_keys_arg;
        machine
    }

    /// The keys that should have live instances right now.
    fn desired_keys(&self, node: &Rc<Node>) -> BTreeSet<ScalarValue> {
        let mut keys = BTreeSet::new();
        for arg in std::iter::once(&self.config.keys_arg).chain(self.extra_keys_arg.iter()) {
            if let Some(input) = node.named_input(arg) {
                if let Some(output) = input.peer_output() {
                    if let Some(values) = output.set_values() {
                        keys.extend(values);
                    }
                }
            }
        }
        keys
    }

    fn keys_modified(&self, node: &Rc<Node>) -> bool {
        std::iter::once(&self.config.keys_arg)
            .chain(self.extra_keys_arg.iter())
            .any(|arg| node.named_input(arg).is_some_and(|i| i.modified()))
    }

    fn create_instance(&self, node: &Rc<Node>, key: &ScalarValue) -> Result<(), NodeError> {
        let mut bindings: BTreeMap<String, Rc<Output>> = BTreeMap::new();
        for arg in self.config.input_node_ids.keys() {
            if Some(arg.as_str()) == self.config.key_arg.as_deref() {
                continue;
            }
            let outer_input = node.named_input(arg).ok_or_else(|| {
                node.to_node_error(EvalError::Message(format!("map node has no input {arg}")))
            })?;
            let outer_output = outer_input.peer_output().ok_or_else(|| {
                node.to_node_error(EvalError::Message(format!("map input {arg} is not peer-bound")))
            })?;
            let source = if self.config.multiplexed_args.contains(arg) {
                outer_output
                    .dict_get_or_create(key)
                    .map_err(|e| node.to_node_error(e))?
            } else {
                outer_output
            };
            bindings.insert(arg.clone(), source);
        }
        let target = match node.output() {
            Some(output) => Some(output.dict_get_or_create(key).map_err(|e| node.to_node_error(e))?),
            None => None,
        };
        let wiring = InnerWiring {
            builder: &self.config.graph_builder,
            input_node_ids: &self.config.input_node_ids,
            bindings,
            key: self.config.key_arg.clone().map(|arg| (arg, key.clone())),
            output_node_id: self.config.output_node_id,
            output_target: target,
        };
        let graph = instantiate_inner_graph(node, wiring, key.clone(), &self.scheduled, self.count.get())?;
        self.count.set(self.count.get() + 1);
        start_and_prime(node, &graph, &self.scheduled, key)?;
        self.instances.borrow_mut().insert(key.clone(), graph);
        Ok(())
    }

    fn remove_instance(&self, node: &Rc<Node>, key: &ScalarValue) -> Result<(), NodeError> {
        if let Some(graph) = self.instances.borrow_mut().remove(key) {
            graph.stop();
            graph.dispose();
        }
        self.scheduled.borrow_mut().remove(key);
        if let Some(output) = node.output() {
            output.dict_remove_key(key).map_err(|e| node.to_node_error(e))?;
        }
        Ok(())
    }

    fn sync_instances(&self, node: &Rc<Node>) -> Result<(), NodeError> {
        let desired = self.desired_keys(node);
        let existing: BTreeSet<ScalarValue> = self.instances.borrow().keys().cloned().collect();
        for key in existing.difference(&desired) {
            self.remove_instance(node, key)?;
        }
        for key in desired.difference(&existing) {
            self.create_instance(node, key)?;
        }
        Ok(())
    }
}

impl NestedMachine for MapMachine {
    fn start(&self, node: &Rc<Node>) -> Result<(), NodeError> {
        // Pick up keys that were valid before we started.
        node.notify();
        Ok(())
    }

    fn eval(&self, node: &Rc<Node>) -> Result<(), NodeError> {
        if self.keys_modified(node) || self.instances.borrow().is_empty() {
            self.sync_instances(node)?;
        }
        let instances = &self.instances;
        drain_scheduled(node, &self.scheduled, |key| instances.borrow().get(key).cloned())
    }

    fn stop(&self, node: &Rc<Node>) {
        let _ = node;
        for graph in self.instances.borrow().values() {
            graph.stop();
        }
    }

    fn dispose(&self, node: &Rc<Node>) {
        let _ = node;
        for graph in self.instances.borrow().values() {
            graph.dispose();
        }
        self.instances.borrow_mut().clear();
    }

    fn nested_graphs(&self) -> Vec<Rc<Graph>> {
        self.instances.borrow().values().cloned().collect()
    }
}
