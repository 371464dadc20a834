//! Mesh: a map whose key population can also be demanded at runtime.

use std::rc::Rc;

use crate::errors::NodeError;
use crate::nested::map::{MapConfig, MapMachine};
use crate::nested::NestedMachine;
use crate::runtime::graph::Graph;
use crate::runtime::node::Node;

/// Wiring description of a mesh node: map wiring plus an optional second
/// TSS input whose elements demand instances on top of the base key set.
///
/// Consumers publish the keys they need into the request set; a requested
/// key gets an instance exactly like a base key and disappears when the
/// request is withdrawn.
#[derive(Clone)]
pub struct MeshConfig {
    pub map: MapConfig,
    pub request_arg: Option<String>,
}

pub struct MeshMachine {
    inner: MapMachine,
}

impl MeshMachine {
    pub fn new(config: MeshConfig) -> Self {
        MeshMachine { inner: MapMachine::with_extra_keys(config.map, config.request_arg) }
    }
}

impl NestedMachine for MeshMachine {
    fn start(&self, node: &Rc<Node>) -> Result<(), NodeError> {
        self.inner.start(node)
    }

    fn eval(&self, node: &Rc<Node>) -> Result<(), NodeError> {
        self.inner.eval(node)
    }

    fn stop(&self, node: &Rc<Node>) {
        self.inner.stop(node)
    }

    fn dispose(&self, node: &Rc<Node>) {
        self.inner.dispose(node)
    }

    fn nested_graphs(&self) -> Vec<Rc<Graph>> {
        self.inner.nested_graphs()
    }
}
