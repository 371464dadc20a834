//! Builders: the bridge from wiring to runtime instances.
//!
//! Wiring hands the runtime a tree of `GraphBuilder → NodeBuilder →
//! {Input,Output}Builder`; `make_instance` turns it into a running graph,
//! resolving edges into input-to-output bindings.

pub mod ops;
pub mod stubs;

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::errors::BuilderError;
use crate::nested::{
    ComponentConfig, ComponentMachine, MapConfig, MapMachine, MeshConfig, MeshMachine, ReduceConfig,
    ReduceMachine, SwitchConfig, SwitchMachine, TryExceptConfig, TryExceptMachine,
};
use crate::runtime::graph::{Graph, GraphId};
use crate::runtime::node::{
    EvalFn, GeneratorFn, GeneratorState, LifecycleFn, Node, NodeBody, NodeSignature, PushQueue,
};
use crate::ts::input::{Input, InputOwner};
use crate::ts::output::{Output, OutputOwner};
use crate::types::meta::TsMeta;
use crate::types::value::ScalarValue;

/// A path segment selecting a TSD output's key-set view instead of a
/// positional child.
pub const KEY_SET_PATH: usize = usize::MAX;

/// A leading path segment selecting a node's error output instead of its
/// time-series output.
pub const ERROR_PATH: usize = usize::MAX - 1;

/// One wiring edge: source node/output-path to destination node/input-path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub src_node: usize,
    pub output_path: Vec<usize>,
    pub dst_node: usize,
    pub input_path: Vec<usize>,
}

impl Edge {
    pub fn new(src_node: usize, output_path: Vec<usize>, dst_node: usize, input_path: Vec<usize>) -> Self {
        Edge { src_node, output_path, dst_node, input_path }
    }
}

/// Builds input instances for a time-series type.
#[derive(Clone)]
pub struct InputBuilder {
    meta: TsMeta,
}

impl InputBuilder {
    pub fn new(meta: TsMeta) -> Self {
        InputBuilder { meta }
    }

    pub fn meta(&self) -> &TsMeta {
        &self.meta
    }

    pub fn make_instance(&self, owner: InputOwner) -> Rc<Input> {
        Input::build(&self.meta, owner)
    }

    pub fn release_instance(&self, _instance: &Rc<Input>) {}
}

/// Builds output instances for a time-series type.
#[derive(Clone)]
pub struct OutputBuilder {
    meta: TsMeta,
}

impl OutputBuilder {
    pub fn new(meta: TsMeta) -> Self {
        OutputBuilder { meta }
    }

    pub fn meta(&self) -> &TsMeta {
        &self.meta
    }

    pub fn make_instance(&self, owner: OutputOwner) -> Rc<Output> {
        Output::build(&self.meta, owner)
    }

    pub fn release_instance(&self, _instance: &Rc<Output>) {}
}

/// Maps type metadata to input/output builders. Composite and reference
/// child construction recurses through the same factory, preserving lazy
/// child creation for REF-of-composite bindings.
pub struct TimeSeriesBuilderFactory;

impl TimeSeriesBuilderFactory {
    pub fn make_input_builder(meta: &TsMeta) -> InputBuilder {
        InputBuilder::new(meta.clone())
    }

    pub fn make_output_builder(meta: &TsMeta) -> OutputBuilder {
        OutputBuilder::new(meta.clone())
    }
}

/// The body a node builder stamps out: a plain function, a generator, a
/// push queue, or a nested-graph machine.
#[derive(Clone)]
pub enum NodeBodyBuilder {
    Compute {
        eval_fn: EvalFn,
        start_fn: Option<LifecycleFn>,
        stop_fn: Option<LifecycleFn>,
    },
    Generator {
        gen_fn: GeneratorFn,
    },
    Push,
    Map(MapConfig),
    Switch(SwitchConfig),
    Reduce(ReduceConfig),
    Mesh(MeshConfig),
    TryExcept(TryExceptConfig),
    Component(ComponentConfig),
}

/// Builds node instances: signature, frozen scalars, input/output builders,
/// and the body.
pub struct NodeBuilder {
    signature: Rc<NodeSignature>,
    scalars: BTreeMap<String, ScalarValue>,
    input_builder: Option<InputBuilder>,
    output_builder: Option<OutputBuilder>,
    error_output_builder: Option<OutputBuilder>,
    feedback_output: bool,
    body: NodeBodyBuilder,
}

impl NodeBuilder {
    pub fn new(signature: NodeSignature, body: NodeBodyBuilder) -> Self {
        NodeBuilder::from_parts(Rc::new(signature), BTreeMap::new(), body)
    }

    pub fn from_parts(
        signature: Rc<NodeSignature>,
        scalars: BTreeMap<String, ScalarValue>,
        body: NodeBodyBuilder,
    ) -> Self {
        let input_builder = if signature.time_series_inputs.is_empty() {
            None
        } else {
            Some(InputBuilder::new(TsMeta::Bundle(signature.input_bundle_schema())))
        };
        let output_builder = signature.time_series_output.as_ref().map(TimeSeriesBuilderFactory::make_output_builder);
        let error_output_builder =
            signature.error_output.as_ref().map(TimeSeriesBuilderFactory::make_output_builder);
        NodeBuilder {
            signature,
            scalars,
            input_builder,
            output_builder,
            error_output_builder,
            feedback_output: false,
            body,
        }
    }

    pub fn with_scalar<S: Into<String>>(mut self, name: S, value: ScalarValue) -> Self {
        self.scalars.insert(name.into(), value);
        self
    }

    /// Marks the output as a feedback point: ticks wake subscribers on the
    /// next engine cycle, deliberately breaking same-cycle propagation so a
    /// wiring-level cycle reads the previous cycle's value.
    pub fn with_feedback(mut self) -> Self {
        self.feedback_output = true;
        self
    }

    pub fn signature(&self) -> &Rc<NodeSignature> {
        &self.signature
    }

    pub fn scalars(&self) -> &BTreeMap<String, ScalarValue> {
        &self.scalars
    }

    /// Constructs a node, its input bundle, and its outputs.
    pub fn make_instance(&self, owning_graph_id: &GraphId, ndx: usize) -> Rc<Node> {
        let body = match &self.body {
            NodeBodyBuilder::Compute { eval_fn, start_fn, stop_fn } => NodeBody::Compute {
                eval_fn: eval_fn.clone(),
                start_fn: start_fn.clone(),
                stop_fn: stop_fn.clone(),
            },
            NodeBodyBuilder::Generator { gen_fn } => NodeBody::Generator {
                gen_fn: gen_fn.clone(),
                state: std::cell::RefCell::new(GeneratorState { iter: None, next: None }),
            },
            NodeBodyBuilder::Push => NodeBody::Push { queue: PushQueue::default() },
            NodeBodyBuilder::Map(config) => NodeBody::Nested(Box::new(MapMachine::new(config.clone()))),
            NodeBodyBuilder::Switch(config) => {
                NodeBody::Nested(Box::new(SwitchMachine::new(config.clone())))
            }
            NodeBodyBuilder::Reduce(config) => {
                NodeBody::Nested(Box::new(ReduceMachine::new(config.clone())))
            }
            NodeBodyBuilder::Mesh(config) => NodeBody::Nested(Box::new(MeshMachine::new(config.clone()))),
            NodeBodyBuilder::TryExcept(config) => {
                NodeBody::Nested(Box::new(TryExceptMachine::new(config.clone())))
            }
            NodeBodyBuilder::Component(config) => {
                NodeBody::Nested(Box::new(ComponentMachine::new(config.clone())))
            }
        };
        let node = Rc::new(Node::new(
            ndx,
            owning_graph_id.clone(),
            self.signature.clone(),
            self.scalars.clone(),
            body,
        ));
        if let Some(builder) = &self.input_builder {
            node.set_input(builder.make_instance(InputOwner::Node(Rc::downgrade(&node))));
        }
        if let Some(builder) = &self.output_builder {
            let output = builder.make_instance(OutputOwner::Node(Rc::downgrade(&node)));
            if self.feedback_output {
                output.set_feedback();
            }
            node.set_output(output);
        }
        if let Some(builder) = &self.error_output_builder {
            node.set_error_output(builder.make_instance(OutputOwner::Node(Rc::downgrade(&node))));
        }
        node
    }

    /// Releases a node built by this builder; the single authoritative
    /// deallocation path (strong ownership flows top-down, so dropping the
    /// node drops its inputs and outputs).
    pub fn release_instance(&self, node: &Rc<Node>) {
        if let Some(input) = node.input() {
            if let Some(builder) = &self.input_builder {
                builder.release_instance(&input);
            }
        }
        if let Some(output) = node.output() {
            if let Some(builder) = &self.output_builder {
                builder.release_instance(&output);
            }
        }
    }
}

/// An ordered set of node builders plus the edges between them.
///
/// Node builders must already be in rank order: push sources, pull sources,
/// compute nodes topologically, sinks last. Every edge must respect rank.
pub struct GraphBuilder {
    node_builders: Vec<Rc<NodeBuilder>>,
    edges: Vec<Edge>,
}

impl GraphBuilder {
    pub fn new(node_builders: Vec<Rc<NodeBuilder>>, edges: Vec<Edge>) -> Self {
        GraphBuilder { node_builders, edges }
    }

    pub fn node_builders(&self) -> &[Rc<NodeBuilder>] {
        &self.node_builders
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Constructs the nodes and wires the edges; initialisation is deferred
    /// until the graph is attached to an engine.
    pub fn make_instance(
        &self,
        graph_id: GraphId,
        parent_node: Option<&Rc<Node>>,
    ) -> Result<Rc<Graph>, BuilderError> {
        let nodes = self.make_nodes(&graph_id, 0)?;
        Ok(Graph::new(graph_id, nodes, parent_node))
    }

    pub(crate) fn make_nodes(&self, graph_id: &GraphId, offset: usize) -> Result<Vec<Rc<Node>>, BuilderError> {
        let nodes: Vec<Rc<Node>> = self
            .node_builders
            .iter()
            .enumerate()
            .map(|(ndx, builder)| builder.make_instance(graph_id, offset + ndx))
            .collect();
        for (ndx, edge) in self.edges.iter().enumerate() {
            let src = nodes
                .get(edge.src_node)
                .ok_or(BuilderError::NodeOutOfRange { edge: ndx, node: edge.src_node })?;
            let dst = nodes
                .get(edge.dst_node)
                .ok_or(BuilderError::NodeOutOfRange { edge: ndx, node: edge.dst_node })?;
            let output = resolve_output(src, &edge.output_path).ok_or_else(|| {
                BuilderError::UnresolvedOutputPath { edge: ndx, path: edge.output_path.clone() }
            })?;
            let input = resolve_input(dst, &edge.input_path).ok_or_else(|| {
                BuilderError::UnresolvedInputPath { edge: ndx, path: edge.input_path.clone() }
            })?;
            input.bind_output(&output).map_err(|_| BuilderError::BindTypeMismatch {
                output: output.meta().to_string(),
                input: input.meta().to_string(),
            })?;
        }
        Ok(nodes)
    }

    /// Releases a graph built by this builder, node by node.
    pub fn release_instance(&self, graph: &Rc<Graph>) {
        for (ndx, builder) in self.node_builders.iter().enumerate() {
            if let Some(node) = graph.node(ndx) {
                builder.release_instance(&node);
            }
        }
    }
}

fn resolve_output(node: &Rc<Node>, path: &[usize]) -> Option<Rc<Output>> {
    let (mut output, path) = if path.first() == Some(&ERROR_PATH) {
        (node.error_output()?, &path[1..])
    } else {
        (node.output()?, path)
    };
    for segment in path {
        output = if *segment == KEY_SET_PATH {
            output.key_set_output()?
        } else {
            output.child(*segment)?
        };
    }
    Some(output)
}

fn resolve_input(node: &Rc<Node>, path: &[usize]) -> Option<Rc<Input>> {
    let mut input = node.input()?;
    for segment in path {
        input = input.child(*segment)?;
    }
    Some(input)
}
