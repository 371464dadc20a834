//! Convenience node builders for common source, compute, and sink shapes.

use std::rc::Rc;

use crate::builder::{NodeBodyBuilder, NodeBuilder};
use crate::errors::EvalError;
use crate::runtime::node::{EvalContext, EvalResult, NodeKind, NodeSignature};
use crate::time::{EngineTime, MIN_ST};
use crate::types::meta::TsMeta;
use crate::types::value::TsValue;

/// A pull source that ticks a single value at engine start.
pub fn const_node<S: Into<String>>(name: S, value: TsValue, meta: TsMeta) -> NodeBuilder {
    ticks_source(name, meta, vec![(MIN_ST, value)])
}

/// A pull source replaying explicit `(time, value)` ticks.
///
/// Ticks stamped at or before the engine start time are applied on the
/// first cycle; later ones self-schedule.
pub fn ticks_source<S: Into<String>>(
    name: S,
    meta: TsMeta,
    ticks: Vec<(EngineTime, TsValue)>,
) -> NodeBuilder {
    let signature = NodeSignature::new(name, NodeKind::PullSource).with_output(meta);
    NodeBuilder::new(
        signature,
        NodeBodyBuilder::Generator {
            gen_fn: Rc::new(move |_ctx| {
                Ok(Box::new(ticks.clone().into_iter()) as Box<dyn Iterator<Item = (EngineTime, TsValue)>>)
            }),
        },
    )
}

/// A compute node over an explicit signature.
pub fn compute_node<F>(signature: NodeSignature, eval_fn: F) -> NodeBuilder
where
    F: Fn(&mut EvalContext<'_>) -> Result<Option<EvalResult>, EvalError> + 'static,
{
    NodeBuilder::new(
        signature,
        NodeBodyBuilder::Compute { eval_fn: Rc::new(eval_fn), start_fn: None, stop_fn: None },
    )
}

/// A sink with a single `ts` input, driven by a side-effecting closure.
pub fn sink_node<S, F>(name: S, meta: TsMeta, effect: F) -> NodeBuilder
where
    S: Into<String>,
    F: Fn(&mut EvalContext<'_>) -> Result<(), EvalError> + 'static,
{
    let signature = NodeSignature::new(name, NodeKind::Sink).with_ts_input("ts", meta);
    NodeBuilder::new(
        signature,
        NodeBodyBuilder::Compute {
            eval_fn: Rc::new(move |ctx| {
                effect(ctx)?;
                Ok(None)
            }),
            start_fn: None,
            stop_fn: None,
        },
    )
}

/// A push source; obtain its queue from the running node (or register it in
/// global state with the `__push_queue__` scalar) and `send` from any thread.
pub fn push_source<S: Into<String>>(name: S, meta: TsMeta) -> NodeBuilder {
    let signature = NodeSignature::new(name, NodeKind::PushSource).with_output(meta);
    NodeBuilder::new(signature, NodeBodyBuilder::Push)
}
