//! Stub node builders used to wire nested graphs.
//!
//! A nested node routes its outer inputs into the inner graph through stub
//! nodes: a key stub ticks the instance key once, a pass-through stub
//! forwards whatever its bound input carries, and the output stub is a
//! pass-through whose output slot the nested node replaces with (part of)
//! the outer output.

use std::rc::Rc;

use crate::builder::{NodeBodyBuilder, NodeBuilder};
use crate::runtime::node::{EvalFn, EvalResult, NodeKind, NodeSignature};
use crate::types::meta::TsMeta;
use crate::types::value::TsValue;

fn pass_through_eval() -> EvalFn {
    Rc::new(|ctx| {
        let Some(input) = ctx.input("ts") else { return Ok(None) };
        if let Some(reference) = input.reference_value() {
            return Ok(Some(EvalResult::Reference(reference)));
        }
        if input.modified() {
            if let Some(delta) = input.delta_value() {
                return Ok(Some(EvalResult::Value(delta)));
            }
        }
        // Freshly wired: replay the bound output's current value so the
        // inner graph starts from where the outer time-series already is.
        Ok(input.value().map(EvalResult::Value))
    })
}

/// A stub that ticks the nested node's instance key once at wiring time.
/// The key arrives as the `key` scalar, injected per instance.
pub fn key_stub(meta: TsMeta) -> NodeBuilder {
    let signature = NodeSignature::new("key_stub", NodeKind::Compute).with_output(meta);
    NodeBuilder::new(
        signature,
        NodeBodyBuilder::Compute {
            eval_fn: Rc::new(|ctx| Ok(ctx.scalar("key").map(|key| TsValue::Scalar(key).into()))),
            start_fn: None,
            stop_fn: None,
        },
    )
}

/// A stub forwarding its bound input to its own output; used both for
/// routing outer inputs in and (with a replaced output slot) for routing
/// the inner result out.
pub fn pass_through_stub(name: &str, meta: TsMeta) -> NodeBuilder {
    let signature = NodeSignature::new(name, NodeKind::Compute)
        .with_ts_input("ts", meta.clone())
        .with_output(meta);
    NodeBuilder::new(
        signature,
        NodeBodyBuilder::Compute { eval_fn: pass_through_eval(), start_fn: None, stop_fn: None },
    )
}
