//! The polymorphic value model: scalar values, composite results, and the
//! type metadata the builders resolve against.

pub mod meta;
pub mod value;

pub use meta::{BundleSchema, ScalarMeta, TsMeta, WindowSize};
pub use value::{DictValue, ScalarValue, SetDelta, SetElement, StructValue, TsValue};
