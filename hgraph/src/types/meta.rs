//! Type metadata resolved once at wiring time.
//!
//! The wiring layer hands the runtime a fully resolved description of every
//! time-series type as a tagged sum; `apply_result` checks values against it
//! and the builder factory walks it to construct input/output instances.

use std::fmt;
use std::rc::Rc;

use itertools::Itertools;

use crate::time::EngineDelta;
use crate::types::value::{ScalarValue, TsValue};

/// Metadata for a scalar leaf type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalarMeta {
    Bool,
    Int,
    Float,
    Date,
    DateTime,
    Time,
    Duration,
    Str,
    Tuple(Vec<ScalarMeta>),
    Set(Box<ScalarMeta>),
    Map(Box<ScalarMeta>, Box<ScalarMeta>),
    /// A named compound scalar; matching is by name.
    Struct(String),
    /// Matches any scalar value.
    Any,
}

impl ScalarMeta {
    /// Whether `value` inhabits this scalar type.
    pub fn matches(&self, value: &ScalarValue) -> bool {
        match (self, value) {
            (ScalarMeta::Any, _) => true,
            (ScalarMeta::Bool, ScalarValue::Bool(_)) => true,
            (ScalarMeta::Int, ScalarValue::Int(_)) => true,
            (ScalarMeta::Float, ScalarValue::Float(_)) => true,
            (ScalarMeta::Date, ScalarValue::Date(_)) => true,
            (ScalarMeta::DateTime, ScalarValue::DateTime(_)) => true,
            (ScalarMeta::Time, ScalarValue::Time(_)) => true,
            (ScalarMeta::Duration, ScalarValue::Duration(_)) => true,
            (ScalarMeta::Str, ScalarValue::Str(_)) => true,
            (ScalarMeta::Tuple(metas), ScalarValue::Tuple(values)) => {
                metas.len() == values.len() && metas.iter().zip(values).all(|(m, v)| m.matches(v))
            }
            (ScalarMeta::Set(meta), ScalarValue::Set(values)) => values.iter().all(|v| meta.matches(v)),
            (ScalarMeta::Map(km, vm), ScalarValue::Map(entries)) => {
                entries.iter().all(|(k, v)| km.matches(k) && vm.matches(v))
            }
            (ScalarMeta::Struct(name), ScalarValue::Struct(s)) => *name == s.name,
            _ => false,
        }
    }
}

impl fmt::Display for ScalarMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarMeta::Bool => write!(f, "bool"),
            ScalarMeta::Int => write!(f, "int"),
            ScalarMeta::Float => write!(f, "float"),
            ScalarMeta::Date => write!(f, "date"),
            ScalarMeta::DateTime => write!(f, "datetime"),
            ScalarMeta::Time => write!(f, "time"),
            ScalarMeta::Duration => write!(f, "timedelta"),
            ScalarMeta::Str => write!(f, "str"),
            ScalarMeta::Tuple(items) => {
                write!(f, "tuple[{}]", items.iter().map(|m| m.to_string()).join(", "))
            }
            ScalarMeta::Set(m) => write!(f, "frozenset[{m}]"),
            ScalarMeta::Map(k, v) => write!(f, "frozendict[{k}, {v}]"),
            ScalarMeta::Struct(name) => write!(f, "{name}"),
            ScalarMeta::Any => write!(f, "object"),
        }
    }
}

/// The size bound of a rolling window, by tick count or by age.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSize {
    Count(usize),
    Time(EngineDelta),
}

/// The field layout of a bundle, fixed at wiring time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleSchema {
    pub name: String,
    pub fields: Vec<(String, TsMeta)>,
}

impl BundleSchema {
    pub fn new<S: Into<String>>(name: S, fields: Vec<(String, TsMeta)>) -> Rc<Self> {
        Rc::new(BundleSchema { name: name.into(), fields })
    }

    /// The positional index of a named field.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(k, _)| k == name)
    }
}

/// Metadata for a time-series type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TsMeta {
    /// TS[T]: a single scalar cell.
    Value(ScalarMeta),
    /// SIGNAL: observes ticks of any output, surfacing no value.
    Signal,
    /// TSB[Schema]: a named heterogeneous record.
    Bundle(Rc<BundleSchema>),
    /// TSL[T, N]: a fixed-length homogeneous list.
    List { element: Box<TsMeta>, size: usize },
    /// TSD[K, V]: a dynamic keyed dictionary.
    Dict { key: ScalarMeta, value: Box<TsMeta> },
    /// TSS[T]: a dynamic set with per-cycle deltas.
    Set(ScalarMeta),
    /// TSW[T, size, min_size]: a rolling window of recent ticks.
    Window { element: ScalarMeta, size: WindowSize, min_size: Option<WindowSize> },
    /// REF[X]: a reference to an output of shape X.
    Reference(Box<TsMeta>),
}

impl TsMeta {
    /// Shorthand for `TS[T]`.
    pub fn ts(scalar: ScalarMeta) -> Self {
        TsMeta::Value(scalar)
    }

    /// Shorthand for `TSD[K, V]`.
    pub fn tsd(key: ScalarMeta, value: TsMeta) -> Self {
        TsMeta::Dict { key, value: Box::new(value) }
    }

    /// Shorthand for `REF[X]`.
    pub fn reference(inner: TsMeta) -> Self {
        TsMeta::Reference(Box::new(inner))
    }

    /// The metadata a reference of this type dereferences to, unwrapping
    /// nothing for non-reference types.
    pub fn dereferenced(&self) -> &TsMeta {
        match self {
            TsMeta::Reference(inner) => inner.dereferenced(),
            other => other,
        }
    }

    /// Shallow check that a result value has the right shape for this type.
    ///
    /// Composite entries are checked on application, where the child type is
    /// known; this gate rejects results of the wrong container shape.
    pub fn admits(&self, value: &TsValue) -> bool {
        match (self, value) {
            (TsMeta::Value(meta), TsValue::Scalar(v)) => meta.matches(v),
            (TsMeta::Signal, TsValue::Scalar(ScalarValue::Bool(_))) => true,
            (TsMeta::Bundle(schema), TsValue::Bundle(entries)) => {
                entries.iter().all(|(k, _)| schema.index_of(k).is_some())
            }
            (TsMeta::List { size, .. }, TsValue::List(entries)) => entries.iter().all(|(i, _)| i < size),
            (TsMeta::Dict { .. }, TsValue::Dict(_)) => true,
            (TsMeta::Set(meta), TsValue::Set(delta)) => {
                delta.added.iter().chain(delta.removed.iter()).all(|v| meta.matches(v))
            }
            (TsMeta::Window { element, .. }, TsValue::Scalar(v)) => element.matches(v),
            _ => false,
        }
    }
}

impl fmt::Display for TsMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TsMeta::Value(m) => write!(f, "TS[{m}]"),
            TsMeta::Signal => write!(f, "SIGNAL"),
            TsMeta::Bundle(schema) => write!(f, "TSB[{}]", schema.name),
            TsMeta::List { element, size } => write!(f, "TSL[{element}, {size}]"),
            TsMeta::Dict { key, value } => write!(f, "TSD[{key}, {value}]"),
            TsMeta::Set(m) => write!(f, "TSS[{m}]"),
            TsMeta::Window { element, size, .. } => match size {
                WindowSize::Count(n) => write!(f, "TSW[{element}, {n}]"),
                WindowSize::Time(d) => write!(f, "TSW[{element}, {d}]"),
            },
            TsMeta::Reference(inner) => write!(f, "REF[{inner}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_matching() {
        assert!(ScalarMeta::Int.matches(&1.into()));
        assert!(!ScalarMeta::Int.matches(&1.0.into()));
        assert!(ScalarMeta::Any.matches(&"x".into()));
        let tup = ScalarMeta::Tuple(vec![ScalarMeta::Int, ScalarMeta::Str]);
        assert!(tup.matches(&ScalarValue::Tuple(vec![1.into(), "a".into()])));
        assert!(!tup.matches(&ScalarValue::Tuple(vec![1.into()])));
    }

    #[test]
    fn admits_shapes() {
        let meta = TsMeta::tsd(ScalarMeta::Str, TsMeta::ts(ScalarMeta::Int));
        assert!(meta.admits(&TsValue::dict([("a".into(), 1.into())])));
        assert!(!meta.admits(&1.into()));
        assert_eq!(meta.to_string(), "TSD[str, TS[int]]");
    }

    #[test]
    fn dereference_unwraps_nesting() {
        let meta = TsMeta::reference(TsMeta::reference(TsMeta::ts(ScalarMeta::Int)));
        assert_eq!(meta.dereferenced(), &TsMeta::ts(ScalarMeta::Int));
    }
}
