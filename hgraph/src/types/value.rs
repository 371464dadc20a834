//! Runtime value representations for scalar and composite time-series results.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::time::{EngineDelta, EngineTime};

/// A dynamically typed scalar, the leaf payload of every time-series cell.
///
/// The set of leaf kinds mirrors the scalar types the wiring layer can
/// resolve. Collection variants use ordered containers so that values have a
/// total order and can key dictionaries and populate sets themselves.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Days since the Unix epoch.
    Date(i32),
    DateTime(EngineTime),
    /// Microseconds since midnight.
    Time(i64),
    Duration(EngineDelta),
    Str(String),
    Tuple(Vec<ScalarValue>),
    Set(BTreeSet<ScalarValue>),
    Map(BTreeMap<ScalarValue, ScalarValue>),
    Struct(StructValue),
}

/// A named compound scalar: an ordered list of field name/value pairs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StructValue {
    pub name: String,
    pub fields: Vec<(String, ScalarValue)>,
}

impl StructValue {
    /// Looks a field up by name.
    pub fn field(&self, name: &str) -> Option<&ScalarValue> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }
}

impl ScalarValue {
    /// A short name for the value's kind, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ScalarValue::Bool(_) => "bool",
            ScalarValue::Int(_) => "int",
            ScalarValue::Float(_) => "float",
            ScalarValue::Date(_) => "date",
            ScalarValue::DateTime(_) => "datetime",
            ScalarValue::Time(_) => "time",
            ScalarValue::Duration(_) => "duration",
            ScalarValue::Str(_) => "str",
            ScalarValue::Tuple(_) => "tuple",
            ScalarValue::Set(_) => "frozenset",
            ScalarValue::Map(_) => "frozendict",
            ScalarValue::Struct(_) => "struct",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            ScalarValue::Bool(_) => 0,
            ScalarValue::Int(_) => 1,
            ScalarValue::Float(_) => 2,
            ScalarValue::Date(_) => 3,
            ScalarValue::DateTime(_) => 4,
            ScalarValue::Time(_) => 5,
            ScalarValue::Duration(_) => 6,
            ScalarValue::Str(_) => 7,
            ScalarValue::Tuple(_) => 8,
            ScalarValue::Set(_) => 9,
            ScalarValue::Map(_) => 10,
            ScalarValue::Struct(_) => 11,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScalarValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ScalarValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ScalarValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScalarValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructValue> {
        match self {
            ScalarValue::Struct(s) => Some(s),
            _ => None,
        }
    }
}

// Floats take part in the total order through `total_cmp`, which keeps
// Eq/Ord/Hash mutually consistent (NaN equals NaN, -0.0 sorts below 0.0).

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScalarValue {}

impl PartialOrd for ScalarValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScalarValue {
    fn cmp(&self, other: &Self) -> Ordering {
        use ScalarValue::*;
        match (self, other) {
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (DateTime(a), DateTime(b)) => a.cmp(b),
            (Time(a), Time(b)) => a.cmp(b),
            (Duration(a), Duration(b)) => a.cmp(b),
            (Str(a), Str(b)) => a.cmp(b),
            (Tuple(a), Tuple(b)) => a.cmp(b),
            (Set(a), Set(b)) => a.cmp(b),
            (Map(a), Map(b)) => a.cmp(b),
            (Struct(a), Struct(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            ScalarValue::Bool(b) => b.hash(state),
            ScalarValue::Int(i) => i.hash(state),
            ScalarValue::Float(f) => f.to_bits().hash(state),
            ScalarValue::Date(d) => d.hash(state),
            ScalarValue::DateTime(t) => t.hash(state),
            ScalarValue::Time(t) => t.hash(state),
            ScalarValue::Duration(d) => d.hash(state),
            ScalarValue::Str(s) => s.hash(state),
            ScalarValue::Tuple(v) => v.hash(state),
            ScalarValue::Set(v) => v.hash(state),
            ScalarValue::Map(v) => v.hash(state),
            ScalarValue::Struct(v) => v.hash(state),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Bool(b) => write!(f, "{b}"),
            ScalarValue::Int(i) => write!(f, "{i}"),
            ScalarValue::Float(x) => write!(f, "{x}"),
            ScalarValue::Date(d) => write!(f, "date({d})"),
            ScalarValue::DateTime(t) => write!(f, "{t}"),
            ScalarValue::Time(t) => write!(f, "time({t})"),
            ScalarValue::Duration(d) => write!(f, "{d}"),
            ScalarValue::Str(s) => write!(f, "{s:?}"),
            ScalarValue::Tuple(v) => {
                write!(f, "({})", v.iter().map(|x| x.to_string()).join(", "))
            }
            ScalarValue::Set(v) => write!(f, "{{{} elements}}", v.len()),
            ScalarValue::Map(v) => write!(f, "{{{} entries}}", v.len()),
            ScalarValue::Struct(s) => write!(f, "{}{{..}}", s.name),
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        ScalarValue::Bool(v)
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::Int(v)
    }
}

impl From<i32> for ScalarValue {
    fn from(v: i32) -> Self {
        ScalarValue::Int(v as i64)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::Float(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        ScalarValue::Str(v.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(v: String) -> Self {
        ScalarValue::Str(v)
    }
}

impl From<EngineTime> for ScalarValue {
    fn from(v: EngineTime) -> Self {
        ScalarValue::DateTime(v)
    }
}

impl From<EngineDelta> for ScalarValue {
    fn from(v: EngineDelta) -> Self {
        ScalarValue::Duration(v)
    }
}

/// The added/removed delta carried by a set tick.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct SetDelta {
    pub added: BTreeSet<ScalarValue>,
    pub removed: BTreeSet<ScalarValue>,
}

/// One element of a set result: either a plain addition or a `Removed` marker.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum SetElement {
    Add(ScalarValue),
    Removed(ScalarValue),
}

impl SetDelta {
    /// A delta that only adds elements.
    pub fn adds<I: IntoIterator<Item = ScalarValue>>(items: I) -> Self {
        SetDelta { added: items.into_iter().collect(), removed: BTreeSet::new() }
    }

    /// A delta that only removes elements.
    pub fn removes<I: IntoIterator<Item = ScalarValue>>(items: I) -> Self {
        SetDelta { added: BTreeSet::new(), removed: items.into_iter().collect() }
    }

    /// Builds a delta from a sequence of tagged elements.
    pub fn from_elements<I: IntoIterator<Item = SetElement>>(items: I) -> Self {
        let mut delta = SetDelta::default();
        for item in items {
            match item {
                SetElement::Add(v) => {
                    delta.added.insert(v);
                }
                SetElement::Removed(v) => {
                    delta.removed.insert(v);
                }
            }
        }
        delta
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// The value of one dictionary entry in a TSD result.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum DictValue {
    Value(TsValue),
    /// Removes the key; an error if the key is absent.
    Remove,
    /// Removes the key if present, otherwise a no-op.
    RemoveIfExists,
}

/// A composite result applied to a time-series output.
///
/// Composite variants are partial: a bundle result names only the fields it
/// ticks, a list result only the indices, a dict result only the keys.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum TsValue {
    Scalar(ScalarValue),
    Bundle(Vec<(String, TsValue)>),
    List(Vec<(usize, TsValue)>),
    Dict(Vec<(ScalarValue, DictValue)>),
    Set(SetDelta),
}

impl TsValue {
    /// Convenience constructor for a dict result of plain values.
    pub fn dict<I: IntoIterator<Item = (ScalarValue, TsValue)>>(entries: I) -> Self {
        TsValue::Dict(entries.into_iter().map(|(k, v)| (k, DictValue::Value(v))).collect())
    }

    /// Convenience constructor for a dict result that removes a key.
    pub fn dict_remove(key: ScalarValue) -> Self {
        TsValue::Dict(vec![(key, DictValue::Remove)])
    }

    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match self {
            TsValue::Scalar(v) => Some(v),
            _ => None,
        }
    }

    /// A short name for the result's shape, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            TsValue::Scalar(v) => v.kind_name(),
            TsValue::Bundle(_) => "bundle",
            TsValue::List(_) => "list",
            TsValue::Dict(_) => "dict",
            TsValue::Set(_) => "set-delta",
        }
    }
}

macro_rules! implement_tsvalue_from {
    ($($tp:ty,)*) => (
        $(
            impl From<$tp> for TsValue {
                fn from(v: $tp) -> Self { TsValue::Scalar(v.into()) }
            }
        )*
    )
}

implement_tsvalue_from!(bool, i64, i32, f64, &str, String, EngineTime, EngineDelta, ScalarValue,);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_total_order() {
        let nan = ScalarValue::Float(f64::NAN);
        assert_eq!(nan, nan.clone());
        assert!(ScalarValue::Float(1.0) < ScalarValue::Float(2.0));
        assert!(ScalarValue::Float(-0.0) < ScalarValue::Float(0.0));
    }

    #[test]
    fn set_delta_from_elements() {
        let delta = SetDelta::from_elements([
            SetElement::Add(1.into()),
            SetElement::Removed(2.into()),
            SetElement::Add(3.into()),
        ]);
        assert_eq!(delta.added.len(), 2);
        assert!(delta.removed.contains(&ScalarValue::Int(2)));
    }

    #[test]
    fn scalars_key_collections() {
        let mut map = BTreeMap::new();
        map.insert(ScalarValue::from("a"), ScalarValue::from(1));
        map.insert(ScalarValue::from("b"), ScalarValue::from(2));
        assert_eq!(map.get(&ScalarValue::from("a")), Some(&ScalarValue::Int(1)));
    }
}
