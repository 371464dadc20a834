//! REF: time-series references and the rewiring protocol.

use std::fmt;
use std::rc::{Rc, Weak};

use crate::errors::EvalError;
use crate::ts::input::{Input, InputKind};
use crate::ts::output::{Output, OutputKind};

/// An opaque handle to time-series outputs, carried as the value of a REF.
///
/// Binding a reference to an input rewires that input to the referenced
/// output(s), preserving the input's active state across the rebind.
#[derive(Clone, Default)]
pub enum TimeSeriesReference {
    /// References nothing; binding un-binds the target.
    #[default]
    Empty,
    /// References a single output.
    Bound(Weak<Output>),
    /// A composite of sub-references, for non-peer composite bindings.
    UnBound(Vec<TimeSeriesReference>),
}

impl TimeSeriesReference {
    /// A reference to a concrete output.
    pub fn from_output(output: &Rc<Output>) -> Self {
        TimeSeriesReference::Bound(Rc::downgrade(output))
    }

    /// A reference capturing whatever an input is bound to.
    pub fn from_input(input: &Rc<Input>) -> Self {
        if let Some(value) = input.local_reference_value() {
            return value;
        }
        if let Some(output) = input.peer_output() {
            return TimeSeriesReference::Bound(Rc::downgrade(&output));
        }
        let children = input.positional_children();
        if children.is_empty() {
            TimeSeriesReference::Empty
        } else {
            TimeSeriesReference::UnBound(children.iter().map(TimeSeriesReference::from_input).collect())
        }
    }

    /// A composite reference over explicit items.
    pub fn from_items<I: IntoIterator<Item = TimeSeriesReference>>(items: I) -> Self {
        TimeSeriesReference::UnBound(items.into_iter().collect())
    }

    /// The referenced output, for single-output references.
    pub fn output(&self) -> Option<Rc<Output>> {
        match self {
            TimeSeriesReference::Bound(weak) => weak.upgrade(),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, TimeSeriesReference::Empty)
    }

    pub fn has_output(&self) -> bool {
        matches!(self, TimeSeriesReference::Bound(_))
    }

    /// Whether the reference leads to any live, valid output.
    pub fn is_valid(&self) -> bool {
        match self {
            TimeSeriesReference::Empty => false,
            TimeSeriesReference::Bound(weak) => weak.upgrade().is_some_and(|o| o.valid()),
            TimeSeriesReference::UnBound(items) => items.iter().any(|i| !i.is_empty()),
        }
    }

    /// Rewires `input` to the referenced output(s).
    ///
    /// If the input was active it is unsubscribed from its previous binding
    /// and resubscribed to the new one, and its owning node is notified so it
    /// observes the new value on its next evaluation.
    pub fn bind_input(&self, input: &Rc<Input>) -> Result<(), EvalError> {
        match self {
            TimeSeriesReference::Empty => {
                input.un_bind_output();
                Ok(())
            }
            TimeSeriesReference::Bound(weak) => {
                let Some(output) = weak.upgrade() else {
                    input.un_bind_output();
                    return Ok(());
                };
                let mut reactivate = false;
                if input.bound() && !input.has_peer() {
                    reactivate = input.active();
                    input.un_bind_output();
                }
                input.bind_output(&output)?;
                if reactivate {
                    input.make_active();
                }
                Ok(())
            }
            TimeSeriesReference::UnBound(items) => {
                let mut reactivate = false;
                if input.bound() && input.has_peer() {
                    reactivate = input.active();
                    input.un_bind_output();
                }
                let children = input.positional_children();
                for (child, item) in children.iter().zip(items) {
                    if item.is_empty() {
                        if child.bound() {
                            child.un_bind_output();
                        }
                    } else {
                        item.bind_input(child)?;
                    }
                }
                if reactivate {
                    input.make_active();
                }
                Ok(())
            }
        }
    }
}

impl PartialEq for TimeSeriesReference {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TimeSeriesReference::Empty, TimeSeriesReference::Empty) => true,
            (TimeSeriesReference::Bound(a), TimeSeriesReference::Bound(b)) => a.ptr_eq(b),
            (TimeSeriesReference::UnBound(a), TimeSeriesReference::UnBound(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for TimeSeriesReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for TimeSeriesReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeSeriesReference::Empty => write!(f, "REF[<UnSet>]"),
            TimeSeriesReference::Bound(weak) => match weak.upgrade() {
                Some(output) => write!(f, "REF[{}]", output.meta()),
                None => write!(f, "REF[<dropped>]"),
            },
            TimeSeriesReference::UnBound(items) => {
                write!(f, "REF[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// The stored reference and observer set of a REF output.
#[derive(Default)]
pub struct RefOutputState {
    value: Option<TimeSeriesReference>,
    observers: Vec<Weak<Input>>,
}

impl RefOutputState {
    pub fn value(&self) -> Option<&TimeSeriesReference> {
        self.value.as_ref()
    }

    pub fn invalidate(&mut self) {
        self.value = None;
    }
}

/// The locally held reference of a REF input bound to a non-REF output.
#[derive(Default)]
pub struct RefInputState {
    pub(crate) inner: Option<Rc<Input>>,
    pub(crate) value: Option<TimeSeriesReference>,
    pub(crate) children: Vec<Rc<Input>>,
}

impl Output {
    /// Stores a reference value and rewires every observing input.
    pub fn apply_reference(self: &Rc<Self>, reference: TimeSeriesReference) -> Result<(), EvalError> {
        let OutputKind::Reference(state) = self.kind() else {
            return Err(EvalError::TypeMismatch {
                expected: self.meta().to_string(),
                actual: "reference".to_string(),
            });
        };
        let observers = {
            let mut state = state.borrow_mut();
            state.value = Some(reference.clone());
            state.observers.retain(|o| o.strong_count() > 0);
            state.observers.clone()
        };
        self.mark_modified();
        for observer in observers {
            if let Some(input) = observer.upgrade() {
                reference.bind_input(&input)?;
            }
        }
        Ok(())
    }

    /// Registers an input to be rewired whenever this reference changes.
    pub fn observe_reference(&self, input: &Rc<Input>) {
        if let OutputKind::Reference(state) = self.kind() {
            let target = Rc::downgrade(input);
            let mut state = state.borrow_mut();
            if !state.observers.iter().any(|o| o.ptr_eq(&target)) {
                state.observers.push(target);
            }
        }
    }

    pub fn stop_observing_reference(&self, input: &Rc<Input>) {
        if let OutputKind::Reference(state) = self.kind() {
            let target = Rc::downgrade(input);
            state.borrow_mut().observers.retain(|o| !o.ptr_eq(&target));
        }
    }
}

impl Input {
    /// The reference this input resolves to: its local wrapped value, or the
    /// value of the REF output it peers with.
    pub fn reference_value(&self) -> Option<TimeSeriesReference> {
        if let Some(value) = self.local_reference_value() {
            return Some(value);
        }
        self.peer_output().and_then(|o| o.reference_value())
    }

    pub(crate) fn local_reference_value(&self) -> Option<TimeSeriesReference> {
        match self.kind() {
            InputKind::Reference(state) => state.borrow().value.clone(),
            _ => None,
        }
    }
}
