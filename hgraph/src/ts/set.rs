//! TSS state: dynamic sets with per-cycle added/removed deltas.

use std::collections::BTreeSet;
use std::rc::Rc;

use crate::errors::EvalError;
use crate::ts::input::{Input, InputKind};
use crate::ts::output::{Output, OutputKind};
use crate::types::value::{ScalarValue, SetDelta};

/// The contents and current-cycle delta of a TSS output.
#[derive(Default)]
pub struct SetOutputState {
    values: BTreeSet<ScalarValue>,
    added: BTreeSet<ScalarValue>,
    removed: BTreeSet<ScalarValue>,
    reset_pending: bool,
}

impl SetOutputState {
    pub fn values(&self) -> &BTreeSet<ScalarValue> {
        &self.values
    }

    pub fn contains(&self, item: &ScalarValue) -> bool {
        self.values.contains(item)
    }

    pub fn delta(&self) -> SetDelta {
        SetDelta { added: self.added.clone(), removed: self.removed.clone() }
    }

    pub fn added(&self) -> &BTreeSet<ScalarValue> {
        &self.added
    }

    pub fn removed(&self) -> &BTreeSet<ScalarValue> {
        &self.removed
    }

    pub(crate) fn reset(&mut self) {
        self.added.clear();
        self.removed.clear();
        self.reset_pending = false;
    }

    pub fn invalidate(&mut self) {
        self.values.clear();
        self.added.clear();
        self.removed.clear();
    }
}

impl Output {
    /// Applies a set delta: net additions and removals against the current
    /// contents, with the per-cycle delta reset after evaluation.
    pub(crate) fn apply_set_delta(self: &Rc<Self>, delta: SetDelta) -> Result<(), EvalError> {
        let OutputKind::Set(state) = self.kind() else {
            return Err(EvalError::TypeMismatch {
                expected: self.meta().to_string(),
                actual: "set-delta".to_string(),
            });
        };
        if delta.added.intersection(&delta.removed).next().is_some() {
            return Err(EvalError::ConflictingSetDelta);
        }
        let (changed, schedule_reset) = {
            let mut state = state.borrow_mut();
            let added: BTreeSet<ScalarValue> =
                delta.added.into_iter().filter(|v| !state.values.contains(v)).collect();
            let removed: BTreeSet<ScalarValue> =
                delta.removed.into_iter().filter(|v| state.values.contains(v)).collect();
            state.values.extend(added.iter().cloned());
            for item in &removed {
                state.values.remove(item);
            }
            state.added = added;
            state.removed = removed;
            let changed = !state.added.is_empty() || !state.removed.is_empty();
            let schedule_reset = changed && !state.reset_pending;
            if schedule_reset {
                state.reset_pending = true;
            }
            (changed, schedule_reset)
        };
        if changed || !self.valid() {
            self.mark_modified();
        }
        if schedule_reset {
            let weak = self.weak_self();
            self.schedule_after_evaluation(Box::new(move || {
                if let Some(output) = weak.upgrade() {
                    if let OutputKind::Set(state) = output.kind() {
                        state.borrow_mut().reset();
                    }
                }
            }));
        }
        Ok(())
    }

    /// The current contents of a TSS output.
    pub fn set_values(&self) -> Option<BTreeSet<ScalarValue>> {
        match self.kind() {
            OutputKind::Set(state) => Some(state.borrow().values().clone()),
            _ => None,
        }
    }
}

/// Input-side state for a TSS: remembers the previous output for the rest of
/// the cycle when the input is re-bound, so deltas stay coherent.
#[derive(Default)]
pub struct SetInputState {
    pub(crate) prev_output: Option<Rc<Output>>,
    pub(crate) reset_pending: bool,
}

impl Input {
    /// The elements added this cycle, merging across a same-cycle rebind.
    pub fn set_added(&self) -> BTreeSet<ScalarValue> {
        let Some(output) = self.peer_output() else {
            return BTreeSet::new();
        };
        let current = match output.kind() {
            OutputKind::Set(state) => state.borrow(),
            _ => return BTreeSet::new(),
        };
        match self.set_prev_output() {
            None => current.added().clone(),
            Some(prev) => {
                let prev_values = prev.set_values().unwrap_or_default();
                let mut added: BTreeSet<ScalarValue> =
                    current.values().difference(&prev_values).cloned().collect();
                added.extend(current.added().iter().cloned());
                added
            }
        }
    }

    /// The elements removed this cycle, merging across a same-cycle rebind.
    pub fn set_removed(&self) -> BTreeSet<ScalarValue> {
        let Some(output) = self.peer_output() else {
            return BTreeSet::new();
        };
        let current = match output.kind() {
            OutputKind::Set(state) => state.borrow(),
            _ => return BTreeSet::new(),
        };
        match self.set_prev_output() {
            None => current.removed().clone(),
            Some(prev) => {
                let prev_values = prev.set_values().unwrap_or_default();
                let mut removed: BTreeSet<ScalarValue> =
                    prev_values.difference(current.values()).cloned().collect();
                removed.extend(current.removed().iter().cloned());
                removed
            }
        }
    }

    fn set_prev_output(&self) -> Option<Rc<Output>> {
        match self.kind() {
            InputKind::Set(state) => state.borrow().prev_output.clone(),
            _ => None,
        }
    }
}
