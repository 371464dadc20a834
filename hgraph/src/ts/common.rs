//! Reference-counted node subscriptions shared by all output kinds.

use std::rc::{Rc, Weak};

use crate::runtime::node::Node;
use crate::time::EngineTime;

/// A reference-counted subscription of nodes to an output.
///
/// An input subscribes its owning node once per active binding; the same node
/// may be subscribed through several inputs, so entries carry a count and a
/// node is notified exactly once per tick.
#[derive(Default)]
pub struct NodeSubscribers {
    entries: Vec<(Weak<Node>, usize)>,
}

impl NodeSubscribers {
    pub fn subscribe(&mut self, node: &Rc<Node>) {
        for (weak, count) in self.entries.iter_mut() {
            if weak.ptr_eq(&Rc::downgrade(node)) {
                *count += 1;
                return;
            }
        }
        self.entries.push((Rc::downgrade(node), 1));
    }

    pub fn unsubscribe(&mut self, node: &Rc<Node>) {
        let target = Rc::downgrade(node);
        if let Some(pos) = self.entries.iter().position(|(weak, _)| weak.ptr_eq(&target)) {
            self.entries[pos].1 -= 1;
            if self.entries[pos].1 == 0 {
                self.entries.remove(pos);
            }
        }
    }

    /// Snapshots the live subscribers, dropping entries whose node is gone.
    pub fn collect(&mut self) -> Vec<Rc<Node>> {
        self.entries.retain(|(weak, _)| weak.strong_count() > 0);
        self.entries.iter().filter_map(|(weak, _)| weak.upgrade()).collect()
    }
}

/// Notifies every subscribed node that it should be scheduled at `when`.
pub fn notify_all(subscribers: &mut NodeSubscribers, when: EngineTime) {
    // Collect first: scheduling may re-enter output machinery.
    let nodes = subscribers.collect();
    for node in nodes {
        node.notify_at(when);
    }
}
