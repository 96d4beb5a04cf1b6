#![forbid(unsafe_code)]
use crate::{
    node::{NodeId, ReactiveNode, ReactiveNodeState, ReactiveNodeType},
    owner::{next_primitive_id, register_node},
    runtime::Runtime,
    signal::SignalDispose,
};

/// Creates a trigger: a unit signal with no stored value whose every
/// notification re-runs its subscribers.
///
/// Because a trigger compares as never-equal, it serves as a re-run latch:
/// the client Loading boundary fires one to drive its children back through
/// hydration when streamed data arrives.
#[track_caller]
pub fn create_trigger() -> Trigger {
    _ = next_primitive_id();
    let id = Runtime::with(|rt| {
        rt.nodes.borrow_mut().insert(ReactiveNode {
            value: None,
            state: ReactiveNodeState::Clean,
            node_type: ReactiveNodeType::Trigger,
            snapshot_scope: None,
        })
    });
    register_node(id);
    Trigger { id }
}

/// A reactive primitive that notifies without carrying a value.
///
/// See [`create_trigger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    pub(crate) id: NodeId,
}

impl Trigger {
    /// Subscribes the running computation to this trigger.
    pub fn track(&self) {
        Runtime::with(|rt| rt.track(self.id));
    }

    /// Notifies all subscribers, re-running them.
    pub fn notify(&self) {
        Runtime::with(|rt| {
            rt.mark_dirty(self.id);
            rt.run_effects();
        });
    }
}

impl SignalDispose for Trigger {
    fn dispose(self) {
        Runtime::with(|rt| rt.dispose_node(self.id));
    }
}
