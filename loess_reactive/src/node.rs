#![forbid(unsafe_code)]
use crate::owner::OwnerKey;
use std::{any::Any, cell::RefCell, rc::Rc};

slotmap::new_key_type! {
    /// Unique ID assigned to a reactive node (signal, memo, effect, trigger).
    pub struct NodeId;
}

#[derive(Clone)]
pub(crate) struct ReactiveNode {
    pub value: Option<Rc<RefCell<dyn Any>>>,
    pub state: ReactiveNodeState,
    pub node_type: ReactiveNodeType,
    /// The snapshot scope this computation reads under, if it was created
    /// inside a marked owner subtree while capture was on.
    pub snapshot_scope: Option<OwnerKey>,
}

impl ReactiveNode {
    pub fn value(&self) -> Rc<RefCell<dyn Any>> {
        self.value
            .clone()
            .expect("tried to access the value of a value-less node")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum ReactiveNodeState {
    Clean,
    /// A source may have changed; check sources before re-running.
    Check,
    Dirty,
    /// Dirty, and already visited by the current marking pass.
    DirtyMarked,
}

#[derive(Clone)]
pub(crate) enum ReactiveNodeType {
    Signal,
    Trigger,
    Memo { f: Rc<dyn AnyComputation> },
    Effect { f: Rc<dyn AnyComputation> },
}

/// A type-erased computation: memos and effects re-run through this.
///
/// Returns `true` if the stored value changed, so that subscribers are
/// marked dirty.
pub(crate) trait AnyComputation {
    fn run(&self, value: Rc<RefCell<dyn Any>>) -> bool;
}
