use super::{FragmentHandle, HydrationContext, SerializedValue};
use rustc_hash::FxHashMap;
use std::{
    cell::RefCell,
    fmt::Debug,
    rc::Rc,
};

/// The shared context used in the browser while hydrating server HTML.
///
/// The store maps owner ids to the entries the server serialized. In a real
/// browser build the map is parsed out of the `_$HY.r` registry the server's
/// script chunks populated; the context itself is constructed from the
/// already-decoded entries, which also makes the hydration layer directly
/// testable off the main thread of a browser.
pub struct HydrateSharedContext {
    store: RefCell<FxHashMap<String, SerializedValue>>,
    #[allow(clippy::type_complexity)]
    fragment_cleanup: RefCell<Option<Rc<dyn Fn(&str)>>>,
    cleaned_fragments: RefCell<Vec<String>>,
}

impl HydrateSharedContext {
    /// Creates a hydration context over the given serialized entries.
    pub fn new(
        entries: impl IntoIterator<Item = (String, SerializedValue)>,
    ) -> Self {
        Self {
            store: RefCell::new(entries.into_iter().collect()),
            fragment_cleanup: RefCell::new(None),
            cleaned_fragments: Default::default(),
        }
    }

    /// Installs the hook that removes an orphaned streaming fragment from
    /// the document.
    pub fn set_fragment_cleanup(&self, f: impl Fn(&str) + 'static) {
        *self.fragment_cleanup.borrow_mut() = Some(Rc::new(f));
    }

    /// Ids of fragments that were cleaned up without a hook installed.
    pub fn cleaned_fragments(&self) -> Vec<String> {
        self.cleaned_fragments.borrow().clone()
    }
}

impl Debug for HydrateSharedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HydrateSharedContext")
            .field("entries", &self.store.borrow().len())
            .finish()
    }
}

impl HydrationContext for HydrateSharedContext {
    fn is_browser(&self) -> bool {
        true
    }

    fn is_async(&self) -> bool {
        false
    }

    fn register_fragment(
        &self,
        id: &str,
        work: crate::PinnedLocalFuture<()>,
    ) -> FragmentHandle {
        // the client never streams fragments; hand out a detached handle
        let (handle, _) = super::fragment_pair(id, work);
        handle
    }

    fn has(&self, id: &str) -> bool {
        self.store.borrow().contains_key(id)
    }

    fn load(&self, id: &str) -> Option<SerializedValue> {
        self.store.borrow().get(id).cloned()
    }

    fn gather(&self, id: &str) {
        self.store.borrow_mut().remove(id);
    }

    fn cleanup_fragment(&self, id: &str) {
        let hook = self.fragment_cleanup.borrow().clone();
        match hook {
            Some(hook) => hook(id),
            None => self.cleaned_fragments.borrow_mut().push(id.to_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn gather_consumes_entries() {
        let ctx = HydrateSharedContext::new([(
            "t0".to_owned(),
            SerializedValue::Sync(json!(42)),
        )]);
        assert!(ctx.has("t0"));
        assert_eq!(ctx.load("t0").unwrap().peek(), Some(json!(42)));
        ctx.gather("t0");
        assert!(!ctx.has("t0"));
    }
}
