use super::{FragmentHandle, HydrationContext};

/// A no-op context for fully client-side rendered applications, which have
/// no server data to hydrate from.
#[derive(Debug, Default)]
pub struct CsrSharedContext;

impl HydrationContext for CsrSharedContext {
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
        let (handle, _) = super::fragment_pair(id, work);
        handle
    }
}
