//! Isomorphic applications render HTML on the server and then "hydrate" the
//! same tree in the client, reusing the values that the server already
//! resolved instead of re-running asynchronous work.
//!
//! This crate is the data half of that process. It defines the
//! [`HydrationContext`] contract through which reactive primitives emit a
//! side channel of serialized values keyed by owner id, the
//! [`SerializedValue`] model those entries take on the wire, and the two
//! standard implementations: [`SsrSharedContext`] buffers entries and
//! streaming fragments on the server, and [`HydrateSharedContext`] serves
//! them back to hydrating primitives on the client.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod csr;
mod hydrate;
mod ssr;
mod value;

pub use csr::*;
pub use hydrate::*;
use loess_error::Error;
pub use ssr::*;
use std::{fmt::Debug, future::Future, pin::Pin};
pub use value::*;

/// Type alias for a boxed [`Future`] that is `!Send`.
pub type PinnedLocalFuture<T> = Pin<Box<dyn Future<Output = T>>>;
/// Type alias for a boxed [`Stream`](futures::Stream) that is `!Send`.
pub type PinnedLocalStream<T> = Pin<Box<dyn futures::Stream<Item = T>>>;

/// The suffix appended to a boundary's owner id to key its module-asset map.
pub const ASSETS_KEY_SUFFIX: &str = "_assets";

/// Kinds of static assets that can be registered for preloading.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AssetKind {
    /// A JavaScript module, emitted as `<link rel="modulepreload">`.
    ModulePreload,
    /// A stylesheet, emitted as `<link rel="stylesheet">`.
    Stylesheet,
}

/// A streaming HTML slot registered by a Loading boundary.
///
/// The fragment settles exactly once, either with final HTML or with an
/// error; later calls have no effect. Dropping the handle without settling
/// cancels the fragment.
#[derive(Clone)]
pub struct FragmentHandle {
    slot: std::rc::Rc<
        std::cell::RefCell<
            Option<futures::channel::oneshot::Sender<Result<String, Error>>>,
        >,
    >,
}

impl FragmentHandle {
    /// Settles the fragment with its final HTML.
    pub fn done(&self, html: String) {
        if let Some(tx) = self.slot.borrow_mut().take() {
            _ = tx.send(Ok(html));
        }
    }

    /// Settles the fragment with an error.
    pub fn done_with_error(&self, err: Error) {
        if let Some(tx) = self.slot.borrow_mut().take() {
            _ = tx.send(Err(err));
        }
    }
}

impl Debug for FragmentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentHandle")
            .field("settled", &self.slot.borrow().is_none())
            .finish()
    }
}

/// A registered fragment as seen by the transport: the boundary's owner id
/// and a future for its final HTML.
///
/// The future resolves to `None` if the fragment was cancelled before it
/// settled.
pub struct PendingFragment {
    /// The boundary's owner id.
    pub id: String,
    /// Final HTML, an error, or `None` on cancellation.
    pub html: PinnedLocalFuture<Option<Result<String, Error>>>,
}

impl Debug for PendingFragment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingFragment").field("id", &self.id).finish()
    }
}

pub(crate) fn fragment_pair(
    id: &str,
    work: PinnedLocalFuture<()>,
) -> (FragmentHandle, PendingFragment) {
    let (tx, rx) = futures::channel::oneshot::channel();
    let handle = FragmentHandle {
        slot: std::rc::Rc::new(std::cell::RefCell::new(Some(tx))),
    };
    let pending = PendingFragment {
        id: id.to_owned(),
        // driving the transport's future drives the boundary's own
        // resolution work, which settles the handle
        html: Box::pin(async move {
            work.await;
            rx.await.ok()
        }),
    };
    (handle, pending)
}

/// Data shared between the server renderer and the client hydration walk.
///
/// Reactive primitives consume this contract to emit side-channel entries on
/// the server and to read them back during hydration. The template resolver
/// (`resolve`, `ssr`, `escape`) is a separate collaborator; only the data
/// surface lives here.
pub trait HydrationContext: Debug {
    /// Whether this context is running in the browser.
    fn is_browser(&self) -> bool;

    /// Whether this context streams fragments and asynchronous data
    /// (`false` for one-shot synchronous rendering).
    fn is_async(&self) -> bool;

    /// Whether serialization is currently suppressed (used by error
    /// boundaries in renders that will never hydrate).
    fn no_hydrate(&self) -> bool {
        false
    }

    /// Suppresses or re-enables serialization.
    fn set_no_hydrate(&self, _no_hydrate: bool) {}

    /// Emits a side-channel entry for the given owner id.
    ///
    /// In streaming mode this accepts pending futures and streams; a
    /// synchronous context only ever sees them with `defer_stream` handling
    /// already applied by the primitive layer.
    fn serialize(&self, _id: &str, _value: SerializedValue, _defer_stream: bool) {}

    /// Redirects subsequent [`serialize`](Self::serialize) calls into a
    /// buffer, so a render attempt that is later discarded leaks nothing.
    fn push_serialize_buffer(&self) {}

    /// Ends the innermost buffer, committing its entries to the outer
    /// binding if `commit` is true and discarding them otherwise.
    fn pop_serialize_buffer(&self, _commit: bool) {}

    /// Registers a streaming slot for a Loading boundary. `work` is the
    /// boundary's resolution future; the transport drives it while awaiting
    /// the fragment's HTML.
    fn register_fragment(
        &self,
        id: &str,
        work: PinnedLocalFuture<()>,
    ) -> FragmentHandle;

    /// Drains the fragments registered since the last call, in registration
    /// order.
    fn take_pending_fragments(&self) -> Vec<PendingFragment> {
        Vec::new()
    }

    /// Root-level gating for synchronous rendering: the renderer awaits all
    /// blocked futures before finalizing HTML. Boundaries do not call this.
    fn block(&self, _fut: PinnedLocalFuture<()>) {}

    /// Takes the futures registered via [`block`](Self::block).
    fn take_blocks(&self) -> Vec<PinnedLocalFuture<()>> {
        Vec::new()
    }

    /// Registers a static asset for head-link emission.
    fn register_asset(&self, _kind: AssetKind, _url: &str) {}

    /// Registers a lazy module, attributed to the innermost Loading boundary.
    fn register_module(&self, _module: &str, _entry: &str) {}

    /// All assets registered so far, for `<link>` emission by the transport.
    fn assets(&self) -> Vec<(AssetKind, String)> {
        Vec::new()
    }

    /// The modules attributed to the given boundary id.
    fn boundary_modules(&self, _id: &str) -> Vec<(String, String)> {
        Vec::new()
    }

    /// The innermost Loading boundary currently rendering, if any.
    fn current_boundary(&self) -> Option<String> {
        None
    }

    /// Installs the innermost boundary marker, returning the previous one so
    /// the caller can restore it.
    fn set_current_boundary(&self, _id: Option<String>) -> Option<String> {
        None
    }

    /// A stream of JavaScript statements that install all serialized entries
    /// under the client-side registry, or `None` in browser contexts.
    fn pending_data(&self) -> Option<PinnedLocalStream<String>> {
        None
    }

    /// Whether a serialized entry exists for the given owner id.
    fn has(&self, _id: &str) -> bool {
        false
    }

    /// Reads the serialized entry for the given owner id.
    fn load(&self, _id: &str) -> Option<SerializedValue> {
        None
    }

    /// Marks a serialized entry as consumed, freeing it.
    fn gather(&self, _id: &str) {}

    /// Removes an orphaned streaming fragment (boundary disposed before its
    /// data resumed).
    fn cleanup_fragment(&self, _id: &str) {}
}
