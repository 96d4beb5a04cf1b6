#![forbid(unsafe_code)]

//! Lazily-loaded components.
//!
//! A lazy component loads its implementation through an asynchronous module
//! load. On the server the module is registered as an asset (attributed to
//! the innermost Loading boundary, so the client can preload it before
//! resuming that boundary), and in synchronous rendering the load gates the
//! root through `block`. Until the module is available, rendering the
//! component suspends like any other asynchronous read.

use crate::loading::ViewFn;
use futures::FutureExt;
use loess_error::{Interrupt, NotReady};
use loess_hydration::{AssetKind, PinnedLocalFuture};
use loess_ssr::TemplateValue;

/// Wraps a module load as a component.
///
/// `module` is the module specifier, `entry` its entry URL for preloading,
/// and `loader` resolves to the component's view function. The returned
/// closure renders the loaded component, suspending until the load
/// completes.
#[tracing::instrument(level = "trace", skip(loader))]
pub fn lazy(
    module: &str,
    entry: &str,
    loader: impl FnOnce() -> PinnedLocalFuture<ViewFn>,
) -> impl Fn() -> Result<TemplateValue, Interrupt> {
    let ctx = loess_reactive::shared_context();
    if let Some(ctx) = &ctx {
        ctx.register_module(module, entry);
        if !ctx.is_browser() {
            ctx.register_asset(AssetKind::ModulePreload, entry);
        }
    }

    let loaded = loader().shared();
    let not_ready = NotReady::new(loaded.clone().map(|_| ()));
    if let Some(ctx) = &ctx {
        if !ctx.is_browser() && !ctx.is_async() {
            // one-shot rendering cannot stream the loaded component later;
            // gate the root on the module load instead
            ctx.block(Box::pin(loaded.clone().map(|_| ())));
        }
    }

    move || match loaded.peek() {
        Some(component) => component(),
        None => Err(Interrupt::NotReady(not_ready.clone())),
    }
}
