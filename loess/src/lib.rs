#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! A fine-grained reactive rendering runtime with streaming server
//! rendering and client hydration.
//!
//! Loess renders a reactive component graph to HTML on the server,
//! optionally streaming fragments as asynchronous data resolves, while
//! emitting a parallel side channel of serialized values that the client
//! consumes to reconstruct equivalent reactive state without re-executing
//! the asynchronous work.
//!
//! The pieces:
//!
//! - [`loess_reactive`]: owners with deterministic string ids, signals,
//!   memos, async/stream memos, stores, projections, and snapshot scopes;
//! - [`loess_hydration`]: the serialized side channel shared between the
//!   server renderer and the hydrating client;
//! - [`loess_ssr`]: template resolution (`{t, h, p}`) and the rendering
//!   entry points (sync, out-of-order streaming, fully awaited);
//! - this crate: the Loading boundary, error boundary, lazy components,
//!   and control flow.
//!
//! ## A minimal streamed page
//!
//! ```
//! use loess::prelude::*;
//! use futures::StreamExt;
//!
//! # tokio_test::block_on(async {
//! let chunks: Vec<String> = render_to_stream(|| {
//!     let greeting = create_async_memo(|| async { "Hello World".to_owned() });
//!     loading_boundary(
//!         move || {
//!             ssr_template(
//!                 &["<div>", "</div>"],
//!                 vec![TemplateValue::dynamic(move || {
//!                     Ok(TemplateValue::text(greeting.read()?))
//!                 })],
//!             )
//!             .map(TemplateValue::from)
//!             .map_err(Into::into)
//!         },
//!         || TemplateValue::text("Loading..."),
//!     )
//!     .unwrap_or(TemplateValue::Unit)
//! })
//! .collect()
//! .await;
//! assert!(chunks[0].contains("Loading..."));
//! assert!(chunks.concat().contains("<div>Hello World</div>"));
//! # });
//! ```

mod error_boundary;
mod flow;
mod lazy;
mod load_boundary;
mod loading;

pub use error_boundary::{error_boundary, ErrorContext, Reset};
/// The error boundary under its control-flow-component name.
pub use error_boundary::error_boundary as errored;
pub use flow::{arm, each, map_array, repeat, show, switch, Arm};
pub use lazy::lazy;
pub use load_boundary::{create_load_boundary, is_pending, pending_or};
pub use loading::{loading_boundary, ViewFn};

/// The commonly-used surface of the runtime, re-exported in one place.
pub mod prelude {
    pub use crate::{
        arm, create_load_boundary, each, error_boundary, errored, is_pending,
        lazy, loading_boundary, map_array, pending_or, repeat, show, switch,
        ErrorContext, Reset, ViewFn,
    };
    pub use loess_error::{Error, Interrupt, NotReady};
    pub use loess_hydration::{
        CsrSharedContext, HydrateSharedContext, HydrationContext,
        SerializedStream, SerializedValue, SsrSharedContext,
    };
    pub use loess_reactive::*;
    pub use loess_ssr::{
        escape, render_to_stream, render_to_stream_with_options,
        render_to_string, render_to_string_async,
        render_to_string_async_with_options, render_to_string_with_options,
        resolve, ssr_template, RenderOptions, SsrTemplate, TemplateValue,
    };
}
