#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! Server-side template resolution and HTML streaming for the Loess
//! rendering runtime.
//!
//! Views are plain functions producing [`TemplateValue`]s; [`resolve`] and
//! [`ssr_template`] turn them into `{t, h, p}` template objects whose holes
//! capture suspended computations for later retry. The rendering entry
//! points in this crate drive those templates to completion: synchronously,
//! as an out-of-order chunk stream, or fully awaited with fragment
//! splicing.

mod escape;
mod stream;
mod template;

pub use escape::{escape, escape_attr};
pub use stream::{
    asset_links, render_to_stream, render_to_stream_with_options,
    render_to_string, render_to_string_async,
    render_to_string_async_with_options, render_to_string_with_options,
    RenderOptions,
};
pub use template::{resolve, ssr_template, HoleFn, SsrTemplate, TemplateValue};

/// Formats the opening placeholder marker for a streamed fragment slot.
pub fn placeholder_open(id: &str) -> String {
    format!("<template id=\"pl-{id}\"></template>")
}

/// Formats the closing placeholder marker for a streamed fragment slot.
pub fn placeholder_close(id: &str) -> String {
    format!("<!--pl-{id}-->")
}
