#![forbid(unsafe_code)]

//! Server rendering entry points.
//!
//! Three modes, all building on the same template resolution:
//!
//! - [`render_to_string`]: one-shot synchronous rendering. Boundaries defer
//!   to their fallbacks (`"$$f"`), lazy modules gate the root through
//!   `block`, and the side channel is emitted as a trailing script.
//! - [`render_to_stream`]: out-of-order streaming. The shell (with
//!   placeholder markers and fallbacks) is emitted first, then fragment
//!   chunks and serialized data interleave as they settle; boundaries
//!   registered during fragment resolution are picked up recursively.
//! - [`render_to_string_async`]: awaits every fragment and splices the
//!   resolved HTML over the fallback regions, emitting one complete
//!   document with no placeholders.

use crate::template::{resolve, SsrTemplate, TemplateValue};
use futures::{
    future::join_all, stream, FutureExt, Stream, StreamExt,
};
use loess_error::Error;
use loess_hydration::{
    HydrationContext, PinnedLocalStream, SsrSharedContext,
};
use loess_reactive::{create_root, with_owner, with_shared_context, Owner};
use std::rc::Rc;

/// Options shared by the rendering entry points.
#[derive(Clone, Debug, Default)]
pub struct RenderOptions {
    /// A CSP nonce added to every emitted `<script>` tag.
    pub nonce: Option<String>,
}

impl RenderOptions {
    fn script_open(&self) -> String {
        match &self.nonce {
            Some(nonce) => {
                format!("<script nonce=\"{}\">", crate::escape(nonce, true))
            }
            None => "<script>".to_owned(),
        }
    }
}

/// The id prefix given to every render's root owner.
const ROOT_ID: &str = "t";

fn setup(
    ctx: Rc<dyn HydrationContext>,
    view: impl FnOnce() -> TemplateValue + 'static,
) -> (Result<SsrTemplate, Error>, Owner) {
    create_root(ROOT_ID, move || {
        with_shared_context(ctx, || resolve(view()))
    })
}

/// The `<link>` tags for all registered assets, for the transport to place
/// in the document head.
pub fn asset_links(ctx: &dyn HydrationContext) -> String {
    use itertools::Itertools;
    use loess_hydration::AssetKind;
    ctx.assets()
        .into_iter()
        .map(|(kind, url)| {
            let url = crate::escape(&url, true);
            match kind {
                AssetKind::ModulePreload => {
                    format!("<link rel=\"modulepreload\" href=\"{url}\">")
                }
                AssetKind::Stylesheet => {
                    format!("<link rel=\"stylesheet\" href=\"{url}\">")
                }
            }
        })
        .join("")
}

/// Awaits deferred serializations and resolves root-level holes inline.
///
/// Holes outside any Loading boundary have no placeholder protocol, so the
/// shell waits for them; failures propagate to the caller, which is
/// responsible for aborting the response.
async fn settle_root(
    ctx: &Rc<dyn HydrationContext>,
    root: Owner,
    mut template: SsrTemplate,
) -> Result<String, Error> {
    join_all(ctx.take_blocks()).await;
    let mut pending = std::mem::take(&mut template.pending);
    while !pending.is_empty() {
        join_all(pending).await;
        template = with_owner(root, {
            let ctx = Rc::clone(ctx);
            move || with_shared_context(ctx, || template.retry())
        })?;
        pending = std::mem::take(&mut template.pending);
    }
    join_all(ctx.take_blocks()).await;
    Ok(template.into_html())
}

/// Renders the view to HTML without streaming.
///
/// Loading boundaries that suspend render their fallbacks and mark
/// themselves deferred (`"$$f"`); the client loads their data itself. The
/// returned string ends with a script installing the side-channel entries.
#[tracing::instrument(level = "trace", skip_all)]
pub async fn render_to_string(
    view: impl FnOnce() -> TemplateValue + 'static,
) -> Result<String, Error> {
    render_to_string_with_options(view, RenderOptions::default()).await
}

/// [`render_to_string`] with explicit [`RenderOptions`].
pub async fn render_to_string_with_options(
    view: impl FnOnce() -> TemplateValue + 'static,
    options: RenderOptions,
) -> Result<String, Error> {
    let ctx: Rc<dyn HydrationContext> = Rc::new(SsrSharedContext::new_sync());
    let (template, root) = setup(Rc::clone(&ctx), view);
    let result = match template {
        Ok(template) => settle_root(&ctx, root, template).await,
        Err(e) => Err(e),
    };
    let html = match result {
        Ok(html) => html,
        Err(e) => {
            root.dispose(false);
            return Err(e);
        }
    };
    let data = collect_data(&ctx).await;
    root.dispose(false);
    Ok(format!("{html}{}{data}</script>", options.script_open()))
}

/// Renders the view, awaiting every Loading boundary and splicing its
/// resolved HTML over the fallback region, so the emitted document contains
/// no placeholders.
#[tracing::instrument(level = "trace", skip_all)]
pub async fn render_to_string_async(
    view: impl FnOnce() -> TemplateValue + 'static,
) -> Result<String, Error> {
    render_to_string_async_with_options(view, RenderOptions::default()).await
}

/// [`render_to_string_async`] with explicit [`RenderOptions`].
pub async fn render_to_string_async_with_options(
    view: impl FnOnce() -> TemplateValue + 'static,
    options: RenderOptions,
) -> Result<String, Error> {
    let ctx: Rc<dyn HydrationContext> = Rc::new(SsrSharedContext::new());
    let (template, root) = setup(Rc::clone(&ctx), view);
    let result = match template {
        Ok(template) => settle_root(&ctx, root, template).await,
        Err(e) => Err(e),
    };
    let mut html = match result {
        Ok(html) => html,
        Err(e) => {
            root.dispose(false);
            return Err(e);
        }
    };

    // each pass may register nested boundaries; drain until quiet
    loop {
        let fragments = ctx.take_pending_fragments();
        if fragments.is_empty() {
            break;
        }
        for fragment in fragments {
            match fragment.html.await {
                Some(Ok(fragment_html)) => {
                    splice_fragment(&mut html, &fragment.id, &fragment_html)
                }
                Some(Err(e)) => {
                    root.dispose(false);
                    return Err(e);
                }
                None => {}
            }
        }
    }

    let data = collect_data(&ctx).await;
    root.dispose(false);
    Ok(format!("{html}{}{data}</script>", options.script_open()))
}

/// Renders the view to a stream of HTML chunks with out-of-order fragment
/// delivery.
#[tracing::instrument(level = "trace", skip_all)]
pub fn render_to_stream(
    view: impl FnOnce() -> TemplateValue + 'static,
) -> impl Stream<Item = String> {
    render_to_stream_with_options(view, RenderOptions::default())
}

/// [`render_to_stream`] with explicit [`RenderOptions`].
pub fn render_to_stream_with_options(
    view: impl FnOnce() -> TemplateValue + 'static,
    options: RenderOptions,
) -> impl Stream<Item = String> {
    let ctx: Rc<dyn HydrationContext> = Rc::new(SsrSharedContext::new());
    let (template, root) = setup(Rc::clone(&ctx), view);

    stream::once(async move {
        let shell = match template {
            Ok(template) => settle_root(&ctx, root, template).await,
            Err(e) => Err(e),
        };
        match shell {
            Ok(html) => {
                let mut data = ctx
                    .pending_data()
                    .unwrap_or_else(|| Box::pin(stream::empty()));
                let initial = data.next().await.unwrap_or_default();
                let shell = format!(
                    "{html}{}{initial}</script>",
                    options.script_open()
                );
                let fragments = ctx.take_pending_fragments();
                let tail = body_stream(
                    ctx,
                    options,
                    fragments,
                    Some(data),
                    Some(root),
                );
                Box::pin(stream::once(async move { shell }).chain(tail))
                    as PinnedLocalStream<String>
            }
            Err(e) => {
                root.dispose(false);
                tracing::error!("render failed before the shell: {e}");
                Box::pin(stream::once(async move {
                    format!("<!-- render error: {} -->", e.message())
                })) as PinnedLocalStream<String>
            }
        }
    })
    .flatten()
    .filter(|chunk| futures::future::ready(!chunk.is_empty()))
}

/// Fragment chunks and data chunks, merged as they settle, recursing for
/// boundaries that appear during fragment resolution.
fn body_stream(
    ctx: Rc<dyn HydrationContext>,
    options: RenderOptions,
    fragments: Vec<loess_hydration::PendingFragment>,
    data: Option<PinnedLocalStream<String>>,
    root: Option<Owner>,
) -> PinnedLocalStream<String> {
    let script_open = options.script_open();

    let fragment_chunks = fragments
        .into_iter()
        .map(|fragment| {
            let loess_hydration::PendingFragment { id, html } = fragment;
            let script_open = script_open.clone();
            html.map(move |outcome| match outcome {
                Some(Ok(html)) => fragment_chunk(&script_open, &id, &html),
                Some(Err(e)) => format!(
                    "{script_open}window._$HY&&_$HY.fail({:?},{});</script>",
                    id,
                    serde_json::json!(e.message())
                ),
                // cancelled before settlement; the client cleans up
                None => String::new(),
            })
        })
        .collect::<futures::stream::FuturesUnordered<_>>();

    let data = data
        .or_else(|| ctx.pending_data())
        .unwrap_or_else(|| Box::pin(stream::empty()));
    let data_chunks = data.map({
        let script_open = script_open.clone();
        move |statements| format!("{script_open}{statements}</script>")
    });

    let merged = stream::select_all([
        Box::pin(fragment_chunks) as PinnedLocalStream<String>,
        Box::pin(data_chunks) as PinnedLocalStream<String>,
    ]);

    Box::pin(merged.chain(
        stream::once(async move {
            // boundaries nested under just-resolved fragments
            let pending = ctx.take_pending_fragments();
            if pending.is_empty() {
                if let Some(root) = root {
                    root.dispose(false);
                }
                Box::pin(stream::empty()) as PinnedLocalStream<String>
            } else {
                body_stream(ctx, options, pending, None, root)
            }
        })
        .flatten(),
    ))
}

fn fragment_chunk(script_open: &str, id: &str, html: &str) -> String {
    format!(
        "<template id=\"df-{id}\">{html}</template>\
         {script_open}(function(){{\
         let p=document.getElementById(\"pl-{id}\");\
         let e=p.nextSibling;\
         while(e&&!(e.nodeType==8&&e.data==\"pl-{id}\")){{\
         let n=e.nextSibling;e.remove();e=n;}}\
         let d=document.getElementById(\"df-{id}\");\
         p.replaceWith(d.content.cloneNode(true));\
         e&&e.remove();d.remove();}})();</script>"
    )
}

/// Replaces the placeholder region for `id` (markers and fallback included)
/// with the resolved fragment HTML.
fn splice_fragment(shell: &mut String, id: &str, fragment_html: &str) {
    let open = format!("<template id=\"pl-{id}\"></template>");
    let close = format!("<!--pl-{id}-->");
    let Some((prefix, rest)) = shell.split_once(&open) else {
        tracing::warn!("no placeholder found for fragment {id}");
        return;
    };
    let Some((_fallback, suffix)) = rest.split_once(&close) else {
        tracing::warn!("unterminated placeholder for fragment {id}");
        return;
    };
    *shell = format!("{prefix}{fragment_html}{suffix}");
}

async fn collect_data(ctx: &Rc<dyn HydrationContext>) -> String {
    match ctx.pending_data() {
        Some(data) => {
            let chunks: Vec<String> = data.collect().await;
            chunks.concat()
        }
        None => String::new(),
    }
}
