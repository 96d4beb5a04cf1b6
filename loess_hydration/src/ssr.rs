use super::{
    fragment_pair, AssetKind, FragmentHandle, HydrationContext,
    PendingFragment, PinnedLocalFuture, PinnedLocalStream, SerializedValue,
};
use futures::{
    stream::{self, FuturesUnordered},
    FutureExt, StreamExt,
};
use rustc_hash::FxHashMap;
use std::{
    cell::{Cell, RefCell},
    fmt::{Debug, Write},
};

/// The shared context used while rendering HTML on the server.
///
/// Serialized entries accumulate here as primitives run. The transport drains
/// them through [`pending_data`](HydrationContext::pending_data), which
/// yields JavaScript statements installing each entry under the well-known
/// `_$HY.r` registry:
///
/// - synchronous values: `_$HY.r["id"]=<json>;`
/// - settled futures: `_$HY.r["id"]={"s":1,"v":<json>};`
/// - stream snapshots: `_$HY.r["id"]=<json>;`, with later yields delivered
///   as `_$HY.s("id",<json>);`
/// - caught boundary errors: `_$HY.r["id"]={"e":<json message>};`
/// - the deferred-fallback sentinel: `_$HY.r["id"]="$$f";`
pub struct SsrSharedContext {
    async_mode: bool,
    no_hydrate: Cell<bool>,
    entries: RefCell<Vec<(String, SerializedValue)>>,
    buffers: RefCell<Vec<Vec<(String, SerializedValue)>>>,
    deferred: RefCell<Vec<PinnedLocalFuture<()>>>,
    fragments: RefCell<Vec<PendingFragment>>,
    blocks: RefCell<Vec<PinnedLocalFuture<()>>>,
    assets: RefCell<Vec<(AssetKind, String)>>,
    modules: RefCell<FxHashMap<String, Vec<(String, String)>>>,
    current_boundary: RefCell<Option<String>>,
}

impl SsrSharedContext {
    /// Creates a context for streaming (out-of-order or in-order) rendering.
    pub fn new() -> Self {
        Self {
            async_mode: true,
            ..Self::empty()
        }
    }

    /// Creates a context for one-shot synchronous rendering: fragments are
    /// never streamed and boundaries fall back to the `"$$f"` protocol.
    pub fn new_sync() -> Self {
        Self::empty()
    }

    fn empty() -> Self {
        Self {
            async_mode: false,
            no_hydrate: Cell::new(false),
            entries: Default::default(),
            buffers: Default::default(),
            deferred: Default::default(),
            fragments: Default::default(),
            blocks: Default::default(),
            assets: Default::default(),
            modules: Default::default(),
            current_boundary: Default::default(),
        }
    }

    /// Futures that must settle before the shell is emitted
    /// (`defer_stream` serializations).
    pub fn take_deferred(&self) -> Vec<PinnedLocalFuture<()>> {
        std::mem::take(&mut self.deferred.borrow_mut())
    }

    /// Drains the serialized entries in structured form, for transports
    /// that hand data to the client in-process rather than as script
    /// chunks. Mutually exclusive with
    /// [`pending_data`](HydrationContext::pending_data), which drains the
    /// same entries.
    pub fn take_serialized_entries(&self) -> Vec<(String, SerializedValue)> {
        std::mem::take(&mut self.entries.borrow_mut())
    }

    fn push_entry(&self, id: &str, value: SerializedValue) {
        let mut buffers = self.buffers.borrow_mut();
        match buffers.last_mut() {
            Some(buf) => buf.push((id.to_owned(), value)),
            None => self.entries.borrow_mut().push((id.to_owned(), value)),
        }
    }
}

impl Default for SsrSharedContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for SsrSharedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsrSharedContext")
            .field("async_mode", &self.async_mode)
            .field("entries", &self.entries.borrow().len())
            .field("buffered", &self.buffers.borrow().len())
            .field("fragments", &self.fragments.borrow().len())
            .finish()
    }
}

// escapes < to prevent a payload being interpreted as another opening HTML tag
fn escape_json(json: &str) -> String {
    json.replace('<', "\\u003c")
}

fn write_record(buf: &mut String, id: &str, json: &str) {
    _ = write!(buf, "_$HY.r[{:?}]={};", id, escape_json(json));
}

impl HydrationContext for SsrSharedContext {
    fn is_browser(&self) -> bool {
        false
    }

    fn is_async(&self) -> bool {
        self.async_mode
    }

    fn no_hydrate(&self) -> bool {
        self.no_hydrate.get()
    }

    fn set_no_hydrate(&self, no_hydrate: bool) {
        self.no_hydrate.set(no_hydrate)
    }

    fn serialize(&self, id: &str, value: SerializedValue, defer_stream: bool) {
        if self.no_hydrate.get() {
            return;
        }
        if !self.async_mode
            && matches!(
                value,
                SerializedValue::Future(_) | SerializedValue::Stream(_)
            )
        {
            // one-shot rendering has nowhere to stream settlements to; the
            // boundary protocol falls back to "$$f" instead
            tracing::warn!(
                "rejecting async serialization for {id} in sync rendering"
            );
            return;
        }
        if defer_stream {
            match &value {
                SerializedValue::Future(fut) => {
                    let fut = fut.clone();
                    self.deferred
                        .borrow_mut()
                        .push(Box::pin(fut.map(|_| ())));
                }
                SerializedValue::Stream(stream) => {
                    let first = stream.first();
                    self.deferred
                        .borrow_mut()
                        .push(Box::pin(first.map(|_| ())));
                }
                _ => {}
            }
        }
        self.push_entry(id, value);
    }

    fn push_serialize_buffer(&self) {
        self.buffers.borrow_mut().push(Vec::new());
    }

    fn pop_serialize_buffer(&self, commit: bool) {
        let Some(buf) = self.buffers.borrow_mut().pop() else {
            return;
        };
        if commit {
            let mut buffers = self.buffers.borrow_mut();
            match buffers.last_mut() {
                Some(outer) => outer.extend(buf),
                None => self.entries.borrow_mut().extend(buf),
            }
        }
    }

    fn register_fragment(
        &self,
        id: &str,
        work: PinnedLocalFuture<()>,
    ) -> FragmentHandle {
        let (handle, pending) = fragment_pair(id, work);
        self.fragments.borrow_mut().push(pending);
        handle
    }

    fn take_pending_fragments(&self) -> Vec<PendingFragment> {
        std::mem::take(&mut self.fragments.borrow_mut())
    }

    fn block(&self, fut: PinnedLocalFuture<()>) {
        self.blocks.borrow_mut().push(fut);
    }

    fn take_blocks(&self) -> Vec<PinnedLocalFuture<()>> {
        std::mem::take(&mut self.blocks.borrow_mut())
    }

    fn register_asset(&self, kind: AssetKind, url: &str) {
        let mut assets = self.assets.borrow_mut();
        if !assets.iter().any(|(k, u)| *k == kind && u == url) {
            assets.push((kind, url.to_owned()));
        }
    }

    fn register_module(&self, module: &str, entry: &str) {
        let boundary = self
            .current_boundary
            .borrow()
            .clone()
            .unwrap_or_default();
        let mut modules = self.modules.borrow_mut();
        let slot = modules.entry(boundary).or_default();
        if !slot.iter().any(|(m, _)| m == module) {
            slot.push((module.to_owned(), entry.to_owned()));
        }
    }

    fn assets(&self) -> Vec<(AssetKind, String)> {
        self.assets.borrow().clone()
    }

    fn boundary_modules(&self, id: &str) -> Vec<(String, String)> {
        self.modules.borrow().get(id).cloned().unwrap_or_default()
    }

    fn current_boundary(&self) -> Option<String> {
        self.current_boundary.borrow().clone()
    }

    fn set_current_boundary(&self, id: Option<String>) -> Option<String> {
        std::mem::replace(&mut *self.current_boundary.borrow_mut(), id)
    }

    fn pending_data(&self) -> Option<PinnedLocalStream<String>> {
        let entries = std::mem::take(&mut *self.entries.borrow_mut());

        // 1) synchronously-known entries in one setup chunk
        let mut initial_chunk = String::from("window._$HY=window._$HY||{r:{}};");
        let async_entries = FuturesUnordered::new();
        let mut stream_entries: Vec<PinnedLocalStream<String>> = Vec::new();

        for (id, value) in entries {
            match value {
                SerializedValue::Sync(v) => {
                    write_record(&mut initial_chunk, &id, &v.to_string());
                }
                SerializedValue::Error(e) => {
                    let payload = serde_json::json!({ "e": e.message() });
                    write_record(&mut initial_chunk, &id, &payload.to_string());
                }
                SerializedValue::DeferredFallback => {
                    write_record(&mut initial_chunk, &id, "\"$$f\"");
                }
                SerializedValue::Future(fut) => {
                    async_entries.push(Box::pin(fut.map(move |v| {
                        let mut out = String::new();
                        let payload =
                            serde_json::json!({ "s": 1, "v": v });
                        write_record(&mut out, &id, &payload.to_string());
                        out
                    }))
                        as PinnedLocalFuture<String>);
                }
                SerializedValue::Stream(tapped) => {
                    let first = tapped.first();
                    async_entries.push(Box::pin(first.map({
                        let id = id.clone();
                        move |v| {
                            let mut out = String::new();
                            write_record(&mut out, &id, &v.to_string());
                            out
                        }
                    }))
                        as PinnedLocalFuture<String>);
                    if let Some(rest) = tapped.take_rest() {
                        stream_entries.push(Box::pin(rest.map(move |v| {
                            format!(
                                "_$HY.s({:?},{});",
                                id,
                                escape_json(&v.to_string())
                            )
                        })));
                    }
                }
            }
        }

        // 2) asynchronous entries as they settle
        let mut tails: Vec<PinnedLocalStream<String>> =
            vec![Box::pin(async_entries)];
        tails.extend(stream_entries);

        Some(Box::pin(
            stream::once(async move { initial_chunk })
                .chain(stream::select_all(tails)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn buffered_serializations_commit_or_discard() {
        let ctx = SsrSharedContext::new();
        ctx.serialize("t0", SerializedValue::Sync(json!(1)), false);

        ctx.push_serialize_buffer();
        ctx.serialize("t00", SerializedValue::Sync(json!("discarded")), false);
        ctx.pop_serialize_buffer(false);

        ctx.push_serialize_buffer();
        ctx.serialize("t00", SerializedValue::Sync(json!("kept")), false);
        ctx.pop_serialize_buffer(true);

        let chunks: Vec<_> =
            tokio_test::block_on(ctx.pending_data().unwrap().collect());
        let all = chunks.concat();
        assert!(all.contains(r#"_$HY.r["t0"]=1;"#));
        assert!(all.contains(r#"_$HY.r["t00"]="kept";"#));
        assert!(!all.contains("discarded"));
    }

    #[test]
    fn fragment_settles_once() {
        let ctx = SsrSharedContext::new();
        let handle = ctx.register_fragment("t1", Box::pin(async {}));
        handle.done("<div>ok</div>".into());
        handle.done_with_error(loess_error::Error::msg("too late"));
        let mut fragments = ctx.take_pending_fragments();
        let fragment = fragments.remove(0);
        assert_eq!(fragment.id, "t1");
        let html = tokio_test::block_on(fragment.html);
        assert_eq!(html.unwrap().unwrap(), "<div>ok</div>");
    }

    #[test]
    fn payloads_escape_script_closers() {
        let ctx = SsrSharedContext::new();
        ctx.serialize(
            "t0",
            SerializedValue::Sync(json!("</script><script>")),
            false,
        );
        let chunks: Vec<_> =
            tokio_test::block_on(ctx.pending_data().unwrap().collect());
        assert!(!chunks.concat().contains("</script>"));
    }
}
