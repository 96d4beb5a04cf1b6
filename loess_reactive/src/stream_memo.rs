#![forbid(unsafe_code)]

//! Memos over async iterables.
//!
//! A stream memo eagerly starts its stream's first `next()`. Rendering locks
//! onto the first yield: on the server, `value` never changes after V1, and
//! the serialized side channel carries a tapped stream that replays V1 and
//! then forwards subsequent yields to the client.

use crate::{
    async_memo::{
        create_handle, serialize_first, write_async_value, AsyncMemo,
        AsyncOptions, AsyncValue, PendingSource, SsrSourceMode, TypedFirst,
    },
    owner::next_primitive_id,
    serialization::Serializable,
    spawn::schedule_local,
};
use futures::{FutureExt, Stream, StreamExt};
use loess_hydration::{
    shared_value_future, PinnedLocalStream, SerializedStream, SerializedValue,
};
use std::{cell::RefCell, rc::Rc, task::Poll};

/// Creates a memo over a [`Stream`].
///
/// The first yield becomes the value rendering observes; on the server that
/// value is then locked, and the full stream (mode [`SsrSourceMode::Server`])
/// or just the first value (mode [`SsrSourceMode::Hybrid`]) is serialized
/// for the client. A hydrating client consumes the first value synchronously
/// and schedules the remaining yields to write into the same handle.
#[track_caller]
pub fn create_stream_memo<T, St>(
    fetcher: impl Fn() -> St + 'static,
) -> AsyncMemo<T>
where
    T: Clone + Serializable + 'static,
    St: Stream<Item = T> + 'static,
{
    create_stream_memo_with_options(fetcher, AsyncOptions::default())
}

/// Creates a stream memo with explicit [`AsyncOptions`].
#[track_caller]
pub fn create_stream_memo_with_options<T, St>(
    fetcher: impl Fn() -> St + 'static,
    options: AsyncOptions<T>,
) -> AsyncMemo<T>
where
    T: Clone + Serializable + 'static,
    St: Stream<Item = T> + 'static,
{
    let ctx = crate::shared_context();
    let browser = ctx.as_ref().map(|c| c.is_browser()).unwrap_or(false);
    let mode = options.ssr_source;

    if browser && crate::is_hydrating() {
        if let Some(memo) =
            crate::async_memo::try_hydrate::<T>(ctx.as_deref(), mode)
        {
            return memo;
        }
    }

    let id = next_primitive_id();

    match mode {
        SsrSourceMode::Initial => {
            drop(fetcher());
            if browser && crate::is_hydrating() {
                crate::hydration::ensure_top_snapshot_scope();
            }
            let initial = options
                .initial
                .expect("ssr_source Initial requires an initial value");
            create_handle(AsyncValue::ready(Some(initial)))
        }
        SsrSourceMode::Client => {
            drop(fetcher());
            if browser && crate::is_hydrating() {
                crate::hydration::ensure_top_snapshot_scope();
            }
            let initial = options
                .initial
                .expect("ssr_source Client requires an initial value");
            let memo = create_handle(AsyncValue::ready(Some(initial)));
            if browser {
                crate::hydration::defer_until_live(move || {
                    start_live_stream(memo, fetcher());
                });
            }
            memo
        }
        SsrSourceMode::Server | SsrSourceMode::Hybrid => {
            let (first, rest) = tap_stream(fetcher());
            if let Some(ctx) = ctx.filter(|c| !c.is_browser()) {
                let value_first =
                    shared_value_future(first.clone().map(serialize_first));
                let serialized = match mode {
                    SsrSourceMode::Server => {
                        let value_rest = rest.map(|v: T| {
                            v.to_value().unwrap_or(serde_json::Value::Null)
                        });
                        SerializedValue::Stream(SerializedStream::from_parts(
                            value_first,
                            value_rest,
                        ))
                    }
                    _ => SerializedValue::Future(value_first),
                };
                ctx.serialize(&id, serialized, options.defer_stream);
                // server rendering locks onto V1; later yields only reach
                // the client through the serialized stream
                create_handle(AsyncValue::pending(
                    options.initial,
                    PendingSource::Typed(first),
                    true,
                ))
            } else {
                let memo = create_handle(AsyncValue::pending(
                    options.initial,
                    PendingSource::Typed(first.clone()),
                    false,
                ));
                crate::async_memo::drive_to_completion(memo.id, first);
                schedule_rest(memo, rest);
                memo
            }
        }
    }
}

fn start_live_stream<T, St>(memo: AsyncMemo<T>, stream: St)
where
    T: Clone + Serializable + 'static,
    St: Stream<Item = T> + 'static,
{
    let (first, rest) = tap_stream(stream);
    crate::async_memo::begin_pending(
        memo.id,
        PendingSource::Typed(first.clone()),
    );
    crate::async_memo::drive_to_completion(memo.id, first);
    schedule_rest(memo, rest);
}

fn schedule_rest<T>(
    memo: AsyncMemo<T>,
    rest: impl Stream<Item = T> + 'static,
) where
    T: Clone + Serializable + 'static,
{
    schedule_local(async move {
        let mut rest = Box::pin(rest);
        while let Some(value) = rest.next().await {
            write_async_value(memo.id, value);
        }
    });
}

/// Splits a typed stream into a replayable first-yield future and the
/// remaining yields, without ever holding a borrow across an await.
pub(crate) fn tap_stream<T, St>(
    stream: St,
) -> (TypedFirst<T>, impl Stream<Item = T> + 'static)
where
    T: Clone + 'static,
    St: Stream<Item = T> + 'static,
{
    let stream: Rc<RefCell<PinnedLocalStream<T>>> =
        Rc::new(RefCell::new(Box::pin(stream)));
    let first: TypedFirst<T> = {
        let stream = Rc::clone(&stream);
        (Box::pin(futures::future::poll_fn(move |cx| {
            stream.borrow_mut().as_mut().poll_next(cx)
        })) as loess_hydration::PinnedLocalFuture<Option<T>>)
            .shared()
    };
    let rest = {
        let mut first_done = first.clone();
        let stream = Rc::clone(&stream);
        futures::stream::poll_fn(move |cx| {
            if first_done.poll_unpin(cx).is_pending() {
                return Poll::Pending;
            }
            stream.borrow_mut().as_mut().poll_next(cx)
        })
    };
    (first, rest)
}
