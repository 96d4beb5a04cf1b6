use crate::{PinnedLocalFuture, PinnedLocalStream};
use futures::{future::Shared, FutureExt};
use loess_error::Error;
use serde_json::Value;
use std::{cell::RefCell, fmt::Debug, future::Future, rc::Rc};

/// A shared future over a serialized payload. After settlement,
/// [`Shared::peek`] exposes the value, playing the role of the wire format's
/// post-settlement `{s: 1, v}` fields.
pub type SharedValueFuture = Shared<PinnedLocalFuture<Value>>;

/// Boxes and shares a future of a serialized payload.
pub fn shared_value_future(
    fut: impl Future<Output = Value> + 'static,
) -> SharedValueFuture {
    (Box::pin(fut) as PinnedLocalFuture<Value>).shared()
}

/// A shared future that has already settled with the given value.
pub fn settled_value_future(value: Value) -> SharedValueFuture {
    let fut = shared_value_future(futures::future::ready(value));
    // prime the Shared so that peek() sees the settlement immediately
    _ = fut.clone().now_or_never();
    fut
}

/// A serialized async-iterable entry: a first-value snapshot that can be
/// replayed any number of times, plus the remaining yields, consumable once.
///
/// This is the "tapped" wrapper: whoever consumed the underlying stream's
/// first item does not steal it from later consumers.
#[derive(Clone)]
pub struct SerializedStream {
    first: SharedValueFuture,
    rest: Rc<RefCell<Option<PinnedLocalStream<Value>>>>,
}

impl SerializedStream {
    /// Taps the given stream: its first item becomes the shared snapshot and
    /// the remainder is exposed through [`take_rest`](Self::take_rest).
    ///
    /// A stream that ends without yielding snapshots `Value::Null`.
    pub fn new(stream: impl futures::Stream<Item = Value> + 'static) -> Self {
        use std::task::Poll;
        let stream: Rc<RefCell<PinnedLocalStream<Value>>> =
            Rc::new(RefCell::new(Box::pin(stream)));
        // the borrow is scoped to each poll, so polling `first` and `rest`
        // from the same task round cannot conflict
        let first = shared_value_future({
            let stream = Rc::clone(&stream);
            futures::future::poll_fn(move |cx| {
                match stream.borrow_mut().as_mut().poll_next(cx) {
                    Poll::Ready(next) => {
                        Poll::Ready(next.unwrap_or(Value::Null))
                    }
                    Poll::Pending => Poll::Pending,
                }
            })
        });
        let rest = {
            let mut first_done = first.clone();
            let stream = Rc::clone(&stream);
            // `rest` must not steal the first item while the snapshot is
            // still pending
            futures::stream::poll_fn(move |cx| {
                if first_done.poll_unpin(cx).is_pending() {
                    return Poll::Pending;
                }
                stream.borrow_mut().as_mut().poll_next(cx)
            })
        };
        Self {
            first,
            rest: Rc::new(RefCell::new(Some(Box::pin(rest)))),
        }
    }

    /// Builds a tapped stream from an already-split first value and
    /// remainder.
    pub fn from_parts(
        first: SharedValueFuture,
        rest: impl futures::Stream<Item = Value> + 'static,
    ) -> Self {
        Self {
            first,
            rest: Rc::new(RefCell::new(Some(Box::pin(rest)))),
        }
    }

    /// The replayable first-value snapshot.
    pub fn first(&self) -> SharedValueFuture {
        self.first.clone()
    }

    /// Takes the remaining yields. Returns `None` if already taken.
    pub fn take_rest(&self) -> Option<PinnedLocalStream<Value>> {
        self.rest.borrow_mut().take()
    }
}

impl Debug for SerializedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerializedStream")
            .field("first_settled", &self.first.peek().is_some())
            .field("rest_taken", &self.rest.borrow().is_none())
            .finish()
    }
}

/// A side-channel entry keyed by owner id.
#[derive(Clone, Debug)]
pub enum SerializedValue {
    /// A synchronously-known payload.
    Sync(Value),
    /// An error caught by an error boundary, so the client can restore the
    /// same fallback without re-running children.
    Error(Error),
    /// An asynchronous payload; settled once the shared future completes.
    Future(SharedValueFuture),
    /// A first-value snapshot followed by further yields (patch batches for
    /// projections).
    Stream(SerializedStream),
    /// The `"$$f"` sentinel: the boundary deferred to its fallback and the
    /// client must load data itself.
    DeferredFallback,
}

impl SerializedValue {
    /// An already-settled asynchronous payload.
    pub fn settled(value: Value) -> Self {
        SerializedValue::Future(settled_value_future(value))
    }

    /// The payload if it is synchronously available right now: a sync value,
    /// a settled future, or a settled stream snapshot.
    pub fn peek(&self) -> Option<Value> {
        match self {
            SerializedValue::Sync(v) => Some(v.clone()),
            SerializedValue::Future(fut) => fut.peek().cloned(),
            SerializedValue::Stream(stream) => stream.first().peek().cloned(),
            SerializedValue::Error(_) | SerializedValue::DeferredFallback => {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[test]
    fn settled_future_peeks() {
        let v = SerializedValue::settled(json!({"name": "Alice"}));
        assert_eq!(v.peek(), Some(json!({"name": "Alice"})));
    }

    #[test]
    fn tapped_stream_replays_first() {
        let stream =
            futures::stream::iter(vec![json!(1), json!(2), json!(3)]);
        let tapped = SerializedStream::new(stream);
        let first = tokio_test::block_on(tapped.first());
        assert_eq!(first, json!(1));
        // replay
        assert_eq!(tapped.first().peek(), Some(&json!(1)));
        let rest: Vec<_> =
            tokio_test::block_on(tapped.take_rest().unwrap().collect());
        assert_eq!(rest, vec![json!(2), json!(3)]);
        assert!(tapped.take_rest().is_none());
    }
}
