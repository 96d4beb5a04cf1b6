#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! A utility library for wrapping arbitrary errors, and for signaling that a
//! computation has suspended on asynchronous work and should be retried once
//! that work settles.

use futures::{future::Shared, FutureExt};
use std::{
    error,
    fmt::{self, Display},
    future::Future,
    ops,
    pin::Pin,
    rc::Rc,
};

/// This is a result type into which any error can be converted.
///
/// Results are stored as [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Type alias for a boxed [`Future`] that is `!Send`.
pub type PinnedLocalFuture<T> = Pin<Box<dyn Future<Output = T>>>;

/// A future that settles when some asynchronous dependency has settled.
///
/// Clones share a single underlying future; awaiting any clone drives it.
pub type WakeFuture = Shared<PinnedLocalFuture<()>>;

/// A generic wrapper for any error.
///
/// The rendering runtime is single-threaded and cooperative, so errors are
/// reference-counted with [`Rc`] rather than `Arc`.
#[derive(Debug, Clone)]
#[repr(transparent)]
pub struct Error(Rc<dyn error::Error>);

impl Error {
    /// Wraps an error message without an underlying error type.
    pub fn msg(msg: impl Display) -> Self {
        Error(Rc::new(MessageError(msg.to_string())))
    }

    /// The error's message.
    pub fn message(&self) -> String {
        self.0.to_string()
    }

    /// Converts the wrapper into the inner reference-counted error.
    pub fn into_inner(self) -> Rc<dyn error::Error> {
        Rc::clone(&self.0)
    }
}

impl ops::Deref for Error {
    type Target = Rc<dyn error::Error>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<T> From<T> for Error
where
    T: error::Error + 'static,
{
    fn from(value: T) -> Self {
        Error(Rc::new(value))
    }
}

#[derive(Debug)]
struct MessageError(String);

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl error::Error for MessageError {}

/// Signals that a computation read an asynchronous value that has not yet
/// settled.
///
/// This is recoverable: the carried [`WakeFuture`] resolves when the
/// dependency settles, at which point the computation can be re-run. Loading
/// boundaries collect these from holes; memos re-pull once the wake future
/// has completed.
#[derive(Clone)]
pub struct NotReady {
    source: WakeFuture,
}

impl NotReady {
    /// Marks a computation as waiting on the given future.
    pub fn new(source: impl Future<Output = ()> + 'static) -> Self {
        Self {
            source: (Box::pin(source) as PinnedLocalFuture<()>).shared(),
        }
    }

    /// A wake future that settles when the awaited dependency settles.
    pub fn source(&self) -> WakeFuture {
        self.source.clone()
    }

    /// Whether the awaited dependency has already settled.
    pub fn is_settled(&self) -> bool {
        self.source.peek().is_some()
    }
}

impl fmt::Debug for NotReady {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotReady")
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl Display for NotReady {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("value is not yet ready")
    }
}

impl error::Error for NotReady {}

/// The reason a suspendable computation could not produce a value: either it
/// is waiting on asynchronous work, or it failed.
///
/// [`Interrupt::NotReady`] is recoverable and is consumed by Loading
/// boundaries and by the retry chain inside memos; [`Interrupt::Error`]
/// propagates until an error boundary catches it.
#[derive(Debug, Clone)]
pub enum Interrupt {
    /// The computation is waiting on an asynchronous dependency.
    NotReady(NotReady),
    /// The computation failed.
    Error(Error),
}

impl Interrupt {
    /// Returns the wake future if this is a suspension.
    pub fn wake(&self) -> Option<WakeFuture> {
        match self {
            Interrupt::NotReady(not_ready) => Some(not_ready.source()),
            Interrupt::Error(_) => None,
        }
    }

    /// Whether this is a recoverable suspension rather than a failure.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Interrupt::NotReady(_))
    }
}

impl From<NotReady> for Interrupt {
    fn from(value: NotReady) -> Self {
        Interrupt::NotReady(value)
    }
}

impl From<Error> for Interrupt {
    fn from(value: Error) -> Self {
        Interrupt::Error(value)
    }
}

impl Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupt::NotReady(n) => Display::fmt(n, f),
            Interrupt::Error(e) => Display::fmt(e, f),
        }
    }
}

impl error::Error for Interrupt {}

/// Some reactive API that requires an owner was called with no owner active.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("this API requires an active reactive owner")]
pub struct NoOwnerError;

/// A context value with no default was requested outside its provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no context of type {ty} was provided by any ancestor")]
pub struct ContextNotFoundError {
    /// The type name of the requested context.
    pub ty: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[test]
    fn not_ready_reports_settlement() {
        let (tx, rx) = futures::channel::oneshot::channel::<()>();
        let not_ready = NotReady::new(rx.map(|_| ()));
        assert!(!not_ready.is_settled());
        tx.send(()).unwrap();
        // a Shared future only records completion once polled
        assert!(not_ready.source().now_or_never().is_some());
        assert!(not_ready.is_settled());
    }

    #[test]
    fn interrupt_classifies() {
        let suspended = Interrupt::from(NotReady::new(async {}));
        assert!(suspended.is_not_ready());
        assert!(suspended.wake().is_some());

        let failed = Interrupt::from(Error::msg("boom"));
        assert!(!failed.is_not_ready());
        assert!(failed.wake().is_none());
        assert_eq!(failed.to_string(), "boom");
    }
}
