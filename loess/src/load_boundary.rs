#![forbid(unsafe_code)]

use loess_error::{Error, Interrupt};

/// Runs `f`, substituting `fallback()` if it suspends.
///
/// This is the non-streaming sibling of the Loading boundary, used where no
/// rendering context is active: suspensions become the fallback, real
/// errors propagate.
pub fn create_load_boundary<T>(
    f: impl FnOnce() -> Result<T, Interrupt>,
    fallback: impl FnOnce() -> T,
) -> Result<T, Error> {
    match f() {
        Ok(value) => Ok(value),
        Err(Interrupt::NotReady(_)) => Ok(fallback()),
        Err(Interrupt::Error(e)) => Err(e),
    }
}

/// Whether invoking `f` suspends on asynchronous work.
pub fn is_pending<T>(f: impl FnOnce() -> Result<T, Interrupt>) -> bool {
    matches!(f(), Err(Interrupt::NotReady(_)))
}

/// Runs `f`, returning `fallback` on suspension instead of propagating it.
pub fn pending_or<T>(
    f: impl FnOnce() -> Result<T, Interrupt>,
    fallback: T,
) -> Result<T, Error> {
    create_load_boundary(f, move || fallback)
}
