#![forbid(unsafe_code)]

use crate::{owner::Owner, runtime::Runtime};
use loess_error::ContextNotFoundError;
use std::any::{Any, TypeId};

/// Provides a context value of type `T` to the current owner and all of its
/// descendants. This can be consumed using [`use_context`].
///
/// Context works like variable scope: a value provided higher in the owner
/// tree can be used lower down, but not the other way around.
#[track_caller]
pub fn provide_context<T>(value: T)
where
    T: Clone + 'static,
{
    let id = TypeId::of::<T>();
    let provided = Runtime::with(|rt| {
        let owner = rt.owner.get();
        if let Some(owner) = owner {
            if let Some(state) = rt.owners.borrow_mut().get_mut(owner) {
                state.contexts.insert(id, Box::new(value) as Box<dyn Any>);
                return true;
            }
        }
        false
    });
    if !provided {
        tracing::warn!(
            "At {}, provide_context() was called outside the reactive \
             system.",
            std::panic::Location::caller()
        );
    }
}

/// Extracts a context value of type `T` by walking the owner tree upwards
/// from the current owner. The value should have been provided elsewhere
/// using [`provide_context`].
pub fn use_context<T>() -> Option<T>
where
    T: Clone + 'static,
{
    let ty = TypeId::of::<T>();
    Runtime::with(|rt| {
        let owners = rt.owners.borrow();
        let mut current = rt.owner.get();
        while let Some(key) = current {
            let state = owners.get(key)?;
            if let Some(value) = state.contexts.get(&ty) {
                return value.downcast_ref::<T>().cloned();
            }
            current = state.parent;
        }
        None
    })
}

/// Like [`use_context`], but returns a typed error when no provider exists.
pub fn try_use_context<T>() -> Result<T, ContextNotFoundError>
where
    T: Clone + 'static,
{
    use_context().ok_or(ContextNotFoundError {
        ty: std::any::type_name::<T>(),
    })
}

/// Extracts a context value of type `T`, panicking if no ancestor provided
/// one.
#[track_caller]
pub fn expect_context<T>() -> T
where
    T: Clone + 'static,
{
    use_context().unwrap_or_else(|| {
        panic!(
            "expected context of type {:?} to be present",
            std::any::type_name::<T>()
        )
    })
}

/// Provides a context value to the given owner rather than the current one.
pub fn provide_context_to<T>(owner: Owner, value: T)
where
    T: Clone + 'static,
{
    let id = TypeId::of::<T>();
    Runtime::with(|rt| {
        if let Some(state) = rt.owners.borrow_mut().get_mut(owner.key) {
            state.contexts.insert(id, Box::new(value) as Box<dyn Any>);
        }
    })
}
