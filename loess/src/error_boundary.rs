#![forbid(unsafe_code)]

//! Error boundaries.
//!
//! An error boundary catches failures from its children and renders a
//! fallback instead. Children run once per creation (and once per `reset`);
//! failures reach the boundary three ways: the children's body returns an
//! error, a descendant reports one through [`ErrorContext`], or a hydrating
//! client finds an error the server serialized at the boundary's id. On the
//! server, any caught error is additionally serialized so the client
//! restores the same fallback without re-running the children.

use crate::loading::ViewFn;
use loess_error::{Error, Interrupt};
use loess_hydration::SerializedValue;
use loess_reactive::{
    create_owner, create_trigger, detached, is_hydrating, provide_context_to,
    with_owner, Trigger,
};
use loess_ssr::TemplateValue;
use std::{cell::RefCell, rc::Rc};

/// Provided to the subtree under an error boundary so descendants can
/// report failures directly, the way rendering a failed `Result` does.
#[derive(Clone)]
pub struct ErrorContext {
    handler: Rc<dyn Fn(Error)>,
}

impl ErrorContext {
    /// Reports an error to the nearest boundary.
    pub fn report(&self, error: Error) {
        (self.handler)(error)
    }
}

/// Clears a boundary's error state and re-executes its children.
#[derive(Clone)]
pub struct Reset {
    error: Rc<RefCell<Option<Error>>>,
    trigger: Trigger,
    gather: Rc<dyn Fn()>,
}

impl Reset {
    /// Clears the caught error and re-runs the boundary's children.
    pub fn reset(&self) {
        *self.error.borrow_mut() = None;
        (self.gather)();
        self.trigger.notify();
    }
}

/// Runs `children` under an error boundary.
///
/// A suspension inside the children is not an error; it propagates to the
/// nearest Loading boundary, which re-creates this boundary when it
/// retries.
#[tracing::instrument(level = "trace", skip_all)]
pub fn error_boundary(
    children: impl Fn() -> Result<TemplateValue, Interrupt> + 'static,
    fallback: impl Fn(Error, Reset) -> TemplateValue + 'static,
) -> Result<TemplateValue, Interrupt> {
    let children: ViewFn = Rc::new(children);
    let owner = create_owner();
    let id = owner.id();
    let ctx = loess_reactive::shared_context();

    // a hydrating client restores the server's fallback without running
    // the children at all
    let initial_error = ctx
        .as_ref()
        .filter(|c| c.is_browser() && is_hydrating())
        .and_then(|c| match c.load(&id) {
            Some(SerializedValue::Error(e)) => Some(e),
            _ => None,
        });

    let error: Rc<RefCell<Option<Error>>> = Rc::new(RefCell::new(None));
    let trigger = detached(create_trigger);
    let reset = Reset {
        error: Rc::clone(&error),
        trigger,
        gather: {
            let ctx = ctx.clone();
            let id = id.clone();
            Rc::new(move || {
                if let Some(ctx) = &ctx {
                    ctx.gather(&id);
                }
            })
        },
    };

    provide_context_to(
        owner,
        ErrorContext {
            handler: {
                let error = Rc::clone(&error);
                let trigger = trigger;
                Rc::new(move |e| {
                    *error.borrow_mut() = Some(e);
                    trigger.notify();
                })
            },
        },
    );

    let serialize_error = {
        let ctx = ctx.clone();
        let id = id.clone();
        move |e: &Error| {
            if let Some(ctx) = &ctx {
                if !ctx.is_browser() && !ctx.no_hydrate() {
                    ctx.serialize(
                        &id,
                        SerializedValue::Error(e.clone()),
                        false,
                    );
                }
            }
        }
    };

    let run_children = {
        let children = Rc::clone(&children);
        move || {
            // reset child ids so re-execution after reset stays stable
            owner.dispose(true);
            with_owner(owner, || children())
        }
    };

    // children run once, now, unless the serialized error preempts them;
    // later evaluations reuse the stored view
    let stored: Rc<RefCell<Option<TemplateValue>>> =
        Rc::new(RefCell::new(None));
    match initial_error {
        Some(e) => {
            *error.borrow_mut() = Some(e);
        }
        None => match run_children() {
            Ok(view) => {
                *stored.borrow_mut() = Some(view);
            }
            Err(Interrupt::NotReady(not_ready)) => {
                return Err(Interrupt::NotReady(not_ready));
            }
            Err(Interrupt::Error(e)) => {
                serialize_error(&e);
                *error.borrow_mut() = Some(e);
            }
        },
    }

    Ok(TemplateValue::dynamic(move || {
        trigger.track();
        let caught = error.borrow().clone();
        if let Some(e) = caught {
            return Ok(fallback(e, reset.clone()));
        }
        match stored.borrow_mut().take() {
            Some(view) => Ok(view),
            // re-entry after reset: execute the real children again
            None => match run_children() {
                Ok(view) => Ok(view),
                Err(Interrupt::NotReady(not_ready)) => {
                    Err(Interrupt::NotReady(not_ready))
                }
                Err(Interrupt::Error(e)) => {
                    serialize_error(&e);
                    *error.borrow_mut() = Some(e.clone());
                    Ok(fallback(e, reset.clone()))
                }
            },
        }
    }))
}
