#![forbid(unsafe_code)]

//! Control-flow components.
//!
//! These are plain functions over [`TemplateValue`]s: conditionals, keyless
//! iteration, and the matching construct. Each returns a dynamic value so
//! that reads inside the conditions stay reactive and suspension propagates
//! to the nearest Loading boundary.

use loess_error::Interrupt;
use loess_reactive::{create_memo, Memo};
use loess_ssr::TemplateValue;

/// Renders `children` while `when` is true, `fallback` otherwise.
pub fn show(
    when: impl Fn() -> Result<bool, Interrupt> + 'static,
    children: impl Fn() -> Result<TemplateValue, Interrupt> + 'static,
    fallback: impl Fn() -> Result<TemplateValue, Interrupt> + 'static,
) -> TemplateValue {
    TemplateValue::dynamic(move || {
        if when()? {
            children()
        } else {
            fallback()
        }
    })
}

/// One arm of a [`switch`]: a condition and the view it selects.
pub struct Arm {
    condition: Box<dyn Fn() -> Result<bool, Interrupt>>,
    view: Box<dyn Fn() -> Result<TemplateValue, Interrupt>>,
}

/// Builds a [`switch`] arm.
pub fn arm(
    condition: impl Fn() -> Result<bool, Interrupt> + 'static,
    view: impl Fn() -> Result<TemplateValue, Interrupt> + 'static,
) -> Arm {
    Arm {
        condition: Box::new(condition),
        view: Box::new(view),
    }
}

/// Renders the first arm whose condition holds, `fallback` if none does.
pub fn switch(
    arms: Vec<Arm>,
    fallback: impl Fn() -> Result<TemplateValue, Interrupt> + 'static,
) -> TemplateValue {
    TemplateValue::dynamic(move || {
        for arm in &arms {
            if (arm.condition)()? {
                return (arm.view)();
            }
        }
        fallback()
    })
}

/// Renders a view per item of a reactive list, in order.
pub fn each<T: Clone + 'static>(
    items: impl Fn() -> Result<Vec<T>, Interrupt> + 'static,
    view: impl Fn(T) -> Result<TemplateValue, Interrupt> + 'static,
) -> TemplateValue {
    TemplateValue::dynamic(move || {
        let rendered = items()?
            .into_iter()
            .map(&view)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TemplateValue::List(rendered))
    })
}

/// Renders a view for each index in `0..count()`.
pub fn repeat(
    count: impl Fn() -> Result<usize, Interrupt> + 'static,
    view: impl Fn(usize) -> Result<TemplateValue, Interrupt> + 'static,
) -> TemplateValue {
    TemplateValue::dynamic(move || {
        let rendered = (0..count()?)
            .map(&view)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TemplateValue::List(rendered))
    })
}

/// Maps a reactive list through `map`, memoized so downstream consumers
/// only re-run when the mapped output changes.
pub fn map_array<T, U>(
    items: impl Fn() -> Result<Vec<T>, Interrupt> + 'static,
    map: impl Fn(&T) -> U + 'static,
) -> Memo<Vec<U>>
where
    T: 'static,
    U: Clone + PartialEq + 'static,
{
    create_memo(move |_| Ok(items()?.iter().map(&map).collect()))
}
