#![forbid(unsafe_code)]

//! Template objects.
//!
//! Server rendering produces an [`SsrTemplate`]: the string segments of the
//! output (`t`), the dynamic holes whose evaluation suspended (`h`), and the
//! wake futures of the suspensions (`p`). A template with no holes is a
//! finished HTML string in its single segment. Resolution catches
//! [`Interrupt::NotReady`] and captures the thrown closure as a hole for
//! re-execution; any other error propagates.

use crate::escape;
use loess_error::{Error, Interrupt, WakeFuture};

/// A dynamic template position: re-executed until it no longer suspends.
pub type HoleFn = Box<dyn FnMut() -> Result<TemplateValue, Interrupt>>;

/// Any value a template can interpolate.
pub enum TemplateValue {
    /// Renders as nothing.
    Unit,
    /// Text, HTML-escaped on resolution.
    Text(String),
    /// Pre-escaped markup, passed through verbatim.
    Raw(String),
    /// A sequence of values rendered in order.
    List(Vec<TemplateValue>),
    /// An already-resolved template.
    Template(SsrTemplate),
    /// A dynamic position; may suspend.
    Dyn(HoleFn),
}

impl TemplateValue {
    /// A dynamic value from a closure; the closure may suspend with `?`.
    pub fn dynamic(
        f: impl FnMut() -> Result<TemplateValue, Interrupt> + 'static,
    ) -> Self {
        TemplateValue::Dyn(Box::new(f))
    }

    /// Escaped text from anything printable.
    pub fn text(value: impl ToString) -> Self {
        TemplateValue::Text(value.to_string())
    }
}

impl From<&str> for TemplateValue {
    fn from(value: &str) -> Self {
        TemplateValue::Text(value.to_owned())
    }
}

impl From<String> for TemplateValue {
    fn from(value: String) -> Self {
        TemplateValue::Text(value)
    }
}

impl From<SsrTemplate> for TemplateValue {
    fn from(value: SsrTemplate) -> Self {
        TemplateValue::Template(value)
    }
}

impl<T: Into<TemplateValue>> From<Vec<T>> for TemplateValue {
    fn from(value: Vec<T>) -> Self {
        TemplateValue::List(value.into_iter().map(Into::into).collect())
    }
}

/// The `{t, h, p}` template object produced by resolution.
///
/// Invariants: `segments.len() == holes.len() + 1`; `pending` holds the wake
/// futures of holes that suspended (at most one per hole); an empty `holes`
/// means `segments[0]` is the finished HTML.
pub struct SsrTemplate {
    /// Static string segments surrounding the holes.
    pub segments: Vec<String>,
    /// Unresolved dynamic positions, in document order.
    pub holes: Vec<HoleFn>,
    /// Wake futures for the currently-suspended holes.
    pub pending: Vec<WakeFuture>,
}

impl SsrTemplate {
    fn text(s: impl Into<String>) -> Self {
        Self {
            segments: vec![s.into()],
            holes: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Whether every hole has resolved.
    pub fn is_complete(&self) -> bool {
        self.holes.is_empty()
    }

    /// The finished HTML.
    ///
    /// # Panics
    /// Panics if holes remain; check [`is_complete`](Self::is_complete) or
    /// drive [`retry`](Self::retry) first.
    pub fn into_html(self) -> String {
        assert!(
            self.is_complete(),
            "template still has unresolved holes"
        );
        self.segments
            .into_iter()
            .next()
            .unwrap_or_default()
    }

    /// The HTML rendered so far; unresolved holes contribute nothing.
    /// Used for fallbacks, which are expected to be synchronous.
    pub fn into_html_lossy(self) -> String {
        self.segments.concat()
    }

    fn append(&mut self, other: SsrTemplate) {
        let mut segments = other.segments.into_iter();
        if let Some(first) = segments.next() {
            match self.segments.last_mut() {
                Some(last) => last.push_str(&first),
                None => self.segments.push(first),
            }
        }
        self.segments.extend(segments);
        self.holes.extend(other.holes);
        self.pending.extend(other.pending);
    }

    fn push_hole(&mut self, hole: HoleFn, wake: Option<WakeFuture>) {
        if self.segments.is_empty() {
            self.segments.push(String::new());
        }
        self.segments.push(String::new());
        self.holes.push(hole);
        self.pending.extend(wake);
    }

    /// Re-executes every hole once.
    ///
    /// Holes that now resolve are stringified into the segments; holes that
    /// suspend again are re-captured with their new wake futures. Any other
    /// error propagates, ending resolution.
    pub fn retry(self) -> Result<SsrTemplate, Error> {
        let mut out = SsrTemplate::text("");
        let mut segments = self.segments.into_iter();
        if let Some(first) = segments.next() {
            out.segments[0].push_str(&first);
        }
        for (hole, segment) in self.holes.into_iter().zip(segments) {
            let resolved = resolve_hole(hole)?;
            out.append(resolved);
            match out.segments.last_mut() {
                Some(last) => last.push_str(&segment),
                None => out.segments.push(segment),
            }
        }
        Ok(out)
    }
}

impl std::fmt::Debug for SsrTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsrTemplate")
            .field("segments", &self.segments)
            .field("holes", &self.holes.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

fn resolve_hole(mut hole: HoleFn) -> Result<SsrTemplate, Error> {
    match hole() {
        Ok(value) => resolve(value),
        Err(Interrupt::NotReady(not_ready)) => {
            let mut out = SsrTemplate::text("");
            out.push_hole(hole, Some(not_ready.source()));
            Ok(out)
        }
        Err(Interrupt::Error(error)) => Err(error),
    }
}

/// Resolves any template value into `{t, h, p}` form.
///
/// A dynamic value that suspends with [`Interrupt::NotReady`] is captured as
/// a hole; a dynamic value that fails ends resolution with the error.
pub fn resolve(value: TemplateValue) -> Result<SsrTemplate, Error> {
    match value {
        TemplateValue::Unit => Ok(SsrTemplate::text("")),
        TemplateValue::Text(text) => {
            Ok(SsrTemplate::text(escape(&text, false)))
        }
        TemplateValue::Raw(raw) => Ok(SsrTemplate::text(raw)),
        TemplateValue::Template(template) => Ok(template),
        TemplateValue::List(items) => {
            let mut out = SsrTemplate::text("");
            for item in items {
                out.append(resolve(item)?);
            }
            Ok(out)
        }
        TemplateValue::Dyn(hole) => resolve_hole(hole),
    }
}

/// Interpolates static strings and values into a template, recursing via
/// [`resolve`].
///
/// `strings` brackets `values` the way a template literal does: the output
/// is `strings[0] value[0] strings[1] … value[n-1] strings[n]`. Shorter
/// `strings` are padded with empty segments.
pub fn ssr_template(
    strings: &[&str],
    values: Vec<TemplateValue>,
) -> Result<SsrTemplate, Error> {
    let mut out = SsrTemplate::text("");
    let mut strings = strings.iter();
    if let Some(first) = strings.next() {
        out.segments[0].push_str(first);
    }
    for value in values {
        out.append(resolve(value)?);
        if let Some(next) = strings.next() {
            match out.segments.last_mut() {
                Some(last) => last.push_str(next),
                None => out.segments.push((*next).to_owned()),
            }
        }
    }
    for remaining in strings {
        match out.segments.last_mut() {
            Some(last) => last.push_str(remaining),
            None => out.segments.push((*remaining).to_owned()),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use loess_error::NotReady;

    #[test]
    fn sync_values_collapse_to_one_segment() {
        let tpl = ssr_template(
            &["<div>", "</div>"],
            vec![TemplateValue::text("hi & bye")],
        )
        .unwrap();
        assert!(tpl.is_complete());
        assert_eq!(tpl.into_html(), "<div>hi &amp; bye</div>");
    }

    #[test]
    fn suspended_hole_is_captured() {
        let (tx, rx) = futures::channel::oneshot::channel::<()>();
        let not_ready = NotReady::new(rx.map(|_| ()));
        let mut ready = false;
        let tpl = ssr_template(
            &["<p>", "</p>"],
            vec![TemplateValue::dynamic(move || {
                if ready {
                    Ok(TemplateValue::text("done"))
                } else {
                    ready = true;
                    Err(not_ready.clone().into())
                }
            })],
        )
        .unwrap();
        assert_eq!(tpl.segments.len(), tpl.holes.len() + 1);
        assert_eq!(tpl.pending.len(), 1);
        drop(tx);
        let tpl = tpl.retry().unwrap();
        assert_eq!(tpl.into_html(), "<p>done</p>");
    }

    #[test]
    fn failing_hole_propagates() {
        let result = resolve(TemplateValue::dynamic(|| {
            Err(loess_error::Error::msg("boom").into())
        }));
        assert_eq!(result.unwrap_err().message(), "boom");
    }
}
