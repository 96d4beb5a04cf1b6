#![forbid(unsafe_code)]

use std::borrow::Cow;

/// HTML-escapes a value for text or attribute context.
///
/// In text context this escapes the characters that could open a tag or
/// entity; in attribute context it escapes for a double-quoted attribute
/// value.
pub fn escape(value: &str, attr: bool) -> String {
    if attr {
        html_escape::encode_double_quoted_attribute(value).into_owned()
    } else {
        html_escape::encode_safe(value).into_owned()
    }
}

/// Escapes a value for interpolation into a double-quoted attribute.
pub fn escape_attr<T>(value: &T) -> Cow<'_, str>
where
    T: AsRef<str>,
{
    html_escape::encode_double_quoted_attribute(value)
}
