//! Path template validation
//!
//! A template is a route string with `{name}` placeholders, e.g.
//! `/registries/{bucket}/packages`. Placeholders are bound positionally,
//! left to right, to the rule's path parameter values.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use thiserror::Error;

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Literal pattern, cannot fail to compile
    RE.get_or_init(|| Regex::new(r"\{([^{}]*)\}").expect("placeholder pattern is valid"))
}

/// Placeholder count does not match the number of bound values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("path template '{template}' has {expected} placeholder(s) but {given} value(s) were given")]
pub struct TemplateMismatch {
    pub template: String,
    pub expected: usize,
    pub given: usize,
}

pub fn count_placeholders(template: &str) -> usize {
    placeholder_regex().find_iter(template).count()
}

/// Placeholder names in left-to-right order
pub fn placeholder_names(template: &str) -> Vec<&str> {
    placeholder_regex()
        .captures_iter(template)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect()
}

/// Check that `values` binds exactly one value per placeholder.
///
/// Returns the placeholder count on success.
pub fn validate_path_template<T>(template: &str, values: &[T]) -> Result<usize, TemplateMismatch> {
    let expected = count_placeholders(template);
    if expected == values.len() {
        Ok(expected)
    } else {
        Err(TemplateMismatch {
            template: template.to_string(),
            expected,
            given: values.len(),
        })
    }
}

/// Substitute placeholders with `values`, percent-encoding each as a path segment.
pub fn render_path(template: &str, values: &[String]) -> Result<String, TemplateMismatch> {
    validate_path_template(template, values)?;

    let mut next = 0;
    let rendered = placeholder_regex().replace_all(template, |_: &Captures| {
        let value = urlencoding::encode(&values[next]).into_owned();
        next += 1;
        value
    });

    Ok(rendered.into_owned())
}
