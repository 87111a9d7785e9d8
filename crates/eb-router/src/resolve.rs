//! Request resolution
//!
//! Turns a rule plus an event into a concrete backend request. Derived
//! values (`$.detail.field`) are looked up in the event envelope by dotted
//! path; numeric segments index into arrays.

use eb_common::{BackendRequest, BridgeError, DispatchRule, InboundEvent, ParamValue, Result};
use serde_json::Value;
use tracing::debug;

use crate::template::render_path;

/// Follow a dotted path from `root`. Empty segments never match.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |current, segment| match current {
        _ if segment.is_empty() => None,
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Render a JSON value as a parameter string. `null` renders as absent.
pub fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn resolve_value(value: &ParamValue, envelope: &Value) -> Option<String> {
    match value {
        ParamValue::Literal(s) => Some(s.clone()),
        ParamValue::Derived(path) => lookup_path(envelope, path).and_then(render_value),
    }
}

/// Resolve the rule's path and query against an event.
///
/// Missing query values are omitted. A missing or empty path value fails
/// with `MissingPathParameter` so no partial path is ever produced.
pub fn resolve_request(rule: &DispatchRule, event: &InboundEvent) -> Result<BackendRequest> {
    let envelope = event.envelope();

    let path_values = rule
        .path_param_values
        .iter()
        .enumerate()
        .map(|(index, value)| {
            resolve_value(value, &envelope)
                .filter(|resolved| !resolved.is_empty())
                .ok_or_else(|| BridgeError::MissingPathParameter {
                    rule: rule.name.clone(),
                    index,
                    reference: value.to_string(),
                })
        })
        .collect::<Result<Vec<String>>>()?;

    let path = render_path(&rule.path_template, &path_values).map_err(|m| {
        BridgeError::RuleDefinition {
            rule: rule.name.clone(),
            expected: m.expected,
            given: m.given,
        }
    })?;

    let mut query = Vec::with_capacity(rule.query_mapping.len());
    for (param, value) in &rule.query_mapping {
        match resolve_value(value, &envelope) {
            Some(resolved) => query.push((param.clone(), resolved)),
            None => debug!(
                rule = %rule.name,
                param = %param,
                reference = %value,
                "Query parameter not present in event, omitting"
            ),
        }
    }

    Ok(BackendRequest {
        method: rule.method,
        path,
        query,
    })
}
