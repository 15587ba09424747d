//! `{{ path }}` template resolution for step inputs.
//!
//! The engine only depends on the `TemplateRenderer` trait; `PathTemplateRenderer`
//! is the built-in implementation. A template that consists of exactly one
//! expression resolves to the referenced value with its JSON type intact;
//! anything else renders to a string.

use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unresolved template reference '{0}'")]
    Unresolved(String),

    #[error("unterminated template expression in '{0}'")]
    Unterminated(String),

    #[error("empty template expression")]
    Empty,
}

// ---------------------------------------------------------------------------
// Renderer port
// ---------------------------------------------------------------------------

/// Pure function from a template string and a context object to a value.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, context: &Value) -> Result<Value, TemplateError>;
}

/// Resolve every string inside `inputs` through `renderer`, recursing into
/// arrays and objects. Non-string leaves are returned unchanged.
pub fn resolve_inputs(
    renderer: &dyn TemplateRenderer,
    inputs: &Map<String, Value>,
    context: &Value,
) -> Result<Map<String, Value>, TemplateError> {
    inputs
        .iter()
        .map(|(key, value)| Ok((key.clone(), resolve_value(renderer, value, context)?)))
        .collect()
}

fn resolve_value(
    renderer: &dyn TemplateRenderer,
    value: &Value,
    context: &Value,
) -> Result<Value, TemplateError> {
    match value {
        Value::String(s) if s.contains("{{") => renderer.render(s, context),
        Value::Array(items) => items
            .iter()
            .map(|v| resolve_value(renderer, v, context))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => resolve_inputs(renderer, map, context).map(Value::Object),
        other => Ok(other.clone()),
    }
}

// ---------------------------------------------------------------------------
// PathTemplateRenderer
// ---------------------------------------------------------------------------

/// Resolves dotted paths such as `{{ inputs.user }}` or `{{ steps.fetch.body.0 }}`
/// against the context object. Numeric segments index into arrays.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathTemplateRenderer;

impl TemplateRenderer for PathTemplateRenderer {
    fn render(&self, template: &str, context: &Value) -> Result<Value, TemplateError> {
        if let Some(path) = single_expression(template) {
            return lookup(context, path).cloned();
        }

        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| TemplateError::Unterminated(template.to_string()))?;
            let value = lookup(context, after[..end].trim())?;
            out.push_str(&value_to_string(value));
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(Value::String(out))
    }
}

/// The inner path if the whole template is exactly one `{{ ... }}`.
fn single_expression(template: &str) -> Option<&str> {
    let inner = template.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    (!inner.contains("{{") && !inner.contains("}}")).then(|| inner.trim())
}

fn lookup<'a>(context: &'a Value, path: &str) -> Result<&'a Value, TemplateError> {
    if path.is_empty() {
        return Err(TemplateError::Empty);
    }
    path.split('.')
        .try_fold(context, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
        .ok_or_else(|| TemplateError::Unresolved(path.to_string()))
}

/// Convert a JSON value to its string form for interpolation.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> Value {
        json!({
            "inputs": {"user": "ada", "count": 3},
            "variables": {"env": "prod"},
            "steps": {"fetch": {"items": [{"id": 7}], "ok": true}}
        })
    }

    #[test]
    fn test_single_expression_preserves_type() {
        let r = PathTemplateRenderer;
        assert_eq!(r.render("{{ inputs.count }}", &context()).unwrap(), json!(3));
        assert_eq!(r.render("{{steps.fetch.ok}}", &context()).unwrap(), json!(true));
        assert_eq!(
            r.render("{{ steps.fetch.items }}", &context()).unwrap(),
            json!([{"id": 7}])
        );
    }

    #[test]
    fn test_mixed_template_renders_string() {
        let r = PathTemplateRenderer;
        let out = r
            .render("hi {{ inputs.user }} x{{ inputs.count }} in {{ variables.env }}", &context())
            .unwrap();
        assert_eq!(out, json!("hi ada x3 in prod"));
    }

    #[test]
    fn test_array_index_segment() {
        let r = PathTemplateRenderer;
        assert_eq!(
            r.render("id={{ steps.fetch.items.0.id }}", &context()).unwrap(),
            json!("id=7")
        );
    }

    #[test]
    fn test_unresolved_and_unterminated() {
        let r = PathTemplateRenderer;
        assert_eq!(
            r.render("{{ inputs.missing }}", &context()),
            Err(TemplateError::Unresolved("inputs.missing".to_string()))
        );
        assert!(matches!(
            r.render("a {{ inputs.user", &context()),
            Err(TemplateError::Unterminated(_))
        ));
        assert_eq!(r.render("{{ }}", &context()), Err(TemplateError::Empty));
    }

    #[test]
    fn test_resolve_inputs_recurses() {
        let inputs = json!({
            "plain": 1,
            "nested": {"who": "{{ inputs.user }}"},
            "list": ["{{ inputs.count }}", "static"]
        });
        let resolved =
            resolve_inputs(&PathTemplateRenderer, inputs.as_object().unwrap(), &context()).unwrap();
        assert_eq!(
            Value::Object(resolved),
            json!({"plain": 1, "nested": {"who": "ada"}, "list": [3, "static"]})
        );
    }
}
