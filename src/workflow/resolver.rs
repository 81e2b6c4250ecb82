//! Placeholder resolution against an execution context
//!
//! A string that is exactly one placeholder resolves to the referenced value
//! with its type preserved. Placeholders embedded in surrounding text are
//! stringified and spliced in. Arrays and objects are walked recursively;
//! object keys are left untouched.

use serde_json::Value;

use super::context::ExecutionContext;
use super::placeholder::{PlaceholderError, PlaceholderPath, Segment, Template, TemplatePart};

/// Why a placeholder could not be resolved
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolutionFailure {
    #[error("no binding named '{0}'")]
    UnknownBinding(String),

    #[error("missing key '{0}'")]
    MissingKey(String),

    #[error("index {index} out of bounds (length {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("cannot access '{segment}' on a {kind}")]
    NotTraversable { segment: String, kind: &'static str },

    #[error(transparent)]
    Syntax(#[from] PlaceholderError),
}

/// A placeholder that could not be resolved, attributed to its step
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("step '{step_id}': cannot resolve '{expression}': {reason}")]
pub struct ResolutionError {
    pub step_id: String,
    /// Placeholder source text, e.g. `{{draft.body.title}}`
    pub expression: String,
    pub reason: ResolutionFailure,
}

/// Resolve every placeholder in `input`
pub fn resolve(
    input: &Value,
    ctx: &ExecutionContext,
    step_id: &str,
) -> Result<Value, ResolutionError> {
    match input {
        Value::String(s) => resolve_string(s, ctx, step_id),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve(item, ctx, step_id))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), resolve(value, ctx, step_id)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_string(s: &str, ctx: &ExecutionContext, step_id: &str) -> Result<Value, ResolutionError> {
    if !s.contains("{{") {
        return Ok(Value::String(s.to_string()));
    }

    let template = Template::parse(s).map_err(|e| ResolutionError {
        step_id: step_id.to_string(),
        expression: s.to_string(),
        reason: e.into(),
    })?;

    if let Some(placeholder) = template.as_single_placeholder() {
        return lookup(&placeholder.path, ctx)
            .cloned()
            .map_err(|reason| ResolutionError {
                step_id: step_id.to_string(),
                expression: placeholder.source.clone(),
                reason,
            });
    }

    let mut out = String::with_capacity(s.len());
    for part in template.parts() {
        match part {
            TemplatePart::Literal(text) => out.push_str(text),
            TemplatePart::Placeholder(p) => {
                let value = lookup(&p.path, ctx).map_err(|reason| ResolutionError {
                    step_id: step_id.to_string(),
                    expression: p.source.clone(),
                    reason,
                })?;
                out.push_str(&stringify(value));
            }
        }
    }
    Ok(Value::String(out))
}

/// Walk a placeholder path through the context
pub fn lookup<'a>(
    path: &PlaceholderPath,
    ctx: &'a ExecutionContext,
) -> Result<&'a Value, ResolutionFailure> {
    let mut current = ctx
        .get(&path.root)
        .ok_or_else(|| ResolutionFailure::UnknownBinding(path.root.clone()))?;

    for segment in &path.segments {
        current = step_into(current, segment)?;
    }
    Ok(current)
}

fn step_into<'a>(value: &'a Value, segment: &Segment) -> Result<&'a Value, ResolutionFailure> {
    match (value, segment) {
        (Value::Object(map), Segment::Key(key)) => map
            .get(key)
            .ok_or_else(|| ResolutionFailure::MissingKey(key.clone())),
        // `.N` on an object is a key lookup on "N"
        (Value::Object(map), Segment::Index(index)) => map
            .get(&index.to_string())
            .ok_or_else(|| ResolutionFailure::MissingKey(index.to_string())),
        (Value::Array(items), Segment::Index(index)) => {
            items
                .get(*index)
                .ok_or(ResolutionFailure::IndexOutOfBounds {
                    index: *index,
                    len: items.len(),
                })
        }
        (other, segment) => Err(ResolutionFailure::NotTraversable {
            segment: segment.to_string(),
            kind: kind_of(other),
        }),
    }
}

/// Text form of a value when spliced into a larger string
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(bindings: Value) -> ExecutionContext {
        match bindings {
            Value::Object(map) => map.into_iter().collect(),
            _ => panic!("bindings must be an object"),
        }
    }

    #[test]
    fn test_exact_placeholder_keeps_type() {
        let c = ctx(json!({ "step1": { "output": { "field": 5 } } }));
        assert_eq!(
            resolve(&json!("{{step1.output.field}}"), &c, "s").unwrap(),
            json!(5)
        );
        assert_eq!(
            resolve(&json!("{{ step1.output }}"), &c, "s").unwrap(),
            json!({ "field": 5 })
        );
    }

    #[test]
    fn test_embedded_placeholder_is_stringified() {
        let c = ctx(json!({ "step1": { "output": { "field": 5 } } }));
        assert_eq!(
            resolve(&json!("{{step1.output.field}}x"), &c, "s").unwrap(),
            json!("5x")
        );
    }

    #[test]
    fn test_interpolation_rendering() {
        let c = ctx(json!({
            "a": { "name": "Ana", "none": null, "ok": true, "tags": ["x", "y"], "obj": { "k": 1 } }
        }));
        let out = resolve(
            &json!("{{a.name}}|{{a.none}}|{{a.ok}}|{{a.tags}}|{{a.obj}}"),
            &c,
            "s",
        )
        .unwrap();
        assert_eq!(out, json!(r#"Ana|null|true|["x","y"]|{"k":1}"#));
    }

    #[test]
    fn test_nested_tree_and_indices() {
        let c = ctx(json!({
            "feed": { "items": [ { "title": "first" }, { "title": "second", "tags": ["a", "b"] } ] }
        }));
        let input = json!({
            "headline": "{{feed.items[1].title}}",
            "list": ["{{feed.items.0.title}}", "{{feed.items[1].tags[1]}}", 7],
            "{{key}}": "unchanged key"
        });

        let out = resolve(&input, &c, "post").unwrap();
        assert_eq!(
            out,
            json!({
                "headline": "second",
                "list": ["first", "b", 7],
                "{{key}}": "unchanged key"
            })
        );
    }

    #[test]
    fn test_missing_path_names_expression_and_step() {
        let c = ctx(json!({ "draft": { "body": {} } }));
        let err = resolve(&json!({ "t": "Title: {{ draft.body.title }}" }), &c, "publish").unwrap_err();

        assert_eq!(err.step_id, "publish");
        assert_eq!(err.expression, "{{ draft.body.title }}");
        assert_eq!(err.reason, ResolutionFailure::MissingKey("title".into()));
        assert!(err.to_string().contains("publish"));
        assert!(err.to_string().contains("draft.body.title"));
    }

    #[test]
    fn test_unknown_binding_and_bad_traversal() {
        let c = ctx(json!({ "n": 3, "list": [1] }));

        let err = resolve(&json!("{{nope}}"), &c, "s").unwrap_err();
        assert_eq!(err.reason, ResolutionFailure::UnknownBinding("nope".into()));

        let err = resolve(&json!("{{n.field}}"), &c, "s").unwrap_err();
        assert!(matches!(
            err.reason,
            ResolutionFailure::NotTraversable { kind: "number", .. }
        ));

        let err = resolve(&json!("{{list[4]}}"), &c, "s").unwrap_err();
        assert_eq!(
            err.reason,
            ResolutionFailure::IndexOutOfBounds { index: 4, len: 1 }
        );
    }

    #[test]
    fn test_plain_values_pass_through() {
        let c = ExecutionContext::new();
        let input = json!({ "n": 1.5, "b": false, "s": "no braces", "open": "{{ unterminated" });
        assert_eq!(resolve(&input, &c, "s").unwrap(), input);
    }
}
