//! JSONPath-style binding expressions.
//!
//! Expressions start with `$.` and walk the run context with dot-separated
//! segments; `name[index]` indexes into arrays. Resolution is lazy and
//! total: any missing segment yields "unresolved" rather than an error.
//! Strings without the `$.` prefix are literals.

use serde_json::{Map, Value};

/// Whether a string is a binding expression.
pub fn is_expression(s: &str) -> bool {
    s.starts_with("$.")
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Key(String),
    Index(usize),
}

/// Parse `$.a.b[2].c` into segments. Rejects `$.` with no path.
fn parse_path(expr: &str) -> Option<Vec<PathSegment>> {
    let path = expr.strip_prefix("$.")?;
    if path.is_empty() {
        return None;
    }
    let mut segments = Vec::new();
    for raw in path.split('.') {
        if raw.is_empty() {
            return None;
        }
        let mut rest = raw;
        let key_end = rest.find('[').unwrap_or(rest.len());
        let (key, mut brackets) = rest.split_at(key_end);
        if key.is_empty() {
            return None;
        }
        segments.push(PathSegment::Key(key.to_string()));
        while !brackets.is_empty() {
            rest = brackets.strip_prefix('[')?;
            let close = rest.find(']')?;
            let index: usize = rest[..close].parse().ok()?;
            segments.push(PathSegment::Index(index));
            brackets = &rest[close + 1..];
        }
    }
    Some(segments)
}

/// Evaluate an expression against the context. `None` means some segment was
/// missing (or the expression is malformed).
pub fn resolve_expression(expr: &str, context: &Value) -> Option<Value> {
    let segments = parse_path(expr)?;
    let mut current = context;
    for segment in &segments {
        current = match segment {
            PathSegment::Key(key) => current.as_object()?.get(key)?,
            PathSegment::Index(index) => current.as_array()?.get(*index)?,
        };
    }
    Some(current.clone())
}

/// Resolve a value template: expression strings evaluate against the
/// context, arrays and objects resolve element-wise, everything else passes
/// through. Unresolved expressions are recorded as `"<at>: <expr>"` and the
/// entry is dropped from the output.
pub fn resolve_value(value: &Value, context: &Value, at: &str, unresolved: &mut Vec<String>) -> Option<Value> {
    match value {
        Value::String(s) if is_expression(s) => match resolve_expression(s, context) {
            Some(resolved) => Some(resolved),
            None => {
                unresolved.push(format!("{at}: {s}"));
                None
            }
        },
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                let nested_at = format!("{at}[{index}]");
                match resolve_value(item, context, &nested_at, unresolved) {
                    Some(resolved) => out.push(resolved),
                    None => out.push(Value::Null),
                }
            }
            Some(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, item) in map {
                let nested_at = if at.is_empty() {
                    key.clone()
                } else {
                    format!("{at}.{key}")
                };
                if let Some(resolved) = resolve_value(item, context, &nested_at, unresolved) {
                    out.insert(key.clone(), resolved);
                }
            }
            Some(Value::Object(out))
        }
        other => Some(other.clone()),
    }
}

/// Resolve every entry of a mapping. Returns the resolved map and the list
/// of unresolved expression descriptions; unresolved keys are absent from
/// the map.
pub fn resolve_mapping(
    mapping: &Map<String, Value>,
    context: &Value,
) -> (Map<String, Value>, Vec<String>) {
    let mut unresolved = Vec::new();
    let mut resolved = Map::new();
    for (key, value) in mapping {
        if let Some(v) = resolve_value(value, context, key, &mut unresolved) {
            resolved.insert(key.clone(), v);
        }
    }
    (resolved, unresolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> Value {
        json!({
            "input": { "symbol": "CRO", "amounts": [1, 2, 3] },
            "steps": {
                "quote": { "output": { "price": "0.08", "pairs": [{ "base": "CRO" }] } }
            },
            "wallet": "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        })
    }

    #[test]
    fn resolves_nested_paths() {
        assert_eq!(
            resolve_expression("$.input.symbol", &context()),
            Some(json!("CRO"))
        );
        assert_eq!(
            resolve_expression("$.steps.quote.output.price", &context()),
            Some(json!("0.08"))
        );
    }

    #[test]
    fn resolves_array_indexing() {
        assert_eq!(
            resolve_expression("$.input.amounts[1]", &context()),
            Some(json!(2))
        );
        assert_eq!(
            resolve_expression("$.steps.quote.output.pairs[0].base", &context()),
            Some(json!("CRO"))
        );
        assert_eq!(resolve_expression("$.input.amounts[9]", &context()), None);
    }

    #[test]
    fn missing_segments_are_undefined_not_errors() {
        assert_eq!(resolve_expression("$.steps.missing.output", &context()), None);
        assert_eq!(resolve_expression("$.input.symbol.deeper", &context()), None);
    }

    #[test]
    fn bare_root_is_rejected() {
        assert_eq!(resolve_expression("$.", &context()), None);
        assert_eq!(resolve_expression("$", &context()), None);
        assert_eq!(resolve_expression("$..a", &context()), None);
    }

    #[test]
    fn literals_pass_through() {
        let mut unresolved = Vec::new();
        let resolved =
            resolve_value(&json!("plain string"), &context(), "k", &mut unresolved).unwrap();
        assert_eq!(resolved, json!("plain string"));
        assert!(unresolved.is_empty());

        let resolved = resolve_value(&json!(42), &context(), "k", &mut unresolved).unwrap();
        assert_eq!(resolved, json!(42));
    }

    #[test]
    fn mapping_resolution_collects_unresolved() {
        let mapping = json!({
            "symbol": "$.input.symbol",
            "amount": "$.steps.step1Out.output.amount",
            "static": "usd"
        });
        let (resolved, unresolved) =
            resolve_mapping(mapping.as_object().unwrap(), &context());
        assert_eq!(resolved["symbol"], json!("CRO"));
        assert_eq!(resolved["static"], json!("usd"));
        assert!(!resolved.contains_key("amount"));
        assert_eq!(
            unresolved,
            vec!["amount: $.steps.step1Out.output.amount".to_string()]
        );
    }

    #[test]
    fn arrays_resolve_element_wise() {
        let mapping = json!({ "list": ["$.input.symbol", "literal", "$.missing.path"] });
        let (resolved, unresolved) =
            resolve_mapping(mapping.as_object().unwrap(), &context());
        assert_eq!(resolved["list"], json!(["CRO", "literal", null]));
        assert_eq!(unresolved.len(), 1);
        assert!(unresolved[0].starts_with("list[2]:"));
    }
}
