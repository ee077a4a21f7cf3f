//! Attribute maps and value helpers

use serde_json::{Map, Value};

/// Field name to value mapping of a record
pub type Attributes = Map<String, Value>;

/// Drop null entries from objects, recursively. Arrays are kept as given.
pub fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(strip_nulls_map(map)),
        other => other,
    }
}

pub fn strip_nulls_map(map: Attributes) -> Attributes {
    map.into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k, strip_nulls(v)))
        .collect()
}

/// Value equality where numbers compare numerically (`1` matches `1.0`)
pub fn values_match(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i == j,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_match(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_match(x, y)))
        }
        _ => a == b,
    }
}

/// Text for log lines and error messages: strings unquoted, the rest as JSON
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The `id` attribute, when it is an integer
pub fn identity(attrs: &Attributes) -> Option<i64> {
    attrs.get("id").and_then(Value::as_i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_nulls_nested() {
        let value = json!({
            "name": "cam",
            "model": null,
            "specifications": {"focal": 12.0, "lens": null},
            "list": [null, 1],
        });
        assert_eq!(
            strip_nulls(value),
            json!({
                "name": "cam",
                "specifications": {"focal": 12.0},
                "list": [null, 1],
            })
        );
    }

    #[test]
    fn test_values_match_numbers() {
        assert!(values_match(&json!(1), &json!(1.0)));
        assert!(values_match(&json!([1, 2]), &json!([1.0, 2])));
        assert!(!values_match(&json!(1), &json!("1")));
        assert!(!values_match(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
    }
}
