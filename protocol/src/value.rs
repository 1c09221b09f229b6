//! Lenient accessors over untyped JSON payloads.

use serde_json::Map;
use serde_json::Value;

/// Coerce a JSON value to epoch milliseconds.
///
/// Accepts integers, floats (truncated) and numeric strings. Zero, negative
/// and non-numeric values yield `None`.
pub fn coerce_millis(value: &Value) -> Option<i64> {
    let millis = match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|f| f.trunc() as i64)),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<i64>()
                .ok()
                .or_else(|| text.parse::<f64>().ok().map(|f| f.trunc() as i64))
        }
        _ => None,
    }?;
    (millis > 0).then_some(millis)
}

/// Non-empty, trimmed string field.
pub fn str_field<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// First non-empty string among `keys`.
pub fn first_str<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| str_field(map, key))
}

pub fn millis_field(map: &Map<String, Value>, key: &str) -> Option<i64> {
    map.get(key).and_then(coerce_millis)
}

pub fn object_field<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
    map.get(key).and_then(Value::as_object)
}

/// String list, skipping non-string elements.
pub fn string_list(value: &Value) -> Option<Vec<String>> {
    value.as_array().map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn coerce_millis_accepts_numbers_and_numeric_strings() {
        assert_eq!(Some(1_700_000_000_000), coerce_millis(&json!(1_700_000_000_000_i64)));
        assert_eq!(Some(1500), coerce_millis(&json!(1500.9)));
        assert_eq!(Some(42), coerce_millis(&json!(" 42 ")));
        assert_eq!(Some(7), coerce_millis(&json!("7.5")));
    }

    #[test]
    fn coerce_millis_rejects_non_positive_and_garbage() {
        assert_eq!(None, coerce_millis(&json!(0)));
        assert_eq!(None, coerce_millis(&json!(-5)));
        assert_eq!(None, coerce_millis(&json!("soon")));
        assert_eq!(None, coerce_millis(&json!(null)));
        assert_eq!(None, coerce_millis(&json!({"ts": 1})));
    }

    #[test]
    fn first_str_skips_blank_values() {
        let map = json!({"detail": "  ", "message": "boom"});
        let map = map.as_object().expect("object");
        assert_eq!(Some("boom"), first_str(map, &["detail", "message"]));
    }
}
