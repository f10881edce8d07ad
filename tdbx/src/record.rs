//! The record type and the handful of helpers every component needs to read
//! or compare field values.
//!
//! Records have no schema: a `Record` is a `serde_json::Map` and a `Value`
//! is whatever `serde_json` can represent. There is no separate tagged-value
//! enum here -- every boundary in this crate is already JSON in, JSON out,
//! so reusing `serde_json::Value` is the straight-line choice rather than a
//! hand-rolled duplicate of it.

use serde_json::{Map, Value};

/// A single document: an unordered mapping from field name to value.
pub type Record = Map<String, Value>;

/// An ordered sequence of records, insertion order preserved.
pub type Collection = Vec<Record>;

/// Stringifies a field value the way the index builder and the aggregation
/// group-key concatenation both need: `null`/missing becomes the literal
/// string `"null"`, strings are taken verbatim (unquoted), and everything
/// else uses its JSON text form.
pub fn stringify(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "null".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Extracts an `f64` from a value if it is numeric, for the comparison and
/// aggregation operators that only make sense over numbers.
pub fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn stringify_null_and_missing_are_the_same() {
        assert_eq!(stringify(None), "null");
        assert_eq!(stringify(Some(&Value::Null)), "null");
    }

    #[test]
    fn stringify_strings_are_unquoted() {
        assert_eq!(stringify(Some(&json!("alice"))), "alice");
    }

    #[test]
    fn stringify_numbers_use_json_text() {
        assert_eq!(stringify(Some(&json!(42))), "42");
    }
}
