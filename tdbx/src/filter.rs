//! The filter DSL (§4.E): `$and`/`$or`/`$not` combinators over field
//! predicates, with `$gt`/`$lt`/`$gte`/`$lte`/`$contains`/`$in`/`$exists`
//! operators on a single field.

use serde_json::Value;

use crate::error::{Error, TdbxResult};
use crate::record::Record;

/// A parsed filter expression, ready to be evaluated against records
/// without re-walking the raw `serde_json::Value` on every call.
#[derive(Debug, Clone)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    /// A conjunction of field predicates, e.g. `{"age": {"$gt": 21}, "name": "Alice"}`.
    Fields(Vec<FieldPredicate>),
}

#[derive(Debug, Clone)]
pub struct FieldPredicate {
    pub field: String,
    pub ops: Vec<Op>,
}

#[derive(Debug, Clone)]
pub enum Op {
    Eq(Value),
    Gt(Value),
    Lt(Value),
    Gte(Value),
    Lte(Value),
    Contains(Value),
    In(Vec<Value>),
    Exists(bool),
}

impl Filter {
    /// Parses a filter document. An empty object matches every record.
    pub fn parse(value: &Value) -> TdbxResult<Filter> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::Validation("filter must be a JSON object".to_string()))?;

        let mut combinators = Vec::new();
        let mut fields = Vec::new();

        for (key, val) in obj {
            match key.as_str() {
                "$and" => combinators.push(Filter::And(parse_array(val)?)),
                "$or" => combinators.push(Filter::Or(parse_array(val)?)),
                "$not" => combinators.push(Filter::Not(Box::new(Filter::parse(val)?))),
                field if field.starts_with('$') => {
                    return Err(Error::Validation(format!("unknown combinator '{field}'")));
                }
                field => fields.push(FieldPredicate::parse(field, val)?),
            }
        }

        match (combinators.len(), fields.is_empty()) {
            (0, _) => Ok(Filter::Fields(fields)),
            (1, true) => Ok(combinators.into_iter().next().unwrap()),
            _ => {
                combinators.push(Filter::Fields(fields));
                Ok(Filter::And(combinators))
            }
        }
    }

    /// Evaluates the filter against a single record.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::And(parts) => parts.iter().all(|f| f.matches(record)),
            Filter::Or(parts) => parts.iter().any(|f| f.matches(record)),
            Filter::Not(inner) => !inner.matches(record),
            Filter::Fields(predicates) => predicates.iter().all(|p| p.matches(record)),
        }
    }

    /// Collects every field name referenced anywhere in the filter tree, for
    /// the cache's query-pattern counters.
    pub fn referenced_fields(&self, out: &mut Vec<String>) {
        match self {
            Filter::And(parts) | Filter::Or(parts) => {
                for part in parts {
                    part.referenced_fields(out);
                }
            }
            Filter::Not(inner) => inner.referenced_fields(out),
            Filter::Fields(predicates) => {
                for p in predicates {
                    out.push(p.field.clone());
                }
            }
        }
    }
}

fn parse_array(value: &Value) -> TdbxResult<Vec<Filter>> {
    let items = value
        .as_array()
        .ok_or_else(|| Error::Validation("combinator value must be an array".to_string()))?;
    items.iter().map(Filter::parse).collect()
}

impl FieldPredicate {
    fn parse(field: &str, value: &Value) -> TdbxResult<FieldPredicate> {
        // A nested object all of whose keys are `$`-prefixed is an operator
        // predicate (one or more operators, all of which must hold); an
        // object with any non-`$` key, or no keys at all, is an equality
        // match against the literal value instead. A `$`-prefixed key that
        // isn't a recognized operator is always an error -- it is never
        // silently folded into an equality match.
        let ops = match value.as_object() {
            Some(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => map
                .iter()
                .map(|(op_name, op_value)| parse_operator(op_name, op_value))
                .collect::<TdbxResult<Vec<_>>>()?,
            _ => vec![Op::Eq(value.clone())],
        };
        Ok(FieldPredicate {
            field: field.to_string(),
            ops,
        })
    }

    fn matches(&self, record: &Record) -> bool {
        let actual = record.get(&self.field);
        self.ops.iter().all(|op| match op {
            Op::Exists(expected) => actual.is_some() == *expected,
            Op::Eq(expected) => actual == Some(expected),
            Op::Gt(expected) => compare(actual, expected).map(|o| o.is_gt()).unwrap_or(false),
            Op::Lt(expected) => compare(actual, expected).map(|o| o.is_lt()).unwrap_or(false),
            Op::Gte(expected) => compare(actual, expected).map(|o| o.is_ge()).unwrap_or(false),
            Op::Lte(expected) => compare(actual, expected).map(|o| o.is_le()).unwrap_or(false),
            Op::Contains(needle) => match actual {
                Some(Value::String(s)) => match needle.as_str() {
                    Some(n) => s.contains(n),
                    None => false,
                },
                Some(Value::Array(items)) => items.contains(needle),
                _ => false,
            },
            Op::In(options) => match actual {
                Some(v) => options.contains(v),
                None => false,
            },
        })
    }
}

fn parse_operator(name: &str, value: &Value) -> TdbxResult<Op> {
    match name {
        "$gt" => Ok(Op::Gt(value.clone())),
        "$lt" => Ok(Op::Lt(value.clone())),
        "$gte" => Ok(Op::Gte(value.clone())),
        "$lte" => Ok(Op::Lte(value.clone())),
        "$contains" => Ok(Op::Contains(value.clone())),
        "$exists" => value
            .as_bool()
            .map(Op::Exists)
            .ok_or_else(|| Error::Validation("$exists requires a boolean".to_string())),
        "$in" => value
            .as_array()
            .cloned()
            .map(Op::In)
            .ok_or_else(|| Error::Validation("$in requires an array".to_string())),
        other => Err(Error::Validation(format!("unknown operator '{other}'"))),
    }
}

/// Orders two values for `$gt`/`$lt`/`$gte`/`$lte`. Both sides must be
/// numeric; anything else (including string-to-string comparison) never
/// compares, matching neither side of a range operator.
fn compare(actual: Option<&Value>, expected: &Value) -> Option<std::cmp::Ordering> {
    let a = actual?.as_f64()?;
    let b = expected.as_f64()?;
    a.partial_cmp(&b)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn record(v: Value) -> Record {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = Filter::parse(&json!({})).unwrap();
        assert!(filter.matches(&record(json!({"a": 1}))));
    }

    #[test]
    fn plain_field_is_equality() {
        let filter = Filter::parse(&json!({"status": "active"})).unwrap();
        assert!(filter.matches(&record(json!({"status": "active"}))));
        assert!(!filter.matches(&record(json!({"status": "inactive"}))));
    }

    #[test]
    fn gt_and_lte_compare_numerically() {
        let filter = Filter::parse(&json!({"age": {"$gt": 18}})).unwrap();
        assert!(filter.matches(&record(json!({"age": 21}))));
        assert!(!filter.matches(&record(json!({"age": 18}))));

        let filter = Filter::parse(&json!({"age": {"$lte": 18}})).unwrap();
        assert!(filter.matches(&record(json!({"age": 18}))));
    }

    #[test]
    fn contains_checks_substrings_and_array_membership() {
        let filter = Filter::parse(&json!({"name": {"$contains": "ali"}})).unwrap();
        assert!(filter.matches(&record(json!({"name": "Alice"}))));

        let filter = Filter::parse(&json!({"tags": {"$contains": "x"}})).unwrap();
        assert!(filter.matches(&record(json!({"tags": ["x", "y"]}))));
    }

    #[test]
    fn in_checks_membership_of_a_list() {
        let filter = Filter::parse(&json!({"id": {"$in": [1, 2, 3]}})).unwrap();
        assert!(filter.matches(&record(json!({"id": 2}))));
        assert!(!filter.matches(&record(json!({"id": 9}))));
    }

    #[test]
    fn exists_checks_field_presence() {
        let filter = Filter::parse(&json!({"email": {"$exists": true}})).unwrap();
        assert!(filter.matches(&record(json!({"email": "a@b.com"}))));
        assert!(!filter.matches(&record(json!({"name": "a"}))));

        let filter = Filter::parse(&json!({"email": {"$exists": false}})).unwrap();
        assert!(filter.matches(&record(json!({"name": "a"}))));
    }

    #[test]
    fn and_or_not_combine() {
        let filter = Filter::parse(&json!({
            "$and": [
                {"age": {"$gte": 18}},
                {"$or": [{"role": "admin"}, {"role": "owner"}]}
            ]
        }))
        .unwrap();
        assert!(filter.matches(&record(json!({"age": 30, "role": "admin"}))));
        assert!(!filter.matches(&record(json!({"age": 30, "role": "guest"}))));
        assert!(!filter.matches(&record(json!({"age": 10, "role": "admin"}))));
    }

    #[test]
    fn not_is_the_exact_complement() {
        let inner = json!({"status": "active"});
        let direct = Filter::parse(&inner).unwrap();
        let negated = Filter::parse(&json!({"$not": inner})).unwrap();

        for record_value in [json!({"status": "active"}), json!({"status": "other"}), json!({})] {
            let r = record(record_value);
            assert_eq!(direct.matches(&r), !negated.matches(&r));
        }
    }

    #[test]
    fn multiple_operators_on_one_field_all_must_hold() {
        let filter = Filter::parse(&json!({"age": {"$gte": 18, "$lt": 65}})).unwrap();
        assert!(filter.matches(&record(json!({"age": 30}))));
        assert!(!filter.matches(&record(json!({"age": 70}))));
        assert!(!filter.matches(&record(json!({"age": 10}))));
    }

    #[test]
    fn unknown_operator_is_a_validation_error() {
        let err = Filter::parse(&json!({"age": {"$bogus": 1}})).unwrap_err();
        assert_eq!(err.kind(), "validation-error");
    }

    #[test]
    fn unknown_combinator_is_a_validation_error() {
        let err = Filter::parse(&json!({"$weird": []})).unwrap_err();
        assert_eq!(err.kind(), "validation-error");
    }

    #[test]
    fn missing_field_never_matches_a_range_operator() {
        let filter = Filter::parse(&json!({"age": {"$gt": 1}})).unwrap();
        assert!(!filter.matches(&record(json!({}))));
    }

    #[test]
    fn referenced_fields_collects_every_leaf_field() {
        let filter = Filter::parse(&json!({
            "$and": [{"a": 1}, {"$or": [{"b": 2}, {"c": 3}]}]
        }))
        .unwrap();
        let mut fields = Vec::new();
        filter.referenced_fields(&mut fields);
        fields.sort();
        assert_eq!(fields, vec!["a", "b", "c"]);
    }
}
