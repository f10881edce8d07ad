//! The aggregation pipeline (§4.G): `$match` / `$group` / `$sort` / `$skip`
//! / `$limit` stages applied in sequence.
//!
//! `$group._id` is restricted to the two shapes this engine actually
//! commits to: `null` (a single bucket over every input record) or an
//! object mapping each output key to a source field name, e.g.
//! `{"_id": {"region": "region"}}`. Any other `_id` shape is rejected
//! rather than guessed at.

use serde_json::Value;

use crate::error::{Error, TdbxResult};
use crate::filter::Filter;
use crate::query::Sort;
use crate::record::{as_f64, stringify, Collection, Record};

#[derive(Debug, Clone)]
pub enum Stage {
    Match(Filter),
    Group(GroupStage),
    Sort(Sort),
    Skip(usize),
    Limit(usize),
}

#[derive(Debug, Clone)]
pub struct GroupStage {
    /// `None` means a single bucket; `Some` maps output key -> source field.
    id_fields: Option<Vec<(String, String)>>,
    accumulators: Vec<(String, Accumulator)>,
}

#[derive(Debug, Clone)]
enum SumArg {
    Field(String),
    Constant(f64),
}

#[derive(Debug, Clone)]
enum Accumulator {
    Sum(SumArg),
    Avg(String),
    Count,
    Min(String),
    Max(String),
}

/// Parses a pipeline document: a JSON array of single-key stage objects, in
/// the order `$match`, `$group`, `$sort`, `$skip`, `$limit` are named in the
/// spec though any ordering the caller supplies is honored as written.
pub fn parse_pipeline(value: &Value) -> TdbxResult<Vec<Stage>> {
    let stages = value
        .as_array()
        .ok_or_else(|| Error::Validation("pipeline must be an array of stages".to_string()))?;

    stages.iter().map(parse_stage).collect()
}

fn parse_stage(value: &Value) -> TdbxResult<Stage> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::Validation("each pipeline stage must be an object".to_string()))?;
    if obj.len() != 1 {
        return Err(Error::Validation(
            "each pipeline stage must have exactly one key".to_string(),
        ));
    }
    let (key, body) = obj.iter().next().unwrap();
    match key.as_str() {
        "$match" => Ok(Stage::Match(Filter::parse(body)?)),
        "$group" => Ok(Stage::Group(parse_group(body)?)),
        "$sort" => Ok(Stage::Sort(crate::query::parse_sort(Some(body))?)),
        "$skip" => Ok(Stage::Skip(parse_count(body, "$skip")?)),
        "$limit" => Ok(Stage::Limit(parse_count(body, "$limit")?)),
        other => Err(Error::Validation(format!("unknown pipeline stage '{other}'"))),
    }
}

fn parse_count(value: &Value, stage_name: &str) -> TdbxResult<usize> {
    value
        .as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| Error::Validation(format!("{stage_name} requires a non-negative integer")))
}


fn parse_group(value: &Value) -> TdbxResult<GroupStage> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::Validation("$group requires an object".to_string()))?;

    let id_fields = match obj.get("_id") {
        Some(Value::Null) | None => None,
        Some(Value::Object(map)) => {
            let mut fields = Vec::with_capacity(map.len());
            for (out_key, source) in map {
                let source_field = source.as_str().ok_or_else(|| {
                    Error::Validation("$group._id entries must map to a source field name".to_string())
                })?;
                fields.push((out_key.clone(), source_field.to_string()));
            }
            Some(fields)
        }
        Some(_) => {
            return Err(Error::Validation(
                "$group._id must be null or an object mapping output keys to field names".to_string(),
            ))
        }
    };

    let mut accumulators = Vec::new();
    for (out_key, spec) in obj {
        if out_key == "_id" {
            continue;
        }
        let spec_obj = spec
            .as_object()
            .filter(|m| m.len() == 1)
            .ok_or_else(|| Error::Validation(format!("$group.{out_key} must name exactly one operator")))?;
        let (op_name, op_arg) = spec_obj.iter().next().unwrap();
        let accumulator = match op_name.as_str() {
            "$count" => Accumulator::Count,
            "$sum" => Accumulator::Sum(match op_arg {
                Value::String(field) => SumArg::Field(field.clone()),
                Value::Number(n) => SumArg::Constant(n.as_f64().unwrap_or(0.0)),
                _ => return Err(Error::Validation("$sum requires a field name or a numeric constant".to_string())),
            }),
            "$avg" => Accumulator::Avg(field_name(op_arg, "$avg")?),
            "$min" => Accumulator::Min(field_name(op_arg, "$min")?),
            "$max" => Accumulator::Max(field_name(op_arg, "$max")?),
            other => return Err(Error::Validation(format!("unknown group operator '{other}'"))),
        };
        accumulators.push((out_key.clone(), accumulator));
    }

    Ok(GroupStage {
        id_fields,
        accumulators,
    })
}

fn field_name(value: &Value, op_name: &str) -> TdbxResult<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::Validation(format!("{op_name} requires a field name")))
}

/// Runs the pipeline stages over `records` in order, returning the final
/// result set. `$group` always produces `Record`s with a literal `_id`
/// field (an object for keyed grouping, or `null` for the single-bucket
/// case) alongside each requested accumulator output.
pub fn execute(stages: &[Stage], records: &Collection) -> Collection {
    let mut current = records.clone();
    for stage in stages {
        current = match stage {
            Stage::Match(filter) => current.into_iter().filter(|r| filter.matches(r)).collect(),
            Stage::Group(group) => run_group(group, &current),
            Stage::Sort(sort) => {
                crate::query::sort_records(&mut current, sort);
                current
            }
            Stage::Skip(n) => current.into_iter().skip(*n).collect(),
            Stage::Limit(n) => {
                current.truncate(*n);
                current
            }
        };
    }
    current
}

fn run_group(group: &GroupStage, records: &Collection) -> Collection {
    use std::collections::HashMap;

    struct Bucket {
        id_value: Value,
        records: Vec<Record>,
    }

    let mut buckets: HashMap<String, Bucket> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for record in records {
        // The group key carried as `_id` in the output is the `-`-joined
        // stringified source values themselves, not a reconstruction of the
        // `{outputKey: sourceField}` mapping used to select them.
        let (key, id_value) = match &group.id_fields {
            None => ("__single__".to_string(), Value::Null),
            Some(fields) => {
                let key = fields
                    .iter()
                    .map(|(_, source_field)| stringify(record.get(source_field)))
                    .collect::<Vec<_>>()
                    .join("-");
                (key.clone(), Value::String(key))
            }
        };

        let bucket = buckets.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            Bucket {
                id_value,
                records: Vec::new(),
            }
        });
        bucket.records.push(record.clone());
    }

    order
        .into_iter()
        .map(|key| {
            let bucket = buckets.remove(&key).unwrap();
            let mut out = Record::new();
            out.insert("_id".to_string(), bucket.id_value);
            for (out_key, accumulator) in &group.accumulators {
                out.insert(out_key.clone(), apply_accumulator(accumulator, &bucket.records));
            }
            out
        })
        .collect()
}

fn apply_accumulator(accumulator: &Accumulator, records: &[Record]) -> Value {
    match accumulator {
        Accumulator::Count => Value::from(records.len()),
        Accumulator::Sum(SumArg::Field(field)) => Value::from(numeric_values(records, field).sum::<f64>()),
        Accumulator::Sum(SumArg::Constant(constant)) => Value::from(constant * records.len() as f64),
        // Per spec, $avg divides by the group size (the count of records in
        // the bucket, the same number $count: true yields), not by how many
        // of them actually carried a numeric value for this field.
        Accumulator::Avg(field) => {
            Value::from(numeric_values(records, field).sum::<f64>() / records.len() as f64)
        }
        Accumulator::Min(field) => numeric_values(records, field)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.min(v))))
            .map(Value::from)
            .unwrap_or(Value::Null),
        Accumulator::Max(field) => numeric_values(records, field)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
            .map(Value::from)
            .unwrap_or(Value::Null),
    }
}

fn numeric_values<'a>(records: &'a [Record], field: &'a str) -> impl Iterator<Item = f64> + 'a {
    records.iter().filter_map(move |r| r.get(field)).filter_map(as_f64)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn recs(values: Vec<Value>) -> Collection {
        values.into_iter().map(|v| v.as_object().unwrap().clone()).collect()
    }

    #[test]
    fn match_then_group_by_single_field_with_sum_and_count() {
        let pipeline = parse_pipeline(&json!([
            {"$match": {"active": true}},
            {"$group": {
                "_id": {"region": "region"},
                "total": {"$sum": "amount"},
                "n": {"$count": {}}
            }}
        ]))
        .unwrap();

        let records = recs(vec![
            json!({"region": "east", "amount": 10, "active": true}),
            json!({"region": "east", "amount": 5, "active": true}),
            json!({"region": "west", "amount": 20, "active": true}),
            json!({"region": "west", "amount": 999, "active": false}),
        ]);

        let mut result = execute(&pipeline, &records);
        result.sort_by_key(|r| r.get("_id").unwrap().as_str().unwrap().to_string());

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].get("total").unwrap(), 15.0);
        assert_eq!(result[0].get("n").unwrap(), 2);
        assert_eq!(result[1].get("total").unwrap(), 20.0);
    }

    #[test]
    fn null_id_groups_everything_into_one_bucket() {
        let pipeline = parse_pipeline(&json!([
            {"$group": {"_id": null, "avg": {"$avg": "x"}}}
        ]))
        .unwrap();
        let records = recs(vec![json!({"x": 2}), json!({"x": 4})]);
        let result = execute(&pipeline, &records);
        assert_eq!(result.len(), 1);
        assert!(result[0].get("_id").unwrap().is_null());
        assert_eq!(result[0].get("avg").unwrap(), 3.0);
    }

    #[test]
    fn avg_divides_by_group_size_not_by_how_many_records_carried_the_field() {
        let pipeline = parse_pipeline(&json!([
            {"$group": {"_id": null, "avg": {"$avg": "s"}, "n": {"$count": true}}}
        ]))
        .unwrap();
        let records = recs(vec![json!({"s": 10}), json!({})]);
        let result = execute(&pipeline, &records);
        assert_eq!(result[0].get("n").unwrap(), 2);
        assert_eq!(result[0].get("avg").unwrap(), 5.0);
    }

    #[test]
    fn min_and_max_over_a_field() {
        let pipeline = parse_pipeline(&json!([
            {"$group": {"_id": null, "lo": {"$min": "x"}, "hi": {"$max": "x"}}}
        ]))
        .unwrap();
        let records = recs(vec![json!({"x": 3}), json!({"x": 1}), json!({"x": 7})]);
        let result = execute(&pipeline, &records);
        assert_eq!(result[0].get("lo").unwrap(), 1.0);
        assert_eq!(result[0].get("hi").unwrap(), 7.0);
    }

    #[test]
    fn sort_skip_limit_stages_after_group() {
        let pipeline = parse_pipeline(&json!([
            {"$group": {"_id": {"k": "k"}, "n": {"$count": {}}}},
            {"$sort": {"n": -1}},
            {"$limit": 1}
        ]))
        .unwrap();
        let records = recs(vec![
            json!({"k": "a"}),
            json!({"k": "a"}),
            json!({"k": "b"}),
        ]);
        let result = execute(&pipeline, &records);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].get("n").unwrap(), 2);
    }

    #[test]
    fn sum_of_a_numeric_constant_scales_by_group_size() {
        let pipeline = parse_pipeline(&json!([
            {"$group": {"_id": null, "total": {"$sum": 2}}}
        ]))
        .unwrap();
        let records = recs(vec![json!({}), json!({}), json!({})]);
        let result = execute(&pipeline, &records);
        assert_eq!(result[0].get("total").unwrap(), 6.0);
    }

    #[test]
    fn group_by_field_then_sort_by_average_descending() {
        let pipeline = parse_pipeline(&json!([
            {"$group": {"_id": {"r": "r"}, "avg": {"$avg": "s"}, "n": {"$count": true}}},
            {"$sort": {"avg": -1}}
        ]))
        .unwrap();
        let records = recs(vec![
            json!({"r": "u", "s": 10}),
            json!({"r": "u", "s": 30}),
            json!({"r": "a", "s": 20}),
        ]);
        let result = execute(&pipeline, &records);
        assert_eq!(result.len(), 2);
        for r in &result {
            assert_eq!(r.get("avg").unwrap(), 20.0);
        }
        let ids: Vec<_> = result.iter().map(|r| r.get("_id").unwrap().as_str().unwrap()).collect();
        assert!(ids.contains(&"u") && ids.contains(&"a"));
    }

    #[test]
    fn bad_group_id_shape_is_a_validation_error() {
        let err = parse_pipeline(&json!([{"$group": {"_id": "region"}}])).unwrap_err();
        assert_eq!(err.kind(), "validation-error");
    }

    #[test]
    fn unknown_stage_is_a_validation_error() {
        let err = parse_pipeline(&json!([{"$bogus": {}}])).unwrap_err();
        assert_eq!(err.kind(), "validation-error");
    }

    #[test]
    fn unknown_group_operator_is_a_validation_error() {
        let err = parse_pipeline(&json!([{"$group": {"_id": null, "x": {"$weird": "f"}}}])).unwrap_err();
        assert_eq!(err.kind(), "validation-error");
    }
}
