//! The query pipeline (§4.F): filter, then sort, then skip, then limit,
//! then project, applied in that fixed order to a loaded collection.

use serde_json::Value;

use crate::error::{Error, TdbxResult};
use crate::filter::Filter;
use crate::record::{stringify, Collection, Record};

/// One key of a sort spec: a field name and its direction, `+1` for
/// ascending or `-1` for descending.
#[derive(Debug, Clone)]
pub struct SortKey {
    pub field: String,
    pub ascending: bool,
}

/// A sort spec: a map of field to direction, applied in the order the keys
/// were written, most-significant first, each subsequent key breaking ties
/// left by the ones before it.
pub type Sort = Vec<SortKey>;

/// A fully parsed query: the filter plus the optional sort/skip/limit/
/// projection stages that run after it.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filter: Option<Filter>,
    pub sort: Sort,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
    pub project: Option<Vec<String>>,
}

impl Query {
    /// Parses a query document of the shape
    /// `{"filter": {...}, "sort": {"age": -1, "name": 1},
    ///   "skip": 0, "limit": 10, "project": ["name", "age"]}`.
    /// Every key is optional; an empty document matches and returns
    /// everything.
    pub fn parse(value: &Value) -> TdbxResult<Query> {
        let obj = match value {
            Value::Null => return Ok(Query::default()),
            Value::Object(obj) => obj,
            _ => return Err(Error::Validation("query must be a JSON object".to_string())),
        };

        let filter = match obj.get("filter") {
            Some(f) if !f.is_null() => Some(Filter::parse(f)?),
            _ => None,
        };

        let sort = match obj.get("sort") {
            Some(Value::Object(_)) | None | Some(Value::Null) => parse_sort(obj.get("sort"))?,
            Some(_) => return Err(Error::Validation("sort must be an object".to_string())),
        };

        let skip = optional_index(obj, "skip")?;
        let limit = optional_index(obj, "limit")?;

        let project = match obj.get("project") {
            Some(Value::Array(items)) => {
                let mut fields = Vec::with_capacity(items.len());
                for item in items {
                    fields.push(
                        item.as_str()
                            .ok_or_else(|| Error::Validation("project entries must be strings".to_string()))?
                            .to_string(),
                    );
                }
                Some(fields)
            }
            Some(Value::Null) | None => None,
            Some(_) => return Err(Error::Validation("project must be an array of field names".to_string())),
        };

        Ok(Query {
            filter,
            sort,
            skip,
            limit,
            project,
        })
    }

    /// Runs the pipeline over `records`, returning a new collection.
    pub fn execute(&self, records: &Collection) -> Collection {
        let mut result: Collection = match &self.filter {
            Some(filter) => records.iter().filter(|r| filter.matches(r)).cloned().collect(),
            None => records.clone(),
        };

        if !self.sort.is_empty() {
            sort_records(&mut result, &self.sort);
        }

        if let Some(skip) = self.skip {
            result = result.into_iter().skip(skip).collect();
        }

        if let Some(limit) = self.limit {
            result.truncate(limit);
        }

        if let Some(fields) = &self.project {
            result = result.iter().map(|r| project_record(r, fields)).collect();
        }

        result
    }
}

/// Parses `{"field": 1 | -1, ...}` into a [`Sort`], preserving key order.
pub fn parse_sort(value: Option<&Value>) -> TdbxResult<Sort> {
    let obj = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Object(obj)) => obj,
        Some(_) => return Err(Error::Validation("sort must be an object of field -> 1 | -1".to_string())),
    };

    obj.iter()
        .map(|(field, direction)| {
            let ascending = match direction.as_i64() {
                Some(1) => true,
                Some(-1) => false,
                _ => {
                    return Err(Error::Validation(format!(
                        "sort direction for '{field}' must be 1 or -1"
                    )))
                }
            };
            Ok(SortKey {
                field: field.clone(),
                ascending,
            })
        })
        .collect()
}

fn optional_index(obj: &serde_json::Map<String, Value>, key: &str) -> TdbxResult<Option<usize>> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| Error::Validation(format!("'{key}' must be a non-negative integer"))),
    }
}

/// Orders records by each sort key in turn, most-significant first. Within
/// one key, a record missing the field (or holding `null` for it) sorts
/// before every record that has a value when that key is ascending, and
/// after when it is descending. Shared with the aggregation pipeline's
/// `$sort` stage so both pipelines order records identically.
pub fn sort_records(records: &mut Collection, sort: &Sort) {
    records.sort_by(|a, b| {
        for key in sort {
            let ordering = compare_by_key(a, b, key);
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });
}

fn compare_by_key(a: &Record, b: &Record, key: &SortKey) -> std::cmp::Ordering {
    let a_val = a.get(&key.field).filter(|v| !v.is_null());
    let b_val = b.get(&key.field).filter(|v| !v.is_null());

    let ordering = match (a_val, b_val) {
        (None, None) => return std::cmp::Ordering::Equal,
        (None, Some(_)) => {
            return if key.ascending {
                std::cmp::Ordering::Less
            } else {
                std::cmp::Ordering::Greater
            }
        }
        (Some(_), None) => {
            return if key.ascending {
                std::cmp::Ordering::Greater
            } else {
                std::cmp::Ordering::Less
            }
        }
        (Some(a), Some(b)) => compare_values(a, b),
    };

    if key.ascending {
        ordering
    } else {
        ordering.reverse()
    }
}

fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal),
        _ => stringify(Some(a)).cmp(&stringify(Some(b))),
    }
}

fn project_record(record: &Record, fields: &[String]) -> Record {
    let mut projected = Record::new();
    for field in fields {
        if let Some(value) = record.get(field) {
            projected.insert(field.clone(), value.clone());
        }
    }
    projected
}
