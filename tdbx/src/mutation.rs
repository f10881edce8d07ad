//! Insert, update, and delete (§4.H): pure transformations over a loaded
//! collection. The engine is responsible for loading, gating, and saving
//! around these; these functions only know about in-memory records.

use crate::error::{Error, TdbxResult};
use crate::filter::Filter;
use crate::record::{Collection, Record};

/// Appends `record` to `collection`. No uniqueness is enforced.
pub fn insert(collection: &mut Collection, record: Record) {
    collection.push(record);
}

/// Validates that a value intended for insertion is a JSON object, the
/// only shape a record may take.
pub fn as_insertable(value: serde_json::Value) -> TdbxResult<Record> {
    value
        .as_object()
        .cloned()
        .ok_or_else(|| Error::Validation("insert requires a JSON object".to_string()))
}

/// Shallow-merges `changes` into every record matching `filter`: existing
/// fields are overwritten, new fields are added, fields not mentioned in
/// `changes` are preserved. Returns the number of records modified.
///
/// Dotted-path keys (e.g. `"meta.modified"`) are rejected outright: this
/// engine's update semantics only ever touch a record's own top-level
/// fields, so a key suggesting nested-path addressing is almost always a
/// caller mistake rather than something that could be honored partially.
pub fn update(collection: &mut Collection, filter: &Filter, changes: &Record) -> TdbxResult<usize> {
    for key in changes.keys() {
        if key.contains('.') {
            return Err(Error::Validation(format!(
                "update key '{key}' looks like a dotted path; only top-level fields may be updated"
            )));
        }
    }

    let mut modified = 0;
    for record in collection.iter_mut() {
        if filter.matches(record) {
            for (key, value) in changes {
                record.insert(key.clone(), value.clone());
            }
            modified += 1;
        }
    }
    Ok(modified)
}

/// Retains only records that do not match `filter`. Returns the number of
/// records removed.
pub fn delete(collection: &mut Collection, filter: &Filter) -> usize {
    let before = collection.len();
    collection.retain(|r| !filter.matches(r));
    before - collection.len()
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn recs(values: Vec<serde_json::Value>) -> Collection {
        values.into_iter().map(|v| v.as_object().unwrap().clone()).collect()
    }

    #[test]
    fn insert_appends() {
        let mut collection = recs(vec![json!({"id": 1})]);
        insert(&mut collection, json!({"id": 2}).as_object().unwrap().clone());
        assert_eq!(collection.len(), 2);
        assert_eq!(collection[1].get("id").unwrap(), 2);
    }

    #[test]
    fn update_shallow_merges_matching_records_and_counts_them() {
        let mut collection = recs(vec![
            json!({"id": 1, "status": "pending", "name": "a"}),
            json!({"id": 2, "status": "done", "name": "b"}),
        ]);
        let filter = Filter::parse(&json!({"status": "pending"})).unwrap();
        let changes = json!({"status": "active"}).as_object().unwrap().clone();

        let count = update(&mut collection, &filter, &changes).unwrap();
        assert_eq!(count, 1);
        assert_eq!(collection[0].get("status").unwrap(), "active");
        assert_eq!(collection[0].get("name").unwrap(), "a");
        assert_eq!(collection[1].get("status").unwrap(), "done");
    }

    #[test]
    fn update_rejects_dotted_path_keys() {
        let mut collection = recs(vec![json!({"id": 1})]);
        let filter = Filter::parse(&json!({})).unwrap();
        let changes = json!({"meta.modified": true}).as_object().unwrap().clone();
        let err = update(&mut collection, &filter, &changes).unwrap_err();
        assert_eq!(err.kind(), "validation-error");
    }

    #[test]
    fn delete_retains_non_matching_records_and_counts_removed() {
        let mut collection = recs(vec![json!({"id": 1, "archived": true}), json!({"id": 2, "archived": false})]);
        let filter = Filter::parse(&json!({"archived": true})).unwrap();
        let removed = delete(&mut collection, &filter);
        assert_eq!(removed, 1);
        assert_eq!(collection.len(), 1);
        assert_eq!(collection[0].get("id").unwrap(), 2);
    }

    #[test]
    fn as_insertable_rejects_non_object_values() {
        assert!(as_insertable(json!([1, 2])).is_err());
        assert!(as_insertable(json!({"a": 1})).is_ok());
    }
}
