//! Index build/drop (§4.H) and the sibling `.index.<field>.json` file
//! format (§6.1).
//!
//! An index maps a field's stringified value to the list of positions
//! (array indices into the collection) holding that value. It is purely
//! informational: nothing in [`crate::filter`] or [`crate::query`]
//! consults it. Its only purpose is as a synchronously-built side effect of
//! a query that repeatedly filters on the same field (§4.D).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, TdbxResult};
use crate::record::{stringify, Collection};

/// Value-as-string -> positions, exactly the on-disk shape.
pub type Index = BTreeMap<String, Vec<usize>>;

/// Path of the sibling index file for `field` on `collection`.
pub fn index_path(database_dir: &Path, collection: &str, field: &str) -> PathBuf {
    database_dir.join(format!("{collection}.index.{field}.json"))
}

/// Streams `records`, mapping each record's stringified value for `field`
/// to the list of positions holding it.
pub fn build(records: &Collection, field: &str) -> Index {
    let mut index = Index::new();
    for (position, record) in records.iter().enumerate() {
        let key = stringify(record.get(field));
        index.entry(key).or_default().push(position);
    }
    index
}

pub fn save(database_dir: &Path, collection: &str, field: &str, index: &Index) -> TdbxResult<()> {
    let path = index_path(database_dir, collection, field);
    let text = serde_json::to_vec_pretty(index)
        .map_err(|e| Error::FileWrite(format!("failed to encode index: {e}")))?;
    std::fs::write(&path, text).map_err(|e| Error::FileWrite(format!("{}: {e}", path.display())))
}

pub fn load(database_dir: &Path, collection: &str, field: &str) -> TdbxResult<Option<Index>> {
    let path = index_path(database_dir, collection, field);
    match std::fs::read_to_string(&path) {
        Ok(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| Error::DataCorruption(format!("{}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::FileRead(format!("{}: {e}", path.display()))),
    }
}

/// Removes the on-disk index artifact; the in-memory index table is an
/// engine-instance field and is dropped by the caller.
pub fn drop_file(database_dir: &Path, collection: &str, field: &str) -> TdbxResult<()> {
    let path = index_path(database_dir, collection, field);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::FileWrite(format!("{}: {e}", path.display()))),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn recs(values: Vec<serde_json::Value>) -> Collection {
        values.into_iter().map(|v| v.as_object().unwrap().clone()).collect()
    }

    #[test]
    fn build_maps_stringified_values_to_positions() {
        let records = recs(vec![
            json!({"status": "active"}),
            json!({"status": "inactive"}),
            json!({"status": "active"}),
            json!({}),
        ]);
        let index = build(&records, "status");
        assert_eq!(index.get("active").unwrap(), &vec![0, 2]);
        assert_eq!(index.get("inactive").unwrap(), &vec![1]);
        assert_eq!(index.get("null").unwrap(), &vec![3]);
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempdir().unwrap();
        let records = recs(vec![json!({"k": "a"}), json!({"k": "b"})]);
        let index = build(&records, "k");
        save(dir.path(), "widgets", "k", &index).unwrap();
        let loaded = load(dir.path(), "widgets", "k").unwrap().unwrap();
        assert_eq!(loaded, index);
    }

    #[test]
    fn missing_index_file_loads_as_none() {
        let dir = tempdir().unwrap();
        assert!(load(dir.path(), "widgets", "k").unwrap().is_none());
    }

    #[test]
    fn drop_file_is_idempotent_on_a_missing_file() {
        let dir = tempdir().unwrap();
        assert!(drop_file(dir.path(), "widgets", "k").is_ok());
    }

    #[test]
    fn drop_file_removes_an_existing_index() {
        let dir = tempdir().unwrap();
        let index = build(&recs(vec![json!({"k": "a"})]), "k");
        save(dir.path(), "widgets", "k", &index).unwrap();
        drop_file(dir.path(), "widgets", "k").unwrap();
        assert!(load(dir.path(), "widgets", "k").unwrap().is_none());
    }
}
