//! The public API surface: one `Engine` per database directory, wiring the
//! permission gate, the file gate, the cache, the query-pattern counters,
//! the index table, the transaction manager, and storage I/O together the
//! way §2's data-flow diagram lays them out.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;

use crate::backup::{self, Manifest};
use crate::cache::{Cache, QueryPatternCounters};
use crate::config::Config;
use crate::error::{Error, TdbxResult};
use crate::filter::Filter;
use crate::gate::Gate;
use crate::index::{self, Index};
use crate::mutation;
use crate::permission::{self, Action, AuthTable, UsersTable};
use crate::query::Query;
use crate::record::Collection;
use crate::storage;
use crate::transaction::{PendingOp, Status, TransactionManager};

const MAX_COLLECTION_NAME_LEN: usize = 64;

/// One embedded database. Every operation is a method here; an embedding
/// application instantiates exactly one `Engine` per database directory
/// (§9, "Global mutable state").
pub struct Engine {
    config: Config,
    database_dir: PathBuf,
    cache: Mutex<Cache>,
    counters: Mutex<QueryPatternCounters>,
    indexes: Mutex<HashMap<(String, String), Index>>,
    gate: Gate,
    auth: Mutex<AuthTable>,
    users: Mutex<UsersTable>,
    transactions: Mutex<TransactionManager>,
}

impl Engine {
    /// Opens (creating if necessary) the database directory named by
    /// `config.database`, loading or seeding its `.auth`/`.users`
    /// documents.
    pub fn open(config: Config) -> TdbxResult<Engine> {
        let database_dir = PathBuf::from(&config.database);
        std::fs::create_dir_all(&database_dir)
            .map_err(|e| Error::Config(format!("cannot create database directory {}: {e}", database_dir.display())))?;

        let auth = permission::load(&database_dir)?;
        let users = permission::load_users(&database_dir)?;

        log::info!(
            "engine opened at {} (mode={}, role={})",
            database_dir.display(),
            config.mode.as_str(),
            config.role
        );

        Ok(Engine {
            cache: Mutex::new(Cache::new(config.max_cache_size)),
            gate: Gate::new(config.max_connections),
            counters: Mutex::new(QueryPatternCounters::new()),
            indexes: Mutex::new(HashMap::new()),
            auth: Mutex::new(auth),
            users: Mutex::new(users),
            transactions: Mutex::new(TransactionManager::new()),
            database_dir,
            config,
        })
    }

    /// `queryTimeout`, exposed as advisory metadata only -- the evaluator
    /// does not enforce it (§9).
    pub fn query_timeout_ms(&self) -> u64 {
        self.config.query_timeout_ms
    }

    fn require(&self, action: Action) -> TdbxResult<()> {
        self.auth.lock().unwrap().check(&self.config.role, action)
    }

    fn validate_collection_name(name: &str) -> TdbxResult<()> {
        let valid = !name.is_empty()
            && name.len() <= MAX_COLLECTION_NAME_LEN
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if valid {
            Ok(())
        } else {
            Err(Error::Validation(format!(
                "'{name}' is not a valid collection name (non-empty, <= {MAX_COLLECTION_NAME_LEN} chars, [A-Za-z0-9_-]+)"
            )))
        }
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        storage::collection_path(&self.database_dir, collection)
    }

    /// Reads a collection through the cache, refreshing from storage when
    /// the cache entry is absent or stale.
    fn load(&self, collection: &str) -> TdbxResult<Collection> {
        let path = self.collection_path(collection);
        let mtime = match storage::mtime(&path) {
            Ok(mtime) => mtime,
            Err(Error::FileRead(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        if let Some(hit) = self.cache.lock().unwrap().get(collection, mtime) {
            return Ok(hit);
        }

        let records = storage::load(&path, self.config.mode, &self.config.encryption_key)?;
        self.cache.lock().unwrap().put(collection, records.clone(), mtime);
        Ok(records)
    }

    /// Performs a gated read-modify-write against `collection`: loads the
    /// current records straight from storage (bypassing the cache, since a
    /// concurrent writer could have advanced it past what a stale cache
    /// entry shows), runs `f`, persists the result, and refreshes the
    /// cache -- all while holding that collection's exclusive gate.
    fn mutate<R>(&self, collection: &str, f: impl FnOnce(&mut Collection) -> TdbxResult<R>) -> TdbxResult<R> {
        let path = self.collection_path(collection);
        let _guard = self.gate.acquire(&path);

        let mut records = storage::load(&path, self.config.mode, &self.config.encryption_key)?;
        let result = f(&mut records)?;
        storage::save(&path, self.config.mode, &self.config.encryption_key, &records)?;

        let mtime = storage::mtime(&path)?;
        self.cache.lock().unwrap().put(collection, records, mtime);
        Ok(result)
    }

    // -- collection management -------------------------------------------

    pub fn create_collection(&self, collection: &str) -> TdbxResult<()> {
        self.require(Action::CreateCollection)?;
        Self::validate_collection_name(collection)?;

        let path = self.collection_path(collection);
        let _guard = self.gate.acquire(&path);
        if !path.exists() {
            storage::save(&path, self.config.mode, &self.config.encryption_key, &Vec::new())?;
        }
        Ok(())
    }

    pub fn drop_collection(&self, collection: &str) -> TdbxResult<()> {
        self.require(Action::DropCollection)?;
        Self::validate_collection_name(collection)?;

        let path = self.collection_path(collection);
        {
            let _guard = self.gate.acquire(&path);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::FileWrite(format!("{}: {e}", path.display()))),
            }
        }
        self.gate.forget(&path);
        self.cache.lock().unwrap().invalidate(collection);
        self.counters.lock().unwrap().forget_collection(collection);

        let fields: Vec<String> = self
            .indexes
            .lock()
            .unwrap()
            .keys()
            .filter(|(c, _)| c == collection)
            .map(|(_, f)| f.clone())
            .collect();
        for field in fields {
            self.indexes.lock().unwrap().remove(&(collection.to_string(), field.clone()));
            index::drop_file(&self.database_dir, collection, &field)?;
        }

        Ok(())
    }

    /// Lists every collection currently present on disk.
    pub fn list(&self) -> TdbxResult<Vec<String>> {
        self.require(Action::Query)?;
        let mut names = Vec::new();
        let entries = std::fs::read_dir(&self.database_dir)
            .map_err(|e| Error::FileRead(format!("{}: {e}", self.database_dir.display())))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::FileRead(e.to_string()))?;
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            if let Some(collection) = name.strip_suffix(".tdbx") {
                names.push(collection.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    // -- query -------------------------------------------------------------

    pub fn query(&self, collection: &str, query: &Value) -> TdbxResult<Collection> {
        self.require(Action::Query)?;
        Self::validate_collection_name(collection)?;

        let records = self.load(collection)?;
        let parsed = Query::parse(query)?;
        let output = parsed.execute(&records);

        if let Some(filter) = &parsed.filter {
            self.maybe_auto_index(collection, filter)?;
        }

        Ok(output)
    }

    fn maybe_auto_index(&self, collection: &str, filter: &Filter) -> TdbxResult<()> {
        let mut fields = Vec::new();
        filter.referenced_fields(&mut fields);

        for field in fields {
            let count = self.counters.lock().unwrap().record(collection, &field);
            let already_indexed = self.indexes.lock().unwrap().contains_key(&(collection.to_string(), field.clone()));

            if count >= QueryPatternCounters::AUTO_INDEX_THRESHOLD && !already_indexed {
                log::debug!("auto-indexing {collection}.{field} after {count} filter references");
                self.build_index_internal(collection, &field)?;
            }
        }
        Ok(())
    }

    // -- mutation ------------------------------------------------------------

    pub fn insert(&self, collection: &str, value: Value) -> TdbxResult<()> {
        self.require(Action::Insert)?;
        Self::validate_collection_name(collection)?;
        let record = mutation::as_insertable(value)?;
        self.mutate(collection, |records| {
            mutation::insert(records, record);
            Ok(())
        })
    }

    pub fn update(&self, collection: &str, filter_json: &Value, changes_json: &Value) -> TdbxResult<usize> {
        self.require(Action::Update)?;
        Self::validate_collection_name(collection)?;
        let filter = Filter::parse(filter_json)?;
        let changes = mutation::as_insertable(changes_json.clone())?;
        self.mutate(collection, |records| mutation::update(records, &filter, &changes))
    }

    pub fn delete(&self, collection: &str, filter_json: &Value) -> TdbxResult<usize> {
        self.require(Action::Delete)?;
        Self::validate_collection_name(collection)?;
        let filter = Filter::parse(filter_json)?;
        self.mutate(collection, |records| Ok(mutation::delete(records, &filter)))
    }

    // -- aggregation --------------------------------------------------------

    pub fn aggregate(&self, collection: &str, pipeline: &Value) -> TdbxResult<Collection> {
        self.require(Action::Query)?;
        Self::validate_collection_name(collection)?;
        let records = self.load(collection)?;
        let stages = crate::aggregate::parse_pipeline(pipeline)?;
        Ok(crate::aggregate::execute(&stages, &records))
    }

    // -- indexing ------------------------------------------------------------

    pub fn build_index(&self, collection: &str, field: &str) -> TdbxResult<()> {
        self.require(Action::Index)?;
        Self::validate_collection_name(collection)?;
        self.build_index_internal(collection, field)
    }

    fn build_index_internal(&self, collection: &str, field: &str) -> TdbxResult<()> {
        let path = self.collection_path(collection);
        let _guard = self.gate.acquire(&path);
        let records = storage::load(&path, self.config.mode, &self.config.encryption_key)?;
        let built = index::build(&records, field);
        index::save(&self.database_dir, collection, field, &built)?;
        self.indexes
            .lock()
            .unwrap()
            .insert((collection.to_string(), field.to_string()), built);
        Ok(())
    }

    pub fn drop_index(&self, collection: &str, field: &str) -> TdbxResult<()> {
        self.require(Action::Index)?;
        Self::validate_collection_name(collection)?;
        self.indexes.lock().unwrap().remove(&(collection.to_string(), field.to_string()));
        index::drop_file(&self.database_dir, collection, field)
    }

    // -- transactions --------------------------------------------------------

    pub fn begin_transaction(&self) -> u64 {
        self.transactions.lock().unwrap().begin()
    }

    pub fn enqueue_insert(&self, tx_id: u64, collection: &str, value: Value) -> TdbxResult<()> {
        self.require(Action::Insert)?;
        let record = mutation::as_insertable(value)?;
        let collection = collection.to_string();
        let mut transactions = self.transactions.lock().unwrap();
        let tx = transactions.get_mut(tx_id)?;
        let collection_for_snapshot = collection.clone();
        tx.enqueue(PendingOp::Insert { collection, record }, || self.load(&collection_for_snapshot))
    }

    pub fn enqueue_update(&self, tx_id: u64, collection: &str, filter: Value, changes: Value) -> TdbxResult<()> {
        self.require(Action::Update)?;
        let changes = Value::Object(mutation::as_insertable(changes)?);
        let collection = collection.to_string();
        let mut transactions = self.transactions.lock().unwrap();
        let tx = transactions.get_mut(tx_id)?;
        let collection_for_snapshot = collection.clone();
        tx.enqueue(PendingOp::Update { collection, filter, changes }, || self.load(&collection_for_snapshot))
    }

    pub fn enqueue_delete(&self, tx_id: u64, collection: &str, filter: Value) -> TdbxResult<()> {
        self.require(Action::Delete)?;
        let collection = collection.to_string();
        let mut transactions = self.transactions.lock().unwrap();
        let tx = transactions.get_mut(tx_id)?;
        let collection_for_snapshot = collection.clone();
        tx.enqueue(PendingOp::Delete { collection, filter }, || self.load(&collection_for_snapshot))
    }

    /// Replays every queued operation against live storage, in order. On
    /// the first failure it rolls back everything touched by this
    /// transaction and surfaces the original error as `transaction-error`.
    pub fn commit(&self, tx_id: u64) -> TdbxResult<()> {
        let operations = {
            let transactions = self.transactions.lock().unwrap();
            transactions.get(tx_id)?.operations().to_vec()
        };

        for op in &operations {
            if let Err(e) = self.replay(op) {
                log::warn!("transaction {tx_id} failed mid-commit, rolling back: {e}");
                self.rollback(tx_id)?;
                return Err(Error::Transaction(format!("commit failed, rolled back: {e}")));
            }
        }

        let mut transactions = self.transactions.lock().unwrap();
        if let Ok(tx) = transactions.get_mut(tx_id) {
            tx.status = Status::Committed;
        }
        transactions.finish(tx_id);
        Ok(())
    }

    fn replay(&self, op: &PendingOp) -> TdbxResult<()> {
        match op {
            PendingOp::Insert { collection, record } => self.mutate(collection, |records| {
                mutation::insert(records, record.clone());
                Ok(())
            }),
            PendingOp::Update { collection, filter, changes } => {
                let filter = Filter::parse(filter)?;
                let changes = changes.as_object().cloned().unwrap_or_default();
                self.mutate(collection, |records| mutation::update(records, &filter, &changes)).map(|_| ())
            }
            PendingOp::Delete { collection, filter } => {
                let filter = Filter::parse(filter)?;
                self.mutate(collection, |records| Ok(mutation::delete(records, &filter))).map(|_| ())
            }
        }
    }

    /// Rewrites every collection this transaction snapshotted back to its
    /// pre-transaction contents and refreshes the cache for each.
    pub fn rollback(&self, tx_id: u64) -> TdbxResult<()> {
        let mut transactions = self.transactions.lock().unwrap();
        let tx = transactions.get_mut(tx_id)?;

        let collections: Vec<String> = tx.snapshotted_collections().cloned().collect();
        for collection in collections {
            let snapshot = tx.snapshot_for(&collection).cloned().unwrap_or_default();
            let path = self.collection_path(&collection);
            let _guard = self.gate.acquire(&path);
            storage::save(&path, self.config.mode, &self.config.encryption_key, &snapshot)?;
            let mtime = storage::mtime(&path)?;
            self.cache.lock().unwrap().put(&collection, snapshot, mtime);
        }

        tx.status = Status::RolledBack;
        transactions.finish(tx_id);
        Ok(())
    }

    // -- backup/restore --------------------------------------------------------

    pub fn backup(&self, target_dir: &Path, timestamp: &str) -> TdbxResult<PathBuf> {
        self.require(Action::Backup)?;
        backup::create(&self.database_dir, target_dir, self.config.mode, timestamp)
    }

    pub fn restore(&self, backup_dir: &Path) -> TdbxResult<()> {
        self.require(Action::Restore)?;
        let manifest: Manifest = backup::read_manifest(backup_dir, self.config.mode)?;
        backup::restore(backup_dir, &self.database_dir, &manifest)?;

        *self.cache.lock().unwrap() = Cache::new(self.config.max_cache_size);
        self.indexes.lock().unwrap().clear();
        *self.auth.lock().unwrap() = permission::load(&self.database_dir)?;
        *self.users.lock().unwrap() = permission::load_users(&self.database_dir)?;

        Ok(())
    }
}
