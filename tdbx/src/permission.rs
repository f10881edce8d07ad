//! The role-based permission gate (§4.J): a table from role name to the set
//! of permitted action names, loaded from the `.auth` metadata document and
//! consulted before every public engine operation dispatches.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde_json::Value;

use crate::error::{Error, TdbxResult};

/// Every action an engine operation can be gated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Query,
    Insert,
    Update,
    Delete,
    Index,
    CreateCollection,
    DropCollection,
    Backup,
    Restore,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Query => "query",
            Action::Insert => "insert",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Index => "index",
            Action::CreateCollection => "create_collection",
            Action::DropCollection => "drop_collection",
            Action::Backup => "backup",
            Action::Restore => "restore",
        }
    }
}

/// The `.auth` document: role name -> set of permitted action names.
///
/// Unlike the collection cache, this table is small and process-wide for
/// the lifetime of one engine instance; it is reloaded wholesale on restore
/// (§4.K) and otherwise read on every operation.
#[derive(Debug, Clone)]
pub struct AuthTable {
    roles: HashMap<String, HashSet<String>>,
}

/// The table a brand-new database directory is seeded with: an `admin` role
/// with every action, a `writer` role that may read and mutate records but
/// not manage collections or run backups, and a `reader` role restricted to
/// `query`. A database directory without a `.auth` file yet gets exactly
/// this table, persisted on first use the same way a missing collection
/// file is auto-initialized to `[]`.
fn default_roles() -> HashMap<String, HashSet<String>> {
    let all: HashSet<String> = [
        "query",
        "insert",
        "update",
        "delete",
        "index",
        "create_collection",
        "drop_collection",
        "backup",
        "restore",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let writer: HashSet<String> = ["query", "insert", "update", "delete", "index"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let reader: HashSet<String> = ["query"].iter().map(|s| s.to_string()).collect();

    HashMap::from([
        ("admin".to_string(), all),
        ("writer".to_string(), writer),
        ("reader".to_string(), reader),
    ])
}

impl AuthTable {
    pub fn default_table() -> Self {
        AuthTable {
            roles: default_roles(),
        }
    }

    /// Parses a `.auth` document: `{"<role>": ["<action>", ...], ...}`.
    pub fn parse(value: &Value) -> TdbxResult<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::DataFormat(".auth must be a JSON object".to_string()))?;

        let mut roles = HashMap::with_capacity(obj.len());
        for (role, actions) in obj {
            let actions = actions
                .as_array()
                .ok_or_else(|| Error::DataFormat(format!(".auth['{role}'] must be an array of action names")))?;
            let mut set = HashSet::with_capacity(actions.len());
            for action in actions {
                let name = action
                    .as_str()
                    .ok_or_else(|| Error::DataFormat(format!(".auth['{role}'] entries must be strings")))?;
                set.insert(name.to_string());
            }
            roles.insert(role.clone(), set);
        }

        Ok(AuthTable { roles })
    }

    pub fn to_value(&self) -> Value {
        let mut obj = serde_json::Map::with_capacity(self.roles.len());
        for (role, actions) in &self.roles {
            let mut sorted: Vec<_> = actions.iter().cloned().collect();
            sorted.sort();
            obj.insert(role.clone(), Value::Array(sorted.into_iter().map(Value::String).collect()));
        }
        Value::Object(obj)
    }

    /// Checks whether `role` may perform `action`, returning a
    /// [`Error::Permission`] naming every action the role is allowed when it
    /// may not. An unrecognized role has no permissions at all.
    pub fn check(&self, role: &str, action: Action) -> TdbxResult<()> {
        let allowed = self.roles.get(role);
        if allowed.map(|set| set.contains(action.as_str())).unwrap_or(false) {
            return Ok(());
        }

        let mut allowed_list: Vec<&str> = allowed.map(|set| set.iter().map(String::as_str).collect()).unwrap_or_default();
        allowed_list.sort();

        Err(Error::Permission {
            role: role.to_string(),
            action: action.as_str().to_string(),
            allowed: allowed_list.join(", "),
        })
    }
}

/// Path of the `.auth` metadata document inside a database directory.
pub fn auth_path(database_dir: &Path) -> std::path::PathBuf {
    database_dir.join(".auth")
}

/// Loads the `.auth` document, seeding it with [`AuthTable::default_table`]
/// if the database directory doesn't have one yet.
pub fn load(database_dir: &Path) -> TdbxResult<AuthTable> {
    let path = auth_path(database_dir);
    match std::fs::read_to_string(&path) {
        Ok(text) => {
            let value: Value = serde_json::from_str(&text)
                .map_err(|e| Error::DataCorruption(format!("{}: {e}", path.display())))?;
            AuthTable::parse(&value)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let table = AuthTable::default_table();
            save(database_dir, &table)?;
            Ok(table)
        }
        Err(e) => Err(Error::FileRead(format!("{}: {e}", path.display()))),
    }
}

pub fn save(database_dir: &Path, table: &AuthTable) -> TdbxResult<()> {
    let path = auth_path(database_dir);
    let text = serde_json::to_vec_pretty(&table.to_value())
        .map_err(|e| Error::FileWrite(format!("failed to encode .auth: {e}")))?;
    std::fs::write(&path, text).map_err(|e| Error::FileWrite(format!("{}: {e}", path.display())))
}

/// The optional `.users` metadata document: user name -> arbitrary profile
/// object (at minimum a `role` field). Nothing in the core engine consults
/// it for permission decisions -- a caller's role comes from its
/// [`crate::config::Config`] directly -- but it is reloaded on restore
/// alongside the auth table so an embedding application can look a caller's
/// profile up after a restore completes.
#[derive(Debug, Clone, Default)]
pub struct UsersTable {
    users: HashMap<String, Value>,
}

impl UsersTable {
    pub fn get(&self, user: &str) -> Option<&Value> {
        self.users.get(user)
    }
}

fn users_path(database_dir: &Path) -> std::path::PathBuf {
    database_dir.join(".users")
}

/// Loads the `.users` document, or an empty table if the database directory
/// has none -- unlike `.auth`, no file is seeded, since the document is
/// explicitly optional.
pub fn load_users(database_dir: &Path) -> TdbxResult<UsersTable> {
    let path = users_path(database_dir);
    match std::fs::read_to_string(&path) {
        Ok(text) => {
            let value: Value = serde_json::from_str(&text)
                .map_err(|e| Error::DataCorruption(format!("{}: {e}", path.display())))?;
            let obj = value
                .as_object()
                .ok_or_else(|| Error::DataFormat(".users must be a JSON object".to_string()))?;
            Ok(UsersTable {
                users: obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(UsersTable::default()),
        Err(e) => Err(Error::FileRead(format!("{}: {e}", path.display()))),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn default_table_grants_admin_everything() {
        let table = AuthTable::default_table();
        assert!(table.check("admin", Action::Backup).is_ok());
        assert!(table.check("admin", Action::Restore).is_ok());
    }

    #[test]
    fn default_table_restricts_reader_to_query() {
        let table = AuthTable::default_table();
        assert!(table.check("reader", Action::Query).is_ok());
        let err = table.check("reader", Action::Insert).unwrap_err();
        match err {
            Error::Permission { allowed, .. } => assert_eq!(allowed, "query"),
            _ => panic!("expected a Permission error"),
        }
    }

    #[test]
    fn unrecognized_role_has_no_permissions() {
        let table = AuthTable::default_table();
        assert!(table.check("guest", Action::Query).is_err());
    }

    #[test]
    fn parses_a_custom_auth_document() {
        let table = AuthTable::parse(&json!({"auditor": ["query", "backup"]})).unwrap();
        assert!(table.check("auditor", Action::Query).is_ok());
        assert!(table.check("auditor", Action::Backup).is_ok());
        assert!(table.check("auditor", Action::Insert).is_err());
    }

    #[test]
    fn missing_auth_file_is_seeded_with_the_default_table() {
        let dir = tempdir().unwrap();
        let table = load(dir.path()).unwrap();
        assert!(table.check("admin", Action::Insert).is_ok());
        assert!(auth_path(dir.path()).exists());
    }

    #[test]
    fn round_trips_through_to_value_and_parse() {
        let original = AuthTable::parse(&json!({"x": ["query"]})).unwrap();
        let reparsed = AuthTable::parse(&original.to_value()).unwrap();
        assert!(reparsed.check("x", Action::Query).is_ok());
    }

    #[test]
    fn missing_users_file_loads_an_empty_table() {
        let dir = tempdir().unwrap();
        let users = load_users(dir.path()).unwrap();
        assert!(users.get("alice").is_none());
    }

    #[test]
    fn loads_a_users_document() {
        let dir = tempdir().unwrap();
        std::fs::write(users_path(dir.path()), r#"{"alice": {"role": "admin"}}"#).unwrap();
        let users = load_users(dir.path()).unwrap();
        assert_eq!(users.get("alice").unwrap().get("role").unwrap(), "admin");
    }
}
