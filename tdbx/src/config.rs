//! The configuration loader.
//!
//! This is deliberately the smallest parser that can cover the grammar in
//! use: `key=value` text, one pair per line, `#`-introduced comments, blank
//! lines ignored, values allowed to contain `=` (only the first `=` on a
//! line splits key from value). A four-rule grammar this small does not
//! warrant pulling in a general config-format crate.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, TdbxResult};

/// Storage mode: whether collection files are encrypted at rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Plain,
    Encrypted,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Plain => "plain",
            Mode::Encrypted => "encrypted",
        }
    }

    fn parse(value: &str) -> TdbxResult<Self> {
        match value {
            "plain" => Ok(Mode::Plain),
            "encrypted" => Ok(Mode::Encrypted),
            other => Err(Error::Config(format!(
                "mode must be 'plain' or 'encrypted', got '{other}'"
            ))),
        }
    }
}

/// The validated configuration the engine is constructed from.
///
/// Nothing downstream of this struct ever re-parses configuration text --
/// an embedding application, a CLI, or a test harness builds one `Config`
/// (via [`Config::from_file`] or directly) and hands it to
/// [`crate::engine::Engine::open`].
#[derive(Debug, Clone)]
pub struct Config {
    pub database: String,
    pub encryption_key: String,
    pub mode: Mode,
    pub role: String,
    pub max_cache_size: usize,
    pub max_connections: usize,
    pub query_timeout_ms: u64,
}

const DEFAULT_MAX_CACHE_SIZE: usize = 100;
const DEFAULT_MAX_CONNECTIONS: usize = 10;
const DEFAULT_QUERY_TIMEOUT_MS: u64 = 30_000;
const MIN_RECOMMENDED_PASSPHRASE_LEN: usize = 32;

impl Config {
    /// Parses a configuration file at `path`.
    pub fn from_file(path: &Path) -> TdbxResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read config file {}: {e}", path.display())))?;
        Self::from_str(&text)
    }

    /// Parses configuration text directly, as `from_file` does after reading
    /// the file.
    pub fn from_str(text: &str) -> TdbxResult<Self> {
        if text.trim().is_empty() {
            return Err(Error::Config("config file is empty".to_string()));
        }

        let mut pairs: HashMap<String, String> = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('=') {
                Some((key, value)) => {
                    pairs.insert(key.trim().to_string(), value.trim().to_string());
                }
                None => {
                    log::debug!("ignoring malformed config line: {line}");
                }
            }
        }

        let database = required(&pairs, "database")?;
        let encryption_key = required(&pairs, "encryptionKey")?;
        let mode = Mode::parse(&required(&pairs, "mode")?)?;
        let role = required(&pairs, "role")?;

        if encryption_key.len() < MIN_RECOMMENDED_PASSPHRASE_LEN {
            log::warn!(
                "encryptionKey is {} characters; {MIN_RECOMMENDED_PASSPHRASE_LEN}+ is recommended",
                encryption_key.len()
            );
        }

        let max_cache_size = optional_usize(&pairs, "maxCacheSize", DEFAULT_MAX_CACHE_SIZE)?;
        let max_connections = optional_usize(&pairs, "maxConnections", DEFAULT_MAX_CONNECTIONS)?;
        let query_timeout_ms = optional_u64(&pairs, "queryTimeout", DEFAULT_QUERY_TIMEOUT_MS)?;

        for key in pairs.keys() {
            if !RECOGNIZED_KEYS.contains(&key.as_str()) {
                log::debug!("ignoring unknown config key: {key}");
            }
        }

        Ok(Config {
            database,
            encryption_key,
            mode,
            role,
            max_cache_size,
            max_connections,
            query_timeout_ms,
        })
    }
}

const RECOGNIZED_KEYS: &[&str] = &[
    "database",
    "encryptionKey",
    "mode",
    "role",
    "maxCacheSize",
    "maxConnections",
    "queryTimeout",
];

fn required(pairs: &HashMap<String, String>, key: &str) -> TdbxResult<String> {
    pairs
        .get(key)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| Error::Validation(format!("missing required field '{key}'")))
}

fn optional_usize(pairs: &HashMap<String, String>, key: &str, default: usize) -> TdbxResult<usize> {
    match pairs.get(key) {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|_| Error::Config(format!("'{key}' must be an integer, got '{v}'"))),
    }
}

fn optional_u64(pairs: &HashMap<String, String>, key: &str, default: u64) -> TdbxResult<u64> {
    match pairs.get(key) {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|_| Error::Config(format!("'{key}' must be an integer, got '{v}'"))),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> &'static str {
        "# comment\n\
         database=/tmp/mydb\n\
         encryptionKey=aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n\
         mode=encrypted\n\
         role=admin\n\
         \n\
         maxCacheSize=50\n"
    }

    #[test]
    fn parses_recognized_keys_and_defaults() {
        let cfg = Config::from_str(sample()).unwrap();
        assert_eq!(cfg.database, "/tmp/mydb");
        assert_eq!(cfg.mode, Mode::Encrypted);
        assert_eq!(cfg.role, "admin");
        assert_eq!(cfg.max_cache_size, 50);
        assert_eq!(cfg.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(cfg.query_timeout_ms, DEFAULT_QUERY_TIMEOUT_MS);
    }

    #[test]
    fn values_may_contain_equals_signs() {
        let text = "database=/tmp/db\nencryptionKey=a=b=c=================d\nmode=plain\nrole=r\n";
        let cfg = Config::from_str(text).unwrap();
        assert_eq!(cfg.encryption_key, "a=b=c=================d");
    }

    #[test]
    fn missing_required_field_is_a_validation_error() {
        let text = "database=/tmp/db\nmode=plain\nrole=r\n";
        let err = Config::from_str(text).unwrap_err();
        assert_eq!(err.kind(), "validation-error");
    }

    #[test]
    fn empty_file_is_a_config_error() {
        let err = Config::from_str("   \n\n").unwrap_err();
        assert_eq!(err.kind(), "config-error");
    }

    #[test]
    fn bad_mode_is_rejected() {
        let text = "database=/tmp/db\nencryptionKey=x\nmode=weird\nrole=r\n";
        assert!(Config::from_str(text).is_err());
    }
}
