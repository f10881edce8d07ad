//! The error taxonomy surfaced by every public entry point of the engine.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type TdbxResult<T> = std::result::Result<T, Error>;

/// Every failure mode the engine can report.
///
/// Each variant maps to one of the kind codes documented alongside it; the
/// kind code is what a CLI front-end or embedding application should surface
/// to a user, with the variant's message giving the specifics.
#[derive(Debug, Error)]
pub enum Error {
    #[error("validation-error: {0}")]
    Validation(String),

    #[error("permission-error: role '{role}' may not perform '{action}' (allowed: [{allowed}])")]
    Permission {
        role: String,
        action: String,
        allowed: String,
    },

    #[error("config-error: {0}")]
    Config(String),

    #[error("encryption-error: {0}")]
    Encryption(String),

    #[error("decryption-error: {0}")]
    Decryption(String),

    #[error("data-corruption-error: {0}")]
    DataCorruption(String),

    #[error("data-format-error: {0}")]
    DataFormat(String),

    #[error("file-read-error: {0}")]
    FileRead(String),

    #[error("file-write-error: {0}")]
    FileWrite(String),

    #[error("transaction-error: {0}")]
    Transaction(String),

    #[error("backup-error: {0}")]
    Backup(String),

    #[error("restore-error: {0}")]
    Restore(String),
}

impl Error {
    /// The short kind code a caller would want to branch on, without the
    /// human-readable suffix.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation-error",
            Error::Permission { .. } => "permission-error",
            Error::Config(_) => "config-error",
            Error::Encryption(_) => "encryption-error",
            Error::Decryption(_) => "decryption-error",
            Error::DataCorruption(_) => "data-corruption-error",
            Error::DataFormat(_) => "data-format-error",
            Error::FileRead(_) => "file-read-error",
            Error::FileWrite(_) => "file-write-error",
            Error::Transaction(_) => "transaction-error",
            Error::Backup(_) => "backup-error",
            Error::Restore(_) => "restore-error",
        }
    }
}
