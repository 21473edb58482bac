use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A write failed inside a transaction; the whole transaction was rolled back.
    #[error("{phase} transaction rolled back: {source}")]
    Transaction {
        phase: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// Staged input does not match the registry; nothing was written.
    #[error("staging validation failed for {entity}: {reason}")]
    StagingValidation { entity: String, reason: String },

    #[error("identity collision in {table}: {key}")]
    IdentityCollision { table: String, key: String },

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("core error: {0}")]
    Core(#[from] specmerge_core::CoreError),
}
