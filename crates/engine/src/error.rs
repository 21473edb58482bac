use specmerge_core::{CoreError, Watermark};
use specmerge_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("source instance has not been staged")]
    SourceNotStaged,

    #[error("snapshot published at {published} is not newer than the stored watermark {stored}")]
    SnapshotNotNewer {
        published: Watermark,
        stored: Watermark,
    },

    #[error("{0} conflicts are still undecided")]
    UndecidedConflicts(usize),

    #[error("no conflict for {entity} key {key}")]
    UnknownConflict { entity: String, key: String },

    #[error("merge session is already {0}")]
    SessionClosed(&'static str),
}
