use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error("unknown field {field} on {entity}")]
    UnknownField { entity: String, field: String },

    #[error("{entity} record has {actual} values, expected {expected}")]
    FieldCountMismatch {
        entity: String,
        expected: usize,
        actual: usize,
    },

    #[error("invalid timestamp {value:?}: {reason}")]
    InvalidTimestamp { value: String, reason: String },
}
