pub mod error;
pub mod import;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use error::StorageError;
pub use import::{stage_csv, stage_csv_set};
pub use schema::StorageOptions;
pub use sqlite::SqliteDataset;
pub use traits::Dataset;
