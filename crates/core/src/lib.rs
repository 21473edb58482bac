pub mod error;
pub mod ids;
pub mod policy;
pub mod record;
pub mod schema;
pub mod watermark;

pub use error::CoreError;
pub use ids::{Fingerprint, MergeId};
pub use policy::{DirectionPolicy, MergeMode};
pub use record::{IdentityKey, Record};
pub use schema::{EntityDescriptor, EntityKind, InstanceRole, LAST_MODIFIED};
pub use watermark::{DiffScope, Watermark};
