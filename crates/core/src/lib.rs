pub mod cache;
pub mod diff;
pub mod error;
pub mod field_value;
pub mod ids;
pub mod merge;
pub mod override_map;
pub mod property_path;
pub mod record;
pub mod settings;
pub mod tree;

pub use cache::CacheMetadata;
pub use diff::{diff, overridden_values};
pub use error::CoreError;
pub use field_value::FieldValue;
pub use ids::EntityId;
pub use merge::{merge, merge_report, retain_known, retain_known_report};
pub use override_map::OverrideMap;
pub use property_path::PropertyPath;
pub use record::{CanonicalRecord, FieldSet, RecordView, ViewOrigin};
pub use settings::{Cardinality, FieldOverrideSettings, ReferenceFieldDefinition, ReferenceKind};
pub use tree::{Key, KeyPath, Tree};
