//! Lookup seams used by the [`Resolver`](crate::Resolver).
//!
//! The resolver never talks to storage directly, so it can run against
//! anything that can hand out canonical records and field settings.

use overref_core::{CanonicalRecord, EntityId, ReferenceFieldDefinition};
use overref_storage::{SqliteStorage, Storage};

use crate::error::EngineError;

pub trait RecordProvider {
    fn load_record(&self, entity_id: EntityId) -> Result<Option<CanonicalRecord>, EngineError>;
}

pub trait SettingsProvider {
    fn reference_field(
        &self,
        entity_type: &str,
        bundle: &str,
        field_name: &str,
    ) -> Result<Option<ReferenceFieldDefinition>, EngineError>;
}

impl RecordProvider for SqliteStorage {
    fn load_record(&self, entity_id: EntityId) -> Result<Option<CanonicalRecord>, EngineError> {
        Ok(self.get_record(entity_id)?)
    }
}

impl SettingsProvider for SqliteStorage {
    fn reference_field(
        &self,
        entity_type: &str,
        bundle: &str,
        field_name: &str,
    ) -> Result<Option<ReferenceFieldDefinition>, EngineError> {
        Ok(self.get_reference_field(entity_type, bundle, field_name)?)
    }
}
