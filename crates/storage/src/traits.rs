use overref_core::{CanonicalRecord, EntityId, ReferenceFieldDefinition};

use crate::error::StorageError;

/// One item written to a reference field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceItem {
    pub target_id: EntityId,
    /// Raw override map text. `None` for plain reference fields.
    pub override_map: Option<String>,
}

impl ReferenceItem {
    pub fn new(target_id: EntityId) -> Self {
        Self {
            target_id,
            override_map: None,
        }
    }

    pub fn with_override_map(mut self, raw: impl Into<String>) -> Self {
        self.override_map = Some(raw.into());
        self
    }
}

/// A reference item as read back from storage, with its slot coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredReference {
    pub host_id: EntityId,
    pub langcode: String,
    pub field_name: String,
    pub delta: u32,
    pub target_id: EntityId,
    pub override_map: Option<String>,
}

pub trait Storage {
    /// Inserts a new record with all translations. Fails on id collision.
    fn insert_record(&mut self, record: &CanonicalRecord) -> Result<(), StorageError>;

    /// Inserts or replaces a record and all of its translations.
    fn save_record(&mut self, record: &CanonicalRecord) -> Result<(), StorageError>;

    fn get_record(&self, entity_id: EntityId) -> Result<Option<CanonicalRecord>, StorageError>;

    /// Deletes a record and the reference items it hosts. Items elsewhere
    /// that point at it are left dangling.
    fn delete_record(&mut self, entity_id: EntityId) -> Result<bool, StorageError>;

    fn define_reference_field(
        &mut self,
        definition: &ReferenceFieldDefinition,
    ) -> Result<(), StorageError>;

    fn get_reference_field(
        &self,
        entity_type: &str,
        bundle: &str,
        field_name: &str,
    ) -> Result<Option<ReferenceFieldDefinition>, StorageError>;

    /// Replaces every delta of a host's reference field in one language.
    fn set_reference_items(
        &mut self,
        host_id: EntityId,
        langcode: &str,
        field_name: &str,
        items: &[ReferenceItem],
    ) -> Result<(), StorageError>;

    fn get_reference_items(
        &self,
        host_id: EntityId,
        langcode: &str,
        field_name: &str,
    ) -> Result<Vec<StoredReference>, StorageError>;

    fn get_reference_item(
        &self,
        host_id: EntityId,
        langcode: &str,
        field_name: &str,
        delta: u32,
    ) -> Result<Option<StoredReference>, StorageError>;

    /// Overwrites the override map text of one existing item.
    fn set_override_map(
        &mut self,
        host_id: EntityId,
        langcode: &str,
        field_name: &str,
        delta: u32,
        raw: &str,
    ) -> Result<(), StorageError>;

    /// Turns a plain reference field into an override-capable one and gives
    /// its existing items the empty override map. Returns the number of
    /// items touched.
    fn upgrade_reference_field(
        &mut self,
        entity_type: &str,
        bundle: &str,
        field_name: &str,
    ) -> Result<usize, StorageError>;
}
