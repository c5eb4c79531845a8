use overref_core::CoreError;
use overref_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("translation not found: {entity_id}/{langcode}")]
    TranslationNotFound { entity_id: String, langcode: String },

    #[error("reference field not found: {0}")]
    ReferenceFieldNotFound(String),

    #[error("reference not found: {0}")]
    ReferenceNotFound(String),

    #[error("field {field} is not overridable through {property_path}")]
    FieldNotOverridable { field: String, property_path: String },

    #[error("reference field does not store overrides: {0}")]
    OverridesNotSupported(String),

    #[error("too many references for {field}: {count} > {limit}")]
    CardinalityExceeded { field: String, count: usize, limit: u32 },

    #[error("referenced record missing: {0}")]
    MissingTarget(String),

    #[error("record {entity_id} viewed through {property_path} is read-only")]
    ReadOnlyView { entity_id: String, property_path: String },

    #[error("slot {0} cannot be overridden by this widget")]
    SlotNotEditable(String),

    #[error("authoring session not found")]
    SessionNotFound,
}
