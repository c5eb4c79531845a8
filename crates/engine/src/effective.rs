use overref_core::{
    CacheMetadata, EntityId, KeyPath, OverrideMap, PropertyPath, RecordView, Tree,
};
use overref_storage::StoredReference;

/// A reference slot together with the overrides stored on it.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub target_id: EntityId,
    pub host_id: EntityId,
    /// Language of the referencing translation that owns this slot.
    pub langcode: String,
    pub property_path: PropertyPath,
    pub override_map: OverrideMap,
    /// Parse error of the stored override text, if it was unreadable.
    malformed: Option<String>,
}

impl Reference {
    pub fn new(
        target_id: EntityId,
        host_id: EntityId,
        langcode: impl Into<String>,
        property_path: PropertyPath,
    ) -> Self {
        Self {
            target_id,
            host_id,
            langcode: langcode.into(),
            property_path,
            override_map: OverrideMap::new(),
            malformed: None,
        }
    }

    pub fn with_override_map(mut self, override_map: OverrideMap) -> Self {
        self.override_map = override_map;
        self
    }

    /// Builds a reference from a stored item on a host of `host_type`/`host_bundle`.
    ///
    /// Unreadable override text degrades to the empty map; the parse error
    /// is kept and surfaces as a diagnostic when the reference is resolved.
    pub fn from_stored(stored: &StoredReference, host_type: &str, host_bundle: &str) -> Self {
        let property_path =
            PropertyPath::new(host_type, host_bundle, stored.field_name.as_str(), stored.delta);
        let mut reference = Self::new(
            stored.target_id,
            stored.host_id,
            stored.langcode.as_str(),
            property_path,
        );
        if let Some(raw) = stored.override_map.as_deref() {
            let (map, err) = OverrideMap::parse_or_empty(raw);
            reference.override_map = map;
            reference.malformed = err.map(|e| e.to_string());
        }
        reference
    }

    pub fn malformed(&self) -> Option<&str> {
        self.malformed.as_deref()
    }
}

/// Request-scoped options for resolving a reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveContext {
    /// Language to render in. Defaults to the reference's own language.
    pub langcode: Option<String>,
}

impl ResolveContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_language(langcode: impl Into<String>) -> Self {
        Self {
            langcode: Some(langcode.into()),
        }
    }
}

/// Something the resolver skipped or fell back on while building a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// The requested translation does not exist.
    LanguageFallback { requested: String, used: String },
    /// Stored override text could not be parsed and was ignored.
    MalformedOverrideMap(String),
    /// Override for a field outside the allow-list.
    DisallowedField(String),
    /// Override for a field the canonical record does not have.
    UnknownField(String),
    /// Override key with no counterpart in the canonical field value.
    StaleKey { field: String, path: KeyPath },
}

/// The referenced record as seen from one reference slot.
///
/// Never persisted. When overrides were applied the view is read-only and
/// the cache metadata carries the slot's property-path key.
#[derive(Debug, Clone)]
pub struct EffectiveRecord {
    view: RecordView,
    cache: CacheMetadata,
    property_path: Option<PropertyPath>,
    overridden: Vec<String>,
    diagnostics: Vec<Diagnostic>,
}

impl EffectiveRecord {
    pub(crate) fn new(
        view: RecordView,
        cache: CacheMetadata,
        property_path: Option<PropertyPath>,
        overridden: Vec<String>,
        diagnostics: Vec<Diagnostic>,
    ) -> Self {
        Self {
            view,
            cache,
            property_path,
            overridden,
            diagnostics,
        }
    }

    pub fn view(&self) -> &RecordView {
        &self.view
    }

    pub fn into_view(self) -> RecordView {
        self.view
    }

    pub fn id(&self) -> EntityId {
        self.view.id
    }

    pub fn langcode(&self) -> &str {
        &self.view.langcode
    }

    pub fn get(&self, field: &str) -> Option<&Tree> {
        self.view.get(field)
    }

    pub fn cache(&self) -> &CacheMetadata {
        &self.cache
    }

    /// Slot whose overrides produced this record. `None` for the plain
    /// canonical record.
    pub fn property_path(&self) -> Option<&PropertyPath> {
        self.property_path.as_ref()
    }

    pub fn is_overridden(&self) -> bool {
        self.property_path.is_some()
    }

    /// Fields that received override values.
    pub fn overridden_fields(&self) -> &[String] {
        &self.overridden
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}
