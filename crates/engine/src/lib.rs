pub mod authoring;
pub mod effective;
pub mod error;
pub mod provider;
pub mod resolve;
pub mod session;

pub use authoring::{AuthoringSession, EditSurface, SelectionMode, WidgetStrategy};
pub use effective::{Diagnostic, EffectiveRecord, Reference, ResolveContext};
pub use error::EngineError;
pub use provider::{RecordProvider, SettingsProvider};
pub use resolve::Resolver;
pub use session::{AuthoringKey, SessionManager};

use overref_core::{
    CanonicalRecord, Cardinality, EntityId, FieldSet, OverrideMap, PropertyPath, RecordView,
    ReferenceFieldDefinition, ReferenceKind, ViewOrigin,
};
use overref_storage::{ReferenceItem, SqliteStorage, Storage};

pub struct Engine {
    storage: SqliteStorage,
    sessions: SessionManager,
}

impl Engine {
    pub fn new(storage: SqliteStorage) -> Self {
        Self {
            storage,
            sessions: SessionManager::new(),
        }
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut SqliteStorage {
        &mut self.storage
    }

    fn resolver(&self) -> Resolver<'_, SqliteStorage, SqliteStorage> {
        Resolver::new(&self.storage, &self.storage)
    }

    fn require_record(&self, entity_id: EntityId) -> Result<CanonicalRecord, EngineError> {
        self.storage
            .get_record(entity_id)?
            .ok_or_else(|| EngineError::RecordNotFound(entity_id.to_string()))
    }

    /// Definition of `field_name` on the host's bundle.
    fn require_field(
        &self,
        host: &CanonicalRecord,
        field_name: &str,
    ) -> Result<ReferenceFieldDefinition, EngineError> {
        self.storage
            .get_reference_field(&host.entity_type, &host.bundle, field_name)?
            .ok_or_else(|| {
                EngineError::ReferenceFieldNotFound(format!(
                    "{}.{}.{field_name}",
                    host.entity_type, host.bundle
                ))
            })
    }

    // ========================================================================
    // Records
    // ========================================================================

    pub fn create_record(&mut self, record: &CanonicalRecord) -> Result<EntityId, EngineError> {
        self.storage.insert_record(record)?;
        tracing::debug!(entity_id = %record.id, entity_type = %record.entity_type, bundle = %record.bundle, "record created");
        Ok(record.id)
    }

    pub fn get_record(&self, entity_id: EntityId) -> Result<CanonicalRecord, EngineError> {
        self.require_record(entity_id)
    }

    /// Adds or replaces a translation. Fields not given are copied from the
    /// default translation.
    pub fn add_translation(
        &mut self,
        entity_id: EntityId,
        langcode: &str,
        fields: FieldSet,
    ) -> Result<(), EngineError> {
        let mut record = self.require_record(entity_id)?;
        record.add_translation(langcode, fields);
        self.storage.save_record(&record)?;
        Ok(())
    }

    /// Writes an edited translation view back to its record.
    ///
    /// Views produced through a reference's overrides are read-only and
    /// are refused, so overridden values never leak into canonical data.
    pub fn save_view(&mut self, view: &RecordView) -> Result<(), EngineError> {
        if let ViewOrigin::Override(path) = view.origin() {
            tracing::warn!(entity_id = %view.id, property_path = %path, "refusing to save overridden view");
            return Err(EngineError::ReadOnlyView {
                entity_id: view.id.to_string(),
                property_path: path.to_string(),
            });
        }
        let mut record = self.require_record(view.id)?;
        if !record.has_translation(&view.langcode) {
            return Err(EngineError::TranslationNotFound {
                entity_id: view.id.to_string(),
                langcode: view.langcode.clone(),
            });
        }
        record.store_view(view.clone());
        self.storage.save_record(&record)?;
        Ok(())
    }

    /// Deletes a record with the references it hosts.
    pub fn delete_record(&mut self, entity_id: EntityId) -> Result<bool, EngineError> {
        Ok(self.storage.delete_record(entity_id)?)
    }

    // ========================================================================
    // Reference Fields
    // ========================================================================

    pub fn define_reference_field(
        &mut self,
        definition: &ReferenceFieldDefinition,
    ) -> Result<(), EngineError> {
        self.storage.define_reference_field(definition)?;
        Ok(())
    }

    pub fn reference_field(
        &self,
        entity_type: &str,
        bundle: &str,
        field_name: &str,
    ) -> Result<ReferenceFieldDefinition, EngineError> {
        self.storage
            .get_reference_field(entity_type, bundle, field_name)?
            .ok_or_else(|| {
                EngineError::ReferenceFieldNotFound(format!("{entity_type}.{bundle}.{field_name}"))
            })
    }

    /// Points a host's reference field at `targets`, in delta order.
    ///
    /// A delta that keeps its previous target keeps its overrides; any
    /// other delta starts without overrides.
    pub fn set_references(
        &mut self,
        host_id: EntityId,
        langcode: &str,
        field_name: &str,
        targets: &[EntityId],
    ) -> Result<(), EngineError> {
        let host = self.require_record(host_id)?;
        let definition = self.require_field(&host, field_name)?;
        if let Cardinality::Limited(limit) = definition.cardinality
            && targets.len() > limit as usize
        {
            return Err(EngineError::CardinalityExceeded {
                field: field_name.to_string(),
                count: targets.len(),
                limit,
            });
        }

        let previous = self.storage.get_reference_items(host_id, langcode, field_name)?;
        let items: Vec<ReferenceItem> = targets
            .iter()
            .enumerate()
            .map(|(delta, target_id)| {
                let item = ReferenceItem::new(*target_id);
                if definition.kind == ReferenceKind::Plain {
                    return item;
                }
                let kept = previous
                    .iter()
                    .find(|p| p.delta as usize == delta && p.target_id == *target_id)
                    .and_then(|p| p.override_map.clone());
                item.with_override_map(kept.unwrap_or_else(|| OverrideMap::EMPTY_SENTINEL.to_string()))
            })
            .collect();
        self.storage
            .set_reference_items(host_id, langcode, field_name, &items)?;
        Ok(())
    }

    /// Stores raw override JSON on one slot. Malformed text is an error.
    pub fn set_override_json(
        &mut self,
        host_id: EntityId,
        langcode: &str,
        field_name: &str,
        delta: u32,
        raw: &str,
    ) -> Result<(), EngineError> {
        let map = OverrideMap::parse(raw)?;
        self.set_override_map(host_id, langcode, field_name, delta, &map)
    }

    /// Stores an override map on one slot, last write wins.
    ///
    /// Every field must be allow-listed for the target's bundle.
    pub fn set_override_map(
        &mut self,
        host_id: EntityId,
        langcode: &str,
        field_name: &str,
        delta: u32,
        map: &OverrideMap,
    ) -> Result<(), EngineError> {
        let host = self.require_record(host_id)?;
        let definition = self.require_field(&host, field_name)?;
        let path = PropertyPath::new(&host.entity_type, &host.bundle, field_name, delta);
        if definition.kind != ReferenceKind::Override {
            return Err(EngineError::OverridesNotSupported(path.to_string()));
        }

        let item = self
            .storage
            .get_reference_item(host_id, langcode, field_name, delta)?
            .ok_or_else(|| EngineError::ReferenceNotFound(format!("{path} ({langcode})")))?;
        if !map.is_empty() {
            let target = self
                .storage
                .get_record(item.target_id)?
                .ok_or_else(|| EngineError::MissingTarget(item.target_id.to_string()))?;
            if let Some(field) = map
                .fields()
                .find(|f| !definition.settings.is_overridable(&target.bundle, f))
            {
                return Err(EngineError::FieldNotOverridable {
                    field: field.to_string(),
                    property_path: path.to_string(),
                });
            }
        }

        self.storage.set_override_map(
            host_id,
            langcode,
            field_name,
            delta,
            &map.to_json_string(),
        )?;
        tracing::debug!(property_path = %path, langcode, fields = map.len(), "override map stored");
        Ok(())
    }

    /// Plain reference field to override-capable, see
    /// [`Storage::upgrade_reference_field`].
    pub fn upgrade_reference_field(
        &mut self,
        entity_type: &str,
        bundle: &str,
        field_name: &str,
    ) -> Result<usize, EngineError> {
        let touched = self
            .storage
            .upgrade_reference_field(entity_type, bundle, field_name)?;
        tracing::info!(entity_type, bundle, field_name, items = touched, "reference field upgraded");
        Ok(touched)
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Loads one slot as a [`Reference`].
    pub fn load_reference(
        &self,
        host_id: EntityId,
        langcode: &str,
        field_name: &str,
        delta: u32,
    ) -> Result<Reference, EngineError> {
        let host = self.require_record(host_id)?;
        let stored = self
            .storage
            .get_reference_item(host_id, langcode, field_name, delta)?
            .ok_or_else(|| {
                EngineError::ReferenceNotFound(format!(
                    "{} ({langcode})",
                    PropertyPath::new(&host.entity_type, &host.bundle, field_name, delta)
                ))
            })?;
        Ok(Reference::from_stored(&stored, &host.entity_type, &host.bundle))
    }

    /// All slots of a host's reference field, in delta order.
    pub fn load_references(
        &self,
        host_id: EntityId,
        langcode: &str,
        field_name: &str,
    ) -> Result<Vec<Reference>, EngineError> {
        let host = self.require_record(host_id)?;
        Ok(self
            .storage
            .get_reference_items(host_id, langcode, field_name)?
            .iter()
            .map(|stored| Reference::from_stored(stored, &host.entity_type, &host.bundle))
            .collect())
    }

    /// The referenced record as seen through `reference`. `None` when the
    /// target no longer exists.
    pub fn resolve_effective(
        &self,
        reference: &Reference,
        context: &ResolveContext,
    ) -> Option<EffectiveRecord> {
        self.resolver().apply(reference, context)
    }

    pub fn resolve_slot(
        &self,
        host_id: EntityId,
        langcode: &str,
        field_name: &str,
        delta: u32,
        context: &ResolveContext,
    ) -> Result<Option<EffectiveRecord>, EngineError> {
        let reference = self.load_reference(host_id, langcode, field_name, delta)?;
        Ok(self.resolve_effective(&reference, context))
    }

    /// Effective records of every slot of a field. Slots whose target is
    /// gone are skipped.
    pub fn resolve_field(
        &self,
        host_id: EntityId,
        langcode: &str,
        field_name: &str,
        context: &ResolveContext,
    ) -> Result<Vec<EffectiveRecord>, EngineError> {
        let resolver = self.resolver();
        Ok(self
            .load_references(host_id, langcode, field_name)?
            .iter()
            .filter_map(|reference| resolver.apply(reference, context))
            .collect())
    }

    // ========================================================================
    // Authoring
    // ========================================================================

    /// Slots of a stored host that `strategy` offers override editing for.
    pub fn overridable_slots(
        &self,
        host_id: EntityId,
        langcode: &str,
        field_name: &str,
        strategy: &WidgetStrategy,
    ) -> Result<Vec<PropertyPath>, EngineError> {
        let host = self.require_record(host_id)?;
        let definition = self.require_field(&host, field_name)?;
        if definition.kind != ReferenceKind::Override {
            return Ok(Vec::new());
        }
        let items = self.storage.get_reference_items(host_id, langcode, field_name)?;
        Ok(strategy
            .overridable_deltas(false, items.len())
            .into_iter()
            .map(|delta| PropertyPath::new(&host.entity_type, &host.bundle, field_name, delta))
            .collect())
    }

    /// Opens an override form for one slot and returns its handle.
    ///
    /// The session snapshots the canonical translation and the slot's
    /// current effective values. Reopening the same slot replaces the
    /// previous session.
    pub fn open_authoring(
        &mut self,
        host_id: EntityId,
        langcode: &str,
        field_name: &str,
        delta: u32,
        strategy: &WidgetStrategy,
    ) -> Result<AuthoringKey, EngineError> {
        let host = self.require_record(host_id)?;
        let definition = self.require_field(&host, field_name)?;
        let reference = self.load_reference(host_id, langcode, field_name, delta)?;
        let path = reference.property_path.clone();
        if definition.kind != ReferenceKind::Override {
            return Err(EngineError::OverridesNotSupported(path.to_string()));
        }
        let item_count = self.storage.get_reference_items(host_id, langcode, field_name)?.len();
        if !strategy.overridable_deltas(false, item_count).contains(&delta) {
            return Err(EngineError::SlotNotEditable(path.to_string()));
        }

        let target = self
            .storage
            .get_record(reference.target_id)?
            .ok_or_else(|| EngineError::MissingTarget(reference.target_id.to_string()))?;
        let (canonical, _) = target.select_view(Some(langcode));
        let effective = self
            .resolver()
            .apply_to(&target, &reference, &ResolveContext::in_language(langcode));

        let allowed: Vec<String> = definition
            .settings
            .allowed_fields(&target.bundle)
            .into_iter()
            .filter(|f| canonical.fields.contains_key(*f))
            .map(str::to_string)
            .collect();
        let current = effective.view().restricted_to(allowed.iter().map(String::as_str));
        let host_label = host.label().unwrap_or_default();
        let host_key = host_id.to_string();
        let session = AuthoringSession::new(
            strategy.widget_id(field_name, delta, &[host_key.as_str(), langcode]),
            host_id,
            target.id,
            langcode.to_string(),
            path.clone(),
            strategy.form_mode.clone(),
            strategy.dialog_title(&target.entity_type, &host.bundle, host_label),
            allowed,
            canonical.fields,
            current,
        );

        let key = self.sessions.open(session);
        tracing::debug!(property_path = %path, session = ?key, "authoring session opened");
        Ok(key)
    }

    pub fn authoring_session(&self, key: &AuthoringKey) -> Option<&AuthoringSession> {
        self.sessions.get(key)
    }

    /// Diffs the submitted values against the session's canonical snapshot
    /// and stores the resulting override map. The session is closed on
    /// success.
    pub fn submit_authoring(
        &mut self,
        key: &AuthoringKey,
        edited: FieldSet,
    ) -> Result<OverrideMap, EngineError> {
        let session = self.sessions.get(key).ok_or(EngineError::SessionNotFound)?;
        let map = session.overrides_for(edited)?;
        let (host_id, langcode, path) = (
            session.host_id(),
            session.langcode().to_string(),
            session.property_path().clone(),
        );

        self.set_override_map(host_id, &langcode, &path.field_name, path.delta, &map)?;
        self.sessions.close(key);
        Ok(map)
    }

    pub fn cancel_authoring(&mut self, key: &AuthoringKey) -> bool {
        self.sessions.close(key).is_some()
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }
}
