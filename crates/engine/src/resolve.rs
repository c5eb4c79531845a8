//! Builds the effective record of a reference slot.
//!
//! Read paths never fail: a missing target yields `None`, everything else
//! degrades towards the canonical record and is reported through `tracing`
//! and the record's diagnostics.

use overref_core::cache::record_tag;
use overref_core::{CacheMetadata, CanonicalRecord, ReferenceKind, merge_report};

use crate::effective::{Diagnostic, EffectiveRecord, Reference, ResolveContext};
use crate::provider::{RecordProvider, SettingsProvider};

pub struct Resolver<'a, R: ?Sized, S: ?Sized> {
    records: &'a R,
    settings: &'a S,
}

impl<'a, R, S> Resolver<'a, R, S>
where
    R: RecordProvider + ?Sized,
    S: SettingsProvider + ?Sized,
{
    pub fn new(records: &'a R, settings: &'a S) -> Self {
        Self { records, settings }
    }

    /// Merges the reference's overrides onto one canonical snapshot of its
    /// target.
    pub fn apply(&self, reference: &Reference, context: &ResolveContext) -> Option<EffectiveRecord> {
        let path = &reference.property_path;

        let canonical = match self.records.load_record(reference.target_id) {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::warn!(target_id = %reference.target_id, property_path = %path, "referenced record missing");
                return None;
            }
            Err(e) => {
                tracing::warn!(target_id = %reference.target_id, property_path = %path, error = %e, "failed to load referenced record");
                return None;
            }
        };
        Some(self.apply_to(&canonical, reference, context))
    }

    /// Like [`Resolver::apply`], over a target the caller already loaded.
    pub fn apply_to(
        &self,
        canonical: &CanonicalRecord,
        reference: &Reference,
        context: &ResolveContext,
    ) -> EffectiveRecord {
        let path = &reference.property_path;

        let mut diagnostics = Vec::new();
        if let Some(err) = reference.malformed() {
            tracing::warn!(property_path = %path, error = %err, "ignoring malformed override map");
            diagnostics.push(Diagnostic::MalformedOverrideMap(err.to_string()));
        }

        let requested = context.langcode.as_deref().unwrap_or(&reference.langcode);
        let (mut view, fell_back) = canonical.select_view(Some(requested));
        if fell_back {
            tracing::debug!(target_id = %canonical.id, requested, used = %view.langcode, "translation missing, using default");
            diagnostics.push(Diagnostic::LanguageFallback {
                requested: requested.to_string(),
                used: view.langcode.clone(),
            });
        }

        let mut cache = CacheMetadata::new();
        cache.add_tag(record_tag(&canonical.entity_type, canonical.id));

        if reference.override_map.is_empty() {
            return EffectiveRecord::new(view, cache, None, Vec::new(), diagnostics);
        }

        let definition = match self
            .settings
            .reference_field(&path.entity_type, &path.bundle, &path.field_name)
        {
            Ok(definition) => definition,
            Err(e) => {
                tracing::warn!(property_path = %path, error = %e, "failed to load field settings, ignoring overrides");
                None
            }
        };
        let definition = definition.filter(|d| d.kind == ReferenceKind::Override);

        let mut overridden = Vec::new();
        for (field, overrides) in reference.override_map.iter() {
            let allowed = definition
                .as_ref()
                .is_some_and(|d| d.settings.is_overridable(&canonical.bundle, field));
            if !allowed {
                tracing::debug!(property_path = %path, field, "dropping override outside the allow-list");
                diagnostics.push(Diagnostic::DisallowedField(field.to_string()));
                continue;
            }
            let Some(current) = view.fields.get(field) else {
                tracing::debug!(property_path = %path, field, "dropping override for unknown field");
                diagnostics.push(Diagnostic::UnknownField(field.to_string()));
                continue;
            };

            let (merged, dropped) = merge_report(current, overrides);
            for key_path in dropped {
                tracing::debug!(property_path = %path, field, key = %key_path, "dropping stale override key");
                diagnostics.push(Diagnostic::StaleKey {
                    field: field.to_string(),
                    path: key_path,
                });
            }
            view.fields.insert(field.to_string(), merged);
            overridden.push(field.to_string());
        }

        if overridden.is_empty() {
            return EffectiveRecord::new(view, cache, None, Vec::new(), diagnostics);
        }

        cache.add_tag(record_tag(&path.entity_type, reference.host_id));
        cache.add_key(path.cache_key());
        let view = view.into_override_view(path.clone());
        EffectiveRecord::new(view, cache, Some(path.clone()), overridden, diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::BTreeMap;

    use overref_core::{
        CanonicalRecord, EntityId, FieldOverrideSettings, FieldSet, OverrideMap, PropertyPath,
        ReferenceFieldDefinition, Tree,
    };

    use super::*;
    use crate::error::EngineError;

    #[derive(Default)]
    struct Fixture {
        records: BTreeMap<EntityId, CanonicalRecord>,
        fields: Vec<ReferenceFieldDefinition>,
        fail_settings: bool,
        loads: Cell<usize>,
    }

    impl RecordProvider for Fixture {
        fn load_record(&self, entity_id: EntityId) -> Result<Option<CanonicalRecord>, EngineError> {
            self.loads.set(self.loads.get() + 1);
            Ok(self.records.get(&entity_id).cloned())
        }
    }

    impl SettingsProvider for Fixture {
        fn reference_field(
            &self,
            entity_type: &str,
            bundle: &str,
            field_name: &str,
        ) -> Result<Option<ReferenceFieldDefinition>, EngineError> {
            if self.fail_settings {
                return Err(EngineError::ReferenceFieldNotFound(field_name.to_string()));
            }
            Ok(self
                .fields
                .iter()
                .find(|d| d.entity_type == entity_type && d.bundle == bundle && d.field_name == field_name)
                .cloned())
        }
    }

    fn t(raw: &str) -> Tree {
        Tree::from_json_str(raw).unwrap()
    }

    fn fixture() -> (Fixture, EntityId) {
        let mut record = CanonicalRecord::new("media", "document", "en")
            .with_field("name", t(r#"[{"value": "Original name"}]"#))
            .with_field("field_description", t(r#"[{"value": "Original description"}]"#))
            .with_field("field_media_file", t(r#"[{"target_id": 7, "description": ""}]"#));
        record.add_translation(
            "de",
            FieldSet::from([("name".to_string(), t(r#"[{"value": "Originalname"}]"#))]),
        );
        let id = record.id;

        let settings = FieldOverrideSettings::new()
            .allow("document", ["name", "field_media_file"]);
        let mut fixture = Fixture::default();
        fixture.records.insert(id, record);
        fixture.fields.push(
            ReferenceFieldDefinition::new("node", "article", "field_media", "media")
                .with_settings(settings),
        );
        (fixture, id)
    }

    fn reference(target: EntityId, raw: &str) -> Reference {
        Reference::new(
            target,
            EntityId::new(),
            "en",
            PropertyPath::new("node", "article", "field_media", 0),
        )
        .with_override_map(OverrideMap::parse(raw).unwrap())
    }

    #[test]
    fn preloaded_target_is_used_as_is() {
        let (fixture, id) = fixture();
        let record = fixture.records[&id].clone();
        let resolver = Resolver::new(&fixture, &fixture);
        let reference = reference(id, r#"{"name": [{"value": "Overridden"}]}"#);

        let effective = resolver.apply_to(&record, &reference, &ResolveContext::new());
        assert_eq!(fixture.loads.get(), 0);
        assert_eq!(effective.get("name"), Some(&t(r#"[{"value": "Overridden"}]"#)));

        resolver.apply(&reference, &ResolveContext::new()).unwrap();
        assert_eq!(fixture.loads.get(), 1);
    }

    #[test]
    fn empty_map_passes_canonical_through() {
        let (fixture, id) = fixture();
        let resolver = Resolver::new(&fixture, &fixture);
        let effective = resolver.apply(&reference(id, "{}"), &ResolveContext::new()).unwrap();

        assert!(!effective.is_overridden());
        assert!(!effective.view().is_read_only());
        assert_eq!(effective.cache().tags().collect::<Vec<_>>(), vec![format!("media:{id}")]);
        assert_eq!(effective.cache().keys().count(), 0);
        assert_eq!(effective.get("name"), fixture.records[&id].default_fields().get("name"));
    }

    #[test]
    fn overrides_merge_per_delta() {
        let (fixture, id) = fixture();
        let resolver = Resolver::new(&fixture, &fixture);
        let effective = resolver
            .apply(
                &reference(id, r#"{"field_media_file": [{"description": "Nice description!"}]}"#),
                &ResolveContext::new(),
            )
            .unwrap();

        assert_eq!(
            effective.get("field_media_file"),
            Some(&t(r#"[{"target_id": 7, "description": "Nice description!"}]"#))
        );
        assert!(effective.view().is_read_only());
        assert!(effective.cache().has_key("override:node:article.field_media.0"));
        assert_eq!(effective.overridden_fields(), ["field_media_file".to_string()]);
    }

    #[test]
    fn disallowed_fields_are_dropped() {
        let (fixture, id) = fixture();
        let resolver = Resolver::new(&fixture, &fixture);
        let effective = resolver
            .apply(
                &reference(id, r#"{"field_description": [{"value": "Overridden"}]}"#),
                &ResolveContext::new(),
            )
            .unwrap();

        assert_eq!(
            effective.get("field_description"),
            Some(&t(r#"[{"value": "Original description"}]"#))
        );
        assert!(!effective.is_overridden());
        assert_eq!(
            effective.diagnostics(),
            [Diagnostic::DisallowedField("field_description".into())]
        );
    }

    #[test]
    fn stale_keys_are_reported() {
        let (fixture, id) = fixture();
        let resolver = Resolver::new(&fixture, &fixture);
        let effective = resolver
            .apply(
                &reference(id, r#"{"name": {"0": {"value": "New"}, "3": {"value": "gone"}}}"#),
                &ResolveContext::new(),
            )
            .unwrap();

        assert_eq!(effective.get("name"), Some(&t(r#"[{"value": "New"}]"#)));
        assert!(matches!(
            &effective.diagnostics()[0],
            Diagnostic::StaleKey { field, path } if field == "name" && path.to_string() == "3"
        ));
    }

    #[test]
    fn missing_translation_falls_back() {
        let (fixture, id) = fixture();
        let resolver = Resolver::new(&fixture, &fixture);
        let effective = resolver
            .apply(&reference(id, "{}"), &ResolveContext::in_language("fr"))
            .unwrap();
        assert_eq!(effective.langcode(), "en");
        assert!(matches!(effective.diagnostics()[0], Diagnostic::LanguageFallback { .. }));
    }

    #[test]
    fn reference_language_selects_translation() {
        let (fixture, id) = fixture();
        let resolver = Resolver::new(&fixture, &fixture);
        let mut reference = reference(id, r#"{"name": [{"value": "Überschrieben"}]}"#);
        reference.langcode = "de".into();
        let effective = resolver.apply(&reference, &ResolveContext::new()).unwrap();
        assert_eq!(effective.langcode(), "de");
        assert_eq!(effective.get("name"), Some(&t(r#"[{"value": "Überschrieben"}]"#)));
    }

    #[test]
    fn missing_target_is_none() {
        let (fixture, _) = fixture();
        let resolver = Resolver::new(&fixture, &fixture);
        assert!(resolver.apply(&reference(EntityId::new(), "{}"), &ResolveContext::new()).is_none());
    }

    #[test]
    fn settings_failure_degrades_to_canonical() {
        let (mut fixture, id) = fixture();
        fixture.fail_settings = true;
        let resolver = Resolver::new(&fixture, &fixture);
        let effective = resolver
            .apply(&reference(id, r#"{"name": [{"value": "x"}]}"#), &ResolveContext::new())
            .unwrap();
        assert!(!effective.is_overridden());
        assert_eq!(effective.get("name"), Some(&t(r#"[{"value": "Original name"}]"#)));
    }
}
