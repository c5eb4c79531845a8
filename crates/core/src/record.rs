use std::collections::BTreeMap;

use crate::ids::EntityId;
use crate::property_path::PropertyPath;
use crate::tree::{Key, Tree};

/// Field name to value tree, for one translation of a record.
pub type FieldSet = BTreeMap<String, Tree>;

/// A stored record with all of its translations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRecord {
    pub id: EntityId,
    pub entity_type: String,
    pub bundle: String,
    pub default_langcode: String,
    translations: BTreeMap<String, FieldSet>,
}

impl CanonicalRecord {
    pub fn new(
        entity_type: impl Into<String>,
        bundle: impl Into<String>,
        default_langcode: impl Into<String>,
    ) -> Self {
        Self::with_id(EntityId::new(), entity_type, bundle, default_langcode)
    }

    pub fn with_id(
        id: EntityId,
        entity_type: impl Into<String>,
        bundle: impl Into<String>,
        default_langcode: impl Into<String>,
    ) -> Self {
        let default_langcode = default_langcode.into();
        let mut translations = BTreeMap::new();
        translations.insert(default_langcode.clone(), FieldSet::new());
        Self {
            id,
            entity_type: entity_type.into(),
            bundle: bundle.into(),
            default_langcode,
            translations,
        }
    }

    /// Sets a field on the default translation.
    pub fn with_field(mut self, field: impl Into<String>, value: Tree) -> Self {
        let langcode = self.default_langcode.clone();
        self.set_field(&langcode, field, value);
        self
    }

    /// Sets a field on `langcode`, creating the translation if needed.
    pub fn set_field(&mut self, langcode: &str, field: impl Into<String>, value: Tree) {
        self.translations
            .entry(langcode.to_string())
            .or_default()
            .insert(field.into(), value);
    }

    /// Adds a translation. Fields missing from `fields` are copied from the
    /// default translation.
    pub fn add_translation(&mut self, langcode: impl Into<String>, fields: FieldSet) {
        let mut merged = self.default_fields().clone();
        merged.extend(fields);
        self.translations.insert(langcode.into(), merged);
    }

    /// Sets a translation's fields exactly as given.
    pub fn replace_translation(&mut self, langcode: impl Into<String>, fields: FieldSet) {
        self.translations.insert(langcode.into(), fields);
    }

    pub fn has_translation(&self, langcode: &str) -> bool {
        self.translations.contains_key(langcode)
    }

    pub fn langcodes(&self) -> impl Iterator<Item = &str> {
        self.translations.keys().map(String::as_str)
    }

    pub fn fields(&self, langcode: &str) -> Option<&FieldSet> {
        self.translations.get(langcode)
    }

    pub fn default_fields(&self) -> &FieldSet {
        // The default translation is inserted on construction and never removed.
        static EMPTY: FieldSet = FieldSet::new();
        self.translations.get(&self.default_langcode).unwrap_or(&EMPTY)
    }

    pub fn translations(&self) -> impl Iterator<Item = (&str, &FieldSet)> {
        self.translations.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn view(&self, langcode: &str) -> Option<RecordView> {
        self.translations.get(langcode).map(|fields| RecordView {
            id: self.id,
            entity_type: self.entity_type.clone(),
            bundle: self.bundle.clone(),
            langcode: langcode.to_string(),
            fields: fields.clone(),
            origin: ViewOrigin::Canonical,
        })
    }

    pub fn default_view(&self) -> RecordView {
        RecordView {
            id: self.id,
            entity_type: self.entity_type.clone(),
            bundle: self.bundle.clone(),
            langcode: self.default_langcode.clone(),
            fields: self.default_fields().clone(),
            origin: ViewOrigin::Canonical,
        }
    }

    /// The translation for `requested`, or the default translation. The flag
    /// is true when a specific language was asked for and is missing.
    pub fn select_view(&self, requested: Option<&str>) -> (RecordView, bool) {
        match requested {
            Some(langcode) => match self.view(langcode) {
                Some(view) => (view, false),
                None => (self.default_view(), true),
            },
            None => (self.default_view(), false),
        }
    }

    /// Writes a canonical view back into its translation.
    pub fn store_view(&mut self, view: RecordView) {
        self.translations.insert(view.langcode, view.fields);
    }

    /// Human label: the `name` field, either a bare string or `[{value}]`.
    pub fn label(&self) -> Option<&str> {
        let name = self.default_fields().get("name")?;
        name.as_leaf()
            .and_then(|v| v.as_text())
            .or_else(|| name.text_at(&[Key::Index(0), Key::from("value")]))
    }
}

/// Where a [`RecordView`] came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewOrigin {
    Canonical,
    /// Built by applying the overrides of this reference slot. Read-only.
    Override(PropertyPath),
}

/// One translation of a record, detached from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordView {
    pub id: EntityId,
    pub entity_type: String,
    pub bundle: String,
    pub langcode: String,
    pub fields: FieldSet,
    origin: ViewOrigin,
}

impl RecordView {
    pub fn get(&self, field: &str) -> Option<&Tree> {
        self.fields.get(field)
    }

    pub fn origin(&self) -> &ViewOrigin {
        &self.origin
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.origin, ViewOrigin::Override(_))
    }

    /// Marks the view as produced through `path`'s overrides.
    pub fn into_override_view(mut self, path: PropertyPath) -> Self {
        self.origin = ViewOrigin::Override(path);
        self
    }

    /// Copy restricted to `fields`.
    pub fn restricted_to<'a, I>(&self, fields: I) -> FieldSet
    where
        I: IntoIterator<Item = &'a str>,
    {
        fields
            .into_iter()
            .filter_map(|f| self.fields.get(f).map(|v| (f.to_string(), v.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CanonicalRecord {
        let mut record = CanonicalRecord::new("entity_test_mul", "entity_test_mul", "en")
            .with_field("name", Tree::leaf("Referenced entity"))
            .with_field("field_description", Tree::leaf("Main english description"));
        let mut de = FieldSet::new();
        de.insert("field_description".into(), Tree::leaf("Main german description"));
        record.add_translation("de", de);
        record
    }

    #[test]
    fn translations_inherit_untranslated_fields() {
        let record = record();
        let de = record.view("de").unwrap();
        assert_eq!(de.get("name"), Some(&Tree::leaf("Referenced entity")));
        assert_eq!(de.get("field_description"), Some(&Tree::leaf("Main german description")));
    }

    #[test]
    fn missing_language_falls_back_to_default() {
        let (view, fell_back) = record().select_view(Some("fr"));
        assert!(fell_back);
        assert_eq!(view.langcode, "en");

        let (view, fell_back) = record().select_view(None);
        assert!(!fell_back);
        assert_eq!(view.langcode, "en");
    }

    #[test]
    fn label_reads_item_lists() {
        let record = CanonicalRecord::new("media", "image", "en")
            .with_field("name", Tree::deltas([Tree::branch([("value", Tree::leaf("Mr. Jones"))])]));
        assert_eq!(record.label(), Some("Mr. Jones"));
    }
}
