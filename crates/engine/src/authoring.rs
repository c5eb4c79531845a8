use overref_core::{EntityId, FieldSet, OverrideMap, PropertyPath, overridden_values};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    /// One target per widget element; only the first delta is editable.
    Single,
    Multiple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditSurface {
    /// Edited in a dialog keyed by the stored slot. Needs a saved host.
    Modal,
    /// Edited next to the selection, so unsaved hosts work too.
    Inline,
}

/// How a reference field offers override editing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetStrategy {
    pub selection: SelectionMode,
    pub surface: EditSurface,
    pub form_mode: String,
}

impl Default for WidgetStrategy {
    fn default() -> Self {
        Self::new(SelectionMode::Multiple, EditSurface::Inline)
    }
}

impl WidgetStrategy {
    pub fn new(selection: SelectionMode, surface: EditSurface) -> Self {
        Self {
            selection,
            surface,
            form_mode: "default".to_string(),
        }
    }

    pub fn with_form_mode(mut self, form_mode: impl Into<String>) -> Self {
        self.form_mode = form_mode.into();
        self
    }

    /// Deltas that get an override control, given how many items are set.
    pub fn overridable_deltas(&self, host_is_new: bool, item_count: usize) -> Vec<u32> {
        if host_is_new && self.surface == EditSurface::Modal {
            return Vec::new();
        }
        let count = match self.selection {
            SelectionMode::Single => item_count.min(1),
            SelectionMode::Multiple => item_count,
        };
        (0..count).filter_map(|d| u32::try_from(d).ok()).collect()
    }

    /// Identifies one widget element: `field-delta`, suffixed with the
    /// parents it is nested in.
    pub fn widget_id(&self, field_name: &str, delta: u32, parents: &[&str]) -> String {
        let base = format!("{field_name}-{delta}");
        if parents.is_empty() {
            base
        } else {
            format!("{base}:-{}", parents.join("-"))
        }
    }

    /// Title of the override dialog.
    pub fn dialog_title(&self, target_label: &str, host_bundle: &str, host_label: &str) -> String {
        format!(
            "Override {target_label} in context of {} \"{host_label}\"",
            capitalize(host_bundle)
        )
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// An open override form for one reference slot.
///
/// Holds the canonical snapshot taken when the form was opened; submitted
/// values are diffed against it, not against whatever is stored later.
#[derive(Debug, Clone)]
pub struct AuthoringSession {
    widget_id: String,
    host_id: EntityId,
    target_id: EntityId,
    langcode: String,
    property_path: PropertyPath,
    form_mode: String,
    title: String,
    allowed: Vec<String>,
    canonical: FieldSet,
    current: FieldSet,
}

impl AuthoringSession {
    pub(crate) fn new(
        widget_id: String,
        host_id: EntityId,
        target_id: EntityId,
        langcode: String,
        property_path: PropertyPath,
        form_mode: String,
        title: String,
        allowed: Vec<String>,
        canonical: FieldSet,
        current: FieldSet,
    ) -> Self {
        Self {
            widget_id,
            host_id,
            target_id,
            langcode,
            property_path,
            form_mode,
            title,
            allowed,
            canonical,
            current,
        }
    }

    pub fn widget_id(&self) -> &str {
        &self.widget_id
    }

    pub fn host_id(&self) -> EntityId {
        self.host_id
    }

    pub fn target_id(&self) -> EntityId {
        self.target_id
    }

    pub fn langcode(&self) -> &str {
        &self.langcode
    }

    pub fn property_path(&self) -> &PropertyPath {
        &self.property_path
    }

    pub fn form_mode(&self) -> &str {
        &self.form_mode
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Fields the form may show, in name order.
    pub fn allowed_fields(&self) -> &[String] {
        &self.allowed
    }

    /// Values to prefill the form with: canonical merged with the slot's
    /// current overrides, restricted to the allowed fields.
    pub fn current_values(&self) -> &FieldSet {
        &self.current
    }

    /// Override map for a submitted form.
    ///
    /// Fields left out of `edited` keep their current values. Fields outside
    /// the allow-list are rejected.
    pub fn overrides_for(&self, mut edited: FieldSet) -> Result<OverrideMap, EngineError> {
        if let Some(field) = edited.keys().find(|f| !self.allowed.contains(*f)) {
            return Err(EngineError::FieldNotOverridable {
                field: field.clone(),
                property_path: self.property_path.to_string(),
            });
        }
        for (field, value) in &self.current {
            edited.entry(field.clone()).or_insert_with(|| value.clone());
        }
        Ok(overridden_values(
            &edited,
            &self.canonical,
            self.allowed.iter().map(String::as_str),
        ))
    }
}

#[cfg(test)]
mod tests {
    use overref_core::Tree;

    use super::*;

    fn t(raw: &str) -> Tree {
        Tree::from_json_str(raw).unwrap()
    }

    fn session() -> AuthoringSession {
        let canonical = FieldSet::from([
            ("name".to_string(), t(r#"[{"value": "Original"}]"#)),
            ("field_media_image".to_string(), t(r#"[{"target_id": 1, "alt": "alt", "title": "title"}]"#)),
        ]);
        let mut current = canonical.clone();
        current.insert("name".into(), t(r#"[{"value": "Overridden"}]"#));
        AuthoringSession::new(
            "field_media-0".into(),
            EntityId::new(),
            EntityId::new(),
            "en".into(),
            PropertyPath::new("node", "article", "field_media", 0),
            "default".into(),
            "Override media in context of Article \"Host\"".into(),
            vec!["field_media_image".into(), "name".into()],
            canonical,
            current,
        )
    }

    #[test]
    fn untouched_fields_keep_current_overrides() {
        let map = session()
            .overrides_for(FieldSet::from([(
                "field_media_image".to_string(),
                t(r#"[{"target_id": 1, "alt": "alt override", "button": "x"}]"#),
            )]))
            .unwrap();
        assert_eq!(map.get("name"), Some(&t(r#"[{"value": "Overridden"}]"#)));
        assert_eq!(map.get("field_media_image"), Some(&t(r#"[{"alt": "alt override"}]"#)));
    }

    #[test]
    fn reverting_to_canonical_clears_the_override() {
        let map = session()
            .overrides_for(FieldSet::from([(
                "name".to_string(),
                t(r#"[{"value": "Original"}]"#),
            )]))
            .unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn disallowed_fields_are_rejected() {
        let err = session()
            .overrides_for(FieldSet::from([("status".to_string(), Tree::leaf(true))]))
            .unwrap_err();
        assert!(matches!(err, EngineError::FieldNotOverridable { field, .. } if field == "status"));
    }

    #[test]
    fn modal_widgets_skip_unsaved_hosts() {
        let modal = WidgetStrategy::new(SelectionMode::Multiple, EditSurface::Modal);
        assert!(modal.overridable_deltas(true, 3).is_empty());
        assert_eq!(modal.overridable_deltas(false, 3), vec![0, 1, 2]);

        let inline = WidgetStrategy::default();
        assert_eq!(inline.overridable_deltas(true, 2), vec![0, 1]);
    }

    #[test]
    fn single_selection_edits_first_delta_only() {
        let single = WidgetStrategy::new(SelectionMode::Single, EditSurface::Inline);
        assert_eq!(single.overridable_deltas(false, 4), vec![0]);
        assert!(single.overridable_deltas(false, 0).is_empty());
    }

    #[test]
    fn widget_labels() {
        let strategy = WidgetStrategy::default();
        assert_eq!(strategy.widget_id("field_media", 1, &[]), "field_media-1");
        assert_eq!(
            strategy.widget_id("field_media", 1, &["paragraphs", "0"]),
            "field_media-1:-paragraphs-0"
        );
        assert_eq!(
            strategy.dialog_title("media", "article", "My page"),
            "Override media in context of Article \"My page\""
        );
    }
}
