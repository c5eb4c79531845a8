use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

fn default_form_mode() -> String {
    "default".to_string()
}

/// Override settings attached to a reference field.
///
/// ```toml
/// form_mode = "default"
///
/// [overridable_properties.image]
/// name = false
/// field_media_image = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOverrideSettings {
    /// Target bundle to field name to "may be overridden".
    #[serde(default)]
    pub overridable_properties: BTreeMap<String, BTreeMap<String, bool>>,
    /// Form mode used to render the override form.
    #[serde(default = "default_form_mode")]
    pub form_mode: String,
}

impl Default for FieldOverrideSettings {
    fn default() -> Self {
        Self {
            overridable_properties: BTreeMap::new(),
            form_mode: default_form_mode(),
        }
    }
}

impl FieldOverrideSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `fields` of `bundle` as overridable.
    pub fn allow<'a, I>(mut self, bundle: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let entry = self
            .overridable_properties
            .entry(bundle.to_string())
            .or_default();
        for field in fields {
            entry.insert(field.to_string(), true);
        }
        self
    }

    pub fn is_overridable(&self, bundle: &str, field: &str) -> bool {
        self.overridable_properties
            .get(bundle)
            .and_then(|fields| fields.get(field))
            .copied()
            .unwrap_or(false)
    }

    /// Overridable fields of `bundle`, in name order.
    pub fn allowed_fields(&self, bundle: &str) -> Vec<&str> {
        self.overridable_properties
            .get(bundle)
            .map(|fields| {
                fields
                    .iter()
                    .filter(|(_, enabled)| **enabled)
                    .map(|(name, _)| name.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, CoreError> {
        toml::from_str(raw).map_err(|e| CoreError::InvalidSettings(e.to_string()))
    }

    pub fn to_json_string(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_json_str(raw: &str) -> Result<Self, CoreError> {
        serde_json::from_str(raw).map_err(|e| CoreError::InvalidSettings(e.to_string()))
    }
}

/// Whether a reference field stores overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Plain,
    Override,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "entity_reference",
            Self::Override => "entity_reference_override",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "entity_reference" => Ok(Self::Plain),
            "entity_reference_override" => Ok(Self::Override),
            _ => Err(CoreError::InvalidData(format!("unknown reference kind: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Limited(u32),
    Unlimited,
}

impl Cardinality {
    pub fn to_i64(self) -> i64 {
        match self {
            Self::Limited(n) => i64::from(n),
            Self::Unlimited => -1,
        }
    }

    pub fn from_i64(n: i64) -> Result<Self, CoreError> {
        match n {
            -1 => Ok(Self::Unlimited),
            1.. => u32::try_from(n)
                .map(Self::Limited)
                .map_err(|_| CoreError::InvalidData(format!("cardinality out of range: {n}"))),
            _ => Err(CoreError::InvalidData(format!("invalid cardinality: {n}"))),
        }
    }
}

/// A reference field on a referencing bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceFieldDefinition {
    pub entity_type: String,
    pub bundle: String,
    pub field_name: String,
    pub target_type: String,
    pub kind: ReferenceKind,
    pub cardinality: Cardinality,
    pub settings: FieldOverrideSettings,
}

impl ReferenceFieldDefinition {
    pub fn new(
        entity_type: impl Into<String>,
        bundle: impl Into<String>,
        field_name: impl Into<String>,
        target_type: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            bundle: bundle.into(),
            field_name: field_name.into(),
            target_type: target_type.into(),
            kind: ReferenceKind::Override,
            cardinality: Cardinality::Unlimited,
            settings: FieldOverrideSettings::default(),
        }
    }

    pub fn with_kind(mut self, kind: ReferenceKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    pub fn with_settings(mut self, settings: FieldOverrideSettings) -> Self {
        self.settings = settings;
        self
    }
}
