use std::collections::BTreeMap;

use crate::error::CoreError;
use crate::record::FieldSet;
use crate::tree::Tree;

/// Per-reference overrides: field name to a partial value tree.
///
/// Stored as JSON text next to the reference. An empty map means "no
/// override" and is written as [`OverrideMap::EMPTY_SENTINEL`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideMap(BTreeMap<String, Tree>);

impl OverrideMap {
    pub const EMPTY_SENTINEL: &'static str = "{}";

    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: &str) -> Option<&Tree> {
        self.0.get(field)
    }

    /// Adds an override. Empty branches carry no override and are skipped.
    pub fn insert(&mut self, field: impl Into<String>, tree: Tree) {
        if !tree.is_empty() {
            self.0.insert(field.into(), tree);
        }
    }

    pub fn remove(&mut self, field: &str) -> Option<Tree> {
        self.0.remove(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tree)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Strict parse for write paths.
    ///
    /// Blank text, `null` and `[]` (an empty map serialized as a list) all
    /// mean "no override". Anything other than a JSON object is rejected.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Self::new());
        }
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| CoreError::MalformedOverrideMap(e.to_string()))?;
        match value {
            serde_json::Value::Null => Ok(Self::new()),
            serde_json::Value::Array(items) if items.is_empty() => Ok(Self::new()),
            serde_json::Value::Object(entries) => {
                let mut map = Self::new();
                for (field, value) in entries {
                    map.insert(field, Tree::from_json(value));
                }
                Ok(map)
            }
            other => Err(CoreError::MalformedOverrideMap(format!(
                "expected an object keyed by field name, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Read-path parse: a malformed payload degrades to the empty map and
    /// the parse error is handed back for diagnostics.
    pub fn parse_or_empty(raw: &str) -> (Self, Option<CoreError>) {
        match Self::parse(raw) {
            Ok(map) => (map, None),
            Err(e) => (Self::new(), Some(e)),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(field, tree)| (field.clone(), tree.to_json()))
                .collect(),
        )
    }

    pub fn to_json_string(&self) -> String {
        if self.is_empty() {
            return Self::EMPTY_SENTINEL.to_string();
        }
        self.to_json().to_string()
    }
}

impl From<FieldSet> for OverrideMap {
    fn from(fields: FieldSet) -> Self {
        let mut map = Self::new();
        for (field, tree) in fields {
            map.insert(field, tree);
        }
        map
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "a list",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_inputs_mean_no_override() {
        for raw in ["", "  ", "{}", "null", "[]"] {
            assert!(OverrideMap::parse(raw).unwrap().is_empty(), "{raw:?}");
        }
    }

    #[test]
    fn empty_map_serializes_to_sentinel() {
        assert_eq!(OverrideMap::new().to_json_string(), "{}");
    }

    #[test]
    fn non_object_payloads_are_rejected() {
        for raw in ["[1, 2]", "\"name\"", "{not json"] {
            let err = OverrideMap::parse(raw).unwrap_err();
            assert!(matches!(err, CoreError::MalformedOverrideMap(_)), "{raw:?}");
        }
    }

    #[test]
    fn parse_or_empty_degrades() {
        let (map, err) = OverrideMap::parse_or_empty("{broken");
        assert!(map.is_empty());
        assert!(err.is_some());
    }

    #[test]
    fn empty_field_entries_are_normalized_away() {
        let map = OverrideMap::parse(r#"{"name": {}, "description": "y"}"#).unwrap();
        assert_eq!(map.fields().collect::<Vec<_>>(), vec!["description"]);
    }

    #[test]
    fn json_text_survives_a_save() {
        let raw = r#"{"field_media_file":[{"description":"Nice description!"}],"name":"Overwritten name"}"#;
        let map = OverrideMap::parse(raw).unwrap();
        assert_eq!(map.to_json_string(), raw);
    }
}
