use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::field_value::FieldValue;

/// Key of one level in a value tree.
///
/// `Index` keys address deltas of multi-value fields and sort numerically
/// ahead of `Name` keys, so a list-like level keeps its delta order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Key {
    Index(u32),
    Name(String),
}

impl Key {
    /// Only canonical decimals become indices; `"007"` stays a name so it
    /// converts back unchanged.
    fn parse(raw: String) -> Self {
        let canonical = raw == "0" || (!raw.starts_with('0') && !raw.is_empty());
        if canonical && raw.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(index) = raw.parse::<u32>() {
                return Self::Index(index);
            }
        }
        Self::Name(raw)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{i}"),
            Self::Name(name) => write!(f, "{name}"),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::Name(s.to_string())
    }
}

impl From<u32> for Key {
    fn from(i: u32) -> Self {
        Self::Index(i)
    }
}

/// Location of a node inside a tree, outermost key first.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyPath(Vec<Key>);

impl KeyPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn child(&self, key: &Key) -> Self {
        let mut keys = self.0.clone();
        keys.push(key.clone());
        Self(keys)
    }

    pub fn keys(&self) -> &[Key] {
        &self.0
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, key) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{key}")?;
        }
        Ok(())
    }
}

/// A nested key-value tree describing a field value.
///
/// Field values are usually a branch of per-delta branches
/// (`[{value: "x"}]`), but any shape is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tree {
    Leaf(FieldValue),
    /// List of scalars. Replaced wholesale on merge.
    List(Vec<FieldValue>),
    Branch(#[serde(with = "branch_pairs")] BTreeMap<Key, Tree>),
}

impl Tree {
    pub fn empty() -> Self {
        Self::Branch(BTreeMap::new())
    }

    pub fn leaf(value: impl Into<FieldValue>) -> Self {
        Self::Leaf(value.into())
    }

    /// Builds a branch from key/value pairs; later duplicates win.
    pub fn branch<K, I>(entries: I) -> Self
    where
        K: Into<Key>,
        I: IntoIterator<Item = (K, Tree)>,
    {
        Self::Branch(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Builds the usual multi-value field shape: one branch per delta.
    pub fn deltas<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Tree>,
    {
        Self::Branch(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| (Key::Index(i as u32), item))
                .collect(),
        )
    }

    /// True for a branch without children. Leaves and lists are never empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Branch(children) if children.is_empty())
    }

    pub fn as_branch(&self) -> Option<&BTreeMap<Key, Tree>> {
        match self {
            Self::Branch(children) => Some(children),
            _ => None,
        }
    }

    pub fn as_leaf(&self) -> Option<&FieldValue> {
        match self {
            Self::Leaf(value) => Some(value),
            _ => None,
        }
    }

    pub fn get(&self, key: impl Into<Key>) -> Option<&Tree> {
        self.as_branch().and_then(|children| children.get(&key.into()))
    }

    /// Follows `path` down the tree.
    pub fn at(&self, path: &[Key]) -> Option<&Tree> {
        path.iter()
            .try_fold(self, |node, key| node.as_branch().and_then(|c| c.get(key)))
    }

    /// Text at `path`, for the common `[{value: "..."}]` lookups.
    pub fn text_at(&self, path: &[Key]) -> Option<&str> {
        self.at(path).and_then(Tree::as_leaf).and_then(FieldValue::as_text)
    }

    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Array(items) => {
                if !items.is_empty() && items.iter().all(is_json_scalar) {
                    Self::List(items.into_iter().filter_map(FieldValue::from_json).collect())
                } else {
                    Self::Branch(
                        items
                            .into_iter()
                            .enumerate()
                            .map(|(i, item)| (Key::Index(i as u32), Self::from_json(item)))
                            .collect(),
                    )
                }
            }
            serde_json::Value::Object(entries) => Self::Branch(
                entries
                    .into_iter()
                    .map(|(k, v)| (Key::parse(k), Self::from_json(v)))
                    .collect(),
            ),
            scalar => Self::Leaf(FieldValue::from_json(scalar).unwrap_or(FieldValue::Null)),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Leaf(value) => value.to_json(),
            Self::List(values) => {
                serde_json::Value::Array(values.iter().map(FieldValue::to_json).collect())
            }
            Self::Branch(children) => {
                if !children.is_empty() && is_dense_index(children) {
                    serde_json::Value::Array(children.values().map(Tree::to_json).collect())
                } else {
                    serde_json::Value::Object(
                        children
                            .iter()
                            .map(|(k, v)| (k.to_string(), v.to_json()))
                            .collect(),
                    )
                }
            }
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, CoreError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| CoreError::Serialization(e.to_string()))?;
        Ok(Self::from_json(value))
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

impl From<FieldValue> for Tree {
    fn from(value: FieldValue) -> Self {
        Self::Leaf(value)
    }
}

fn is_json_scalar(value: &serde_json::Value) -> bool {
    !matches!(
        value,
        serde_json::Value::Array(_) | serde_json::Value::Object(_)
    )
}

/// Keys are exactly `0..len`.
fn is_dense_index(children: &BTreeMap<Key, Tree>) -> bool {
    children
        .keys()
        .enumerate()
        .all(|(i, key)| *key == Key::Index(i as u32))
}

/// Branches travel as a sequence of pairs so non-string keys survive
/// formats that only allow string map keys.
mod branch_pairs {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serializer};

    use super::{Key, Tree};

    pub fn serialize<S: Serializer>(
        children: &BTreeMap<Key, Tree>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(children.iter())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<Key, Tree>, D::Error> {
        let pairs: Vec<(Key, Tree)> = Deserialize::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_arrays_of_items_become_index_branches() {
        let tree = Tree::from_json_str(r#"[{"value": "a"}, {"value": "b"}]"#).unwrap();
        assert_eq!(tree.text_at(&[Key::Index(1), "value".into()]), Some("b"));
        assert_eq!(tree.to_json(), serde_json::json!([{"value": "a"}, {"value": "b"}]));
    }

    #[test]
    fn digit_object_keys_are_indices() {
        let tree = Tree::from_json_str(r#"{"1": {"value": "x"}}"#).unwrap();
        assert!(tree.get(1u32).is_some());
        // Sparse index branches stay objects.
        assert_eq!(tree.to_json(), serde_json::json!({"1": {"value": "x"}}));
    }

    #[test]
    fn zero_padded_object_keys_stay_names() {
        let tree = Tree::from_json_str(r#"{"007": {"value": "x"}, "0": {"value": "y"}}"#).unwrap();
        assert!(tree.get("007").is_some());
        assert!(tree.get(7u32).is_none());
        assert!(tree.get(0u32).is_some());
        assert_eq!(
            tree.to_json(),
            serde_json::json!({"0": {"value": "y"}, "007": {"value": "x"}})
        );
    }

    #[test]
    fn scalar_arrays_become_lists() {
        let tree = Tree::from_json_str(r#"{"tags": ["a", "b"]}"#).unwrap();
        assert_eq!(
            tree.get("tags"),
            Some(&Tree::List(vec!["a".into(), "b".into()]))
        );
    }

    #[test]
    fn msgpack_keeps_mixed_keys() {
        let tree = Tree::branch([
            (Key::Index(0), Tree::branch([("alt", Tree::leaf("x"))])),
            (Key::Name("title".into()), Tree::leaf(3i64)),
        ]);
        let bytes = tree.to_msgpack().unwrap();
        assert_eq!(Tree::from_msgpack(&bytes).unwrap(), tree);
    }

    #[test]
    fn key_path_display() {
        let path = KeyPath::root().child(&"field_media".into()).child(&Key::Index(0));
        assert_eq!(path.to_string(), "field_media.0");
    }
}
