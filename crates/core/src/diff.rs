//! Asymmetric structural diff, used to turn an edited copy of a record into
//! the minimal set of overrides worth storing.

use std::collections::BTreeMap;

use crate::merge::merge;
use crate::override_map::OverrideMap;
use crate::record::FieldSet;
use crate::tree::{Key, Tree};

/// What `edited` changes or adds relative to `canonical`.
///
/// Keys equal on both sides and keys only present in `canonical` are left
/// out. Nested branches are diffed recursively and kept only when something
/// inside them differs.
pub fn diff(edited: &Tree, canonical: &Tree) -> Tree {
    match (edited, canonical) {
        (Tree::Branch(e), Tree::Branch(c)) => Tree::Branch(diff_branches(e, c)),
        _ if edited == canonical => Tree::empty(),
        _ => edited.clone(),
    }
}

fn diff_branches(edited: &BTreeMap<Key, Tree>, canonical: &BTreeMap<Key, Tree>) -> BTreeMap<Key, Tree> {
    let mut out = BTreeMap::new();
    for (key, value) in edited {
        match canonical.get(key) {
            None => {
                out.insert(key.clone(), value.clone());
            }
            Some(base) if base == value => {}
            Some(Tree::Branch(base)) => {
                if let Tree::Branch(changed) = value {
                    let nested = diff_branches(changed, base);
                    if !nested.is_empty() {
                        out.insert(key.clone(), Tree::Branch(nested));
                    }
                } else {
                    out.insert(key.clone(), value.clone());
                }
            }
            Some(_) => {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    out
}

/// Builds the override map for `fields` from an edited snapshot.
///
/// Each edited field is first merged onto its canonical value so that
/// untouched keys, and keys the field does not have, cannot show up as
/// changes. Fields the canonical snapshot lacks are skipped.
pub fn overridden_values<'a, I>(edited: &FieldSet, canonical: &FieldSet, fields: I) -> OverrideMap
where
    I: IntoIterator<Item = &'a str>,
{
    let mut map = OverrideMap::new();
    for field in fields {
        let (Some(edited_value), Some(canonical_value)) = (edited.get(field), canonical.get(field))
        else {
            continue;
        };
        let merged = merge(canonical_value, edited_value);
        if merged == *canonical_value {
            continue;
        }
        map.insert(field, diff(&merged, canonical_value));
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    use crate::field_value::FieldValue;

    fn t(raw: &str) -> Tree {
        Tree::from_json_str(raw).unwrap()
    }

    fn fields(entries: &[(&str, &str)]) -> FieldSet {
        entries.iter().map(|(k, v)| (k.to_string(), t(v))).collect()
    }

    #[test]
    fn identical_trees_diff_to_empty() {
        let tree = t(r#"{"a": [{"value": "x"}], "b": 2}"#);
        assert!(diff(&tree, &tree).is_empty());
    }

    #[test]
    fn only_changed_keys_are_reported() {
        let changed = diff(
            &t(r#"{"name": "Original", "description": "Overridden description"}"#),
            &t(r#"{"name": "Original", "description": "Original description"}"#),
        );
        assert_eq!(changed, t(r#"{"description": "Overridden description"}"#));
    }

    #[test]
    fn canonical_only_keys_are_ignored() {
        let changed = diff(&t(r#"{"x": 1}"#), &t(r#"{"x": 1, "y": 2}"#));
        assert!(changed.is_empty());
    }

    #[test]
    fn added_keys_are_reported() {
        let changed = diff(&t(r#"{"x": 1, "z": 3}"#), &t(r#"{"x": 1}"#));
        assert_eq!(changed, t(r#"{"z": 3}"#));
    }

    #[test]
    fn unchanged_string_field_yields_no_override() {
        let map = overridden_values(
            &fields(&[("field_test", r#"[{"value": "foo"}]"#)]),
            &fields(&[("field_test", r#"[{"value": "foo"}]"#)]),
            ["field_test"],
        );
        assert!(map.is_empty());
    }

    #[test]
    fn changed_string_field_is_stored() {
        let map = overridden_values(
            &fields(&[("field_test", r#"[{"value": "foo1"}]"#)]),
            &fields(&[("field_test", r#"[{"value": "foo"}]"#)]),
            ["field_test"],
        );
        assert_eq!(map.get("field_test"), Some(&t(r#"[{"value": "foo1"}]"#)));
    }

    #[test]
    fn unknown_item_properties_do_not_count_as_changes() {
        let map = overridden_values(
            &fields(&[("field_image", r#"[{"target_id": 1, "alt": "alt", "button": "x"}]"#)]),
            &fields(&[("field_image", r#"[{"target_id": 1, "alt": "alt"}]"#)]),
            ["field_image"],
        );
        assert!(map.is_empty());
    }

    #[test]
    fn partial_edit_keeps_only_the_changed_property() {
        let map = overridden_values(
            &fields(&[(
                "field_image",
                r#"[{"target_id": 1, "alt": "alt override", "button": "x"}]"#,
            )]),
            &fields(&[(
                "field_image",
                r#"[{"target_id": 1, "alt": "alt", "title": "title", "height": 2, "width": 2}]"#,
            )]),
            ["field_image"],
        );
        assert_eq!(map.get("field_image"), Some(&t(r#"[{"alt": "alt override"}]"#)));
    }

    #[test]
    fn fields_outside_the_request_are_not_compared() {
        let map = overridden_values(
            &fields(&[("name", r#""changed""#), ("body", r#""changed""#)]),
            &fields(&[("name", r#""orig""#), ("body", r#""orig""#)]),
            ["name"],
        );
        assert_eq!(map.fields().collect::<Vec<_>>(), vec!["name"]);
    }

    fn arb_value() -> impl Strategy<Value = FieldValue> {
        prop_oneof![
            Just(FieldValue::Null),
            (0i64..4).prop_map(FieldValue::Integer),
            "[ab]{0,2}".prop_map(FieldValue::Text),
            any::<bool>().prop_map(FieldValue::Boolean),
        ]
    }

    fn arb_key() -> impl Strategy<Value = Key> {
        prop_oneof![
            (0u32..3).prop_map(Key::Index),
            prop::sample::select(vec!["a", "b", "c"]).prop_map(Key::from),
        ]
    }

    fn arb_tree() -> impl Strategy<Value = Tree> {
        let leaf = prop_oneof![
            arb_value().prop_map(Tree::Leaf),
            prop::collection::vec(arb_value(), 1..3).prop_map(Tree::List),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop::collection::btree_map(arb_key(), inner, 0..4).prop_map(Tree::Branch)
        })
    }

    proptest! {
        #[test]
        fn diff_of_self_is_empty(tree in arb_tree()) {
            prop_assert!(diff(&tree, &tree).is_empty());
        }

        #[test]
        fn merging_the_diff_restores_the_merge(canonical in arb_tree(), overrides in arb_tree()) {
            let merged = merge(&canonical, &overrides);
            let delta = diff(&merged, &canonical);
            prop_assert_eq!(merge(&canonical, &delta), merged);
        }
    }
}
