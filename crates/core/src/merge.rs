//! Deep merge with override precedence, and the stale-key filter it relies on.
//!
//! Both operations are non-destructive: inputs are borrowed and a new tree is
//! returned, because canonical trees are shared between every reader of a
//! record.

use std::collections::BTreeMap;

use crate::tree::{Key, KeyPath, Tree};

/// Merges `overrides` on top of `canonical`.
///
/// Override keys with no canonical counterpart are dropped first. Branches
/// recurse; leaves and lists replace the canonical value outright.
pub fn merge(canonical: &Tree, overrides: &Tree) -> Tree {
    merge_report(canonical, overrides).0
}

/// Same as [`merge`], also returning the override paths that were dropped
/// because the canonical tree has no matching key (or a non-branch value
/// where the override has a branch).
pub fn merge_report(canonical: &Tree, overrides: &Tree) -> (Tree, Vec<KeyPath>) {
    let mut dropped = Vec::new();
    let merged = match overrides {
        Tree::Branch(patch) if patch.is_empty() => canonical.clone(),
        Tree::Branch(_) => match canonical {
            Tree::Branch(_) => {
                let filtered = retain_into(overrides, canonical, &KeyPath::root(), &mut dropped);
                deep_merge(canonical, &filtered)
            }
            // Field changed shape since the override was written.
            _ => {
                dropped.push(KeyPath::root());
                canonical.clone()
            }
        },
        other => other.clone(),
    };
    (merged, dropped)
}

/// Copy of `tree` keeping only keys that exist in `reference` at every level.
pub fn retain_known(tree: &Tree, reference: &Tree) -> Tree {
    retain_known_report(tree, reference).0
}

pub fn retain_known_report(tree: &Tree, reference: &Tree) -> (Tree, Vec<KeyPath>) {
    let mut dropped = Vec::new();
    let kept = retain_into(tree, reference, &KeyPath::root(), &mut dropped);
    (kept, dropped)
}

fn retain_into(tree: &Tree, reference: &Tree, path: &KeyPath, dropped: &mut Vec<KeyPath>) -> Tree {
    let (Tree::Branch(children), Tree::Branch(known)) = (tree, reference) else {
        return tree.clone();
    };

    let mut kept = BTreeMap::new();
    for (key, child) in children {
        let child_path = path.child(key);
        match (known.get(key), child) {
            (None, _) => dropped.push(child_path),
            (Some(known_child @ Tree::Branch(_)), Tree::Branch(_)) => {
                kept.insert(key.clone(), retain_into(child, known_child, &child_path, dropped));
            }
            (Some(_), Tree::Branch(_)) => dropped.push(child_path),
            (Some(_), _) => {
                kept.insert(key.clone(), child.clone());
            }
        }
    }
    Tree::Branch(kept)
}

fn deep_merge(canonical: &Tree, overrides: &Tree) -> Tree {
    match (canonical, overrides) {
        (Tree::Branch(base), Tree::Branch(patch)) => {
            let mut merged: BTreeMap<Key, Tree> = base.clone();
            for (key, value) in patch {
                let next = match (base.get(key), value) {
                    (Some(base_child), Tree::Branch(_)) => deep_merge(base_child, value),
                    (None, Tree::Branch(_)) => deep_merge(&Tree::empty(), value),
                    _ => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Tree::Branch(merged)
        }
        (_, Tree::Branch(_)) => deep_merge(&Tree::empty(), overrides),
        (_, other) => other.clone(),
    }
}
