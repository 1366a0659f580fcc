//! Merge-or-delete-on-null patch semantics over the config tree, plus the
//! structural diff published as the `config:changed` event payload.
//!
//! `config.patch{path, value}` merges `value` into the tree at `path`. A key
//! mapped to JSON `null` is deleted rather than set. The diff reports only
//! added/modified/removed paths — never values — so secrets never leak
//! through it (secrets live in a disjoint namespace anyway, see
//! [`crate::secret`]).

use serde_json::Value;

/// A structural diff between two config snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}

/// Split a dot-separated path into segments. An empty path means the root.
fn segments(path: &str) -> Vec<&str> {
    if path.is_empty() {
        Vec::new()
    } else {
        path.split('.').collect()
    }
}

/// Read the subtree at `path`, or `None` if the path doesn't exist.
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for seg in segments(path) {
        current = current.as_object()?.get(seg)?;
    }
    Some(current)
}

/// Apply a patch at `path` with merge-or-delete-on-null semantics, returning
/// the structural diff between the before and after snapshots.
pub fn apply_patch(root: &mut Value, path: &str, value: Value) -> Diff {
    let before = root.clone();
    set_path(root, &segments(path), value);
    let mut diff = Diff::default();
    diff_values(&before, root, "", &mut diff);
    diff
}

fn set_path(root: &mut Value, segs: &[&str], value: Value) {
    match segs.split_first() {
        None => merge_in_place(root, value),
        Some((head, rest)) => {
            if !root.is_object() {
                *root = Value::Object(serde_json::Map::new());
            }
            let map = root.as_object_mut().expect("just ensured object");
            if rest.is_empty() {
                if value.is_null() {
                    map.remove(*head);
                } else {
                    let slot = map.entry((*head).to_string()).or_insert(Value::Null);
                    merge_in_place(slot, value);
                }
            } else {
                let slot = map.entry((*head).to_string()).or_insert_with(|| Value::Object(serde_json::Map::new()));
                set_path(slot, rest, value);
            }
        },
    }
}

/// Merge `incoming` into `*target` in place. Object keys merge recursively;
/// a `null` value deletes the corresponding key; any other value (including
/// scalars and arrays) replaces the slot wholesale.
fn merge_in_place(target: &mut Value, incoming: Value) {
    match (target.as_object_mut(), incoming) {
        (Some(target_map), Value::Object(incoming_map)) => {
            for (key, val) in incoming_map {
                if val.is_null() {
                    target_map.remove(&key);
                } else {
                    let slot = target_map.entry(key).or_insert(Value::Null);
                    merge_in_place(slot, val);
                }
            }
        },
        (_, incoming) => *target = incoming,
    }
}

/// Walk `old` and `new` in lockstep, recording added/modified/removed leaf
/// and subtree paths under `prefix`.
fn diff_values(old: &Value, new: &Value, prefix: &str, out: &mut Diff) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (key, new_val) in new_map {
                let path = join(prefix, key);
                match old_map.get(key) {
                    None => out.added.push(path),
                    Some(old_val) if old_val != new_val => {
                        if old_val.is_object() && new_val.is_object() {
                            diff_values(old_val, new_val, &path, out);
                        } else {
                            out.modified.push(path);
                        }
                    },
                    _ => {},
                }
            }
            for key in old_map.keys() {
                if !new_map.contains_key(key) {
                    out.removed.push(join(prefix, key));
                }
            }
        },
        _ if old != new => out.modified.push(prefix.to_string()),
        _ => {},
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() { key.to_string() } else { format!("{prefix}.{key}") }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merges_nested_object() {
        let mut root = json!({"voice": {"stt": {"provider": "a"}, "tts": {"provider": "b"}}});
        let diff = apply_patch(&mut root, "voice.stt", json!({"provider": "c"}));
        assert_eq!(root["voice"]["stt"]["provider"], "c");
        assert_eq!(root["voice"]["tts"]["provider"], "b");
        assert_eq!(diff.modified, vec!["voice.stt.provider".to_string()]);
    }

    #[test]
    fn null_value_deletes_key() {
        let mut root = json!({"channels": {"telegram": {"enabled": true}}});
        let diff = apply_patch(&mut root, "channels.telegram", json!({"enabled": null}));
        assert!(root["channels"]["telegram"].get("enabled").is_none());
        assert_eq!(diff.removed, vec!["channels.telegram.enabled".to_string()]);
    }

    #[test]
    fn patch_at_path_creates_missing_parents() {
        let mut root = json!({});
        apply_patch(&mut root, "hooks.notify", json!({"enabled": true}));
        assert_eq!(root["hooks"]["notify"]["enabled"], true);
    }

    #[test]
    fn empty_path_merges_at_root() {
        let mut root = json!({"a": 1});
        let diff = apply_patch(&mut root, "", json!({"b": 2}));
        assert_eq!(root["a"], 1);
        assert_eq!(root["b"], 2);
        assert_eq!(diff.added, vec!["b".to_string()]);
    }

    #[test]
    fn get_path_reads_subtree() {
        let root = json!({"voice": {"stt": {"provider": "a"}}});
        assert_eq!(get_path(&root, "voice.stt").unwrap()["provider"], "a");
        assert!(get_path(&root, "voice.nonexistent").is_none());
    }

    #[test]
    fn no_op_patch_produces_empty_diff() {
        let mut root = json!({"a": 1});
        let diff = apply_patch(&mut root, "", json!({"a": 1}));
        assert!(diff.is_empty());
    }
}
