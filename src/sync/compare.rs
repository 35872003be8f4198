//! Shared-field comparison between two exported documents.

use std::collections::BTreeSet;

use serde_json::Value;

/// Fields that never make two documents differ.
///
/// Environment tags and the update stamp move on every touch; sync metadata
/// is recomputed per export.
pub const IGNORED_FIELDS: &[&str] = &[
    "created_in_env",
    "last_touched_env",
    "updated_at",
    "content_hash",
    "exported_at",
    "type",
];

/// Top-level fields whose values differ, sorted.
///
/// A missing field and an explicit `null` are treated as equal.
#[must_use]
pub fn differing_fields(local: &Value, incoming: &Value) -> Vec<String> {
    let empty = serde_json::Map::new();
    let local = local.as_object().unwrap_or(&empty);
    let incoming = incoming.as_object().unwrap_or(&empty);

    local
        .keys()
        .chain(incoming.keys())
        .filter(|key| !IGNORED_FIELDS.contains(&key.as_str()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter(|key| {
            let a = local.get(*key).unwrap_or(&Value::Null);
            let b = incoming.get(*key).unwrap_or(&Value::Null);
            a != b
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identical_documents() {
        let doc = json!({"id": "p1", "title": "a", "priority": 1});
        assert!(differing_fields(&doc, &doc).is_empty());
    }

    #[test]
    fn test_env_tags_and_updated_at_ignored() {
        let local = json!({"id": "s1", "title": "a", "updated_at": 1, "last_touched_env": "home"});
        let incoming = json!({"id": "s1", "title": "a", "updated_at": 2, "last_touched_env": "office"});
        assert!(differing_fields(&local, &incoming).is_empty());
    }

    #[test]
    fn test_reports_sorted_fields() {
        let local = json!({"title": "a", "status": "open", "cwd": "$workspace/x"});
        let incoming = json!({"title": "b", "status": "open", "cwd": "$workspace/y"});
        assert_eq!(differing_fields(&local, &incoming), vec!["cwd", "title"]);
    }

    #[test]
    fn test_missing_equals_null() {
        let local = json!({"title": "a", "description": null});
        let incoming = json!({"title": "a"});
        assert!(differing_fields(&local, &incoming).is_empty());

        let incoming = json!({"title": "a", "description": "new"});
        assert_eq!(differing_fields(&local, &incoming), vec!["description"]);
    }
}
