//! Content hashing for sync operations.
//!
//! SHA256 over the serialized JSON of a document gives a deterministic
//! fingerprint used for change detection on export and import.

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::types::SyncResult;

/// Compute a SHA256 hash of a serializable value.
///
/// The value is first serialized to JSON, then hashed. Struct fields
/// serialize in declaration order, so equal documents hash equally.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized to JSON.
pub fn content_hash<T: Serialize>(value: &T) -> SyncResult<String> {
    let json = serde_json::to_string(value)?;
    Ok(bytes_hash(json.as_bytes()))
}

/// SHA256 of raw bytes as lowercase hex.
#[must_use]
pub fn bytes_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Check if an entity has changed since it was last exported.
///
/// Returns `true` if there is no stored hash or the hashes differ.
#[must_use]
pub fn has_changed(current_hash: &str, stored_hash: Option<&str>) -> bool {
    stored_hash.map_or(true, |h| h != current_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestRecord {
        id: String,
        value: i32,
    }

    #[test]
    fn test_content_hash_deterministic() {
        let record = TestRecord {
            id: "test_1".into(),
            value: 42,
        };

        let hash1 = content_hash(&record).unwrap();
        let hash2 = content_hash(&record).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64); // SHA256 produces 64 hex chars
    }

    #[test]
    fn test_content_hash_changes_with_content() {
        let record1 = TestRecord {
            id: "test_1".into(),
            value: 42,
        };
        let record2 = TestRecord {
            id: "test_1".into(),
            value: 43,
        };

        assert_ne!(content_hash(&record1).unwrap(), content_hash(&record2).unwrap());
    }

    #[test]
    fn test_has_changed() {
        assert!(has_changed("abc123", None));
        assert!(has_changed("abc123", Some("xyz789")));
        assert!(!has_changed("abc123", Some("abc123")));
    }
}
