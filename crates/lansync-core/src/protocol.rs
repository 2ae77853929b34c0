//! Wire types for the sync protocol.
//!
//! All HTTP bodies are JSON. Entries use compact single-letter field tags
//! (`p`/`s`/`m`/`t`/`d`/`h`/`c`/`de`) and omit zero values so manifests and
//! update batches stay small; file content travels base64-encoded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One file or directory, both as an index record and as a wire entry.
///
/// In the in-memory index `content` is always `None`; it is populated only
/// on entries being pushed to a peer. `delete` is set only on wire entries
/// requesting remote deletion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileEntry {
    /// Tree-relative path with `/` separators; the identity shared by peers.
    #[serde(rename = "p")]
    pub path: String,

    /// Size in bytes.
    #[serde(rename = "s", default, skip_serializing_if = "is_zero_u64")]
    pub size: u64,

    /// Unix permission bits (`mode & 0o7777`); 0 on platforms without them.
    #[serde(rename = "m", default, skip_serializing_if = "is_zero_u32")]
    pub mode: u32,

    /// Modification time; absent on delete markers.
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,

    /// Whether this entry is a directory.
    #[serde(rename = "d", default, skip_serializing_if = "is_false")]
    pub is_dir: bool,

    /// 64-bit content fingerprint (directories carry a path placeholder).
    #[serde(rename = "h", default, skip_serializing_if = "is_zero_u64")]
    pub hash: u64,

    /// Raw content, populated only when transmitting. Base64 on the wire.
    #[serde(
        rename = "c",
        default,
        skip_serializing_if = "Option::is_none",
        with = "content_bytes"
    )]
    pub content: Option<Vec<u8>>,

    /// Set on wire entries that ask the receiver to delete `path`.
    #[serde(rename = "de", default, skip_serializing_if = "is_false")]
    pub delete: bool,
}

impl FileEntry {
    /// Wire entry asking the receiver to remove `path` recursively.
    pub fn delete_marker(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: 0,
            mode: 0,
            modified: None,
            is_dir: false,
            hash: 0,
            content: None,
            delete: true,
        }
    }

    /// Copy of this entry without content, for manifests.
    pub fn without_content(&self) -> Self {
        let mut entry = self.clone();
        entry.content = None;
        entry
    }
}

/// Manifest a node exposes on `GET /list`: what it has and how fresh it is.
///
/// `hashes` maps content fingerprints to minimal (content-free) entries.
/// Directories are included under their placeholder fingerprint so the
/// delete direction of reconciliation can see peer directory paths.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileUpdate {
    #[serde(rename = "Hashes", default)]
    pub hashes: HashMap<u64, FileEntry>,

    /// Maximum modification time across the node's indexed files.
    #[serde(rename = "LastModified")]
    pub last_modified: DateTime<Utc>,
}

impl Default for FileUpdate {
    fn default() -> Self {
        Self {
            hashes: HashMap::new(),
            last_modified: DateTime::UNIX_EPOCH,
        }
    }
}

/// Result of `POST /update`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub success: bool,
    pub message: String,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: "updated".to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero_u64(value: &u64) -> bool {
    *value == 0
}

fn is_zero_u32(value: &u32) -> bool {
    *value == 0
}

/// Base64 (de)serialization for optional content bytes; raw bytes marshal
/// to base64 strings on the wire.
mod content_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => STANDARD.encode(bytes).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn sample_entry() -> FileEntry {
        FileEntry {
            path: "notes/today.md".to_string(),
            size: 5,
            mode: 0o644,
            modified: DateTime::from_timestamp(1_700_000_000, 0),
            is_dir: false,
            hash: 0xDEAD_BEEF,
            content: Some(b"hello".to_vec()),
            delete: false,
        }
    }

    #[test]
    fn test_entry_content_is_base64_on_the_wire() {
        let entry = sample_entry();
        let value = serde_json::to_value(&entry).unwrap();

        assert_eq!(value["p"], "notes/today.md");
        assert_eq!(value["c"], "aGVsbG8=");
        // delete flag and zero fields are omitted entirely
        assert!(value.get("de").is_none());

        let back: FileEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_delete_marker_serializes_minimally() {
        let marker = FileEntry::delete_marker("old.txt");
        let value = serde_json::to_value(&marker).unwrap();

        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 2, "only path and delete flag: {object:?}");
        assert_eq!(value["p"], "old.txt");
        assert_eq!(value["de"], true);

        let back: FileEntry = serde_json::from_value(value).unwrap();
        assert!(back.delete);
        assert!(back.modified.is_none());
    }

    #[test]
    fn test_manifest_wire_shape() {
        let mut manifest = FileUpdate {
            last_modified: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            ..Default::default()
        };
        manifest
            .hashes
            .insert(42, sample_entry().without_content());

        let value = serde_json::to_value(&manifest).unwrap();
        // u64 map keys become JSON object keys (strings)
        assert!(value["Hashes"]["42"].is_object());
        assert!(value["Hashes"]["42"].get("c").is_none());
        assert!(value["LastModified"].is_string());

        let back: FileUpdate = serde_json::from_value(value).unwrap();
        assert_eq!(back, manifest);
    }

    #[test]
    fn test_response_decodes_from_literal_json() {
        let raw = r#"{"success":false,"message":"invalid character 'x'"}"#;
        let response: Response = serde_json::from_str(raw).unwrap();
        assert!(!response.success);
        assert_eq!(response.message, "invalid character 'x'");
    }
}
