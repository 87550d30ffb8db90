//! Access-key credentials for object-storage destinations.
//!
//! The `accessKey` entry of a destination may be given as:
//!
//! - a JSON object: `{"accessKeyId": "...", "secretAccessKey": "...", "sessionToken": "..."}`
//! - the same object JSON-encoded in a string
//! - a path to a file holding that JSON
//! - the sentinel `"workload_identity"`, or no entry at all, to use the
//!   ambient provider chain (environment, profile, instance role)

use bulk_core::{BulkError, Result};
use serde::Deserialize;

pub const WORKLOAD_IDENTITY: &str = "workload_identity";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessKey {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyFile {
    Static(AccessKey),
    WorkloadIdentity,
}

impl KeyFile {
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Null => Ok(KeyFile::WorkloadIdentity),
            serde_json::Value::Object(map) => {
                if map.is_empty() {
                    return Err(BulkError::config("accessKey is required"));
                }
                decode(value.clone())
            }
            serde_json::Value::String(s) => {
                let s = s.trim();
                if s == WORKLOAD_IDENTITY {
                    Ok(KeyFile::WorkloadIdentity)
                } else if s.is_empty() {
                    Err(BulkError::config("accessKey is required"))
                } else if s.contains('{') {
                    let parsed = serde_json::from_str(s)
                        .map_err(|e| BulkError::config(format!("malformed accessKey: {e}")))?;
                    decode(parsed)
                } else {
                    let contents = std::fs::read_to_string(s).map_err(|e| {
                        BulkError::config(format!("cannot read accessKey file '{s}': {e}"))
                    })?;
                    let parsed = serde_json::from_str(&contents).map_err(|e| {
                        BulkError::config(format!("malformed accessKey file '{s}': {e}"))
                    })?;
                    decode(parsed)
                }
            }
            _ => Err(BulkError::config(
                "accessKey must be a string or a JSON object",
            )),
        }
    }
}

fn decode(value: serde_json::Value) -> Result<KeyFile> {
    let key: AccessKey = serde_json::from_value(value)
        .map_err(|e| BulkError::config(format!("malformed accessKey: {e}")))?;
    if key.access_key_id.is_empty() || key.secret_access_key.is_empty() {
        return Err(BulkError::config(
            "accessKey requires accessKeyId and secretAccessKey",
        ));
    }
    Ok(KeyFile::Static(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn expected() -> KeyFile {
        KeyFile::Static(AccessKey {
            access_key_id: "AKID".to_string(),
            secret_access_key: "SECRET".to_string(),
            session_token: None,
        })
    }

    #[test]
    fn test_json_object() {
        let value = json!({"accessKeyId": "AKID", "secretAccessKey": "SECRET"});
        assert_eq!(KeyFile::from_value(&value).unwrap(), expected());
    }

    #[test]
    fn test_json_string() {
        let value = json!(r#"{"accessKeyId": "AKID", "secretAccessKey": "SECRET"}"#);
        assert_eq!(KeyFile::from_value(&value).unwrap(), expected());
    }

    #[test]
    fn test_file_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"accessKeyId": "AKID", "secretAccessKey": "SECRET"}}"#).unwrap();
        let value = json!(file.path().to_str().unwrap());
        assert_eq!(KeyFile::from_value(&value).unwrap(), expected());
    }

    #[test]
    fn test_workload_identity() {
        assert_eq!(
            KeyFile::from_value(&json!("workload_identity")).unwrap(),
            KeyFile::WorkloadIdentity
        );
        assert_eq!(
            KeyFile::from_value(&serde_json::Value::Null).unwrap(),
            KeyFile::WorkloadIdentity
        );
    }

    #[test]
    fn test_invalid_forms() {
        for value in [
            json!(""),
            json!({}),
            json!(42),
            json!("/nonexistent/key.json"),
            json!({"accessKeyId": "AKID"}),
            json!("{not json"),
        ] {
            assert!(
                matches!(KeyFile::from_value(&value), Err(BulkError::Config(_))),
                "{value} should be rejected"
            );
        }
    }
}
