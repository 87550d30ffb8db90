//! Object-storage destination configuration.

use bulk_core::{BulkError, Result};
use serde::{Deserialize, Serialize};

use crate::credentials::KeyFile;
use crate::format::{FileCompression, FileFormat};
use crate::s3::S3Options;

/// Settings common to every object-storage destination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Key prefix under which all files of the destination are written.
    pub folder: String,
    pub format: FileFormat,
    pub compression: FileCompression,
}

/// S3 destination.
///
/// # YAML Format
///
/// ```yaml
/// bucket: analytics-events
/// region: eu-west-1
/// folder: bulker
/// format: ndjson
/// compression: gzip
/// accessKey:
///   accessKeyId: AKIA...
///   secretAccessKey: ...
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Config {
    pub bucket: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub format: FileFormat,
    #[serde(default)]
    pub compression: FileCompression,
    #[serde(default)]
    pub access_key: serde_json::Value,
}

impl S3Config {
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let config: S3Config = serde_json::from_value(value)
            .map_err(|e| BulkError::config(format!("invalid s3 config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(BulkError::config("s3: bucket is required"));
        }
        validate_folder(&self.folder)?;
        KeyFile::from_value(&self.access_key)?;
        Ok(())
    }

    pub fn file_config(&self) -> FileConfig {
        FileConfig {
            folder: self.folder.clone(),
            format: self.format,
            compression: self.compression,
        }
    }

    pub fn s3_options(&self) -> Result<S3Options> {
        Ok(S3Options {
            bucket: self.bucket.clone(),
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            force_path_style: self.force_path_style,
            key_file: Some(KeyFile::from_value(&self.access_key)?),
        })
    }
}

/// Local filesystem destination, a directory standing in for a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalConfig {
    pub path: String,
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub format: FileFormat,
    #[serde(default)]
    pub compression: FileCompression,
}

impl LocalConfig {
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let config: LocalConfig = serde_json::from_value(value)
            .map_err(|e| BulkError::config(format!("invalid file config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.path.trim().is_empty() {
            return Err(BulkError::config("file: path is required"));
        }
        validate_folder(&self.folder)
    }

    pub fn file_config(&self) -> FileConfig {
        FileConfig {
            folder: self.folder.clone(),
            format: self.format,
            compression: self.compression,
        }
    }
}

fn validate_folder(folder: &str) -> Result<()> {
    if folder.starts_with('/') || folder.split('/').any(|part| part == "..") {
        return Err(BulkError::config(format!(
            "folder '{folder}' must be a relative key prefix"
        )));
    }
    Ok(())
}
