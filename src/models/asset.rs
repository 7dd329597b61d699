use crate::content;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// An immutable binary blob identified by its content hash
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Asset {
    /// SHA256 content hash, 64 lowercase hex characters
    pub hash: String,
    /// Project whose vault directory holds the file; a re-upload of the
    /// same content under another project retargets this
    pub alias: String,
    /// Dotted lowercase extension, or empty
    pub ext: String,
    /// Content size in bytes
    pub bytes: u64,
    /// MIME type
    pub mime: String,
    /// First-upload timestamp; preserved across re-uploads of the same content
    pub created_at: DateTime<Utc>,
}

impl Asset {
    /// Check all field invariants
    pub fn validate(&self) -> Result<()> {
        content::validate_hash(&self.hash)?;
        content::validate_alias(&self.alias)?;
        content::validate_extension(&self.ext)?;

        if self.bytes == 0 {
            return Err(Error::EmptyData);
        }
        if self.mime.is_empty() {
            return Err(Error::MissingField {
                field: "mime".to_string(),
            });
        }
        if self.created_at.timestamp_nanos_opt() == Some(0) {
            return Err(Error::MissingField {
                field: "created_at".to_string(),
            });
        }

        Ok(())
    }

    /// Filename of this asset inside a project's assets directory
    pub fn filename(&self) -> String {
        format!("{}{}", self.hash, self.ext)
    }
}

/// Result of writing content into the vault
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AssetInfo {
    /// SHA256 content hash
    pub hash: String,
    /// Dotted lowercase extension, or empty
    pub ext: String,
    /// Content size in bytes
    pub bytes: u64,
    /// MIME type detected from the extension
    pub mime: String,
    /// Whether identical content was already present in the vault
    pub already_exist: bool,
}

/// A row asserting that a document references an asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocAssetLink {
    pub doc_path: String,
    pub hash: String,
}
