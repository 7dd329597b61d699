//! Asset service facade.
//!
//! Composes the content primitives, the vault, the index store and the
//! session manager into the operations the rest of the application calls.

use crate::clock::Clock;
use crate::content;
use crate::error::{Error, Result};
use crate::models::{Asset, AssetInfo};
use crate::notify::ChangeNotifier;
use crate::session::{NewSessionRequest, UploadSessionManager};
use crate::store::AssetStore;
use crate::vault::{self, Vault};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

/// Result of finalising a chunked upload
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FinalizedUpload {
    /// Stable public URL for the stored asset
    pub url: String,
    /// SHA256 content hash
    pub hash: String,
    /// Dotted lowercase extension
    pub ext: String,
    /// Content size in bytes
    pub bytes: u64,
}

pub struct AssetService {
    store: AssetStore,
    vault: Arc<dyn Vault>,
    sessions: Arc<UploadSessionManager>,
    notifier: Arc<dyn ChangeNotifier>,
    clock: Arc<dyn Clock>,
    max_upload_bytes: u64,
}

impl AssetService {
    pub fn new(
        store: AssetStore,
        vault: Arc<dyn Vault>,
        sessions: Arc<UploadSessionManager>,
        notifier: Arc<dyn ChangeNotifier>,
        clock: Arc<dyn Clock>,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            store,
            vault,
            sessions,
            notifier,
            clock,
            max_upload_bytes,
        }
    }

    /// Store raw bytes as an asset of a project.
    ///
    /// The extension comes from the filename when it is on the image
    /// allow-list; otherwise the content is sniffed for a known image
    /// signature. Content that is neither is rejected.
    pub async fn upload(&self, alias: &str, data: &[u8], filename: &str) -> Result<AssetInfo> {
        content::validate_alias(alias)?;

        if data.is_empty() {
            return Err(Error::EmptyData);
        }
        if data.len() as u64 > self.max_upload_bytes {
            return Err(Error::FileTooLarge {
                size: data.len() as u64,
                limit: self.max_upload_bytes,
            });
        }

        let ext = resolve_extension(data, filename)?;

        let info = vault::write_asset(self.vault.as_ref(), alias, data, &ext).await?;

        let asset = Asset {
            hash: info.hash.clone(),
            alias: alias.to_string(),
            ext: info.ext.clone(),
            bytes: info.bytes,
            mime: info.mime.clone(),
            created_at: self.clock.now(),
        };
        let existed = self.store.upsert(&asset).await?;

        metrics::counter!("asset_uploads_total").increment(1);
        metrics::counter!("asset_upload_bytes_total").increment(info.bytes);

        tracing::info!(
            hash = %info.hash,
            alias,
            bytes = info.bytes,
            deduplicated = info.already_exist,
            row_existed = existed,
            "Stored asset"
        );

        self.notify(&format!("uploaded asset {}{}", info.hash, info.ext))
            .await;

        Ok(info)
    }

    /// Stable public URL for an asset
    pub fn build_url(&self, alias: &str, hash: &str, ext: &str) -> Result<String> {
        content::validate_alias(alias)?;
        content::validate_hash(hash)?;
        content::validate_extension(ext)?;
        Ok(format!("/assets/{}/{}{}", alias, hash, ext))
    }

    /// Fetch an asset's index row
    pub async fn get_asset(&self, hash: &str) -> Result<Asset> {
        self.store.get_by_hash(hash).await
    }

    /// Read an asset's bytes from the vault, verifying content integrity
    pub async fn read_asset(&self, alias: &str, hash: &str, ext: &str) -> Result<Vec<u8>> {
        vault::read_asset(self.vault.as_ref(), alias, hash, ext).await
    }

    pub async fn link_to_document(&self, doc_path: &str, hash: &str) -> Result<()> {
        self.store.link_to_document(hash, doc_path).await
    }

    pub async fn unlink_from_document(&self, doc_path: &str, hash: &str) -> Result<()> {
        self.store.unlink_from_document(hash, doc_path).await
    }

    pub async fn unlink_all_from_document(&self, doc_path: &str) -> Result<u64> {
        self.store.unlink_all_from_document(doc_path).await
    }

    /// Assets referenced by a document, newest first
    pub async fn document_assets(&self, doc_path: &str) -> Result<Vec<Asset>> {
        self.store.get_document_assets(doc_path).await
    }

    /// Open a chunked-upload session
    pub fn start_chunked_upload(&self, req: &NewSessionRequest) -> Result<String> {
        let upload_id = self.sessions.create_session(req)?;
        tracing::debug!(
            upload_id,
            alias = %req.project_alias,
            filename = %req.filename,
            "Started chunked upload"
        );
        Ok(upload_id)
    }

    /// Add one chunk to a session
    pub async fn upload_chunk(
        &self,
        upload_id: &str,
        chunk_index: u32,
        base64_data: &str,
    ) -> Result<(u32, bool)> {
        self.sessions.add_chunk(upload_id, chunk_index, base64_data).await
    }

    /// Assemble a complete session and run the regular upload path on the
    /// result. The assembled bytes are dropped if any step fails.
    pub async fn finalize_chunked_upload(&self, upload_id: &str) -> Result<FinalizedUpload> {
        let (data, metadata) = self.sessions.assemble_and_remove(upload_id).await?;

        // A bare filename takes its extension from the declared MIME type
        let filename = if content::extension_of(&metadata.filename).is_empty() {
            format!("{}{}", metadata.filename, metadata.derived_extension())
        } else {
            metadata.filename.clone()
        };

        let info = self
            .upload(&metadata.project_alias, &data, &filename)
            .await?;
        let url = self.build_url(&metadata.project_alias, &info.hash, &info.ext)?;

        Ok(FinalizedUpload {
            url,
            hash: info.hash,
            ext: info.ext,
            bytes: info.bytes,
        })
    }

    /// Cancel an in-flight chunked upload
    pub async fn abort_chunked_upload(&self, upload_id: &str) -> Result<()> {
        self.sessions.remove_session(upload_id).await
    }

    /// Delete this project's orphaned assets: the index row first, then a
    /// best-effort file removal. Returns the number of deleted assets.
    pub async fn cleanup_orphans(&self, alias: &str) -> Result<u64> {
        content::validate_alias(alias)?;

        let orphans = self.store.get_orphaned_assets().await?;

        let mut deleted = 0u64;
        for orphan in orphans {
            // Rows owned by other projects are reaped by their own cleanup;
            // their files live under those projects' directories.
            if orphan.alias != alias {
                continue;
            }

            match self.store.delete(&orphan.hash).await {
                Ok(()) => {}
                // A concurrent cleanup got here first
                Err(Error::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            }
            deleted += 1;

            // The index is the source of truth; a failed file removal only
            // leaves an unreferenced vault file behind.
            if let Err(e) = vault::delete_asset(
                self.vault.as_ref(),
                &orphan.alias,
                &orphan.hash,
                &orphan.ext,
            )
            .await
            {
                metrics::counter!("orphan_file_removal_failures_total").increment(1);
                tracing::warn!(
                    hash = %orphan.hash,
                    alias = %orphan.alias,
                    error = %e,
                    "Failed to remove orphaned asset file"
                );
            }
        }

        if deleted > 0 {
            metrics::counter!("orphaned_assets_reaped_total").increment(deleted);
            tracing::info!(count = deleted, alias, "Cleaned up orphaned assets");
            self.notify(&format!("cleaned up {} orphaned assets", deleted))
                .await;
        }

        Ok(deleted)
    }

    async fn notify(&self, reason: &str) {
        // Advisory only; the notifier must never fail the operation
        self.notifier.notify(reason).await;
    }
}

/// Determine the stored extension for an upload: allow-listed filename
/// extension, or a sniffed image signature.
fn resolve_extension(data: &[u8], filename: &str) -> Result<String> {
    let ext = content::extension_of(filename);
    if content::ALLOWED_IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return Ok(ext);
    }

    if let Some(sniffed) = content::sniff_image_extension(data) {
        return Ok(sniffed.to_string());
    }

    Err(Error::UnsupportedType {
        detail: if ext.is_empty() {
            format!("'{}' has no extension and unrecognized content", filename)
        } else {
            format!("extension '{}' is not an allowed image type", ext)
        },
    })
}
