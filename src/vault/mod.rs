//! Vault I/O: content-addressed asset files on disk.
//!
//! Layout: `<root>/projects/<alias>/assets/<hash><ext>`. The [`Vault`] trait
//! is the contract the rest of the core depends on; everything else in this
//! module works through it.

use crate::content;
use crate::error::{Error, Result, ResultIoExt};
use crate::models::AssetInfo;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Directory contract for project asset storage
#[async_trait]
pub trait Vault: Send + Sync {
    /// Directory holding a project's asset files
    fn assets_path(&self, alias: &str) -> PathBuf;

    /// Create the project's directory tree if missing
    async fn ensure_project_dir(&self, alias: &str) -> Result<()>;
}

/// Filesystem vault rooted at a single directory
pub struct FsVault {
    root: PathBuf,
}

impl FsVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Vault for FsVault {
    fn assets_path(&self, alias: &str) -> PathBuf {
        self.root.join("projects").join(alias).join("assets")
    }

    async fn ensure_project_dir(&self, alias: &str) -> Result<()> {
        let dir = self.assets_path(alias);
        fs::create_dir_all(&dir).await.map_io_err(&dir)?;
        Ok(())
    }
}

/// Write content into the vault under its hash.
///
/// Deduplicates on the content address: if `<hash><ext>` already exists the
/// write is skipped and `already_exist` is set. New files go through a
/// temp-file + rename in the target directory so a crash leaves either no
/// file or the complete file.
pub async fn write_asset(
    vault: &dyn Vault,
    alias: &str,
    data: &[u8],
    ext: &str,
) -> Result<AssetInfo> {
    if data.is_empty() {
        return Err(Error::EmptyData);
    }
    content::validate_alias(alias)?;
    content::validate_extension(ext)?;

    let hash = content::compute_hash(data);
    let mime = content::detect_mime(ext).to_string();

    vault.ensure_project_dir(alias).await?;

    let dir = vault.assets_path(alias);
    let final_path = dir.join(format!("{}{}", hash, ext));

    if fs::try_exists(&final_path).await.map_io_err(&final_path)? {
        tracing::debug!(hash, alias, "Asset content already in vault");
        return Ok(AssetInfo {
            hash,
            ext: ext.to_string(),
            bytes: data.len() as u64,
            mime,
            already_exist: true,
        });
    }

    let tmp_path = dir.join(format!(".{}{}.{}.tmp", hash, ext, uuid::Uuid::new_v4()));

    let mut file = fs::File::create(&tmp_path).await.map_io_err(&tmp_path)?;
    file.write_all(data).await.map_io_err(&tmp_path)?;
    file.sync_all().await.map_io_err(&tmp_path)?;
    drop(file);

    if let Err(e) = fs::rename(&tmp_path, &final_path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(Error::Io {
            error: e,
            path: final_path.display().to_string(),
        });
    }

    Ok(AssetInfo {
        hash,
        ext: ext.to_string(),
        bytes: data.len() as u64,
        mime,
        already_exist: false,
    })
}

/// Read an asset and verify its content still hashes to `hash`
pub async fn read_asset(vault: &dyn Vault, alias: &str, hash: &str, ext: &str) -> Result<Vec<u8>> {
    content::validate_alias(alias)?;
    content::validate_hash(hash)?;
    content::validate_extension(ext)?;

    let path = vault.assets_path(alias).join(format!("{}{}", hash, ext));

    let data = match fs::read(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound {
                hash: hash.to_string(),
            });
        }
        Err(e) => {
            return Err(Error::Io {
                error: e,
                path: path.display().to_string(),
            });
        }
    };

    let actual = content::compute_hash(&data);
    if actual != hash {
        return Err(Error::HashMismatch {
            hash: hash.to_string(),
            actual,
        });
    }

    Ok(data)
}

/// Remove an asset file
pub async fn delete_asset(vault: &dyn Vault, alias: &str, hash: &str, ext: &str) -> Result<()> {
    content::validate_alias(alias)?;
    content::validate_hash(hash)?;
    content::validate_extension(ext)?;

    let path = vault.assets_path(alias).join(format!("{}{}", hash, ext));

    match fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFound {
            hash: hash.to_string(),
        }),
        Err(e) => Err(Error::Io {
            error: e,
            path: path.display().to_string(),
        }),
    }
}

/// Check whether an asset file is present
pub async fn asset_exists(vault: &dyn Vault, alias: &str, hash: &str, ext: &str) -> Result<bool> {
    content::validate_alias(alias)?;
    content::validate_hash(hash)?;
    content::validate_extension(ext)?;

    let path = vault.assets_path(alias).join(format!("{}{}", hash, ext));
    fs::try_exists(&path).await.map_io_err(&path)
}
