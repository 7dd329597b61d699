//! Content primitives: hashing, hex/extension/alias validation, MIME lookup
//! and image magic-number sniffing.
//!
//! Everything here is pure; the vault and the service build their path and
//! policy decisions on top of these functions.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};

/// Image extensions accepted by the upload path. Anything else must sniff to
/// one of these or be rejected.
pub const ALLOWED_IMAGE_EXTENSIONS: [&str; 5] = [".png", ".jpg", ".jpeg", ".webp", ".gif"];

/// Calculate the lowercase hex SHA256 digest of a byte slice
pub fn compute_hash(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Validate a content hash: exactly 64 lowercase hex characters
pub fn validate_hash(hash: &str) -> Result<()> {
    if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
        return Err(Error::InvalidHash {
            hash: hash.to_string(),
        });
    }
    Ok(())
}

/// Validate a file extension: empty, or `.` followed by 1-9 alphanumerics
pub fn validate_extension(ext: &str) -> Result<()> {
    if ext.is_empty() {
        return Ok(());
    }

    let valid = ext.starts_with('.')
        && (2..=10).contains(&ext.len())
        && ext[1..].bytes().all(|b| b.is_ascii_alphanumeric());

    if !valid {
        return Err(Error::InvalidExtension {
            ext: ext.to_string(),
        });
    }
    Ok(())
}

/// Lowercase an extension and prepend the dot if missing. Empty stays empty.
pub fn normalize_extension(ext: &str) -> String {
    if ext.is_empty() {
        return String::new();
    }
    let lower = ext.to_ascii_lowercase();
    if lower.starts_with('.') {
        lower
    } else {
        format!(".{}", lower)
    }
}

/// Validate a project alias: `@` followed by lowercase alphanumerics and
/// hyphens, 2-32 characters total.
///
/// The alias becomes a directory component under the vault root, so this is
/// also the path-traversal guard; reject anything outside the grammar before
/// a path is ever built from it.
pub fn validate_alias(alias: &str) -> Result<()> {
    if alias.is_empty() || alias.chars().all(char::is_whitespace) {
        return Err(Error::MissingField {
            field: "project_alias".to_string(),
        });
    }

    let valid = alias.starts_with('@')
        && (2..=32).contains(&alias.len())
        && alias[1..]
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');

    if !valid {
        return Err(Error::InvalidAlias {
            alias: alias.to_string(),
        });
    }
    Ok(())
}

/// Look up the MIME type for a normalised extension.
/// Unknown extensions fall back to `application/octet-stream`.
pub fn detect_mime(ext: &str) -> &'static str {
    match ext {
        ".png" => "image/png",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".gif" => "image/gif",
        ".webp" => "image/webp",
        ".svg" => "image/svg+xml",
        ".pdf" => "application/pdf",
        ".mp4" => "video/mp4",
        ".webm" => "video/webm",
        ".mp3" => "audio/mpeg",
        ".wav" => "audio/wav",
        ".txt" => "text/plain",
        ".md" => "text/markdown",
        ".json" => "application/json",
        ".xml" => "application/xml",
        ".zip" => "application/zip",
        ".tar" => "application/x-tar",
        ".gz" => "application/gzip",
        _ => "application/octet-stream",
    }
}

/// Map a declared MIME type to an extension for sessions whose filename
/// carries none. Unknown types default to `.png` (the dominant payload).
pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/png" => ".png",
        "image/jpeg" => ".jpg",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        _ => ".png",
    }
}

/// Extract and normalise the extension from a filename. `"photo.PNG"` ->
/// `".png"`, `"README"` -> `""`.
pub fn extension_of(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            normalize_extension(ext)
        }
        _ => String::new(),
    }
}

/// Sniff the leading bytes for a known image signature.
///
/// Returns the corresponding allow-listed extension, or None if the content
/// does not look like a supported image.
pub fn sniff_image_extension(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        return Some(".png");
    }
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(".jpg");
    }
    if data.starts_with(&[0x47, 0x49, 0x46, 0x38]) {
        return Some(".gif");
    }
    // RIFF container with a WEBP fourcc at offset 8
    if data.len() >= 12 && data.starts_with(&[0x52, 0x49, 0x46, 0x46]) && &data[8..12] == b"WEBP" {
        return Some(".webp");
    }
    None
}
