use derive_more::Display;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display)]
pub enum Error {
    #[display("IO error at {path}: {error}")]
    Io { error: std::io::Error, path: String },

    #[display("Empty data")]
    EmptyData,

    #[display("File too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[display("Invalid hash: {hash}")]
    InvalidHash { hash: String },

    #[display("Invalid extension: {ext}")]
    InvalidExtension { ext: String },

    #[display("Invalid project alias: {alias}")]
    InvalidAlias { alias: String },

    #[display("Unsupported file type: {detail}")]
    UnsupportedType { detail: String },

    #[display("Missing field: {field}")]
    MissingField { field: String },

    #[display("Chunk index {index} out of range (0-{last})")]
    ChunkIndexOutOfRange { index: u32, last: u32 },

    #[display("Duplicate chunk: {index}")]
    DuplicateChunk { index: u32 },

    #[display("Invalid base64 chunk data: {detail}")]
    InvalidBase64 { detail: String },

    #[display("Asset not found: {hash}")]
    NotFound { hash: String },

    #[display("Document link not found: {doc_path} -> {hash}")]
    LinkNotFound { doc_path: String, hash: String },

    #[display("Upload session not found: {upload_id}")]
    SessionNotFound { upload_id: String },

    #[display("Upload incomplete, missing chunks: {missing:?}")]
    MissingChunks { missing: Vec<u32> },

    #[display("Hash mismatch for {hash}: content hashed to {actual}")]
    HashMismatch { hash: String, actual: String },

    #[display("Database error: {msg}")]
    Database { msg: String },

    #[display("Configuration error: {msg}")]
    Config { msg: String },
}

impl std::error::Error for Error {}

// Implement From<std::io::Error> for cases where path context is not available
impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io {
            error,
            path: "<unknown>".to_string(),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(error: sqlx::Error) -> Self {
        Error::Database {
            msg: error.to_string(),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        Error::Database {
            msg: error.to_string(),
        }
    }
}

// Implement axum IntoResponse for Error
impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            // Missing assets on the read surface map to 404; everything else
            // the client caused maps to 400 below.
            Error::NotFound { hash } => (
                axum::http::StatusCode::NOT_FOUND,
                format!("Asset not found: {}", hash),
            ),
            Error::Io { error, path } => {
                // Log the full error with path internally, return a generic
                // message - never expose file paths
                tracing::error!("IO error at path {}: {}", path, error);
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            Error::Database { msg } => {
                tracing::error!("Database error: {}", msg);
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            Error::Config { msg } => {
                tracing::error!("Configuration error: {}", msg);
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "Configuration error".to_string(),
                )
            }
            Error::HashMismatch { hash, actual } => {
                // Corrupted vault content. Log the mismatch, keep the body generic.
                tracing::error!(hash, actual, "Stored content failed hash verification");
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            other => (axum::http::StatusCode::BAD_REQUEST, other.to_string()),
        };

        let body = axum::Json(serde_json::json!({
            "success": false,
            "error": message,
        }));

        (status, body).into_response()
    }
}

/// Extension trait for converting I/O errors to custom errors with path context
pub trait ResultIoExt<T> {
    /// Map I/O errors with path context
    fn map_io_err(self, path: &std::path::Path) -> Result<T>;
}

impl<T> ResultIoExt<T> for std::result::Result<T, std::io::Error> {
    fn map_io_err(self, path: &std::path::Path) -> Result<T> {
        self.map_err(|error| Error::Io {
            error,
            path: path.display().to_string(),
        })
    }
}
