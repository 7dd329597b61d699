use asset_vault::api::AppState;
use asset_vault::clock::ManualClock;
use asset_vault::config::Config;
use asset_vault::notify::ChangeNotifier;
use asset_vault::service::AssetService;
use asset_vault::session::UploadSessionManager;
use asset_vault::store::{AssetStore, run_migrations};
use asset_vault::vault::FsVault;
use async_trait::async_trait;
use axum::Router;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Notifier that records every reason for later assertions
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    reasons: Arc<Mutex<Vec<String>>>,
}

impl RecordingNotifier {
    pub fn reasons(&self) -> Vec<String> {
        self.reasons.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChangeNotifier for RecordingNotifier {
    async fn notify(&self, reason: &str) {
        self.reasons.lock().unwrap().push(reason.to_string());
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub clock: ManualClock,
    pub notifier: RecordingNotifier,
    pub vault_root: PathBuf,
}

pub async fn setup_test_app() -> TestApp {
    // Create temporary directory for the vault
    let temp_dir = TempDir::new().unwrap();
    let vault_root = temp_dir.path().to_path_buf();

    // Don't drop temp_dir - leak it so it persists for the test
    std::mem::forget(temp_dir);

    let mut config = Config::default();
    config.vault.root = vault_root.clone();
    config.database.url = "sqlite::memory:".to_string();

    // A single connection keeps the in-memory database shared
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();

    let clock = ManualClock::new(Utc::now());
    let notifier = RecordingNotifier::default();

    let store = AssetStore::with_pool(pool, Arc::new(clock.clone()));
    let vault = Arc::new(FsVault::new(vault_root.clone()));
    let sessions = Arc::new(UploadSessionManager::new(
        Arc::new(clock.clone()),
        config.session_timeout(),
    ));

    let service = AssetService::new(
        store,
        vault,
        sessions,
        Arc::new(notifier.clone()),
        Arc::new(clock.clone()),
        config.server.max_upload_size.as_u64(),
    );

    let state = Arc::new(AppState {
        service,
        config: config.clone(),
    });

    TestApp {
        router: asset_vault::build_router(state.clone()),
        state,
        clock,
        notifier,
        vault_root,
    }
}

pub const MULTIPART_BOUNDARY: &str = "test-boundary-7MA4YWxkTrZu0gW";

/// Build a `multipart/form-data` body with `project` and `file` fields
pub fn multipart_body(project: &str, filename: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();

    body.extend_from_slice(format!("--{}\r\n", MULTIPART_BOUNDARY).as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"project\"\r\n\r\n");
    body.extend_from_slice(project.as_bytes());
    body.extend_from_slice(b"\r\n");

    body.extend_from_slice(format!("--{}\r\n", MULTIPART_BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
            filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(b"\r\n");

    body.extend_from_slice(format!("--{}--\r\n", MULTIPART_BOUNDARY).as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={}", MULTIPART_BOUNDARY)
}

/// Minimal valid-looking PNG payload (signature + filler)
pub fn png_bytes(filler: &[u8]) -> Vec<u8> {
    let mut data = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
    data.extend_from_slice(filler);
    data
}
