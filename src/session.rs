//! In-memory chunked-upload sessions.
//!
//! Sessions hold decoded chunks until the payload is complete, then hand the
//! assembled bytes to the service. The table is a concurrent map so the
//! reaper can walk it without stalling individual uploads; each session has
//! its own async mutex, and removal only ever happens while that mutex is
//! held, so every operation re-checks map membership after locking.

use crate::clock::Clock;
use crate::content;
use crate::error::{Error, Result};
use base64::Engine;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use utoipa::ToSchema;

/// Default inactivity timeout: 5 minutes
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(300);

/// Hard ceiling on a chunked payload: 10 MiB
pub const MAX_CHUNKED_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Request to open a chunked-upload session
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewSessionRequest {
    pub project_alias: String,
    pub filename: String,
    pub total_size: u64,
    pub total_chunks: u32,
    pub mime_type: String,
}

/// What survives a session after assembly: enough to finish the upload
#[derive(Debug, Clone)]
pub struct SessionMetadata {
    pub project_alias: String,
    pub filename: String,
    pub mime_type: String,
}

impl SessionMetadata {
    /// Extension for the assembled payload: the filename's suffix when it
    /// has one, otherwise derived from the declared MIME type.
    pub fn derived_extension(&self) -> String {
        let ext = content::extension_of(&self.filename);
        if !ext.is_empty() {
            ext
        } else {
            content::extension_for_mime(&self.mime_type).to_string()
        }
    }
}

/// A single in-progress chunked upload
#[derive(Debug)]
pub struct UploadSession {
    pub upload_id: String,
    pub project_alias: String,
    pub filename: String,
    pub mime_type: String,
    pub total_size: u64,
    pub total_chunks: u32,
    chunks: HashMap<u32, Vec<u8>>,
    received_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl UploadSession {
    pub fn received_chunks(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn is_complete(&self) -> bool {
        self.chunks.len() == self.total_chunks as usize
    }

    pub fn missing_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|n| !self.chunks.contains_key(n))
            .collect()
    }

    fn metadata(&self) -> SessionMetadata {
        SessionMetadata {
            project_alias: self.project_alias.clone(),
            filename: self.filename.clone(),
            mime_type: self.mime_type.clone(),
        }
    }
}

/// Concurrent table of upload sessions with an inactivity reaper
pub struct UploadSessionManager {
    sessions: DashMap<String, Arc<Mutex<UploadSession>>>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    max_total_size: u64,
}

impl UploadSessionManager {
    pub fn new(clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            clock,
            timeout,
            max_total_size: MAX_CHUNKED_UPLOAD_BYTES,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Open a session and return its opaque id
    pub fn create_session(&self, req: &NewSessionRequest) -> Result<String> {
        content::validate_alias(&req.project_alias)?;

        if req.total_size == 0 {
            return Err(Error::EmptyData);
        }
        if req.total_size > self.max_total_size {
            return Err(Error::FileTooLarge {
                size: req.total_size,
                limit: self.max_total_size,
            });
        }
        if req.total_chunks == 0 {
            return Err(Error::MissingField {
                field: "total_chunks".to_string(),
            });
        }

        let upload_id = uuid::Uuid::new_v4().to_string();
        let now = self.clock.now();

        let session = UploadSession {
            upload_id: upload_id.clone(),
            project_alias: req.project_alias.clone(),
            filename: req.filename.clone(),
            mime_type: req.mime_type.clone(),
            total_size: req.total_size,
            total_chunks: req.total_chunks,
            chunks: HashMap::new(),
            received_bytes: 0,
            created_at: now,
            last_activity: now,
        };

        self.sessions
            .insert(upload_id.clone(), Arc::new(Mutex::new(session)));

        tracing::debug!(
            upload_id,
            alias = %req.project_alias,
            total_size = req.total_size,
            total_chunks = req.total_chunks,
            "Created upload session"
        );

        Ok(upload_id)
    }

    /// Store one chunk. Returns the number of chunks received so far and
    /// whether the session is now complete.
    pub async fn add_chunk(
        &self,
        upload_id: &str,
        chunk_index: u32,
        base64_data: &str,
    ) -> Result<(u32, bool)> {
        // Decode before taking the session lock; the lock should only cover
        // map bookkeeping.
        let data = base64::engine::general_purpose::STANDARD
            .decode(base64_data)
            .map_err(|e| Error::InvalidBase64 {
                detail: e.to_string(),
            })?;

        let session = self.get(upload_id)?;
        let mut session = session.lock().await;

        // A remove/reap may have won the race between lookup and lock
        if !self.sessions.contains_key(upload_id) {
            return Err(Error::SessionNotFound {
                upload_id: upload_id.to_string(),
            });
        }

        if chunk_index >= session.total_chunks {
            return Err(Error::ChunkIndexOutOfRange {
                index: chunk_index,
                last: session.total_chunks - 1,
            });
        }
        if session.chunks.contains_key(&chunk_index) {
            return Err(Error::DuplicateChunk { index: chunk_index });
        }

        let new_total = session.received_bytes + data.len() as u64;
        if new_total > session.total_size {
            return Err(Error::FileTooLarge {
                size: new_total,
                limit: session.total_size,
            });
        }

        session.received_bytes = new_total;
        session.chunks.insert(chunk_index, data);
        session.last_activity = self.clock.now();

        Ok((session.received_chunks(), session.is_complete()))
    }

    /// Concatenate all chunks in index order and drop the session.
    /// An incomplete session is left untouched.
    pub async fn assemble_and_remove(&self, upload_id: &str) -> Result<(Vec<u8>, SessionMetadata)> {
        let session = self.get(upload_id)?;
        let mut session = session.lock().await;

        if !self.sessions.contains_key(upload_id) {
            return Err(Error::SessionNotFound {
                upload_id: upload_id.to_string(),
            });
        }

        if !session.is_complete() {
            return Err(Error::MissingChunks {
                missing: session.missing_chunks(),
            });
        }

        // Removing while the session lock is held makes removal atomic:
        // racing operations re-check membership after they acquire the lock.
        self.sessions.remove(upload_id);

        let metadata = session.metadata();
        let mut data = Vec::with_capacity(session.received_bytes as usize);
        for index in 0..session.total_chunks {
            let chunk = session
                .chunks
                .remove(&index)
                .expect("complete session is missing a chunk");
            data.extend_from_slice(&chunk);
        }

        tracing::debug!(
            upload_id,
            bytes = data.len(),
            "Assembled chunked upload"
        );

        Ok((data, metadata))
    }

    /// Cancel an in-flight session
    pub async fn remove_session(&self, upload_id: &str) -> Result<()> {
        let session = self.get(upload_id)?;
        let _guard = session.lock().await;

        if self.sessions.remove(upload_id).is_none() {
            return Err(Error::SessionNotFound {
                upload_id: upload_id.to_string(),
            });
        }

        tracing::debug!(upload_id, "Removed upload session");
        Ok(())
    }

    /// Drop every session idle longer than the timeout. Returns removed ids.
    pub async fn reap_expired(&self) -> Vec<String> {
        let timeout =
            chrono::Duration::from_std(self.timeout).unwrap_or(chrono::Duration::MAX);
        let now = self.clock.now();

        // Snapshot the table first so shard locks are released before any
        // session mutex is awaited.
        let snapshot: Vec<(String, Arc<Mutex<UploadSession>>)> = self
            .sessions
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut removed = Vec::new();
        for (upload_id, session) in snapshot {
            let guard = session.lock().await;
            if now.signed_duration_since(guard.last_activity) > timeout {
                self.sessions.remove(&upload_id);
                tracing::debug!(upload_id = %upload_id, "Reaped expired upload session");
                removed.push(upload_id);
            }
        }

        removed
    }

    fn get(&self, upload_id: &str) -> Result<Arc<Mutex<UploadSession>>> {
        self.sessions
            .get(upload_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::SessionNotFound {
                upload_id: upload_id.to_string(),
            })
    }
}

/// Handle for stopping the reaper task
pub struct ReaperHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ReaperHandle {
    /// Signal the reaper and wait for it to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Reaper task did not shut down cleanly");
        }
    }
}

/// Spawn the background task that periodically reaps idle sessions.
/// Ticks at half the session timeout.
pub fn spawn_reaper(manager: Arc<UploadSessionManager>) -> ReaperHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let tick = manager.timeout().div_f64(2.0).max(Duration::from_millis(10));

    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = interval.tick() => {
                    let removed = manager.reap_expired().await;
                    if !removed.is_empty() {
                        tracing::info!(count = removed.len(), "Reaped expired upload sessions");
                    }
                }
            }
        }
    });

    ReaperHandle {
        shutdown_tx,
        handle,
    }
}
