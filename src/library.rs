//! External collaborator interfaces
//!
//! The core never touches the filesystem itself. Seed tracks for fresh
//! sessions come from a [`SampleLibrary`]; deletion of user-uploaded audio
//! goes through a [`FileCleanup`]. Both are injected at server
//! construction; the defaults do nothing.

use async_trait::async_trait;

use crate::types::Track;

/// Enumerates seed tracks for newly created, empty sessions.
#[async_trait]
pub trait SampleLibrary: Send + Sync {
    /// Tracks to pre-populate a fresh session's queue with.
    async fn seed_tracks(&self) -> Vec<Track>;
}

/// Invoked when a user-uploaded track leaves the system, either by queue
/// removal or session destruction. Failures are the collaborator's to log;
/// they never propagate into session state.
#[async_trait]
pub trait FileCleanup: Send + Sync {
    /// Dispose of the upload stored under `filename` (already
    /// percent-decoded).
    async fn remove_upload(&self, filename: &str);
}

/// Sample library with no tracks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSamples;

#[async_trait]
impl SampleLibrary for NoSamples {
    async fn seed_tracks(&self) -> Vec<Track> {
        Vec::new()
    }
}

/// Sample library serving a fixed list.
#[derive(Debug, Clone, Default)]
pub struct StaticSampleLibrary {
    tracks: Vec<Track>,
}

impl StaticSampleLibrary {
    /// Library serving clones of `tracks`.
    #[must_use]
    pub fn new(tracks: Vec<Track>) -> Self {
        Self { tracks }
    }
}

#[async_trait]
impl SampleLibrary for StaticSampleLibrary {
    async fn seed_tracks(&self) -> Vec<Track> {
        self.tracks.clone()
    }
}

/// File cleanup that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCleanup;

#[async_trait]
impl FileCleanup for NoCleanup {
    async fn remove_upload(&self, filename: &str) {
        tracing::debug!(filename, "file cleanup skipped (no collaborator configured)");
    }
}
