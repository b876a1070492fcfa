//! Queue track type

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Open metadata map attached to a track (artist, album, `duration_s`,
/// type, ...). The core never interprets it.
pub type TrackMetadata = serde_json::Map<String, serde_json::Value>;

/// URL prefix under which user uploads live.
const UPLOAD_PREFIX: &str = "/audio/uploads/";
/// Seed samples share the upload tree but are never deleted.
const SAMPLE_PREFIX: &str = "/audio/uploads/samples/";

/// A track in a session queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Stable identifier for this queue entry
    pub id: Uuid,

    /// URL to the audio content; unique within a queue
    pub url: String,

    /// Display title, already sanitized and clipped
    pub title: String,

    /// Open metadata map
    #[serde(default)]
    pub metadata: TrackMetadata,
}

impl Track {
    /// Create a track with a fresh id and empty metadata.
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            title: title.into(),
            metadata: TrackMetadata::new(),
        }
    }

    /// Builder method to attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: TrackMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Whether this track lives in the user-upload namespace (and so owns a
    /// file that must be cleaned up when the track goes away).
    #[must_use]
    pub fn is_user_upload(&self) -> bool {
        self.url.starts_with(UPLOAD_PREFIX) && !self.url.starts_with(SAMPLE_PREFIX)
    }

    /// Percent-decoded filename of a user upload, `None` for anything else.
    #[must_use]
    pub fn upload_filename(&self) -> Option<String> {
        if !self.is_user_upload() {
            return None;
        }
        let encoded = self.url.rsplit('/').next()?;
        if encoded.is_empty() {
            return None;
        }
        Some(percent_decode(encoded))
    }
}

/// Decode `%XX` escapes; malformed escapes pass through untouched.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 3 <= bytes.len() && input.is_char_boundary(i + 1) && input.is_char_boundary(i + 3) {
            let hex = &input[i + 1..i + 3];
            if let Ok(byte) = u8::from_str_radix(hex, 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
