//! Session track queue
//!
//! Ordered list of tracks with a selected index. URLs are unique within a
//! queue; duplicate adds are rejected. Removal keeps `selected_idx` stable
//! relative to the surviving tracks.

use uuid::Uuid;

use crate::error::EventError;
use crate::types::Track;

/// How a removal affected the current selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionChange {
    /// Selection untouched
    Unchanged,
    /// A track before the selection was removed; the index shifted down
    Shifted,
    /// The selected track was removed and the queue still has tracks;
    /// carries the new selected index
    CurrentRemoved(usize),
    /// The selected (last) track was removed and the queue is now empty
    NowEmpty,
}

/// Result of a successful add.
#[derive(Debug)]
pub struct Added {
    /// Index the track landed at
    pub idx: usize,
    /// Whether this was the first track in a previously empty queue
    pub first_track: bool,
}

/// Result of a successful removal.
#[derive(Debug)]
pub struct Removed {
    /// The removed track
    pub track: Track,
    /// Selection adjustment applied
    pub selection: SelectionChange,
}

/// Ordered queue with a selected index.
#[derive(Debug, Default)]
pub struct TrackQueue {
    tracks: Vec<Track>,
    selected_idx: usize,
}

impl TrackQueue {
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued tracks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Selected index; 0 when the queue is empty.
    #[must_use]
    pub fn selected_idx(&self) -> usize {
        self.selected_idx
    }

    /// Currently selected track.
    #[must_use]
    pub fn current_track(&self) -> Option<&Track> {
        self.tracks.get(self.selected_idx)
    }

    /// All tracks in order.
    #[must_use]
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Index of the track carrying `url`, if queued.
    #[must_use]
    pub fn index_of_url(&self, url: &str) -> Option<usize> {
        self.tracks.iter().position(|t| t.url == url)
    }

    /// Index of the track with id `track_id`, if queued.
    #[must_use]
    pub fn index_of_id(&self, track_id: Uuid) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == track_id)
    }

    /// Append a track.
    ///
    /// # Errors
    /// `Conflict` if a track with the same URL is already queued.
    pub fn add(&mut self, track: Track) -> Result<Added, EventError> {
        if self.index_of_url(&track.url).is_some() {
            return Err(EventError::Conflict("Track already in queue".to_string()));
        }
        let first_track = self.tracks.is_empty();
        self.tracks.push(track);
        Ok(Added {
            idx: self.tracks.len() - 1,
            first_track,
        })
    }

    /// Remove the track at `idx` and adjust the selection.
    ///
    /// # Errors
    /// `InvalidArgument` if `idx` is out of bounds.
    pub fn remove(&mut self, idx: usize) -> Result<Removed, EventError> {
        if idx >= self.tracks.len() {
            return Err(EventError::InvalidArgument(format!(
                "Queue index {idx} out of bounds"
            )));
        }
        let track = self.tracks.remove(idx);

        let selection = if idx == self.selected_idx {
            if self.tracks.is_empty() {
                self.selected_idx = 0;
                SelectionChange::NowEmpty
            } else {
                self.selected_idx = idx.min(self.tracks.len() - 1);
                SelectionChange::CurrentRemoved(self.selected_idx)
            }
        } else if idx < self.selected_idx {
            self.selected_idx = self.selected_idx.saturating_sub(1);
            SelectionChange::Shifted
        } else {
            SelectionChange::Unchanged
        };

        Ok(Removed { track, selection })
    }

    /// Select a track by index, clamped to the queue bounds.
    ///
    /// Returns the effective index, or `None` when the queue is empty.
    pub fn select(&mut self, idx: usize) -> Option<usize> {
        if self.tracks.is_empty() {
            self.selected_idx = 0;
            return None;
        }
        self.selected_idx = idx.min(self.tracks.len() - 1);
        Some(self.selected_idx)
    }
}
