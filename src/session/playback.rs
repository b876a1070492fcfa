//! Shared playback state machine
//!
//! Two effective states, paused and playing. A playing position is stored
//! as the position at `last_updated` and extrapolated by readers. Every
//! authoritative mutation bumps `sync_version` and feeds the smoothing
//! window; the position carried by outgoing state snapshots is the mean of
//! the window, which suppresses one-sample jitter from the controller UI.

use std::collections::VecDeque;

/// Authoritative playback state of one session.
#[derive(Debug, Clone)]
pub struct PlaybackState {
    is_playing: bool,
    /// Position in ms at the moment of `last_updated_ms`
    position_ms: u64,
    /// Wall time of the last authoritative position change
    last_updated_ms: u64,
    /// Strictly increasing across the session lifetime
    sync_version: u64,
    /// Recent authoritative position samples
    history: VecDeque<u64>,
    window: usize,
}

impl PlaybackState {
    /// Fresh paused state at position zero.
    #[must_use]
    pub fn new(now_ms: u64, smoothing_window: usize) -> Self {
        let window = smoothing_window.max(1);
        let mut history = VecDeque::with_capacity(window);
        history.push_back(0);
        Self {
            is_playing: false,
            position_ms: 0,
            last_updated_ms: now_ms,
            sync_version: 0,
            history,
            window,
        }
    }

    /// Whether the session is playing.
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    /// Stored position (at `last_updated_ms`), unextrapolated.
    #[must_use]
    pub fn position_ms(&self) -> u64 {
        self.position_ms
    }

    /// Wall time of the last authoritative change.
    #[must_use]
    pub fn last_updated_ms(&self) -> u64 {
        self.last_updated_ms
    }

    /// Current sync version.
    #[must_use]
    pub fn sync_version(&self) -> u64 {
        self.sync_version
    }

    /// Position as observed at `now_ms`: extrapolated while playing.
    #[must_use]
    pub fn effective_position_ms(&self, now_ms: u64) -> u64 {
        if self.is_playing {
            self.position_ms
                .saturating_add(now_ms.saturating_sub(self.last_updated_ms))
        } else {
            self.position_ms
        }
    }

    /// Mean of the recent authoritative position samples.
    ///
    /// This is the value outgoing `sync_state` snapshots carry.
    #[must_use]
    pub fn smoothed_position_ms(&self) -> u64 {
        if self.history.is_empty() {
            return self.position_ms;
        }
        let sum: u128 = self.history.iter().map(|&v| u128::from(v)).sum();
        u64::try_from(sum / self.history.len() as u128).unwrap_or(u64::MAX)
    }

    /// Start playing from `position_ms`.
    ///
    /// A play is a hard transition: the smoothing window re-anchors on the
    /// new position instead of averaging it against the old track state.
    pub fn play(&mut self, position_ms: u64, now_ms: u64) {
        self.is_playing = true;
        self.history.clear();
        self.set_position(position_ms, now_ms);
    }

    /// Pause at `position_ms`. Hard transition, like [`play`](Self::play).
    pub fn pause(&mut self, position_ms: u64, now_ms: u64) {
        self.is_playing = false;
        self.history.clear();
        self.set_position(position_ms, now_ms);
    }

    /// Move the position without changing play/pause.
    ///
    /// Consecutive seeks share the smoothing window; a rapid burst from a
    /// scrubbing controller UI averages out instead of whipsawing every
    /// listener.
    pub fn seek(&mut self, position_ms: u64, now_ms: u64) {
        self.set_position(position_ms, now_ms);
    }

    /// Reset to position zero (track change). Clears the smoothing window
    /// so the old track's positions don't bleed into the new one.
    pub fn reset_position(&mut self, now_ms: u64) {
        self.history.clear();
        self.set_position(0, now_ms);
    }

    /// Bump `sync_version` without touching the position (controller
    /// transfers are authoritative but positionless).
    pub fn bump_version(&mut self) {
        self.sync_version += 1;
    }

    fn set_position(&mut self, position_ms: u64, now_ms: u64) {
        self.position_ms = position_ms;
        self.last_updated_ms = now_ms;
        self.sync_version += 1;
        if self.history.len() == self.window {
            self.history.pop_front();
        }
        self.history.push_back(position_ms);
    }
}
