//! In-memory active playlist
//!
//! The hub owns one of these; it holds the active track list, the
//! cursor, and the traversal mode, and computes the next cursor on
//! natural track completion. Persistence and ordering beyond the active
//! list are out of scope.

use rand::Rng;

use resona_common::{PlayMode, TrackDescriptor};

use crate::error::{Error, Result};

pub struct PlaylistManager {
    tracks: Vec<TrackDescriptor>,
    position: Option<usize>,
    mode: PlayMode,
}

impl Default for PlaylistManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaylistManager {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            position: None,
            mode: PlayMode::Sequence,
        }
    }

    pub fn mode(&self) -> PlayMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PlayMode) {
        self.mode = mode;
    }

    pub fn position(&self) -> Option<usize> {
        self.position
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn current(&self) -> Option<TrackDescriptor> {
        self.position.and_then(|i| self.tracks.get(i).cloned())
    }

    /// Replace the active list. An empty list clears the cursor; a
    /// non-empty list requires an in-range starting position.
    pub fn set(&mut self, tracks: Vec<TrackDescriptor>, position: usize) -> Result<()> {
        if tracks.is_empty() {
            self.tracks = tracks;
            self.position = None;
            return Ok(());
        }
        if position >= tracks.len() {
            return Err(Error::BadRequest(format!(
                "playlist position {} out of range ({} tracks)",
                position,
                tracks.len()
            )));
        }
        self.tracks = tracks;
        self.position = Some(position);
        Ok(())
    }

    pub fn set_position(&mut self, position: usize) -> Result<()> {
        if position >= self.tracks.len() {
            return Err(Error::BadRequest(format!(
                "playlist position {} out of range ({} tracks)",
                position,
                self.tracks.len()
            )));
        }
        self.position = Some(position);
        Ok(())
    }

    /// Move the cursor after a natural track completion.
    ///
    /// Returns the new position, or None when traversal ends (sequence
    /// mode ran off the end, or there is nothing to play). LoopOne never
    /// reaches here: the engine loops the resource itself.
    pub fn advance(&mut self) -> Option<usize> {
        let len = self.tracks.len();
        let current = self.position?;
        if len == 0 {
            return None;
        }
        let next = match self.mode {
            PlayMode::Sequence => {
                let next = current + 1;
                if next >= len {
                    return None;
                }
                next
            }
            PlayMode::LoopAll => (current + 1) % len,
            PlayMode::LoopOne => current,
            PlayMode::Shuffle => {
                if len == 1 {
                    current
                } else {
                    // Any track except the one that just finished
                    let mut rng = rand::thread_rng();
                    let pick = rng.gen_range(0..len - 1);
                    if pick >= current {
                        pick + 1
                    } else {
                        pick
                    }
                }
            }
        };
        self.position = Some(next);
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracks(n: usize) -> Vec<TrackDescriptor> {
        (0..n)
            .map(|i| TrackDescriptor {
                id: format!("t-{i}"),
                title: format!("Track {i}"),
                artist: "Artist".into(),
                album: "Album".into(),
                source_uri: Some(format!("file:///music/{i}.ogg")),
                icon_uri: None,
                duration_ms: Some(60_000),
                seek_forbidden: false,
            })
            .collect()
    }

    #[test]
    fn set_rejects_out_of_range_position() {
        let mut playlist = PlaylistManager::new();
        assert!(playlist.set(tracks(3), 3).is_err());
        assert!(playlist.set(tracks(3), 2).is_ok());
        assert_eq!(playlist.position(), Some(2));
    }

    #[test]
    fn empty_list_clears_cursor() {
        let mut playlist = PlaylistManager::new();
        playlist.set(tracks(3), 0).unwrap();
        playlist.set(Vec::new(), 0).unwrap();
        assert_eq!(playlist.position(), None);
        assert_eq!(playlist.current(), None);
    }

    #[test]
    fn sequence_advances_then_ends() {
        let mut playlist = PlaylistManager::new();
        playlist.set(tracks(2), 0).unwrap();
        assert_eq!(playlist.advance(), Some(1));
        assert_eq!(playlist.advance(), None);
        // Cursor stays on the last track after the end
        assert_eq!(playlist.position(), Some(1));
    }

    #[test]
    fn loop_all_wraps_around() {
        let mut playlist = PlaylistManager::new();
        playlist.set(tracks(3), 2).unwrap();
        assert_eq!(playlist.advance(), Some(0));
    }

    #[test]
    fn shuffle_never_repeats_the_finished_track() {
        let mut playlist = PlaylistManager::new();
        playlist.set(tracks(4), 1).unwrap();
        playlist.set_mode(PlayMode::Shuffle);
        for _ in 0..50 {
            let from = playlist.position().unwrap();
            let next = playlist.advance().unwrap();
            assert_ne!(next, from);
            assert!(next < 4);
        }
    }

    #[test]
    fn shuffle_single_track_repeats_it() {
        let mut playlist = PlaylistManager::new();
        playlist.set(tracks(1), 0).unwrap();
        playlist.set_mode(PlayMode::Shuffle);
        assert_eq!(playlist.advance(), Some(0));
    }
}
