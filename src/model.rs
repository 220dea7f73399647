use crate::config;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};

/// Locator for one playable file. Equality is by normalized path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaReference {
    path: PathBuf,
}

impl MediaReference {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: config::normalize_path(path.as_ref()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn extension(&self) -> Option<&str> {
        self.path.extension().and_then(OsStr::to_str)
    }

    pub fn title(&self) -> String {
        self.path
            .file_stem()
            .and_then(OsStr::to_str)
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| self.path.display().to_string())
    }

    pub fn to_path_string(&self) -> String {
        self.path.to_string_lossy().to_string()
    }
}

impl fmt::Display for MediaReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

impl Serialize for MediaReference {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_path_string())
    }
}

impl<'de> Deserialize<'de> for MediaReference {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(Self::new(value))
    }
}

/// Which of the two enumerated audio tracks the listener wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrackKind {
    #[default]
    Original,
    Accompaniment,
}

impl TrackKind {
    /// Position in the filtered track list this kind maps to.
    pub fn position(self) -> usize {
        match self {
            Self::Original => 0,
            Self::Accompaniment => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Original => "Original",
            Self::Accompaniment => "Accompaniment",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrack {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VideoSize {
    pub width: u32,
    pub height: u32,
}

impl VideoSize {
    pub fn is_known(self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Lifecycle of the currently loaded reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackPhase {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    Ended,
    StoppedByUser,
}

impl PlaybackPhase {
    /// Playback of the loaded reference has actually started.
    pub fn has_started(self) -> bool {
        matches!(self, Self::Playing | Self::Paused)
    }
}

/// Observable snapshot of the player. Only the player writes it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub is_playing: bool,
    pub phase: PlaybackPhase,
    pub current: Option<MediaReference>,
    pub current_time_ms: i64,
    pub duration_ms: i64,
    pub video_size: VideoSize,
    pub volume: f32,
    pub audio_tracks: Vec<AudioTrack>,
    pub current_audio_track: Option<i32>,
    pub preferred_track: TrackKind,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            is_playing: false,
            phase: PlaybackPhase::Idle,
            current: None,
            current_time_ms: 0,
            duration_ms: 0,
            video_size: VideoSize::default(),
            volume: 1.0,
            audio_tracks: Vec::new(),
            current_audio_track: None,
            preferred_track: TrackKind::Original,
        }
    }
}

impl PlayerState {
    pub fn track_id_for(&self, kind: TrackKind) -> Option<i32> {
        self.audio_tracks.get(kind.position()).map(|track| track.id)
    }

    pub fn progress(&self) -> Option<f64> {
        (self.duration_ms > 0)
            .then(|| (self.current_time_ms as f64 / self.duration_ms as f64).clamp(0.0, 1.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryEntry {
    pub reference: MediaReference,
    pub title: String,
}
