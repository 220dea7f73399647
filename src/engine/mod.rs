mod inspect;
mod rodio_backend;
mod scripted;

pub use crate::events::{BackendEvent, BackendState};
pub use inspect::{MediaInfo, MediaTrack, inspect_media};
pub use rodio_backend::RodioBackend;
pub use scripted::{ScriptHandle, ScriptedBackend, SeekRequest};

use crate::model::VideoSize;
use anyhow::Result;
use crossbeam_channel::Sender;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// The single decode/render engine the player drives.
///
/// Track ids and names are reported raw: they may include negative ids or a
/// "Disable" pseudo-track, and may be empty for a while after `open`. Native
/// volume is an integer where 100 is unity gain.
pub trait MediaBackend {
    /// Hands the backend the channel its state/time notifications go to.
    fn attach(&mut self, events: Sender<BackendEvent>);
    fn open(&mut self, path: &Path) -> Result<()>;
    fn play(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);
    fn is_playing(&self) -> bool;
    fn time_ms(&self) -> i64;
    fn duration_ms(&self) -> i64;
    fn set_time_ms(&mut self, time_ms: i64);
    fn set_position(&mut self, fraction: f32);
    fn native_volume(&self) -> i32;
    fn set_native_volume(&mut self, volume: i32);
    fn is_muted(&self) -> bool;
    fn set_muted(&mut self, muted: bool);
    fn audio_track_ids(&self) -> Vec<i32>;
    fn audio_track_names(&self) -> Vec<String>;
    fn current_audio_track(&self) -> i32;
    fn set_current_audio_track(&mut self, id: i32);
    fn video_size(&self) -> VideoSize;
    /// Lets polling backends notice progress and end of media.
    fn tick(&mut self) {}
    fn output_name(&self) -> String;
}

/// Headless engine that only keeps a logical clock.
pub struct NullBackend {
    events: Option<Sender<BackendEvent>>,
    current: Option<PathBuf>,
    tracks: Vec<MediaTrack>,
    selected_track: i32,
    paused: bool,
    ended: bool,
    started_at: Option<Instant>,
    position_offset: Duration,
    track_duration: Option<Duration>,
    native_volume: i32,
    muted: bool,
    last_reported_ms: i64,
}

impl NullBackend {
    pub fn new() -> Self {
        Self {
            events: None,
            current: None,
            tracks: Vec::new(),
            selected_track: -1,
            paused: true,
            ended: false,
            started_at: None,
            position_offset: Duration::ZERO,
            track_duration: None,
            native_volume: 100,
            muted: false,
            last_reported_ms: -1,
        }
    }

    fn current_position(&self) -> Duration {
        let mut position = self.position_offset;
        if !self.paused
            && self.current.is_some()
            && let Some(started_at) = self.started_at
        {
            position = position.saturating_add(started_at.elapsed());
        }
        if let Some(duration) = self.track_duration {
            return position.min(duration);
        }
        position
    }

    fn emit(&self, event: BackendEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaBackend for NullBackend {
    fn attach(&mut self, events: Sender<BackendEvent>) {
        self.events = Some(events);
    }

    fn open(&mut self, path: &Path) -> Result<()> {
        let info = inspect_media(path).unwrap_or_default();
        self.current = Some(path.to_path_buf());
        self.selected_track = if info.tracks.is_empty() { -1 } else { 0 };
        self.tracks = info.tracks;
        self.track_duration = info.duration.filter(|duration| !duration.is_zero());
        self.paused = true;
        self.ended = false;
        self.started_at = None;
        self.position_offset = Duration::ZERO;
        self.last_reported_ms = -1;
        self.emit(BackendEvent::StateChanged(BackendState::Opening));
        Ok(())
    }

    fn play(&mut self) {
        if self.current.is_none() {
            return;
        }
        if self.ended {
            self.position_offset = Duration::ZERO;
            self.ended = false;
        }
        self.started_at = Some(Instant::now());
        self.paused = false;
        self.emit(BackendEvent::StateChanged(BackendState::Playing));
    }

    fn pause(&mut self) {
        if self.current.is_none() || self.paused {
            return;
        }
        self.position_offset = self.current_position();
        self.started_at = None;
        self.paused = true;
        self.emit(BackendEvent::StateChanged(BackendState::Paused));
    }

    fn stop(&mut self) {
        self.paused = true;
        self.ended = true;
        self.started_at = None;
        self.position_offset = Duration::ZERO;
        self.emit(BackendEvent::StateChanged(BackendState::Stopped));
    }

    fn is_playing(&self) -> bool {
        self.current.is_some() && !self.paused && !self.ended
    }

    fn time_ms(&self) -> i64 {
        self.current_position().as_millis() as i64
    }

    fn duration_ms(&self) -> i64 {
        self.track_duration
            .map_or(0, |duration| duration.as_millis() as i64)
    }

    fn set_time_ms(&mut self, time_ms: i64) {
        if self.current.is_none() {
            return;
        }
        let position = Duration::from_millis(time_ms.max(0) as u64);
        self.position_offset = self
            .track_duration
            .map_or(position, |duration| position.min(duration));
        self.started_at = if self.paused {
            None
        } else {
            Some(Instant::now())
        };
    }

    fn set_position(&mut self, fraction: f32) {
        if let Some(duration) = self.track_duration {
            let target = duration.as_secs_f64() * f64::from(fraction.clamp(0.0, 1.0));
            self.set_time_ms((target * 1000.0) as i64);
        }
    }

    fn native_volume(&self) -> i32 {
        self.native_volume
    }

    fn set_native_volume(&mut self, volume: i32) {
        self.native_volume = volume.max(0);
    }

    fn is_muted(&self) -> bool {
        self.muted
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    fn audio_track_ids(&self) -> Vec<i32> {
        (0..self.tracks.len() as i32).collect()
    }

    fn audio_track_names(&self) -> Vec<String> {
        self.tracks.iter().map(|track| track.name.clone()).collect()
    }

    fn current_audio_track(&self) -> i32 {
        self.selected_track
    }

    fn set_current_audio_track(&mut self, id: i32) {
        if id >= 0 && (id as usize) < self.tracks.len() {
            self.selected_track = id;
        }
    }

    fn video_size(&self) -> VideoSize {
        VideoSize::default()
    }

    fn tick(&mut self) {
        if !self.is_playing() {
            return;
        }

        let time_ms = self.time_ms();
        if time_ms != self.last_reported_ms {
            self.last_reported_ms = time_ms;
            self.emit(BackendEvent::TimeChanged {
                time_ms,
                duration_ms: self.duration_ms(),
            });
        }

        if self
            .track_duration
            .is_some_and(|duration| self.current_position() >= duration)
        {
            self.position_offset = self.current_position();
            self.started_at = None;
            self.paused = true;
            self.ended = true;
            self.emit(BackendEvent::StateChanged(BackendState::Ended));
        }
    }

    fn output_name(&self) -> String {
        String::from("Null audio engine")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::thread;

    #[test]
    fn null_backend_position_advances_when_playing() {
        let mut backend = NullBackend::new();
        backend
            .open(Path::new("nonexistent-song.mkv"))
            .expect("open should still work in null mode");
        backend.play();
        let before = backend.time_ms();
        thread::sleep(Duration::from_millis(20));
        assert!(backend.time_ms() > before, "position should advance");
    }

    #[test]
    fn null_backend_pause_freezes_position() {
        let mut backend = NullBackend::new();
        backend
            .open(Path::new("nonexistent-song.mkv"))
            .expect("open");
        backend.play();
        thread::sleep(Duration::from_millis(20));

        backend.pause();
        let paused = backend.time_ms();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(backend.time_ms(), paused, "position should freeze");
        assert!(!backend.is_playing());
    }

    #[test]
    fn null_backend_reports_transport_changes() {
        let (tx, rx) = unbounded();
        let mut backend = NullBackend::new();
        backend.attach(tx);
        backend
            .open(Path::new("nonexistent-song.mkv"))
            .expect("open");
        backend.play();
        backend.pause();
        backend.stop();

        let states: Vec<BackendEvent> = rx.try_iter().collect();
        assert_eq!(
            states,
            vec![
                BackendEvent::StateChanged(BackendState::Opening),
                BackendEvent::StateChanged(BackendState::Playing),
                BackendEvent::StateChanged(BackendState::Paused),
                BackendEvent::StateChanged(BackendState::Stopped),
            ]
        );
    }

    #[test]
    fn null_backend_unknown_duration_never_ends() {
        let (tx, rx) = unbounded();
        let mut backend = NullBackend::new();
        backend.attach(tx);
        backend
            .open(Path::new("nonexistent-song.mkv"))
            .expect("open");
        backend.play();
        thread::sleep(Duration::from_millis(30));
        backend.tick();

        assert_eq!(backend.duration_ms(), 0);
        assert!(
            rx.try_iter()
                .all(|event| event != BackendEvent::StateChanged(BackendState::Ended))
        );
    }
}
