use super::{BackendEvent, BackendState, MediaBackend};
use crate::model::VideoSize;
use anyhow::{Result, anyhow};
use crossbeam_channel::Sender;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeekRequest {
    Time(i64),
    Position(f32),
}

struct Script {
    events: Option<Sender<BackendEvent>>,
    auto_events: bool,
    opened: Vec<PathBuf>,
    open_error: Option<String>,
    playing: bool,
    time_ms: i64,
    duration_ms: i64,
    native_volume: i32,
    muted: bool,
    track_ids: Vec<i32>,
    track_names: Vec<String>,
    current_track: i32,
    track_switches: Vec<i32>,
    video_size: VideoSize,
    seeks: Vec<SeekRequest>,
    stops: usize,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            events: None,
            auto_events: true,
            opened: Vec::new(),
            open_error: None,
            playing: false,
            time_ms: 0,
            duration_ms: 0,
            native_volume: 100,
            muted: false,
            track_ids: Vec::new(),
            track_names: Vec::new(),
            current_track: -1,
            track_switches: Vec::new(),
            video_size: VideoSize::default(),
            seeks: Vec::new(),
            stops: 0,
        }
    }
}

impl Script {
    fn emit(&self, event: BackendEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn emit_auto(&self, state: BackendState) {
        if self.auto_events {
            self.emit(BackendEvent::StateChanged(state));
        }
    }
}

/// Shared view into a [`ScriptedBackend`], kept by the test after the
/// backend itself has been moved into the player.
#[derive(Clone, Default)]
pub struct ScriptHandle {
    script: Arc<Mutex<Script>>,
}

impl ScriptHandle {
    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Turns off the state notifications transport calls send on their own.
    pub fn set_auto_events(&self, enabled: bool) {
        self.lock().auto_events = enabled;
    }

    /// Raw track enumeration; the two lists may differ in length.
    pub fn set_tracks(&self, ids: &[i32], names: &[&str]) {
        let mut script = self.lock();
        script.track_ids = ids.to_vec();
        script.track_names = names.iter().map(|name| name.to_string()).collect();
        if script.current_track < 0 {
            script.current_track = ids.iter().copied().find(|id| *id >= 0).unwrap_or(-1);
        }
    }

    pub fn clear_tracks(&self) {
        let mut script = self.lock();
        script.track_ids.clear();
        script.track_names.clear();
    }

    pub fn set_duration_ms(&self, duration_ms: i64) {
        self.lock().duration_ms = duration_ms;
    }

    pub fn set_video_size(&self, size: VideoSize) {
        self.lock().video_size = size;
    }

    pub fn set_playing(&self, playing: bool) {
        self.lock().playing = playing;
    }

    pub fn fail_next_open(&self, message: &str) {
        self.lock().open_error = Some(message.to_string());
    }

    pub fn emit(&self, event: BackendEvent) {
        self.lock().emit(event);
    }

    pub fn emit_state(&self, state: BackendState) {
        self.emit(BackendEvent::StateChanged(state));
    }

    /// Moves the clock and reports it the way a running engine would.
    pub fn advance_to(&self, time_ms: i64) {
        let mut script = self.lock();
        script.time_ms = time_ms;
        let duration_ms = script.duration_ms;
        script.emit(BackendEvent::TimeChanged {
            time_ms,
            duration_ms,
        });
    }

    /// Runs to the end of the media and reports it.
    pub fn finish(&self) {
        let mut script = self.lock();
        script.time_ms = script.duration_ms;
        script.playing = false;
        script.emit(BackendEvent::StateChanged(BackendState::Ended));
    }

    pub fn opened(&self) -> Vec<PathBuf> {
        self.lock().opened.clone()
    }

    pub fn native_volume(&self) -> i32 {
        self.lock().native_volume
    }

    pub fn is_muted(&self) -> bool {
        self.lock().muted
    }

    pub fn set_muted(&self, muted: bool) {
        self.lock().muted = muted;
    }

    pub fn current_track(&self) -> i32 {
        self.lock().current_track
    }

    pub fn track_switches(&self) -> Vec<i32> {
        self.lock().track_switches.clone()
    }

    pub fn seeks(&self) -> Vec<SeekRequest> {
        self.lock().seeks.clone()
    }

    pub fn stops(&self) -> usize {
        self.lock().stops
    }

    pub fn is_playing(&self) -> bool {
        self.lock().playing
    }
}

/// Deterministic in-process engine driven through a [`ScriptHandle`].
#[derive(Default)]
pub struct ScriptedBackend {
    handle: ScriptHandle,
}

impl ScriptedBackend {
    pub fn new() -> (Self, ScriptHandle) {
        let handle = ScriptHandle::default();
        (
            Self {
                handle: handle.clone(),
            },
            handle,
        )
    }
}

impl MediaBackend for ScriptedBackend {
    fn attach(&mut self, events: Sender<BackendEvent>) {
        self.handle.lock().events = Some(events);
    }

    fn open(&mut self, path: &Path) -> Result<()> {
        let mut script = self.handle.lock();
        if let Some(message) = script.open_error.take() {
            return Err(anyhow!(message));
        }
        script.opened.push(path.to_path_buf());
        script.playing = false;
        script.time_ms = 0;
        script.emit_auto(BackendState::Opening);
        Ok(())
    }

    fn play(&mut self) {
        let mut script = self.handle.lock();
        script.playing = true;
        script.emit_auto(BackendState::Playing);
    }

    fn pause(&mut self) {
        let mut script = self.handle.lock();
        script.playing = false;
        script.emit_auto(BackendState::Paused);
    }

    fn stop(&mut self) {
        let mut script = self.handle.lock();
        script.playing = false;
        script.time_ms = 0;
        script.stops += 1;
        script.emit_auto(BackendState::Stopped);
    }

    fn is_playing(&self) -> bool {
        self.handle.lock().playing
    }

    fn time_ms(&self) -> i64 {
        self.handle.lock().time_ms
    }

    fn duration_ms(&self) -> i64 {
        self.handle.lock().duration_ms
    }

    fn set_time_ms(&mut self, time_ms: i64) {
        let mut script = self.handle.lock();
        script.time_ms = time_ms;
        script.seeks.push(SeekRequest::Time(time_ms));
    }

    fn set_position(&mut self, fraction: f32) {
        self.handle
            .lock()
            .seeks
            .push(SeekRequest::Position(fraction));
    }

    fn native_volume(&self) -> i32 {
        self.handle.lock().native_volume
    }

    fn set_native_volume(&mut self, volume: i32) {
        self.handle.lock().native_volume = volume;
    }

    fn is_muted(&self) -> bool {
        self.handle.lock().muted
    }

    fn set_muted(&mut self, muted: bool) {
        self.handle.lock().muted = muted;
    }

    fn audio_track_ids(&self) -> Vec<i32> {
        self.handle.lock().track_ids.clone()
    }

    fn audio_track_names(&self) -> Vec<String> {
        self.handle.lock().track_names.clone()
    }

    fn current_audio_track(&self) -> i32 {
        self.handle.lock().current_track
    }

    fn set_current_audio_track(&mut self, id: i32) {
        let mut script = self.handle.lock();
        script.current_track = id;
        script.track_switches.push(id);
    }

    fn video_size(&self) -> VideoSize {
        self.handle.lock().video_size
    }

    fn output_name(&self) -> String {
        String::from("Scripted engine")
    }
}
