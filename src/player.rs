use crate::config::{self, KEY_PLAYER_VOLUME, KeyValueStore, PlayerConfig, SharedStore};
use crate::engine::{BackendEvent, BackendState, MediaBackend};
use crate::error::{AppError, ErrorReporter};
use crate::events::{EventBus, PlayerEvent};
use crate::model::{AudioTrack, MediaReference, PlaybackPhase, PlayerState, TrackKind};
use crate::schedule::Deferred;
use crossbeam_channel::{Receiver, unbounded};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const TRACK_LOG_WINDOW: Duration = Duration::from_secs(1);

/// Commands the queue issues to whatever plays its items.
pub trait PlaybackControl {
    fn load(&mut self, reference: &MediaReference) -> Result<(), AppError>;
    fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FollowUp {
    AfterLoad,
    RetryTracks,
}

#[derive(Debug, Clone, Copy)]
struct FollowUpTask {
    generation: u64,
    follow_up: FollowUp,
}

/// Media engine adapter: the only writer of [`PlayerState`].
pub struct Player {
    backend: Box<dyn MediaBackend>,
    backend_events: Receiver<BackendEvent>,
    store: SharedStore,
    reporter: Arc<dyn ErrorReporter>,
    config: PlayerConfig,
    state: PlayerState,
    events: EventBus<PlayerEvent>,
    deferred: Deferred<FollowUpTask>,
    generation: u64,
    completion_fired: bool,
    stop_requested: bool,
    pending_completion: Option<MediaReference>,
    after_load_done: bool,
    preference_applied: bool,
    track_retries: u32,
    retry_pending: bool,
    tracks_seen: bool,
    track_log: TrackLog,
}

impl Player {
    pub fn new(
        mut backend: Box<dyn MediaBackend>,
        store: SharedStore,
        reporter: Arc<dyn ErrorReporter>,
        config: PlayerConfig,
    ) -> Self {
        let (tx, rx) = unbounded();
        backend.attach(tx);

        let state = PlayerState {
            volume: restored_volume(store.as_ref()),
            ..PlayerState::default()
        };
        let mut player = Self {
            backend,
            backend_events: rx,
            store,
            reporter,
            config,
            state,
            events: EventBus::new(),
            deferred: Deferred::new(),
            generation: 0,
            completion_fired: false,
            stop_requested: false,
            pending_completion: None,
            after_load_done: false,
            preference_applied: false,
            track_retries: 0,
            retry_pending: false,
            tracks_seen: false,
            track_log: TrackLog::default(),
        };
        player.apply_native_volume();
        player
    }

    pub fn state(&self) -> &PlayerState {
        &self.state
    }

    pub fn subscribe(&mut self) -> Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub fn output_name(&self) -> String {
        self.backend.output_name()
    }

    /// Earliest moment a deferred follow-up wants to run.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deferred.next_deadline()
    }

    pub fn load(&mut self, reference: &MediaReference) -> Result<(), AppError> {
        if let Err(err) = self.validate(reference) {
            self.reporter.report(&err, "load media");
            return Err(err);
        }

        if let Err(err) = self.backend.open(reference.path()) {
            let err = AppError::MediaLoadFailed(format!("{reference}: {err:#}"));
            self.reporter.report(&err, "load media");
            return Err(err);
        }

        self.generation = self.generation.wrapping_add(1);
        self.completion_fired = false;
        self.stop_requested = false;
        self.pending_completion = None;
        self.after_load_done = false;
        self.preference_applied = false;
        self.track_retries = 0;
        self.retry_pending = false;
        self.tracks_seen = false;

        self.state.current = Some(reference.clone());
        self.state.current_time_ms = 0;
        self.state.duration_ms = 0;
        self.state.phase = PlaybackPhase::Loading;
        self.events
            .publish(PlayerEvent::ReferenceChanged(Some(reference.clone())));
        self.publish_time();
        self.publish_state();

        self.backend.play();
        self.deferred.schedule(
            Instant::now(),
            self.config.track_refresh_delay,
            FollowUpTask {
                generation: self.generation,
                follow_up: FollowUp::AfterLoad,
            },
        );
        info!(reference = %reference, generation = self.generation, "loaded media");
        Ok(())
    }

    fn validate(&self, reference: &MediaReference) -> Result<(), AppError> {
        if !config::is_supported_media(reference.path()) {
            return Err(AppError::UnsupportedFormat(
                reference
                    .extension()
                    .map(str::to_ascii_lowercase)
                    .unwrap_or_else(|| reference.to_path_string()),
            ));
        }
        if !reference.path().is_file() {
            return Err(AppError::FileNotFound(reference.path().to_path_buf()));
        }
        Ok(())
    }

    pub fn play(&mut self) {
        if self.state.current.is_none() {
            return;
        }
        self.stop_requested = false;
        self.backend.play();
    }

    pub fn pause(&mut self) {
        if self.state.current.is_none() {
            return;
        }
        self.backend.pause();
    }

    pub fn toggle_play_pause(&mut self) {
        if self.backend.is_playing() {
            self.pause();
        } else {
            self.play();
        }
    }

    pub fn stop(&mut self) {
        self.stop_requested = true;
        self.backend.stop();
        self.state.is_playing = false;
        self.state.current_time_ms = 0;
        self.state.duration_ms = 0;
        if self.state.current.is_some() {
            self.state.phase = PlaybackPhase::StoppedByUser;
        }
        self.publish_time();
        self.publish_state();
    }

    pub fn seek_to_ms(&mut self, time_ms: i64) {
        if self.state.current.is_none() {
            return;
        }
        let duration_ms = self.state.duration_ms;
        let target = if duration_ms > 0 {
            time_ms.clamp(0, duration_ms)
        } else {
            time_ms.max(0)
        };
        self.backend.set_time_ms(target);
        self.state.current_time_ms = target;
        self.publish_time();
    }

    pub fn seek_to_fraction(&mut self, fraction: f32) {
        if self.state.current.is_none() || !fraction.is_finite() {
            return;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        if self.state.duration_ms > 0 {
            let target = (self.state.duration_ms as f64 * f64::from(fraction)).round() as i64;
            self.seek_to_ms(target);
        } else {
            self.backend.set_position(fraction);
        }
    }

    pub fn seek_by(&mut self, delta_ms: i64) {
        self.seek_to_ms(self.state.current_time_ms.saturating_add(delta_ms));
    }

    pub fn set_volume(&mut self, volume: f32) {
        if !volume.is_finite() {
            return;
        }
        self.state.volume = volume.clamp(0.0, 1.0);
        self.apply_native_volume();
        if let Err(err) = self
            .store
            .set(KEY_PLAYER_VOLUME, json!(f64::from(self.state.volume)))
        {
            warn!("failed to persist volume: {err}");
        }
        self.events
            .publish(PlayerEvent::VolumeChanged(self.state.volume));
    }

    fn apply_native_volume(&mut self) {
        let native = ((self.state.volume * 100.0).round() as i32)
            .clamp(0, self.config.max_native_volume);
        self.backend.set_native_volume(native);
    }

    pub fn select_original_track(&mut self) -> bool {
        self.select_track(TrackKind::Original)
    }

    pub fn select_accompaniment_track(&mut self) -> bool {
        self.select_track(TrackKind::Accompaniment)
    }

    pub fn select_track(&mut self, kind: TrackKind) -> bool {
        let Some(id) = self.state.track_id_for(kind) else {
            debug!(kind = kind.label(), "no audio track at that position");
            return false;
        };
        self.backend.set_current_audio_track(id);
        self.backend.set_muted(false);
        self.state.current_audio_track = Some(id);
        self.state.preferred_track = kind;
        self.preference_applied = true;
        self.events.publish(PlayerEvent::TrackSelected {
            id: Some(id),
            kind,
        });
        info!(kind = kind.label(), id, "selected audio track");
        true
    }

    pub fn refresh_audio_tracks(&mut self) {
        let ids = self.backend.audio_track_ids();
        let names = self.backend.audio_track_names();

        if ids.is_empty() && names.is_empty() && self.backend.is_playing() {
            if self.retry_pending {
                return;
            }
            if self.track_retries < self.config.max_track_retries {
                self.track_retries += 1;
                self.retry_pending = true;
                self.deferred.schedule(
                    Instant::now(),
                    self.config.track_refresh_delay,
                    FollowUpTask {
                        generation: self.generation,
                        follow_up: FollowUp::RetryTracks,
                    },
                );
                debug!(
                    attempt = self.track_retries,
                    "track list empty while playing, retrying"
                );
                return;
            }
            if self.tracks_seen {
                debug!(
                    retries = self.track_retries,
                    "track list still empty, keeping the published one"
                );
                return;
            }
            info!(
                retries = self.track_retries,
                "track list still empty, publishing it"
            );
        }

        let tracks = filter_tracks(&ids, &names);
        if !tracks.is_empty() {
            self.tracks_seen = true;
            self.track_retries = 0;
            self.retry_pending = false;
        }
        let current = Some(self.backend.current_audio_track()).filter(|id| *id >= 0);
        if tracks != self.state.audio_tracks || current != self.state.current_audio_track {
            self.state.audio_tracks = tracks;
            self.state.current_audio_track = current;
            self.events.publish(PlayerEvent::TracksChanged);
        }
        self.log_tracks();

        if self.after_load_done {
            self.apply_preferred_track();
        }
    }

    fn apply_preferred_track(&mut self) {
        if self.preference_applied {
            return;
        }
        let kind = self.state.preferred_track;
        let Some(id) = self.state.track_id_for(kind) else {
            return;
        };
        self.preference_applied = true;
        if self.state.current_audio_track == Some(id) {
            return;
        }
        self.backend.set_current_audio_track(id);
        self.state.current_audio_track = Some(id);
        self.events.publish(PlayerEvent::TrackSelected {
            id: Some(id),
            kind,
        });
        debug!(kind = kind.label(), id, "re-applied preferred track");
    }

    fn log_tracks(&mut self) {
        let signature = format!(
            "{:?} current={:?}",
            self.state.audio_tracks, self.state.current_audio_track
        );
        if self.track_log.should_log(&signature, Instant::now()) {
            debug!(tracks = %signature, "audio tracks");
        }
    }

    /// Applies every event the backend has queued, in emission order.
    pub fn process_backend_events(&mut self) {
        while let Ok(event) = self.backend_events.try_recv() {
            self.handle_backend_event(event);
        }
    }

    pub fn handle_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::StateChanged(state) => self.on_state_changed(state),
            BackendEvent::TimeChanged {
                time_ms,
                duration_ms,
            } => self.on_time_changed(time_ms, duration_ms),
        }
    }

    fn on_state_changed(&mut self, state: BackendState) {
        if self.state.current.is_none() {
            return;
        }

        self.state.is_playing = self.backend.is_playing();
        match state {
            BackendState::Playing if !self.stop_requested => {
                self.state.phase = PlaybackPhase::Playing;
            }
            BackendState::Paused if self.state.phase.has_started() => {
                self.state.phase = PlaybackPhase::Paused;
            }
            _ => {}
        }
        self.publish_state();
        self.capture_video_size();
        self.refresh_audio_tracks();

        match state {
            BackendState::Ended => self.complete("ended"),
            BackendState::Stopped if !self.stop_requested => self.complete("stopped unexpectedly"),
            BackendState::Error => warn!("engine reported an error state"),
            _ => {}
        }
    }

    fn on_time_changed(&mut self, time_ms: i64, duration_ms: i64) {
        if self.state.current.is_none() || self.state.phase == PlaybackPhase::Loading {
            return;
        }

        let duration_ms = duration_ms.max(0);
        let mut time_ms = time_ms.max(0);
        if duration_ms > 0 {
            time_ms = time_ms.min(duration_ms);
        }
        if time_ms != self.state.current_time_ms || duration_ms != self.state.duration_ms {
            self.state.current_time_ms = time_ms;
            self.state.duration_ms = duration_ms;
            self.publish_time();
        }

        if !self.state.video_size.is_known() {
            self.capture_video_size();
        }

        if duration_ms > 0
            && time_ms > 0
            && time_ms >= duration_ms - self.config.completion_margin_ms
        {
            self.complete("reached end of timeline");
        }
    }

    fn complete(&mut self, reason: &str) {
        if self.completion_fired || !self.state.phase.has_started() {
            return;
        }
        let Some(reference) = self.state.current.clone() else {
            return;
        };

        self.completion_fired = true;
        self.state.phase = PlaybackPhase::Ended;
        self.state.is_playing = false;
        self.publish_state();
        self.events
            .publish(PlayerEvent::Completed(reference.clone()));
        info!(reference = %reference, reason, "playback completed");
        self.pending_completion = Some(reference);
    }

    /// Completion raised since the last call, if any.
    pub fn take_completion(&mut self) -> Option<MediaReference> {
        self.pending_completion.take()
    }

    /// Runs deferred follow-ups due at `now` and returns how many were current.
    pub fn run_due(&mut self, now: Instant) -> usize {
        let mut ran = 0;
        for task in self.deferred.take_due(now) {
            if task.generation != self.generation {
                debug!(
                    stale = task.generation,
                    current = self.generation,
                    "discarding stale follow-up"
                );
                continue;
            }
            ran += 1;
            match task.follow_up {
                FollowUp::AfterLoad => {
                    self.after_load_done = true;
                    self.capture_video_size();
                    self.refresh_audio_tracks();
                }
                FollowUp::RetryTracks => {
                    self.retry_pending = false;
                    self.refresh_audio_tracks();
                }
            }
        }
        ran
    }

    pub fn tick(&mut self) {
        self.backend.tick();
    }

    fn capture_video_size(&mut self) {
        let size = self.backend.video_size();
        if size.is_known() && size != self.state.video_size {
            self.state.video_size = size;
            self.events.publish(PlayerEvent::VideoSizeChanged(size));
        }
    }

    fn publish_state(&mut self) {
        self.events.publish(PlayerEvent::StateChanged {
            is_playing: self.state.is_playing,
            phase: self.state.phase,
        });
    }

    fn publish_time(&mut self) {
        self.events.publish(PlayerEvent::TimeChanged {
            time_ms: self.state.current_time_ms,
            duration_ms: self.state.duration_ms,
        });
    }
}

impl PlaybackControl for Player {
    fn load(&mut self, reference: &MediaReference) -> Result<(), AppError> {
        Player::load(self, reference)
    }

    fn stop(&mut self) {
        Player::stop(self);
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.backend.stop();
    }
}

fn restored_volume(store: &dyn KeyValueStore) -> f32 {
    match store.get(KEY_PLAYER_VOLUME) {
        Ok(Some(value)) => value
            .as_f64()
            .filter(|volume| volume.is_finite())
            .map_or(1.0, |volume| volume.clamp(0.0, 1.0) as f32),
        Ok(None) => 1.0,
        Err(err) => {
            warn!("failed to read persisted volume: {err}");
            1.0
        }
    }
}

/// Drops negative ids and "disable" pseudo-tracks; names pair with ids by index.
fn filter_tracks(ids: &[i32], names: &[String]) -> Vec<AudioTrack> {
    ids.iter()
        .enumerate()
        .filter(|(_, id)| **id >= 0)
        .map(|(index, id)| AudioTrack {
            id: *id,
            name: names.get(index).cloned().unwrap_or_default(),
        })
        .filter(|track| !track.name.to_lowercase().contains("disable"))
        .collect()
}

#[derive(Default)]
struct TrackLog {
    last: Option<(String, Instant)>,
}

impl TrackLog {
    fn should_log(&mut self, signature: &str, now: Instant) -> bool {
        if let Some((last, at)) = &self.last
            && last == signature
            && now.saturating_duration_since(*at) < TRACK_LOG_WINDOW
        {
            return false;
        }
        self.last = Some((signature.to_string(), now));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryStore;
    use crate::engine::{ScriptHandle, ScriptedBackend, SeekRequest};
    use crate::error::StatusReporter;
    use crate::model::VideoSize;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    struct Fixture {
        player: Player,
        script: ScriptHandle,
        store: Arc<MemoryStore>,
        reporter: StatusReporter,
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_store(MemoryStore::shared())
        }

        fn with_store(store: Arc<MemoryStore>) -> Self {
            let (backend, script) = ScriptedBackend::new();
            let reporter = StatusReporter::new();
            let player = Player::new(
                Box::new(backend),
                store.clone(),
                Arc::new(reporter.clone()),
                PlayerConfig::default(),
            );
            Self {
                player,
                script,
                store,
                reporter,
                dir: tempdir().expect("tempdir"),
            }
        }

        fn media(&self, name: &str) -> MediaReference {
            let path = self.dir.path().join(name);
            fs::write(&path, b"ktv").expect("write media");
            MediaReference::new(path)
        }

        fn load_playing(&mut self, name: &str, duration_ms: i64) -> MediaReference {
            let reference = self.media(name);
            self.script.set_duration_ms(duration_ms);
            self.player.load(&reference).expect("load");
            self.player.process_backend_events();
            reference
        }
    }

    fn later() -> Instant {
        Instant::now() + Duration::from_millis(400)
    }

    fn completions(events: &Receiver<PlayerEvent>) -> usize {
        events
            .try_iter()
            .filter(|event| matches!(event, PlayerEvent::Completed(_)))
            .count()
    }

    #[test]
    fn load_resets_clock_and_starts_playback() {
        let mut fx = Fixture::new();
        let reference = fx.load_playing("song1.mkv", 180_000);

        let state = fx.player.state();
        assert_eq!(state.current.as_ref(), Some(&reference));
        assert_eq!(state.phase, PlaybackPhase::Playing);
        assert!(state.is_playing);
        assert_eq!(state.current_time_ms, 0);
        assert_eq!(fx.script.opened(), vec![reference.path().to_path_buf()]);
    }

    #[test]
    fn ended_then_time_at_duration_completes_once() {
        let mut fx = Fixture::new();
        let events = fx.player.subscribe();
        let reference = fx.load_playing("song1.mkv", 10_000);

        fx.script.finish();
        fx.script.advance_to(10_000);
        fx.player.process_backend_events();

        assert_eq!(fx.player.take_completion(), Some(reference));
        assert_eq!(fx.player.take_completion(), None);
        assert_eq!(completions(&events), 1);
        assert_eq!(fx.player.state().phase, PlaybackPhase::Ended);
    }

    #[test]
    fn time_near_end_completes_without_ended_state() {
        let mut fx = Fixture::new();
        let reference = fx.load_playing("song1.mkv", 10_000);

        fx.script.advance_to(9_400);
        fx.player.process_backend_events();
        assert_eq!(fx.player.take_completion(), None);

        fx.script.advance_to(9_600);
        fx.script.finish();
        fx.player.process_backend_events();
        assert_eq!(fx.player.take_completion(), Some(reference));
        assert_eq!(fx.player.take_completion(), None);
    }

    #[test]
    fn user_stop_is_not_completion() {
        let mut fx = Fixture::new();
        let events = fx.player.subscribe();
        fx.load_playing("song1.mkv", 10_000);

        fx.player.stop();
        fx.player.process_backend_events();

        assert_eq!(fx.player.take_completion(), None);
        assert_eq!(completions(&events), 0);
        assert_eq!(fx.script.stops(), 1);
        let state = fx.player.state();
        assert_eq!(state.phase, PlaybackPhase::StoppedByUser);
        assert!(!state.is_playing);
        assert_eq!((state.current_time_ms, state.duration_ms), (0, 0));
    }

    #[test]
    fn unexpected_stop_completes() {
        let mut fx = Fixture::new();
        let reference = fx.load_playing("song1.mkv", 10_000);

        fx.script.set_playing(false);
        fx.script.emit_state(BackendState::Stopped);
        fx.player.process_backend_events();

        assert_eq!(fx.player.take_completion(), Some(reference));
    }

    #[test]
    fn terminal_state_before_playback_starts_is_ignored() {
        let mut fx = Fixture::new();
        fx.script.set_auto_events(false);
        let reference = fx.media("song1.mkv");
        fx.player.load(&reference).expect("load");

        fx.script.emit_state(BackendState::Stopped);
        fx.player.process_backend_events();

        assert_eq!(fx.player.take_completion(), None);
        assert_eq!(fx.player.state().phase, PlaybackPhase::Loading);
    }

    #[test]
    fn reload_rearms_completion() {
        let mut fx = Fixture::new();
        fx.load_playing("song1.mkv", 10_000);
        fx.script.finish();
        fx.player.process_backend_events();
        assert!(fx.player.take_completion().is_some());

        let second = fx.load_playing("song2.mkv", 10_000);
        fx.script.finish();
        fx.player.process_backend_events();
        assert_eq!(fx.player.take_completion(), Some(second));
    }

    #[test]
    fn refresh_filters_disabled_and_negative_tracks() {
        let mut fx = Fixture::new();
        fx.script
            .set_tracks(&[-1, 1, 2, 3], &["Disable", "Vocal", "Karaoke", "Audio Disabled"]);
        fx.player.refresh_audio_tracks();

        let tracks = &fx.player.state().audio_tracks;
        assert_eq!(
            tracks,
            &vec![
                AudioTrack {
                    id: 1,
                    name: String::from("Vocal"),
                },
                AudioTrack {
                    id: 2,
                    name: String::from("Karaoke"),
                },
            ]
        );
    }

    #[test]
    fn refresh_is_idempotent() {
        let mut fx = Fixture::new();
        let events = fx.player.subscribe();
        fx.script.set_tracks(&[1, 2], &["Vocal", "Karaoke"]);

        fx.player.refresh_audio_tracks();
        let first = fx.player.state().audio_tracks.clone();
        fx.player.refresh_audio_tracks();

        assert_eq!(fx.player.state().audio_tracks, first);
        let changes = events
            .try_iter()
            .filter(|event| *event == PlayerEvent::TracksChanged)
            .count();
        assert_eq!(changes, 1);
    }

    #[test]
    fn names_shorter_than_ids_stay_aligned() {
        let tracks = filter_tracks(&[4, 5], &[String::from("Vocal")]);
        assert_eq!(tracks[0].name, "Vocal");
        assert_eq!(tracks[1].name, "");
    }

    #[test]
    fn transient_empty_list_keeps_published_tracks_and_retries() {
        let mut fx = Fixture::new();
        fx.script.set_tracks(&[1, 2], &["Vocal", "Karaoke"]);
        fx.load_playing("song1.mkv", 10_000);
        let published = fx.player.state().audio_tracks.clone();
        assert_eq!(published.len(), 2);

        fx.script.clear_tracks();
        fx.player.refresh_audio_tracks();
        assert_eq!(fx.player.state().audio_tracks, published);

        fx.script.set_tracks(&[7, 8], &["Vocal", "Karaoke"]);
        assert!(fx.player.run_due(later()) >= 1);
        let ids: Vec<i32> = fx
            .player
            .state()
            .audio_tracks
            .iter()
            .map(|track| track.id)
            .collect();
        assert_eq!(ids, vec![7, 8]);
    }

    #[test]
    fn recovered_blips_do_not_use_up_the_retry_budget() {
        let mut fx = Fixture::new();
        fx.script.set_tracks(&[1, 2], &["Vocal", "Karaoke"]);
        fx.load_playing("song1.mkv", 10_000);

        for blip in 0..15 {
            fx.script.clear_tracks();
            fx.player.refresh_audio_tracks();
            assert_eq!(
                fx.player.state().audio_tracks.len(),
                2,
                "blip {blip} replaced the published tracks"
            );
            fx.script.set_tracks(&[1, 2], &["Vocal", "Karaoke"]);
            fx.player.run_due(later());
        }

        fx.script.clear_tracks();
        fx.player.refresh_audio_tracks();
        assert!(fx.player.next_deadline().is_some());
        assert!(fx.player.select_accompaniment_track());
    }

    #[test]
    fn exhausted_retries_keep_published_tracks() {
        let mut fx = Fixture::new();
        fx.script.set_tracks(&[1, 2], &["Vocal", "Karaoke"]);
        fx.load_playing("song1.mkv", 10_000);
        fx.player.run_due(later());
        fx.script.clear_tracks();
        fx.player.refresh_audio_tracks();

        let mut now = later();
        let mut rounds = 0;
        while fx.player.run_due(now) > 0 {
            rounds += 1;
            now += Duration::from_millis(400);
            assert!(rounds <= 20, "retry loop did not terminate");
        }

        assert_eq!(rounds, 10);
        assert!(fx.player.next_deadline().is_none());
        assert_eq!(fx.player.state().audio_tracks.len(), 2);
    }

    #[test]
    fn retries_are_bounded() {
        let mut fx = Fixture::new();
        fx.load_playing("song1.mkv", 10_000);
        fx.script.clear_tracks();

        let mut now = later();
        let mut rounds = 0;
        while fx.player.run_due(now) > 0 {
            rounds += 1;
            now += Duration::from_millis(400);
            assert!(rounds <= 20, "retry loop did not terminate");
        }
        assert!(fx.player.next_deadline().is_none());
    }

    #[test]
    fn stale_follow_up_is_discarded_after_reload() {
        let mut fx = Fixture::new();
        fx.script.set_tracks(&[1, 2], &["Vocal", "Karaoke"]);
        fx.load_playing("song1.mkv", 10_000);
        fx.load_playing("song2.mkv", 10_000);

        assert_eq!(fx.player.run_due(later()), 1);
    }

    #[test]
    fn preferred_track_is_reapplied_after_load() {
        let mut fx = Fixture::new();
        fx.script.set_tracks(&[1, 2], &["Vocal", "Karaoke"]);
        fx.load_playing("song1.mkv", 10_000);
        assert!(fx.player.select_accompaniment_track());

        fx.load_playing("song2.mkv", 10_000);
        fx.script.set_tracks(&[3, 4], &["Vocal", "Karaoke"]);
        fx.player.run_due(later());

        assert_eq!(fx.player.state().preferred_track, TrackKind::Accompaniment);
        assert_eq!(fx.player.state().current_audio_track, Some(4));
        assert_eq!(fx.script.current_track(), 4);
    }

    #[test]
    fn selecting_a_track_unmutes() {
        let mut fx = Fixture::new();
        fx.script.set_tracks(&[1, 2], &["Vocal", "Karaoke"]);
        fx.load_playing("song1.mkv", 10_000);
        fx.script.set_muted(true);

        assert!(fx.player.select_original_track());
        assert!(!fx.script.is_muted());
        assert_eq!(fx.script.track_switches().last(), Some(&1));
    }

    #[test]
    fn missing_accompaniment_keeps_preference() {
        let mut fx = Fixture::new();
        fx.script.set_tracks(&[1], &["Vocal"]);
        fx.load_playing("song1.mkv", 10_000);

        assert!(!fx.player.select_accompaniment_track());
        assert_eq!(fx.player.state().preferred_track, TrackKind::Original);
    }

    #[test]
    fn volume_maps_to_native_range_and_persists() {
        let mut fx = Fixture::new();
        fx.player.set_volume(0.5);
        assert_eq!(fx.script.native_volume(), 50);
        assert_eq!(
            fx.store.get(KEY_PLAYER_VOLUME).expect("get"),
            Some(json!(0.5))
        );

        fx.player.set_volume(1.7);
        assert_eq!(fx.script.native_volume(), 100);
        assert_eq!(fx.player.state().volume, 1.0);
    }

    #[test]
    fn volume_is_restored_from_store() {
        let store = MemoryStore::shared();
        store.set(KEY_PLAYER_VOLUME, json!(0.25)).expect("seed");

        let fx = Fixture::with_store(store);
        assert_eq!(fx.player.state().volume, 0.25);
        assert_eq!(fx.script.native_volume(), 25);
    }

    #[test]
    fn unsupported_extension_changes_nothing() {
        let mut fx = Fixture::new();
        let before = fx.load_playing("song1.mkv", 10_000);
        let snapshot = fx.player.state().clone();
        let mp4 = fx.media("clip.mp4");

        let err = fx.player.load(&mp4).expect_err("mp4 is not accepted");
        assert_eq!(err, AppError::UnsupportedFormat(String::from("mp4")));
        assert_eq!(fx.player.state(), &snapshot);
        assert_eq!(fx.player.state().current.as_ref(), Some(&before));
        assert_eq!(fx.script.opened().len(), 1);
        assert_eq!(
            fx.reporter.latest().map(|report| report.context),
            Some(String::from("load media"))
        );
    }

    #[test]
    fn missing_file_is_reported() {
        let mut fx = Fixture::new();
        let missing = MediaReference::new(fx.dir.path().join("gone.mkv"));

        let err = fx.player.load(&missing).expect_err("file is missing");
        assert!(matches!(err, AppError::FileNotFound(_)));
        assert_eq!(fx.player.state().phase, PlaybackPhase::Idle);
    }

    #[test]
    fn engine_open_failure_keeps_previous_reference() {
        let mut fx = Fixture::new();
        let before = fx.load_playing("song1.mkv", 10_000);
        let next = fx.media("song2.mpg");
        fx.script.fail_next_open("corrupt stream");

        let err = fx.player.load(&next).expect_err("engine refused");
        assert!(matches!(err, AppError::MediaLoadFailed(_)));
        assert_eq!(fx.player.state().current.as_ref(), Some(&before));
    }

    #[test]
    fn seeking_clamps_and_prefers_absolute_time() {
        let mut fx = Fixture::new();
        fx.load_playing("song1.mkv", 10_000);
        fx.script.advance_to(1_000);
        fx.player.process_backend_events();

        fx.player.seek_to_ms(25_000);
        fx.player.seek_to_fraction(0.5);
        fx.player.seek_to_ms(-10);

        assert_eq!(
            fx.script.seeks(),
            vec![
                SeekRequest::Time(10_000),
                SeekRequest::Time(5_000),
                SeekRequest::Time(0),
            ]
        );
    }

    #[test]
    fn fraction_seek_without_duration_uses_position() {
        let mut fx = Fixture::new();
        fx.load_playing("song1.mkv", 0);

        fx.player.seek_to_fraction(0.25);
        assert_eq!(fx.script.seeks(), vec![SeekRequest::Position(0.25)]);
    }

    #[test]
    fn transport_is_a_no_op_without_media() {
        let mut fx = Fixture::new();
        fx.player.play();
        fx.player.pause();
        fx.player.toggle_play_pause();
        fx.player.seek_to_ms(1_000);

        assert!(!fx.script.is_playing());
        assert!(fx.script.seeks().is_empty());
        assert_eq!(fx.player.state().phase, PlaybackPhase::Idle);
    }

    #[test]
    fn known_video_size_is_captured_on_state_change() {
        let mut fx = Fixture::new();
        let events = fx.player.subscribe();
        let size = VideoSize {
            width: 1920,
            height: 1080,
        };
        fx.script.set_video_size(size);
        fx.load_playing("song1.mkv", 10_000);

        assert_eq!(fx.player.state().video_size, size);
        let published = events
            .try_iter()
            .filter(|event| *event == PlayerEvent::VideoSizeChanged(size))
            .count();
        assert_eq!(published, 1);
    }

    #[test]
    fn late_video_size_is_picked_up_by_time_updates() {
        let mut fx = Fixture::new();
        fx.load_playing("song1.mkv", 10_000);
        assert!(!fx.player.state().video_size.is_known());

        let size = VideoSize {
            width: 1280,
            height: 720,
        };
        fx.script.set_video_size(size);
        fx.script.advance_to(1_000);
        fx.player.process_backend_events();

        assert_eq!(fx.player.state().video_size, size);
    }

    #[test]
    fn unknown_video_size_never_replaces_a_known_one() {
        let mut fx = Fixture::new();
        let size = VideoSize {
            width: 720,
            height: 576,
        };
        fx.script.set_video_size(size);
        fx.load_playing("song1.mkv", 10_000);

        fx.script.set_video_size(VideoSize::default());
        fx.script.emit_state(BackendState::Playing);
        fx.script.advance_to(2_000);
        fx.player.process_backend_events();

        assert_eq!(fx.player.state().video_size, size);
    }

    #[test]
    fn track_log_suppresses_repeats_within_window() {
        let mut log = TrackLog::default();
        let start = Instant::now();
        assert!(log.should_log("a", start));
        assert!(!log.should_log("a", start + Duration::from_millis(500)));
        assert!(log.should_log("b", start + Duration::from_millis(600)));
        assert!(log.should_log("b", start + Duration::from_millis(1_700)));
    }
}
