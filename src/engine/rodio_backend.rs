use super::inspect::{self, MediaTrack};
use super::{BackendEvent, BackendState, MediaBackend};
use crate::model::VideoSize;
use anyhow::{Context, Result, bail};
use crossbeam_channel::Sender;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{ChannelCount, DeviceSinkBuilder, MixerDeviceSink, Player, SampleRate, Source};
#[cfg(unix)]
use std::ffi::CString;
use std::num::NonZero;
use std::path::{Path, PathBuf};
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatReader, SeekMode, SeekTo};
use symphonia::core::units::Time;
use symphonia::default::get_codecs;
use tracing::{debug, warn};

/// Audio-only engine: symphonia demuxes and decodes the selected stream, rodio
/// plays it on the system output.
pub struct RodioBackend {
    device_sink: MixerDeviceSink,
    sink: Player,
    events: Option<Sender<BackendEvent>>,
    media: Option<OpenMedia>,
    state: BackendState,
    position_offset: Duration,
    native_volume: i32,
    muted: bool,
    last_reported_ms: i64,
}

struct OpenMedia {
    path: PathBuf,
    tracks: Vec<MediaTrack>,
    selected: usize,
    duration: Option<Duration>,
}

impl RodioBackend {
    pub fn new() -> Result<Self> {
        let (device_sink, sink) = open_output_stream()?;
        Ok(Self {
            device_sink,
            sink,
            events: None,
            media: None,
            state: BackendState::Stopped,
            position_offset: Duration::ZERO,
            native_volume: 100,
            muted: false,
            last_reported_ms: -1,
        })
    }

    fn emit(&self, event: BackendEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn set_state(&mut self, state: BackendState) {
        self.state = state;
        self.emit(BackendEvent::StateChanged(state));
    }

    fn effective_volume(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.native_volume.max(0) as f32 / 100.0
        }
    }

    fn position(&self) -> Duration {
        if self.media.is_none() {
            return Duration::ZERO;
        }
        let position = self.position_offset.saturating_add(self.sink.get_pos());
        match self.media.as_ref().and_then(|media| media.duration) {
            Some(duration) => position.min(duration),
            None => position,
        }
    }

    /// Rebuilds the sink with the selected stream starting at `start`, keeping
    /// the play/pause state.
    fn restart_at(&mut self, start: Duration) {
        let Some(media) = &self.media else {
            return;
        };
        let Some(track) = media.tracks.get(media.selected) else {
            return;
        };

        let source = match TrackSource::open(&media.path, track, start) {
            Ok(source) => source,
            Err(err) => {
                warn!(path = %media.path.display(), "failed to reopen stream: {err:#}");
                self.set_state(BackendState::Error);
                return;
            }
        };

        let was_paused = self.sink.is_paused() || self.state != BackendState::Playing;
        self.sink.stop();
        self.sink = Player::connect_new(self.device_sink.mixer());
        if was_paused {
            self.sink.pause();
        }
        self.sink.set_volume(self.effective_volume());
        self.sink.append(source);
        self.position_offset = start;
        self.last_reported_ms = -1;
    }
}

impl MediaBackend for RodioBackend {
    fn attach(&mut self, events: Sender<BackendEvent>) {
        self.events = Some(events);
    }

    fn open(&mut self, path: &Path) -> Result<()> {
        let info = inspect::inspect_media(path)?;
        let Some(first) = info.tracks.first() else {
            bail!("no decodable audio stream in {}", path.display());
        };
        let source = TrackSource::open(path, first, Duration::ZERO)?;

        self.sink.stop();
        self.sink = Player::connect_new(self.device_sink.mixer());
        self.sink.pause();
        self.sink.set_volume(self.effective_volume());
        self.sink.append(source);

        debug!(path = %path.display(), streams = info.tracks.len(), "opened media");
        self.media = Some(OpenMedia {
            path: path.to_path_buf(),
            tracks: info.tracks,
            selected: 0,
            duration: info.duration,
        });
        self.position_offset = Duration::ZERO;
        self.last_reported_ms = -1;
        self.set_state(BackendState::Opening);
        Ok(())
    }

    fn play(&mut self) {
        if self.media.is_none() {
            return;
        }
        if self.sink.empty() {
            self.restart_at(Duration::ZERO);
        }
        self.sink.play();
        self.set_state(BackendState::Playing);
    }

    fn pause(&mut self) {
        if self.media.is_none() || self.state != BackendState::Playing {
            return;
        }
        self.sink.pause();
        self.set_state(BackendState::Paused);
    }

    fn stop(&mut self) {
        self.sink.stop();
        self.position_offset = Duration::ZERO;
        self.set_state(BackendState::Stopped);
    }

    fn is_playing(&self) -> bool {
        self.media.is_some()
            && self.state == BackendState::Playing
            && !self.sink.is_paused()
            && !self.sink.empty()
    }

    fn time_ms(&self) -> i64 {
        self.position().as_millis() as i64
    }

    fn duration_ms(&self) -> i64 {
        self.media
            .as_ref()
            .and_then(|media| media.duration)
            .map_or(0, |duration| duration.as_millis() as i64)
    }

    fn set_time_ms(&mut self, time_ms: i64) {
        self.restart_at(Duration::from_millis(time_ms.max(0) as u64));
    }

    fn set_position(&mut self, fraction: f32) {
        let duration_ms = self.duration_ms();
        if duration_ms > 0 {
            let target = (duration_ms as f64 * f64::from(fraction.clamp(0.0, 1.0))).round();
            self.set_time_ms(target as i64);
        }
    }

    fn native_volume(&self) -> i32 {
        self.native_volume
    }

    fn set_native_volume(&mut self, volume: i32) {
        self.native_volume = volume.max(0);
        self.sink.set_volume(self.effective_volume());
    }

    fn is_muted(&self) -> bool {
        self.muted
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.sink.set_volume(self.effective_volume());
    }

    fn audio_track_ids(&self) -> Vec<i32> {
        self.media
            .as_ref()
            .map(|media| (0..media.tracks.len() as i32).collect())
            .unwrap_or_default()
    }

    fn audio_track_names(&self) -> Vec<String> {
        self.media
            .as_ref()
            .map(|media| media.tracks.iter().map(|track| track.name.clone()).collect())
            .unwrap_or_default()
    }

    fn current_audio_track(&self) -> i32 {
        self.media
            .as_ref()
            .map_or(-1, |media| media.selected as i32)
    }

    fn set_current_audio_track(&mut self, id: i32) {
        let Ok(selected) = usize::try_from(id) else {
            return;
        };
        let position = self.position();
        let Some(media) = self.media.as_mut() else {
            return;
        };
        if selected >= media.tracks.len() || selected == media.selected {
            return;
        }
        media.selected = selected;
        self.restart_at(position);
    }

    fn video_size(&self) -> VideoSize {
        VideoSize::default()
    }

    fn tick(&mut self) {
        if self.media.is_none() || self.state != BackendState::Playing {
            return;
        }

        if self.sink.empty() {
            let duration_ms = self.duration_ms();
            self.position_offset = self.position();
            self.emit(BackendEvent::TimeChanged {
                time_ms: duration_ms.max(self.time_ms()),
                duration_ms,
            });
            self.set_state(BackendState::Ended);
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
    }

    fn output_name(&self) -> String {
        with_silenced_stderr(|| {
            rodio::cpal::default_host()
                .default_output_device()
                .and_then(|device| device.description().ok())
                .map(|description| description.name().to_string())
        })
        .unwrap_or_else(|| String::from("System default output (CPAL)"))
    }
}

impl Drop for RodioBackend {
    fn drop(&mut self) {
        self.sink.stop();
    }
}

/// One audio stream of a container, decoded to interleaved f32 on demand.
struct TrackSource {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    stream_id: u32,
    channels: ChannelCount,
    sample_rate: SampleRate,
    total_duration: Option<Duration>,
    buffer: Option<SampleBuffer<f32>>,
    pending: Vec<f32>,
    cursor: usize,
    finished: bool,
}

impl TrackSource {
    fn open(path: &Path, track: &MediaTrack, start: Duration) -> Result<Self> {
        let mut format = inspect::open_format(path)?;
        let params = format
            .tracks()
            .iter()
            .find(|candidate| candidate.id == track.stream_id)
            .map(|candidate| candidate.codec_params.clone())
            .with_context(|| {
                format!("stream {} missing from {}", track.stream_id, path.display())
            })?;

        let sample_rate = params
            .sample_rate
            .and_then(NonZero::new)
            .context("missing sample rate")?;
        let channel_count = params.channels.map(|channels| channels.count()).unwrap_or(0);
        let channels = u16::try_from(channel_count)
            .ok()
            .and_then(NonZero::new)
            .with_context(|| format!("unsupported channel layout for stream {}", track.stream_id))?;

        let decoder = get_codecs()
            .make(&params, &DecoderOptions::default())
            .with_context(|| format!("no decoder for stream {}", track.stream_id))?;

        if !start.is_zero() {
            let time = Time::new(start.as_secs(), f64::from(start.subsec_millis()) / 1000.0);
            format
                .seek(
                    SeekMode::Coarse,
                    SeekTo::Time {
                        time,
                        track_id: Some(track.stream_id),
                    },
                )
                .with_context(|| format!("failed to seek to {start:?}"))?;
        }

        Ok(Self {
            format,
            decoder,
            stream_id: track.stream_id,
            channels,
            sample_rate,
            total_duration: track.duration,
            buffer: None,
            pending: Vec::new(),
            cursor: 0,
            finished: false,
        })
    }

    fn refill(&mut self) -> bool {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(_) => return false,
            };
            if packet.track_id() != self.stream_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let capacity = decoded.capacity() as u64;
                    let needs_realloc = self
                        .buffer
                        .as_ref()
                        .is_none_or(|buffer| (buffer.capacity() as u64) < capacity);
                    if needs_realloc {
                        self.buffer = Some(SampleBuffer::<f32>::new(capacity, spec));
                    }
                    let Some(buffer) = self.buffer.as_mut() else {
                        return false;
                    };
                    buffer.copy_interleaved_ref(decoded);
                    self.pending.clear();
                    self.pending.extend_from_slice(buffer.samples());
                    self.cursor = 0;
                    if !self.pending.is_empty() {
                        return true;
                    }
                }
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(_) => return false,
            }
        }
    }
}

impl Iterator for TrackSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.cursor >= self.pending.len() {
            if self.finished || !self.refill() {
                self.finished = true;
                return None;
            }
        }
        let sample = self.pending.get(self.cursor).copied();
        self.cursor += 1;
        sample
    }
}

impl Source for TrackSource {
    fn current_span_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> ChannelCount {
        self.channels
    }

    fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        self.total_duration
    }
}

fn open_output_stream() -> Result<(MixerDeviceSink, Player)> {
    let mut device_sink = with_silenced_stderr(|| {
        match DeviceSinkBuilder::from_default_device()
            .context("failed to open default system output")
            .and_then(|builder| {
                builder
                    .with_error_callback(|_| {})
                    .open_sink_or_fallback()
                    .context("failed to start default output")
            }) {
            Ok(device_sink) => Ok(device_sink),
            Err(default_err) => {
                let host = rodio::cpal::default_host();
                let devices = host
                    .output_devices()
                    .context("failed to enumerate output devices")?;
                for device in devices {
                    let opened = DeviceSinkBuilder::from_device(device)
                        .context("failed to open fallback output device")
                        .and_then(|builder| {
                            builder
                                .with_error_callback(|_| {})
                                .open_sink_or_fallback()
                                .context("failed to start fallback output")
                        });
                    if let Ok(device_sink) = opened {
                        return Ok(device_sink);
                    }
                }
                Err(default_err.context("unable to start any audio output"))
            }
        }
    })?;
    device_sink.log_on_drop(false);
    let sink = Player::connect_new(device_sink.mixer());
    Ok((device_sink, sink))
}

#[cfg(unix)]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    let saved = unsafe { libc::dup(libc::STDERR_FILENO) };
    if saved < 0 {
        return operation();
    }

    let devnull = CString::new("/dev/null")
        .ok()
        .map(|path| unsafe { libc::open(path.as_ptr(), libc::O_WRONLY) })
        .unwrap_or(-1);

    if devnull >= 0 {
        unsafe {
            libc::dup2(devnull, libc::STDERR_FILENO);
            libc::close(devnull);
        }
    }

    let result = operation();

    unsafe {
        libc::dup2(saved, libc::STDERR_FILENO);
        libc::close(saved);
    }

    result
}

#[cfg(not(unix))]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    operation()
}
