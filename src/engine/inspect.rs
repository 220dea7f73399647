use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters};
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::get_probe;

/// Container-level facts about a media file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaInfo {
    pub tracks: Vec<MediaTrack>,
    pub duration: Option<Duration>,
}

/// One decodable audio stream, in container order.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaTrack {
    pub stream_id: u32,
    pub name: String,
    pub duration: Option<Duration>,
}

pub fn inspect_media(path: &Path) -> Result<MediaInfo> {
    let format = open_format(path)?;
    let tracks: Vec<MediaTrack> = format
        .tracks()
        .iter()
        .filter(|track| is_audio(&track.codec_params))
        .enumerate()
        .map(|(position, track)| MediaTrack {
            stream_id: track.id,
            name: track_name(track.language.as_deref(), position),
            duration: codec_duration(&track.codec_params),
        })
        .collect();
    let duration = tracks.iter().filter_map(|track| track.duration).max();
    Ok(MediaInfo { tracks, duration })
}

pub(crate) fn open_format(path: &Path) -> Result<Box<dyn FormatReader>> {
    let file =
        File::open(path).with_context(|| format!("failed to open media {}", path.display()))?;
    let source = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(OsStr::to_str) {
        hint.with_extension(extension);
    }

    let detected = get_probe()
        .format(
            &hint,
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("failed to read container {}", path.display()))?;
    Ok(detected.format)
}

fn is_audio(params: &CodecParameters) -> bool {
    params.codec != CODEC_TYPE_NULL && params.sample_rate.is_some()
}

fn track_name(language: Option<&str>, position: usize) -> String {
    match language.map(str::trim).filter(|lang| !lang.is_empty()) {
        Some(lang) => format!("Track {} [{lang}]", position + 1),
        None => format!("Track {}", position + 1),
    }
}

fn codec_duration(params: &CodecParameters) -> Option<Duration> {
    if let (Some(time_base), Some(frame_count)) = (params.time_base, params.n_frames) {
        let time = time_base.calc_time(frame_count);
        return Some(Duration::from_secs(time.seconds) + Duration::from_secs_f64(time.frac));
    }

    params
        .n_frames
        .zip(params.sample_rate)
        .filter(|(_, sample_rate)| *sample_rate > 0)
        .map(|(frame_count, sample_rate)| {
            Duration::from_secs_f64(frame_count as f64 / f64::from(sample_rate))
        })
}
