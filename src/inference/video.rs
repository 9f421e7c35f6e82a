use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use image::RgbImage;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

use super::FrameAsset;
use super::frame::{
    MAX_FRAME_HEIGHT, MAX_FRAME_WIDTH, preprocess_frame, quality_score, resize_to_fit, save_frame,
};
use super::sampler;

/// Screenshots older than this are removed by the pool-wide cleanup
pub const STALE_FRAME_AGE: Duration = Duration::from_secs(3600);

static FFMPEG_INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Initialize FFmpeg. Safe to call more than once; every call reports the
/// outcome of the first.
pub fn init_ffmpeg() -> Result<()> {
    FFMPEG_INIT
        .get_or_init(|| ffmpeg::init().map_err(|e| e.to_string()))
        .clone()
        .map_err(|e| anyhow::anyhow!("Failed to initialize FFmpeg: {}", e))
}

/// Basic facts about a video file
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub fps: f64,
    pub total_frames: u64,
    pub width: u32,
    pub height: u32,
    /// Seconds, never negative
    pub duration: f64,
    pub byte_size: u64,
}

impl VideoInfo {
    pub fn size_mb(&self) -> f64 {
        self.byte_size as f64 / (1024.0 * 1024.0)
    }
}

/// A video on disk whose metadata is probed on first use and then cached
#[derive(Debug)]
pub struct VideoHandle {
    path: PathBuf,
    info: OnceLock<VideoInfo>,
}

impl VideoHandle {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        Self {
            path,
            info: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> Result<&VideoInfo> {
        if let Some(info) = self.info.get() {
            return Ok(info);
        }
        let probed = probe_video(&self.path)?;
        Ok(self.info.get_or_init(|| probed))
    }
}

pub fn probe_video<P: AsRef<Path>>(video_path: P) -> Result<VideoInfo> {
    init_ffmpeg()?;

    let byte_size = std::fs::metadata(video_path.as_ref())
        .context("Failed to stat video file")?
        .len();

    let input = ffmpeg::format::input(&video_path).context("Failed to open video file")?;

    let video_stream = input
        .streams()
        .best(ffmpeg::media::Type::Video)
        .context("Could not find video stream")?;

    let fps = f64::from(video_stream.avg_frame_rate());
    let fps = if fps.is_finite() && fps > 0.0 { fps } else { 0.0 };

    let decoder = ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())
        .context("Failed to create decoder context")?
        .decoder()
        .video()
        .context("Failed to create video decoder")?;

    let mut duration = input.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE);
    if !(duration > 0.0) {
        // container did not report a duration; fall back to the stream
        duration = video_stream.duration() as f64 * f64::from(video_stream.time_base());
    }
    let duration = if duration.is_finite() { duration.max(0.0) } else { 0.0 };

    let total_frames = match video_stream.frames() {
        n if n > 0 => n as u64,
        _ => (duration * fps).round() as u64,
    };

    Ok(VideoInfo {
        fps,
        total_frames,
        width: decoder.width(),
        height: decoder.height(),
        duration,
        byte_size,
    })
}

/// Whether the video opens and yields at least one decodable frame
pub fn can_process_video<P: AsRef<Path>>(video_path: P) -> bool {
    match decode_frame_at(video_path.as_ref(), 0.0) {
        Ok(_) => true,
        Err(e) => {
            debug!("Cannot process {:?}: {:#}", video_path.as_ref(), e);
            false
        }
    }
}

/// Decode and preprocess the frame nearest to `time_offset` seconds.
pub fn extract_frame<P: AsRef<Path>>(video_path: P, time_offset: f64) -> Option<RgbImage> {
    match decode_frame_at(video_path.as_ref(), time_offset) {
        Ok(frame) => Some(preprocess_frame(frame)),
        Err(e) => {
            error!(
                "Failed to extract frame from {:?} @ {:.2}s: {:#}",
                video_path.as_ref(),
                time_offset,
                e
            );
            None
        }
    }
}

/// Seek to frame `round(time_offset * fps)` and decode it as RGB.
fn decode_frame_at(video_path: &Path, time_offset: f64) -> Result<RgbImage> {
    init_ffmpeg()?;

    let mut input = ffmpeg::format::input(&video_path).context("Failed to open video file")?;

    let (video_stream_index, time_base, fps, stream_frames, start_time, parameters) = {
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .context("Could not find video stream")?;
        (
            stream.index(),
            stream.time_base(),
            f64::from(stream.avg_frame_rate()),
            stream.frames(),
            stream.start_time(),
            stream.parameters(),
        )
    };

    // offsets are relative to the first frame; MPEG-TS streams rarely start at 0
    let start_secs = stream_start_secs(start_time, f64::from(time_base));

    if !(fps.is_finite() && fps > 0.0) {
        anyhow::bail!("Video has no usable frame rate");
    }

    let frame_index = (time_offset * fps).round().max(0.0) as i64;
    if stream_frames > 0 && frame_index >= stream_frames {
        anyhow::bail!(
            "Frame {} is past the last frame ({})",
            frame_index,
            stream_frames
        );
    }

    let target_time = frame_index as f64 / fps;
    let half_frame = 0.5 / fps;

    let mut decoder = ffmpeg::codec::context::Context::from_parameters(parameters)
        .context("Failed to create codec context")?
        .decoder()
        .video()
        .context("Failed to create video decoder")?;

    let mut scaler = ffmpeg::software::scaling::context::Context::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        ffmpeg::format::Pixel::RGB24,
        decoder.width(),
        decoder.height(),
        ffmpeg::software::scaling::flag::Flags::BILINEAR,
    )
    .context("Failed to create scaler")?;

    let seek_timestamp =
        ((target_time + start_secs) * f64::from(ffmpeg::ffi::AV_TIME_BASE)) as i64;
    input
        .seek(seek_timestamp, ..seek_timestamp)
        .with_context(|| format!("Failed to seek to {:.2}s", target_time))?;

    let mut decoded_frame = ffmpeg::util::frame::video::Video::empty();
    let mut rgb_frame = ffmpeg::util::frame::video::Video::empty();

    let reached_target = |frame: &ffmpeg::util::frame::video::Video| -> bool {
        let pts = frame.timestamp().or(frame.pts()).unwrap_or(0);
        let current_time = pts as f64 * f64::from(time_base) - start_secs;
        current_time + half_frame >= target_time
    };

    for (stream, packet) in input.packets() {
        if stream.index() != video_stream_index {
            continue;
        }

        if decoder.send_packet(&packet).is_err() {
            continue;
        }

        while decoder.receive_frame(&mut decoded_frame).is_ok() {
            if reached_target(&decoded_frame) {
                scaler
                    .run(&decoded_frame, &mut rgb_frame)
                    .context("Failed to scale frame")?;
                return frame_to_rgb(&rgb_frame);
            }
        }
    }

    // flush whatever the decoder still holds
    decoder.send_eof().ok();
    while decoder.receive_frame(&mut decoded_frame).is_ok() {
        if reached_target(&decoded_frame) {
            scaler
                .run(&decoded_frame, &mut rgb_frame)
                .context("Failed to scale frame")?;
            return frame_to_rgb(&rgb_frame);
        }
    }

    anyhow::bail!(
        "No decodable frame at index {} ({:.2}s)",
        frame_index,
        target_time
    )
}

/// Stream start in seconds; streams without a start time begin at 0
fn stream_start_secs(start_time: i64, time_base: f64) -> f64 {
    if start_time == ffmpeg::ffi::AV_NOPTS_VALUE || !time_base.is_finite() {
        0.0
    } else {
        start_time as f64 * time_base
    }
}

/// Copy an RGB24 frame into an image buffer, dropping row padding.
fn frame_to_rgb(frame: &ffmpeg::util::frame::video::Video) -> Result<RgbImage> {
    let width = frame.width();
    let height = frame.height();
    let stride = frame.stride(0);
    let row_bytes = width as usize * 3;
    let data = frame.data(0);

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let line = data
            .get(start..start + row_bytes)
            .context("Frame buffer is shorter than expected")?;
        pixels.extend_from_slice(line);
    }

    RgbImage::from_raw(width, height, pixels).context("Failed to create image buffer from frame")
}

/// Produces the screenshots a video is analyzed from.
///
/// An empty result means the video cannot be processed.
pub trait FrameSource: Send + Sync + 'static {
    fn extract_key_frames(&self, video: &Path) -> Vec<FrameAsset>;

    /// Delete the screenshots taken from one video
    fn cleanup_video(&self, video: &Path);

    /// Delete screenshots older than [`STALE_FRAME_AGE`]
    fn cleanup_stale(&self);
}

/// Temp directory holding `<video-stem>_<path-hash>_frame_<n>.jpg` screenshots.
///
/// Shared by every video in a run. The hash of the absolute path keeps
/// videos with the same stem apart.
#[derive(Debug, Clone)]
pub struct ScreenshotStore {
    temp_dir: PathBuf,
}

impl ScreenshotStore {
    pub fn new<P: Into<PathBuf>>(temp_dir: P) -> Result<Self> {
        let temp_dir = temp_dir.into();
        std::fs::create_dir_all(&temp_dir)
            .with_context(|| format!("Failed to create temp directory {:?}", temp_dir))?;
        Ok(Self { temp_dir })
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn frame_path(&self, video: &Path, index: usize) -> PathBuf {
        self.temp_dir
            .join(format!("{}_frame_{}.jpg", frame_prefix(video), index + 1))
    }

    /// Write a screenshot and score it
    pub fn save(&self, video: &Path, index: usize, frame: &RgbImage) -> Result<FrameAsset> {
        let path = self.frame_path(video, index);
        save_frame(frame, &path).with_context(|| format!("Failed to save frame {}", index))?;

        let quality = quality_score(&path);
        debug!("Saved screenshot {:?} (quality {:.1})", path, quality);

        Ok(FrameAsset {
            video: video.to_path_buf(),
            index,
            path,
            quality,
        })
    }

    /// Remove every screenshot belonging to `video`. Returns how many were deleted.
    pub fn cleanup_video(&self, video: &Path) -> usize {
        let prefix = format!("{}_frame_", frame_prefix(video));
        self.remove_matching(|name, _| name.starts_with(&prefix))
    }

    /// Remove screenshots whose modification time is older than `max_age`.
    pub fn cleanup_older_than(&self, max_age: Duration) -> usize {
        let now = SystemTime::now();
        self.remove_matching(|_, modified| {
            modified
                .and_then(|m| now.duration_since(m).ok())
                .is_some_and(|age| age > max_age)
        })
    }

    fn remove_matching<F>(&self, matches: F) -> usize
    where
        F: Fn(&str, Option<SystemTime>) -> bool,
    {
        let entries = match std::fs::read_dir(&self.temp_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to list temp directory {:?}: {}", self.temp_dir, e);
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.to_lowercase().ends_with(".jpg") {
                continue;
            }

            let modified = entry.metadata().and_then(|m| m.modified()).ok();
            if !matches(&name, modified) {
                continue;
            }

            match std::fs::remove_file(entry.path()) {
                Ok(()) => {
                    debug!("Removed temp file {:?}", entry.path());
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove temp file {:?}: {}", entry.path(), e),
            }
        }

        removed
    }
}

/// `<stem>_<first 8 hex digits of sha256(absolute path)>`
fn frame_prefix(video: &Path) -> String {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());

    let absolute = std::path::absolute(video).unwrap_or_else(|_| video.to_path_buf());
    let digest = Sha256::digest(absolute.to_string_lossy().as_bytes());
    let short: String = digest.iter().take(4).map(|b| format!("{:02x}", b)).collect();

    format!("{}_{}", stem, short)
}

/// FFmpeg-backed [`FrameSource`]
#[derive(Debug, Clone)]
pub struct FfmpegFrameExtractor {
    store: ScreenshotStore,
    screenshot_count: usize,
}

impl FfmpegFrameExtractor {
    pub fn new<P: Into<PathBuf>>(temp_dir: P, screenshot_count: usize) -> Result<Self> {
        init_ffmpeg()?;
        Ok(Self {
            store: ScreenshotStore::new(temp_dir)?,
            screenshot_count,
        })
    }

    pub fn store(&self) -> &ScreenshotStore {
        &self.store
    }

    /// Extract key frames, keep only the best scoring one and delete the rest.
    pub fn extract_best_frame(&self, video: &Path) -> Option<FrameAsset> {
        let frames = self.extract_key_frames(video);
        let best = select_best_frame(&frames)?.clone();

        for frame in frames.iter().filter(|f| f.path != best.path) {
            if let Err(e) = std::fs::remove_file(&frame.path) {
                warn!("Failed to remove temp file {:?}: {}", frame.path, e);
            }
        }

        info!(
            "Best frame for {:?}: {:?} (quality {:.1})",
            video, best.path, best.quality
        );
        Some(best)
    }
}

/// Highest quality frame; the earliest one wins ties
pub fn select_best_frame(frames: &[FrameAsset]) -> Option<&FrameAsset> {
    frames.iter().fold(None, |best: Option<&FrameAsset>, frame| match best {
        Some(b) if b.quality >= frame.quality => Some(b),
        _ => Some(frame),
    })
}

impl FrameSource for FfmpegFrameExtractor {
    fn extract_key_frames(&self, video: &Path) -> Vec<FrameAsset> {
        let handle = VideoHandle::new(video);
        let info = match handle.info() {
            Ok(info) => info,
            Err(e) => {
                error!("Failed to read video info for {:?}: {:#}", video, e);
                return Vec::new();
            }
        };

        let offsets = sampler::plan(info.duration, self.screenshot_count);
        if offsets.is_empty() {
            error!(
                "No screenshot positions for {:?} (duration {:.2}s)",
                video, info.duration
            );
            return Vec::new();
        }

        debug!(
            "Extracting {} frames from {:?}, duration: {:.2}s",
            offsets.len(),
            video,
            info.duration
        );

        let mut frames = Vec::with_capacity(offsets.len());
        for (index, offset) in offsets.iter().enumerate() {
            let Some(frame) = extract_frame(handle.path(), *offset) else {
                warn!("Skipping frame {} of {:?} @ {:.2}s", index + 1, video, offset);
                continue;
            };

            let frame = resize_to_fit(frame, MAX_FRAME_WIDTH, MAX_FRAME_HEIGHT);
            match self.store.save(video, index, &frame) {
                Ok(asset) => frames.push(asset),
                Err(e) => warn!("Failed to save screenshot {} of {:?}: {:#}", index + 1, video, e),
            }
        }

        info!(
            "Extracted {} screenshots from {:?}",
            frames.len(),
            video.file_name().unwrap_or_default()
        );
        frames
    }

    fn cleanup_video(&self, video: &Path) {
        self.store.cleanup_video(video);
    }

    fn cleanup_stale(&self) {
        let removed = self.store.cleanup_older_than(STALE_FRAME_AGE);
        if removed > 0 {
            info!("Removed {} stale screenshots", removed);
        }
    }
}
