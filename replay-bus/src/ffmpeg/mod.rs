//! Production [`MediaEngine`] built on FFmpeg.
//!
//! Each started replay output owns a capture thread that reads the
//! configured device, scales and encodes frames and keeps the encoded
//! packets in a [`ReplayRing`]. Saving snapshots the ring and muxes it to a
//! file on a worker thread.

mod decoder;
mod encoder;
mod hw;
mod input;
mod output;
mod packet;
pub mod ring;
mod scaler;

use std::{
    collections::{BTreeMap, HashMap},
    fs::OpenOptions,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
    time::Duration,
};

use ffmpeg_next::{Rescale, codec::Parameters};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use self::{
    decoder::Decoder,
    encoder::{VideoEncoder, options_from_settings},
    input::AvInput,
    output::{ClipSnapshot, write_clip},
    packet::RawPacket,
    ring::ReplayRing,
    scaler::Scaler,
};
use crate::engine::{
    EncoderId, EncoderSettings, EncoderStatus, MediaEngine, OutputId, OutputSignal,
    ReplayOutputSettings, SignalSender, VideoSource,
};

/// Registers FFmpeg formats and capture devices. Call once at startup.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init()?;
    ffmpeg_next::device::register_all();
    Ok(())
}

/// Encoded video geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for Canvas {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 60,
        }
    }
}

enum EncoderKind {
    Video,
    Audio { mixer: usize },
}

struct EncoderSpec {
    codec: String,
    name: String,
    kind: EncoderKind,
    options: Vec<(String, String)>,
    active: Arc<AtomicBool>,
}

/// Packets plus the stream parameters needed to mux them.
struct ClipBuffer {
    ring: ReplayRing<RawPacket>,
    parameters: Parameters,
}

unsafe impl Send for ClipBuffer {}

struct Capture {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    buffer: Arc<Mutex<ClipBuffer>>,
}

impl Capture {
    /// False once the capture thread has exited on its own.
    fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("capture thread panicked");
            }
        }
    }
}

struct OutputState {
    settings: ReplayOutputSettings,
    signals: SignalSender,
    video: Option<EncoderId>,
    audio: BTreeMap<usize, EncoderId>,
    source: VideoSource,
    capture: Option<Capture>,
    saves: Vec<JoinHandle<()>>,
    last_error: Arc<Mutex<Option<String>>>,
}

#[derive(Default)]
struct EngineState {
    next_id: u64,
    encoders: HashMap<EncoderId, EncoderSpec>,
    outputs: HashMap<OutputId, OutputState>,
}

impl EngineState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

pub struct FfmpegEngine {
    canvas: Canvas,
    state: Mutex<EngineState>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl FfmpegEngine {
    pub fn new(canvas: Canvas) -> Self {
        Self {
            canvas,
            state: Mutex::new(EngineState::default()),
        }
    }

    pub fn canvas(&self) -> Canvas {
        self.canvas
    }

    fn open_capture(
        &self,
        source: &VideoSource,
        codec: &str,
        options: &[(String, String)],
    ) -> anyhow::Result<CaptureSession> {
        let input = AvInput::open(source, self.canvas.fps)?;
        let decoder = Decoder::new(input.video_stream())?;
        let encoder = VideoEncoder::open(codec, options, self.canvas)?;
        let scaler = Scaler::new(encoder.format(), self.canvas.width, self.canvas.height);
        Ok(CaptureSession {
            input,
            decoder,
            encoder,
            scaler,
            first_ts: None,
            next_pts: 0,
        })
    }
}

fn set_error(slot: &Mutex<Option<String>>, error: String) {
    *lock(slot) = Some(error);
}

impl MediaEngine for FfmpegEngine {
    fn create_video_encoder(
        &self,
        id: &str,
        name: &str,
        settings: &EncoderSettings,
    ) -> anyhow::Result<EncoderId> {
        let options = options_from_settings(settings);
        // Opening once proves the encoder and its device are usable here.
        let probe = VideoEncoder::open(id, &options, self.canvas)?;
        log::debug!("probed {} ({:?})", probe.codec(), probe.format());
        drop(probe);

        let mut state = lock(&self.state);
        let encoder = EncoderId(state.next_id());
        state.encoders.insert(
            encoder,
            EncoderSpec {
                codec: id.to_string(),
                name: name.to_string(),
                kind: EncoderKind::Video,
                options,
                active: Arc::new(AtomicBool::new(false)),
            },
        );
        Ok(encoder)
    }

    fn create_audio_encoder(
        &self,
        id: &str,
        name: &str,
        settings: &EncoderSettings,
        mixer: usize,
    ) -> anyhow::Result<EncoderId> {
        if ffmpeg_next::encoder::find_by_name(id).is_none() {
            anyhow::bail!("codec not found: {}", id);
        }
        let mut state = lock(&self.state);
        let encoder = EncoderId(state.next_id());
        state.encoders.insert(
            encoder,
            EncoderSpec {
                codec: id.to_string(),
                name: name.to_string(),
                kind: EncoderKind::Audio { mixer },
                options: options_from_settings(settings),
                active: Arc::new(AtomicBool::new(false)),
            },
        );
        Ok(encoder)
    }

    fn release_encoder(&self, encoder: EncoderId) {
        if let Some(spec) = lock(&self.state).encoders.remove(&encoder) {
            log::debug!("released encoder {} ({})", spec.name, spec.codec);
        }
    }

    fn create_replay_output(
        &self,
        settings: &ReplayOutputSettings,
        signals: SignalSender,
    ) -> anyhow::Result<OutputId> {
        let mut state = lock(&self.state);
        let output = OutputId(state.next_id());
        state.outputs.insert(
            output,
            OutputState {
                settings: settings.clone(),
                signals,
                video: None,
                audio: BTreeMap::new(),
                source: VideoSource::default(),
                capture: None,
                saves: Vec::new(),
                last_error: Arc::new(Mutex::new(None)),
            },
        );
        Ok(output)
    }

    fn release_output(&self, output: OutputId) {
        let Some(removed) = lock(&self.state).outputs.remove(&output) else {
            return;
        };
        if let Some(capture) = removed.capture {
            capture.stop();
        }
        // Dispatched saves are never cut short.
        for save in removed.saves {
            if save.join().is_err() {
                log::error!("save thread panicked");
            }
        }
    }

    fn set_video_encoder(&self, output: OutputId, encoder: EncoderId) {
        if let Some(o) = lock(&self.state).outputs.get_mut(&output) {
            o.video = Some(encoder);
        }
    }

    fn set_audio_encoder(&self, output: OutputId, encoder: EncoderId, track: usize) {
        if let Some(o) = lock(&self.state).outputs.get_mut(&output) {
            o.audio.insert(track, encoder);
        }
    }

    fn set_video_source(&self, output: OutputId, source: &VideoSource) {
        if let Some(o) = lock(&self.state).outputs.get_mut(&output) {
            o.source = source.clone();
        }
    }

    fn start_output(&self, output: OutputId) -> bool {
        let (source, codec, options, active, settings, signals, last_error) = {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            let Some(o) = state.outputs.get_mut(&output) else {
                return false;
            };
            if o.capture.as_ref().is_some_and(Capture::is_running) {
                return true;
            }
            if let Some(stale) = o.capture.take() {
                log::info!("discarding finished capture before restart");
                stale.stop();
            }
            let Some(spec) = o.video.and_then(|id| state.encoders.get(&id)) else {
                set_error(&o.last_error, "no video encoder bound".to_string());
                return false;
            };
            for (track, id) in &o.audio {
                if let Some(EncoderSpec {
                    kind: EncoderKind::Audio { mixer },
                    codec,
                    ..
                }) = state.encoders.get(id)
                {
                    log::warn!(
                        "audio track {} ({} on mixer {}) bound but not captured by this engine",
                        track + 1,
                        codec,
                        mixer
                    );
                }
            }
            (
                o.source.clone(),
                spec.codec.clone(),
                spec.options.clone(),
                Arc::clone(&spec.active),
                o.settings.clone(),
                o.signals.clone(),
                Arc::clone(&o.last_error),
            )
        };

        let session = match self.open_capture(&source, &codec, &options) {
            Ok(session) => session,
            Err(e) => {
                log::warn!("failed to start capture with {}: {:#}", codec, e);
                set_error(&last_error, format!("{:#}", e));
                return false;
            }
        };

        let max_bytes = settings.max_size_mb as usize * 1024 * 1024;
        let buffer = Arc::new(Mutex::new(ClipBuffer {
            ring: ReplayRing::new(Duration::from_secs(settings.max_time_sec.into()), max_bytes),
            parameters: session.encoder.parameters(),
        }));
        let cancel = CancellationToken::new();

        active.store(true, Ordering::SeqCst);
        let worker = CaptureWorker {
            cancel: cancel.clone(),
            buffer: Arc::clone(&buffer),
            signals,
            last_error: Arc::clone(&last_error),
            active: Arc::clone(&active),
        };
        let handle = std::thread::Builder::new()
            .name(format!("capture-{}", output.0))
            .spawn(move || worker.run(session));
        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                active.store(false, Ordering::SeqCst);
                set_error(&last_error, format!("failed to spawn capture thread: {}", e));
                return false;
            }
        };

        let capture = Capture {
            cancel,
            handle: Some(handle),
            buffer,
        };
        let mut state = lock(&self.state);
        if let Some(o) = state.outputs.get_mut(&output) {
            *lock(&o.last_error) = None;
            o.capture = Some(capture);
            log::info!("capture started with {}", codec);
            return true;
        }
        // Released while the device was opening.
        drop(state);
        capture.stop();
        false
    }

    fn stop_output(&self, output: OutputId) {
        let capture = lock(&self.state)
            .outputs
            .get_mut(&output)
            .and_then(|o| o.capture.take());
        if let Some(capture) = capture {
            capture.stop();
            log::info!("capture stopped");
        }
    }

    fn save_replay(&self, output: OutputId) -> bool {
        let (buffer, directory, extension, signals) = {
            let state = lock(&self.state);
            let Some(o) = state.outputs.get(&output) else {
                return false;
            };
            let Some(capture) = o.capture.as_ref().filter(|c| c.is_running()) else {
                return false;
            };
            (
                Arc::clone(&capture.buffer),
                o.settings.directory.clone(),
                o.settings.extension.clone(),
                o.signals.clone(),
            )
        };

        let snapshot = {
            let buffer = lock(&buffer);
            ClipSnapshot {
                parameters: buffer.parameters.clone(),
                packets: buffer.ring.snapshot(),
            }
        };
        let path = match reserve_clip_path(&directory, &extension) {
            Ok(path) => path,
            Err(e) => {
                log::error!("no clip file available in {}: {}", directory.display(), e);
                return false;
            }
        };

        let target = path.clone();
        let spawned = std::thread::Builder::new()
            .name("replay-save".to_string())
            .spawn(move || {
                let saved = match write_clip(&target, snapshot) {
                    Ok(()) => Some(target),
                    Err(e) => {
                        log::error!("failed to write {}: {:#}", target.display(), e);
                        remove_partial(&target);
                        None
                    }
                };
                if signals.send(OutputSignal::Saved { path: saved }).is_err() {
                    log::warn!("save finished after the output was released");
                }
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("failed to spawn save thread: {}", e);
                remove_partial(&path);
                return false;
            }
        };

        let orphan = match lock(&self.state).outputs.get_mut(&output) {
            Some(o) => {
                o.saves.retain(|save| !save.is_finished());
                o.saves.push(handle);
                None
            }
            None => Some(handle),
        };
        // Released while dispatching.
        if let Some(handle) = orphan {
            if handle.join().is_err() {
                log::error!("save thread panicked");
            }
        }
        true
    }

    fn last_error(&self, output: OutputId) -> Option<String> {
        let state = lock(&self.state);
        let o = state.outputs.get(&output)?;
        lock(&o.last_error).clone()
    }

    fn encoder_status(&self, encoder: EncoderId) -> Option<EncoderStatus> {
        lock(&self.state)
            .encoders
            .get(&encoder)
            .map(|spec| EncoderStatus {
                id: spec.codec.clone(),
                active: spec.active.load(Ordering::SeqCst),
            })
    }
}

/// `YYYY-MM-DD_HH-MM-SS.<ext>` in local time.
pub fn clip_file_name(extension: &str) -> PathBuf {
    numbered_clip_name(&clip_stamp(), extension, 0)
}

fn clip_stamp() -> String {
    chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string()
}

fn numbered_clip_name(stamp: &str, extension: &str, n: u32) -> PathBuf {
    let extension = extension.trim_start_matches('.');
    match n {
        0 => PathBuf::from(format!("{}.{}", stamp, extension)),
        n => PathBuf::from(format!("{}_{}.{}", stamp, n, extension)),
    }
}

const MAX_NAME_ATTEMPTS: u32 = 100;

/// Creates an empty file under a clip name nobody holds yet. Saves within
/// the same second get `_1`, `_2`... suffixes instead of truncating an
/// earlier clip.
pub fn reserve_clip_path(directory: &Path, extension: &str) -> std::io::Result<PathBuf> {
    let stamp = clip_stamp();
    for n in 0..MAX_NAME_ATTEMPTS {
        let path = directory.join(numbered_clip_name(&stamp, extension, n));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => return Ok(path),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("every clip name for {} is taken", stamp),
    ))
}

fn remove_partial(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("failed to remove partial clip {}: {}", path.display(), e);
        }
    }
}

struct CaptureSession {
    input: AvInput,
    decoder: Decoder,
    encoder: VideoEncoder,
    scaler: Scaler,
    first_ts: Option<i64>,
    next_pts: i64,
}

impl CaptureSession {
    /// Reads one packet and pushes whatever it encodes into `buffer`.
    fn step(&mut self, buffer: &Mutex<ClipBuffer>) -> anyhow::Result<()> {
        let Some(packet) = self.input.read_packet()? else {
            std::thread::sleep(Duration::from_millis(1));
            return Ok(());
        };
        self.decoder.send_packet(&packet)?;

        let in_time_base = self.input.video_stream().time_base;
        while let Some(frame) = self.decoder.receive_frame()? {
            let mut scaled = self.scaler.run(&frame)?;

            let pts = match frame.timestamp() {
                Some(ts) => {
                    let first = *self.first_ts.get_or_insert(ts);
                    (ts - first).rescale(in_time_base, self.encoder.time_base())
                }
                None => self.next_pts,
            };
            // Duplicate timestamps would be rejected by the encoder.
            let pts = pts.max(self.next_pts);
            self.next_pts = pts + 1;
            scaled.set_pts(Some(pts));

            let packets = self.encoder.encode(&scaled)?;
            if !packets.is_empty() {
                let mut buffer = lock(buffer);
                for packet in packets {
                    buffer.ring.push(packet);
                }
            }
        }
        Ok(())
    }
}

struct CaptureWorker {
    cancel: CancellationToken,
    buffer: Arc<Mutex<ClipBuffer>>,
    signals: SignalSender,
    last_error: Arc<Mutex<Option<String>>>,
    active: Arc<AtomicBool>,
}

impl CaptureWorker {
    fn run(self, mut session: CaptureSession) {
        while !self.cancel.is_cancelled() {
            if let Err(e) = session.step(&self.buffer) {
                log::error!("capture with {} failed: {:#}", session.encoder.codec(), e);
                set_error(&self.last_error, format!("{:#}", e));
                self.active.store(false, Ordering::SeqCst);
                lock(&self.buffer).ring.clear();
                if self.signals.send(OutputSignal::Stopped).is_err() {
                    log::warn!("capture failed after the output was released");
                }
                return;
            }
        }
        self.active.store(false, Ordering::SeqCst);
        lock(&self.buffer).ring.clear();
        log::debug!("capture thread exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::save::clip_name_pattern;

    #[test]
    fn test_clip_file_name_matches_recovery_pattern() -> anyhow::Result<()> {
        let name = clip_file_name(".mp4");
        let pattern = clip_name_pattern("mp4")?;
        assert!(pattern.is_match(name.to_str().unwrap()));
        Ok(())
    }

    #[test]
    fn test_reserved_clip_paths_never_collide() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let pattern = clip_name_pattern("mp4")?;

        let paths: Vec<PathBuf> = (0..3)
            .map(|_| reserve_clip_path(dir.path(), "mp4"))
            .collect::<std::io::Result<_>>()?;

        for (i, path) in paths.iter().enumerate() {
            assert!(path.is_file());
            assert!(paths[i + 1..].iter().all(|other| other != path));
            let name = path.file_name().and_then(|n| n.to_str()).unwrap();
            assert!(pattern.is_match(name), "{}", name);
        }
        Ok(())
    }

    #[test]
    fn test_reserve_skips_existing_clip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let first = reserve_clip_path(dir.path(), ".mp4")?;
        std::fs::write(&first, b"finished clip")?;

        let second = reserve_clip_path(dir.path(), ".mp4")?;
        assert_ne!(first, second);
        assert_eq!(std::fs::read(&first)?, b"finished clip");
        Ok(())
    }

    #[test]
    fn test_remove_partial_clip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = reserve_clip_path(dir.path(), "mp4")?;
        remove_partial(&path);
        assert!(!path.exists());
        remove_partial(&path);
        Ok(())
    }

    #[test]
    fn test_unknown_encoder_and_output_are_rejected() {
        let engine = FfmpegEngine::new(Canvas::default());
        assert!(
            engine
                .create_audio_encoder("no-such-codec", "a", &EncoderSettings::new(), 0)
                .is_err()
        );
        assert!(!engine.start_output(OutputId(42)));
        assert!(!engine.save_replay(OutputId(42)));
        assert!(engine.last_error(OutputId(42)).is_none());
    }

    #[test]
    fn test_start_without_video_encoder_sets_error() -> anyhow::Result<()> {
        let engine = FfmpegEngine::new(Canvas::default());
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let output = engine.create_replay_output(&ReplayOutputSettings::default(), tx)?;

        assert!(!engine.start_output(output));
        assert_eq!(
            engine.last_error(output).as_deref(),
            Some("no video encoder bound")
        );
        assert!(!engine.save_replay(output));
        engine.release_output(output);
        Ok(())
    }
}
