//! Narrow interface to the media engine that does the actual capture, encode
//! and mux work. The orchestrator only ever talks to the engine through
//! [`MediaEngine`], so a fake engine can stand in for tests.

use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};

/// Backend-specific encoder settings, keyed by option name.
pub type EncoderSettings = serde_json::Map<String, serde_json::Value>;

pub type SignalSender = tokio::sync::mpsc::UnboundedSender<OutputSignal>;
pub type SignalReceiver = tokio::sync::mpsc::UnboundedReceiver<OutputSignal>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EncoderId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(pub u64);

/// Signals raised by a replay output, possibly from engine-internal threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSignal {
    /// A save finished. Some engines report completion without a path.
    Saved { path: Option<PathBuf> },
    /// The output stopped on its own (device lost, encoder error...).
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayOutputSettings {
    pub directory: PathBuf,
    pub max_time_sec: u32,
    pub max_size_mb: u32,
    pub extension: String,
}

impl Default for ReplayOutputSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("clips"),
            max_time_sec: 120,
            max_size_mb: 4096,
            extension: "mp4".to_string(),
        }
    }
}

/// Where the video frames come from, e.g. `x11grab` + `:0.0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSource {
    pub format: String,
    pub url: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl Default for VideoSource {
    fn default() -> Self {
        #[cfg(target_os = "windows")]
        let (format, url) = ("gdigrab", "desktop");
        #[cfg(target_os = "macos")]
        let (format, url) = ("avfoundation", "1:none");
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        let (format, url) = ("x11grab", ":0.0");

        Self {
            format: format.to_string(),
            url: url.to_string(),
            options: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderStatus {
    pub id: String,
    pub active: bool,
}

pub trait MediaEngine: Send + Sync {
    fn create_video_encoder(
        &self,
        id: &str,
        name: &str,
        settings: &EncoderSettings,
    ) -> anyhow::Result<EncoderId>;

    fn create_audio_encoder(
        &self,
        id: &str,
        name: &str,
        settings: &EncoderSettings,
        mixer: usize,
    ) -> anyhow::Result<EncoderId>;

    fn release_encoder(&self, encoder: EncoderId);

    fn create_replay_output(
        &self,
        settings: &ReplayOutputSettings,
        signals: SignalSender,
    ) -> anyhow::Result<OutputId>;

    fn release_output(&self, output: OutputId);

    fn set_video_encoder(&self, output: OutputId, encoder: EncoderId);

    fn set_audio_encoder(&self, output: OutputId, encoder: EncoderId, track: usize);

    fn set_video_source(&self, output: OutputId, source: &VideoSource);

    fn start_output(&self, output: OutputId) -> bool;

    fn stop_output(&self, output: OutputId);

    /// Asks the output to flush its buffer to disk. Returns once the request
    /// is queued; completion arrives as [`OutputSignal::Saved`].
    fn save_replay(&self, output: OutputId) -> bool;

    fn last_error(&self, output: OutputId) -> Option<String>;

    fn encoder_status(&self, encoder: EncoderId) -> Option<EncoderStatus>;
}
