use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use replay_bus::{
    EncoderMode, RecorderConfig,
    engine::{ReplayOutputSettings, VideoSource},
    ffmpeg::Canvas,
    health,
    recorder::{self, DEFAULT_AUDIO_BITRATE, DEFAULT_QUALITY},
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "config/settings.json";

/// Persisted application settings. Every field is optional on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub output_path: PathBuf,
    pub buffer_seconds: u32,
    pub max_size_mb: u32,
    pub video: VideoSettings,
    pub audio: AudioSettings,
    /// Zero disables the health monitor.
    pub health_interval_secs: u64,
    pub api: ApiSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub encoder: EncoderMode,
    pub quality: i32,
    pub source: VideoSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub bitrate: u32,
    pub system_audio_enabled: bool,
    pub microphone_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub listen: SocketAddr,
}

impl Default for AppSettings {
    fn default() -> Self {
        let replay = ReplayOutputSettings::default();
        Self {
            output_path: replay.directory,
            buffer_seconds: replay.max_time_sec,
            max_size_mb: replay.max_size_mb,
            video: VideoSettings::default(),
            audio: AudioSettings::default(),
            health_interval_secs: health::DEFAULT_INTERVAL.as_secs(),
            api: ApiSettings::default(),
        }
    }
}

impl Default for VideoSettings {
    fn default() -> Self {
        let canvas = Canvas::default();
        Self {
            width: canvas.width,
            height: canvas.height,
            fps: canvas.fps,
            encoder: EncoderMode::Auto,
            quality: DEFAULT_QUALITY,
            source: VideoSource::default(),
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            bitrate: DEFAULT_AUDIO_BITRATE,
            system_audio_enabled: true,
            microphone_enabled: false,
        }
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

impl AppSettings {
    /// Reads the settings file. A missing file yields the defaults, which are
    /// written back so the user has something to edit.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            log::warn!("config file {} not found, using defaults", path.display());
            let settings = Self::default();
            if let Err(e) = settings.save(path) {
                log::warn!("failed to write default config: {:#}", e);
            }
            return Ok(settings);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        log::info!(
            "config loaded from {}: output={}, buffer={}s, video={}x{}@{} ({:?}, quality {})",
            path.display(),
            settings.output_path.display(),
            settings.buffer_seconds,
            settings.video.width,
            settings.video.height,
            settings.video.fps,
            settings.video.encoder,
            settings.video.quality,
        );
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
        log::info!("config saved to {}", path.display());
        Ok(())
    }

    pub fn canvas(&self) -> Canvas {
        Canvas {
            width: self.video.width,
            height: self.video.height,
            fps: self.video.fps,
        }
    }

    pub fn recorder_config(&self) -> RecorderConfig {
        RecorderConfig {
            mode: self.video.encoder,
            quality: self.video.quality,
            audio_bitrate: self.audio.bitrate,
            system_audio: self.audio.system_audio_enabled,
            microphone: self.audio.microphone_enabled,
            replay: ReplayOutputSettings {
                directory: self.output_path.clone(),
                max_time_sec: self.buffer_seconds,
                max_size_mb: self.max_size_mb,
                ..Default::default()
            },
            source: self.video.source.clone(),
            health_interval: Duration::from_secs(self.health_interval_secs),
            save_drain_timeout: recorder::DEFAULT_SAVE_DRAIN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_writes_defaults() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config").join("settings.json");

        let settings = AppSettings::load(&path)?;
        assert_eq!(settings, AppSettings::default());
        assert!(path.is_file());

        let reloaded = AppSettings::load(&path)?;
        assert_eq!(reloaded, settings);
        Ok(())
    }

    #[test]
    fn test_partial_file_fills_defaults() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{
                "output_path": "/tmp/clips",
                "buffer_seconds": 30,
                "video": { "encoder": "x264", "quality": 35 },
                "audio": { "microphone_enabled": true }
            }"#,
        )?;

        let settings = AppSettings::load(&path)?;
        assert_eq!(settings.output_path, PathBuf::from("/tmp/clips"));
        assert_eq!(settings.video.encoder, EncoderMode::SoftwareOnly);
        assert_eq!(settings.video.fps, 60);
        assert_eq!(settings.audio.bitrate, 160);
        assert!(settings.audio.system_audio_enabled);

        let config = settings.recorder_config();
        assert_eq!(config.replay.max_time_sec, 30);
        assert_eq!(config.replay.extension, "mp4");
        assert_eq!(config.quality, 35);
        assert!(config.microphone);
        assert_eq!(config.health_interval, Duration::from_secs(30));
        Ok(())
    }

    #[test]
    fn test_invalid_file_is_an_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json")?;
        assert!(AppSettings::load(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_canvas_from_video_settings() {
        let mut settings = AppSettings::default();
        settings.video.width = 1280;
        settings.video.height = 720;
        settings.video.fps = 30;
        assert_eq!(
            settings.canvas(),
            Canvas {
                width: 1280,
                height: 720,
                fps: 30
            }
        );
    }
}
