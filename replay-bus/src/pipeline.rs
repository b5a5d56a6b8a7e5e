//! Replay output lifecycle.
//!
//! `Uninitialized -> Initialized -> Active`, `Active -> Initialized` on stop
//! or when the engine stops the output on its own, anything to
//! `Uninitialized` on shutdown. Starting walks the encoder fallback chain
//! until the engine accepts one.

use std::{path::PathBuf, sync::Arc, time::Duration};

use serde::Serialize;
use tokio::sync::watch;

use crate::{
    engine::{EncoderId, MediaEngine, OutputId, ReplayOutputSettings, SignalSender, VideoSource},
    enrich::AudioTracks,
    error::{Error, Result},
    health::HealthMonitor,
    save::SaveTarget,
    selector::{AudioTrack, BackendCategory, EncoderHandle, EncoderSelector},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    #[default]
    Uninitialized,
    Initialized,
    Active,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PipelineStatus {
    pub state: PipelineState,
    pub encoder: Option<String>,
    pub category: Option<BackendCategory>,
    pub encoder_index: Option<usize>,
    #[serde(skip)]
    pub encoder_id: Option<EncoderId>,
    pub audio_tracks: Vec<usize>,
    pub output_directory: PathBuf,
    pub last_error: Option<String>,
}

pub struct PipelineOutput {
    engine: Arc<dyn MediaEngine>,
    selector: EncoderSelector,
    settings: ReplayOutputSettings,
    source: VideoSource,
    signals: SignalSender,
    health_interval: Duration,

    state: PipelineState,
    video: Option<EncoderHandle>,
    audio: Vec<AudioTrack>,
    output: Option<OutputId>,
    health: Option<HealthMonitor>,
    last_error: Option<String>,
    status_tx: watch::Sender<PipelineStatus>,
}

impl PipelineOutput {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        selector: EncoderSelector,
        settings: ReplayOutputSettings,
        source: VideoSource,
        signals: SignalSender,
        health_interval: Duration,
    ) -> Self {
        let (status_tx, _) = watch::channel(PipelineStatus {
            output_directory: settings.directory.clone(),
            ..Default::default()
        });
        Self {
            engine,
            selector,
            settings,
            source,
            signals,
            health_interval,
            state: PipelineState::Uninitialized,
            video: None,
            audio: Vec::new(),
            output: None,
            health: None,
            last_error: None,
            status_tx,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn selector_mut(&mut self) -> &mut EncoderSelector {
        &mut self.selector
    }

    pub fn settings(&self) -> &ReplayOutputSettings {
        &self.settings
    }

    pub fn set_video_encoder(&mut self, handle: EncoderHandle) -> Result<()> {
        self.expect_state(PipelineState::Uninitialized)?;
        log::info!("video encoder set to {}", handle.display_name());
        self.video = Some(handle);
        self.publish();
        Ok(())
    }

    pub fn add_audio_track(&mut self, track: AudioTrack) -> Result<()> {
        self.expect_state(PipelineState::Uninitialized)?;
        self.audio.retain(|t| t.track() != track.track());
        self.audio.push(track);
        self.audio.sort_by_key(|t| t.track());
        self.publish();
        Ok(())
    }

    pub fn initialize(&mut self) -> Result<()> {
        if self.state != PipelineState::Uninitialized {
            log::warn!("replay buffer already initialized");
            return Ok(());
        }
        let video = self.video.as_ref().ok_or(Error::NoEncoder)?.id();

        let output = self
            .engine
            .create_replay_output(&self.settings, self.signals.clone())
            .map_err(|e| Error::Creation {
                what: "replay output".to_string(),
                detail: format!("{:#}", e),
            })?;
        self.engine.set_video_encoder(output, video);
        self.engine.set_video_source(output, &self.source);
        for track in &self.audio {
            self.engine.set_audio_encoder(output, track.id(), track.track());
        }

        log::info!(
            "replay buffer initialized: {}s, {} MB max, saving to {}",
            self.settings.max_time_sec,
            self.settings.max_size_mb,
            self.settings.directory.display()
        );
        self.output = Some(output);
        self.state = PipelineState::Initialized;
        self.publish();
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        match self.state {
            PipelineState::Active => {
                log::warn!("replay buffer already active");
                return Ok(());
            }
            PipelineState::Uninitialized => {
                return Err(Error::InvalidState {
                    actual: self.state,
                    expected: PipelineState::Initialized,
                });
            }
            PipelineState::Initialized => {}
        }
        let output = self.output.ok_or_else(|| Error::Output("no replay output".to_string()))?;

        if let Err(e) = std::fs::create_dir_all(&self.settings.directory) {
            log::warn!(
                "failed to create output directory {}: {}",
                self.settings.directory.display(),
                e
            );
        }

        let result = self.start_with_fallback(output);
        match &result {
            Ok(()) => {
                self.state = PipelineState::Active;
                self.last_error = None;
                self.publish();
                self.health = HealthMonitor::spawn(
                    Arc::clone(&self.engine),
                    self.status_tx.subscribe(),
                    self.health_interval,
                );
                log::info!(
                    "replay buffer started with {}",
                    self.video.as_ref().map_or("?", |v| v.display_name())
                );
            }
            Err(e) => {
                log::error!("{}", e);
                self.publish();
            }
        }
        result
    }

    fn start_with_fallback(&mut self, output: OutputId) -> Result<()> {
        if self.try_start(output) {
            return Ok(());
        }

        while let Some(next) = self
            .video
            .as_ref()
            .filter(|v| v.category() == BackendCategory::Hardware)
            .and_then(|v| self.selector.try_next(v.index()))
        {
            log::info!("retrying replay buffer start with {}", next.display_name());
            self.rebind(output, next);
            if self.try_start(output) {
                return Ok(());
            }
        }

        let current = self.video.as_ref().ok_or(Error::NoEncoder)?;
        match self.selector.switch_to_software(current) {
            Ok(Some(software)) => {
                log::info!("retrying replay buffer start with {}", software.display_name());
                self.rebind(output, software);
                if self.try_start(output) {
                    return Ok(());
                }
            }
            Ok(None) => {}
            Err(e) => log::error!("{}", e),
        }

        let encoder = self.video.as_ref().map_or("?", |v| v.display_name());
        let reason = match &self.last_error {
            Some(detail) => format!("{} could not be started: {}", encoder, detail),
            None => format!("{} could not be started", encoder),
        };
        Err(Error::Start { reason })
    }

    fn try_start(&mut self, output: OutputId) -> bool {
        if self.engine.start_output(output) {
            return true;
        }
        self.last_error = self.engine.last_error(output);
        log::warn!(
            "replay buffer failed to start with {}: {}",
            self.video.as_ref().map_or("?", |v| v.display_name()),
            self.last_error.as_deref().unwrap_or("no error reported")
        );
        false
    }

    // Bind before dropping the old handle so the output never points at a
    // released encoder.
    fn rebind(&mut self, output: OutputId, handle: EncoderHandle) {
        self.engine.set_video_encoder(output, handle.id());
        self.video = Some(handle);
        self.publish();
    }

    pub fn stop(&mut self) {
        if self.state != PipelineState::Active {
            return;
        }
        self.stop_health();
        if let Some(output) = self.output {
            self.engine.stop_output(output);
        }
        self.state = PipelineState::Initialized;
        self.publish();
        log::info!("replay buffer stopped");
    }

    /// The engine stopped the output without being asked to.
    pub fn on_engine_stopped(&mut self) {
        if self.state != PipelineState::Active {
            return;
        }
        self.stop_health();
        self.last_error = self.output.and_then(|o| self.engine.last_error(o));
        // The engine may still hold the dead capture; a later start must
        // build a fresh one.
        if let Some(output) = self.output {
            self.engine.stop_output(output);
        }
        self.state = PipelineState::Initialized;
        self.publish();
        log::warn!(
            "replay buffer stopped by the engine: {}",
            self.last_error.as_deref().unwrap_or("no error reported")
        );
    }

    /// Stops and releases everything. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        self.stop();
        self.stop_health();
        if let Some(output) = self.output.take() {
            self.engine.release_output(output);
        }
        self.audio.clear();
        self.video = None;
        if self.state != PipelineState::Uninitialized {
            log::info!("replay buffer shut down");
        }
        self.state = PipelineState::Uninitialized;
        self.publish();
    }

    fn stop_health(&mut self) {
        if let Some(mut health) = self.health.take() {
            health.join();
        }
    }

    /// The output a save may target, only while active.
    pub fn active_output(&self) -> Option<OutputId> {
        self.output.filter(|_| self.state == PipelineState::Active)
    }

    pub fn audio_tracks(&self) -> AudioTracks {
        AudioTracks {
            track1: self.audio.iter().any(|t| t.track() == 0),
            track2: self.audio.iter().any(|t| t.track() == 1),
        }
    }

    pub fn save_target(&self) -> SaveTarget {
        SaveTarget {
            output: self.output,
            active: self.state == PipelineState::Active,
            audio: self.audio_tracks(),
        }
    }

    pub fn status(&self) -> PipelineStatus {
        let video = self.video.as_ref();
        PipelineStatus {
            state: self.state,
            encoder: video.map(|v| v.display_name().to_string()),
            category: video.map(|v| v.category()),
            encoder_index: video.map(|v| v.index()),
            encoder_id: video.map(|v| v.id()),
            audio_tracks: self.audio.iter().map(|t| t.track()).collect(),
            output_directory: self.settings.directory.clone(),
            last_error: self.last_error.clone(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineStatus> {
        self.status_tx.subscribe()
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status());
    }

    fn expect_state(&self, expected: PipelineState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState {
                actual: self.state,
                expected,
            })
        }
    }
}

impl Drop for PipelineOutput {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
