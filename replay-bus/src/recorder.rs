//! Application root of the orchestrator. Owns the pipeline and the save
//! coordinator and pumps engine signals into them.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    engine::{MediaEngine, OutputSignal, ReplayOutputSettings, SignalReceiver, VideoSource},
    enrich::Enricher,
    error::{Error, Result, SaveRejected},
    health,
    pipeline::{PipelineOutput, PipelineState, PipelineStatus},
    save::{GameIdentifier, SaveCoordinator, SaveSink},
    selector::{EncoderMode, EncoderSelector},
};

pub const DEFAULT_QUALITY: i32 = 20;
pub const DEFAULT_AUDIO_BITRATE: u32 = 160;
/// How long shutdown waits for a dispatched save to report back.
pub const DEFAULT_SAVE_DRAIN: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub mode: EncoderMode,
    pub quality: i32,
    pub audio_bitrate: u32,
    pub system_audio: bool,
    pub microphone: bool,
    pub replay: ReplayOutputSettings,
    pub source: VideoSource,
    pub health_interval: Duration,
    pub save_drain_timeout: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            mode: EncoderMode::default(),
            quality: DEFAULT_QUALITY,
            audio_bitrate: DEFAULT_AUDIO_BITRATE,
            system_audio: true,
            microphone: false,
            replay: ReplayOutputSettings::default(),
            source: VideoSource::default(),
            health_interval: health::DEFAULT_INTERVAL,
            save_drain_timeout: DEFAULT_SAVE_DRAIN,
        }
    }
}

type SharedPipeline = Arc<Mutex<PipelineOutput>>;

fn lock(pipeline: &SharedPipeline) -> MutexGuard<'_, PipelineOutput> {
    pipeline.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct Recorder {
    config: RecorderConfig,
    pipeline: SharedPipeline,
    saves: Arc<SaveCoordinator>,
    cancel: CancellationToken,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Recorder {
    /// Must be called from within a tokio runtime.
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        config: RecorderConfig,
        sink: Arc<dyn SaveSink>,
        identifier: Option<Arc<dyn GameIdentifier>>,
    ) -> Result<Self> {
        let (signals, signal_rx) = tokio::sync::mpsc::unbounded_channel();
        let saves = Arc::new(SaveCoordinator::new(
            Arc::clone(&engine),
            &config.replay,
            sink,
            identifier,
            Enricher::new(),
        )?);
        let pipeline = Arc::new(Mutex::new(PipelineOutput::new(
            Arc::clone(&engine),
            EncoderSelector::new(engine),
            config.replay.clone(),
            config.source.clone(),
            signals,
            config.health_interval,
        )));

        let cancel = CancellationToken::new();
        let pump = tokio::spawn(pump_signals(
            signal_rx,
            Arc::clone(&pipeline),
            Arc::clone(&saves),
            cancel.clone(),
        ));

        Ok(Self {
            config,
            pipeline,
            saves,
            cancel,
            pump: Mutex::new(Some(pump)),
        })
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Creates the encoders, initializes the replay output and starts it.
    pub fn open(&self) -> Result<()> {
        self.open_pipeline(&mut lock(&self.pipeline))
    }

    /// Starts the replay buffer, opening it first when that never succeeded.
    pub fn resume(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Output("recorder is shut down".to_string()));
        }
        let mut pipeline = lock(&self.pipeline);
        match pipeline.state() {
            PipelineState::Uninitialized => self.open_pipeline(&mut pipeline),
            _ => pipeline.start(),
        }
    }

    fn open_pipeline(&self, pipeline: &mut PipelineOutput) -> Result<()> {
        let video = pipeline
            .selector_mut()
            .create(self.config.mode, self.config.quality)?;
        pipeline.set_video_encoder(video)?;

        let tracks = [
            (0, self.config.system_audio, "desktop"),
            (1, self.config.microphone, "microphone"),
        ];
        for (track, enabled, label) in tracks {
            if !enabled {
                continue;
            }
            match pipeline
                .selector_mut()
                .create_audio(track, self.config.audio_bitrate)
            {
                Ok(audio) => pipeline.add_audio_track(audio)?,
                Err(e) => log::warn!("{} audio disabled: {}", label, e),
            }
        }

        pipeline.initialize()?;
        pipeline.start()
    }

    pub fn start(&self) -> Result<()> {
        lock(&self.pipeline).start()
    }

    pub fn stop(&self) {
        lock(&self.pipeline).stop();
    }

    /// Waits for a dispatched save to report, then stops the signal pump and
    /// releases every engine object.
    pub async fn shutdown(&self) {
        self.drain_pending_save().await;
        self.cancel.cancel();
        let pump = self.pump.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(pump) = pump {
            if let Err(e) = pump.await {
                log::error!("signal pump failed: {}", e);
            }
        }
        lock(&self.pipeline).shutdown();
    }

    async fn drain_pending_save(&self) {
        if !self.saves.is_pending() || self.cancel.is_cancelled() {
            return;
        }
        log::info!("waiting for the pending save before shutdown");
        let drained = tokio::time::timeout(self.config.save_drain_timeout, async {
            while self.saves.is_pending() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        if drained.is_err() {
            log::warn!(
                "pending save did not finish within {:?}, its outcome is lost",
                self.config.save_drain_timeout
            );
        }
    }

    pub fn save_clip(&self) -> std::result::Result<(), SaveRejected> {
        let pipeline = lock(&self.pipeline);
        self.saves.save_clip(pipeline.save_target())
    }

    pub fn set_context_label(&self, label: Option<String>) {
        self.saves.set_context_label(label);
    }

    pub fn context_label(&self) -> Option<String> {
        self.saves.context_label()
    }

    pub fn is_save_pending(&self) -> bool {
        self.saves.is_pending()
    }

    pub fn status(&self) -> PipelineStatus {
        lock(&self.pipeline).status()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineStatus> {
        lock(&self.pipeline).subscribe()
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn pump_signals(
    mut signals: SignalReceiver,
    pipeline: SharedPipeline,
    saves: Arc<SaveCoordinator>,
    cancel: CancellationToken,
) {
    loop {
        let signal = tokio::select! {
            _ = cancel.cancelled() => break,
            signal = signals.recv() => signal,
        };
        let result = match signal {
            Some(OutputSignal::Saved { path }) => {
                let saves = Arc::clone(&saves);
                tokio::task::spawn_blocking(move || saves.on_completion(path)).await
            }
            Some(OutputSignal::Stopped) => {
                let pipeline = Arc::clone(&pipeline);
                tokio::task::spawn_blocking(move || lock(&pipeline).on_engine_stopped()).await
            }
            None => break,
        };
        if let Err(e) = result {
            log::error!("engine signal handler failed: {}", e);
        }
    }
    log::debug!("signal pump stopped");
}

#[cfg(test)]
#[path = "recorder_test.rs"]
mod recorder_test;
