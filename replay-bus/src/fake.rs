//! In-memory [`MediaEngine`] used to drive the orchestrator in tests.
//!
//! Failures are scripted per encoder id: creation can be refused, and
//! starting an output can be refused while a given encoder is bound to it.
//! Saves never complete on their own, tests deliver completions with
//! [`FakeEngine::emit`].

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Mutex, MutexGuard},
};

use crate::engine::{
    EncoderId, EncoderSettings, EncoderStatus, MediaEngine, OutputId, OutputSignal,
    ReplayOutputSettings, SignalSender, VideoSource,
};

#[derive(Debug, Clone)]
pub struct FakeEncoder {
    pub id: String,
    pub name: String,
    pub settings: EncoderSettings,
    pub mixer: Option<usize>,
    pub active: bool,
}

#[derive(Debug)]
struct FakeOutput {
    settings: ReplayOutputSettings,
    signals: SignalSender,
    video: Option<EncoderId>,
    audio: BTreeMap<usize, EncoderId>,
    source: Option<VideoSource>,
    /// A capture is installed; only `stop_output` removes it.
    active: bool,
    /// The installed capture is still producing frames.
    capturing: bool,
    last_error: Option<String>,
}

#[derive(Default)]
struct FakeState {
    next_id: u64,
    fail_create: HashSet<String>,
    fail_start: HashSet<String>,
    refuse_save: bool,
    encoders: HashMap<EncoderId, FakeEncoder>,
    outputs: HashMap<OutputId, FakeOutput>,
    attempts: Vec<String>,
    start_attempts: Vec<String>,
    released: Vec<EncoderId>,
    released_outputs: Vec<OutputId>,
    save_requests: usize,
}

impl FakeState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<FakeState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Refuse to create encoders with this id.
    pub fn fail_create(&self, id: &str) {
        self.lock().fail_create.insert(id.to_string());
    }

    /// Refuse to start any output while an encoder with this id is bound.
    pub fn fail_start(&self, id: &str) {
        self.lock().fail_start.insert(id.to_string());
    }

    /// Forget every scripted creation and start failure.
    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.fail_create.clear();
        state.fail_start.clear();
    }

    pub fn refuse_save(&self, refuse: bool) {
        self.lock().refuse_save = refuse;
    }

    /// Every video encoder id passed to `create_video_encoder`, in order.
    pub fn attempts(&self) -> Vec<String> {
        self.lock().attempts.clone()
    }

    /// Bound video encoder id at each `start_output` call, in order.
    pub fn start_attempts(&self) -> Vec<String> {
        self.lock().start_attempts.clone()
    }

    pub fn released(&self) -> Vec<EncoderId> {
        self.lock().released.clone()
    }

    pub fn released_outputs(&self) -> Vec<OutputId> {
        self.lock().released_outputs.clone()
    }

    pub fn live_encoders(&self) -> Vec<String> {
        let state = self.lock();
        let mut ids: Vec<_> = state.encoders.values().map(|e| e.id.clone()).collect();
        ids.sort();
        ids
    }

    pub fn encoder(&self, id: EncoderId) -> Option<FakeEncoder> {
        self.lock().encoders.get(&id).cloned()
    }

    pub fn save_requests(&self) -> usize {
        self.lock().save_requests
    }

    pub fn outputs(&self) -> Vec<OutputId> {
        let mut outputs: Vec<_> = self.lock().outputs.keys().copied().collect();
        outputs.sort();
        outputs
    }

    pub fn output_settings(&self, output: OutputId) -> Option<ReplayOutputSettings> {
        self.lock().outputs.get(&output).map(|o| o.settings.clone())
    }

    pub fn is_output_active(&self, output: OutputId) -> bool {
        self.lock().outputs.get(&output).is_some_and(|o| o.active)
    }

    pub fn is_capturing(&self, output: OutputId) -> bool {
        self.lock().outputs.get(&output).is_some_and(|o| o.capturing)
    }

    /// Fail the running capture the way a lost device does: frames stop and
    /// `Stopped` is raised, but the capture stays installed until
    /// `stop_output`.
    pub fn crash(&self, output: OutputId, error: &str) -> bool {
        let mut state = self.lock();
        let Some(o) = state.outputs.get_mut(&output) else {
            return false;
        };
        o.capturing = false;
        o.last_error = Some(error.to_string());
        o.signals.send(OutputSignal::Stopped).is_ok()
    }

    pub fn bound_video(&self, output: OutputId) -> Option<String> {
        let state = self.lock();
        let encoder = state.outputs.get(&output)?.video?;
        state.encoders.get(&encoder).map(|e| e.id.clone())
    }

    pub fn bound_audio_tracks(&self, output: OutputId) -> Vec<usize> {
        self.lock()
            .outputs
            .get(&output)
            .map(|o| o.audio.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn bound_source(&self, output: OutputId) -> Option<VideoSource> {
        self.lock().outputs.get(&output)?.source.clone()
    }

    /// Deliver a signal as if the engine raised it from its own thread.
    pub fn emit(&self, output: OutputId, signal: OutputSignal) -> bool {
        let state = self.lock();
        match state.outputs.get(&output) {
            Some(o) => o.signals.send(signal).is_ok(),
            None => false,
        }
    }
}

impl MediaEngine for FakeEngine {
    fn create_video_encoder(
        &self,
        id: &str,
        name: &str,
        settings: &EncoderSettings,
    ) -> anyhow::Result<EncoderId> {
        let mut state = self.lock();
        state.attempts.push(id.to_string());
        if state.fail_create.contains(id) {
            anyhow::bail!("encoder {} not available", id);
        }
        let encoder = EncoderId(state.next_id());
        state.encoders.insert(
            encoder,
            FakeEncoder {
                id: id.to_string(),
                name: name.to_string(),
                settings: settings.clone(),
                mixer: None,
                active: false,
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
        let mut state = self.lock();
        if state.fail_create.contains(id) {
            anyhow::bail!("encoder {} not available", id);
        }
        let encoder = EncoderId(state.next_id());
        state.encoders.insert(
            encoder,
            FakeEncoder {
                id: id.to_string(),
                name: name.to_string(),
                settings: settings.clone(),
                mixer: Some(mixer),
                active: false,
            },
        );
        Ok(encoder)
    }

    fn release_encoder(&self, encoder: EncoderId) {
        let mut state = self.lock();
        if state.encoders.remove(&encoder).is_some() {
            state.released.push(encoder);
        }
    }

    fn create_replay_output(
        &self,
        settings: &ReplayOutputSettings,
        signals: SignalSender,
    ) -> anyhow::Result<OutputId> {
        let mut state = self.lock();
        let output = OutputId(state.next_id());
        state.outputs.insert(
            output,
            FakeOutput {
                settings: settings.clone(),
                signals,
                video: None,
                audio: BTreeMap::new(),
                source: None,
                active: false,
                capturing: false,
                last_error: None,
            },
        );
        Ok(output)
    }

    fn release_output(&self, output: OutputId) {
        let mut state = self.lock();
        if state.outputs.remove(&output).is_some() {
            state.released_outputs.push(output);
        }
    }

    fn set_video_encoder(&self, output: OutputId, encoder: EncoderId) {
        if let Some(o) = self.lock().outputs.get_mut(&output) {
            o.video = Some(encoder);
        }
    }

    fn set_audio_encoder(&self, output: OutputId, encoder: EncoderId, track: usize) {
        if let Some(o) = self.lock().outputs.get_mut(&output) {
            o.audio.insert(track, encoder);
        }
    }

    fn set_video_source(&self, output: OutputId, source: &VideoSource) {
        if let Some(o) = self.lock().outputs.get_mut(&output) {
            o.source = Some(source.clone());
        }
    }

    fn start_output(&self, output: OutputId) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;
        let Some(o) = state.outputs.get_mut(&output) else {
            return false;
        };
        if o.active {
            return true;
        }
        let Some(video) = o.video.and_then(|id| state.encoders.get_mut(&id)) else {
            o.last_error = Some("no video encoder".to_string());
            return false;
        };
        state.start_attempts.push(video.id.clone());
        if state.fail_start.contains(&video.id) {
            o.last_error = Some(format!("{} failed to initialize", video.id));
            return false;
        }
        video.active = true;
        o.active = true;
        o.capturing = true;
        o.last_error = None;
        true
    }

    fn stop_output(&self, output: OutputId) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(o) = state.outputs.get_mut(&output) {
            o.active = false;
            o.capturing = false;
            if let Some(video) = o.video.and_then(|id| state.encoders.get_mut(&id)) {
                video.active = false;
            }
        }
    }

    fn save_replay(&self, output: OutputId) -> bool {
        let mut state = self.lock();
        state.save_requests += 1;
        if state.refuse_save {
            return false;
        }
        state.outputs.get(&output).is_some_and(|o| o.capturing)
    }

    fn last_error(&self, output: OutputId) -> Option<String> {
        self.lock().outputs.get(&output)?.last_error.clone()
    }

    fn encoder_status(&self, encoder: EncoderId) -> Option<EncoderStatus> {
        self.lock().encoders.get(&encoder).map(|e| EncoderStatus {
            id: e.id.clone(),
            active: e.active,
        })
    }
}
