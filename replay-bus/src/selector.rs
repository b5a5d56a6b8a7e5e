//! Video encoder selection with create-time and runtime fallback.
//!
//! Hardware candidates are tried in a fixed preference order; the software
//! encoder is the last resort. Every failed attempt is logged and skipped,
//! only exhausting the allowed candidates is an error.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    engine::{EncoderId, EncoderSettings, MediaEngine},
    error::{Error, Result},
    quality::{QualityBand, QualityMapping, map_quality},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderMode {
    #[default]
    Auto,
    #[serde(alias = "hardware", alias = "nvenc")]
    HardwareOnly,
    #[serde(alias = "software", alias = "x264")]
    SoftwareOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendCategory {
    Hardware,
    Software,
}

pub struct EncoderCandidate {
    pub id: &'static str,
    pub display_name: &'static str,
    pub category: BackendCategory,
    settings: fn(&QualityMapping) -> EncoderSettings,
}

impl EncoderCandidate {
    pub fn settings(&self, mapping: &QualityMapping) -> EncoderSettings {
        (self.settings)(mapping)
    }
}

/// Fixed preference order. The software encoder must stay last.
pub const CANDIDATES: &[EncoderCandidate] = &[
    EncoderCandidate {
        id: "h264_nvenc",
        display_name: "NVENC H.264",
        category: BackendCategory::Hardware,
        settings: nvenc_settings,
    },
    EncoderCandidate {
        id: "h264_qsv",
        display_name: "Quick Sync H.264",
        category: BackendCategory::Hardware,
        settings: qsv_settings,
    },
    EncoderCandidate {
        id: "h264_amf",
        display_name: "AMF H.264",
        category: BackendCategory::Hardware,
        settings: amf_settings,
    },
    EncoderCandidate {
        id: "libx264",
        display_name: "x264 (Software)",
        category: BackendCategory::Software,
        settings: x264_settings,
    },
];

pub fn software_index() -> usize {
    CANDIDATES.len() - 1
}

fn into_settings(value: serde_json::Value) -> EncoderSettings {
    match value {
        serde_json::Value::Object(map) => map,
        _ => EncoderSettings::new(),
    }
}

// Constant-QP needs multipass disabled, NVENC refuses the combination otherwise.
fn nvenc_settings(mapping: &QualityMapping) -> EncoderSettings {
    into_settings(json!({
        "rc": "constqp",
        "qp": mapping.hardware.value,
        "preset": mapping.hardware.preset,
        "tune": "hq",
        "multipass": "disabled",
        "bf": 2,
        "profile": "high",
    }))
}

fn qsv_settings(mapping: &QualityMapping) -> EncoderSettings {
    let preset = match mapping.band {
        QualityBand::Ultra => "veryslow",
        QualityBand::High => "slower",
        QualityBand::Medium => "medium",
        QualityBand::Low => "veryfast",
    };
    into_settings(json!({
        "global_quality": mapping.hardware.value,
        "preset": preset,
        "look_ahead": 0,
        "profile": "high",
    }))
}

fn amf_settings(mapping: &QualityMapping) -> EncoderSettings {
    let quality = match mapping.band {
        QualityBand::Ultra | QualityBand::High => "quality",
        QualityBand::Medium => "balanced",
        QualityBand::Low => "speed",
    };
    into_settings(json!({
        "rc": "cqp",
        "qp_i": mapping.hardware.value,
        "qp_p": mapping.hardware.value,
        "quality": quality,
        "profile": "high",
    }))
}

fn x264_settings(mapping: &QualityMapping) -> EncoderSettings {
    into_settings(json!({
        "crf": mapping.software.value,
        "preset": mapping.software.preset,
    }))
}

/// An engine encoder object, released when dropped.
pub struct EncoderRef {
    engine: Arc<dyn MediaEngine>,
    id: EncoderId,
}

impl EncoderRef {
    pub fn id(&self) -> EncoderId {
        self.id
    }
}

impl Drop for EncoderRef {
    fn drop(&mut self) {
        self.engine.release_encoder(self.id);
    }
}

impl fmt::Debug for EncoderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EncoderRef").field(&self.id).finish()
    }
}

#[derive(Debug)]
pub struct EncoderHandle {
    encoder: EncoderRef,
    index: usize,
    display_name: &'static str,
    category: BackendCategory,
}

impl EncoderHandle {
    pub fn id(&self) -> EncoderId {
        self.encoder.id()
    }

    /// Position of the candidate in [`CANDIDATES`].
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn display_name(&self) -> &'static str {
        self.display_name
    }

    pub fn category(&self) -> BackendCategory {
        self.category
    }
}

#[derive(Debug)]
pub struct AudioTrack {
    encoder: EncoderRef,
    track: usize,
}

impl AudioTrack {
    pub fn id(&self) -> EncoderId {
        self.encoder.id()
    }

    pub fn track(&self) -> usize {
        self.track
    }
}

pub struct EncoderSelector {
    engine: Arc<dyn MediaEngine>,
    mapping: QualityMapping,
}

impl EncoderSelector {
    pub fn new(engine: Arc<dyn MediaEngine>) -> Self {
        Self {
            engine,
            mapping: map_quality(crate::recorder::DEFAULT_QUALITY),
        }
    }

    pub fn mapping(&self) -> &QualityMapping {
        &self.mapping
    }

    pub fn create(&mut self, mode: EncoderMode, quality: i32) -> Result<EncoderHandle> {
        self.mapping = map_quality(quality);
        log::info!(
            "creating video encoder: mode={:?}, quality={} ({:?}), hw cq={} preset={}, sw crf={} preset={}",
            mode,
            quality,
            self.mapping.band,
            self.mapping.hardware.value,
            self.mapping.hardware.preset,
            self.mapping.software.value,
            self.mapping.software.preset
        );

        match mode {
            EncoderMode::SoftwareOnly => self.attempt(software_index()).map_err(|e| Error::Creation {
                what: "video encoder".to_string(),
                detail: format!("software encoder requested but unavailable: {:#}", e),
            }),
            EncoderMode::HardwareOnly => self.first_hardware_from(0).ok_or_else(|| Error::Creation {
                what: "video encoder".to_string(),
                detail: "hardware encoder requested but all hardware candidates failed".to_string(),
            }),
            EncoderMode::Auto => {
                if let Some(handle) = self.first_hardware_from(0) {
                    return Ok(handle);
                }
                log::info!("all hardware encoders failed, falling back to software encoding");
                self.attempt(software_index()).map_err(|e| Error::Creation {
                    what: "video encoder".to_string(),
                    detail: format!("neither hardware nor software encoder available: {:#}", e),
                })
            }
        }
    }

    /// Next hardware candidate after `current_index` that the engine accepts.
    /// Used to recover from a runtime start failure.
    pub fn try_next(&self, current_index: usize) -> Option<EncoderHandle> {
        if current_index >= software_index() {
            log::info!("no more hardware encoders to try");
            return None;
        }
        let next = self.first_hardware_from(current_index + 1);
        if next.is_none() {
            log::info!("all hardware encoders exhausted");
        }
        next
    }

    /// Downgrades to the software encoder. Returns `Ok(None)` when `current`
    /// already is a software encoder.
    pub fn switch_to_software(&self, current: &EncoderHandle) -> Result<Option<EncoderHandle>> {
        if current.category() == BackendCategory::Software {
            log::info!("already using {}, no software fallback needed", current.display_name());
            return Ok(None);
        }
        log::info!("switching video encoder from {} to software", current.display_name());
        self.attempt(software_index())
            .map(Some)
            .map_err(|e| Error::Creation {
                what: "software fallback encoder".to_string(),
                detail: format!("{:#}", e),
            })
    }

    pub fn create_audio(&self, track: usize, bitrate: u32) -> Result<AudioTrack> {
        let settings = into_settings(json!({ "bitrate": bitrate }));
        let name = format!("aac_track{}", track + 1);
        let id = self
            .engine
            .create_audio_encoder("aac", &name, &settings, track)
            .map_err(|e| Error::Creation {
                what: format!("audio encoder for track {}", track + 1),
                detail: format!("{:#}", e),
            })?;
        log::info!("audio track {} encoder created: AAC @ {}kbps", track + 1, bitrate);
        Ok(AudioTrack {
            encoder: EncoderRef {
                engine: Arc::clone(&self.engine),
                id,
            },
            track,
        })
    }

    fn first_hardware_from(&self, start: usize) -> Option<EncoderHandle> {
        (start..software_index()).find_map(|index| self.attempt(index).ok())
    }

    fn attempt(&self, index: usize) -> anyhow::Result<EncoderHandle> {
        let candidate = &CANDIDATES[index];
        log::info!("trying encoder {} ({})", candidate.id, candidate.display_name);
        let settings = candidate.settings(&self.mapping);
        match self
            .engine
            .create_video_encoder(candidate.id, "video_encoder", &settings)
        {
            Ok(id) => {
                log::info!("using encoder {} ({})", candidate.id, candidate.display_name);
                Ok(EncoderHandle {
                    encoder: EncoderRef {
                        engine: Arc::clone(&self.engine),
                        id,
                    },
                    index,
                    display_name: candidate.display_name,
                    category: candidate.category,
                })
            }
            Err(e) => {
                log::warn!("failed to create encoder {}: {:#}", candidate.id, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
#[path = "selector_test.rs"]
mod selector_test;
