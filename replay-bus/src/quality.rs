//! Quality setting to encoder parameter mapping.
//!
//! The configured quality is a constant-quality style number (15 = ultra,
//! 30 = low). Lower numbers always request higher quality. Each band carries
//! one column per backend category so the table can be checked directly.

use crate::selector::BackendCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QualityBand {
    Ultra,
    High,
    Medium,
    Low,
}

/// Parameters for one backend category: the numeric rate-control value
/// (CQ/QP for hardware, CRF for software) and a named speed preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendQuality {
    pub value: i32,
    pub preset: &'static str,
}

struct BandRow {
    band: QualityBand,
    /// Inclusive upper bound of the band; `None` for the last band.
    upper: Option<i32>,
    hardware: BackendQuality,
    software: BackendQuality,
}

const BANDS: [BandRow; 4] = [
    BandRow {
        band: QualityBand::Ultra,
        upper: Some(18),
        hardware: BackendQuality { value: 15, preset: "p7" },
        software: BackendQuality { value: 18, preset: "slow" },
    },
    BandRow {
        band: QualityBand::High,
        upper: Some(21),
        hardware: BackendQuality { value: 20, preset: "p5" },
        software: BackendQuality { value: 21, preset: "medium" },
    },
    BandRow {
        band: QualityBand::Medium,
        upper: Some(25),
        hardware: BackendQuality { value: 25, preset: "p3" },
        software: BackendQuality { value: 23, preset: "fast" },
    },
    BandRow {
        band: QualityBand::Low,
        upper: None,
        hardware: BackendQuality { value: 30, preset: "p1" },
        software: BackendQuality { value: 28, preset: "veryfast" },
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityMapping {
    pub band: QualityBand,
    pub hardware: BackendQuality,
    pub software: BackendQuality,
}

impl QualityMapping {
    pub fn for_category(&self, category: BackendCategory) -> BackendQuality {
        match category {
            BackendCategory::Hardware => self.hardware,
            BackendCategory::Software => self.software,
        }
    }
}

pub fn map_quality(quality: i32) -> QualityMapping {
    let row = BANDS
        .iter()
        .find(|row| row.upper.is_none_or(|upper| quality <= upper))
        .unwrap_or(&BANDS[BANDS.len() - 1]);

    QualityMapping {
        band: row.band,
        hardware: row.hardware,
        software: row.software,
    }
}
