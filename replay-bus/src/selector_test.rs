use std::sync::Arc;

use serde_json::json;

use super::{BackendCategory, CANDIDATES, EncoderMode, EncoderSelector, software_index};
use crate::{error::Error, fake::FakeEngine};

fn selector() -> (Arc<FakeEngine>, EncoderSelector) {
    let engine = Arc::new(FakeEngine::new());
    let selector = EncoderSelector::new(engine.clone());
    (engine, selector)
}

fn fail_all_hardware(engine: &FakeEngine) {
    for candidate in &CANDIDATES[..software_index()] {
        engine.fail_create(candidate.id);
    }
}

#[test]
fn test_software_candidate_is_last() {
    assert_eq!(CANDIDATES[software_index()].category, BackendCategory::Software);
    assert!(
        CANDIDATES[..software_index()]
            .iter()
            .all(|c| c.category == BackendCategory::Hardware)
    );
}

#[test]
fn test_auto_prefers_first_hardware() -> anyhow::Result<()> {
    let (engine, mut selector) = selector();
    let handle = selector.create(EncoderMode::Auto, 20)?;

    assert_eq!(handle.index(), 0);
    assert_eq!(handle.category(), BackendCategory::Hardware);
    assert_eq!(engine.attempts(), vec!["h264_nvenc"]);
    Ok(())
}

#[test]
fn test_auto_skips_failed_hardware() -> anyhow::Result<()> {
    let (engine, mut selector) = selector();
    engine.fail_create("h264_nvenc");

    let handle = selector.create(EncoderMode::Auto, 20)?;
    assert_eq!(handle.index(), 1);
    assert_eq!(handle.display_name(), "Quick Sync H.264");
    assert_eq!(engine.attempts(), vec!["h264_nvenc", "h264_qsv"]);
    Ok(())
}

#[test]
fn test_auto_falls_back_to_software() -> anyhow::Result<()> {
    let (engine, mut selector) = selector();
    fail_all_hardware(&engine);

    let handle = selector.create(EncoderMode::Auto, 20)?;
    assert_eq!(handle.category(), BackendCategory::Software);
    assert_eq!(handle.index(), software_index());
    assert_eq!(
        engine.attempts(),
        vec!["h264_nvenc", "h264_qsv", "h264_amf", "libx264"]
    );
    Ok(())
}

#[test]
fn test_auto_fails_when_software_fails_too() {
    let (engine, mut selector) = selector();
    fail_all_hardware(&engine);
    engine.fail_create("libx264");

    let err = selector.create(EncoderMode::Auto, 20).unwrap_err();
    assert!(matches!(err, Error::Creation { .. }));
}

#[test]
fn test_hardware_only_never_uses_software() {
    let (engine, mut selector) = selector();
    fail_all_hardware(&engine);

    let err = selector.create(EncoderMode::HardwareOnly, 20).unwrap_err();
    assert!(matches!(err, Error::Creation { .. }));
    assert!(!engine.attempts().contains(&"libx264".to_string()));
}

#[test]
fn test_software_only_single_attempt() {
    let (engine, mut selector) = selector();
    engine.fail_create("libx264");

    assert!(selector.create(EncoderMode::SoftwareOnly, 20).is_err());
    assert_eq!(engine.attempts(), vec!["libx264"]);
}

#[test]
fn test_backend_specific_settings() -> anyhow::Result<()> {
    let (engine, mut selector) = selector();
    let nvenc = selector.create(EncoderMode::Auto, 15)?;
    let settings = engine.encoder(nvenc.id()).unwrap().settings;
    assert_eq!(settings["rc"], json!("constqp"));
    assert_eq!(settings["multipass"], json!("disabled"));
    assert_eq!(settings["qp"], json!(15));
    assert_eq!(settings["preset"], json!("p7"));

    let x264 = selector.create(EncoderMode::SoftwareOnly, 30)?;
    let settings = engine.encoder(x264.id()).unwrap().settings;
    assert_eq!(settings["crf"], json!(28));
    assert_eq!(settings["preset"], json!("veryfast"));
    assert!(!settings.contains_key("multipass"));
    Ok(())
}

#[test]
fn test_try_next_strictly_increasing_and_terminates() -> anyhow::Result<()> {
    let (engine, mut selector) = selector();
    engine.fail_create("h264_qsv");

    let first = selector.create(EncoderMode::Auto, 20)?;
    assert_eq!(first.index(), 0);

    let second = selector.try_next(first.index()).expect("amf is available");
    assert_eq!(second.index(), 2);

    assert!(selector.try_next(second.index()).is_none());
    assert!(selector.try_next(software_index()).is_none());

    let hardware_attempts: Vec<_> = engine
        .attempts()
        .into_iter()
        .filter(|id| id != "libx264")
        .collect();
    assert_eq!(hardware_attempts, vec!["h264_nvenc", "h264_qsv", "h264_amf"]);
    Ok(())
}

#[test]
fn test_switch_to_software_is_idempotent() -> anyhow::Result<()> {
    let (engine, mut selector) = selector();
    let hardware = selector.create(EncoderMode::Auto, 20)?;

    let software = selector
        .switch_to_software(&hardware)?
        .expect("switch from hardware creates software encoder");
    assert_eq!(software.category(), BackendCategory::Software);

    let attempts_before = engine.attempts().len();
    assert!(selector.switch_to_software(&software)?.is_none());
    assert_eq!(engine.attempts().len(), attempts_before);
    Ok(())
}

#[test]
fn test_dropping_handle_releases_encoder() -> anyhow::Result<()> {
    let (engine, mut selector) = selector();
    let handle = selector.create(EncoderMode::Auto, 20)?;
    let id = handle.id();
    assert_eq!(engine.live_encoders(), vec!["h264_nvenc"]);

    drop(handle);
    assert!(engine.live_encoders().is_empty());
    assert_eq!(engine.released(), vec![id]);
    Ok(())
}

#[test]
fn test_create_audio_track() -> anyhow::Result<()> {
    let (engine, selector) = selector();
    let track = selector.create_audio(1, 160)?;
    let encoder = engine.encoder(track.id()).unwrap();

    assert_eq!(track.track(), 1);
    assert_eq!(encoder.name, "aac_track2");
    assert_eq!(encoder.mixer, Some(1));
    assert_eq!(encoder.settings["bitrate"], json!(160));
    Ok(())
}
