use std::{path::PathBuf, sync::Arc, time::Duration};

use tokio::sync::mpsc::UnboundedReceiver;

use super::*;
use crate::{
    engine::OutputSignal,
    error::Error,
    fake::FakeEngine,
    pipeline::PipelineState,
    save::SaveOutcome,
    selector::BackendCategory,
};

struct Setup {
    engine: Arc<FakeEngine>,
    recorder: Recorder,
    outcomes: UnboundedReceiver<SaveOutcome>,
    dir: tempfile::TempDir,
}

fn setup(configure: impl FnOnce(&mut RecorderConfig)) -> anyhow::Result<Setup> {
    let dir = tempfile::tempdir()?;
    let engine = Arc::new(FakeEngine::new());
    let mut config = RecorderConfig {
        health_interval: Duration::ZERO,
        save_drain_timeout: Duration::from_millis(200),
        replay: ReplayOutputSettings {
            directory: dir.path().to_path_buf(),
            ..Default::default()
        },
        ..Default::default()
    };
    configure(&mut config);

    let (tx, outcomes) = tokio::sync::mpsc::unbounded_channel();
    let recorder = Recorder::new(engine.clone(), config, Arc::new(tx), None)?;
    Ok(Setup {
        engine,
        recorder,
        outcomes,
        dir,
    })
}

async fn next_outcome(rx: &mut UnboundedReceiver<SaveOutcome>) -> anyhow::Result<SaveOutcome> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("outcome channel closed"))
}

#[tokio::test]
async fn test_open_on_software_only_machine() -> anyhow::Result<()> {
    let s = setup(|_| {})?;
    for id in ["h264_nvenc", "h264_qsv", "h264_amf"] {
        s.engine.fail_create(id);
    }

    s.recorder.open()?;

    let status = s.recorder.status();
    assert_eq!(status.state, PipelineState::Active);
    assert_eq!(status.category, Some(BackendCategory::Software));
    assert_eq!(status.audio_tracks, vec![0]);
    s.recorder.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_open_with_both_audio_tracks() -> anyhow::Result<()> {
    let s = setup(|c| c.microphone = true)?;
    s.recorder.open()?;

    let output = s.engine.outputs()[0];
    assert_eq!(s.engine.bound_audio_tracks(output), vec![0, 1]);
    s.recorder.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_audio_failure_is_not_fatal() -> anyhow::Result<()> {
    let s = setup(|c| c.microphone = true)?;
    s.engine.fail_create("aac");

    s.recorder.open()?;
    assert_eq!(s.recorder.status().state, PipelineState::Active);
    assert!(s.recorder.status().audio_tracks.is_empty());
    s.recorder.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_open_fails_without_any_encoder() -> anyhow::Result<()> {
    let s = setup(|c| c.mode = EncoderMode::SoftwareOnly)?;
    s.engine.fail_create("libx264");

    assert!(matches!(s.recorder.open(), Err(Error::Creation { .. })));
    assert_eq!(s.recorder.status().state, PipelineState::Uninitialized);
    Ok(())
}

#[tokio::test]
async fn test_save_completion_reaches_sink() -> anyhow::Result<()> {
    let mut s = setup(|_| {})?;
    s.recorder.open()?;
    let output = s.engine.outputs()[0];

    let clip = s.dir.path().join("2024-01-01_10-00-00.mp4");
    std::fs::write(&clip, b"clip")?;

    s.recorder.save_clip()?;
    assert!(s.recorder.is_save_pending());
    assert_eq!(s.recorder.save_clip(), Err(SaveRejected::Pending));

    assert!(s.engine.emit(output, OutputSignal::Saved { path: Some(clip.clone()) }));
    let outcome = next_outcome(&mut s.outcomes).await?;
    assert!(outcome.success);
    assert_eq!(outcome.path, clip);
    assert!(!s.recorder.is_save_pending());

    s.recorder.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_labelled_save_is_enriched() -> anyhow::Result<()> {
    let mut s = setup(|_| {})?;
    s.recorder.open()?;
    let output = s.engine.outputs()[0];

    let clip = s.dir.path().join("clip.mp4");
    std::fs::write(&clip, b"clip")?;
    s.recorder.set_context_label(Some("Valorant".to_string()));

    s.recorder.save_clip()?;
    assert_eq!(s.recorder.context_label(), None);
    s.engine.emit(output, OutputSignal::Saved { path: Some(clip) });

    let outcome = next_outcome(&mut s.outcomes).await?;
    assert_eq!(outcome.path, s.dir.path().join("clip_Valorant.mp4"));
    assert_eq!(outcome.context.as_deref(), Some("Valorant"));
    s.recorder.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_save_without_path_and_no_clip_fails() -> anyhow::Result<()> {
    let mut s = setup(|_| {})?;
    s.recorder.open()?;
    let output = s.engine.outputs()[0];

    s.recorder.save_clip()?;
    s.engine.emit(output, OutputSignal::Saved { path: None });

    let outcome = next_outcome(&mut s.outcomes).await?;
    assert!(!outcome.success);
    assert_eq!(outcome.path, PathBuf::new());
    s.recorder.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_engine_stop_signal_deactivates() -> anyhow::Result<()> {
    let s = setup(|_| {})?;
    s.recorder.open()?;
    let output = s.engine.outputs()[0];
    let mut status = s.recorder.subscribe();

    s.engine.emit(output, OutputSignal::Stopped);
    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|st| st.state == PipelineState::Initialized),
    )
    .await??;

    assert_eq!(s.recorder.save_clip(), Err(SaveRejected::NotActive));
    s.recorder.start()?;
    assert_eq!(s.recorder.status().state, PipelineState::Active);
    s.recorder.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_restart_after_capture_failure() -> anyhow::Result<()> {
    let s = setup(|_| {})?;
    s.recorder.open()?;
    let output = s.engine.outputs()[0];
    let mut status = s.recorder.subscribe();

    assert!(s.engine.crash(output, "device lost"));
    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|st| st.state == PipelineState::Initialized),
    )
    .await??;

    s.recorder.start()?;
    assert_eq!(s.recorder.status().state, PipelineState::Active);
    assert!(s.engine.is_capturing(output));
    s.recorder.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_shutdown_waits_for_dispatched_save() -> anyhow::Result<()> {
    let mut s = setup(|c| c.save_drain_timeout = Duration::from_secs(5))?;
    s.recorder.open()?;
    let output = s.engine.outputs()[0];

    let clip = s.dir.path().join("2024-01-01_10-00-00.mp4");
    std::fs::write(&clip, b"clip")?;
    s.recorder.save_clip()?;

    let engine = s.engine.clone();
    let late = clip.clone();
    let emitter = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.emit(output, OutputSignal::Saved { path: Some(late) })
    });
    s.recorder.shutdown().await;
    assert!(emitter.await?);

    let outcome = s.outcomes.try_recv()?;
    assert!(outcome.success);
    assert_eq!(outcome.path, clip);
    assert!(s.outcomes.try_recv().is_err());
    assert!(!s.recorder.is_save_pending());
    Ok(())
}

#[tokio::test]
async fn test_shutdown_gives_up_on_stalled_save() -> anyhow::Result<()> {
    let s = setup(|_| {})?;
    s.recorder.open()?;
    s.recorder.save_clip()?;

    tokio::time::timeout(Duration::from_secs(5), s.recorder.shutdown()).await?;
    assert!(s.engine.outputs().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_resume_retries_failed_start() -> anyhow::Result<()> {
    let s = setup(|c| c.mode = EncoderMode::SoftwareOnly)?;
    s.engine.fail_start("libx264");
    assert!(matches!(s.recorder.open(), Err(Error::Start { .. })));
    assert_eq!(s.recorder.status().state, PipelineState::Initialized);

    s.engine.clear_failures();
    s.recorder.resume()?;
    assert_eq!(s.recorder.status().state, PipelineState::Active);
    assert_eq!(s.engine.outputs().len(), 1);
    s.recorder.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_resume_opens_after_failed_boot() -> anyhow::Result<()> {
    let s = setup(|c| c.mode = EncoderMode::SoftwareOnly)?;
    s.engine.fail_create("libx264");
    assert!(s.recorder.open().is_err());
    assert_eq!(s.recorder.status().state, PipelineState::Uninitialized);

    s.engine.clear_failures();
    s.recorder.resume()?;
    assert_eq!(s.recorder.status().state, PipelineState::Active);

    s.recorder.shutdown().await;
    assert!(matches!(s.recorder.resume(), Err(Error::Output(_))));
    assert!(s.engine.outputs().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_save_rejected_before_open_and_after_shutdown() -> anyhow::Result<()> {
    let s = setup(|_| {})?;
    assert_eq!(s.recorder.save_clip(), Err(SaveRejected::NotActive));

    s.recorder.open()?;
    s.recorder.stop();
    assert_eq!(s.recorder.save_clip(), Err(SaveRejected::NotActive));

    s.recorder.shutdown().await;
    s.recorder.shutdown().await;
    assert_eq!(s.recorder.save_clip(), Err(SaveRejected::NotActive));
    assert!(s.engine.outputs().is_empty());
    assert!(s.engine.live_encoders().is_empty());
    assert_eq!(s.engine.save_requests(), 0);
    Ok(())
}
