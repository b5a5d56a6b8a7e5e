use std::sync::Arc;

use clap::Parser;
use replay_bus::{Recorder, ffmpeg::FfmpegEngine};
use tokio_util::sync::CancellationToken;

use crate::{cli::Args, config::AppSettings, handler::AppState, sink::NotifySink};

mod api;
mod cli;
mod config;
mod handler;
mod sink;

fn init_logging(level: log::LevelFilter) {
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .filter_module("ffmpeg_next", log::LevelFilter::Warn)
        .filter_module("replay_bus", level)
        .filter_module("clipvault", level)
        .init();
}

#[tokio::main]
async fn main() -> ! {
    let args = Args::parse();
    init_logging(args.log_level);

    let code = match run(args).await {
        Ok(()) => 0,
        Err(e) => {
            log::error!("{:#}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(args: Args) -> anyhow::Result<()> {
    replay_bus::ffmpeg::init()?;
    let settings = AppSettings::load(&args.config)?;
    let listen = args.listen.unwrap_or(settings.api.listen);

    let engine = Arc::new(FfmpegEngine::new(settings.canvas()));
    let notices = Arc::new(NotifySink::new());
    let recorder = Arc::new(Recorder::new(
        engine,
        settings.recorder_config(),
        notices.clone(),
        None,
    )?);

    let opener = Arc::clone(&recorder);
    if let Err(e) = tokio::task::spawn_blocking(move || opener.open()).await? {
        log::error!("replay buffer unavailable, retry with POST /system/start: {}", e);
    }

    let cancel = CancellationToken::new();
    let api = api::start_api_server(
        listen,
        AppState {
            recorder: Arc::clone(&recorder),
            notices,
        },
        cancel.clone(),
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupt received");
                cancel.cancel();
            },
        }
    }

    if let Err(e) = api.await {
        log::error!("API server task failed: {}", e);
    }
    recorder.shutdown().await;
    log::info!("clipvault stopped");
    Ok(())
}
