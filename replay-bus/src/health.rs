//! Low-frequency diagnostics while the replay buffer runs. Read-only: it
//! looks at the published pipeline status, asks the engine whether the
//! video encoder is still active and reports memory usage.

use std::{
    sync::{Arc, mpsc},
    thread::JoinHandle,
    time::Duration,
};

use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::watch;

use crate::{
    engine::MediaEngine,
    pipeline::{PipelineState, PipelineStatus},
};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

const MB: u64 = 1024 * 1024;

/// Handle to the monitor thread. Dropping it stops and joins the thread.
pub struct HealthMonitor {
    stop: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    /// Returns `None` when `interval` is zero or the thread cannot be spawned.
    pub fn spawn(
        engine: Arc<dyn MediaEngine>,
        status: watch::Receiver<PipelineStatus>,
        interval: Duration,
    ) -> Option<Self> {
        if interval.is_zero() {
            return None;
        }
        let (stop, stop_rx) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name("replay-health".to_string())
            .spawn(move || run(engine, status, interval, stop_rx));
        match handle {
            Ok(handle) => {
                log::debug!("health monitor started, interval {:?}", interval);
                Some(Self {
                    stop: Some(stop),
                    handle: Some(handle),
                })
            }
            Err(e) => {
                log::warn!("failed to spawn health monitor: {}", e);
                None
            }
        }
    }

    /// Signals the thread and waits for it to exit.
    pub fn join(&mut self) {
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("health monitor thread panicked");
            }
            log::debug!("health monitor stopped");
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.join();
    }
}

fn run(
    engine: Arc<dyn MediaEngine>,
    status: watch::Receiver<PipelineStatus>,
    interval: Duration,
    stop: mpsc::Receiver<()>,
) {
    let mut system = System::new();
    let pid = sysinfo::get_current_pid().ok();

    // A closed sender is the stop signal, the unit message is never sent.
    while let Err(mpsc::RecvTimeoutError::Timeout) = stop.recv_timeout(interval) {
        let snapshot = status.borrow().clone();
        if snapshot.state != PipelineState::Active {
            continue;
        }
        check_encoder(engine.as_ref(), &snapshot);
        report_memory(&mut system, pid);
    }
}

fn check_encoder(engine: &dyn MediaEngine, status: &PipelineStatus) {
    let Some(encoder) = status.encoder_id else {
        log::warn!("health: replay buffer active without a video encoder");
        return;
    };
    match engine.encoder_status(encoder) {
        Some(s) if s.active => log::debug!("health: encoder {} active", s.id),
        Some(s) => log::warn!("health: encoder {} is not active", s.id),
        None => log::warn!("health: engine lost track of the video encoder"),
    }
}

fn report_memory(system: &mut System, pid: Option<Pid>) {
    system.refresh_memory();
    let available = system.available_memory() / MB;

    let rss = pid.and_then(|pid| {
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system.process(pid).map(|p| p.memory() / MB)
    });
    match rss {
        Some(rss) => log::info!("health: process rss {} MB, system available {} MB", rss, available),
        None => log::info!("health: system available {} MB", available),
    }
}
