//! Save coordination: at most one save in flight, completion reconciliation
//! and the directory scan used when the engine reports no path.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant, SystemTime},
};

use regex::Regex;
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    engine::{MediaEngine, OutputId, ReplayOutputSettings},
    enrich::{AudioTracks, Enricher},
    error::{Error, Result, SaveRejected},
};

/// Saves taking longer than this are reported as stalled.
pub const STALL_THRESHOLD: Duration = Duration::from_secs(30);

/// Receives exactly one outcome per accepted save.
pub trait SaveSink: Send + Sync {
    fn on_saved(&self, outcome: &SaveOutcome);
}

impl SaveSink for UnboundedSender<SaveOutcome> {
    fn on_saved(&self, outcome: &SaveOutcome) {
        if self.send(outcome.clone()).is_err() {
            log::warn!("save outcome dropped, receiver closed");
        }
    }
}

/// Names the foreground application, used as the context label when the
/// caller did not set one.
pub trait GameIdentifier: Send + Sync {
    fn identify(&self) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    /// Final clip path, empty on failure.
    pub path: PathBuf,
    pub success: bool,
    pub context: Option<String>,
    pub elapsed: Duration,
}

/// What the pipeline exposes to a save request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveTarget {
    pub output: Option<OutputId>,
    pub active: bool,
    pub audio: AudioTracks,
}

#[derive(Debug, Clone)]
pub struct PendingSave {
    pub created_at: SystemTime,
    pub dispatched: Instant,
    pub context: Option<String>,
    pub audio: AudioTracks,
    completing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedClip {
    pub reported_path: Option<PathBuf>,
    pub final_path: PathBuf,
    pub detected_context: Option<String>,
}

pub struct SaveCoordinator {
    engine: Arc<dyn MediaEngine>,
    directory: PathBuf,
    clip_name: Regex,
    sink: Arc<dyn SaveSink>,
    identifier: Option<Arc<dyn GameIdentifier>>,
    enricher: Enricher,
    label: Mutex<Option<String>>,
    pending: Mutex<Option<PendingSave>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl SaveCoordinator {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        settings: &ReplayOutputSettings,
        sink: Arc<dyn SaveSink>,
        identifier: Option<Arc<dyn GameIdentifier>>,
        enricher: Enricher,
    ) -> Result<Self> {
        Ok(Self {
            engine,
            directory: settings.directory.clone(),
            clip_name: clip_name_pattern(&settings.extension)?,
            sink,
            identifier,
            enricher,
            label: Mutex::new(None),
            pending: Mutex::new(None),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn set_context_label(&self, label: Option<String>) {
        let label = label.filter(|l| !l.trim().is_empty());
        log::info!("context label set to {:?}", label);
        *lock(&self.label) = label;
    }

    pub fn context_label(&self) -> Option<String> {
        lock(&self.label).clone()
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.pending).is_some()
    }

    /// Triggers a save and returns without waiting for it to finish.
    pub fn save_clip(&self, target: SaveTarget) -> std::result::Result<(), SaveRejected> {
        let output = match target.output {
            Some(output) if target.active => output,
            _ => {
                log::warn!("save rejected: replay buffer not active");
                return Err(SaveRejected::NotActive);
            }
        };

        let mut pending = lock(&self.pending);
        if pending.is_some() {
            log::warn!("save rejected: a save is already in progress");
            return Err(SaveRejected::Pending);
        }

        let taken = lock(&self.label).take();
        let context = match &taken {
            Some(label) => Some(label.clone()),
            None => self.identifier.as_ref().and_then(|id| id.identify()),
        };
        *pending = Some(PendingSave {
            created_at: SystemTime::now(),
            dispatched: Instant::now(),
            context: context.clone(),
            audio: target.audio,
            completing: false,
        });

        if !self.engine.save_replay(output) {
            *pending = None;
            if let Some(label) = taken {
                lock(&self.label).get_or_insert(label);
            }
            log::error!(
                "engine refused the save request: {}",
                self.engine
                    .last_error(output)
                    .unwrap_or_else(|| "unknown error".to_string())
            );
            return Err(SaveRejected::Dispatch);
        }

        log::info!("save dispatched (context: {:?})", context);
        Ok(())
    }

    /// Handles a save completion reported by the engine. May be called from
    /// any thread; completions without a pending save are ignored.
    pub fn on_completion(&self, reported: Option<PathBuf>) {
        let pending = {
            let mut guard = lock(&self.pending);
            match guard.as_mut() {
                Some(p) if !p.completing => {
                    p.completing = true;
                    p.clone()
                }
                Some(_) => {
                    log::warn!("duplicate save completion ignored");
                    return;
                }
                None => {
                    log::warn!("save completion without a pending save ignored");
                    return;
                }
            }
        };

        let elapsed = pending.dispatched.elapsed();
        if elapsed > STALL_THRESHOLD {
            log::warn!("save took {:?}, longer than {:?}", elapsed, STALL_THRESHOLD);
        } else {
            log::info!("save completed in {:?}", elapsed);
        }

        let outcome = match self.reconcile(reported, &pending) {
            Some(clip) => {
                let path = match &clip.detected_context {
                    Some(label) => self.enricher.apply(&clip.final_path, label, pending.audio),
                    None => clip.final_path,
                };
                log::info!("clip saved: {}", path.display());
                SaveOutcome {
                    path,
                    success: true,
                    context: clip.detected_context,
                    elapsed,
                }
            }
            None => {
                log::error!("save finished but no clip could be located");
                SaveOutcome {
                    path: PathBuf::new(),
                    success: false,
                    context: pending.context.clone(),
                    elapsed,
                }
            }
        };

        self.sink.on_saved(&outcome);
        *lock(&self.pending) = None;
    }

    fn reconcile(&self, reported: Option<PathBuf>, pending: &PendingSave) -> Option<SavedClip> {
        let reported = reported.filter(|p| !p.as_os_str().is_empty());
        let final_path = match &reported {
            Some(path) => {
                match std::fs::metadata(path) {
                    Ok(meta) => log::info!("saved {} ({} bytes)", path.display(), meta.len()),
                    Err(e) => log::warn!("reported clip {} not readable: {}", path.display(), e),
                }
                path.clone()
            }
            None => {
                log::warn!(
                    "engine reported no path, scanning {}",
                    self.directory.display()
                );
                let found =
                    find_recovered_clip(&self.directory, &self.clip_name, pending.created_at)?;
                log::info!("recovered clip {}", found.display());
                found
            }
        };
        Some(SavedClip {
            reported_path: reported,
            final_path,
            detected_context: pending.context.clone(),
        })
    }
}

/// Matches engine-generated clip names, `YYYY-MM-DD_HH-MM-SS.<ext>`.
pub fn clip_name_pattern(extension: &str) -> Result<Regex> {
    let pattern = format!(
        r"^\d{{4}}-\d{{2}}-\d{{2}}_\d{{2}}-\d{{2}}-\d{{2}}(_\d+)?\.{}$",
        regex::escape(extension.trim_start_matches('.'))
    );
    Regex::new(&pattern).map_err(|e| Error::Creation {
        what: "clip name pattern".to_string(),
        detail: e.to_string(),
    })
}

/// Latest candidate strictly newer than `after`. Ties go to the greatest path.
pub fn select_latest<I>(candidates: I, after: SystemTime) -> Option<PathBuf>
where
    I: IntoIterator<Item = (PathBuf, SystemTime)>,
{
    candidates
        .into_iter()
        .filter(|(_, time)| *time > after)
        .max_by(|(pa, ta), (pb, tb)| ta.cmp(tb).then_with(|| pa.cmp(pb)))
        .map(|(path, _)| path)
}

/// Scans `dir` for a clip written after `after`.
pub fn find_recovered_clip(dir: &Path, name: &Regex, after: SystemTime) -> Option<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("failed to scan {}: {}", dir.display(), e);
            return None;
        }
    };

    let candidates = entries.filter_map(|entry| {
        let entry = entry.ok()?;
        let file_name = entry.file_name();
        if !name.is_match(file_name.to_str()?) {
            return None;
        }
        let meta = entry.metadata().ok()?;
        if !meta.is_file() {
            return None;
        }
        let time = meta.created().or_else(|_| meta.modified()).ok()?;
        Some((entry.path(), time))
    });
    select_latest(candidates, after)
}

#[cfg(test)]
#[path = "save_test.rs"]
mod save_test;
