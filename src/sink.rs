use std::{path::PathBuf, sync::Mutex};

use chrono::{DateTime, Local};
use replay_bus::{SaveOutcome, SaveSink};
use serde::Serialize;

/// Save notification as exposed over HTTP.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveNotice {
    pub success: bool,
    pub path: PathBuf,
    pub context: Option<String>,
    pub elapsed_ms: u128,
    pub finished_at: DateTime<Local>,
}

impl From<&SaveOutcome> for SaveNotice {
    fn from(outcome: &SaveOutcome) -> Self {
        Self {
            success: outcome.success,
            path: outcome.path.clone(),
            context: outcome.context.clone(),
            elapsed_ms: outcome.elapsed.as_millis(),
            finished_at: Local::now(),
        }
    }
}

/// Logs every save outcome and keeps the most recent one.
#[derive(Default)]
pub struct NotifySink {
    last: Mutex<Option<SaveNotice>>,
}

impl NotifySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<SaveNotice> {
        self.last.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl SaveSink for NotifySink {
    fn on_saved(&self, outcome: &SaveOutcome) {
        if outcome.success {
            log::info!(
                "clip saved: {} ({} ms)",
                outcome.path.display(),
                outcome.elapsed.as_millis()
            );
        } else {
            log::error!("clip save failed after {} ms", outcome.elapsed.as_millis());
        }
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(SaveNotice::from(outcome));
    }
}
