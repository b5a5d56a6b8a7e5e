pub mod engine;
pub mod enrich;
pub mod error;
#[cfg(any(test, feature = "fake-engine"))]
pub mod fake;
pub mod ffmpeg;
pub mod health;
pub mod pipeline;
pub mod quality;
pub mod recorder;
pub mod save;
pub mod selector;

pub use engine::MediaEngine;
pub use error::{Error, Result, SaveRejected};
pub use pipeline::{PipelineState, PipelineStatus};
pub use recorder::{Recorder, RecorderConfig};
pub use save::{GameIdentifier, SaveOutcome, SaveSink};
pub use selector::{BackendCategory, EncoderMode};
