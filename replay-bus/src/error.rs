use crate::pipeline::PipelineState;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the pipeline lifecycle. Save outcomes never travel through
/// this type, they are delivered to a [`crate::SaveSink`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to create {what}: {detail}")]
    Creation { what: String, detail: String },

    #[error("failed to start replay buffer: {reason}")]
    Start { reason: String },

    #[error("replay output error: {0}")]
    Output(String),

    #[error("no video encoder bound to the pipeline")]
    NoEncoder,

    #[error("invalid pipeline state {actual:?}, expected {expected:?}")]
    InvalidState {
        actual: PipelineState,
        expected: PipelineState,
    },
}

/// Synchronous rejection of a save request. A rejected save leaves no trace.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SaveRejected {
    #[error("replay buffer not active")]
    NotActive,

    #[error("save already in progress")]
    Pending,

    #[error("engine refused the save request")]
    Dispatch,
}
