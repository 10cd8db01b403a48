use thiserror::Error;

/// Recoverable failure classes of the worker stages.
///
/// None of these cross the pipe: each is logged and expressed as a
/// catalogue mutation and/or a terminal stage event on the client side.
#[derive(Debug, Error)]
pub enum StageError {
    /// Metadata probe failed; the item is removed from the catalogue.
    #[error("probe failed: {0:#}")]
    Probe(anyhow::Error),

    /// Thumbnail extraction failed; the item is removed from the catalogue.
    #[error("thumbnail extraction failed: {0:#}")]
    Thumbnail(anyhow::Error),

    /// The encoder child exited non-zero without being cancelled; the item
    /// moves to the error state and the queue proceeds.
    #[error("encoder exited with {status}: {stderr_tail}")]
    Encode {
        status: std::process::ExitStatus,
        stderr_tail: String,
    },

    /// Cooperative cancellation observed mid-stage. Not a failure; the
    /// stage emits its cancelled terminal event.
    #[error("cancelled")]
    Cancelled,

    /// The command pipe closed underneath the worker; the worker exits and
    /// the client learns of it from the process join.
    #[error("engine pipe closed")]
    Ipc,
}
