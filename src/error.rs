use thiserror::Error;

// ─── Provider errors ─────────────────────────────────────────────────────────

/// Classified error from a chat provider call.
///
/// The retry policy absorbs retryable variants up to its attempt bound;
/// everything else propagates unchanged to the step loop.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("status {code}: {message}")]
    Status { code: u16, message: String },
}

impl ProviderError {
    /// Retryable iff connection failure, timeout, or a transient status.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout(_) => true,
            Self::Status { code, .. } => matches!(code, 429 | 500 | 502 | 503),
        }
    }
}

// ─── Context errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ContextError {
    /// Contract violation: the requested revert target does not exist.
    /// Never retried.
    #[error("invalid checkpoint {id} ({n_checkpoints} checkpoints exist)")]
    InvalidCheckpoint { id: usize, n_checkpoints: usize },

    #[error("history log io: {0}")]
    Io(#[from] std::io::Error),

    #[error("history log encode: {0}")]
    Encode(#[from] serde_json::Error),
}

// ─── Metadata store errors ───────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum MetaError {
    /// One malformed line in the metadata log. Readers skip the line with a
    /// warning; the rest of the log still loads.
    #[error("corrupt metadata record at line {line_no}: {source}")]
    CorruptRecord {
        line_no: usize,
        source: serde_json::Error,
    },

    #[error("metadata log io: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata log encode: {0}")]
    Encode(#[from] serde_json::Error),
}

// ─── Time-travel scheduling errors ───────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TimeTravelError {
    #[error("checkpoint {checkpoint_id} out of range ({n_checkpoints} checkpoints exist)")]
    OutOfRange {
        checkpoint_id: usize,
        n_checkpoints: usize,
    },

    #[error("a time-travel signal is already pending for this step")]
    AlreadyPending,
}

// ─── Run-level errors ────────────────────────────────────────────────────────

/// Terminal failure of one `run` invocation. A run either completes, is
/// cancelled, hits the step limit, or surfaces a provider error; tool
/// rejection by the user ends the run successfully and is not represented
/// here.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("provider: {0}")]
    Provider(#[from] ProviderError),

    #[error("context: {0}")]
    Context(#[from] ContextError),

    #[error("metadata: {0}")]
    Meta(#[from] MetaError),

    #[error("maximum of {0} steps reached")]
    MaxStepsExceeded(usize),

    #[error("run cancelled")]
    Cancelled,
}
