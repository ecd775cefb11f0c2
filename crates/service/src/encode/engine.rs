//! Encoder engine seam.

use crate::encode::params::EncodeParams;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Why a single pass did not complete
#[derive(Debug, Error)]
pub enum EngineFailure {
    /// Encoder process exited with non-zero status
    #[error("encoder exited with code {code}: {stderr}")]
    Exited { code: i32, stderr: String },

    /// Encoder process was terminated by signal
    #[error("encoder was terminated by signal: {stderr}")]
    Terminated { stderr: String },

    /// Pass ran longer than the configured limit and was killed
    #[error("encoder exceeded the {0:?} pass timeout")]
    TimedOut(Duration),

    /// Pass was abandoned because the job was cancelled
    #[error("encoder run was cancelled")]
    Cancelled,

    /// Final pass reported success but left no usable output
    #[error("encoder produced no output: {0}")]
    MissingOutput(String),

    /// IO error launching or talking to the encoder
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Black-box encoder driven one pass at a time.
///
/// Implementations must stop promptly and return [`EngineFailure::Cancelled`]
/// once `cancel` fires.
#[async_trait]
pub trait EncoderEngine: Send + Sync {
    async fn run_pass(
        &self,
        params: &EncodeParams,
        cancel: &CancellationToken,
    ) -> Result<(), EngineFailure>;
}
