//! Retry policy around a single transcode request.
//!
//! Every attempt gets a fresh [`Session`]. Non-retryable kinds end the run at
//! once; `UnrecoverableState` additionally means no further session should be
//! created in this process.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use fanout_config::RetryConfig;
use fanout_core::{
    ErrorKind, InputSpec, MediaEngine, OutputSpec, Session, SizeGuard, TranscodeError,
    TranscodeResult,
};
use tracing::{info, warn};

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    Retry,
    GiveUp,
}

pub fn next_step(err: &TranscodeError, attempt: u32, max_attempts: u32) -> NextStep {
    if attempt >= max_attempts || err.is_process_fatal() || !err.is_retryable() {
        NextStep::GiveUp
    } else {
        NextStep::Retry
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub input: InputSpec,
    pub outputs: Vec<OutputSpec>,
}

pub struct Runner {
    engine: Arc<dyn MediaEngine>,
    guard: SizeGuard,
    retry: RetryConfig,
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("guard", &self.guard)
            .field("retry", &self.retry)
            .finish()
    }
}

impl Runner {
    pub fn new(engine: Arc<dyn MediaEngine>, guard: SizeGuard, retry: RetryConfig) -> Self {
        Self {
            engine,
            guard,
            retry,
        }
    }

    pub async fn run(&self, request: Request) -> Result<TranscodeResult, TranscodeError> {
        let request = Arc::new(request);
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = self.attempt(request.clone()).await;
            let err = match outcome {
                Ok(result) => {
                    info!(attempt, outputs = result.encoded.len(), "transcode finished");
                    return Ok(result);
                }
                Err(err) => err,
            };
            match next_step(&err, attempt, max_attempts) {
                NextStep::GiveUp => {
                    warn!(attempt, kind = %err.kind(), error = %err, "giving up");
                    return Err(err);
                }
                NextStep::Retry => {
                    warn!(attempt, max_attempts, error = %err, "transcode failed; retrying");
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(&self, request: Arc<Request>) -> Result<TranscodeResult, TranscodeError> {
        let session = Arc::new(Session::with_guard(self.engine.clone(), self.guard)?);
        let worker = session.clone();
        let mut call = tokio::task::spawn_blocking(move || {
            worker.transcode(&request.input, &request.outputs)
        });

        let joined = match self.retry.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut call).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(timeout = ?limit, "attempt timed out; stopping session");
                    session.stop();
                    // The engine call unwinds once its handle is released.
                    let _ = call.await;
                    return Err(timed_out(limit));
                }
            },
            None => call.await,
        };
        session.stop();

        joined.map_err(|err| {
            TranscodeError::new(
                ErrorKind::UnrecoverableState,
                format!("transcode worker panicked: {err}"),
            )
        })?
    }
}

/// Timeouts are retryable: the next attempt runs on a fresh session.
fn timed_out(limit: Duration) -> TranscodeError {
    TranscodeError::new(
        ErrorKind::Engine,
        format!("attempt exceeded {}", humantime::format_duration(limit)),
    )
}
