//! Session lifecycle.
//!
//! A [`Session`] owns one engine handle for as long as it lives. Every
//! operation checks the handle first; after [`Session::stop`] the handle is
//! gone for good and every call fails fast with `SessionStopped`.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::accel;
use crate::engine::{EngineInput, EngineOutput, HandleId, MAX_OUTPUTS, MediaEngine};
use crate::error::{ErrorKind, Result, TranscodeError, codes};
use crate::guard::SizeGuard;
use crate::params::{InputFacts, build_output};
use crate::types::{InputSpec, OutputSpec, TranscodeResult};

#[derive(Debug, Default)]
struct SessionState {
    handle: Option<HandleId>,
    stopped: bool,
}

pub struct Session {
    engine: Arc<dyn MediaEngine>,
    guard: SizeGuard,
    state: Mutex<SessionState>,
    /// Serialises `transcode` and `discontinuity`; `stop` never takes it.
    call_lock: Mutex<()>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Session")
            .field("handle", &state.handle)
            .field("stopped", &state.stopped)
            .field("guard", &self.guard)
            .finish()
    }
}

impl Session {
    pub fn new(engine: Arc<dyn MediaEngine>) -> Result<Self> {
        Self::with_guard(engine, SizeGuard::default())
    }

    /// Allocate a handle. Failure is process-fatal: no session exists.
    pub fn with_guard(engine: Arc<dyn MediaEngine>, guard: SizeGuard) -> Result<Self> {
        let handle = engine.open().map_err(|status| {
            error!(%status, "engine could not allocate a session handle");
            TranscodeError::with_code(
                ErrorKind::UnrecoverableState,
                codes::UNRECOVERABLE_STATE,
                format!("session allocation failed: {}", status.message),
            )
        })?;
        info!(%handle, "session opened");
        Ok(Self {
            engine,
            guard,
            state: Mutex::new(SessionState {
                handle: Some(handle),
                stopped: false,
            }),
            call_lock: Mutex::new(()),
        })
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    fn live_handle(&self) -> Result<HandleId> {
        let state = self.state.lock();
        match state.handle {
            Some(handle) if !state.stopped => Ok(handle),
            _ => Err(TranscodeError::session_stopped()),
        }
    }

    /// Decode `input` once and encode every output.
    ///
    /// Preconditions are checked before the engine is touched. Any output that
    /// fails to build aborts the whole call; on success `encoded[i]` belongs to
    /// `outputs[i]`.
    pub fn transcode(&self, input: &InputSpec, outputs: &[OutputSpec]) -> Result<TranscodeResult> {
        let _call = self.call_lock.lock();
        let handle = self.live_handle()?;

        if input.locator.is_empty() {
            return Err(TranscodeError::new(ErrorKind::InvalidInput, "input locator is empty"));
        }
        if outputs.len() > MAX_OUTPUTS {
            return Err(TranscodeError::new(
                ErrorKind::TooManyOutputs,
                format!("{} outputs requested, at most {MAX_OUTPUTS} allowed", outputs.len()),
            ));
        }
        accel::check_decode(&input.acceleration)?;

        let mut facts = InputFacts::new(self.engine.as_ref(), input);
        let mut params = outputs
            .iter()
            .enumerate()
            .map(|(index, output)| build_output(index, input, output, &mut facts, &self.guard))
            .collect::<Result<Vec<EngineOutput>>>()
            .inspect_err(|err| warn!(%handle, error = %err, "output parameters rejected"))?;

        let engine_input = EngineInput::from(input);
        debug!(%handle, input = %input.locator, outputs = params.len(), "invoking engine");
        let outcome = self.engine.transcode(handle, &engine_input, &mut params);
        release_unconsumed(&mut params);

        if self.is_stopped() {
            debug!(%handle, "session stopped during transcode");
            return Err(TranscodeError::session_stopped());
        }

        let report = outcome.map_err(|status| {
            let err = TranscodeError::from_status(&status);
            warn!(%handle, code = err.code(), kind = %err.kind(), "transcode failed: {}", err.description());
            err
        })?;

        if report.encoded.len() != outputs.len() {
            error!(
                %handle,
                expected = outputs.len(),
                got = report.encoded.len(),
                "engine returned a mismatched result count"
            );
            return Err(TranscodeError::new(
                ErrorKind::UnrecoverableState,
                format!(
                    "engine reported {} outputs for {} requested",
                    report.encoded.len(),
                    outputs.len()
                ),
            ));
        }

        Ok(TranscodeResult {
            decoded: report.decoded,
            encoded: report.encoded,
        })
    }

    /// The next call follows a timestamp discontinuity.
    pub fn discontinuity(&self) -> Result<()> {
        let _call = self.call_lock.lock();
        let handle = self.live_handle()?;
        self.engine
            .discontinuity(handle)
            .map_err(|status| TranscodeError::from_status(&status))
    }

    /// Release the handle. Idempotent and callable from any thread, including
    /// while another thread is inside [`Session::transcode`].
    pub fn stop(&self) {
        let handle = {
            let mut state = self.state.lock();
            state.stopped = true;
            state.handle.take()
        };
        if let Some(handle) = handle {
            self.engine.close(handle);
            info!(%handle, "session stopped");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Muxer options the engine did not take are dropped here.
fn release_unconsumed(params: &mut [EngineOutput]) {
    for (index, output) in params.iter_mut().enumerate() {
        if let Some(options) = output.take_muxer_options() {
            debug!(output = index, count = options.len(), "releasing unconsumed muxer options");
        }
    }
}
