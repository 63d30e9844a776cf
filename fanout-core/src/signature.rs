//! Comparison of `<output>.bin` fingerprint artifacts.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::engine::MediaEngine;
use crate::error::{ErrorKind, Result, TranscodeError, codes};

/// Compare two in-memory fingerprints through the engine.
pub fn compare_signature_buffers(engine: &dyn MediaEngine, a: &[u8], b: &[u8]) -> Result<bool> {
    if a.is_empty() || b.is_empty() {
        return Err(TranscodeError::new(
            ErrorKind::InvalidInput,
            "signature buffers must not be empty",
        ));
    }
    engine
        .compare_signatures(a, b)
        .map_err(|status| TranscodeError::from_status(&status))
}

/// Read two fingerprint files and compare them through the engine.
pub fn compare_signature_files(
    engine: &dyn MediaEngine,
    a: impl AsRef<Path>,
    b: impl AsRef<Path>,
) -> Result<bool> {
    let read = |path: &Path| {
        fs::read(path).map_err(|err| {
            let code = err.raw_os_error().map(|errno| -errno).unwrap_or(codes::EIO);
            TranscodeError::with_code(
                ErrorKind::Engine,
                code,
                format!("reading signature {}: {err}", path.display()),
            )
        })
    };
    let (a, b) = (a.as_ref(), b.as_ref());
    let (left, right) = (read(a)?, read(b)?);
    debug!(left = %a.display(), right = %b.display(), "comparing signatures");
    compare_signature_buffers(engine, &left, &right)
}
