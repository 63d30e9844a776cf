#![cfg(unix)]

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use fanout_core::error::codes;
use fanout_core::{
    ComponentOptions, EncodedOutput, EngineInput, EngineOutput, EngineReport, EngineStatus,
    ErrorKind, HandleId, InputInfo, InputSpec, Locator, MediaCounters, MediaEngine, OutputSpec,
    PipedTranscoder, RenditionProfile, Session,
};

const FRAME: usize = 64;

/// Treats every `FRAME` bytes of input as one frame and copies them to each
/// output.
#[derive(Debug, Default)]
struct ChunkEngine {
    closed: AtomicUsize,
}

impl MediaEngine for ChunkEngine {
    fn open(&self) -> Result<HandleId, EngineStatus> {
        Ok(HandleId::new(1))
    }

    fn close(&self, _handle: HandleId) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn transcode(
        &self,
        _handle: HandleId,
        input: &EngineInput,
        outputs: &mut [EngineOutput],
    ) -> Result<EngineReport, EngineStatus> {
        let mut data = Vec::new();
        File::open(input.locator.path())
            .and_then(|mut fifo| fifo.read_to_end(&mut data))
            .map_err(|err| EngineStatus::new(codes::EIO, err.to_string()))?;
        let frames = (data.len() / FRAME) as u64;

        let mut encoded = Vec::with_capacity(outputs.len());
        for output in outputs.iter_mut() {
            output.take_muxer_options();
            let mut fifo = OpenOptions::new()
                .write(true)
                .open(output.locator.path())
                .map_err(|err| EngineStatus::new(codes::EIO, err.to_string()))?;
            fifo.write_all(&data)
                .map_err(|err| EngineStatus::new(codes::EPIPE, err.to_string()))?;
            encoded.push(EncodedOutput {
                counters: MediaCounters {
                    frames,
                    pixels: frames * u64::from(output.width) * u64::from(output.height),
                },
                detection: None,
            });
        }
        Ok(EngineReport {
            decoded: MediaCounters { frames, pixels: 0 },
            encoded,
        })
    }

    fn discontinuity(&self, _handle: HandleId) -> Result<(), EngineStatus> {
        Ok(())
    }

    fn probe(&self, _locator: &Locator) -> Result<InputInfo, EngineStatus> {
        Err(EngineStatus::new(codes::EINVAL, "pipes cannot be probed"))
    }

    fn compare_signatures(&self, a: &[u8], b: &[u8]) -> Result<bool, EngineStatus> {
        Ok(a == b)
    }
}

/// Fails every call without touching the pipes.
#[derive(Debug)]
struct MissingInputEngine;

impl MediaEngine for MissingInputEngine {
    fn open(&self) -> Result<HandleId, EngineStatus> {
        Ok(HandleId::new(7))
    }

    fn close(&self, _handle: HandleId) {}

    fn transcode(
        &self,
        _handle: HandleId,
        _input: &EngineInput,
        _outputs: &mut [EngineOutput],
    ) -> Result<EngineReport, EngineStatus> {
        Err(EngineStatus::new(codes::ENOENT, "input vanished"))
    }

    fn discontinuity(&self, _handle: HandleId) -> Result<(), EngineStatus> {
        Ok(())
    }

    fn probe(&self, _locator: &Locator) -> Result<InputInfo, EngineStatus> {
        Err(EngineStatus::new(codes::EINVAL, "pipes cannot be probed"))
    }

    fn compare_signatures(&self, _a: &[u8], _b: &[u8]) -> Result<bool, EngineStatus> {
        Ok(false)
    }
}

fn mpegts_output(resolution: &str) -> OutputSpec {
    OutputSpec::new("unused.ts", RenditionProfile::new(resolution, resolution, 1_000_000))
        .with_muxer(ComponentOptions::named("mpegts"))
}

fn drain(mut reader: fanout_core::PipeReader) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).expect("output pipe readable");
        out
    })
}

#[test]
fn streams_input_through_every_output() {
    let engine = Arc::new(ChunkEngine::default());
    let session = Session::new(engine.clone()).expect("session");
    let mut piped = PipedTranscoder::new().expect("pipe dir");

    let mut writer = piped
        .set_input(InputSpec::new("stdin").with_dimensions(1920, 1080))
        .expect("input pipe");
    let readers = piped
        .set_outputs(vec![mpegts_output("1280x720"), mpegts_output("640x360")])
        .expect("output pipes");
    assert_eq!(readers.len(), 2);

    let payload: Vec<u8> = (0..FRAME * 50).map(|i| (i % 251) as u8).collect();
    let feed = {
        let payload = payload.clone();
        thread::spawn(move || {
            writer.write_all(&payload).expect("feed input");
            writer.close();
        })
    };
    let drains: Vec<_> = readers.into_iter().map(drain).collect();

    let result = piped.transcode(&session).expect("piped transcode");
    feed.join().expect("feeder");
    for handle in drains {
        assert_eq!(handle.join().expect("drainer"), payload);
    }

    assert_eq!(result.decoded.frames, 50);
    assert_eq!(result.encoded.len(), 2);
    assert_eq!(result.encoded[0].counters.pixels, 50 * 1280 * 720);
    assert_eq!(result.encoded[1].counters.pixels, 50 * 640 * 360);

    drop(session);
    assert_eq!(engine.closed.load(Ordering::SeqCst), 1);
}

#[test]
fn engine_failure_releases_the_pipes() {
    let session = Session::new(Arc::new(MissingInputEngine)).expect("session");
    let mut piped = PipedTranscoder::new().expect("pipe dir");

    let mut writer = piped.set_input(InputSpec::new("stdin")).expect("input pipe");
    let readers = piped
        .set_outputs(vec![mpegts_output("1280x720")])
        .expect("output pipes");
    let drains: Vec<_> = readers.into_iter().map(drain).collect();

    let err = piped.transcode(&session).expect_err("engine fails");
    assert_eq!(err.kind(), ErrorKind::Engine);
    assert_eq!(err.code(), codes::ENOENT);
    assert!(err.is_retryable());

    for handle in drains {
        assert!(handle.join().expect("drainer").is_empty());
    }

    // Nobody will ever read the input: the writer must eventually break.
    let chunk = [0u8; FRAME];
    let mut broke = false;
    for _ in 0..100_000 {
        match writer.write(&chunk) {
            Ok(_) => continue,
            Err(err) => {
                assert_eq!(err.kind(), IoErrorKind::BrokenPipe);
                broke = true;
                break;
            }
        }
    }
    assert!(broke, "input writer never saw a broken pipe");
}

#[test]
fn piped_outputs_need_a_muxer() {
    let mut piped = PipedTranscoder::new().expect("pipe dir");
    let bare = OutputSpec::new("out.ts", RenditionProfile::new("720p", "1280x720", 1_000_000));
    let err = piped
        .set_outputs(vec![mpegts_output("640x360"), bare])
        .expect_err("missing muxer");
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(err.description().starts_with("output 1:"));
}

#[test]
fn piped_outputs_cannot_carry_signatures() {
    let mut piped = PipedTranscoder::new().expect("pipe dir");
    let err = piped
        .set_outputs(vec![mpegts_output("640x360"), mpegts_output("256x144").with_signature()])
        .expect_err("signature on a pipe");
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(err.description().starts_with("output 1:"));
}

#[test]
fn transcode_without_input_is_rejected() {
    let session = Session::new(Arc::new(ChunkEngine::default())).expect("session");
    let mut piped = PipedTranscoder::new().expect("pipe dir");
    let err = piped.transcode(&session).expect_err("no input");
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}
