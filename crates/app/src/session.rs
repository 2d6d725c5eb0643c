//! Per-connection streaming state machine.
//!
//! Each accepted request gets one `StreamSession` pinned to its own async
//! task: the generator alternates between producing annotated JPEG frames,
//! pacing on the steady timer, and emitting multipart parts. Decode,
//! inference, and encode run synchronously inside the generator and block
//! the worker for the duration of one frame; GPU inference plus encode
//! dominates, so per-session threads would buy nothing.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use actix_web::web::Bytes;
use actix_web::Error;
use async_stream::stream;
use frame_source::FrameSource;
use futures_core::Stream;
use infer_core::InferenceContext;
use tracing::{debug, warn};

use crate::annotation;

/// Multipart boundary token of the default stream profile.
pub const BOUNDARY: &str = "frame";

/// Server token sent with the stream header and every part.
pub const SERVER_TOKEN: &str = concat!("facestream/", env!("CARGO_PKG_VERSION"));

/// Running mean of per-frame processing time.
#[derive(Debug, Default)]
pub struct ProcessingStats {
    mean_secs: f64,
    samples: u64,
}

impl ProcessingStats {
    pub fn update(&mut self, duration: Duration) {
        let secs = duration.as_secs_f64();
        self.mean_secs = (self.mean_secs * self.samples as f64 + secs) / (self.samples as f64 + 1.0);
        self.samples += 1;
    }

    pub fn mean(&self) -> Duration {
        Duration::from_secs_f64(self.mean_secs)
    }
}

pub struct StreamSession {
    context: InferenceContext,
    source: Box<dyn FrameSource>,
    pending: VecDeque<Vec<u8>>,
    stats: ProcessingStats,
    cadence: Duration,
}

impl StreamSession {
    pub fn new(
        context: InferenceContext,
        source: Box<dyn FrameSource>,
        cadence: Duration,
    ) -> Self {
        Self {
            context,
            source,
            pending: VecDeque::new(),
            stats: ProcessingStats::default(),
            cadence,
        }
    }

    /// Consume the session into the multipart body stream.
    ///
    /// A peer disconnect drops the stream at the next yield point, which
    /// releases the execution context and frame source with it.
    pub fn into_body(mut self) -> impl Stream<Item = Result<Bytes, Error>> {
        stream! {
            metrics::counter!("stream_sessions_total").increment(1);
            loop {
                // Producing: skip straight to pacing while a frame is queued.
                let pause = if self.pending.is_empty() {
                    self.produce()
                } else {
                    self.cadence
                };

                // Pacing.
                actix_web::rt::time::sleep(pause).await;

                // Emitting.
                let Some(part) = self.pending.pop_front() else {
                    continue;
                };
                if part.is_empty() {
                    debug!("frame source exhausted; terminating stream");
                    yield Ok(Bytes::from(terminator_part()));
                    break;
                }
                yield Ok(Bytes::from(encode_part(&part)));
            }
        }
    }

    /// Fill the queue within the cadence budget and return the pause to arm
    /// the timer with.
    ///
    /// Frames keep flowing while the source has more and the remaining
    /// budget still exceeds the mean processing time, so sessions self-tune
    /// to however fast this machine runs one frame. A zero-length queue
    /// entry signals end-of-stream to the emitter.
    fn produce(&mut self) -> Duration {
        let mut budget = self.cadence;
        loop {
            if self.source.is_finished() {
                self.pending.push_back(Vec::new());
                break;
            }

            let started = Instant::now();
            match self.process_one_frame() {
                Ok(Some(jpeg)) => self.pending.push_back(jpeg),
                Ok(None) => {
                    metrics::counter!("stream_frames_skipped_total", "reason" => "missing")
                        .increment(1);
                }
                Err(err) => {
                    warn!(error = ?err, "inference failed; skipping frame");
                    metrics::counter!("stream_frames_skipped_total", "reason" => "inference")
                        .increment(1);
                }
            }
            let elapsed = started.elapsed();
            self.stats.update(elapsed);
            metrics::histogram!("stream_frame_processing_seconds").record(elapsed.as_secs_f64());

            budget = budget.saturating_sub(elapsed);
            if budget <= self.stats.mean() {
                break;
            }
        }
        budget
    }

    /// Decode, resize, infer, draw, and encode a single frame.
    ///
    /// `Ok(None)` is a missing frame; errors are inference failures. Both
    /// leave the session running.
    fn process_one_frame(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        let Some(mut frame) = self.source.read_next() else {
            return Ok(None);
        };

        let resized = frame.resized(self.context.input_width(), self.context.input_height());
        let mut detections = Vec::new();
        self.context
            .infer(&[resized.data.as_slice()], &mut detections)?;

        annotation::annotate(&mut frame, &detections);
        let jpeg = annotation::encode_jpeg(&frame)?;
        metrics::counter!("stream_frames_emitted_total").increment(1);
        Ok(Some(jpeg))
    }
}

/// Frame the payload as one multipart part.
pub fn encode_part(payload: &[u8]) -> Vec<u8> {
    let header = format!(
        "--{BOUNDARY}\r\nServer: {SERVER_TOKEN}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        payload.len()
    );
    let mut part = Vec::with_capacity(header.len() + payload.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(payload);
    part.extend_from_slice(b"\r\n");
    part
}

/// Terminating boundary closing the multipart stream.
pub fn terminator_part() -> Vec<u8> {
    format!("--{BOUNDARY}--\r\n").into_bytes()
}
