//! Streaming shadow session over newline-delimited JSON.
//!
//! The upstream always sends full documents. Each `ShadowStream` owns a
//! `DeltaTracker`, so delta mode is computed against what this subscriber
//! was actually handed. Dropping the stream drops the response body and
//! releases the connection.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, TryStreamExt};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;

use ds_protocol::{DeltaTracker, Shadow, ShadowError, ShadowResult};

/// Largest accepted line: one serialized shadow.
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

type Lines = Pin<Box<dyn Stream<Item = Result<String, LinesCodecError>> + Send>>;

/// Unbounded, non-restartable sequence of shadows.
///
/// Ends only after yielding the error that terminated it.
pub struct ShadowStream {
    lines: Lines,
    tracker: DeltaTracker,
    only_delta: bool,
    finished: bool,
}

impl ShadowStream {
    /// Wrap a streaming HTTP response body.
    pub fn from_response(response: reqwest::Response, only_delta: bool) -> Self {
        let body = response.bytes_stream().map_err(std::io::Error::other);
        let lines = FramedRead::new(
            StreamReader::new(body),
            LinesCodec::new_with_max_length(MAX_FRAME_BYTES),
        );
        Self::from_lines(lines, only_delta)
    }

    /// Wrap any source of JSON lines.
    pub fn from_lines<S>(lines: S, only_delta: bool) -> Self
    where
        S: Stream<Item = Result<String, LinesCodecError>> + Send + 'static,
    {
        Self {
            lines: Box::pin(lines),
            tracker: DeltaTracker::new(),
            only_delta,
            finished: false,
        }
    }

    /// Mark shadows as already known to this subscriber, emitting nothing.
    pub fn seed(&mut self, shadows: impl IntoIterator<Item = Shadow>) {
        for shadow in shadows {
            self.tracker.seed(shadow);
        }
    }

    fn fail(&mut self, err: ShadowError) -> Poll<Option<ShadowResult<Shadow>>> {
        tracing::warn!(error = %err, "shadow stream terminated");
        self.finished = true;
        Poll::Ready(Some(Err(err)))
    }
}

impl Stream for ShadowStream {
    type Item = ShadowResult<Shadow>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        loop {
            let line = match self.lines.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    return self.fail(ShadowError::Transport("stream closed by server".into()));
                }
                Poll::Ready(Some(Err(e))) => {
                    return self.fail(ShadowError::Transport(format!("stream read failed: {e}")));
                }
                Poll::Ready(Some(Ok(line))) => line,
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let shadow: Shadow = match serde_json::from_str(line) {
                Ok(shadow) => shadow,
                Err(e) => {
                    return self.fail(ShadowError::Transport(format!(
                        "malformed stream frame: {e}"
                    )));
                }
            };

            let only_delta = self.only_delta;
            if let Some(item) = self.tracker.observe(shadow, only_delta) {
                return Poll::Ready(Some(Ok(item)));
            }
        }
    }
}
