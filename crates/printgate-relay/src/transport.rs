// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Line-delimited JSON transport.
//
// A connection is split into a reader that yields parsed frames and a
// cloneable writer backed by an unbounded channel. One task owns the write
// half and drains the channel, so handlers running concurrently never
// interleave partial lines.

use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use printgate_core::error::{PrintgateError, Result};
use printgate_print::{JobResult, ResultRoute};

use crate::events::{InboundFrame, OutboundEvent, RelaySink};

/// Longest line accepted from a peer.
pub const MAX_FRAME_BYTES: usize = 32 * 1024 * 1024;

/// Reading side of a connection.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: BufReader<R>,
    line: Vec<u8>,
    max_frame: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: Vec::new(),
            max_frame: MAX_FRAME_BYTES,
        }
    }

    /// Lower the line limit from [`MAX_FRAME_BYTES`].
    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }

    /// Next well-formed frame, or `None` once the peer closed the stream.
    /// Blank, malformed and oversized lines are logged and skipped.
    pub async fn next_frame(&mut self) -> Result<Option<InboundFrame>> {
        while let Some(fits) = self.read_line().await? {
            if !fits {
                warn!(limit = self.max_frame, "oversized frame dropped");
                continue;
            }
            let line = match std::str::from_utf8(&self.line) {
                Ok(line) => line.trim(),
                Err(e) => {
                    warn!(error = %e, "non-UTF-8 frame dropped");
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }
            match InboundFrame::parse(line) {
                Ok(frame) => return Ok(Some(frame)),
                Err(e) => warn!(error = %e, "malformed frame dropped"),
            }
        }
        Ok(None)
    }

    /// Read through the next newline into `self.line`. `None` at end of
    /// stream, `Some(false)` when the line ran past `max_frame`; the rest of
    /// such a line is consumed without being kept.
    async fn read_line(&mut self) -> Result<Option<bool>> {
        self.line.clear();
        let mut oversized = false;
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                if self.line.is_empty() && !oversized {
                    return Ok(None);
                }
                return Ok(Some(!oversized));
            }
            let newline = available.iter().position(|b| *b == b'\n');
            let used = newline.map_or(available.len(), |i| i + 1);
            if !oversized {
                if self.line.len() + used > self.max_frame + 1 {
                    oversized = true;
                    self.line.clear();
                } else {
                    self.line.extend_from_slice(&available[..used]);
                }
            }
            self.reader.consume(used);
            if newline.is_some() {
                return Ok(Some(!oversized));
            }
        }
    }
}

/// Writing side of a connection. Cheap to clone.
#[derive(Debug, Clone)]
pub struct FrameWriter {
    tx: mpsc::UnboundedSender<String>,
}

impl FrameWriter {
    /// Writer over a bare channel; each message is one line without the
    /// trailing newline.
    pub fn from_sender(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }

    pub fn send<T: Serialize>(&self, frame: &T) -> Result<()> {
        let line = serde_json::to_string(frame)?;
        self.tx
            .send(line)
            .map_err(|_| PrintgateError::Relay("connection closed".into()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl RelaySink for FrameWriter {
    fn emit(&self, event: OutboundEvent) -> Result<()> {
        debug!(event = event.name(), "emit");
        self.send(&event)
    }
}

impl ResultRoute for FrameWriter {
    fn deliver(&self, result: JobResult) {
        let task_id = result.task_id.clone();
        if let Err(e) = self.emit(OutboundEvent::job_result(result)) {
            warn!(task_id = %task_id, "job result not delivered: {e}");
        }
    }
}

/// Split `stream` into a frame reader and a writer. The returned handle is
/// the task that owns the write half; it ends when every writer clone is
/// dropped or the peer stops accepting data.
pub fn split_stream<S>(stream: S) -> (FrameReader<ReadHalf<S>>, FrameWriter, JoinHandle<()>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let handle = tokio::spawn(async move {
        while let Some(mut line) = rx.recv().await {
            line.push('\n');
            if let Err(e) = write_half.write_all(line.as_bytes()).await {
                warn!(error = %e, "write failed, closing connection writer");
                break;
            }
            if let Err(e) = write_half.flush().await {
                warn!(error = %e, "flush failed, closing connection writer");
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    (FrameReader::new(read_half), FrameWriter::from_sender(tx), handle)
}

/// A writer shared behind an `Arc`, for routes that outlive one handler.
pub fn shared_route(writer: &FrameWriter) -> Arc<dyn ResultRoute> {
    Arc::new(writer.clone())
}
