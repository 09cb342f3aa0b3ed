use std::fmt;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lines longer than this are delivered in pieces
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Which of the child's output streams an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Line(String),
    EndOfStream,
}

/// One line (or the end marker) read from a child stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEvent {
    pub stream: OutputStream,
    pub line: OutputLine,
}

impl OutputEvent {
    pub fn line(stream: OutputStream, text: impl Into<String>) -> Self {
        Self {
            stream,
            line: OutputLine::Line(text.into()),
        }
    }

    pub fn end_of_stream(stream: OutputStream) -> Self {
        Self {
            stream,
            line: OutputLine::EndOfStream,
        }
    }
}

/// Receives every line the supervised child writes.
///
/// Called from the pump tasks, concurrently for the two streams.
pub trait OutputSink: Send + Sync {
    fn on_output(&self, event: OutputEvent);
}

impl<F> OutputSink for F
where
    F: Fn(OutputEvent) + Send + Sync,
{
    fn on_output(&self, event: OutputEvent) {
        self(event)
    }
}

/// Forwards child output to `tracing`.
///
/// Both streams are logged at info: cache servers print their normal
/// diagnostics on stderr.
#[derive(Debug, Clone)]
pub struct TracingSink {
    child: String,
}

impl TracingSink {
    pub fn new(child: impl Into<String>) -> Self {
        Self {
            child: child.into(),
        }
    }
}

impl OutputSink for TracingSink {
    fn on_output(&self, event: OutputEvent) {
        match event.line {
            OutputLine::Line(text) => info!(
                target: "cachevisor::child",
                child = %self.child,
                stream = %event.stream,
                "{text}"
            ),
            OutputLine::EndOfStream => debug!(
                target: "cachevisor::child",
                child = %self.child,
                stream = %event.stream,
                "Stream closed"
            ),
        }
    }
}

/// Splits a byte stream on `\n`, dropping a trailing `\r` and decoding lossily
#[derive(Debug, Default)]
struct LossyLineCodec;

impl LossyLineCodec {
    fn take_line(src: &mut BytesMut, len: usize, has_newline: bool) -> String {
        let mut line = src.split_to(len);
        if has_newline {
            line.truncate(line.len() - 1);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
        }
        String::from_utf8_lossy(&line).into_owned()
    }
}

impl Decoder for LossyLineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(pos) = src.iter().position(|b| *b == b'\n') {
            return Ok(Some(Self::take_line(src, pos + 1, true)));
        }

        if src.len() >= MAX_LINE_LENGTH {
            return Ok(Some(Self::take_line(src, MAX_LINE_LENGTH, false)));
        }

        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None if src.is_empty() => Ok(None),
            None => {
                let len = src.len();
                Ok(Some(Self::take_line(src, len, false)))
            }
        }
    }
}

/// Spawn a task that forwards each line of `io` to `sink` until the stream
/// ends or `cancel` fires. No sink call happens after cancellation is observed.
pub fn spawn_pump<R>(
    stream: OutputStream,
    io: R,
    sink: Arc<dyn OutputSink>,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut frames = FramedRead::with_capacity(io, LossyLineCodec, 1024);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                frame = frames.next() => match frame {
                    Some(Ok(text)) => sink.on_output(OutputEvent::line(stream, text)),
                    Some(Err(e)) => {
                        warn!(%stream, "Failed to read child output: {e}");
                        break;
                    }
                    None => {
                        sink.on_output(OutputEvent::end_of_stream(stream));
                        break;
                    }
                },
            }
        }
    })
}
