use std::io;
use std::pin::Pin;
use std::task::Poll;
use std::time::Duration;

use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::Instant;
use tracing::warn;

use crate::config::DeviceProfile;

/// Line splitting and terminator framing.
pub mod codec;

/// Channel related errors.
pub mod error;

/// A scripted in-memory device, for tests and dry runs.
pub mod mock;

/// A subprocess standing in for a device.
pub mod process;

/// A real serial port.
pub mod serial;

pub use error::ChannelError;
pub use mock::{MockBuilder, MockChannel, MockRecorder};
pub use process::ProcessChannel;
pub use serial::SerialChannel;

/// How outgoing payloads are split and paced on the wire.
#[derive(Debug, Clone)]
pub struct Pacing {
    /// Bytes per write. `0` means a single unbounded write.
    pub chunk_size: usize,

    /// Sleep between chunks.
    pub inter_chunk_delay: Duration,
}

impl Pacing {
    /// The pacing a device profile asks for.
    pub fn from_profile(profile: &DeviceProfile) -> Self {
        Self {
            chunk_size: profile.chunk_size,
            inter_chunk_delay: profile.inter_chunk_delay,
        }
    }

    /// No chunking at all. Useful for tests.
    pub fn unbounded() -> Self {
        Self {
            chunk_size: 0,
            inter_chunk_delay: Duration::ZERO,
        }
    }
}

/// Where a device is reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// A tty/COM path.
    Serial {
        /// Likely `/dev/ttyACMx` or `COMx`.
        path: String,

        /// Transfer rate in bits per second.
        baud: u32,
    },

    /// A local command line to spawn.
    Process {
        /// Program and arguments, whitespace separated.
        command: String,
    },
}

impl Transport {
    /// Open a live channel to the device.
    pub fn open(&self, profile: &DeviceProfile) -> Result<Channel, ChannelError> {
        let pacing = Pacing::from_profile(profile);

        let link = match self {
            Transport::Serial { path, baud } => Link::Serial(SerialChannel::open(path, *baud)?),
            Transport::Process { command } => Link::Process(ProcessChannel::spawn(command)?),
        };

        Ok(Channel { link, pacing })
    }
}

/// The transport variants a channel can be backed by.
#[derive(Debug)]
enum Link {
    Serial(SerialChannel),
    Process(ProcessChannel),
    Mock(MockChannel),
}

/// An open half-duplex channel to a device under test.
///
/// The channel knows how to move bytes; the half-duplex discipline
/// (at most one outstanding write and one outstanding drain) is the
/// pump's job.
#[derive(Debug)]
pub struct Channel {
    link: Link,
    pacing: Pacing,
}

impl Channel {
    /// A channel backed by a scripted mock device.
    pub fn mock(mock: MockChannel, pacing: Pacing) -> Self {
        Self {
            link: Link::Mock(mock),
            pacing,
        }
    }

    /// Write a payload, chunked and paced per the device profile.
    ///
    /// Aborts early once `comm_timeout` has elapsed since the first
    /// chunk, returning the partial byte count written so far. Partial
    /// writes are reported, not hidden, so the caller can decide
    /// whether to treat them as failure.
    pub async fn write(
        &mut self,
        payload: &[u8],
        comm_timeout: Duration,
    ) -> Result<usize, ChannelError> {
        if payload.is_empty() {
            return Ok(0);
        }

        let chunk_size = if self.pacing.chunk_size == 0 {
            payload.len()
        } else {
            self.pacing.chunk_size
        };

        let started = Instant::now();
        let mut written = 0;

        for chunk in payload.chunks(chunk_size) {
            let n = self.write_raw(chunk).await?;
            written += n;

            if n < chunk.len() {
                // The transport took less than offered. Report the
                // partial count instead of pushing on.
                break;
            }

            if written == payload.len() {
                break;
            }

            tokio::time::sleep(self.pacing.inter_chunk_delay).await;

            if started.elapsed() > comm_timeout {
                warn!(
                    written,
                    total = payload.len(),
                    "Communication timeout mid-write"
                );
                break;
            }
        }

        Ok(written)
    }

    async fn write_raw(&mut self, chunk: &[u8]) -> Result<usize, ChannelError> {
        match &mut self.link {
            Link::Serial(serial) => serial.write_raw(chunk).await,
            Link::Process(process) => process.write_raw(chunk).await,
            Link::Mock(mock) => mock.write_raw(chunk),
        }
    }

    /// Read whatever is currently buffered, possibly nothing.
    ///
    /// Never blocks waiting for output; pacing between reads is the
    /// caller's responsibility.
    pub async fn read(&mut self) -> Result<Vec<u8>, ChannelError> {
        match &mut self.link {
            Link::Serial(serial) => serial.read().await,
            Link::Process(process) => process.read().await,
            Link::Mock(mock) => mock.read(),
        }
    }

    /// How many bytes of device output are pending.
    pub async fn pending_bytes(&mut self) -> usize {
        match &mut self.link {
            Link::Serial(serial) => serial.pending_bytes(),
            Link::Process(process) => process.pending_bytes().await,
            Link::Mock(mock) => mock.pending_bytes(),
        }
    }

    /// Whether any device output is pending.
    pub async fn has_pending_input(&mut self) -> bool {
        self.pending_bytes().await > 0
    }

    /// Whether the transport can currently accept writes.
    pub fn is_writable(&mut self) -> bool {
        match &mut self.link {
            Link::Serial(serial) => serial.is_writable(),
            Link::Process(process) => process.is_writable(),
            Link::Mock(mock) => mock.is_writable(),
        }
    }

    /// Re-establish the transport: reopen the port, or respawn the
    /// subprocess. The backoff before calling this is the pump's call.
    pub fn reconnect(&mut self) -> Result<(), ChannelError> {
        match &mut self.link {
            Link::Serial(serial) => serial.reconnect(),
            Link::Process(process) => process.reconnect(),
            Link::Mock(mock) => mock.reconnect(),
        }
    }
}

/// Outcome of a ready-now poll of an async reader.
pub(crate) enum ReadNow {
    /// Bytes were waiting.
    Data(Vec<u8>),

    /// Nothing buffered right now.
    Empty,

    /// The reader is finished for good.
    Eof,
}

/// Poll a reader for whatever it has *right now*, without ever parking
/// the task. This is what keeps the pump free of background reader
/// tasks: all reads are explicit, time-sliced polls.
pub(crate) async fn read_now<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<ReadNow> {
    let mut scratch = [0u8; 1024];
    let mut read_buf = ReadBuf::new(&mut scratch);

    let outcome = futures::future::poll_fn(|cx| {
        match Pin::new(&mut *reader).poll_read(cx, &mut read_buf) {
            Poll::Ready(Ok(())) => Poll::Ready(Some(Ok(()))),
            Poll::Ready(Err(e)) => Poll::Ready(Some(Err(e))),
            // Nothing buffered; report instead of parking.
            Poll::Pending => Poll::Ready(None),
        }
    })
    .await;

    match outcome {
        None => Ok(ReadNow::Empty),
        Some(Err(e)) => Err(e),
        Some(Ok(())) => {
            let filled = read_buf.filled();

            if filled.is_empty() {
                Ok(ReadNow::Eof)
            } else {
                Ok(ReadNow::Data(filled.to_vec()))
            }
        }
    }
}
