use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{info, warn};

use crate::channel::{error::ChannelError, read_now, ReadNow};

/// A live serial port to a device under test.
///
/// The stream is dropped on any IO error so that a disconnect shows up
/// as not-writable, letting the pump drive the reconnect policy.
pub struct SerialChannel {
    path: String,
    baud: u32,
    stream: Option<SerialStream>,
}

impl std::fmt::Debug for SerialChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialChannel")
            .field("path", &self.path)
            .field("baud", &self.baud)
            .field("connected", &self.stream.is_some())
            .finish()
    }
}

fn try_open(path: &str, baud: u32) -> Result<SerialStream, ChannelError> {
    tokio_serial::new(path, baud)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|source| ChannelError::Open {
            path: path.to_string(),
            source,
        })
}

impl SerialChannel {
    /// Open the port. The tty should likely be along the lines of
    /// `/dev/ttyACMx` on unix, and `COMx` on Windows.
    pub fn open(path: &str, baud: u32) -> Result<Self, ChannelError> {
        info!(%path, %baud, "Opening serial port");

        let stream = try_open(path, baud)?;

        Ok(Self {
            path: path.to_string(),
            baud,
            stream: Some(stream),
        })
    }

    pub(crate) async fn write_raw(&mut self, chunk: &[u8]) -> Result<usize, ChannelError> {
        use tokio::io::AsyncWriteExt;

        let Some(stream) = self.stream.as_mut() else {
            return Err(ChannelError::Disconnected);
        };

        match stream.write(chunk).await {
            Ok(n) => Ok(n),
            Err(e) => {
                warn!(?e, "Serial write failed, marking port disconnected");
                self.stream = None;
                Err(e.into())
            }
        }
    }

    pub(crate) async fn read(&mut self) -> Result<Vec<u8>, ChannelError> {
        // Reading from a disconnected port yields nothing; the pump
        // discovers the disconnect on its next write.
        let Some(stream) = self.stream.as_mut() else {
            return Ok(Vec::new());
        };

        match read_now(stream).await {
            Ok(ReadNow::Data(bytes)) => Ok(bytes),
            Ok(ReadNow::Empty) => Ok(Vec::new()),
            Ok(ReadNow::Eof) => {
                warn!("Serial port EOF, marking port disconnected");
                self.stream = None;
                Ok(Vec::new())
            }
            Err(e) => {
                warn!(?e, "Serial read failed, marking port disconnected");
                self.stream = None;
                Err(e.into())
            }
        }
    }

    pub(crate) fn pending_bytes(&mut self) -> usize {
        match self.stream.as_ref().map(|s| s.bytes_to_read()) {
            Some(Ok(n)) => n as usize,
            Some(Err(e)) => {
                warn!(?e, "Could not query pending bytes, marking port disconnected");
                self.stream = None;
                0
            }
            None => 0,
        }
    }

    pub(crate) fn is_writable(&self) -> bool {
        self.stream.is_some()
    }

    pub(crate) fn reconnect(&mut self) -> Result<(), ChannelError> {
        info!(path = %self.path, "Reconnecting serial port");

        self.stream = Some(try_open(&self.path, self.baud)?);

        Ok(())
    }
}
