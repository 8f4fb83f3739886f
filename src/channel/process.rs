use std::process::Stdio;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{info, warn};

use crate::channel::{error::ChannelError, read_now, ReadNow};

/// A pipe-backed subprocess standing in for a device.
///
/// Commands go to its stdin; stdout and stderr both count as device
/// output. A disconnect is the process exiting, and "reconnect" means
/// respawning the same command line.
#[derive(Debug)]
pub struct ProcessChannel {
    command: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    buffered: BytesMut,
}

impl ProcessChannel {
    /// Spawn the stand-in process. The command line is split on
    /// whitespace; the first token is the program.
    pub fn spawn(command: &str) -> Result<Self, ChannelError> {
        let mut parts = command.split_whitespace();

        let program = parts.next().ok_or_else(|| ChannelError::Spawn {
            command: command.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command line"),
        })?;

        info!(%command, "Spawning stand-in process");

        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ChannelError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        Ok(Self {
            command: command.to_string(),
            child,
            stdin,
            stdout,
            stderr,
            buffered: BytesMut::new(),
        })
    }

    pub(crate) async fn write_raw(&mut self, chunk: &[u8]) -> Result<usize, ChannelError> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(ChannelError::Disconnected);
        };

        match stdin.write(chunk).await {
            Ok(n) => {
                // Pipes buffer; push it through so the child sees the
                // command now, not at some flush boundary.
                stdin.flush().await?;
                Ok(n)
            }
            Err(e) => {
                warn!(?e, "Write to subprocess failed");
                self.stdin = None;
                Err(e.into())
            }
        }
    }

    /// Pull whatever stdout and stderr have ready into the internal
    /// buffer, without parking.
    async fn fill_buffer(&mut self) {
        if let Some(stdout) = self.stdout.as_mut() {
            match read_now(stdout).await {
                Ok(ReadNow::Data(bytes)) => self.buffered.extend_from_slice(&bytes),
                Ok(ReadNow::Empty) => {}
                Ok(ReadNow::Eof) | Err(_) => self.stdout = None,
            }
        }

        if let Some(stderr) = self.stderr.as_mut() {
            match read_now(stderr).await {
                Ok(ReadNow::Data(bytes)) => self.buffered.extend_from_slice(&bytes),
                Ok(ReadNow::Empty) => {}
                Ok(ReadNow::Eof) | Err(_) => self.stderr = None,
            }
        }
    }

    pub(crate) async fn read(&mut self) -> Result<Vec<u8>, ChannelError> {
        self.fill_buffer().await;

        if self.buffered.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(self.buffered.split().to_vec())
        }
    }

    pub(crate) async fn pending_bytes(&mut self) -> usize {
        self.fill_buffer().await;

        self.buffered.len()
    }

    pub(crate) fn is_writable(&mut self) -> bool {
        if self.stdin.is_none() {
            return false;
        }

        // A child that has exited cannot take commands.
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                warn!(%status, "Stand-in process exited");
                self.stdin = None;
                false
            }
            Err(e) => {
                warn!(?e, "Could not query stand-in process");
                false
            }
        }
    }

    pub(crate) fn reconnect(&mut self) -> Result<(), ChannelError> {
        info!(command = %self.command, "Respawning stand-in process");

        let respawned = Self::spawn(&self.command)?;

        // Unread output from the old process is still valid device
        // output; keep it buffered.
        let buffered = self.buffered.split();
        *self = respawned;
        self.buffered = buffered;

        Ok(())
    }
}
