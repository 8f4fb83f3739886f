//! A mock channel which plays the device's side of a session.
//!
//! Useful for testing the pump against serial-port-shaped behavior
//! (scripted replies, chunked arrival, dropped connections), but faster
//! and more reliable than actual hardware.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::BytesMut;

use crate::channel::error::ChannelError;

/// What the mock observed, shared with the test that built it.
#[derive(Debug, Default)]
pub struct MockRecord {
    /// Byte count of every accepted raw write, in order. Chunked writes
    /// show up as one entry per chunk.
    pub write_sizes: Vec<usize>,

    /// Complete commands received, terminators stripped.
    pub commands: Vec<String>,

    /// How many reconnects were attempted.
    pub reconnects: usize,
}

/// A cloneable view into a mock's [`MockRecord`], readable after the
/// pump has consumed the channel itself.
#[derive(Debug, Clone)]
pub struct MockRecorder(Arc<Mutex<MockRecord>>);

impl MockRecorder {
    /// Byte counts of accepted raw writes.
    pub fn write_sizes(&self) -> Vec<usize> {
        self.0.lock().unwrap().write_sizes.clone()
    }

    /// Complete commands the device saw.
    pub fn commands(&self) -> Vec<String> {
        self.0.lock().unwrap().commands.clone()
    }

    /// Reconnect attempts.
    pub fn reconnects(&self) -> usize {
        self.0.lock().unwrap().reconnects
    }
}

/// Builder for a [`MockChannel`].
#[derive(Debug, Default)]
pub struct MockBuilder {
    replies: Vec<(String, Vec<String>)>,
    echo: bool,
    banner: Vec<String>,
    raw_banner: Vec<u8>,
    staged: VecDeque<Vec<u8>>,
    read_burst: usize,
    deny_writable: usize,
    die_after_commands: Option<usize>,
    reconnect_succeeds: bool,
    terminator: Option<String>,
}

impl MockBuilder {
    /// Start a new builder. By default the device is silent, healthy,
    /// and reconnectable.
    pub fn new() -> Self {
        Self {
            reconnect_succeeds: true,
            ..Default::default()
        }
    }

    /// When a received command contains `trigger`, emit these lines.
    /// First matching trigger wins.
    pub fn reply<S: AsRef<str>>(mut self, trigger: &str, lines: &[S]) -> Self {
        self.replies.push((
            trigger.to_string(),
            lines.iter().map(|l| l.as_ref().to_string()).collect(),
        ));
        self
    }

    /// Echo every received command back, terminator appended.
    pub fn echo(mut self) -> Self {
        self.echo = true;
        self
    }

    /// Output already pending before anything is written, like a boot
    /// banner.
    pub fn banner<S: AsRef<str>>(mut self, lines: &[S]) -> Self {
        self.banner = lines.iter().map(|l| l.as_ref().to_string()).collect();
        self
    }

    /// Pending output as raw bytes, no terminator appended. Useful for
    /// emulating a device cut off mid-line.
    pub fn raw_banner(mut self, bytes: &[u8]) -> Self {
        self.raw_banner.extend_from_slice(bytes);
        self
    }

    /// Queue output that arrives late: each burst becomes pending only
    /// after a read has found the device quiet. Emulates trailing
    /// asynchronous output such as a delayed test summary.
    pub fn stage_late<S: AsRef<str>>(mut self, lines: &[S]) -> Self {
        let mut burst = Vec::new();
        for line in lines {
            burst.extend_from_slice(line.as_ref().as_bytes());
            burst.extend_from_slice(b"\r\n");
        }
        self.staged.push_back(burst);
        self
    }

    /// Return at most this many bytes per read, emulating chunked
    /// arrival. `0` means everything pending at once.
    pub fn read_burst(mut self, bytes: usize) -> Self {
        self.read_burst = bytes;
        self
    }

    /// Report not-writable for the next `times` writability checks.
    pub fn deny_writable(mut self, times: usize) -> Self {
        self.deny_writable = times;
        self
    }

    /// Drop the connection for good once this many complete commands
    /// have been received. Emulates a device dying mid-script.
    pub fn die_after_commands(mut self, commands: usize) -> Self {
        self.die_after_commands = Some(commands);
        self
    }

    /// Make every reconnect attempt fail.
    pub fn reconnect_fails(mut self) -> Self {
        self.reconnect_succeeds = false;
        self
    }

    /// Terminator appended to emitted lines. Defaults to `\r\n`, which
    /// is what UART firmware prints.
    pub fn terminator(mut self, terminator: &str) -> Self {
        self.terminator = Some(terminator.to_string());
        self
    }

    /// Build the mock.
    #[must_use]
    pub fn build(self) -> MockChannel {
        let mut pending = BytesMut::new();
        for line in &self.banner {
            pending.extend_from_slice(line.as_bytes());
            pending.extend_from_slice(b"\r\n");
        }
        pending.extend_from_slice(&self.raw_banner);

        MockChannel {
            replies: self.replies,
            echo: self.echo,
            staged: self.staged,
            read_burst: self.read_burst,
            deny_writable: self.deny_writable,
            die_after_commands: self.die_after_commands,
            reconnect_succeeds: self.reconnect_succeeds,
            terminator: self.terminator.unwrap_or_else(|| "\r\n".into()),
            writable: true,
            partial: BytesMut::new(),
            pending,
            record: Arc::new(Mutex::new(MockRecord::default())),
        }
    }
}

/// The scripted device itself. See [`MockBuilder`].
#[derive(Debug)]
pub struct MockChannel {
    replies: Vec<(String, Vec<String>)>,
    echo: bool,
    staged: VecDeque<Vec<u8>>,
    read_burst: usize,
    deny_writable: usize,
    die_after_commands: Option<usize>,
    reconnect_succeeds: bool,
    terminator: String,
    writable: bool,
    partial: BytesMut,
    pending: BytesMut,
    record: Arc<Mutex<MockRecord>>,
}

impl MockChannel {
    /// A view into what the mock observes, for assertions after the
    /// channel has been consumed by a run.
    pub fn recorder(&self) -> MockRecorder {
        MockRecorder(Arc::clone(&self.record))
    }

    pub(crate) fn write_raw(&mut self, chunk: &[u8]) -> Result<usize, ChannelError> {
        if !self.writable {
            return Err(ChannelError::Disconnected);
        }

        self.record.lock().unwrap().write_sizes.push(chunk.len());
        self.partial.extend_from_slice(chunk);

        // Act on every complete command line received so far.
        while let Some(position) = self.partial.iter().position(|&b| b == b'\n') {
            let line = self.partial.split_to(position + 1);
            let command = String::from_utf8_lossy(&line)
                .trim_end_matches(['\r', '\n'])
                .to_string();

            self.respond_to(&command);
            self.record.lock().unwrap().commands.push(command);
        }

        Ok(chunk.len())
    }

    fn respond_to(&mut self, command: &str) {
        if self.echo {
            self.pending.extend_from_slice(command.as_bytes());
            self.pending.extend_from_slice(self.terminator.as_bytes());
        }

        let reply = self
            .replies
            .iter()
            .find(|(trigger, _)| command.contains(trigger.as_str()));

        if let Some((_, lines)) = reply {
            for line in lines {
                self.pending.extend_from_slice(line.as_bytes());
                self.pending.extend_from_slice(self.terminator.as_bytes());
            }
        }
    }

    pub(crate) fn read(&mut self) -> Result<Vec<u8>, ChannelError> {
        if self.pending.is_empty() {
            // A quiet device; late output (if any) arrives after this
            // poll came up empty.
            if let Some(burst) = self.staged.pop_front() {
                self.pending.extend_from_slice(&burst);
            }

            return Ok(Vec::new());
        }

        let n = if self.read_burst == 0 {
            self.pending.len()
        } else {
            self.read_burst.min(self.pending.len())
        };

        Ok(self.pending.split_to(n).to_vec())
    }

    pub(crate) fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_writable(&mut self) -> bool {
        if let Some(limit) = self.die_after_commands {
            if self.record.lock().unwrap().commands.len() >= limit {
                self.writable = false;
            }
        }

        if self.deny_writable > 0 {
            self.deny_writable -= 1;
            self.writable = false;
        }

        self.writable
    }

    pub(crate) fn reconnect(&mut self) -> Result<(), ChannelError> {
        self.record.lock().unwrap().reconnects += 1;

        if self.reconnect_succeeds {
            self.writable = true;
            Ok(())
        } else {
            Err(ChannelError::Disconnected)
        }
    }
}
