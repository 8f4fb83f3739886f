use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::channel::error::ChannelError;

/// Splits incoming byte streams on a configurable delimiter and frames
/// outgoing commands with a terminator sequence.
///
/// A trailing carriage return before the delimiter is dropped, since
/// UART devices usually terminate lines with `\r\n` while we delimit
/// on `\n`.
#[derive(Debug, Clone)]
pub struct LinesCodec {
    /// How far we have looked for a delimiter into the buffer.
    cursor: usize,

    /// How to delimit incoming byte streams.
    /// Not included in the yielded frames.
    read_delimiter: u8,

    /// Appended to each encoded command.
    write_terminator: Vec<u8>,
}

impl LinesCodec {
    /// Create a new codec.
    pub fn new(read_delimiter: u8, write_terminator: &[u8]) -> Self {
        Self {
            cursor: 0,
            read_delimiter,
            write_terminator: write_terminator.to_vec(),
        }
    }

    /// Frame one outgoing command: the command bytes with the
    /// terminator appended. An empty command frames to a bare
    /// terminator.
    pub fn frame(&self, command: &[u8]) -> Vec<u8> {
        let mut framed = Vec::with_capacity(command.len() + self.write_terminator.len());
        framed.extend_from_slice(command);
        framed.extend_from_slice(&self.write_terminator);

        framed
    }
}

impl Default for LinesCodec {
    fn default() -> Self {
        Self::new(b'\n', b"\r\n")
    }
}

impl Decoder for LinesCodec {
    type Item = Vec<u8>;
    type Error = ChannelError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let read_to = src.len();

        let look_at = &src[self.cursor..read_to];

        if let Some(position) = look_at.iter().position(|&byte| byte == self.read_delimiter) {
            // Since we might "start late" in the buffer (from the cursor),
            // the "global" position within the buffer has to be calculated.
            let actual_position = self.cursor + position;

            // Next time we need to start over.
            self.cursor = 0;

            // Split at the delimiter, getting a slice of the bytes before it.
            let line = src.split_to(actual_position);

            // Discard the delimiter by advancing the source buffer beyond it.
            src.advance(1);

            let line = match line.last() {
                Some(b'\r') => &line[..line.len() - 1],
                _ => &line[..],
            };

            Ok(Some(line.to_vec()))
        } else {
            // No full frame yet. The next call gets the same buffer,
            // possibly with more data; no need to re-scan what we have
            // already looked at.
            self.cursor = read_to;

            Ok(None)
        }
    }
}

impl Encoder<Vec<u8>> for LinesCodec {
    type Error = ChannelError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item);
        dst.extend_from_slice(&self.write_terminator);

        Ok(())
    }
}

/// Accumulates raw channel reads and hands out complete decoded lines.
///
/// Partial lines stay buffered across reads until their delimiter
/// arrives; decoding is lossy, so garbled bytes degrade instead of
/// failing the run.
#[derive(Debug)]
pub struct LineBuffer {
    codec: LinesCodec,
    buf: BytesMut,
}

impl LineBuffer {
    /// A buffer splitting on the given delimiter.
    pub fn new(read_delimiter: u8) -> Self {
        Self {
            codec: LinesCodec::new(read_delimiter, b""),
            buf: BytesMut::new(),
        }
    }

    /// Feed bytes read from the channel.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// The next complete line, lossily decoded, if one is buffered.
    pub fn next_line(&mut self) -> Option<String> {
        match self.codec.decode(&mut self.buf) {
            Ok(Some(line)) => Some(String::from_utf8_lossy(&line).to_string()),
            _ => None,
        }
    }

    /// Whatever is left without a terminating delimiter.
    /// Used when a run finishes and a final partial line may still
    /// matter.
    pub fn take_partial(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }

        self.codec.cursor = 0;
        let rest = self.buf.split();

        Some(String::from_utf8_lossy(&rest).to_string())
    }

    /// Whether any undecoded bytes remain.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn splits_lines() {
        let mut lines = LineBuffer::new(b'\n');

        lines.extend(b"pong\r\nbye\r\n");

        assert_eq!(lines.next_line().as_deref(), Some("pong"));
        assert_eq!(lines.next_line().as_deref(), Some("bye"));
        assert_eq!(lines.next_line(), None);
        assert!(lines.is_empty());
    }

    #[test]
    fn partial_line_waits_for_delimiter() {
        let mut lines = LineBuffer::new(b'\n');

        lines.extend(b"po");
        assert_eq!(lines.next_line(), None);

        lines.extend(b"ng\n");
        assert_eq!(lines.next_line().as_deref(), Some("pong"));
    }

    #[test]
    fn chunked_arrival_across_many_reads() {
        let mut lines = LineBuffer::new(b'\n');

        for chunk in [&b"3 tests"[..], b" ran,", b" 1 failed", b"\r", b"\n"] {
            assert_eq!(lines.next_line(), None);
            lines.extend(chunk);
        }

        assert_eq!(lines.next_line().as_deref(), Some("3 tests ran, 1 failed"));
    }

    #[test]
    fn bare_lf_lines_pass_through() {
        let mut lines = LineBuffer::new(b'\n');

        lines.extend(b"hello\n");

        assert_eq!(lines.next_line().as_deref(), Some("hello"));
    }

    #[test]
    fn invalid_utf8_is_lossy_not_fatal() {
        let mut lines = LineBuffer::new(b'\n');

        lines.extend(b"ok \xff\xfe garbled\n");

        let line = lines.next_line().unwrap();
        assert!(line.starts_with("ok "));
        assert!(line.ends_with(" garbled"));
    }

    #[test]
    fn take_partial_yields_leftover() {
        let mut lines = LineBuffer::new(b'\n');

        lines.extend(b"complete\nno newline yet");

        assert_eq!(lines.next_line().as_deref(), Some("complete"));
        assert_eq!(lines.next_line(), None);
        assert_eq!(lines.take_partial().as_deref(), Some("no newline yet"));
        assert!(lines.is_empty());
    }

    #[test]
    fn encoder_appends_terminator() {
        let mut codec = LinesCodec::new(b'\n', b"\r\n");
        let mut dst = BytesMut::new();

        codec.encode(b"ping".to_vec(), &mut dst).unwrap();

        assert_eq!(&dst[..], b"ping\r\n");
    }

    #[test]
    fn empty_command_encodes_bare_terminator() {
        let mut codec = LinesCodec::new(b'\n', b"\r\n");
        let mut dst = BytesMut::new();

        codec.encode(Vec::new(), &mut dst).unwrap();

        assert_eq!(&dst[..], b"\r\n");
    }
}
