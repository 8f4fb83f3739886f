use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// The append-only record of everything the device printed during a run.
///
/// Written with whatever decoding was recoverable from the device and
/// never read back by the pump; it exists for post-run inspection.
/// Each append is flushed so an aborted run keeps everything received
/// up to the failure.
pub struct Transcript {
    sink: Box<dyn Write + Send>,
}

impl std::fmt::Debug for Transcript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transcript").finish_non_exhaustive()
    }
}

impl Transcript {
    /// A transcript backed by a file at the given path.
    /// Truncates anything already there.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::create(path)?;

        Ok(Self::from_writer(BufWriter::new(file)))
    }

    /// A transcript backed by any writer. Tests use in-memory buffers.
    pub fn from_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            sink: Box::new(writer),
        }
    }

    /// Append one received line.
    pub fn append_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.sink, "{line}")?;
        self.sink.flush()
    }
}
