use std::io;

use thiserror::Error;

/// Any error the channel layer might encounter.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// IO related errors.
    #[error("Underlying IO problem")]
    Io(#[from] io::Error),

    /// The transport is gone and a write or reconnect was attempted.
    #[error("Channel disconnected")]
    Disconnected,

    /// The serial port could not be opened.
    #[error("Could not open serial port `{path}`")]
    Open {
        /// The tty path.
        path: String,

        /// The underlying driver problem.
        #[source]
        source: tokio_serial::Error,
    },

    /// The stand-in subprocess could not be spawned.
    #[error("Could not spawn `{command}`")]
    Spawn {
        /// The command line.
        command: String,

        /// The underlying problem.
        #[source]
        source: io::Error,
    },
}
