use thiserror::Error;

use crate::channel::ChannelError;

/// Errors that may occur in this library.
#[derive(Debug, Error)]
pub enum Error {
    /// A configuration value does not make sense.
    #[error("Bad configuration: {0}")]
    BadConfig(String),

    /// The requested device profile is not built in and not in the
    /// profile file (if one was given).
    #[error("No such device profile: `{0}`")]
    NoSuchProfile(String),

    /// The device did not signal that it finished setting up within the
    /// allotted time, so the run never started.
    #[error("Device setup did not complete: {0}")]
    SetupFailed(String),

    /// A problem on the channel to the device.
    #[error("Channel problem")]
    Channel(#[from] ChannelError),

    /// IO outside the channel, e.g. script or transcript files.
    #[error("IO problem")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get the inner message if this is a [`Error::BadConfig`].
    pub fn try_into_bad_config(self) -> Result<String, Self> {
        if let Self::BadConfig(msg) = self {
            Ok(msg)
        } else {
            Err(self)
        }
    }
}
