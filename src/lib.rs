#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

/// The command line interface.
pub mod cli;

/// Device profiles and run configuration.
pub mod config;

/// The channel over which we talk to a device: serial port, subprocess,
/// or a scripted mock.
pub mod channel;

/// Classification of received lines, and the error tally a run produces.
pub mod classify;

/// The command/response pump which executes a script against a channel.
pub mod pump;

/// Input script files.
pub mod script;

/// The transcript of everything a device printed during a run.
pub mod transcript;

/// Possible errors in this library.
pub mod error;

/// Logging/tracing setup.
pub mod logging;
