use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::{
    channel::Transport,
    config::{DeviceProfile, Profiles},
    error::Error,
};

/// The command line interface for serial bench.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Device family to drive, e.g. `mxchip`, `esp32` or `process`.
    #[arg(short, long)]
    pub device: Option<String>,

    /// Serial port path. Likely `/dev/ttyACMx` on unix, `COMx` on
    /// Windows.
    #[arg(short, long)]
    pub port: Option<String>,

    /// Command line of a local process standing in for a device.
    #[arg(long, conflicts_with = "port")]
    pub run: Option<String>,

    /// Baud rate, overriding the device profile.
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// Write chunk size in bytes, overriding the device profile.
    /// `0` means unbounded writes.
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Input script file, one command per line.
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Output transcript file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Extra device profiles from a RON file. Profiles named like a
    /// built-in replace it.
    #[arg(long)]
    pub profiles: Option<PathBuf>,

    /// Communication timeout in seconds, bounding one chunked write.
    #[arg(long, default_value_t = 60)]
    pub comm_timeout: u64,

    /// Bound the whole run by this many seconds of wall clock.
    #[arg(long)]
    pub test_timeout: Option<u64>,

    /// Do not wait for the device's setup marker before running.
    #[arg(long)]
    pub skip_setup: bool,

    /// Reset the device after the run.
    #[arg(long)]
    pub reset: bool,

    /// Also log to daily-rolling files in this directory.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Commands available in the command line interface.
#[derive(Subcommand)]
pub enum Commands {
    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),
}

/// Helpful examples for users.
#[derive(Subcommand, Clone)]
pub enum Examples {
    /// Show an example of a profile file's contents.
    Config,

    /// Show an example input script.
    Script,
}

/// Print the requested example.
pub fn handle_command(command: Commands) {
    match command {
        Commands::Examples(Examples::Config) => {
            println!("{}", Profiles::example().serialize_pretty());
        }
        Commands::Examples(Examples::Script) => {
            println!("set_wifi my-ssid my-password");
            println!("set_az_iothub <connection string>");
            println!("send_telemetry hello");
            println!("exit");
        }
    }
}

/// Everything a run needs, resolved and validated from the command
/// line. Configuration problems are caught here, before the pump ever
/// starts.
#[derive(Debug)]
pub struct RunPlan {
    /// The selected device profile, CLI overrides applied.
    pub profile: DeviceProfile,

    /// Where the device is reachable.
    pub transport: Transport,

    /// The script to execute.
    pub input: PathBuf,

    /// Where the transcript goes.
    pub output: PathBuf,

    /// Bound on one chunked write.
    pub comm_timeout: Duration,

    /// Optional bound on the whole run.
    pub test_timeout: Option<Duration>,

    /// Skip the setup wait.
    pub skip_setup: bool,

    /// Reset the device after the run.
    pub reset: bool,
}

impl Cli {
    /// Resolve the command line into a run plan.
    pub fn resolve(&self, profiles: &Profiles) -> Result<RunPlan, Error> {
        let device = self
            .device
            .as_deref()
            .ok_or_else(|| Error::BadConfig("No device family given, use `--device`.".into()))?;

        let mut profile = profiles
            .find(device)
            .cloned()
            .ok_or_else(|| Error::NoSuchProfile(device.to_string()))?;

        if let Some(baud) = self.baud {
            profile.baud = baud;
        }
        if let Some(chunk_size) = self.chunk_size {
            profile.chunk_size = chunk_size;
        }

        let transport = match (&self.port, &self.run) {
            (Some(path), None) => Transport::Serial {
                path: path.clone(),
                baud: profile.baud,
            },
            (None, Some(command)) => Transport::Process {
                command: command.clone(),
            },
            (None, None) => {
                return Err(Error::BadConfig(
                    "No transport given, use `--port` or `--run`.".into(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(Error::BadConfig(
                    "Both `--port` and `--run` given, pick one.".into(),
                ))
            }
        };

        let input = self
            .input
            .clone()
            .ok_or_else(|| Error::BadConfig("No input script given, use `--input`.".into()))?;

        let output = self
            .output
            .clone()
            .ok_or_else(|| Error::BadConfig("No output file given, use `--output`.".into()))?;

        Ok(RunPlan {
            profile,
            transport,
            input,
            output,
            comm_timeout: Duration::from_secs(self.comm_timeout),
            test_timeout: self.test_timeout.map(Duration::from_secs),
            skip_setup: self.skip_setup,
            reset: self.reset,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("serial-bench").chain(args.iter().copied()))
    }

    #[test]
    fn resolves_serial_run() {
        let cli = cli(&[
            "-d", "mxchip", "-p", "/dev/ttyACM0", "-i", "in.txt", "-o", "out.txt",
        ]);

        let plan = cli.resolve(&Profiles::builtin()).unwrap();

        assert_eq!(
            plan.transport,
            Transport::Serial {
                path: "/dev/ttyACM0".into(),
                baud: 115_200,
            }
        );
    }

    #[test]
    fn baud_override_reaches_transport() {
        let cli = cli(&[
            "-d", "mxchip", "-p", "/dev/ttyACM0", "-b", "9600", "-i", "in.txt", "-o", "out.txt",
        ]);

        let plan = cli.resolve(&Profiles::builtin()).unwrap();

        assert_eq!(plan.profile.baud, 9600);
        assert_eq!(
            plan.transport,
            Transport::Serial {
                path: "/dev/ttyACM0".into(),
                baud: 9600,
            }
        );
    }

    #[test]
    fn unknown_device_family() {
        let cli = cli(&["-d", "toaster", "-p", "/dev/ttyACM0", "-i", "a", "-o", "b"]);

        let err = cli.resolve(&Profiles::builtin()).unwrap_err();

        assert!(matches!(err, Error::NoSuchProfile(name) if name == "toaster"));
    }

    #[test]
    fn missing_transport_is_caught() {
        let cli = cli(&["-d", "mxchip", "-i", "a", "-o", "b"]);

        let err = cli
            .resolve(&Profiles::builtin())
            .unwrap_err()
            .try_into_bad_config()
            .unwrap();

        assert!(err.contains("--port"));
    }
}
