use clap::Parser;
use color_eyre::Result;
use serial_bench::{
    cli,
    config::Profiles,
    logging,
    pump::CommandPump,
    script::Script,
    transcript::Transcript,
};
use tracing::{debug, info, warn, Level};

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = cli::Cli::parse();

    if let Some(command) = cli.command.take() {
        cli::handle_command(command);

        return Ok(());
    }

    let file_logging = cli.log_dir.clone().map(|dir| (Level::DEBUG, dir));
    logging::init(Level::INFO, file_logging).await;

    let profiles = if let Some(path) = &cli.profiles {
        debug!(?path, "Profiles from path");
        Profiles::builtin_with_overrides(Profiles::new_from_path(path))
    } else {
        debug!("Built-in profiles");
        Profiles::builtin()
    };
    profiles.validate()?;

    let plan = cli.resolve(&profiles)?;

    let script = Script::new_from_path(&plan.input)?;
    debug!(lines = script.len(), "Script loaded");

    let transcript = Transcript::create(&plan.output)?;
    let channel = plan.transport.open(&plan.profile)?;

    let mut pump = CommandPump::new(plan.profile, channel, transcript);
    pump.set_comm_timeout(plan.comm_timeout);
    if let Some(timeout) = plan.test_timeout {
        pump.set_test_timeout(timeout);
    }

    if plan.skip_setup {
        debug!("Skipping setup wait");
    } else {
        pump.await_setup().await?;
    }

    let report = tokio::select! {
        report = pump.run(script) => report,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting");
            std::process::exit(130);
        }
    };

    if plan.reset {
        if let Err(e) = pump.reset_device().await {
            warn!(?e, "Device reset failed");
        }
    }

    info!(
        sent = report.lines_sent,
        received = report.lines_received,
        ?report.outcome,
        "Run finished"
    );

    println!("Num of Errors: {}", report.errors);

    std::process::exit(report.exit_code());
}
