//! # pwrctl
//!
//! Command-line front end for the camera power controller.
//!
//! Without a subcommand it runs as a daemon: the telemetry socket service
//! plus the background battery monitor. The other subcommands send a single
//! request (or a firmware update) and exit.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use pwrctl::config::{Config, LoggingConfig};
use pwrctl::controller::{FanOverride, PowerController, PowerupMode};
use pwrctl::firmware::hex::load_hex_file;
use pwrctl::firmware::update::FirmwareUpdater;
use pwrctl::link::Link;
use pwrctl::serial::PowerSerial;
use pwrctl::telemetry::session::format_battery_block;
use pwrctl::telemetry::{
    BatteryMonitor, CommandShutdownHook, SessionContext, ShutdownHook, TelemetryLogger,
    TelemetryServer,
};

#[derive(Debug, Parser)]
#[command(name = "pwrctl", version, about = "Camera power controller utility")]
struct Cli {
    /// Configuration file (TOML); built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Serial device, overriding the configuration
    #[arg(short, long, global = true)]
    port: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the telemetry socket service and battery monitor
    Daemon,
    /// Flash an Intel HEX image
    Update { hex: PathBuf },
    /// Restart the controller into its bootloader
    JumpBootloader,
    /// Start the controller application from the bootloader
    JumpApp,
    /// Exit 0 when the bootloader is running, 1 when the application is
    InBootloader,
    /// Print battery telemetry
    Battery,
    /// Set the AC power-up/power-down behaviour (0-3)
    SetPowerupMode {
        #[arg(value_parser = clap::value_parser!(u8).range(0..=3))]
        mode: u8,
    },
    PowerupMode,
    /// Override the fan: `off`/`auto` disable the override, 0-255 fixes the speed
    SetFan {
        #[arg(value_parser = parse_fan_setting)]
        setting: FanOverride,
    },
    FanMode,
    SetShippingMode { state: Switch },
    ShippingMode,
    /// Print the application firmware version
    Version,
    ShutdownReason,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

fn parse_fan_setting(text: &str) -> std::result::Result<FanOverride, String> {
    match text {
        "off" | "auto" => Ok(FanOverride::Auto),
        speed => speed
            .parse::<u8>()
            .map(FanOverride::Fixed)
            .map_err(|_| format!("expected off, auto or 0-255, got {:?}", speed)),
    }
}

/// Install the tracing subscriber
///
/// Logs go to stderr, or to a daily rolling file when `logging.dir` is set.
/// The returned guard must live until exit so buffered lines are flushed.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match &config.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "pwrctl.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            Config::load(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => Config::default(),
    };
    if let Some(port) = cli.port {
        config.serial.port = port;
    }
    config.validate()?;

    let _log_guard = init_logging(&config.logging);
    info!("pwrctl v{} starting...", env!("CARGO_PKG_VERSION"));

    let serial =
        PowerSerial::open_with_paths(&[config.serial.port.as_str()], config.serial.baud_rate)?;
    info!("Power controller serial port opened at: {}", serial.device_path());

    let mut link = Link::start(serial.into_stream(), (&config.serial).into());
    let controller = PowerController::new(link.engine());

    let command = cli.command.unwrap_or(Command::Daemon);
    let outcome = run_command(command, &config, controller, &mut link).await;
    link.shutdown().await;
    outcome
}

async fn run_command(
    command: Command,
    config: &Config,
    controller: PowerController,
    link: &mut Link,
) -> Result<ExitCode> {
    match command {
        Command::Daemon => run_daemon(config, controller, link).await?,
        Command::Update { hex } => {
            let records = load_hex_file(&hex)?;
            let settle_delay = Duration::from_millis(config.update.settle_delay_ms);
            let report = FirmwareUpdater::new(controller, settle_delay).run(&records).await?;
            println!(
                "update complete: {} pages erased, {} pages written, {} records skipped",
                report.pages_erased, report.pages_written, report.records_skipped
            );
        }
        Command::JumpBootloader => {
            controller.jump_to_bootloader().await?;
            println!("jumped to bootloader");
        }
        Command::JumpApp => {
            controller.jump_to_program().await?;
            println!("jumped to application");
        }
        Command::InBootloader => {
            if controller.is_in_bootloader().await? {
                println!("in bootloader");
            } else {
                println!("in application");
                return Ok(ExitCode::from(1));
            }
        }
        Command::Battery => {
            print!("{}", format_battery_block(&controller.battery_data().await?))
        }
        Command::SetPowerupMode { mode } => {
            let mode = PowerupMode::from_bits(mode).context("powerup mode out of range")?;
            controller.set_powerup_mode(mode).await?;
            println!("pwrmode{}", mode.bits());
        }
        Command::PowerupMode => println!("pwrmode{}", controller.powerup_mode().await?.bits()),
        Command::SetFan { setting } => {
            controller.set_fan_override(setting).await?;
            println!("{}", setting);
        }
        Command::FanMode => println!("{}", controller.fan_override().await?),
        Command::SetShippingMode { state } => {
            let enabled = matches!(state, Switch::On);
            controller.set_shipping_mode(enabled).await?;
            println!("shipping mode {}", if enabled { "enabled" } else { "disabled" });
        }
        Command::ShippingMode => {
            let enabled = controller.shipping_mode().await?;
            println!("shipping mode {}", if enabled { "enabled" } else { "disabled" });
        }
        Command::Version => {
            let version = controller.app_version().await?;
            println!("application version {}.{}", version >> 8, version & 0xFF);
        }
        Command::ShutdownReason => println!("{}", controller.shutdown_reason().await?),
    }
    Ok(ExitCode::SUCCESS)
}

/// Serve telemetry clients and poll the battery until a signal arrives or the link dies
///
/// # Errors
///
/// Returns an error when the serial link closes, so the process exits
/// non-zero and its supervisor restarts it.
async fn run_daemon(config: &Config, controller: PowerController, link: &mut Link) -> Result<()> {
    let hook: Arc<dyn ShutdownHook> =
        Arc::new(CommandShutdownHook::new(config.shutdown.command.clone()));
    let (stop_tx, stop_rx) = watch::channel(false);

    let ctx = SessionContext {
        controller: controller.clone(),
        shutdown: hook.clone(),
        push_interval: config.telemetry.push_interval(),
    };
    let server = TelemetryServer::bind(&config.telemetry, ctx)?;
    let server_task = tokio::spawn(server.run(stop_rx.clone()));

    let monitor_task = if config.monitor.enabled {
        let logger = if config.monitor.log_enabled {
            Some(TelemetryLogger::new(
                &config.monitor.log_dir,
                config.monitor.max_records_per_file,
                config.monitor.max_files_to_keep,
            )?)
        } else {
            None
        };
        let monitor =
            BatteryMonitor::new(controller, hook, logger, config.monitor.poll_interval());
        Some(tokio::spawn(monitor.run(stop_rx)))
    } else {
        None
    };

    info!("Daemon running, press Ctrl+C to exit");
    let outcome = wait_for_termination(link).await;

    if stop_tx.send(true).is_err() {
        warn!("All daemon tasks already exited");
    }
    if let Some(task) = monitor_task {
        task.await?;
    }
    server_task.await??;
    info!("Daemon stopped");
    outcome
}

/// Wait for SIGINT or SIGTERM (`Ok`) or for the serial link to close (`Err`)
async fn wait_for_termination(link: &mut Link) -> Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate.recv() => info!("Received SIGTERM, shutting down..."),
        _ = link.closed() => {
            error!("Serial link to the power controller closed, exiting");
            bail!("serial link closed");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_command_is_daemon() {
        let cli = Cli::parse_from(["pwrctl"]);
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_fan_setting_parsing() {
        assert_eq!(parse_fan_setting("off"), Ok(FanOverride::Auto));
        assert_eq!(parse_fan_setting("auto"), Ok(FanOverride::Auto));
        assert_eq!(parse_fan_setting("200"), Ok(FanOverride::Fixed(200)));
        assert!(parse_fan_setting("256").is_err());
        assert!(parse_fan_setting("fast").is_err());
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let cli = Cli::parse_from(["pwrctl", "set-powerup-mode", "2", "--port", "/dev/ttyUSB1"]);
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB1"));
        assert!(matches!(cli.command, Some(Command::SetPowerupMode { mode: 2 })));
    }

    #[test]
    fn test_powerup_mode_range_is_enforced() {
        assert!(Cli::try_parse_from(["pwrctl", "set-powerup-mode", "4"]).is_err());
    }

    #[tokio::test]
    async fn test_link_loss_ends_daemon_wait() {
        use pwrctl::link::LinkSettings;
        use pwrctl::serial::port_trait::AsyncWritePort;

        let mut link = Link::from_parts(
            tokio::io::empty(),
            Box::new(AsyncWritePort::new(tokio::io::sink())),
            LinkSettings::default(),
        );
        let outcome =
            tokio::time::timeout(Duration::from_secs(1), wait_for_termination(&mut link))
                .await
                .expect("daemon wait ignored the closed link");
        assert!(outcome.unwrap_err().to_string().contains("serial link closed"));
        link.shutdown().await;
    }

    #[test]
    fn test_update_takes_hex_path() {
        let cli = Cli::parse_from(["pwrctl", "update", "fw.hex"]);
        match cli.command {
            Some(Command::Update { hex }) => assert_eq!(hex, PathBuf::from("fw.hex")),
            other => panic!("unexpected command {:?}", other),
        }
    }
}
