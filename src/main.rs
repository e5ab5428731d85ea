use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sensor_mesh::config::file;
use sensor_mesh::config::settings::{
    DEFAULT_CHECK_INTERVAL, DEFAULT_CONNECT_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL,
    DEFAULT_MAX_LIVE_INTERVAL, DEFAULT_REQUEST_TIMEOUT,
};
use sensor_mesh::{DriverRegistry, MonitorSettings, Tier, TierRole};

/// Sensor Mesh - one tier of a hierarchical sensor monitoring network
#[derive(Parser)]
#[command(name = "sensor-mesh", version, about)]
struct Cli {
    /// Role this process plays
    #[arg(short, long, value_enum, env = "SENSOR_MESH_ROLE")]
    role: TierRole,

    /// Snapshot file (json, toml or yaml); defaults to ~/.config/sensor-mesh/<role>.*
    #[arg(short, long, env = "SENSOR_MESH_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds between heartbeats to the parent
    #[arg(long, env = "SENSOR_MESH_HEARTBEAT_INTERVAL", default_value_t = DEFAULT_HEARTBEAT_INTERVAL.as_secs())]
    heartbeat_interval: u64,

    /// Seconds between registry sweeps
    #[arg(long, env = "SENSOR_MESH_CHECK_INTERVAL", default_value_t = DEFAULT_CHECK_INTERVAL.as_secs())]
    check_interval: u64,

    /// Seconds of silence after which a child is evicted
    #[arg(long, env = "SENSOR_MESH_MAX_LIVE_INTERVAL", default_value_t = DEFAULT_MAX_LIVE_INTERVAL.as_secs())]
    max_live_interval: u64,

    /// Seconds to wait for outbound connections
    #[arg(long, env = "SENSOR_MESH_CONNECT_TIMEOUT", default_value_t = DEFAULT_CONNECT_TIMEOUT.as_secs())]
    connect_timeout: u64,

    /// Seconds to wait for outbound requests to complete
    #[arg(long, env = "SENSOR_MESH_REQUEST_TIMEOUT", default_value_t = DEFAULT_REQUEST_TIMEOUT.as_secs())]
    request_timeout: u64,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Validate the snapshot file and print it as normalised JSON
    Check,
    /// List the sensor types this build can drive
    Drivers,
}

impl Cli {
    const fn settings(&self) -> MonitorSettings {
        MonitorSettings {
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval),
            check_interval: Duration::from_secs(self.check_interval),
            max_live_interval: Duration::from_secs(self.max_live_interval),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            request_timeout: Duration::from_secs(self.request_timeout),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity; RUST_LOG wins when set
    let filter = match cli.verbose {
        0 => "info,sensor_mesh=info",
        1 => "info,sensor_mesh=debug",
        2 => "debug",
        _ => "trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Command::Check) => return cmd_check(cli.role, cli.config.as_deref()),
        Some(Command::Drivers) => {
            cmd_drivers();
            return Ok(());
        }
        None => {}
    }

    let settings = cli.settings();
    let path = file::resolve_path(cli.config.as_deref(), cli.role)?;
    let snapshot = file::load_snapshot(&path, cli.role)?;

    tracing::info!(
        role = %cli.role,
        id = %snapshot.id,
        listen = %snapshot.listen_addr(),
        "starting sensor mesh tier"
    );
    tracing::debug!(?settings, "monitor settings");

    let tier = Tier::new(cli.role, settings)?;
    tier.run(snapshot).await?;

    tracing::info!("tier stopped");
    Ok(())
}

fn cmd_check(role: TierRole, explicit: Option<&Path>) -> anyhow::Result<()> {
    let path = file::resolve_path(explicit, role)?;
    let snapshot = file::load_snapshot(&path, role)?;
    DriverRegistry::with_builtin().validate(&snapshot)?;

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

fn cmd_drivers() {
    for name in DriverRegistry::with_builtin().types() {
        println!("{name}");
    }
}
