//! corrald — the Corral node daemon.
//!
//! Runs on every host the bootstrap pipeline drives. Assembles:
//! - State store (redb) holding markers, membership and tokens
//! - Container runtime probe/installer
//! - Node (initialize, join, tokens, member view)
//! - Replica sync loop for non-leader managers
//! - REST API, peer endpoints and `/metrics`
//!
//! # Usage
//!
//! ```text
//! corrald serve --hostname swarm-master-1 --address 10.0.0.11 --data-dir /var/lib/corral
//! corrald serve --config /etc/corral/corrald.toml
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use corral_core::config::DEFAULT_API_PORT;
use corral_core::{NodeConfig, Role, RuntimeSettings};

mod serve;

#[derive(Parser)]
#[command(name = "corrald", about = "Corral node daemon", version)]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Serve this host's bootstrap API.
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Node config file (TOML). Replaces the flags below.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Hostname this node registers under.
    #[arg(long, required_unless_present = "config")]
    hostname: Option<String>,

    /// Address other hosts reach this daemon on.
    #[arg(long, required_unless_present = "config")]
    address: Option<String>,

    /// Port to listen on.
    #[arg(long, default_value_t = DEFAULT_API_PORT)]
    port: u16,

    /// Data directory for persistent state.
    #[arg(long, default_value = "/var/lib/corral")]
    data_dir: PathBuf,

    /// Role this host may join with (repeatable). Any role when omitted.
    #[arg(long = "allow-role", value_parser = parse_role)]
    allow_role: Vec<Role>,

    /// Command proving the container runtime is up, e.g.
    /// "docker version --format {{.Server.Version}}".
    #[arg(long)]
    runtime_probe: Option<String>,

    /// Command run once when the runtime probe fails.
    #[arg(long)]
    runtime_install: Option<String>,

    /// Replica refresh interval for non-leader managers.
    #[arg(long, default_value = "5s")]
    sync_interval: String,
}

fn parse_role(s: &str) -> Result<Role, String> {
    s.parse()
}

fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

impl ServeArgs {
    fn into_config(self) -> anyhow::Result<NodeConfig> {
        if let Some(path) = &self.config {
            return NodeConfig::from_file(path)
                .with_context(|| format!("loading node config {}", path.display()));
        }

        let mut runtime = RuntimeSettings::default();
        if let Some(probe) = &self.runtime_probe {
            runtime.probe = split_command(probe);
        }
        runtime.install = self.runtime_install.as_deref().map(split_command);

        let config = NodeConfig {
            hostname: self.hostname.context("--hostname is required")?,
            address: self.address.context("--address is required")?,
            port: self.port,
            data_dir: self.data_dir,
            allowed_roles: self.allow_role,
            runtime,
            sync_interval: self.sync_interval,
        };
        config.sync_interval().context("invalid --sync-interval")?;
        Ok(config)
    }
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new("info,corrald=debug,corral=debug")?,
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    match cli.command {
        Command::Serve(args) => {
            let config = args.into_config()?;
            serve::run(config).await
        }
    }
}
