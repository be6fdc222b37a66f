use clap::{Parser, Subcommand};

use corral_core::Role;

mod commands;

#[derive(Parser)]
#[command(
    name = "bootstrap",
    about = "Corral — turn provisioned hosts into one container cluster",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Node daemon to talk to (host:port).
    #[arg(long, global = true, default_value = "127.0.0.1:2377")]
    node: String,

    /// Per-request timeout, e.g. "15s".
    #[arg(long, global = true, default_value = "15s")]
    timeout: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the node's provisioning status and cluster role
    Status,
    /// Make the container runtime ready on the node
    EnsureRuntime,
    /// Initialize a new cluster with the node as leader
    Init {
        /// Address joining hosts reach the leader on (default: the node's own)
        #[arg(long, default_value = "")]
        advertise: String,
    },
    /// Print the join token for a role (leader only)
    Token {
        #[arg(long, value_parser = parse_role)]
        role: Role,
        /// Invalidate the current token and print its replacement
        #[arg(long)]
        rotate: bool,
    },
    /// Join the node to a cluster
    Join {
        #[arg(long)]
        token: String,
        #[arg(long, value_parser = parse_role)]
        role: Role,
    },
    /// Remove the node from its cluster
    Leave,
    /// Inspect cluster members (managers only)
    Members {
        #[command(subcommand)]
        action: MembersAction,
    },
    /// Drive every host of an inventory into one cluster.
    ///
    /// Makes every runtime ready, initializes the cluster on the leader,
    /// then joins the remaining hosts in parallel with the token for
    /// their role. Safe to re-run: finished steps are reported as no-ops.
    Run {
        /// Inventory file (TOML)
        #[arg(short, long, default_value = "inventory.toml")]
        inventory: String,
        /// Output format: table or json
        #[arg(short, long, default_value = "table")]
        format: String,
    },
}

#[derive(Subcommand)]
enum MembersAction {
    /// List members, leader first
    List {
        /// Output format: table or json
        #[arg(short, long, default_value = "table")]
        format: String,
    },
    /// Stop scheduling onto a member (leader only)
    Drain { node_id: String },
    /// Resume scheduling onto a member (leader only)
    Activate { node_id: String },
}

fn parse_role(s: &str) -> Result<Role, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("corral=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = commands::node::connect(&cli.node, &cli.timeout)?;

    match cli.command {
        Commands::Status => commands::node::status(&client).await,
        Commands::EnsureRuntime => commands::node::ensure_runtime(&client).await,
        Commands::Init { advertise } => commands::node::init(&client, &advertise).await,
        Commands::Token { role, rotate } => commands::node::token(&client, role, rotate).await,
        Commands::Join { token, role } => commands::node::join(&client, &token, role).await,
        Commands::Leave => commands::node::leave(&client).await,
        Commands::Members { action } => match action {
            MembersAction::List { format } => commands::members::list(&client, &format).await,
            MembersAction::Drain { node_id } => {
                commands::members::set_availability(&client, &node_id, corral_core::Availability::Drained).await
            }
            MembersAction::Activate { node_id } => {
                commands::members::set_availability(&client, &node_id, corral_core::Availability::Active).await
            }
        },
        Commands::Run { inventory, format } => commands::run::run(&inventory, &format).await,
    }
}
