//! rigctl - command-line front end for a display rig

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rigctl::config::{SettingsStorage, StatusFile};
use rigctl::rig::{AddressPolicyKind, HealthPoller, HealthSink, NodeOutcome};
use rigctl::{build_rig, init_tracing, ClusterConfig, RigCommand, RigSettings};
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Connect to a display rig and send it control commands.
#[derive(Parser)]
#[command(name = "rigctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (default: ~/.rigctl/settings.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the rig connection settings
    Init {
        /// Primary node address
        #[arg(short = 'H', long)]
        host: String,

        /// SSH port
        #[arg(short, long, default_value = "22")]
        port: u16,

        /// Login user on every node
        #[arg(short, long)]
        username: String,

        /// Password shared by every node
        #[arg(long, env = "RIGCTL_PASSWORD")]
        password: String,

        /// Number of screens, primary included
        #[arg(short, long, default_value = "3")]
        nodes: usize,

        /// How secondary addresses are derived
        #[arg(long, value_enum, default_value = "numbered-suffix")]
        policy: PolicyArg,

        /// Connect automatically when `watch` starts
        #[arg(long)]
        auto_connect: bool,
    },

    /// Connect to every node, report, and disconnect
    Check,

    /// Run a command on every node
    Send {
        /// set_refresh, reset_refresh, clear_staged_content, relaunch, restart, shutdown
        command: RigCommand,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the last persisted connection status
    Status,

    /// Keep the rig connected and persist its status until interrupted
    Watch,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum PolicyArg {
    NumberedSuffix,
    PortOffset,
}

impl From<PolicyArg> for AddressPolicyKind {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::NumberedSuffix => AddressPolicyKind::NumberedSuffix,
            PolicyArg::PortOffset => AddressPolicyKind::PortOffset,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let storage = match cli.config {
        Some(path) => SettingsStorage::with_path(path),
        None => SettingsStorage::new()?,
    };

    match cli.command {
        Commands::Init {
            host,
            port,
            username,
            password,
            nodes,
            policy,
            auto_connect,
        } => {
            let mut settings = storage.load().await?;
            let cluster = ClusterConfig::new(username, password, host, port, nodes).trimmed();
            cluster.validate()?;

            settings.cluster = Some(cluster);
            settings.address_policy = policy.into();
            settings.auto_connect = auto_connect;
            storage.save(&settings).await?;

            println!("Settings written to {}", storage.path().display());
            Ok(true)
        }
        Commands::Check => {
            let settings = load_configured(&storage).await?;
            let (manager, _) = build_rig(&settings)?;

            for node in manager.topology()? {
                println!("{} {:?}", node, node.role);
            }
            let result = manager.connect().await;
            manager.disconnect().await;

            match result {
                Ok(_) => {
                    println!("All nodes reachable");
                    Ok(true)
                }
                Err(e) => {
                    println!("{}", e);
                    Ok(false)
                }
            }
        }
        Commands::Send { command, json } => {
            let settings = load_configured(&storage).await?;
            let (manager, dispatcher) = build_rig(&settings)?;

            manager.connect().await?;
            let result = dispatcher.execute(command).await;
            manager.disconnect().await;
            let result = result?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                for node in &result.nodes {
                    match &node.outcome {
                        NodeOutcome::Success { .. } => {
                            println!("#{} {}: ok", node.index, node.host)
                        }
                        NodeOutcome::Failure { reason } => {
                            println!("#{} {}: FAILED {}", node.index, node.host, reason)
                        }
                    }
                }
            }
            Ok(result.success)
        }
        Commands::Status => {
            let status = StatusFile::beside(storage.path());
            match status.read().await? {
                Some(snapshot) => {
                    println!(
                        "{} (as of {})",
                        if snapshot.connected { "connected" } else { "disconnected" },
                        snapshot.observed_at.to_rfc3339()
                    );
                    Ok(snapshot.connected)
                }
                None => {
                    println!("No status recorded yet");
                    Ok(false)
                }
            }
        }
        Commands::Watch => {
            let settings = load_configured(&storage).await?;
            watch(settings, StatusFile::beside(storage.path())).await
        }
    }
}

async fn load_configured(storage: &SettingsStorage) -> Result<RigSettings> {
    let settings = storage
        .load()
        .await
        .with_context(|| format!("reading {}", storage.path().display()))?;
    if settings.cluster.is_none() {
        bail!("no rig configured, run `rigctl init` first");
    }
    Ok(settings)
}

async fn watch(settings: RigSettings, status: StatusFile) -> Result<bool> {
    let (manager, _) = build_rig(&settings)?;

    if settings.should_auto_connect() {
        if let Err(e) = manager.connect().await {
            info!("Initial connect failed: {}", e);
        }
    }

    let status = Arc::new(status);
    let sink: Arc<dyn HealthSink> = Arc::clone(&status) as Arc<dyn HealthSink>;
    let mut poller = HealthPoller::spawn(Arc::clone(&manager), sink, settings.poll_interval());

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, disconnecting");

    poller.shutdown().await;
    manager.disconnect().await;
    status
        .write(&rigctl::rig::HealthSnapshot::now(false))
        .await?;
    Ok(true)
}
