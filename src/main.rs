use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use satogram::{config::Config, Satogram};

#[derive(Parser)]
#[command(name = "satogram")]
#[command(about = "Broadcast a keysend message to every node of the Lightning graph", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// LND REST host (host:port)
    #[arg(long, global = true)]
    host: Option<String>,

    /// TLS certificate of the node
    #[arg(long, global = true)]
    tls_cert: Option<PathBuf>,

    /// Macaroon used to authenticate
    #[arg(long, global = true)]
    macaroon: Option<PathBuf>,

    /// Database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log level, overridden by RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh the directory and send the message to every peer
    Broadcast {
        /// Amount per peer in sats
        #[arg(short, long)]
        amount: Option<i64>,

        /// Message to send
        #[arg(short, long)]
        message: Option<String>,

        /// File listing pubkeys that are never paid
        #[arg(long)]
        exclude: Option<PathBuf>,

        /// Skip peers that already received a message
        #[arg(long)]
        skip_paid: bool,

        /// Maximum number of payments in flight
        #[arg(long)]
        max_in_flight: Option<usize>,
    },

    /// Add newly discovered graph nodes to the directory
    Refresh,

    /// List the peers in the directory
    Peers,

    /// Remove every peer from the directory
    Wipe,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref()).await?;
    apply_overrides(&mut config, &cli);

    init_tracing(&config);

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    let mut app = Satogram::new(config).await?;
    let result = run(&mut app, cli.command.unwrap_or(Commands::Broadcast {
        amount: None,
        message: None,
        exclude: None,
        skip_paid: false,
        max_in_flight: None,
    }))
    .await;

    app.shutdown().await;
    result
}

async fn run(app: &mut Satogram, command: Commands) -> Result<()> {
    match command {
        Commands::Broadcast { .. } => {
            app.connect().await?;
            let report = app.refresh_directory().await?;
            info!(
                "{} peers in the directory ({} new)",
                report.stored, report.inserted
            );

            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    match tokio::signal::ctrl_c().await {
                        Ok(()) => {
                            warn!("Received interrupt, no further payments will be sent");
                            cancel.cancel();
                        }
                        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
                    }
                }
            });

            let run = app.broadcast(&cancel).await?;
            println!("{}", run);
        }
        Commands::Refresh => {
            app.connect().await?;
            let report = app.refresh_directory().await?;
            println!(
                "discovered {}, added {}, excluded {}, stored {}",
                report.discovered, report.inserted, report.excluded, report.stored
            );
        }
        Commands::Peers => {
            for (id, record) in app.list_peers().await? {
                match record.first_seen {
                    Some(seen) => println!("{} {} {}", id, record.alias, seen.to_rfc3339()),
                    None => println!("{} {}", id, record.alias),
                }
            }
        }
        Commands::Wipe => {
            let removed = app.wipe().await?;
            println!("removed {} peers", removed);
        }
    }

    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if config.logging.format == "compact" {
        builder.compact().init();
    } else {
        builder.pretty().init();
    }
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(host) = &cli.host {
        config.node.host = host.clone();
    }
    if let Some(path) = &cli.tls_cert {
        config.node.tls_cert_path = path.clone();
    }
    if let Some(path) = &cli.macaroon {
        config.node.macaroon_path = path.clone();
    }
    if let Some(path) = &cli.db {
        config.database.path = path.clone();
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    if let Some(Commands::Broadcast {
        amount,
        message,
        exclude,
        skip_paid,
        max_in_flight,
    }) = &cli.command
    {
        if let Some(amount) = amount {
            config.broadcast.amount_sats = *amount;
        }
        if let Some(message) = message {
            config.broadcast.message = message.clone();
        }
        if let Some(path) = exclude {
            config.broadcast.exclude_pubkeys_path = path.clone();
        }
        if *skip_paid {
            config.broadcast.exclude_paid_peers = true;
        }
        if let Some(max) = max_in_flight {
            config.broadcast.max_in_flight = *max;
        }
    }
}

/// Load configuration from `explicit`, else from standard locations, else defaults
async fn load_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        return read_config(path).await;
    }

    let config_paths = vec![
        PathBuf::from("./satogram.toml"),
        PathBuf::from("/etc/satogram/satogram.toml"),
        dirs::config_dir()
            .map(|d| d.join("satogram/satogram.toml"))
            .unwrap_or_default(),
    ];

    for path in config_paths {
        if path.exists() {
            return read_config(&path).await;
        }
    }

    Ok(Config::default())
}

async fn read_config(path: &Path) -> Result<Config> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Config::from_toml(&content).map_err(anyhow::Error::msg)
}
