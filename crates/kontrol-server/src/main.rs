mod auth;
mod config;
mod http;
mod keys;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kontrol::{Kontrol, MachineAuthenticator, MemoryStorage};

use config::ServerConfig;

#[derive(Parser)]
#[command(name = "kontrol", about = "Kite registry with leases and discovery tokens")]
struct Cli {
    /// TOML config file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Override the signing key file.
    #[arg(long)]
    key_file: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the registry (default).
    Serve,

    /// Print a kite key for USERNAME signed with the key file.
    KiteKey {
        username: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(key_file) = cli.key_file {
        config.key_file = Some(key_file);
    }

    let command = cli.command.unwrap_or(Command::Serve);
    require_key_file(&command, &config)?;

    let signer = keys::load_or_generate(config.key_file.as_deref())
        .context("loading signing key")?;
    let storage = Arc::new(MemoryStorage::new(config.kontrol.record_ttl));
    let machine_auth: Arc<dyn MachineAuthenticator> = match &config.machine_secret {
        Some(secret) => Arc::new(auth::SharedSecret::new(secret.clone())),
        None => Arc::new(auth::Closed),
    };
    let kontrol = Arc::new(
        Kontrol::new(config.kontrol.clone(), storage.clone(), Arc::new(signer))?
            .with_machine_authenticator(machine_auth),
    );

    match command {
        Command::KiteKey { username } => {
            println!("{}", kontrol.issue_kite_key(&username)?);
            Ok(())
        }
        Command::Serve => serve(config, kontrol, storage).await,
    }
}

/// Kite keys printed by `kite-key` must verify in a later `serve`, so the
/// signer has to come from a file.
fn require_key_file(command: &Command, config: &ServerConfig) -> anyhow::Result<()> {
    if matches!(command, Command::KiteKey { .. }) && config.key_file.is_none() {
        anyhow::bail!("kite-key requires a key file (--key-file or key_file in the config)");
    }
    Ok(())
}

async fn serve(
    config: ServerConfig,
    kontrol: Arc<Kontrol>,
    storage: Arc<MemoryStorage>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    tracing::info!(
        "kontrol listening on {} (heartbeat {:?}, lease {:?}, record ttl {:?})",
        config.listen,
        config.kontrol.heartbeat_interval,
        config.kontrol.lease_duration(),
        config.kontrol.record_ttl,
    );
    if config.machine_secret.is_none() {
        tracing::info!("no machine_secret configured, POST /machine is closed");
    }

    let purge = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(storage.ttl());
        loop {
            ticker.tick().await;
            let purged = storage.purge_expired();
            if purged > 0 {
                tracing::debug!("purged {purged} expired records");
            }
        }
    });

    http::serve(listener, Arc::clone(&kontrol), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("cannot listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
        tracing::info!("shutting down");
    })
    .await;

    purge.abort();
    kontrol.close();
    Ok(())
}
