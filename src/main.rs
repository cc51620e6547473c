use backup_core::ServerConfig;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// File backup server
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// JSON config file; flags given here override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long, env = "BACKUP_BIND")]
    bind: Option<String>,

    /// TCP port
    #[arg(long, short, env = "BACKUP_PORT")]
    port: Option<u16>,

    /// Root directory for user files
    #[arg(long, env = "BACKUP_ROOT")]
    root: Option<PathBuf>,

    /// Poll busy users every N milliseconds instead of waiting for a release
    #[arg(long, env = "BACKUP_LOCK_POLL_MS")]
    lock_poll_ms: Option<u64>,

    /// Directory for the log file
    #[arg(long, env = "BACKUP_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, backup_core::error::ConfigError> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(root) = self.root {
            config.root_dir = root;
        }
        if self.lock_poll_ms.is_some() {
            config.lock_poll_ms = self.lock_poll_ms;
        }
        if let Some(log_dir) = self.log_dir {
            config.log_dir = log_dir;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    let config = match Args::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };

    let file_appender = rolling::never(&config.log_dir, "backup-server.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(port = config.port, "backup-server starting");

    if let Err(e) = backup_core::run(&config).await {
        error!(error = %e, "Fatal error");
        std::process::exit(1);
    }
}
