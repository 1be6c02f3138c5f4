use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use stramcrab_core::coordinator::{Coordinator, CoordinatorConfig};
use stramcrab_core::recovery::{ChannelTunables, FsRecoveryStore};
use stramcrab_core::rpc::{ResilientChannel, TcpConnector};
use stramcrab_core::types::EpochMillis;
use stramcrab_core::window::{window_id_for, window_millis};
use stramcrab_core::worker::{Worker, WorkerConfig};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "stramcrab")]
#[command(about = "StramCrab control-plane CLI", long_about = None)]
struct Cli {
    /// Log filter directive, e.g. `info` or `stramcrab_core=debug`.
    #[arg(long, global = true)]
    log: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Coordinator {
        #[arg(long)]
        app_dir: PathBuf,
        #[arg(long, default_value = "127.0.0.1:0")]
        listen: SocketAddr,
        #[arg(long, default_value_t = 5000)]
        rpc_timeout_ms: u64,
        #[arg(long, default_value_t = 10000)]
        retry_delay_ms: u64,
        #[arg(long, default_value_t = 30000)]
        retry_timeout_ms: u64,
        #[arg(long, default_value_t = 60000)]
        checkpoint_interval_ms: u64,
    },
    Worker {
        #[arg(long)]
        app_dir: PathBuf,
        #[arg(long)]
        container_id: String,
        #[arg(long, default_value = "localhost")]
        host: String,
        #[arg(long, default_value_t = 1000)]
        heartbeat_interval_ms: u64,
        #[arg(long, default_value_t = 500)]
        window_width_ms: u32,
        #[arg(long, default_value_t = 0)]
        operator_id: u32,
        #[arg(long, default_value_t = 1)]
        checkpoint_windows: u32,
    },
    /// Print the window id containing a point in time.
    WindowId {
        #[arg(long)]
        time: EpochMillis,
        #[arg(long)]
        first: EpochMillis,
        #[arg(long)]
        width: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log.as_deref())?;
    match cli.command {
        Commands::Coordinator {
            app_dir,
            listen,
            rpc_timeout_ms,
            retry_delay_ms,
            retry_timeout_ms,
            checkpoint_interval_ms,
        } => {
            let mut config = CoordinatorConfig::new(app_dir);
            config.tunables = ChannelTunables {
                call_timeout: Duration::from_millis(rpc_timeout_ms),
                retry_delay: Duration::from_millis(retry_delay_ms),
                retry_timeout: Duration::from_millis(retry_timeout_ms),
            };
            config.checkpoint_interval = Duration::from_millis(checkpoint_interval_ms);

            let coordinator = Arc::new(Coordinator::open(config)?);
            let listener = TcpListener::bind(listen)
                .await
                .with_context(|| format!("failed to bind {listen}"))?;
            tracing::info!(
                "coordinator incarnation {} listening on {}",
                coordinator.incarnation()?,
                listener.local_addr()?
            );
            coordinator.serve(listener, shutdown_on_ctrl_c()).await?;
        }
        Commands::Worker {
            app_dir,
            container_id,
            host,
            heartbeat_interval_ms,
            window_width_ms,
            operator_id,
            checkpoint_windows,
        } => {
            let pointer = Arc::new(FsRecoveryStore::new(&app_dir)?);
            let mut config = WorkerConfig::new(app_dir, container_id);
            config.host = host;
            config.heartbeat_interval = Duration::from_millis(heartbeat_interval_ms);
            config.window_width_millis = window_width_ms;
            config.node.operator_id = operator_id;
            config.node.checkpoint_window_count = checkpoint_windows;

            let worker = Arc::new(Worker::new(
                config,
                ResilientChannel::new(TcpConnector, pointer),
            ));
            worker.run(shutdown_on_ctrl_c()).await?;
        }
        Commands::WindowId { time, first, width } => {
            let window_id = window_id_for(time, first, width)?;
            println!(
                "window_id={} base_seconds={} sequence={} start_ms={}",
                window_id.as_u64(),
                window_id.base_seconds(),
                window_id.sequence(),
                window_millis(window_id, first, width)?
            );
        }
    }
    Ok(())
}

fn init_tracing(directive: Option<&str>) -> anyhow::Result<()> {
    let filter = match directive {
        Some(directive) => EnvFilter::try_new(directive)
            .with_context(|| format!("invalid --log filter {directive:?}"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down");
        }
        let _ = shutdown_tx.send(true);
    });
    shutdown_rx
}
