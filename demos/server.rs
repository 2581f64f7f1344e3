use std::time::Duration;

use clap::Parser;
use metrics_tracker::storage::StopFlushing;
use metrics_tracker::{compose_config, MetricsStorage};
use rand::{thread_rng, Rng};

#[derive(Parser)]
#[clap(about = "Metrics storage demo server")]
struct Args {
    /// Configuration file, environment variables override it
    #[clap(short = 'c', long, default_value = "config/metrics-server")]
    config: String,
    /// Seconds between flushes, 0 saves on every update
    #[clap(short = 'i', long)]
    store_interval: Option<u64>,
    /// Snapshot file path, empty disables file persistence
    #[clap(short = 'f', long)]
    file_storage_path: Option<String>,
    /// Database DSN, wins over the snapshot file
    #[clap(short = 'd', long)]
    database_dsn: Option<String>,
    /// Restore the last snapshot on start
    #[clap(short = 'r', long)]
    restore: Option<bool>,
    /// Seconds between simulated agent polls
    #[clap(short = 'p', long, default_value_t = 2)]
    poll_interval: u64,
}

#[actix::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut config = compose_config(&args.config).expect("Error loading config");
    if let Some(interval) = args.store_interval {
        config.store_interval = interval;
    }
    if let Some(path) = args.file_storage_path {
        config.file_storage_path = path;
    }
    if args.database_dsn.is_some() {
        config.database_dsn = args.database_dsn;
    }
    if let Some(restore) = args.restore {
        config.restore = restore;
    }

    log::info!("Starting metrics server in {:?} mode...", config.persistence_mode());
    let storage = MetricsStorage::from_config(&config).expect("Error initializing storage");
    let flusher = storage.start_flushing();

    let mut poll = tokio::time::interval(Duration::from_secs(args.poll_interval.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = poll.tick() => {
                let outcome = storage
                    .counter_update("PollCount", 1)
                    .and_then(|_| storage.gauge_update("RandomValue", thread_rng().gen()));
                if let Err(err) = outcome {
                    log::error!("Error storing polled metrics - {err}");
                }
                if !storage.check_health() {
                    log::warn!("Persistence backend is unhealthy");
                }
                log::info!(
                    "PollCount = {:?}, gauges = {}",
                    storage.counter("PollCount"),
                    storage.gauge_map().len()
                );
            }
            _ = &mut shutdown => {
                log::info!("Shutting down");
                break;
            }
        }
    }

    if let Some(addr) = flusher {
        addr.send(StopFlushing)
            .await
            .unwrap_or_else(|err| log::error!("Error stopping flush actor - {err}"));
    }
}
