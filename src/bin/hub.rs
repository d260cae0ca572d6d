use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use indicator_monitoring::{
    IndicatorMonitor, Repositories,
    actors::{messages::MonitorEvent, scheduler::SchedulerHandle},
    collector::http::HttpCollectorGateway,
    config::{Config, StorageConfig, read_config_file},
    model::ExecutionContext,
    monitor::MonitorSettings,
    notify::{NotificationRouter, discord::DiscordSender, webhook::WebhookSender},
    storage::MemoryStore,
    util::apply_env_overrides,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,

    /// Log at TRACE instead of DEBUG
    #[arg(long)]
    verbose: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,

    /// Run a single sweep and exit
    #[arg(long)]
    once: bool,
}

fn init(verbose: bool) {
    let level = if verbose {
        LevelFilter::TRACE
    } else {
        LevelFilter::DEBUG
    };

    let filter = filter::Targets::new().with_targets(vec![
        ("indicator_monitoring", level),
        ("indicator_hub", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let mut config = read_config_file(&args.file)?;
    apply_env_overrides(&mut config);

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("invalid configuration: {e}");
        }
        anyhow::bail!("configuration has {} error(s)", errors.len());
    }

    if args.check {
        info!(
            "configuration ok: {} schedules, {} indicators",
            config.schedules.len(),
            config.indicators.len()
        );
        return Ok(());
    }

    let monitor = Arc::new(build_monitor(&config).await?);

    if args.once {
        let results = monitor
            .execute_due_indicators(ExecutionContext::Scheduled)
            .await;
        let failed = results.iter().filter(|r| !r.success).count();
        info!("sweep executed {} indicators, {failed} failed", results.len());
        return Ok(());
    }

    tokio::spawn(log_events(monitor.subscribe()));

    let scheduler = SchedulerHandle::spawn(monitor, config.storage.retention());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("shutting down");
    scheduler.shutdown().await?;

    Ok(())
}

async fn build_monitor(config: &Config) -> anyhow::Result<IndicatorMonitor> {
    let definitions = Arc::new(MemoryStore::with_definitions(
        config.indicators.clone(),
        config.schedules.clone(),
    ));

    let repos = match &config.storage {
        StorageConfig::None => {
            debug!("using in-memory storage");
            Repositories::in_memory(definitions)
        }
        StorageConfig::Sqlite { path, .. } => sqlite_repositories(definitions, path).await?,
    };

    let gateway = Arc::new(HttpCollectorGateway::new(
        config.collector.url.clone(),
        config.collector.token.clone(),
    ));

    let router = NotificationRouter::new(config.scheduler.channel_timeout())
        .with_sender(Arc::new(DiscordSender::new()))
        .with_sender(Arc::new(WebhookSender::new()));

    Ok(IndicatorMonitor::new(
        repos,
        gateway.clone(),
        gateway,
        router,
        MonitorSettings::from(&config.scheduler),
    ))
}

#[cfg(feature = "storage-sqlite")]
async fn sqlite_repositories(
    definitions: Arc<MemoryStore>,
    path: &std::path::Path,
) -> anyhow::Result<Repositories> {
    use indicator_monitoring::storage::sqlite::SqliteStore;

    let store = Arc::new(
        SqliteStore::new(path)
            .await
            .with_context(|| format!("failed to open database {}", path.display()))?,
    );

    Ok(Repositories {
        indicators: definitions.clone(),
        schedules: definitions,
        alerts: store.clone(),
        executions: store,
    })
}

#[cfg(not(feature = "storage-sqlite"))]
async fn sqlite_repositories(
    _definitions: Arc<MemoryStore>,
    _path: &std::path::Path,
) -> anyhow::Result<Repositories> {
    anyhow::bail!("sqlite storage requested but the storage-sqlite feature is disabled")
}

async fn log_events(mut events: broadcast::Receiver<MonitorEvent>) {
    loop {
        match events.recv().await {
            Ok(MonitorEvent::Executed(result)) => trace!(
                "indicator {} executed in {}ms",
                result.indicator_id,
                result.duration().num_milliseconds()
            ),
            Ok(MonitorEvent::ExecutionFailed {
                indicator_id,
                error,
                consecutive_failures,
            }) => warn!(
                "indicator {indicator_id} failed ({consecutive_failures} in a row): {error}"
            ),
            Ok(MonitorEvent::AlertRaised {
                alert,
                notifications,
            }) => {
                info!("[{}] alert {}: {}", alert.severity, alert.id, alert.message);
                if let Some(result) = notifications
                    && !result.is_success
                {
                    warn!(
                        "alert {}: {} of {} notifications failed",
                        alert.id,
                        result.total_failed,
                        result.results.len()
                    );
                }
            }
            Ok(MonitorEvent::Stuck {
                indicator_id,
                started_at,
                context,
            }) => warn!("indicator {indicator_id} stuck since {started_at} ({context})"),
            Err(RecvError::Lagged(skipped)) => warn!("event log lagged, skipped {skipped} events"),
            Err(RecvError::Closed) => break,
        }
    }
}
