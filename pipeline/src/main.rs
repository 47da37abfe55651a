mod cli;

use std::sync::Arc;

use anyhow::anyhow;
use clap::Parser;
use common::{Shutdown, ShutdownTrigger, init_tracing};
use pipeline::{
    config::AppConfig,
    consumer::{LoggingDispatcher, MessageProcessor, SqlxProcessedLog},
    db::Db,
    feed::{DataCollectorService, FeedConnector},
    signal::{SignalProcessor, run_signal_scheduler},
    store::{SqlxSignalRepository, SqlxUpdateStore},
    stream::{SqlxSignalLog, StreamSignalPublisher},
};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::cli::Cli;

type Stages = JoinSet<anyhow::Result<()>>;

/// Connects, creates the schema, and applies the retention window.
async fn init_db(cfg: &AppConfig) -> anyhow::Result<Db> {
    let db = Db::connect(&cfg.store.database_url).await?;
    db.migrate(cfg.store.retention).await?;
    db.ping().await?;
    Ok(db)
}

fn start_collector(stages: &mut Stages, db: &Db, cfg: &AppConfig, shutdown: Shutdown) {
    let service = DataCollectorService::new(
        Arc::new(FeedConnector::new(&cfg.feed)),
        Arc::new(SqlxUpdateStore::new(db.pool.clone())),
    );

    stages.spawn(async move {
        match service.run(shutdown).await {
            Ok(stats) => {
                info!(?stats, "collector stopped");
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(anyhow::Error::from(e)),
            Err(e) => {
                warn!(error = %e, "collector run ended");
                Ok(())
            }
        }
    });
}

fn start_processor(stages: &mut Stages, db: &Db, cfg: &AppConfig, shutdown: Shutdown) {
    let log = Arc::new(SqlxSignalLog::new(db.pool.clone()));
    let processor = Arc::new(SignalProcessor::new(
        &cfg.signal,
        Arc::new(SqlxUpdateStore::new(db.pool.clone())),
        Arc::new(SqlxSignalRepository::new(db.pool.clone())),
        Arc::new(StreamSignalPublisher::new(log, cfg.stream.signal_stream.clone())),
    ));
    let signal_cfg = cfg.signal.clone();

    stages.spawn(async move {
        run_signal_scheduler(processor, signal_cfg, shutdown).await;
        Ok(())
    });
}

fn start_trader(stages: &mut Stages, db: &Db, cfg: &AppConfig, shutdown: Shutdown) {
    let trader = Arc::new(MessageProcessor::new(
        &cfg.consumer,
        &cfg.stream,
        Arc::new(SqlxSignalLog::new(db.pool.clone())),
        Arc::new(SqlxProcessedLog::new(db.pool.clone())),
        Arc::new(LoggingDispatcher),
    ));

    stages.spawn(async move {
        trader.ensure_group().await?;
        trader.run(shutdown).await;
        Ok::<(), anyhow::Error>(())
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing(is_production);

    info!(stage = ?cli.stage, "starting pipeline");

    let cfg = AppConfig::from_env()?;
    let db = init_db(&cfg).await?;

    let trigger = ShutdownTrigger::new();
    let mut stages = Stages::new();

    if cli.stage.runs_collector() {
        start_collector(&mut stages, &db, &cfg, trigger.subscribe());
    }
    if cli.stage.runs_processor() {
        start_processor(&mut stages, &db, &cfg, trigger.subscribe());
    }
    if cli.stage.runs_trader() {
        start_trader(&mut stages, &db, &cfg, trigger.subscribe());
    }

    let mut fatal = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            joined = stages.join_next() => match joined {
                None => break,
                Some(Ok(Ok(()))) => {}
                Some(Ok(Err(e))) => {
                    error!(error = ?e, "stage failed");
                    fatal = Some(e);
                    break;
                }
                Some(Err(join)) => {
                    error!(error = %join, "stage panicked");
                    fatal = Some(anyhow!("stage panicked: {join}"));
                    break;
                }
            }
        }
    }

    // In-flight ticks and batches finish before their stage exits.
    trigger.trigger();
    while let Some(joined) = stages.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = ?e, "stage failed during shutdown"),
            Err(join) => warn!(error = %join, "stage panicked during shutdown"),
        }
    }

    info!("pipeline stopped");
    fatal.map_or(Ok(()), Err)
}
