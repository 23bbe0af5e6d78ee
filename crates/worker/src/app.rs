//! Backend wiring and command dispatch.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use chatlog_core::{Channel, Clock, SystemClock};
use chatlog_infra::dedup::RedisScoredSet;
use chatlog_infra::queue::RedisQueue;
use chatlog_infra::redis_conn::{RedisConnector, RedisFailure};
use chatlog_infra::status::RedisStatusBoard;
use chatlog_infra::{
    BatchApplier, BatchContext, ConfigError, DurableQueue, EntityReconciler, IdempotencyWindow,
    IngestConfig, InsertApplier, InviteApplier, MarkApplier, PostgresRecordStore, StatusBoard,
    StoreError, WorkerLoop, WorkerStatus, collect_report,
};

use crate::cli::{Cli, Command};

/// Sorted set remembering recently inserted message keys.
pub const DEDUP_SET_KEY: &str = "insert_set";

/// Queues listed by `status`. Nothing here consumes `ocr`, so its line shows
/// the backlog left for the OCR consumer.
pub const REPORTED_CHANNELS: [Channel; 5] = [
    Channel::Insert,
    Channel::Entity,
    Channel::Mark,
    Channel::Invite,
    Channel::Ocr,
];

/// A backend could not be opened; the process exits non-zero.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("redis unavailable: {0}")]
    Redis(#[from] RedisFailure),

    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("failed to render status: {0}")]
    Render(#[from] serde_json::Error),
}

/// Opened backends shared by every worker kind.
struct Backends {
    redis: RedisConnector,
    board: Arc<dyn StatusBoard>,
    clock: Arc<SystemClock>,
}

impl Backends {
    fn connect(config: &IngestConfig) -> Result<Self, StartupError> {
        let redis = RedisConnector::open(&config.redis_url)?;
        redis.ping()?;
        Ok(Self {
            board: Arc::new(RedisStatusBoard::new(redis.clone())),
            clock: Arc::new(SystemClock),
            redis,
        })
    }

    fn queue(&self, name: impl Into<String>) -> Arc<dyn DurableQueue> {
        Arc::new(RedisQueue::new(self.redis.clone(), name))
    }

    fn store(config: &IngestConfig) -> Result<Arc<PostgresRecordStore>, StartupError> {
        let store = PostgresRecordStore::connect(&config.database_url, config.max_connections)?;
        store.ensure_schema()?;
        Ok(Arc::new(store))
    }

    fn context(
        &self,
        channel: Channel,
        store: Arc<PostgresRecordStore>,
        config: &IngestConfig,
    ) -> BatchContext<Arc<PostgresRecordStore>> {
        BatchContext::new(
            channel,
            store,
            self.queue(channel.name()),
            self.queue(channel.dead_letter_name()),
        )
        .with_policy(config.row_failure_policy)
    }

    /// Run `applier` over its channel's queue until the process is killed.
    fn serve<A: BatchApplier>(&self, config: &IngestConfig, applier: A) {
        let channel = applier.channel();
        let worker = WorkerLoop::new(
            config.worker(channel.name()),
            self.queue(channel.name()),
            applier,
            self.board.clone(),
            self.clock.clone(),
        );
        worker.run_forever();
    }
}

/// Execute a parsed command line.
pub fn run(cli: Cli) -> Result<(), StartupError> {
    let config = IngestConfig::load(cli.config.as_deref())?;
    log_config(&config, cli.config.as_deref());

    let backends = Backends::connect(&config)?;

    match cli.command {
        Command::Status { json } => {
            let report = status_report(&backends);
            println!("{}", render_status(&report, json)?);
            Ok(())
        }
        Command::Insert => {
            let store = Backends::store(&config)?;
            let window = IdempotencyWindow::new(
                RedisScoredSet::new(backends.redis.clone(), DEDUP_SET_KEY),
                backends.clock.clone(),
                config.dedup_ttl_secs,
            );
            let applier = InsertApplier::new(
                backends.context(Channel::Insert, store, &config),
                window,
                backends.queue(Channel::Ocr.name()),
            )
            .with_ocr_hint(config.ocr_hint.clone());
            backends.serve(&config, applier);
            Ok(())
        }
        Command::Entity => {
            let store = Backends::store(&config)?;
            let applier = EntityReconciler::new(
                backends.context(Channel::Entity, store, &config),
                backends.clock.clone(),
            );
            backends.serve(&config, applier);
            Ok(())
        }
        Command::Mark => {
            let store = Backends::store(&config)?;
            let applier = MarkApplier::new(backends.context(Channel::Mark, store, &config));
            backends.serve(&config, applier);
            Ok(())
        }
        Command::Invite => {
            let store = Backends::store(&config)?;
            let applier = InviteApplier::new(backends.context(Channel::Invite, store, &config));
            backends.serve(&config, applier);
            Ok(())
        }
    }
}

fn log_config(config: &IngestConfig, path: Option<&Path>) {
    info!(
        config_file = ?path,
        batch_size = config.batch_size,
        idle_ms = config.idle_ms,
        dedup_ttl_secs = config.dedup_ttl_secs,
        row_failure_policy = %config.row_failure_policy,
        "configuration loaded"
    );
}

fn status_report(backends: &Backends) -> Vec<WorkerStatus> {
    let queues: Vec<Arc<dyn DurableQueue>> = REPORTED_CHANNELS
        .iter()
        .map(|channel| backends.queue(channel.name()))
        .collect();
    let refs: Vec<&dyn DurableQueue> = queues.iter().map(|q| q.as_ref()).collect();
    collect_report(backends.board.as_ref(), &refs, backends.clock.now())
}

/// One line per worker, or a JSON array.
pub fn render_status(report: &[WorkerStatus], json: bool) -> Result<String, StartupError> {
    if json {
        return Ok(serde_json::to_string_pretty(report)?);
    }
    Ok(report
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> Vec<WorkerStatus> {
        vec![
            WorkerStatus {
                worker: "insert".to_string(),
                seconds_ago: Some(3),
                size: Some(12),
            },
            WorkerStatus {
                worker: "mark".to_string(),
                seconds_ago: None,
                size: Some(0),
            },
        ]
    }

    #[test]
    fn human_status_has_one_line_per_worker() {
        let rendered = render_status(&report(), false).unwrap();
        assert_eq!(
            rendered,
            "insert worker: 3 seconds ago, size 12\nmark worker: never ran, size 0"
        );
    }

    #[test]
    fn json_status_is_an_array() {
        let rendered = render_status(&report(), true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value[0]["worker"], "insert");
        assert_eq!(value[0]["seconds_ago"], 3);
        assert!(value[1]["seconds_ago"].is_null());
    }

    #[test]
    fn status_covers_every_channel_including_ocr_backlog() {
        let names: Vec<_> = REPORTED_CHANNELS.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["insert", "entity", "mark", "invite", "ocr"]);
    }

    #[test]
    fn missing_config_file_is_a_startup_error() {
        let cli = Cli {
            config: Some("/nonexistent/chatlog.toml".into()),
            command: Command::Status { json: false },
        };
        assert!(matches!(
            run(cli),
            Err(StartupError::Config(ConfigError::Read { .. }))
        ));
    }
}
