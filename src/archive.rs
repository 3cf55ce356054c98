//! Durable archival of every inbound and outbound message.
//!
//! Producers enqueue [`MessageRecord`]s through a bounded channel; a single
//! consumer batches them and commits each batch in one transaction. Database
//! work runs on the blocking pool with the synchronous `postgres` client,
//! gated by a semaphore so at most a handful of connections exist at once.
//! Archival is best-effort: a failed batch is logged and discarded, and the
//! message pipeline never stalls on it.

use crate::config::TimescaleConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use postgres::error::SqlState;
use postgres::NoTls;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

/// Bound on the producer queue; senders wait when it is full.
const QUEUE_CAPACITY: usize = 10_000;
/// Max concurrently open database connections.
const MAX_CONNECTIONS: usize = 5;

const INSERT_SQL: &str = "INSERT INTO signal_messages \
    (timestamp, signal_received_timestamp, signal_delivered_timestamp, \
     target, source, group_chat, mentions, content, created_at) \
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)";

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS signal_messages (\
    id BIGSERIAL, \
    timestamp TIMESTAMPTZ NOT NULL, \
    signal_received_timestamp TIMESTAMPTZ NOT NULL, \
    signal_delivered_timestamp TIMESTAMPTZ, \
    target VARCHAR(255) NOT NULL, \
    source VARCHAR(255) NOT NULL, \
    group_chat VARCHAR(255), \
    mentions TEXT, \
    content TEXT, \
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW())";

/// One archival row: either an inbound message (target = account) or an
/// outbound reply (source = account).
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub timestamp: DateTime<Utc>,
    pub signal_received_timestamp: DateTime<Utc>,
    pub signal_delivered_timestamp: Option<DateTime<Utc>>,
    pub target: String,
    pub source: String,
    pub group_chat: Option<String>,
    pub mentions: Option<String>,
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Cloneable producer side of the archive queue. Dropping every handle
/// closes the queue, which makes the consumer drain and flush before exiting.
#[derive(Clone)]
pub struct ArchiveHandle {
    tx: mpsc::Sender<MessageRecord>,
}

impl ArchiveHandle {
    /// Build a handle plus the matching consumer endpoint. Exposed so tests
    /// can observe enqueued records without a database.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<MessageRecord>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Put a record on the queue. Waits when the queue is full; fails only
    /// after the writer has shut down.
    pub async fn enqueue(&self, record: MessageRecord) -> Result<()> {
        self.tx
            .send(record)
            .await
            .map_err(|_| anyhow::anyhow!("archive writer is shut down"))
    }
}

/// Batching consumer of the archive queue.
pub struct ArchiveWriter {
    config: TimescaleConfig,
    rx: mpsc::Receiver<MessageRecord>,
    permits: Arc<Semaphore>,
}

impl ArchiveWriter {
    /// Spawn the consumer task. The returned [`JoinHandle`] completes once
    /// every producer handle is dropped and all in-flight batches finished.
    pub fn start(config: TimescaleConfig) -> (ArchiveHandle, JoinHandle<()>) {
        let (handle, rx) = ArchiveHandle::channel(QUEUE_CAPACITY);
        let writer = Self {
            config,
            rx,
            permits: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
        };
        (handle, tokio::spawn(writer.run()))
    }

    async fn run(mut self) {
        let mut flushes = JoinSet::new();
        loop {
            let (batch, closed) = collect_batch(
                &mut self.rx,
                self.config.batch_size.max(1),
                self.config.batch_timeout,
            )
            .await;

            if !batch.is_empty() {
                self.spawn_flush(&mut flushes, batch);
            }
            // Reap finished flushes so the set does not grow unbounded.
            while flushes.try_join_next().is_some() {}

            if closed {
                break;
            }
        }

        while flushes.join_next().await.is_some() {}
        tracing::debug!("archive writer drained and stopped");
    }

    fn spawn_flush(&self, flushes: &mut JoinSet<()>, batch: Vec<MessageRecord>) {
        let permits = self.permits.clone();
        let config = self.config.clone();
        flushes.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .expect("archive connection semaphore is never closed");
            let count = batch.len();
            let result = tokio::task::spawn_blocking(move || write_batch(&config, &batch)).await;
            match result {
                Ok(Ok(())) => tracing::debug!("archived batch of {count} records"),
                Ok(Err(e)) => {
                    tracing::error!("discarding batch of {count} records after commit failure: {e:#}");
                }
                Err(e) => tracing::error!("archive flush task panicked: {e}"),
            }
        });
    }
}

/// Pull records off the queue until the batch is full, the timeout since the
/// last flush elapses, or the queue closes. Returns the batch and whether
/// the queue is closed.
async fn collect_batch(
    rx: &mut mpsc::Receiver<MessageRecord>,
    batch_size: usize,
    batch_timeout: Duration,
) -> (Vec<MessageRecord>, bool) {
    let deadline = Instant::now() + batch_timeout;
    let mut batch = Vec::with_capacity(batch_size);
    while batch.len() < batch_size {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(record)) => batch.push(record),
            Ok(None) => return (batch, true),
            Err(_) => break,
        }
    }
    (batch, false)
}

fn connection_config(config: &TimescaleConfig) -> postgres::Config {
    let mut pg = postgres::Config::new();
    pg.host(&config.host)
        .port(config.port)
        .user(&config.username)
        .password(&config.password)
        .dbname(&config.database)
        .connect_timeout(Duration::from_secs(10));
    pg
}

/// Open a connection and commit one transaction containing the whole batch.
/// Any error rolls the transaction back (on drop) and the batch is gone.
fn write_batch(config: &TimescaleConfig, batch: &[MessageRecord]) -> Result<()> {
    let mut client = connection_config(config)
        .connect(NoTls)
        .context("archive connection failed")?;
    let mut tx = client.transaction().context("begin failed")?;
    for record in batch {
        tx.execute(
            INSERT_SQL,
            &[
                &record.timestamp,
                &record.signal_received_timestamp,
                &record.signal_delivered_timestamp,
                &record.target,
                &record.source,
                &record.group_chat,
                &record.mentions,
                &record.content,
                &record.created_at,
            ],
        )
        .context("insert failed")?;
    }
    tx.commit().context("commit failed")
}

/// Create the database, table, hypertable, and indexes if missing.
/// Idempotent; the hypertable and composite primary key are best-effort.
pub fn ensure_schema(config: &TimescaleConfig) -> Result<()> {
    let mut client = match connection_config(config).connect(NoTls) {
        Ok(client) => client,
        Err(e) if is_missing_database(&e) => {
            create_database(config)?;
            connection_config(config)
                .connect(NoTls)
                .context("reconnect after database creation failed")?
        }
        Err(e) => return Err(e).context("archive connection failed"),
    };

    client
        .batch_execute(CREATE_TABLE_SQL)
        .context("creating signal_messages failed")?;

    // Time-partitioning needs the TimescaleDB extension; plain PostgreSQL is
    // a supported degradation.
    if let Err(e) = client.batch_execute(
        "SELECT create_hypertable('signal_messages', 'timestamp', if_not_exists => TRUE)",
    ) {
        tracing::warn!("hypertable setup skipped (TimescaleDB extension missing?): {e}");
    }

    // The composite key may already exist from a previous boot.
    if let Err(e) =
        client.batch_execute("ALTER TABLE signal_messages ADD PRIMARY KEY (id, timestamp)")
    {
        tracing::debug!("composite primary key not added: {e}");
    }

    client
        .batch_execute(
            "CREATE INDEX IF NOT EXISTS idx_signal_messages_timestamp ON signal_messages (timestamp); \
             CREATE INDEX IF NOT EXISTS idx_signal_messages_source ON signal_messages (source); \
             CREATE INDEX IF NOT EXISTS idx_signal_messages_target ON signal_messages (target); \
             CREATE INDEX IF NOT EXISTS idx_signal_messages_created_at ON signal_messages (created_at)",
        )
        .context("creating indexes failed")?;

    Ok(())
}

/// Liveness probe for the doctor subcommand.
pub fn ping(config: &TimescaleConfig) -> Result<()> {
    let mut client = connection_config(config)
        .connect(NoTls)
        .context("archive connection failed")?;
    client.simple_query("SELECT 1").context("SELECT 1 failed")?;
    Ok(())
}

fn is_missing_database(error: &postgres::Error) -> bool {
    error.code() == Some(&SqlState::INVALID_CATALOG_NAME)
}

fn create_database(config: &TimescaleConfig) -> Result<()> {
    validate_identifier(&config.database)?;
    let mut maintenance = connection_config(config);
    maintenance.dbname("postgres");
    let mut client = maintenance
        .connect(NoTls)
        .context("maintenance connection failed")?;
    client
        .batch_execute(&format!("CREATE DATABASE \"{}\"", config.database))
        .with_context(|| format!("creating database {} failed", config.database))?;
    tracing::info!("created database {}", config.database);
    Ok(())
}

/// Database names reach DDL by interpolation, so they are restricted to a
/// conservative character set.
fn validate_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        anyhow::bail!("invalid database name: {name:?}");
    }
}
