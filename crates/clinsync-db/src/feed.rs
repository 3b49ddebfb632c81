//! Row-change feed over PostgreSQL LISTEN/NOTIFY.
//!
//! Triggers installed by the migrations call `pg_notify` on channel
//! `clinsync_{table}` with a JSON payload `{table, action, new, old}`.
//! The `old` object is trimmed to a few identifying columns, so consumers
//! recover prior state from their own cache, not from the feed.

use async_trait::async_trait;
use sqlx::postgres::PgListener;
use sqlx::{Pool, Postgres};
use tracing::{debug, info, warn};

use clinsync_core::{ChangeFeed, ChangeFeedStream, Error, Result, TableChange};

/// Prefix for per-table notification channels.
pub const CHANNEL_PREFIX: &str = "clinsync_";

/// Notification channel for a watched table.
pub fn channel_name(table: &str) -> String {
    format!("{CHANNEL_PREFIX}{table}")
}

/// Change feed backed by PostgreSQL LISTEN/NOTIFY.
#[derive(Clone)]
pub struct PgChangeFeed {
    pool: Pool<Postgres>,
}

impl PgChangeFeed {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChangeFeed for PgChangeFeed {
    async fn subscribe(&self, tables: &[&str]) -> Result<Box<dyn ChangeFeedStream>> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(Error::Database)?;

        let channels: Vec<String> = tables.iter().map(|t| channel_name(t)).collect();
        listener
            .listen_all(channels.iter().map(String::as_str))
            .await
            .map_err(Error::Database)?;

        info!(
            subsystem = "feed",
            component = "pg_listener",
            op = "subscribe",
            channels = ?channels,
            "Change feed subscribed"
        );

        Ok(Box::new(PgChangeFeedStream { listener }))
    }
}

/// An open LISTEN subscription.
pub struct PgChangeFeedStream {
    listener: PgListener,
}

#[async_trait]
impl ChangeFeedStream for PgChangeFeedStream {
    async fn next_change(&mut self) -> Result<Option<TableChange>> {
        loop {
            let notification = self.listener.recv().await.map_err(Error::Database)?;

            match serde_json::from_str::<TableChange>(notification.payload()) {
                Ok(change) => {
                    debug!(
                        subsystem = "feed",
                        component = "pg_listener",
                        table = %change.table,
                        action = %change.action,
                        "Change received"
                    );
                    return Ok(Some(change));
                }
                Err(e) => {
                    // A malformed payload must not kill the subscription.
                    warn!(
                        subsystem = "feed",
                        component = "pg_listener",
                        channel = notification.channel(),
                        error = %e,
                        "Discarding undecodable change payload"
                    );
                }
            }
        }
    }
}
