//! SQLite-backed schedule store.
//!
//! All statements run on tokio-rusqlite's background thread. Several
//! processes may open the same database file: every operation is a single
//! statement or an IMMEDIATE transaction, so SQLite's write lock provides
//! the atomicity the claim protocol relies on.
//!
//! Timestamps are stored as Unix milliseconds.

use std::path::Path;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, TransactionBehavior, params};
use tokio_rusqlite::Connection;

use crate::app::status::ScheduleCounts;
use crate::domain::{
    ExchangeKind, MessageProperties, Schedule, ScheduleId, ScheduleState, SchedulerError,
};
use crate::ports::ScheduleStore;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS schedules (
    id                 TEXT PRIMARY KEY,
    wake_time          INTEGER NOT NULL,
    cancellation_key   TEXT,
    binding_key        TEXT NOT NULL,
    inner_message      BLOB NOT NULL,
    message_properties TEXT NOT NULL,
    exchange_kind      TEXT NOT NULL,
    exchange           TEXT NOT NULL,
    routing_key        TEXT NOT NULL,
    state              TEXT NOT NULL CHECK (state IN ('pending', 'publishing', 'published')),
    publishing_time    INTEGER,
    published_time     INTEGER
);
CREATE INDEX IF NOT EXISTS idx_schedules_cancellation_key
    ON schedules (cancellation_key) WHERE cancellation_key IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_schedules_state_wake_time
    ON schedules (state, wake_time);
CREATE INDEX IF NOT EXISTS idx_schedules_published_time
    ON schedules (published_time) WHERE published_time IS NOT NULL;
";

const COLUMNS: &str = "id, wake_time, cancellation_key, binding_key, inner_message, \
     message_properties, exchange_kind, exchange, routing_key, state, \
     publishing_time, published_time";

const BUSY_TIMEOUT: StdDuration = StdDuration::from_secs(5);

fn storage_err(e: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::Persistence(e.to_string())
}

fn conversion_err(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| conversion_err(idx, format!("timestamp out of range: {ms}")))
}

fn opt_from_millis(idx: usize, ms: Option<i64>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    ms.map(|ms| from_millis(idx, ms)).transpose()
}

fn row_to_schedule(row: &rusqlite::Row<'_>) -> rusqlite::Result<Schedule> {
    let id: String = row.get(0)?;
    let id = id
        .parse::<ScheduleId>()
        .map_err(|e| conversion_err(0, format!("schedule id {id}: {e}")))?;
    let properties: String = row.get(5)?;
    let message_properties: MessageProperties = serde_json::from_str(&properties)
        .map_err(|e| conversion_err(5, format!("message properties: {e}")))?;
    let exchange_kind: String = row.get(6)?;
    let exchange_kind = exchange_kind
        .parse::<ExchangeKind>()
        .map_err(|e| conversion_err(6, e.to_string()))?;
    let state: String = row.get(9)?;
    let state = ScheduleState::parse(&state)
        .ok_or_else(|| conversion_err(9, format!("unknown state {state}")))?;

    Ok(Schedule {
        id,
        wake_time: from_millis(1, row.get(1)?)?,
        cancellation_key: row.get(2)?,
        binding_key: row.get(3)?,
        inner_message: row.get(4)?,
        message_properties,
        exchange_kind,
        exchange: row.get(7)?,
        routing_key: row.get(8)?,
        state,
        publishing_time: opt_from_millis(10, row.get(10)?)?,
        published_time: opt_from_millis(11, row.get(11)?)?,
    })
}

/// Persistent store on a single SQLite database file.
#[derive(Clone)]
pub struct SqliteScheduleStore {
    conn: Connection,
    delete_timeout: Duration,
}

impl SqliteScheduleStore {
    /// Open (creating if needed) the database at `path`.
    ///
    /// `delete_timeout` is how long Published records are kept.
    pub async fn open(
        path: impl AsRef<Path>,
        delete_timeout: Duration,
    ) -> Result<Self, SchedulerError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).await.map_err(storage_err)?;
        tracing::info!(path = %path.display(), "schedule store opened");
        Self::init(conn, delete_timeout).await
    }

    /// Private, non-durable database. Mainly for tests.
    pub async fn open_in_memory(delete_timeout: Duration) -> Result<Self, SchedulerError> {
        let conn = Connection::open_in_memory().await.map_err(storage_err)?;
        Self::init(conn, delete_timeout).await
    }

    async fn init(conn: Connection, delete_timeout: Duration) -> Result<Self, SchedulerError> {
        conn.call(|conn| -> Result<(), rusqlite::Error> {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
        .map_err(storage_err)?;
        Ok(Self {
            conn,
            delete_timeout,
        })
    }

    /// Snapshot of one record.
    pub async fn get(&self, id: ScheduleId) -> Result<Option<Schedule>, SchedulerError> {
        let id = id.as_ulid().to_string();
        self.conn
            .call(move |conn| -> Result<Option<Schedule>, rusqlite::Error> {
                conn.query_row(
                    &format!("SELECT {COLUMNS} FROM schedules WHERE id = ?1"),
                    params![id],
                    row_to_schedule,
                )
                .optional()
            })
            .await
            .map_err(storage_err)
    }

    pub async fn close(self) -> Result<(), SchedulerError> {
        self.conn.close().await.map_err(storage_err)
    }
}

#[async_trait]
impl ScheduleStore for SqliteScheduleStore {
    async fn store(&self, schedule: Schedule) -> Result<(), SchedulerError> {
        if schedule.state != ScheduleState::Pending {
            return Err(SchedulerError::Validation(format!(
                "new schedule {} must be pending, got {}",
                schedule.id,
                schedule.state.as_str()
            )));
        }
        let properties = serde_json::to_string(&schedule.message_properties)?;
        self.conn
            .call(move |conn| -> Result<(), rusqlite::Error> {
                conn.execute(
                    "INSERT INTO schedules (id, wake_time, cancellation_key, binding_key, \
                     inner_message, message_properties, exchange_kind, exchange, routing_key, \
                     state) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending')",
                    params![
                        schedule.id.as_ulid().to_string(),
                        millis(schedule.wake_time),
                        schedule.cancellation_key,
                        schedule.binding_key,
                        schedule.inner_message,
                        properties,
                        schedule.exchange_kind.as_str(),
                        schedule.exchange,
                        schedule.routing_key,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(storage_err)
    }

    async fn cancel(&self, cancellation_key: &str) -> Result<(), SchedulerError> {
        let key = cancellation_key.to_string();
        let deleted = self
            .conn
            .call(move |conn| -> Result<usize, rusqlite::Error> {
                conn.execute(
                    "DELETE FROM schedules WHERE cancellation_key = ?1",
                    params![key],
                )
            })
            .await
            .map_err(storage_err)?;
        tracing::debug!(cancellation_key, deleted, "schedules cancelled");
        Ok(())
    }

    async fn claim_due(&self, now: DateTime<Utc>) -> Result<Option<Schedule>, SchedulerError> {
        let now = millis(now);
        self.conn
            .call(move |conn| -> Result<Option<Schedule>, rusqlite::Error> {
                // write lock up front so a concurrent claimer waits instead of racing
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let claimed = tx
                    .query_row(
                        &format!(
                            "UPDATE schedules SET state = 'publishing', publishing_time = ?1 \
                             WHERE id = (SELECT id FROM schedules \
                                         WHERE state = 'pending' AND wake_time <= ?1 \
                                         ORDER BY wake_time ASC, id ASC LIMIT 1) \
                             RETURNING {COLUMNS}"
                        ),
                        params![now],
                        row_to_schedule,
                    )
                    .optional()?;
                tx.commit()?;
                Ok(claimed)
            })
            .await
            .map_err(storage_err)
    }

    async fn mark_published(
        &self,
        id: ScheduleId,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        let id = id.as_ulid().to_string();
        let now = millis(now);
        self.conn
            .call(move |conn| -> Result<usize, rusqlite::Error> {
                conn.execute(
                    "UPDATE schedules SET state = 'published', published_time = ?2, \
                     publishing_time = NULL \
                     WHERE id = ?1 AND state = 'publishing'",
                    params![id, now],
                )
            })
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn reclaim_timed_out(
        &self,
        now: DateTime<Utc>,
        publish_timeout: Duration,
    ) -> Result<usize, SchedulerError> {
        let timed_out_before = millis(now - publish_timeout);
        let expired_before = millis(now - self.delete_timeout);
        let (reclaimed, purged) = self
            .conn
            .call(move |conn| -> Result<(usize, usize), rusqlite::Error> {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let reclaimed = tx.execute(
                    "UPDATE schedules SET state = 'pending', publishing_time = NULL \
                     WHERE state = 'publishing' AND publishing_time <= ?1",
                    params![timed_out_before],
                )?;
                let purged = tx.execute(
                    "DELETE FROM schedules WHERE state = 'published' AND published_time <= ?1",
                    params![expired_before],
                )?;
                tx.commit()?;
                Ok((reclaimed, purged))
            })
            .await
            .map_err(storage_err)?;
        if purged > 0 {
            tracing::debug!(purged, "expired published schedules removed");
        }
        Ok(reclaimed)
    }

    async fn counts(&self) -> Result<ScheduleCounts, SchedulerError> {
        let rows = self
            .conn
            .call(|conn| -> Result<Vec<(String, i64)>, rusqlite::Error> {
                let mut stmt =
                    conn.prepare("SELECT state, COUNT(*) FROM schedules GROUP BY state")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(storage_err)?;

        let mut counts = ScheduleCounts::default();
        for (state, n) in rows {
            let state = ScheduleState::parse(&state)
                .ok_or_else(|| storage_err(format!("unknown state {state}")))?;
            counts.add(state, n.max(0) as usize);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::schedule::fixtures::pending_at;
    use chrono::TimeZone;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 18, 9, 30, 0).unwrap()
    }

    async fn memory_store() -> SqliteScheduleStore {
        SqliteScheduleStore::open_in_memory(Duration::minutes(5))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn store_round_trips_every_field() {
        let store = memory_store().await;
        let mut schedule = pending_at(now(), Some("bcd"));
        schedule
            .message_properties
            .headers
            .insert("tenant".into(), "acme".into());
        store.store(schedule.clone()).await.unwrap();

        let loaded = store.get(schedule.id).await.unwrap().unwrap();
        assert_eq!(loaded, schedule);
    }

    #[tokio::test]
    async fn store_rejects_duplicate_id() {
        let store = memory_store().await;
        let schedule = pending_at(now(), None);
        store.store(schedule.clone()).await.unwrap();
        assert!(matches!(
            store.store(schedule).await,
            Err(SchedulerError::Persistence(_))
        ));
    }

    #[tokio::test]
    async fn claim_due_then_mark_published() {
        let store = memory_store().await;
        let schedule = pending_at(now() - Duration::days(1), None);
        store.store(schedule.clone()).await.unwrap();

        let claimed = store.claim_due(now()).await.unwrap().unwrap();
        assert_eq!(claimed.id, schedule.id);
        assert_eq!(claimed.state, ScheduleState::Publishing);
        assert_eq!(claimed.publishing_time, Some(now()));

        store.mark_published(schedule.id, now()).await.unwrap();
        let published = store.get(schedule.id).await.unwrap().unwrap();
        assert_eq!(published.state, ScheduleState::Published);
        assert_eq!(published.published_time, Some(now()));
        assert!(published.publishing_time.is_none());

        // idempotent, and unknown ids are fine
        store
            .mark_published(schedule.id, now() + Duration::seconds(9))
            .await
            .unwrap();
        assert_eq!(store.get(schedule.id).await.unwrap().unwrap(), published);
        store
            .mark_published(pending_at(now(), None).id, now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn claim_due_orders_by_wake_time_and_skips_future() {
        let store = memory_store().await;
        let second = pending_at(now() - Duration::minutes(1), None);
        let first = pending_at(now() - Duration::minutes(10), None);
        let future = pending_at(now() + Duration::minutes(1), None);
        for s in [second.clone(), future.clone(), first.clone()] {
            store.store(s).await.unwrap();
        }

        assert_eq!(store.claim_due(now()).await.unwrap().unwrap().id, first.id);
        assert_eq!(store.claim_due(now()).await.unwrap().unwrap().id, second.id);
        assert!(store.claim_due(now()).await.unwrap().is_none());

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.publishing, 2);
        assert_eq!(counts.pending, 1);
    }

    #[tokio::test]
    async fn reclaim_timed_out_returns_stale_claims_to_pending() {
        let store = memory_store().await;
        let done = pending_at(now() - Duration::days(2), None);
        store.store(done.clone()).await.unwrap();
        store
            .claim_due(now() - Duration::minutes(2))
            .await
            .unwrap()
            .unwrap();
        store
            .mark_published(done.id, now() - Duration::seconds(90))
            .await
            .unwrap();

        let stale = pending_at(now() - Duration::days(1), None);
        store.store(stale.clone()).await.unwrap();
        store
            .claim_due(now() - Duration::seconds(61))
            .await
            .unwrap()
            .unwrap();

        let fresh = pending_at(now() - Duration::hours(1), None);
        store.store(fresh.clone()).await.unwrap();
        store.claim_due(now()).await.unwrap().unwrap();

        let reclaimed = store
            .reclaim_timed_out(now(), Duration::seconds(60))
            .await
            .unwrap();
        assert_eq!(reclaimed, 1);

        let stale = store.get(stale.id).await.unwrap().unwrap();
        assert_eq!(stale.state, ScheduleState::Pending);
        assert!(stale.publishing_time.is_none());
        let fresh = store.get(fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh.state, ScheduleState::Publishing);

        let done_after = store.get(done.id).await.unwrap().unwrap();
        assert_eq!(done_after.state, ScheduleState::Published);
        assert_eq!(done_after.published_time, Some(now() - Duration::seconds(90)));
        assert!(done_after.publishing_time.is_none());
    }

    #[tokio::test]
    async fn cancel_deletes_all_matching_keys_only() {
        let store = memory_store().await;
        let x1 = pending_at(now(), Some("X"));
        let x2 = pending_at(now(), Some("X"));
        let other = pending_at(now(), Some("Z"));
        for s in [x1.clone(), x2.clone(), other.clone()] {
            store.store(s).await.unwrap();
        }

        store.cancel("X").await.unwrap();
        store.cancel("nobody").await.unwrap();

        assert!(store.get(x1.id).await.unwrap().is_none());
        assert!(store.get(x2.id).await.unwrap().is_none());
        assert!(store.get(other.id).await.unwrap().is_some());
        assert_eq!(store.counts().await.unwrap().total(), 1);
    }

    #[tokio::test]
    async fn published_records_are_purged_after_delete_timeout() {
        let store = memory_store().await;
        let schedule = pending_at(now() - Duration::days(1), None);
        store.store(schedule.clone()).await.unwrap();
        store.claim_due(now()).await.unwrap().unwrap();
        store.mark_published(schedule.id, now()).await.unwrap();

        store
            .reclaim_timed_out(now() + Duration::minutes(1), Duration::seconds(60))
            .await
            .unwrap();
        assert!(store.get(schedule.id).await.unwrap().is_some());

        store
            .reclaim_timed_out(now() + Duration::minutes(5), Duration::seconds(60))
            .await
            .unwrap();
        assert!(store.get(schedule.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("schedules.db");
        let schedule = pending_at(now(), Some("durable"));

        let store = SqliteScheduleStore::open(&path, Duration::minutes(5))
            .await
            .unwrap();
        store.store(schedule.clone()).await.unwrap();
        store.close().await.unwrap();

        let reopened = SqliteScheduleStore::open(&path, Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(reopened.get(schedule.id).await.unwrap().unwrap(), schedule);
    }

    #[tokio::test]
    async fn claims_from_two_connections_never_overlap() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let a = Arc::new(
            SqliteScheduleStore::open(&path, Duration::minutes(5))
                .await
                .unwrap(),
        );
        let b = Arc::new(
            SqliteScheduleStore::open(&path, Duration::minutes(5))
                .await
                .unwrap(),
        );

        let n = 20;
        for i in 0..n {
            a.store(pending_at(now() - Duration::seconds(i), None))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for i in 0..n {
            let store = if i % 2 == 0 { Arc::clone(&a) } else { Arc::clone(&b) };
            handles.push(tokio::spawn(async move { store.claim_due(now()).await }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            let schedule = handle.await.unwrap().unwrap().unwrap();
            assert!(seen.insert(schedule.id), "claimed twice: {}", schedule.id);
        }
        assert_eq!(seen.len(), n as usize);
        assert!(b.claim_due(now()).await.unwrap().is_none());
    }
}
