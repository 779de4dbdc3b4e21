//! ScheduleStore port - スケジュールの正本（source of truth）
//!
//! 実装:
//! - `impls::InMemoryScheduleStore`（テスト・単一プロセス用）
//! - `impls::SqliteScheduleStore`（永続化、複数プロセスで共有可能）

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::app::status::ScheduleCounts;
use crate::domain::{Schedule, ScheduleId, SchedulerError};

/// Durable storage for schedule records.
///
/// Every operation is atomic with respect to concurrent callers, including
/// other processes sharing the same backing storage. Nothing above this
/// trait caches record state; the claim/lease protocol lives entirely here.
///
/// Published records are purged by the store itself once its deletion
/// timeout has elapsed; callers never delete records explicitly.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Insert a new record. The record must be `Pending`.
    async fn store(&self, schedule: Schedule) -> Result<(), SchedulerError>;

    /// Delete every record whose cancellation key equals `cancellation_key`,
    /// whatever its state. Unknown keys are a no-op.
    ///
    /// Best-effort: a record already claimed may still be published.
    async fn cancel(&self, cancellation_key: &str) -> Result<(), SchedulerError>;

    /// Atomically claim the Pending record with the smallest `wake_time`
    /// that is `<= now`, moving it to Publishing with `publishing_time = now`.
    ///
    /// Two concurrent callers never receive the same record.
    async fn claim_due(&self, now: DateTime<Utc>) -> Result<Option<Schedule>, SchedulerError>;

    /// Publishing -> Published. Missing or already published records are a no-op.
    async fn mark_published(
        &self,
        id: ScheduleId,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError>;

    /// Move every record Publishing since at least `publish_timeout` back to
    /// Pending. Returns how many were reclaimed.
    async fn reclaim_timed_out(
        &self,
        now: DateTime<Utc>,
        publish_timeout: Duration,
    ) -> Result<usize, SchedulerError>;

    /// Number of records per state.
    async fn counts(&self) -> Result<ScheduleCounts, SchedulerError>;
}
