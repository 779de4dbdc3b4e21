//! In-memory schedule store.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::app::status::ScheduleCounts;
use crate::domain::{Schedule, ScheduleId, ScheduleState, SchedulerError};
use crate::ports::ScheduleStore;

/// In-memory store state.
///
/// `records` is the single source of truth; the two indexes hold ids only
/// and are kept in step by every mutation.
#[derive(Default)]
struct InMemoryStoreState {
    records: HashMap<ScheduleId, Schedule>,

    /// Pending records ordered by (wake_time, id), earliest first.
    pending: BTreeSet<(DateTime<Utc>, ScheduleId)>,

    /// Records that carry a cancellation key.
    by_cancellation_key: HashMap<String, HashSet<ScheduleId>>,
}

impl InMemoryStoreState {
    fn insert(&mut self, schedule: Schedule) {
        if schedule.state == ScheduleState::Pending {
            self.pending.insert((schedule.wake_time, schedule.id));
        }
        if let Some(key) = &schedule.cancellation_key {
            self.by_cancellation_key
                .entry(key.clone())
                .or_default()
                .insert(schedule.id);
        }
        self.records.insert(schedule.id, schedule);
    }

    fn remove(&mut self, id: ScheduleId) -> Option<Schedule> {
        let schedule = self.records.remove(&id)?;
        self.pending.remove(&(schedule.wake_time, id));
        if let Some(key) = &schedule.cancellation_key
            && let Some(ids) = self.by_cancellation_key.get_mut(key)
        {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_cancellation_key.remove(key);
            }
        }
        Some(schedule)
    }

    fn claim_first_due(&mut self, now: DateTime<Utc>) -> Result<Option<Schedule>, SchedulerError> {
        let Some(&(wake_time, id)) = self.pending.first() else {
            return Ok(None);
        };
        if wake_time > now {
            return Ok(None);
        }
        self.pending.remove(&(wake_time, id));

        let record = self.records.get_mut(&id).ok_or_else(|| {
            SchedulerError::Persistence(format!("pending index points at missing {id}"))
        })?;
        record.claim(now)?;
        Ok(Some(record.clone()))
    }

    fn reclaim_timed_out(
        &mut self,
        now: DateTime<Utc>,
        publish_timeout: Duration,
    ) -> Result<usize, SchedulerError> {
        let mut reclaimed = 0;
        for record in self.records.values_mut() {
            if record.is_timed_out(now, publish_timeout) {
                record.reclaim()?;
                self.pending.insert((record.wake_time, record.id));
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    fn purge_expired(&mut self, now: DateTime<Utc>, retention: Duration) -> usize {
        let expired: Vec<ScheduleId> = self
            .records
            .values()
            .filter(|r| r.is_expired(now, retention))
            .map(|r| r.id)
            .collect();
        for id in &expired {
            self.remove(*id);
        }
        expired.len()
    }
}

/// In-memory store implementation.
///
/// Atomicity comes from a single async mutex; no await happens while it is
/// held. Suitable for tests and single-process deployments that accept
/// losing pending schedules on restart.
#[derive(Clone)]
pub struct InMemoryScheduleStore {
    state: Arc<Mutex<InMemoryStoreState>>,
    delete_timeout: Duration,
}

impl InMemoryScheduleStore {
    /// `delete_timeout` is how long Published records are kept.
    pub fn new(delete_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryStoreState::default())),
            delete_timeout,
        }
    }

    /// Snapshot of one record.
    pub async fn get(&self, id: ScheduleId) -> Option<Schedule> {
        self.state.lock().await.records.get(&id).cloned()
    }

    /// Snapshot of every record, earliest wake time first.
    pub async fn all(&self) -> Vec<Schedule> {
        let state = self.state.lock().await;
        let mut all: Vec<Schedule> = state.records.values().cloned().collect();
        all.sort_by_key(|s| (s.wake_time, s.id));
        all
    }
}

impl Default for InMemoryScheduleStore {
    fn default() -> Self {
        Self::new(Duration::minutes(5))
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn store(&self, schedule: Schedule) -> Result<(), SchedulerError> {
        if schedule.state != ScheduleState::Pending {
            return Err(SchedulerError::Validation(format!(
                "new schedule {} must be pending, got {}",
                schedule.id,
                schedule.state.as_str()
            )));
        }
        let mut state = self.state.lock().await;
        if state.records.contains_key(&schedule.id) {
            return Err(SchedulerError::Persistence(format!(
                "duplicate schedule id {}",
                schedule.id
            )));
        }
        state.insert(schedule);
        Ok(())
    }

    async fn cancel(&self, cancellation_key: &str) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().await;
        let ids = state
            .by_cancellation_key
            .get(cancellation_key)
            .cloned()
            .unwrap_or_default();
        for id in ids {
            state.remove(id);
        }
        Ok(())
    }

    async fn claim_due(&self, now: DateTime<Utc>) -> Result<Option<Schedule>, SchedulerError> {
        self.state.lock().await.claim_first_due(now)
    }

    async fn mark_published(
        &self,
        id: ScheduleId,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().await;
        if let Some(record) = state.records.get_mut(&id)
            && record.state == ScheduleState::Publishing
        {
            record.mark_published(now)?;
        }
        Ok(())
    }

    async fn reclaim_timed_out(
        &self,
        now: DateTime<Utc>,
        publish_timeout: Duration,
    ) -> Result<usize, SchedulerError> {
        let mut state = self.state.lock().await;
        let reclaimed = state.reclaim_timed_out(now, publish_timeout)?;
        let purged = state.purge_expired(now, self.delete_timeout);
        if purged > 0 {
            tracing::debug!(purged, "expired published schedules removed");
        }
        Ok(reclaimed)
    }

    async fn counts(&self) -> Result<ScheduleCounts, SchedulerError> {
        let state = self.state.lock().await;
        let mut counts = ScheduleCounts::default();
        for record in state.records.values() {
            counts.record(record.state);
        }
        Ok(counts)
    }
}
