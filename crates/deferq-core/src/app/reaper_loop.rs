//! ReaperLoop - publish timeout を過ぎた claim の回収

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::domain::SchedulerError;
use crate::ports::{Clock, ScheduleStore};

/// ReaperLoop は Publishing のまま放置されたスケジュールを Pending に戻す
///
/// claim したプロセスが publish 前にクラッシュした場合、これが唯一の回復経路です。
/// 遅いだけのプロセスから奪うこともあるので、その場合は重複 publish になります。
pub struct ReaperLoop {
    store: Arc<dyn ScheduleStore>,
    clock: Arc<dyn Clock>,
    interval: StdDuration,
    publish_timeout: Duration,
}

impl ReaperLoop {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        clock: Arc<dyn Clock>,
        interval: StdDuration,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            interval,
            publish_timeout,
        }
    }

    /// One sweep. Returns how many schedules went back to Pending.
    pub async fn tick(&self) -> Result<usize, SchedulerError> {
        self.store
            .reclaim_timed_out(self.clock.now(), self.publish_timeout)
            .await
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(0) => {}
                        Ok(n) => tracing::warn!(
                            reclaimed = n,
                            timeout_secs = self.publish_timeout.num_seconds(),
                            "timed out schedules returned to pending"
                        ),
                        Err(e) => tracing::error!(error = %e, "timeout sweep failed"),
                    }
                }
            }
        }
        tracing::debug!("reaper loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ScheduleState;
    use crate::domain::schedule::fixtures::pending_at;
    use crate::impls::InMemoryScheduleStore;
    use crate::ports::FixedClock;
    use chrono::{DateTime, TimeZone, Utc};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 18, 9, 30, 0).unwrap()
    }

    #[tokio::test]
    async fn tick_reclaims_only_expired_claims() {
        let store = InMemoryScheduleStore::default();
        let clock = Arc::new(FixedClock::new(now() - Duration::seconds(61)));

        let stale = pending_at(now() - Duration::days(1), None);
        store.store(stale.clone()).await.unwrap();
        store.claim_due(clock.now()).await.unwrap().unwrap();

        clock.set(now());
        let fresh = pending_at(now() - Duration::days(1), None);
        store.store(fresh.clone()).await.unwrap();
        store.claim_due(clock.now()).await.unwrap().unwrap();

        let reaper = ReaperLoop::new(
            Arc::new(store.clone()),
            clock.clone(),
            StdDuration::from_millis(10),
            Duration::seconds(60),
        );
        assert_eq!(reaper.tick().await.unwrap(), 1);

        let stale = store.get(stale.id).await.unwrap();
        assert_eq!(stale.state, ScheduleState::Pending);
        assert!(stale.publishing_time.is_none());
        assert_eq!(
            store.get(fresh.id).await.unwrap().state,
            ScheduleState::Publishing
        );
        assert_eq!(reaper.tick().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn run_exits_when_sender_dropped() {
        let reaper = ReaperLoop::new(
            Arc::new(InMemoryScheduleStore::default()),
            Arc::new(FixedClock::new(now())),
            StdDuration::from_millis(10),
            Duration::seconds(60),
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(reaper.run(rx));
        drop(tx);
        handle.await.unwrap();
    }
}
