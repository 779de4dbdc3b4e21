//! PublishLoop - 期限の来たスケジュールを元の宛先へ再 publish

use std::sync::Arc;
use std::time::Duration as StdDuration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::domain::SchedulerError;
use crate::ports::{Clock, MessageBus, ScheduleStore};

/// PublishLoop は一定間隔で claim → publish → mark_published を回す
///
/// # フロー
/// 1. ScheduleStore::claim_due() で1件 claim（Pending → Publishing）
/// 2. MessageBus::publish() で元のエクスチェンジ / ルーティングキーへ送信
/// 3. ScheduleStore::mark_published() で Published にする
/// 4. 1 tick あたり最大 `max_schedules` 件まで繰り返す
///
/// publish に失敗したレコードは Publishing のまま残り、
/// ReaperLoop が publish timeout 後に Pending へ戻します（at-least-once）。
pub struct PublishLoop {
    store: Arc<dyn ScheduleStore>,
    bus: Arc<dyn MessageBus>,
    clock: Arc<dyn Clock>,
    interval: StdDuration,
    max_schedules: usize,
}

impl PublishLoop {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        bus: Arc<dyn MessageBus>,
        clock: Arc<dyn Clock>,
        interval: StdDuration,
        max_schedules: usize,
    ) -> Self {
        Self {
            store,
            bus,
            clock,
            interval,
            max_schedules,
        }
    }

    /// One sweep. Returns how many schedules were published.
    ///
    /// The first failure ends the sweep; records published before it stay
    /// published.
    pub async fn tick(&self) -> Result<usize, SchedulerError> {
        let mut published = 0;
        for _ in 0..self.max_schedules {
            let Some(schedule) = self.store.claim_due(self.clock.now()).await? else {
                break;
            };

            let outgoing = schedule.outgoing();
            let result = async {
                self.bus
                    .declare_exchange(&outgoing.exchange, outgoing.exchange_kind)
                    .await?;
                self.bus.publish(outgoing).await
            }
            .await;
            if let Err(e) = result {
                tracing::warn!(
                    schedule_id = %schedule.id,
                    error = %e,
                    "publish failed, schedule left for timeout recovery"
                );
                return Err(e);
            }

            // at this point the message is out; a failure here means a duplicate later
            self.store
                .mark_published(schedule.id, self.clock.now())
                .await?;
            tracing::debug!(
                schedule_id = %schedule.id,
                exchange = %schedule.exchange,
                routing_key = %schedule.routing_key,
                "schedule published"
            );
            published += 1;
        }
        Ok(published)
    }

    /// Tick until shutdown. A tick in progress is always finished.
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
                        Ok(n) => tracing::info!(published = n, "publish sweep finished"),
                        Err(e) => tracing::error!(error = %e, "publish sweep failed"),
                    }
                }
            }
        }
        tracing::debug!("publish loop stopped");
    }
}
