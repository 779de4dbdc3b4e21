//! SchedulerService - 3 つのループの起動と停止

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::command_loop::CommandLoop;
use super::publish_loop::PublishLoop;
use super::reaper_loop::ReaperLoop;
use super::status::ScheduleCounts;
use crate::config::SchedulerConfig;
use crate::domain::SchedulerError;
use crate::ports::{Clock, IdGenerator, MessageBus, ScheduleStore};
use crate::typed::Conventions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Running,
}

struct Running {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

/// SchedulerService はスケジューリングサービス本体
///
/// - `start()` でコマンド購読・publish sweep・timeout sweep を起動
/// - `stop()` は各ループに停止を伝え、実行中の tick が終わるのを待つ
///
/// 同じストアを共有する複数プロセスで動かしても安全です（排他はストア側の責務）。
pub struct SchedulerService {
    store: Arc<dyn ScheduleStore>,
    bus: Arc<dyn MessageBus>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    conventions: Conventions,
    config: SchedulerConfig,
    running: Option<Running>,
}

impl SchedulerService {
    pub(crate) fn new(
        store: Arc<dyn ScheduleStore>,
        bus: Arc<dyn MessageBus>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        conventions: Conventions,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            bus,
            clock,
            ids,
            conventions,
            config,
            running: None,
        }
    }

    pub fn state(&self) -> ServiceState {
        if self.running.is_some() {
            ServiceState::Running
        } else {
            ServiceState::Stopped
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub async fn counts(&self) -> Result<ScheduleCounts, SchedulerError> {
        self.store.counts().await
    }

    /// Bind the control queues and spawn the loops.
    ///
    /// Fails without spawning anything if the bus cannot be reached.
    pub async fn start(&mut self) -> Result<(), SchedulerError> {
        if self.running.is_some() {
            return Err(SchedulerError::Validation(
                "scheduler service is already running".into(),
            ));
        }

        let commands = CommandLoop::new(
            Arc::clone(&self.store),
            Arc::clone(&self.bus),
            Arc::clone(&self.ids),
            self.conventions.clone(),
            self.config.subscription_id.clone(),
        );
        let subscriptions = commands.subscribe().await?;

        let publisher = PublishLoop::new(
            Arc::clone(&self.store),
            Arc::clone(&self.bus),
            Arc::clone(&self.clock),
            self.config.publish_interval(),
            self.config.publish_max_schedules,
        );
        let reaper = ReaperLoop::new(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.config.handle_timeout_interval(),
            self.config.publish_timeout(),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let joins = vec![
            tokio::spawn(commands.run(subscriptions, shutdown_rx.clone())),
            tokio::spawn(publisher.run(shutdown_rx.clone())),
            tokio::spawn(reaper.run(shutdown_rx)),
        ];
        self.running = Some(Running { shutdown_tx, joins });

        tracing::info!(
            subscription_id = %self.config.subscription_id,
            publish_interval_ms = self.config.publish_interval_ms,
            handle_timeout_interval_ms = self.config.handle_timeout_interval_ms,
            "scheduler service started"
        );
        Ok(())
    }

    /// Signal every loop and wait for them to finish. No-op when stopped.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        // ignore send error: loops may already be gone
        let _ = running.shutdown_tx.send(true);
        for join in running.joins {
            if let Err(e) = join.await {
                tracing::error!(error = %e, "scheduler loop panicked");
            }
        }
        tracing::info!("scheduler service stopped");
    }
}
