//! CommandLoop - コントロールプレーンのコマンドを受けてストアへ反映

use std::sync::Arc;

use tokio::sync::watch;

use crate::domain::{
    CancelCommand, Delivery, ExchangeKind, Schedule, ScheduleCommand, ScheduleId, SchedulerError,
};
use crate::ports::{IdGenerator, MessageBus, ScheduleStore, Subscription};
use crate::typed::{Conventions, Message, MessageSerializer};

/// Schedule and cancel queues, bound before the loop starts.
pub struct ControlSubscriptions {
    pub schedules: Subscription,
    pub cancels: Subscription,
}

/// CommandLoop は ScheduleCommand / CancelCommand を消費する
///
/// - ScheduleCommand → 検証 → ID 採番 → ScheduleStore::store()
/// - CancelCommand → ScheduleStore::cancel()
///
/// 不正なコマンドはログに出して捨てます（再配送しても直らないため）。
pub struct CommandLoop {
    store: Arc<dyn ScheduleStore>,
    bus: Arc<dyn MessageBus>,
    ids: Arc<dyn IdGenerator>,
    conventions: Conventions,
    serializer: MessageSerializer,
    subscription_id: String,
}

impl CommandLoop {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        bus: Arc<dyn MessageBus>,
        ids: Arc<dyn IdGenerator>,
        conventions: Conventions,
        subscription_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            bus,
            ids,
            conventions,
            serializer: MessageSerializer::new(),
            subscription_id: subscription_id.into(),
        }
    }

    /// Declare the control exchanges and bind this service's queues.
    pub async fn subscribe(&self) -> Result<ControlSubscriptions, SchedulerError> {
        Ok(ControlSubscriptions {
            schedules: self.subscribe_to::<ScheduleCommand>().await?,
            cancels: self.subscribe_to::<CancelCommand>().await?,
        })
    }

    async fn subscribe_to<C: Message>(&self) -> Result<Subscription, SchedulerError> {
        let exchange = self.conventions.exchange_for::<C>();
        let queue = self.conventions.queue_name(C::TYPE, &self.subscription_id);
        self.bus
            .declare_exchange(&exchange, ExchangeKind::Topic)
            .await?;
        self.bus
            .subscribe(&exchange, &self.conventions.topic_for::<C>(), &queue)
            .await
    }

    pub async fn handle_schedule(&self, delivery: &Delivery) -> Result<ScheduleId, SchedulerError> {
        let command: ScheduleCommand = self
            .serializer
            .deserialize(&delivery.body, &delivery.properties)?;
        command.validate()?;

        let id = self.ids.generate_schedule_id();
        let wake_time = command.wake_time;
        self.store
            .store(Schedule::from_command(id, command))
            .await?;
        tracing::debug!(schedule_id = %id, %wake_time, "schedule stored");
        Ok(id)
    }

    pub async fn handle_cancel(&self, delivery: &Delivery) -> Result<(), SchedulerError> {
        let command: CancelCommand = self
            .serializer
            .deserialize(&delivery.body, &delivery.properties)?;
        command.validate()?;
        self.store.cancel(&command.cancellation_key).await
    }

    /// Consume both queues until shutdown. A command in progress is finished.
    pub async fn run(
        self,
        subscriptions: ControlSubscriptions,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let ControlSubscriptions {
            mut schedules,
            mut cancels,
        } = subscriptions;
        let mut schedules_open = true;
        let mut cancels_open = true;

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
                delivery = schedules.recv(), if schedules_open => match delivery {
                    Some(delivery) => {
                        if let Err(e) = self.handle_schedule(&delivery).await {
                            log_rejected("schedule", &e);
                        }
                    }
                    None => {
                        tracing::warn!("schedule command subscription closed");
                        schedules_open = false;
                    }
                },
                delivery = cancels.recv(), if cancels_open => match delivery {
                    Some(delivery) => {
                        if let Err(e) = self.handle_cancel(&delivery).await {
                            log_rejected("cancel", &e);
                        }
                    }
                    None => {
                        tracing::warn!("cancel command subscription closed");
                        cancels_open = false;
                    }
                },
            }
        }
        tracing::debug!("command loop stopped");
    }
}

fn log_rejected(command: &str, error: &SchedulerError) {
    if error.is_transient() {
        tracing::error!(command, error = %error, "control command failed");
    } else {
        tracing::warn!(command, error = %error, "control command rejected");
    }
}
