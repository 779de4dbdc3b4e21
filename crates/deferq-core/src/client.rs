//! Producer-side adapter.
//!
//! `FuturePublisher` turns "publish M at T" into a `ScheduleCommand` on the
//! control exchange. It never touches a schedule store; whichever process
//! consumes the control exchange owns that.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::domain::{
    CancelCommand, DeliveryMode, ExchangeKind, OutgoingMessage, ScheduleCommand, SchedulerError,
    command::validate_cancellation_key,
};
use crate::ports::{Clock, MessageBus, SystemClock};
use crate::typed::{Conventions, Message, MessageSerializer};

/// Routing key used when the caller does not restrict the route.
pub const DEFAULT_TOPIC: &str = "#";

/// FuturePublisher は遅延 publish をコマンドとしてバスに送る
///
/// # 使用例
/// ```ignore
/// let publisher = FuturePublisher::new(bus);
/// publisher
///     .future_publish_after(Duration::minutes(5), &OrderReminder { id }, Some("order-42"))
///     .await?;
/// publisher.cancel_future_publish("order-42").await?;
/// ```
///
/// # 保証
/// - async メソッドはバスがコマンドを受理するまで完了しない
/// - バスに届かなければ `SchedulerError::Transport` を返す
#[derive(Clone)]
pub struct FuturePublisher {
    bus: Arc<dyn MessageBus>,
    clock: Arc<dyn Clock>,
    conventions: Conventions,
    serializer: MessageSerializer,
}

impl FuturePublisher {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            bus,
            clock: Arc::new(SystemClock),
            conventions: Conventions::default(),
            serializer: MessageSerializer::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_conventions(mut self, conventions: Conventions) -> Self {
        self.conventions = conventions;
        self
    }

    /// What an immediate publish of `message` on `topic` would send.
    pub fn prepare<M: Message>(
        &self,
        message: &M,
        topic: &str,
    ) -> Result<OutgoingMessage, SchedulerError> {
        if topic.trim().is_empty() {
            return Err(SchedulerError::Validation("topic is empty".into()));
        }
        let serialized = self.serializer.serialize(message)?;
        Ok(OutgoingMessage {
            exchange_kind: ExchangeKind::Topic,
            exchange: self.conventions.exchange_for::<M>(),
            routing_key: topic.to_string(),
            body: serialized.body,
            properties: serialized.properties,
        })
    }

    pub async fn publish<M: Message>(&self, message: &M) -> Result<(), SchedulerError> {
        self.publish_with_topic(message, DEFAULT_TOPIC).await
    }

    pub async fn publish_with_topic<M: Message>(
        &self,
        message: &M,
        topic: &str,
    ) -> Result<(), SchedulerError> {
        let outgoing = self.prepare(message, topic)?;
        self.bus
            .declare_exchange(&outgoing.exchange, outgoing.exchange_kind)
            .await?;
        self.bus.publish(outgoing).await
    }

    pub async fn future_publish<M: Message>(
        &self,
        wake_time: DateTime<Utc>,
        message: &M,
        cancellation_key: Option<&str>,
    ) -> Result<(), SchedulerError> {
        self.future_publish_with_topic(wake_time, message, DEFAULT_TOPIC, cancellation_key).await
    }

    /// Publish `message` on `topic` once `wake_time` has passed.
    pub async fn future_publish_with_topic<M: Message>(
        &self,
        wake_time: DateTime<Utc>,
        message: &M,
        topic: &str,
        cancellation_key: Option<&str>,
    ) -> Result<(), SchedulerError> {
        validate_cancellation_key(cancellation_key)?;
        let outgoing = self.prepare(message, topic)?;
        let delivery_mode = outgoing.properties.delivery_mode;
        let command = ScheduleCommand {
            wake_time,
            cancellation_key: cancellation_key.map(str::to_string),
            inner_message: outgoing.body,
            message_properties: outgoing.properties,
            binding_key: M::TYPE.to_string(),
            exchange_kind: outgoing.exchange_kind,
            exchange: outgoing.exchange,
            routing_key: outgoing.routing_key,
        };
        self.send_command(&command, delivery_mode).await?;
        tracing::debug!(
            message_type = M::TYPE,
            %wake_time,
            cancellation_key,
            "future publish requested"
        );
        Ok(())
    }

    /// `future_publish` at now + `delay`.
    pub async fn future_publish_after<M: Message>(
        &self,
        delay: Duration,
        message: &M,
        cancellation_key: Option<&str>,
    ) -> Result<(), SchedulerError> {
        let wake_time = self.clock.now() + delay;
        self.future_publish(wake_time, message, cancellation_key).await
    }

    /// Withdraw every schedule tagged with `cancellation_key`.
    ///
    /// Best effort: a schedule already being published may still go out.
    pub async fn cancel_future_publish(
        &self,
        cancellation_key: &str,
    ) -> Result<(), SchedulerError> {
        let command = CancelCommand {
            cancellation_key: cancellation_key.to_string(),
        };
        command.validate()?;
        self.send_command(&command, DeliveryMode::Persistent).await?;
        tracing::debug!(cancellation_key, "future publish cancel requested");
        Ok(())
    }

    async fn send_command<C: Message>(
        &self,
        command: &C,
        delivery_mode: DeliveryMode,
    ) -> Result<(), SchedulerError> {
        let mut serialized = self.serializer.serialize(command)?;
        serialized.properties.delivery_mode = delivery_mode;
        let exchange = self.conventions.exchange_for::<C>();
        self.bus
            .declare_exchange(&exchange, ExchangeKind::Topic)
            .await?;
        self.bus
            .publish(OutgoingMessage {
                exchange_kind: ExchangeKind::Topic,
                exchange,
                routing_key: self.conventions.topic_for::<C>(),
                body: serialized.body,
                properties: serialized.properties,
            })
            .await
    }
}

/// Blocking facade over `FuturePublisher` for synchronous callers.
///
/// Owns a current-thread runtime; must not be used from inside another
/// tokio runtime.
pub struct BlockingFuturePublisher {
    inner: FuturePublisher,
    runtime: tokio::runtime::Runtime,
}

impl BlockingFuturePublisher {
    pub fn new(inner: FuturePublisher) -> Result<Self, SchedulerError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SchedulerError::Transport(format!("runtime: {e}")))?;
        Ok(Self { inner, runtime })
    }

    pub fn publish<M: Message>(&self, message: &M) -> Result<(), SchedulerError> {
        self.runtime.block_on(self.inner.publish(message))
    }

    pub fn future_publish<M: Message>(
        &self,
        wake_time: DateTime<Utc>,
        message: &M,
        cancellation_key: Option<&str>,
    ) -> Result<(), SchedulerError> {
        let Self { inner, runtime } = self;
        runtime.block_on(inner.future_publish(wake_time, message, cancellation_key))
    }

    pub fn future_publish_with_topic<M: Message>(
        &self,
        wake_time: DateTime<Utc>,
        message: &M,
        topic: &str,
        cancellation_key: Option<&str>,
    ) -> Result<(), SchedulerError> {
        let Self { inner, runtime } = self;
        runtime.block_on(inner.future_publish_with_topic(
            wake_time,
            message,
            topic,
            cancellation_key,
        ))
    }

    pub fn future_publish_after<M: Message>(
        &self,
        delay: Duration,
        message: &M,
        cancellation_key: Option<&str>,
    ) -> Result<(), SchedulerError> {
        let Self { inner, runtime } = self;
        runtime.block_on(inner.future_publish_after(delay, message, cancellation_key))
    }

    pub fn cancel_future_publish(&self, cancellation_key: &str) -> Result<(), SchedulerError> {
        self.runtime.block_on(self.inner.cancel_future_publish(cancellation_key))
    }
}
