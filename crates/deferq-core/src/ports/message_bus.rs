//! MessageBus port - AMQP バスの境界
//!
//! エクスチェンジ宣言・publish・購読だけを抽象化します。
//! ワイヤーエンコーディングや接続管理は実装側の責務です。

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{Delivery, ExchangeKind, OutgoingMessage, SchedulerError};

/// Deliveries for one subscription. Closed when the bus shuts down.
pub type Subscription = mpsc::Receiver<Delivery>;

/// MessageBus はメッセージバスへの最小インターフェース
///
/// # 設計原則
/// - publish は bus が受理した時点で完了する（fire-and-forget ではない）
/// - 失敗はすべて `SchedulerError::Transport`
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Declare (idempotently) an exchange.
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind)
    -> Result<(), SchedulerError>;

    /// Publish one message. The destination exchange must have been declared.
    async fn publish(&self, message: OutgoingMessage) -> Result<(), SchedulerError>;

    /// Bind the queue `queue` to `exchange` with `binding_key` and start
    /// consuming it. Subscribing again to the same queue replaces its consumer.
    async fn subscribe(
        &self,
        exchange: &str,
        binding_key: &str,
        queue: &str,
    ) -> Result<Subscription, SchedulerError>;
}
