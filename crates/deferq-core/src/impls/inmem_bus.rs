//! InMemoryBus - プロセス内のメッセージバス
//!
//! AMQP のエクスチェンジ / バインディング / キューの振る舞いを最小限に再現します。
//! テストやデモ用で、ブローカー無しで scheduler とプロデューサをつなぎます。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc};

use crate::domain::{Delivery, ExchangeKind, OutgoingMessage, SchedulerError};
use crate::ports::{MessageBus, Subscription};

const QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Binding {
    exchange: String,
    binding_key: String,
    queue: String,
}

#[derive(Default)]
struct BusState {
    exchanges: HashMap<String, ExchangeKind>,
    bindings: Vec<Binding>,
    consumers: HashMap<String, mpsc::Sender<Delivery>>,
    published: Vec<OutgoingMessage>,
    failing: bool,
}

impl BusState {
    /// Distinct queues a message reaches, in binding order.
    fn route(&self, kind: ExchangeKind, message: &OutgoingMessage) -> Vec<String> {
        let mut queues: Vec<String> = Vec::new();
        for binding in self.bindings.iter().filter(|b| b.exchange == message.exchange) {
            let matched = match kind {
                ExchangeKind::Direct => binding.binding_key == message.routing_key,
                ExchangeKind::Topic => topic_matches(&binding.binding_key, &message.routing_key),
                ExchangeKind::Fanout => true,
                ExchangeKind::Headers => headers_match(&binding.binding_key, message),
            };
            if matched && !queues.contains(&binding.queue) {
                queues.push(binding.queue.clone());
            }
        }
        queues
    }
}

/// AMQP topic matching: `*` is exactly one word, `#` is zero or more.
pub(crate) fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    words_match(&words(pattern), &words(routing_key))
}

/// An empty key has no words at all, not one empty word.
fn words(key: &str) -> Vec<&str> {
    if key.is_empty() {
        Vec::new()
    } else {
        key.split('.').collect()
    }
}

fn words_match(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| words_match(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && words_match(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && words_match(rest, &key[1..]),
    }
}

/// Headers binding keys are `k=v` pairs joined by `,`; all must match.
fn headers_match(binding_key: &str, message: &OutgoingMessage) -> bool {
    binding_key
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .all(|pair| match pair.split_once('=') {
            Some((k, v)) => message.properties.headers.get(k).map(String::as_str) == Some(v),
            None => message.properties.headers.contains_key(pair),
        })
}

/// プロセス内バス
///
/// - エクスチェンジは publish / subscribe の前に宣言が必要
/// - バインドされていないメッセージは捨てられる（AMQP と同じ）
/// - publish されたメッセージはすべて記録され、`published()` で参照できる
/// - キューが満杯なら配送は捨てられる（publish は consumer を待たない）
#[derive(Clone, Default)]
pub struct InMemoryBus {
    state: Arc<Mutex<BusState>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message accepted by `publish`, in order.
    pub async fn published(&self) -> Vec<OutgoingMessage> {
        self.state.lock().await.published.clone()
    }

    /// While set, every bus operation fails with a transport error.
    pub async fn set_failing(&self, failing: bool) {
        self.state.lock().await.failing = failing;
    }

    /// Drop all consumers; open subscriptions end.
    pub async fn close(&self) {
        self.state.lock().await.consumers.clear();
    }
}

fn unavailable() -> SchedulerError {
    SchedulerError::Transport("bus unavailable".to_string())
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
    ) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().await;
        if state.failing {
            return Err(unavailable());
        }
        match state.exchanges.get(name) {
            Some(existing) if *existing != kind => Err(SchedulerError::Transport(format!(
                "exchange {name} already declared as {existing}, not {kind}"
            ))),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(name.to_string(), kind);
                tracing::debug!(exchange = name, %kind, "exchange declared");
                Ok(())
            }
        }
    }

    async fn publish(&self, message: OutgoingMessage) -> Result<(), SchedulerError> {
        let targets = {
            let mut state = self.state.lock().await;
            if state.failing {
                return Err(unavailable());
            }
            let Some(kind) = state.exchanges.get(&message.exchange).copied() else {
                return Err(SchedulerError::Transport(format!(
                    "no exchange named {}",
                    message.exchange
                )));
            };
            let senders: Vec<(String, mpsc::Sender<Delivery>)> = state
                .route(kind, &message)
                .into_iter()
                .filter_map(|queue| {
                    let sender = state.consumers.get(&queue)?.clone();
                    Some((queue, sender))
                })
                .collect();
            state.published.push(message.clone());
            senders
        };

        let delivery = Delivery {
            exchange: message.exchange,
            routing_key: message.routing_key,
            body: message.body,
            properties: message.properties,
        };
        for (queue, sender) in targets {
            match sender.try_send(delivery.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(queue, "queue full, delivery dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(queue, "consumer gone, delivery dropped");
                }
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        exchange: &str,
        binding_key: &str,
        queue: &str,
    ) -> Result<Subscription, SchedulerError> {
        let mut state = self.state.lock().await;
        if state.failing {
            return Err(unavailable());
        }
        if !state.exchanges.contains_key(exchange) {
            return Err(SchedulerError::Transport(format!(
                "no exchange named {exchange}"
            )));
        }
        let binding = Binding {
            exchange: exchange.to_string(),
            binding_key: binding_key.to_string(),
            queue: queue.to_string(),
        };
        if !state.bindings.contains(&binding) {
            state.bindings.push(binding);
        }
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        state.consumers.insert(queue.to_string(), tx);
        tracing::debug!(exchange, binding_key, queue, "queue bound");
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageProperties;
    use rstest::rstest;

    fn message(exchange: &str, routing_key: &str, body: &[u8]) -> OutgoingMessage {
        OutgoingMessage {
            exchange_kind: ExchangeKind::Topic,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            body: body.to_vec(),
            properties: MessageProperties::default(),
        }
    }

    #[rstest]
    #[case("#", "", true)]
    #[case("#", "a.b.c", true)]
    #[case("#", "#", true)]
    #[case("a.*", "a.b", true)]
    #[case("a.*", "a", false)]
    #[case("a.*", "a.b.c", false)]
    #[case("a.#", "a", true)]
    #[case("a.#.z", "a.b.c.z", true)]
    #[case("*.b", "a.b", true)]
    #[case("a.b", "a.c", false)]
    #[case("a.b", "#", false)]
    #[case("", "", true)]
    #[case("", "a", false)]
    #[case("a", "", false)]
    fn topic_matching(#[case] pattern: &str, #[case] key: &str, #[case] expected: bool) {
        assert_eq!(topic_matches(pattern, key), expected);
    }

    #[tokio::test]
    async fn topic_exchange_routes_to_matching_queues() {
        let bus = InMemoryBus::new();
        bus.declare_exchange("orders", ExchangeKind::Topic)
            .await
            .unwrap();
        let mut all = bus.subscribe("orders", "#", "audit").await.unwrap();
        let mut eu = bus.subscribe("orders", "eu.*", "billing").await.unwrap();

        bus.publish(message("orders", "us.created", b"1"))
            .await
            .unwrap();
        bus.publish(message("orders", "eu.created", b"2"))
            .await
            .unwrap();

        assert_eq!(all.recv().await.unwrap().body, b"1");
        assert_eq!(all.recv().await.unwrap().body, b"2");
        let got = eu.recv().await.unwrap();
        assert_eq!(got.body, b"2");
        assert_eq!(got.routing_key, "eu.created");
        assert!(eu.try_recv().is_err());
    }

    #[tokio::test]
    async fn queue_with_two_matching_bindings_gets_one_copy() {
        let bus = InMemoryBus::new();
        bus.declare_exchange("x", ExchangeKind::Topic)
            .await
            .unwrap();
        let _first = bus.subscribe("x", "#", "q").await.unwrap();
        let mut rx = bus.subscribe("x", "a.*", "q").await.unwrap();

        bus.publish(message("x", "a.b", b"once")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().body, b"once");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn direct_and_fanout_routing() {
        let bus = InMemoryBus::new();
        bus.declare_exchange("d", ExchangeKind::Direct)
            .await
            .unwrap();
        bus.declare_exchange("f", ExchangeKind::Fanout)
            .await
            .unwrap();
        let mut direct = bus.subscribe("d", "exact", "dq").await.unwrap();
        let mut fanout = bus.subscribe("f", "ignored", "fq").await.unwrap();

        bus.publish(message("d", "other", b"miss")).await.unwrap();
        bus.publish(message("d", "exact", b"hit")).await.unwrap();
        bus.publish(message("f", "any", b"all")).await.unwrap();

        assert_eq!(direct.recv().await.unwrap().body, b"hit");
        assert!(direct.try_recv().is_err());
        assert_eq!(fanout.recv().await.unwrap().body, b"all");
    }

    #[tokio::test]
    async fn publish_requires_declared_exchange() {
        let bus = InMemoryBus::new();
        let err = bus.publish(message("nope", "#", b"")).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Transport(_)));
        assert!(bus.published().await.is_empty());
    }

    #[tokio::test]
    async fn redeclare_with_other_kind_fails() {
        let bus = InMemoryBus::new();
        bus.declare_exchange("x", ExchangeKind::Topic)
            .await
            .unwrap();
        bus.declare_exchange("x", ExchangeKind::Topic)
            .await
            .unwrap();
        assert!(
            bus.declare_exchange("x", ExchangeKind::Direct)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn failing_bus_rejects_everything_until_restored() {
        let bus = InMemoryBus::new();
        bus.declare_exchange("x", ExchangeKind::Topic)
            .await
            .unwrap();
        bus.set_failing(true).await;

        assert!(bus.publish(message("x", "#", b"")).await.is_err());
        assert!(bus.subscribe("x", "#", "q").await.is_err());

        bus.set_failing(false).await;
        bus.publish(message("x", "#", b"ok")).await.unwrap();
        assert_eq!(bus.published().await.len(), 1);
    }

    #[tokio::test]
    async fn resubscribe_replaces_consumer_and_close_ends_stream() {
        let bus = InMemoryBus::new();
        bus.declare_exchange("x", ExchangeKind::Topic)
            .await
            .unwrap();
        let mut old = bus.subscribe("x", "#", "q").await.unwrap();
        let mut new = bus.subscribe("x", "#", "q").await.unwrap();

        assert!(old.recv().await.is_none());
        bus.publish(message("x", "k", b"v")).await.unwrap();
        assert_eq!(new.recv().await.unwrap().body, b"v");

        bus.close().await;
        assert!(new.recv().await.is_none());
    }

    #[tokio::test]
    async fn headers_exchange_matches_all_pairs() {
        let bus = InMemoryBus::new();
        bus.declare_exchange("h", ExchangeKind::Headers)
            .await
            .unwrap();
        let mut rx = bus
            .subscribe("h", "tenant=acme, region", "hq")
            .await
            .unwrap();

        let mut miss = message("h", "", b"miss");
        miss.properties
            .headers
            .insert("tenant".into(), "acme".into());
        bus.publish(miss).await.unwrap();

        let mut hit = message("h", "", b"hit");
        hit.properties
            .headers
            .insert("tenant".into(), "acme".into());
        hit.properties.headers.insert("region".into(), "eu".into());
        bus.publish(hit).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().body, b"hit");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking_publish() {
        let bus = InMemoryBus::new();
        bus.declare_exchange("x", ExchangeKind::Topic)
            .await
            .unwrap();
        let mut idle = bus.subscribe("x", "#", "idle").await.unwrap();

        let overflow = QUEUE_CAPACITY + 10;
        tokio::time::timeout(std::time::Duration::from_secs(3), async {
            for _ in 0..overflow {
                bus.publish(message("x", "k", b"v")).await.unwrap();
            }
        })
        .await
        .expect("publish never waits on a consumer");

        assert_eq!(bus.published().await.len(), overflow);
        let mut queued = 0;
        while idle.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, QUEUE_CAPACITY);
    }

    #[tokio::test]
    async fn empty_binding_key_matches_only_empty_routing_key() {
        let bus = InMemoryBus::new();
        bus.declare_exchange("x", ExchangeKind::Topic)
            .await
            .unwrap();
        let mut rx = bus.subscribe("x", "", "q").await.unwrap();

        bus.publish(message("x", "a", b"miss")).await.unwrap();
        bus.publish(message("x", "", b"hit")).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().body, b"hit");
        assert!(rx.try_recv().is_err());
    }
}
