//! Conventions - 型からエクスチェンジ名・ルーティングキー・キュー名を決める規約

use super::message::Message;

/// Naming rules shared by producers and the scheduling service.
///
/// Both sides must agree on these, since they only meet on the bus.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conventions {
    /// Prepended to every exchange name (e.g. an environment name).
    pub exchange_prefix: Option<String>,
}

impl Conventions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exchange_prefix(prefix: impl Into<String>) -> Self {
        Self {
            exchange_prefix: Some(prefix.into()),
        }
    }

    /// Exchange a message type is published to.
    pub fn exchange_name(&self, type_name: &str) -> String {
        match &self.exchange_prefix {
            Some(prefix) => format!("{prefix}.{type_name}"),
            None => type_name.to_string(),
        }
    }

    pub fn exchange_for<M: Message>(&self) -> String {
        self.exchange_name(M::TYPE)
    }

    /// Routing key used for control-plane commands of a type.
    pub fn topic_for<M: Message>(&self) -> String {
        M::TYPE.to_string()
    }

    /// Queue a subscriber identity consumes a message type from.
    pub fn queue_name(&self, type_name: &str, subscription_id: &str) -> String {
        format!("{type_name}_{subscription_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CancelCommand, ScheduleCommand};
    use crate::typed::message::test_messages::Greeting;

    #[test]
    fn exchange_names_follow_type() {
        let conventions = Conventions::new();
        assert_eq!(conventions.exchange_for::<Greeting>(), "test.greeting.v1");

        let prefixed = Conventions::with_exchange_prefix("staging");
        assert_eq!(
            prefixed.exchange_for::<Greeting>(),
            "staging.test.greeting.v1"
        );
    }

    #[test]
    fn control_exchanges_are_distinct_from_application_ones() {
        let conventions = Conventions::new();
        let schedule = conventions.exchange_for::<ScheduleCommand>();
        let cancel = conventions.exchange_for::<CancelCommand>();

        assert_ne!(schedule, cancel);
        assert_ne!(schedule, conventions.exchange_for::<Greeting>());
        assert_eq!(conventions.topic_for::<CancelCommand>(), CancelCommand::TYPE);
    }

    #[test]
    fn queue_name_includes_subscription() {
        let conventions = Conventions::new();
        assert_eq!(
            conventions.queue_name("a.b.v1", "schedule"),
            "a.b.v1_schedule"
        );
    }
}
