//! Control-plane commands.
//!
//! These travel over the bus from a producer to the process that owns the
//! schedule store; they are never stored as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::SchedulerError;
use super::message::{ExchangeKind, MessageProperties};
use crate::typed::Message;

/// Request to publish `inner_message` to its original destination once
/// `wake_time` has passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleCommand {
    pub wake_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation_key: Option<String>,
    pub inner_message: Vec<u8>,
    pub message_properties: MessageProperties,
    pub binding_key: String,
    pub exchange_kind: ExchangeKind,
    pub exchange: String,
    pub routing_key: String,
}

impl ScheduleCommand {
    /// Reject commands that could never be republished.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.binding_key.trim().is_empty() {
            return Err(SchedulerError::Validation("binding key is empty".into()));
        }
        if self.exchange.trim().is_empty() {
            return Err(SchedulerError::Validation(
                "destination exchange is empty".into(),
            ));
        }
        validate_cancellation_key(self.cancellation_key.as_deref())
    }
}

impl Message for ScheduleCommand {
    const TYPE: &'static str = "deferq.control.schedule.v1";
}

/// Request to withdraw every pending schedule tagged with `cancellation_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelCommand {
    pub cancellation_key: String,
}

impl CancelCommand {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        validate_cancellation_key(Some(self.cancellation_key.as_str()))
    }
}

impl Message for CancelCommand {
    const TYPE: &'static str = "deferq.control.cancel.v1";
}

pub(crate) fn validate_cancellation_key(key: Option<&str>) -> Result<(), SchedulerError> {
    match key {
        Some(k) if k.trim().is_empty() => Err(SchedulerError::Validation(
            "cancellation key is empty".into(),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn command() -> ScheduleCommand {
        ScheduleCommand {
            wake_time: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            cancellation_key: Some("order-42".into()),
            inner_message: b"{\"id\":42}".to_vec(),
            message_properties: MessageProperties::default(),
            binding_key: "shop.order.placed.v1".into(),
            exchange_kind: ExchangeKind::Topic,
            exchange: "shop.order.placed.v1".into(),
            routing_key: "#".into(),
        }
    }

    #[test]
    fn valid_command_passes() {
        assert!(command().validate().is_ok());
    }

    #[rstest]
    #[case::empty_binding(|c: &mut ScheduleCommand| c.binding_key.clear())]
    #[case::empty_exchange(|c: &mut ScheduleCommand| c.exchange = "  ".into())]
    #[case::blank_cancellation(|c: &mut ScheduleCommand| c.cancellation_key = Some(String::new()))]
    fn malformed_commands_are_rejected(#[case] break_it: fn(&mut ScheduleCommand)) {
        let mut cmd = command();
        break_it(&mut cmd);
        assert!(matches!(cmd.validate(), Err(SchedulerError::Validation(_))));
    }

    #[test]
    fn missing_cancellation_key_is_fine() {
        let mut cmd = command();
        cmd.cancellation_key = None;
        assert!(cmd.validate().is_ok());

        let json = serde_json::to_value(&cmd).unwrap();
        assert!(json.get("cancellation_key").is_none());
    }

    #[test]
    fn cancel_command_requires_a_key() {
        let cancel = |key: &str| CancelCommand {
            cancellation_key: key.into(),
        };
        assert!(cancel("k").validate().is_ok());
        assert!(cancel(" ").validate().is_err());
    }
}
