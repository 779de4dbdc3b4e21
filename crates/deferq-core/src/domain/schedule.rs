//! Schedule record and its state machine.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::command::ScheduleCommand;
use super::errors::SchedulerError;
use super::ids::ScheduleId;
use super::message::{ExchangeKind, MessageProperties, OutgoingMessage};

/// Schedule state.
///
/// State transitions:
/// - Pending -> Publishing (claim)
/// - Publishing -> Published (mark published)
/// - Publishing -> Pending (publish timeout reclaim)
///
/// Published is terminal; the record only waits for expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleState {
    /// Waiting for `wake_time`, eligible for claiming once it has passed.
    Pending,

    /// Claimed by a worker that is republishing it.
    Publishing,

    /// Republished; kept until the deletion timeout elapses.
    Published,
}

impl ScheduleState {
    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleState::Pending => "pending",
            ScheduleState::Publishing => "publishing",
            ScheduleState::Published => "published",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ScheduleState::Pending),
            "publishing" => Some(ScheduleState::Publishing),
            "published" => Some(ScheduleState::Published),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ScheduleState::Published)
    }

    pub fn can_transition_to(self, next: ScheduleState) -> bool {
        matches!(
            (self, next),
            (ScheduleState::Pending, ScheduleState::Publishing)
                | (ScheduleState::Publishing, ScheduleState::Published)
                | (ScheduleState::Publishing, ScheduleState::Pending)
        )
    }
}

/// The durable unit of delayed work.
///
/// Design:
/// - Stores are the single source of truth; a `Schedule` returned from a
///   store is a snapshot, not a live handle.
/// - Transitions go through the methods below so the timestamp invariants
///   (`publishing_time` set iff Publishing, `published_time` set iff
///   Published) hold in every adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub wake_time: DateTime<Utc>,
    pub cancellation_key: Option<String>,
    pub binding_key: String,
    pub inner_message: Vec<u8>,
    pub message_properties: MessageProperties,
    pub exchange_kind: ExchangeKind,
    pub exchange: String,
    pub routing_key: String,
    pub state: ScheduleState,
    pub publishing_time: Option<DateTime<Utc>>,
    pub published_time: Option<DateTime<Utc>>,
}

impl Schedule {
    /// Build a fresh Pending record from an accepted command.
    pub fn from_command(id: ScheduleId, command: ScheduleCommand) -> Self {
        Self {
            id,
            wake_time: command.wake_time,
            cancellation_key: command.cancellation_key,
            binding_key: command.binding_key,
            inner_message: command.inner_message,
            message_properties: command.message_properties,
            exchange_kind: command.exchange_kind,
            exchange: command.exchange,
            routing_key: command.routing_key,
            state: ScheduleState::Pending,
            publishing_time: None,
            published_time: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == ScheduleState::Pending && self.wake_time <= now
    }

    /// Publishing for at least `timeout` as of `now`.
    pub fn is_timed_out(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.state == ScheduleState::Publishing
            && self.publishing_time.is_some_and(|t| t <= now - timeout)
    }

    /// Published at least `retention` ago.
    pub fn is_expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        self.state == ScheduleState::Published
            && self.published_time.is_some_and(|t| t <= now - retention)
    }

    /// Pending -> Publishing.
    pub fn claim(&mut self, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        self.transition(ScheduleState::Publishing)?;
        self.publishing_time = Some(now);
        Ok(())
    }

    /// Publishing -> Published.
    pub fn mark_published(&mut self, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        self.transition(ScheduleState::Published)?;
        self.publishing_time = None;
        self.published_time = Some(now);
        Ok(())
    }

    /// Publishing -> Pending.
    pub fn reclaim(&mut self) -> Result<(), SchedulerError> {
        self.transition(ScheduleState::Pending)?;
        self.publishing_time = None;
        Ok(())
    }

    /// The publish this record was created to defer.
    pub fn outgoing(&self) -> OutgoingMessage {
        OutgoingMessage {
            exchange_kind: self.exchange_kind,
            exchange: self.exchange.clone(),
            routing_key: self.routing_key.clone(),
            body: self.inner_message.clone(),
            properties: self.message_properties.clone(),
        }
    }

    fn transition(&mut self, next: ScheduleState) -> Result<(), SchedulerError> {
        if !self.state.can_transition_to(next) {
            return Err(SchedulerError::Validation(format!(
                "illegal transition {} -> {} for {}",
                self.state.as_str(),
                next.as_str(),
                self.id
            )));
        }
        self.state = next;
        Ok(())
    }
}
