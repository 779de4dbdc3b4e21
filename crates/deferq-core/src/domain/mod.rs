//! Domain model (IDs, schedule record, bus messages, commands, errors).

pub mod command;
pub mod errors;
pub mod ids;
pub mod message;
pub mod schedule;

pub use self::command::{CancelCommand, ScheduleCommand};
pub use self::errors::{ErrorKind, SchedulerError};
pub use self::ids::ScheduleId;
pub use self::message::{
    Delivery, DeliveryMode, ExchangeKind, MessageProperties, OutgoingMessage,
};
pub use self::schedule::{Schedule, ScheduleState};
