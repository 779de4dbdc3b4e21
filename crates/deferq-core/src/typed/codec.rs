//! MessageSerializer - Message と bytes + properties の相互変換
//!
//! 即時 publish と future publish は同じ serializer を通るので、
//! 遅延後に再 publish される body / properties は即時 publish と同一になります。

use super::message::Message;
use crate::domain::{DeliveryMode, MessageProperties, SchedulerError};

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Body and property set ready to be handed to the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedMessage {
    pub body: Vec<u8>,
    pub properties: MessageProperties,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MessageSerializer;

impl MessageSerializer {
    pub fn new() -> Self {
        Self
    }

    pub fn serialize<M: Message>(&self, message: &M) -> Result<SerializedMessage, SchedulerError> {
        let body = serde_json::to_vec(message)?;
        let properties = MessageProperties {
            content_type: Some(JSON_CONTENT_TYPE.to_string()),
            delivery_mode: delivery_mode_of::<M>(),
            type_name: Some(M::TYPE.to_string()),
            ..MessageProperties::default()
        };
        Ok(SerializedMessage { body, properties })
    }

    /// Decode a body, checking the `type_name` property when one is present.
    pub fn deserialize<M: Message>(
        &self,
        body: &[u8],
        properties: &MessageProperties,
    ) -> Result<M, SchedulerError> {
        if let Some(type_name) = properties.type_name.as_deref()
            && type_name != M::TYPE
        {
            return Err(SchedulerError::Validation(format!(
                "expected message type {}, got {type_name}",
                M::TYPE
            )));
        }
        Ok(serde_json::from_slice(body)?)
    }
}

pub fn delivery_mode_of<M: Message>() -> DeliveryMode {
    if M::PERSISTENT {
        DeliveryMode::Persistent
    } else {
        DeliveryMode::NonPersistent
    }
}
