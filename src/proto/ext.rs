use super::notify::client_message::Payload;
use super::notify::ClientMessage;
use super::notify::SubscribeRequest;
use super::notify::TableChange;
use super::notify::UnsubscribeRequest;

impl ClientMessage {
    pub fn subscribe(
        key: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            payload: Some(Payload::Subscribe(SubscribeRequest {
                key: key.into(),
                resource: resource.into(),
            })),
        }
    }

    pub fn unsubscribe(
        key: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            payload: Some(Payload::Unsubscribe(UnsubscribeRequest {
                key: key.into(),
                resource: resource.into(),
            })),
        }
    }

    pub fn is_subscribe(&self) -> bool {
        matches!(self.payload, Some(Payload::Subscribe(_)))
    }
}

impl TableChange {
    pub fn new(
        resource: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            key: key.into(),
        }
    }
}
