use crate::{Error, EventChannel, OpConfirm, QoS};

use async_trait::async_trait;
use std::time::Duration;

#[allow(clippy::module_name_repetitions)]
#[async_trait]
pub trait AsyncClient: Send + Sync {
    async fn publish(&mut self, topic: &str, payload: Vec<u8>, qos: QoS)
        -> Result<OpConfirm, Error>;
    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<Subscription, Error>;
    /// Must be safe to call more than once
    async fn close(&mut self) -> Result<(), Error>;
    fn is_connected(&self) -> bool;
    fn get_timeout(&self) -> Option<Duration>;
    fn get_name(&self) -> &str;
}

/// Builds client handles
#[async_trait]
pub trait ClientFactory: Send + Sync {
    type Client: AsyncClient;
    async fn build(&self) -> Result<Self::Client, Error>;
}

/// The live side of an open subscription
#[async_trait]
pub trait StreamHandle: Send + Sync {
    /// Stops the delivery. The event channel receives [`crate::StreamEvent::Closed`] and ends.
    async fn close(&self) -> Result<(), Error>;
    fn is_closed(&self) -> bool;
}

pub struct Subscription {
    topic: String,
    events: Option<EventChannel>,
    handle: Box<dyn StreamHandle>,
}

impl Subscription {
    pub fn new(topic: &str, events: EventChannel, handle: Box<dyn StreamHandle>) -> Self {
        Self {
            topic: topic.to_owned(),
            events: Some(events),
            handle,
        }
    }
    #[inline]
    pub fn topic(&self) -> &str {
        &self.topic
    }
    #[inline]
    pub fn take_event_channel(&mut self) -> Option<EventChannel> {
        self.events.take()
    }
    #[inline]
    pub fn handle(&self) -> &dyn StreamHandle {
        self.handle.as_ref()
    }
}
