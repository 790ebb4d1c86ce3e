use crate::app::Settings;
use crate::client::AsyncClient;
use crate::logger::Logger;
use crate::{Error, EventChannel, Message, StreamEvent};
use log::{trace, warn};
use tokio_util::sync::CancellationToken;

/// Stream event hooks
///
/// Hooks are called from a single dispatch loop, in the order the events have been received.
pub trait StreamHandler: Send + Sync {
    fn on_message(&self, message: &Message);
    /// Returns true to ask for a new subscription. Nothing resubscribes automatically, the
    /// request is only logged.
    fn on_error(&self, err: &Error) -> bool;
    fn on_closed(&self);
}

/// Logs every stream event
pub struct LoggingHandler<'a> {
    logger: &'a dyn Logger,
}

impl<'a> LoggingHandler<'a> {
    pub fn new(logger: &'a dyn Logger) -> Self {
        Self { logger }
    }
}

impl<'a> StreamHandler for LoggingHandler<'a> {
    fn on_message(&self, message: &Message) {
        match std::str::from_utf8(message.payload()) {
            Ok(body) => self.logger.info(&format!(
                "Received new message on topic {}: {}",
                message.topic(),
                body
            )),
            Err(e) => {
                self.logger
                    .error("Exception occurred while processing subscription response message.");
                self.logger.failure(&Error::from(e));
            }
        }
    }
    fn on_error(&self, err: &Error) -> bool {
        self.logger.error("Received a stream error.");
        self.logger.failure(err);
        false
    }
    fn on_closed(&self) {
        self.logger.info("Subscribe to topic stream closed.");
    }
}

/// Feeds stream events to the handler until the stream is closed
///
/// A channel closed by the client without the final event (e.g. on a full queue) ends the
/// stream as well.
pub async fn dispatch(events: EventChannel, handler: &dyn StreamHandler) {
    while let Ok(event) = events.recv().await {
        match event {
            StreamEvent::Message(message) => handler.on_message(&message),
            StreamEvent::Error(e) => {
                if handler.on_error(&e) {
                    warn!("stream resubscription requested but is not supported");
                }
            }
            StreamEvent::Closed => {
                handler.on_closed();
                return;
            }
        }
    }
    trace!("stream event channel closed");
    handler.on_closed();
}

/// Subscribes and dispatches messages until cancelled
///
/// The stream handle is closed on every way out once the subscription has been made. An
/// error is returned only when the subscription itself fails.
pub async fn run_subscribe_phase<C>(
    client: &mut C,
    settings: &Settings,
    handler: &dyn StreamHandler,
    cancel: &CancellationToken,
    logger: &dyn Logger,
) -> Result<(), Error>
where
    C: AsyncClient + ?Sized,
{
    let mut sub = client.subscribe(&settings.sub_topic, settings.qos).await?;
    logger.info(&format!(
        "Successfully subscribed to topic: {}",
        sub.topic()
    ));
    let drain_timeout = client.get_timeout().unwrap_or(crate::DEFAULT_TIMEOUT);
    let events = match sub.take_event_channel() {
        Some(v) => v,
        None => {
            if let Err(e) = sub.handle().close().await {
                logger.error("Failed to close the subscription stream");
                logger.failure(&e);
            }
            return Err(Error::not_supported("subscription event channel is taken"));
        }
    };
    let dispatcher = dispatch(events, handler);
    tokio::pin!(dispatcher);
    let mut dispatched = false;
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                logger.info("Subscribe interrupted.");
                break;
            }
            () = &mut dispatcher, if !dispatched => {
                dispatched = true;
                trace!("stream of {} is over, waiting for termination", sub.topic());
            }
            () = tokio::time::sleep(settings.wait_step) => {
                trace!("waiting for messages on {}", sub.topic());
            }
        }
    }
    if let Err(e) = sub.handle().close().await {
        logger.error("Failed to close the subscription stream");
        logger.failure(&e);
    }
    if !dispatched && tokio::time::timeout(drain_timeout, &mut dispatcher).await.is_err() {
        warn!("stream of {} has not been closed in time", sub.topic());
    }
    Ok(())
}
