use crate::client::ClientFactory;
use crate::lifecycle::{close_client, create_client};
use crate::logger::Logger;
use crate::publisher::run_publish_phase;
use crate::subscriber::{run_subscribe_phase, LoggingHandler};
use crate::{ErrorKind, QoS};
use crate::{EXIT_FAILED, EXIT_OK, EXIT_SUBSCRIBE_FAILED};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct Settings {
    pub pub_topic: String,
    pub sub_topic: String,
    pub message: String,
    pub qos: QoS,
    pub publish_timeout: Duration,
    pub publish_grace: Duration,
    pub wait_step: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pub_topic: crate::PUB_TOPIC.to_owned(),
            sub_topic: crate::SUB_TOPIC.to_owned(),
            message: crate::SAMPLE_MESSAGE.to_owned(),
            qos: QoS::AtLeastOnce,
            publish_timeout: crate::PUBLISH_TIMEOUT,
            publish_grace: crate::PUBLISH_GRACE,
            wait_step: crate::WAIT_STEP,
        }
    }
}

impl Settings {
    pub fn pub_topic(mut self, topic: &str) -> Self {
        self.pub_topic = topic.to_owned();
        self
    }
    pub fn sub_topic(mut self, topic: &str) -> Self {
        self.sub_topic = topic.to_owned();
        self
    }
    pub fn message(mut self, message: &str) -> Self {
        self.message = message.to_owned();
        self
    }
    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }
    pub fn publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }
    pub fn publish_grace(mut self, grace: Duration) -> Self {
        self.publish_grace = grace;
        self
    }
    pub fn wait_step(mut self, step: Duration) -> Self {
        self.wait_step = step;
        self
    }
}

/// Runs the publish phase, then the subscribe phase until cancelled
///
/// Returns the process exit code: [`EXIT_OK`] after a cancelled subscription,
/// [`EXIT_FAILED`] when a client can not be created or the publish phase fails,
/// [`EXIT_SUBSCRIBE_FAILED`] when the subscribe phase fails.
pub async fn run<F>(
    factory: &F,
    settings: &Settings,
    cancel: &CancellationToken,
    logger: &dyn Logger,
) -> i32
where
    F: ClientFactory + ?Sized,
{
    logger.info("Starting IPC component");
    let Ok(mut client) = create_client(factory, logger).await else {
        return EXIT_FAILED;
    };
    if let Err(e) = run_publish_phase(&mut client, settings, logger).await {
        logger.error("Shutting down");
        logger.failure(&e);
        close_client(&mut client, logger).await;
        logger.error("IPC sample finished with error");
        return EXIT_FAILED;
    }
    logger.info("All publishes sent. Finishing sample...");
    close_client(&mut client, logger).await;
    drop(client);
    logger.info("IPC pub sample finished");
    let Ok(mut client) = create_client(factory, logger).await else {
        logger.error("Exception occurred when using IPC.");
        return EXIT_SUBSCRIBE_FAILED;
    };
    let handler = LoggingHandler::new(logger);
    let result = run_subscribe_phase(&mut client, settings, &handler, cancel, logger).await;
    close_client(&mut client, logger).await;
    match result {
        Ok(()) => EXIT_OK,
        Err(e) => {
            if e.kind() == ErrorKind::Unauthorized {
                logger.error(&format!(
                    "Unauthorized error while subscribing to topic: {}",
                    settings.sub_topic
                ));
            } else {
                logger.error("Exception occurred when using IPC.");
            }
            logger.failure(&e);
            EXIT_SUBSCRIBE_FAILED
        }
    }
}
