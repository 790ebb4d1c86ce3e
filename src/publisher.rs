use crate::app::Settings;
use crate::client::AsyncClient;
use crate::envelope::build_payload;
use crate::logger::Logger;
use crate::{Error, OpConfirm, QoS};
use log::trace;
use std::time::Duration;

/// Publishes a payload and waits up to the timeout for the broker acknowledgement
///
/// The outer result is the submission, the inner one is the acknowledgement. A submission
/// error means the frame has not been sent at all, an acknowledgement error means the broker
/// has not confirmed it in time or has refused it.
pub async fn publish<C>(
    client: &mut C,
    topic: &str,
    payload: Vec<u8>,
    qos: QoS,
    timeout: Duration,
) -> Result<Result<(), Error>, Error>
where
    C: AsyncClient + ?Sized,
{
    let confirm = client.publish(topic, payload, qos).await?;
    Ok(wait_confirm(confirm, timeout).await)
}

async fn wait_confirm(confirm: OpConfirm, timeout: Duration) -> Result<(), Error> {
    if let Some(rx) = confirm {
        tokio::time::timeout(timeout, rx).await???;
    }
    Ok(())
}

/// Publishes one timestamped envelope
///
/// A missing or negative acknowledgement is logged and is not an error. Errors returned are
/// fatal: the payload could not be built or the client could not submit it.
pub async fn run_publish_phase<C>(
    client: &mut C,
    settings: &Settings,
    logger: &dyn Logger,
) -> Result<(), Error>
where
    C: AsyncClient + ?Sized,
{
    logger.info("Will attempt to send IPC publishes");
    let payload = build_payload(&settings.message)?;
    match publish(
        client,
        &settings.pub_topic,
        payload,
        settings.qos,
        settings.publish_timeout,
    )
    .await?
    {
        Ok(()) => logger.info(&format!(
            "Successfully published IPC message to {}",
            settings.pub_topic
        )),
        Err(e) => {
            trace!("publish to {} not confirmed: {}", settings.pub_topic, e);
            logger.error(&format!(
                "Failed to publish IPC message to {}",
                settings.pub_topic
            ));
        }
    }
    // let the client settle in-flight acks before it is released
    tokio::time::sleep(settings.publish_grace).await;
    Ok(())
}
