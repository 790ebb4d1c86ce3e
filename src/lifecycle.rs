use crate::client::{AsyncClient, ClientFactory};
use crate::logger::Logger;
use crate::Error;
use log::trace;

/// Builds a client and makes sure it is usable
///
/// A client which is returned by the factory but is not connected is treated the same way as
/// a construction failure.
pub async fn create_client<F>(factory: &F, logger: &dyn Logger) -> Result<F::Client, Error>
where
    F: ClientFactory + ?Sized,
{
    match factory.build().await {
        Ok(client) if client.is_connected() => {
            trace!("IPC client {} created", client.get_name());
            Ok(client)
        }
        Ok(_) => {
            let err = Error::not_initialized("IPC client not initialized");
            logger.error("Failed to create IPC client!");
            logger.failure(&err);
            Err(err)
        }
        Err(e) => {
            logger.error("Failed to create IPC client!");
            logger.failure(&e);
            Err(e)
        }
    }
}

/// Releases a client, errors are logged and never propagated
pub async fn close_client<C>(client: &mut C, logger: &dyn Logger)
where
    C: AsyncClient + ?Sized,
{
    if let Err(e) = client.close().await {
        logger.failure(&e);
    } else {
        trace!("IPC client {} closed", client.get_name());
    }
}
