use log::debug;
use tokio_util::sync::CancellationToken;

use crate::{EventHandler, SharedInformer};

/// Register `handler` on `informer` and run it until `token` is cancelled.
pub async fn watch<H>(informer: SharedInformer, handler: H, token: CancellationToken)
where
    H: EventHandler + 'static,
{
    debug!("subscribing to {}", informer.gvr());
    informer.add_event_handler(handler).await;
    informer.run(token).await;
}
