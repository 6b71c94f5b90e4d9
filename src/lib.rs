use std::path::PathBuf;

use kube::config::{InClusterError, KubeconfigError};
use thiserror::Error;

pub mod client;
pub mod config;
pub mod factory;
pub mod gvr;
pub mod handler;
pub mod informer;
pub mod lifecycle;
pub mod subscriber;

pub use client::DynamicClient;
pub use config::Settings;
pub use factory::InformerFactory;
pub use gvr::Gvr;
pub use handler::{EventHandler, LoggingHandler};
pub use informer::{object_key, SharedInformer, Store};
pub use lifecycle::Lifecycle;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to load kubeconfig {}: {source}", .path.display())]
    KubeconfigLoadFailed {
        path: PathBuf,
        #[source]
        source: KubeconfigError,
    },
    #[error("Failed to load in-cluster config: {0}")]
    InClusterConfigFailed(#[source] InClusterError),
    #[error("Failed to create dynamic client: {0}")]
    ClientCreationFailed(#[source] kube::Error),
    #[error("Invalid group/version/resource {input:?}: {reason}")]
    InvalidGvr { input: String, reason: &'static str },
    #[error("Failed to install signal handler: {0}")]
    SignalFailed(#[source] std::io::Error),
}

/// Setup phase: resolve the cluster config, build the dynamic client and
/// factory, and pick the informer for the requested resource.
///
/// Nothing touches the network until the returned informer is run.
pub async fn prepare(settings: &Settings) -> Result<SharedInformer, Error> {
    let config = config::resolve(settings.kubeconfig.as_deref()).await?;
    let client = DynamicClient::try_from_config(config)?;

    let mut factory = InformerFactory::new(client)
        .resync(settings.resync)
        .namespace(settings.namespace.clone())
        .label_selector(settings.label_selector.clone());

    Ok(factory.for_resource(&settings.gvr))
}
