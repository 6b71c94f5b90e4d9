use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use kube::config::{KubeConfigOptions, Kubeconfig};
use log::debug;

use crate::{Error, Gvr};

/// Runtime settings gathered from the command line.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Kubeconfig file; in-cluster config is used when absent.
    pub kubeconfig: Option<PathBuf>,
    pub gvr: Gvr,
    /// Watch a single namespace instead of all of them.
    pub namespace: Option<String>,
    pub label_selector: Option<String>,
    /// `None` disables resync.
    pub resync: Option<Duration>,
}

impl Settings {
    pub fn new(gvr: Gvr) -> Self {
        Self {
            kubeconfig: None,
            gvr,
            namespace: None,
            label_selector: None,
            resync: None,
        }
    }
}

/// Resolve how to reach the cluster.
///
/// A non-empty `kubeconfig` path is loaded using its current context, anything
/// else falls back to the service account mounted into the pod.
pub async fn resolve(kubeconfig: Option<&Path>) -> Result<kube::Config, Error> {
    match kubeconfig.filter(|p| !p.as_os_str().is_empty()) {
        Some(path) => {
            debug!("loading kubeconfig from {}", path.display());
            let load_failed = |source| Error::KubeconfigLoadFailed {
                path: path.to_owned(),
                source,
            };

            let kubeconfig = Kubeconfig::read_from(path).map_err(load_failed)?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(load_failed)
        }
        None => {
            debug!("no kubeconfig given, using in-cluster config");
            kube::Config::incluster().map_err(Error::InClusterConfigFailed)
        }
    }
}
