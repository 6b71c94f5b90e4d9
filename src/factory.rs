use std::{collections::HashMap, time::Duration};

use kube::api::ListParams;
use log::debug;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{DynamicClient, Gvr, SharedInformer};

/// Hands out one shared informer per resource type.
///
/// Defaults to all namespaces, no label selector and no resync. Informers are
/// created lazily and do not touch the api server until they are run.
pub struct InformerFactory {
    client: DynamicClient,
    resync: Option<Duration>,
    namespace: Option<String>,
    label_selector: Option<String>,
    informers: HashMap<Gvr, SharedInformer>,
}

impl InformerFactory {
    pub fn new(client: DynamicClient) -> Self {
        Self {
            client,
            resync: None,
            namespace: None,
            label_selector: None,
            informers: HashMap::new(),
        }
    }

    /// Redeliver the whole cache as updates every `period`. A zero period disables resync.
    pub fn resync(mut self, period: Option<Duration>) -> Self {
        self.resync = period.filter(|p| !p.is_zero());
        self
    }

    pub fn namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn label_selector(mut self, selector: Option<String>) -> Self {
        self.label_selector = selector;
        self
    }

    pub fn for_resource(&mut self, gvr: &Gvr) -> SharedInformer {
        if let Some(informer) = self.informers.get(gvr) {
            return informer.clone();
        }

        debug!(
            "creating informer for {} in {}",
            gvr,
            self.namespace.as_deref().unwrap_or("all namespaces")
        );
        let api = self.client.api(gvr, self.namespace.as_deref());
        let mut list_params = ListParams::default();
        if let Some(selector) = &self.label_selector {
            list_params = list_params.labels(selector);
        }

        let informer = SharedInformer::new(gvr.clone(), api, list_params, self.resync);
        self.informers.insert(gvr.clone(), informer.clone());
        informer
    }

    /// Run every informer handed out so far on its own task.
    pub fn start(&self, token: &CancellationToken) -> Vec<JoinHandle<()>> {
        self.informers
            .values()
            .cloned()
            .map(|informer| {
                let token = token.clone();
                tokio::spawn(async move { informer.run(token).await })
            })
            .collect()
    }
}
