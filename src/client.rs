use kube::api::{Api, DynamicObject};

use crate::{Error, Gvr};

/// Schema-less client: talks to any resource type identified by a [`Gvr`].
#[derive(Clone)]
pub struct DynamicClient {
    inner: kube::Client,
}

impl DynamicClient {
    pub fn new(client: kube::Client) -> Self {
        Self { inner: client }
    }

    /// Build the underlying http stack. No request is sent here.
    pub fn try_from_config(config: kube::Config) -> Result<Self, Error> {
        kube::Client::try_from(config)
            .map(Self::new)
            .map_err(Error::ClientCreationFailed)
    }

    /// Handle for list/watch/get/create/replace/delete on `gvr`, scoped to
    /// `namespace` or to the whole cluster.
    pub fn api(&self, gvr: &Gvr, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = gvr.api_resource();
        match namespace {
            Some(ns) => Api::namespaced_with(self.inner.clone(), ns, &ar),
            None => Api::all_with(self.inner.clone(), &ar),
        }
    }
}
