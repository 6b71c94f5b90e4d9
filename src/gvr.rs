use std::{fmt, str::FromStr};

use kube::api::ApiResource;

use crate::Error;

/// Group, version and plural resource name of a Kubernetes API type.
///
/// The core group is the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Gvr {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl Gvr {
    pub fn new(group: &str, version: &str, resource: &str) -> Self {
        Self {
            group: group.to_owned(),
            version: version.to_owned(),
            resource: resource.to_owned(),
        }
    }

    /// `group/version`, or just `version` for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Resource description for the dynamic client.
    ///
    /// Only group, version and plural are needed to build list and watch urls,
    /// so the kind is left empty; watched objects carry their own `kind`.
    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version: self.api_version(),
            kind: String::new(),
            plural: self.resource.clone(),
        }
    }
}

impl fmt::Display for Gvr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.resource)
    }
}

/// Accepts `group/version/resource`, `version/resource` (core group) and the
/// kubectl resource argument form `resource.version.group`.
impl FromStr for Gvr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &'static str| Error::InvalidGvr {
            input: s.to_owned(),
            reason,
        };

        let s = s.trim();
        if s.is_empty() {
            return Err(invalid("empty string"));
        }

        let gvr = if s.contains('/') {
            let parts: Vec<&str> = s.split('/').collect();
            match parts.as_slice() {
                [group, version, resource] => Gvr::new(group, version, resource),
                [version, resource] => Gvr::new("", version, resource),
                _ => return Err(invalid("expected group/version/resource")),
            }
        } else {
            let mut parts = s.splitn(3, '.');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(resource), Some(version), Some(group)) => Gvr::new(group, version, resource),
                _ => return Err(invalid("expected resource.version.group")),
            }
        };

        if gvr.version.is_empty() {
            return Err(invalid("missing version"));
        }
        if gvr.resource.is_empty() {
            return Err(invalid("missing resource"));
        }

        Ok(gvr)
    }
}
