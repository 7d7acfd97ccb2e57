//! Combined per-request access policy

use crate::origin::{origin_host, OriginAllowList};
use crate::target::{is_disallowed_ip, is_disallowed_target};
use crate::{PolicyError, PolicyResult};
use std::net::IpAddr;
use tracing::debug;

/// Immutable policy evaluated once per upgrade request.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    origins: OriginAllowList,
    allow_private_targets: bool,
}

impl AccessPolicy {
    pub fn new(origins: OriginAllowList) -> Self {
        Self {
            origins,
            allow_private_targets: false,
        }
    }

    /// Skip the target filter entirely. Only for trusted single-user
    /// deployments and local test rigs.
    pub fn with_private_targets(mut self, allow: bool) -> Self {
        self.allow_private_targets = allow;
        self
    }

    pub fn origins(&self) -> &OriginAllowList {
        &self.origins
    }

    pub fn allows_private_targets(&self) -> bool {
        self.allow_private_targets
    }

    /// Check the raw `Origin` header value.
    pub fn check_origin(&self, origin: Option<&str>) -> PolicyResult<()> {
        let origin = origin.ok_or(PolicyError::MissingOrigin)?;
        let host = origin_host(origin)?;
        if self.origins.contains(&host) {
            Ok(())
        } else {
            Err(PolicyError::OriginNotAllowed { host })
        }
    }

    /// Check the target host named in the request path.
    pub fn check_target(&self, target: &str) -> PolicyResult<()> {
        if !self.allow_private_targets && is_disallowed_target(target) {
            return Err(PolicyError::TargetNotAllowed {
                target: target.to_string(),
            });
        }
        Ok(())
    }

    /// Check one address a target name resolved to.
    pub fn permits_address(&self, ip: IpAddr) -> bool {
        let permitted = self.allow_private_targets || !is_disallowed_ip(ip);
        if !permitted {
            debug!("Resolved address {} refused by target filter", ip);
        }
        permitted
    }

    pub fn validate_origin(&self, origin: Option<&str>) -> bool {
        self.check_origin(origin).is_ok()
    }

    pub fn is_disallowed_target(&self, target: &str) -> bool {
        self.check_target(target).is_err()
    }
}
