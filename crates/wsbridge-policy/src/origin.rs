//! Origin header parsing and the origin host allow-list

use crate::{PolicyError, PolicyResult};
use url::{Host, Url};

/// Extract the bare host from an `Origin` header value.
///
/// The scheme and port are discarded and IPv6 literals lose their brackets,
/// so `http://[::1]:8080` yields `::1`. Values without a host (`null`,
/// `file://`) are malformed.
pub fn origin_host(origin: &str) -> PolicyResult<String> {
    let url = Url::parse(origin).map_err(|e| PolicyError::MalformedOrigin(e.to_string()))?;

    match url.host() {
        Some(Host::Domain(domain)) if !domain.is_empty() => Ok(domain.to_ascii_lowercase()),
        Some(Host::Ipv4(addr)) => Ok(addr.to_string()),
        Some(Host::Ipv6(addr)) => Ok(addr.to_string()),
        _ => Err(PolicyError::MalformedOrigin(format!(
            "'{}' has no host",
            origin
        ))),
    }
}

/// Exact-match set of hosts whose pages may use the relay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OriginAllowList {
    hosts: Vec<String>,
}

impl OriginAllowList {
    /// An empty list; every origin is refused.
    pub fn new() -> Self {
        Self::default()
    }

    /// `localhost`, `domain` and `www.domain`.
    pub fn for_domain(domain: &str) -> Self {
        let domain = domain.trim().trim_end_matches('.');
        let mut list = Self::new().with_host("localhost");
        if !domain.is_empty() {
            list = list.with_host(domain).with_host(&format!("www.{}", domain));
        }
        list
    }

    /// Add one more host. Duplicates are ignored.
    pub fn with_host(mut self, host: &str) -> Self {
        let host = host.trim().to_ascii_lowercase();
        if !host.is_empty() && !self.hosts.contains(&host) {
            self.hosts.push(host);
        }
        self
    }

    pub fn contains(&self, host: &str) -> bool {
        self.hosts.iter().any(|h| h.eq_ignore_ascii_case(host))
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }
}

impl<S: AsRef<str>> FromIterator<S> for OriginAllowList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |list, host| list.with_host(host.as_ref()))
    }
}
