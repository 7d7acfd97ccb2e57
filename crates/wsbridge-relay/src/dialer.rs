//! Outbound TCP dialing

use crate::{RelayError, RelayResult};
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream};
use tracing::debug;
use wsbridge_policy::AccessPolicy;

/// Opens the TCP connection for a relay session
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    async fn dial(&self, host: &str, port: u16) -> RelayResult<TcpStream>;
}

/// Resolves and connects over the system network stack.
///
/// Every resolved address is checked against the access policy again, so a
/// public name pointing at a private address is refused too.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    timeout: Duration,
    policy: AccessPolicy,
}

impl TcpDialer {
    pub fn new(timeout: Duration, policy: AccessPolicy) -> Self {
        Self { timeout, policy }
    }

    async fn resolve_and_connect(&self, host: &str, port: u16) -> RelayResult<TcpStream> {
        let target = format!("{}:{}", host, port);
        let addrs: Vec<_> = lookup_host((host, port))
            .await
            .map_err(|e| RelayError::Dial {
                target: target.clone(),
                reason: e.to_string(),
            })?
            .collect();

        let permitted: Vec<_> = addrs
            .iter()
            .filter(|addr| self.policy.permits_address(addr.ip()))
            .copied()
            .collect();
        if permitted.is_empty() {
            return Err(if addrs.is_empty() {
                RelayError::Dial {
                    target,
                    reason: "no addresses found".to_string(),
                }
            } else {
                RelayError::TargetRejected {
                    target,
                    reason: "resolves to a loopback, private or unspecified address"
                        .to_string(),
                }
            });
        }

        let mut last_error: Option<io::Error> = None;
        for addr in permitted {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    debug!("Connected to {} via {}", target, addr);
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("Connect to {} via {} failed: {}", target, addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(RelayError::Dial {
            target,
            reason: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unreachable".to_string()),
        })
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, host: &str, port: u16) -> RelayResult<TcpStream> {
        match tokio::time::timeout(self.timeout, self.resolve_and_connect(host, port)).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::DialTimeout {
                target: format!("{}:{}", host, port),
                seconds: self.timeout.as_secs(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use wsbridge_policy::OriginAllowList;

    #[tokio::test]
    async fn test_resolved_private_address_is_refused() {
        let dialer = TcpDialer::new(
            Duration::from_secs(5),
            AccessPolicy::new(OriginAllowList::new()),
        );

        let err = dialer.dial("localhost", 22).await.unwrap_err();
        assert!(matches!(err, RelayError::TargetRejected { .. }));
    }

    #[tokio::test]
    async fn test_dial_with_private_targets_allowed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let dialer = TcpDialer::new(
            Duration::from_secs(5),
            AccessPolicy::new(OriginAllowList::new()).with_private_targets(true),
        );

        let (dialed, accepted) = tokio::join!(dialer.dial("127.0.0.1", port), listener.accept());
        assert!(dialed.is_ok());
        assert!(accepted.is_ok());
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let dialer = TcpDialer::new(
            Duration::from_secs(5),
            AccessPolicy::default().with_private_targets(true),
        );
        let err = dialer.dial("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, RelayError::Dial { .. }));
    }
}
