//! Relay configuration

use std::time::Duration;

/// Default timeout for dialing the TCP target
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default read deadline inside the copy loop
pub const DEFAULT_READ_DEADLINE: Duration = Duration::from_secs(5);

/// Default interval between keepalive pings on the peer socket
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// Default size of each copy task's buffer
pub const DEFAULT_COPY_BUFFER_SIZE: usize = 4096;

/// Per-session timing and sizing
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Connect timeout for the TCP target. Fatal, never retried.
    pub dial_timeout: Duration,

    /// How long a copy task waits on a read before re-checking its stop
    /// signals. Also bounds the graceful close of each side at teardown.
    pub read_deadline: Duration,

    /// Ping interval on the WebSocket
    pub keepalive_interval: Duration,

    pub copy_buffer_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            read_deadline: DEFAULT_READ_DEADLINE,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            copy_buffer_size: DEFAULT_COPY_BUFFER_SIZE,
        }
    }
}

impl RelayConfig {
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn with_read_deadline(mut self, deadline: Duration) -> Self {
        self.read_deadline = deadline;
        self
    }

    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.dial_timeout, Duration::from_secs(30));
        assert_eq!(config.read_deadline, Duration::from_secs(5));
        assert_eq!(config.keepalive_interval, Duration::from_secs(20));
        assert_eq!(config.copy_buffer_size, 4096);
    }

    #[test]
    fn test_builders_override_defaults() {
        let config = RelayConfig::default()
            .with_dial_timeout(Duration::from_secs(3))
            .with_read_deadline(Duration::from_millis(250))
            .with_keepalive_interval(Duration::from_secs(1));
        assert_eq!(config.dial_timeout, Duration::from_secs(3));
        assert_eq!(config.read_deadline, Duration::from_millis(250));
        assert_eq!(config.keepalive_interval, Duration::from_secs(1));
        assert_eq!(config.copy_buffer_size, DEFAULT_COPY_BUFFER_SIZE);
    }
}
