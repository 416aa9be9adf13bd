//! Server configuration.
//!
//! Everything tunable about the listener lives in [`ServerConfig`]. The
//! defaults are the reference deployment; override individual fields with the
//! `with_*` builders.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Port the server binds when none is configured.
pub const DEFAULT_PORT: u16 = 4000;

/// Listener address and connection deadlines.
///
/// ```
/// use std::time::Duration;
/// use keel::ServerConfig;
///
/// let config = ServerConfig::default()
///     .with_addr(([127, 0, 0, 1], 8080).into())
///     .with_shutdown_grace(Duration::from_secs(5));
/// assert_eq!(config.addr.port(), 8080);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct ServerConfig {
    /// Address the listener binds. A bind failure is fatal.
    pub addr: SocketAddr,
    /// How long a connection may take to deliver a request's header section.
    pub read_timeout: Duration,
    /// Deadline for producing a response once a request is in. Handlers that
    /// overrun answer `504 Gateway Timeout` instead of holding the connection.
    pub write_timeout: Duration,
    /// How long a connection may sit with no bytes moving in either
    /// direction before it is torn down.
    pub idle_timeout: Duration,
    /// How long shutdown waits for in-flight requests before aborting
    /// whatever is still running.
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(15),
        }
    }
}

impl ServerConfig {
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_deployment() {
        let config = ServerConfig::default();
        assert_eq!(config.addr, SocketAddr::from(([0, 0, 0, 0], 4000)));
        assert_eq!(config.read_timeout, Duration::from_secs(10));
        assert_eq!(config.write_timeout, Duration::from_secs(10));
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.shutdown_grace, Duration::from_secs(15));
    }

    #[test]
    fn builders_override_fields() {
        let config = ServerConfig::default()
            .with_addr(([127, 0, 0, 1], 0).into())
            .with_read_timeout(Duration::from_secs(1))
            .with_write_timeout(Duration::from_secs(2))
            .with_idle_timeout(Duration::from_secs(3))
            .with_shutdown_grace(Duration::from_secs(4));

        assert_eq!(config.addr, SocketAddr::from(([127, 0, 0, 1], 0)));
        assert_eq!(config.read_timeout, Duration::from_secs(1));
        assert_eq!(config.write_timeout, Duration::from_secs(2));
        assert_eq!(config.idle_timeout, Duration::from_secs(3));
        assert_eq!(config.shutdown_grace, Duration::from_secs(4));
    }
}
