//! Link configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::core::{
    ConfigError, DEFAULT_CONFIG_SIZE, DEFAULT_PORT, DEFAULT_REMOTE_IP, DEFAULT_TX_QUEUE_DEPTH,
    KEEPALIVE_INTERVAL, RECONNECT_BASE_DELAY, RECONNECT_MAX_DELAY, SOCKET_TIMEOUT,
};

/// Environment variable names read by [`LinkConfig::from_env`].
pub mod env {
    /// Remote IPv4/IPv6 address.
    pub const REMOTE_IP: &str = "VPCI_REMOTE_IP";
    /// Remote TCP port.
    pub const REMOTE_PORT: &str = "VPCI_REMOTE_PORT";
    /// Local TCP port the endpoint side listens on.
    pub const LOCAL_PORT: &str = "VPCI_LOCAL_PORT";
    /// Loopback self-test flag.
    pub const LOOPBACK: &str = "VPCI_LOOPBACK";
    /// Debug level, 0 to 3.
    pub const DEBUG: &str = "VPCI_DEBUG";
}

/// Highest accepted debug level.
pub const MAX_DEBUG_LEVEL: u8 = 3;

/// Link configuration.
///
/// Read once when the link is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Address the root complex side dials.
    pub remote_ip: IpAddr,

    /// Port the root complex side dials.
    pub remote_port: u16,

    /// Port the endpoint side listens on.
    pub local_port: u16,

    /// Run as a local loopback without a socket.
    pub loopback: bool,

    /// Verbosity, 0 (quiet) to 3 (per-packet).
    pub debug_level: u8,

    /// Interval between keepalives.
    pub keepalive_interval: Duration,

    /// First reconnect delay.
    pub reconnect_base: Duration,

    /// Reconnect delay ceiling.
    pub reconnect_max: Duration,

    /// Connect, send, receive and request timeout.
    pub socket_timeout: Duration,

    /// Size of the configuration space buffer.
    pub config_size: usize,

    /// Depth of the outbound packet queue.
    pub tx_queue_depth: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            remote_ip: IpAddr::V4(DEFAULT_REMOTE_IP),
            remote_port: DEFAULT_PORT,
            local_port: DEFAULT_PORT,
            loopback: false,
            debug_level: 0,
            keepalive_interval: KEEPALIVE_INTERVAL,
            reconnect_base: RECONNECT_BASE_DELAY,
            reconnect_max: RECONNECT_MAX_DELAY,
            socket_timeout: SOCKET_TIMEOUT,
            config_size: DEFAULT_CONFIG_SIZE,
            tx_queue_depth: DEFAULT_TX_QUEUE_DEPTH,
        }
    }
}

impl LinkConfig {
    /// Start a builder from the defaults.
    pub fn builder() -> LinkConfigBuilder {
        LinkConfigBuilder::new()
    }

    /// Defaults overridden by `VPCI_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `VPCI_*`
    /// variable name.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = LinkConfigBuilder::new();

        if let Some(value) = lookup(env::REMOTE_IP) {
            builder = builder.remote_ip(parse(env::REMOTE_IP, &value)?);
        }
        if let Some(value) = lookup(env::REMOTE_PORT) {
            builder = builder.remote_port(parse(env::REMOTE_PORT, &value)?);
        }
        if let Some(value) = lookup(env::LOCAL_PORT) {
            builder = builder.local_port(parse(env::LOCAL_PORT, &value)?);
        }
        if let Some(value) = lookup(env::LOOPBACK) {
            builder = builder.loopback(parse_flag(env::LOOPBACK, &value)?);
        }
        if let Some(value) = lookup(env::DEBUG) {
            builder = builder.debug_level(parse(env::DEBUG, &value)?);
        }

        builder.build()
    }

    /// Remote socket address.
    pub fn remote_addr(&self) -> SocketAddr {
        SocketAddr::new(self.remote_ip, self.remote_port)
    }

    /// Wildcard address the endpoint side listens on.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.local_port)
    }

    /// Default log filter for this debug level.
    pub fn log_filter(&self) -> &'static str {
        if self.debug_level >= MAX_DEBUG_LEVEL {
            "debug"
        } else {
            "info"
        }
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debug_level > MAX_DEBUG_LEVEL {
            return Err(ConfigError::InvalidValue {
                name: env::DEBUG,
                value: self.debug_level.to_string(),
            });
        }
        if self.tx_queue_depth == 0 {
            return Err(ConfigError::Invalid("tx queue depth must be non-zero".into()));
        }
        if self.keepalive_interval.is_zero() || self.socket_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "keepalive interval and socket timeout must be non-zero".into(),
            ));
        }
        if self.reconnect_base > self.reconnect_max {
            return Err(ConfigError::Invalid(format!(
                "reconnect base {:?} exceeds ceiling {:?}",
                self.reconnect_base, self.reconnect_max
            )));
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name,
        value: value.to_string(),
    })
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: value.to_string(),
        }),
    }
}

/// Builder for [`LinkConfig`].
#[derive(Debug, Clone, Default)]
pub struct LinkConfigBuilder {
    config: LinkConfig,
}

impl LinkConfigBuilder {
    /// Create a builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the remote address.
    pub fn remote_ip(mut self, ip: IpAddr) -> Self {
        self.config.remote_ip = ip;
        self
    }

    /// Set the remote port.
    pub fn remote_port(mut self, port: u16) -> Self {
        self.config.remote_port = port;
        self
    }

    /// Set remote address and port together.
    pub fn remote_addr(self, addr: SocketAddr) -> Self {
        self.remote_ip(addr.ip()).remote_port(addr.port())
    }

    /// Set the listening port.
    pub fn local_port(mut self, port: u16) -> Self {
        self.config.local_port = port;
        self
    }

    /// Enable or disable loopback mode.
    pub fn loopback(mut self, enabled: bool) -> Self {
        self.config.loopback = enabled;
        self
    }

    /// Set the debug level.
    pub fn debug_level(mut self, level: u8) -> Self {
        self.config.debug_level = level;
        self
    }

    /// Set the keepalive interval.
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.config.keepalive_interval = interval;
        self
    }

    /// Set the reconnect backoff range.
    pub fn reconnect_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.config.reconnect_base = base;
        self.config.reconnect_max = max;
        self
    }

    /// Set the socket timeout.
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.config.socket_timeout = timeout;
        self
    }

    /// Set the configuration space size.
    pub fn config_size(mut self, size: usize) -> Self {
        self.config.config_size = size;
        self
    }

    /// Set the outbound queue depth.
    pub fn tx_queue_depth(mut self, depth: usize) -> Self {
        self.config.tx_queue_depth = depth;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<LinkConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
