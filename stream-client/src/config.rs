//! Configuration types for the stream-client crate
//!
//! [`ClientConfig`] holds the credential-less connection parameters. The
//! credential itself is supplied at runtime through
//! [`StreamClient::auth`](crate::StreamClient::auth).

use crate::error::StreamError;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// URL scheme used to reach the stream service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = StreamError;

    /// Accepts `http`, `https`, and their `:`-suffixed forms
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_end_matches(':').to_ascii_lowercase().as_str() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(StreamError::Configuration(format!(
                "unsupported scheme: {}",
                other
            ))),
        }
    }
}

/// Hosted deployments of the stream service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Environment {
    Qa,
    Uat,
    Production,
}

impl Environment {
    pub fn hostname(&self) -> &'static str {
        match self {
            Environment::Qa => "stream.qa-ext.livefyre.com",
            Environment::Uat => "stream.t402.livefyre.com",
            Environment::Production => "stream.livefyre.com",
        }
    }
}

impl FromStr for Environment {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "qa" => Ok(Environment::Qa),
            "uat" => Ok(Environment::Uat),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(StreamError::Configuration(format!(
                "unknown environment: {}",
                other
            ))),
        }
    }
}

/// Configuration for a [`StreamClient`](crate::StreamClient)
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Default: http
    pub scheme: Scheme,

    /// Canonical host; a server-directed rebalance may temporarily override it
    /// Default: the production environment host
    pub hostname: String,

    /// Default: derived from the scheme
    pub port: Option<u16>,

    /// Path of the stream endpoint, must start with `/`
    /// Default: "/stream"
    pub endpoint: String,

    /// Reconnect attempts allowed after a drop before giving up
    /// Default: 10
    pub retry_budget: u32,

    /// Base of the quadratic reconnect backoff
    /// Default: 500 milliseconds
    pub retry_delay: Duration,

    /// Attempts during which a rebalance target is preferred over `hostname`
    /// Default: 3
    pub rebalance_retry_window: u32,

    /// Log every control payload and forward the flag to the transport
    /// Default: false
    pub debug: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            scheme: Scheme::Http,
            hostname: Environment::Production.hostname().to_string(),
            port: None,
            endpoint: "/stream".to_string(),
            retry_budget: 10,
            retry_delay: Duration::from_millis(500),
            rebalance_retry_window: 3,
            debug: false,
        }
    }
}

impl ClientConfig {
    /// Create a config targeting `hostname` with default settings
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ..Self::default()
        }
    }

    /// Create a config for one of the hosted environments
    pub fn for_environment(environment: Environment) -> Self {
        Self::new(environment.hostname())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.hostname.trim().is_empty() {
            return Err(StreamError::Configuration(
                "hostname must not be empty".to_string(),
            ));
        }

        if !self.endpoint.starts_with('/') {
            return Err(StreamError::Configuration(format!(
                "endpoint must start with '/': {}",
                self.endpoint
            )));
        }

        if self.port == Some(0) {
            return Err(StreamError::Configuration(
                "port must be greater than 0".to_string(),
            ));
        }

        self.stream_url(&self.hostname)?;
        Ok(())
    }

    /// Effective port, falling back to the scheme default
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.scheme.default_port())
    }

    /// Absolute stream URL for `host`.
    ///
    /// Default ports are omitted, so `http` on port 80 yields
    /// `http://host/stream`. The host must be a bare name or address;
    /// anything carrying a path, query, fragment, userinfo or port is
    /// rejected so the configured port and endpoint always apply.
    pub fn stream_url(&self, host: &str) -> Result<Url, StreamError> {
        let bracketed = host.starts_with('[') && host.ends_with(']');
        let delimited = host.chars().any(|c| {
            c.is_whitespace()
                || matches!(c, '/' | '?' | '#' | '@' | '\\')
                || (c == ':' && !bracketed)
        });
        if !self.endpoint.starts_with('/') {
            return Err(StreamError::Configuration(format!(
                "endpoint must start with '/': {}",
                self.endpoint
            )));
        }
        if host.is_empty() || delimited {
            return Err(StreamError::Configuration(format!(
                "invalid stream host: {:?}",
                host
            )));
        }

        let base = format!("{}://localhost{}", self.scheme, self.endpoint);
        let mut url = Url::parse(&base).map_err(|e| {
            StreamError::Configuration(format!("invalid stream endpoint {}: {}", self.endpoint, e))
        })?;
        url.set_host(Some(host)).map_err(|e| {
            StreamError::Configuration(format!("invalid stream host {:?}: {}", host, e))
        })?;
        url.set_port(Some(self.port())).map_err(|_| {
            StreamError::Configuration(format!("cannot set port {} on {}", self.port(), url))
        })?;
        Ok(url)
    }

    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_retry(mut self, budget: u32, delay: Duration) -> Self {
        self.retry_budget = budget;
        self.retry_delay = delay;
        self
    }

    pub fn with_rebalance_window(mut self, attempts: u32) -> Self {
        self.rebalance_retry_window = attempts;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}
