use std::{
    fmt,
    net::SocketAddr,
    str::FromStr,
};

use thiserror::Error;

/// A `(host, port)` pair describing one side of a tunnel.
///
/// A port of 0 on a local endpoint means "let the OS choose". Endpoints are values: rebinding
/// produces a new endpoint through [`Endpoint::with_port`] rather than mutating an existing one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns a copy of this endpoint with the port replaced.
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            host: self.host.clone(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.host.contains(':') {
            true => write!(f, "[{}]:{}", self.host, self.port),
            false => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(value: SocketAddr) -> Self {
        Self::new(value.ip().to_string(), value.port())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointParseError {
    #[error("missing port in endpoint \"{0}\"")]
    MissingPort(String),
    #[error("invalid port in endpoint \"{0}\"")]
    InvalidPort(String),
    #[error("missing host in endpoint \"{0}\"")]
    MissingHost(String),
    #[error("IPv6 host must be enclosed in brackets in endpoint \"{0}\"")]
    UnbracketedIpv6(String),
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    /// Parses `host:port`, where IPv6 hosts are written in brackets (`[::1]:22`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s.rsplit_once(':').ok_or_else(|| EndpointParseError::MissingPort(s.to_string()))?;
        let port = port.parse::<u16>().map_err(|_| EndpointParseError::InvalidPort(s.to_string()))?;

        let host = match host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
            Some(inner) => inner,
            None if host.contains(':') => return Err(EndpointParseError::UnbracketedIpv6(s.to_string())),
            None => host,
        };

        if host.is_empty() {
            return Err(EndpointParseError::MissingHost(s.to_string()));
        }

        Ok(Self::new(host, port))
    }
}
