//! Runtime endpoint addresses.

use std::path::PathBuf;
use std::str::FromStr;

/// Where the runtime service listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A local unix socket.
    Unix(PathBuf),
    /// A `host:port` TCP address.
    Tcp(String),
}

/// Errors from parsing an endpoint string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    /// Nothing was given.
    #[error("endpoint is empty")]
    Empty,

    /// The scheme or shape is not recognised.
    #[error(
        "unsupported endpoint '{0}': expected a socket path, unix://PATH, tcp://HOST:PORT or HOST:PORT"
    )]
    Unsupported(String),

    /// The port part is not a number in 1-65535.
    #[error("invalid port in endpoint '{0}'")]
    InvalidPort(String),
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(EndpointError::Empty);
        }

        if let Some(path) = s.strip_prefix("unix://") {
            if path.starts_with('/') {
                return Ok(Self::Unix(PathBuf::from(path)));
            }
            return Err(EndpointError::Unsupported(s.to_string()));
        }

        if s.starts_with('/') {
            return Ok(Self::Unix(PathBuf::from(s)));
        }

        let address = s
            .strip_prefix("tcp://")
            .or_else(|| s.strip_prefix("http://"))
            .unwrap_or(s);

        let Some((host, port)) = address.rsplit_once(':') else {
            return Err(EndpointError::Unsupported(s.to_string()));
        };
        if host.is_empty() || address.contains('/') {
            return Err(EndpointError::Unsupported(s.to_string()));
        }
        match port.parse::<u16>() {
            Ok(p) if p > 0 => Ok(Self::Tcp(address.to_string())),
            _ => Err(EndpointError::InvalidPort(s.to_string())),
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
            Self::Tcp(address) => write!(f, "tcp://{address}"),
        }
    }
}
