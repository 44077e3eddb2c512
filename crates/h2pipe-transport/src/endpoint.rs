//! Endpoint descriptors.
//!
//! ```text
//! unix:/run/app.sock        Unix domain socket path
//! tcp:127.0.0.1:8080        TCP host:port
//! pipe:app                  Windows named pipe \\.\pipe\app
//! pipe:server/app           Windows named pipe \\server\pipe\app
//! memory:tests              in-process transport
//! ```
//!
//! A bare absolute path is accepted as a Unix socket for convenience.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::TransportError;

/// A named, OS-level duplex byte stream location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Filesystem-path Unix domain socket.
    Unix(PathBuf),
    /// TCP `host:port`.
    Tcp(String),
    /// Named pipe: pipe name plus server qualifier (`.` for local).
    NamedPipe { server: String, name: String },
    /// In-process endpoint.
    Memory(String),
}

impl Endpoint {
    /// Short kind label used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Endpoint::Unix(_) => "unix",
            Endpoint::Tcp(_) => "tcp",
            Endpoint::NamedPipe { .. } => "pipe",
            Endpoint::Memory(_) => "memory",
        }
    }

    /// Full OS pipe path (`\\server\pipe\name`) for named pipe endpoints.
    pub fn pipe_path(&self) -> Option<String> {
        match self {
            Endpoint::NamedPipe { server, name } => Some(format!(r"\\{server}\pipe\{name}")),
            _ => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp:{addr}"),
            Endpoint::NamedPipe { server, name } if server == "." => write!(f, "pipe:{name}"),
            Endpoint::NamedPipe { server, name } => write!(f, "pipe:{server}/{name}"),
            Endpoint::Memory(name) => write!(f, "memory:{name}"),
        }
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| TransportError::InvalidEndpoint {
            input: input.to_string(),
            reason,
        };

        if input.starts_with('/') {
            return Ok(Endpoint::Unix(PathBuf::from(input)));
        }

        let (scheme, rest) = input
            .split_once(':')
            .ok_or_else(|| invalid("expected '<kind>:<address>'"))?;
        if rest.is_empty() {
            return Err(invalid("empty address"));
        }

        match scheme {
            "unix" => Ok(Endpoint::Unix(PathBuf::from(rest))),
            "tcp" => {
                let (host, port) = rest
                    .rsplit_once(':')
                    .ok_or_else(|| invalid("tcp endpoints need host:port"))?;
                if host.is_empty() || port.parse::<u16>().is_err() {
                    return Err(invalid("tcp endpoints need host:port"));
                }
                Ok(Endpoint::Tcp(rest.to_string()))
            }
            "pipe" => {
                let (server, name) = match rest.split_once('/') {
                    Some((server, name)) => (server.to_string(), name.to_string()),
                    None => (".".to_string(), rest.to_string()),
                };
                if name.is_empty() || name.contains(['/', '\\']) {
                    return Err(invalid("pipe names must not contain separators"));
                }
                Ok(Endpoint::NamedPipe { server, name })
            }
            "memory" => Ok(Endpoint::Memory(rest.to_string())),
            _ => Err(invalid("unknown endpoint kind")),
        }
    }
}
