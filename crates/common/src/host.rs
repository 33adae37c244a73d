//! Host identity shared by the query-routing and remote-transport layers.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context};

/// A `(host, port)` pair identifying an instance in the cluster.
///
/// Equality and ordering are structural. Ordering exists solely to give the host manager a
/// deterministic tie-break when the runtime facade reports several candidate hosts but no
/// authoritative active host (see [`crate`] docs on cold-start fallback).
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct HostInfo {
    pub host: String,
    pub port: u16,
}

impl HostInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for HostInfo {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .with_context(|| format!("expected host:port, got {s:?}"))?;
        if host.is_empty() {
            return Err(anyhow!("expected host:port, got {s:?}"));
        }
        let port: u16 = port
            .parse()
            .with_context(|| format!("invalid port in {s:?}"))?;
        Ok(Self::new(host, port))
    }
}
