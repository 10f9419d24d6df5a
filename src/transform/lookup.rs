//! MX lookups against a single upstream nameserver.

use crate::domain::outcome;
use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::TokioAsyncResolver;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const DNS_PORT: u16 = 53;

/// A recoverable per-domain lookup failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupFailure {
    #[error("domain does not exist")]
    NxDomain,

    #[error("no MX records")]
    NoAnswer,

    #[error("lookup timed out")]
    Timeout,

    #[error("no nameserver could be reached")]
    NoNameservers,

    #[error("lookup failed: {0}")]
    Other(String),
}

impl LookupFailure {
    /// Outcome label recorded for the domain.
    pub fn label(&self) -> &'static str {
        match self {
            LookupFailure::NxDomain => outcome::NXDOMAIN,
            LookupFailure::NoAnswer => outcome::NO_ANSWER,
            LookupFailure::Timeout => outcome::TIMEOUT,
            LookupFailure::NoNameservers => outcome::NO_NAMESERVERS,
            LookupFailure::Other(_) => outcome::ERROR,
        }
    }
}

impl From<ResolveError> for LookupFailure {
    fn from(err: ResolveError) -> Self {
        match err.kind() {
            ResolveErrorKind::NoRecordsFound { response_code, .. }
                if *response_code == ResponseCode::NXDomain =>
            {
                LookupFailure::NxDomain
            }
            ResolveErrorKind::NoRecordsFound { .. } => LookupFailure::NoAnswer,
            ResolveErrorKind::Timeout => LookupFailure::Timeout,
            ResolveErrorKind::NoConnections => LookupFailure::NoNameservers,
            _ => LookupFailure::Other(err.to_string()),
        }
    }
}

/// MX resolution for one domain.
#[async_trait]
pub trait MxLookup: Send + Sync {
    /// MX answers as `"<preference> <exchange>"`.
    async fn lookup_mx(&self, name: &str) -> Result<Vec<String>, LookupFailure>;
}

/// Builds a lookup bound to one upstream target during worker setup.
pub trait LookupFactory: Send + Sync {
    fn connect(&self, target: &str) -> anyhow::Result<Arc<dyn MxLookup>>;
}

/// Parse `ip` or `ip:port` (bracketed for IPv6), defaulting to port 53.
pub fn parse_target(target: &str) -> anyhow::Result<SocketAddr> {
    let target = target.trim();
    if let Ok(addr) = target.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let ip: IpAddr = target
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid nameserver address: {:?}", target))?;
    Ok(SocketAddr::new(ip, DNS_PORT))
}

/// Nameservers from the system resolver configuration, deduplicated, in order.
pub fn system_nameservers() -> anyhow::Result<Vec<String>> {
    let (config, _) = hickory_resolver::system_conf::read_system_conf()?;
    let mut targets: Vec<String> = Vec::new();
    for ns in config.name_servers() {
        let target = if ns.socket_addr.port() == DNS_PORT {
            ns.socket_addr.ip().to_string()
        } else {
            ns.socket_addr.to_string()
        };
        if !targets.contains(&target) {
            targets.push(target);
        }
    }
    if targets.is_empty() {
        anyhow::bail!("no nameservers found in the system resolver configuration");
    }
    Ok(targets)
}

/// Lookup backed by a hickory resolver pinned to one nameserver.
pub struct HickoryLookup {
    resolver: TokioAsyncResolver,
}

impl HickoryLookup {
    pub fn new(addr: SocketAddr, timeout: Duration, attempts: usize) -> Self {
        let group = NameServerConfigGroup::from_ips_clear(&[addr.ip()], addr.port(), true);
        let config = ResolverConfig::from_parts(None, vec![], group);

        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = attempts;

        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

#[async_trait]
impl MxLookup for HickoryLookup {
    async fn lookup_mx(&self, name: &str) -> Result<Vec<String>, LookupFailure> {
        // Fully qualified, so no search domains are appended.
        let fqdn = format!("{}.", name.trim_end_matches('.'));
        let lookup = self.resolver.mx_lookup(fqdn).await?;
        Ok(lookup
            .iter()
            .map(|mx| format!("{} {}", mx.preference(), mx.exchange()))
            .collect())
    }
}

/// Factory for [`HickoryLookup`].
#[derive(Debug, Clone)]
pub struct HickoryFactory {
    pub timeout: Duration,
    pub attempts: usize,
}

impl LookupFactory for HickoryFactory {
    fn connect(&self, target: &str) -> anyhow::Result<Arc<dyn MxLookup>> {
        let addr = parse_target(target)?;
        Ok(Arc::new(HickoryLookup::new(addr, self.timeout, self.attempts)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        assert_eq!(
            parse_target("8.8.8.8").unwrap(),
            "8.8.8.8:53".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_target(" 1.1.1.1:5353 ").unwrap(),
            "1.1.1.1:5353".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(parse_target("::1").unwrap().port(), DNS_PORT);
        assert_eq!(parse_target("[::1]:54").unwrap().port(), 54);
        assert!(parse_target("dns.example.com").is_err());
        assert!(parse_target("").is_err());
    }

    #[test]
    fn test_failure_labels() {
        assert_eq!(LookupFailure::NxDomain.label(), "NXDOMAIN");
        assert_eq!(LookupFailure::NoAnswer.label(), "NoAnswer");
        assert_eq!(LookupFailure::Timeout.label(), "Timeout");
        assert_eq!(LookupFailure::NoNameservers.label(), "NoNameservers");
        assert_eq!(LookupFailure::Other("boom".into()).label(), "Error");
    }

    #[test]
    fn test_resolve_error_mapping() {
        let timeout = ResolveError::from(ResolveErrorKind::Timeout);
        assert_eq!(LookupFailure::from(timeout), LookupFailure::Timeout);

        let no_conn = ResolveError::from(ResolveErrorKind::NoConnections);
        assert_eq!(LookupFailure::from(no_conn), LookupFailure::NoNameservers);

        let other = ResolveError::from("something odd");
        assert!(matches!(LookupFailure::from(other), LookupFailure::Other(_)));
    }

    #[tokio::test]
    async fn test_factory_rejects_bad_target() {
        let factory = HickoryFactory {
            timeout: Duration::from_secs(1),
            attempts: 1,
        };
        assert!(factory.connect("not-an-ip").is_err());
        assert!(factory.connect("127.0.0.1").is_ok());
    }
}
