use std::net::Ipv4Addr;

use async_trait::async_trait;
use ipnet::Ipv4Net;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::RouteError;

/// Kernel routing table.
#[async_trait]
pub trait RouteTable: Send + Sync {
    async fn add(&self, destination: Ipv4Net, gateway: Ipv4Addr) -> Result<(), String>;
}

/// Uses iproute2, the same way the tunnel interface itself gets configured.
#[derive(Debug, Clone)]
pub struct IpRouteTable {
    ip_binary: String,
}

impl IpRouteTable {
    pub fn with_binary(ip_binary: impl Into<String>) -> Self {
        Self {
            ip_binary: ip_binary.into(),
        }
    }
}

impl Default for IpRouteTable {
    fn default() -> Self {
        Self::with_binary("ip")
    }
}

#[async_trait]
impl RouteTable for IpRouteTable {
    async fn add(&self, destination: Ipv4Net, gateway: Ipv4Addr) -> Result<(), String> {
        let output = Command::new(&self.ip_binary)
            .args([
                "route",
                "add",
                &destination.to_string(),
                "via",
                &gateway.to_string(),
            ])
            .output()
            .await
            .map_err(|e| e.to_string())?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.is_empty() {
            Err(format!("ip {}", output.status))
        } else {
            Err(stderr)
        }
    }
}

/// Parses `a.b.c.d/len`, `a.b.c.d/netmask` or a bare host address, and
/// truncates host bits so the result is the network address.
pub fn parse_route_spec(spec: &str) -> Result<Ipv4Net, RouteError> {
    let invalid = |reason: String| RouteError::InvalidSpec {
        spec: spec.to_string(),
        reason,
    };

    let spec_trimmed = spec.trim();
    let (addr, prefix) = match spec_trimmed.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (spec_trimmed, None),
    };

    let addr: Ipv4Addr = addr.parse().map_err(|_| invalid(format!("bad address '{addr}'")))?;
    let prefix_len = match prefix {
        None => 32,
        Some(p) if p.contains('.') => {
            let mask: Ipv4Addr = p.parse().map_err(|_| invalid(format!("bad netmask '{p}'")))?;
            ipnet::ipv4_mask_to_prefix(mask).map_err(|e| invalid(e.to_string()))?
        }
        Some(p) => p.parse::<u8>().map_err(|_| invalid(format!("bad prefix '{p}'")))?,
    };

    let net = Ipv4Net::new(addr, prefix_len).map_err(|e| invalid(e.to_string()))?;
    Ok(net.trunc())
}

#[derive(Debug, Default)]
pub struct RouteReport {
    pub installed: Vec<Ipv4Net>,
    pub failed: Vec<RouteError>,
}

pub struct RouteInstaller<R> {
    table: R,
}

impl<R: RouteTable> RouteInstaller<R> {
    pub fn new(table: R) -> Self {
        Self { table }
    }

    pub async fn add(&self, spec: &str, gateway: Ipv4Addr) -> Result<Ipv4Net, RouteError> {
        let destination = parse_route_spec(spec)?;
        self.table
            .add(destination, gateway)
            .await
            .map_err(|reason| RouteError::Rejected {
                destination,
                gateway,
                reason,
            })?;
        debug!("Route {} via {} added", destination, gateway);
        Ok(destination)
    }

    /// One bad route must not take the tunnel down: failures are collected.
    pub async fn install_all(&self, specs: &[&str], gateway: Ipv4Addr) -> RouteReport {
        let mut report = RouteReport::default();
        for spec in specs {
            match self.add(spec, gateway).await {
                Ok(net) => report.installed.push(net),
                Err(e) => {
                    warn!("{e}");
                    report.failed.push(e);
                }
            }
        }
        info!(
            "Installed {} of {} routes via {}",
            report.installed.len(),
            specs.len(),
            gateway
        );
        report
    }
}
