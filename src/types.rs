use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::error::RouteError;

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub domain: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("domain", &self.domain)
            .finish()
    }
}

/// Tunnel parameters handed out by the gateway on session start.
///
/// Collections keep arrival order; the `distinct_*` accessors give the
/// deduplicated view used when touching host state.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionParameters {
    pub srv_options: BTreeMap<String, String>,
    pub routes: Vec<String>,
    pub nameservers: Vec<String>,
    pub search_suffixes: Vec<String>,
}

impl SessionParameters {
    pub fn option(&self, key: &str) -> Option<&str> {
        self.srv_options.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.srv_options.is_empty()
            && self.routes.is_empty()
            && self.nameservers.is_empty()
            && self.search_suffixes.is_empty()
    }

    pub fn distinct_routes(&self) -> Vec<&str> {
        distinct(&self.routes)
    }

    pub fn distinct_nameservers(&self) -> Vec<&str> {
        distinct(&self.nameservers)
    }

    pub fn distinct_search_suffixes(&self) -> Vec<&str> {
        distinct(&self.search_suffixes)
    }
}

fn distinct(values: &[String]) -> Vec<&str> {
    let mut out: Vec<&str> = Vec::with_capacity(values.len());
    for v in values {
        if !out.contains(&v.as_str()) {
            out.push(v);
        }
    }
    out
}

/// Opaque credential the tunnel link presents to the gateway.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthToken(<{} bytes>)", self.0.len())
    }
}

/// Orchestration progress. Variants are declared in forward order, so the
/// derived `Ord` is the order of the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TunnelState {
    Idle,
    Authenticated,
    Negotiated,
    DnsConfigured,
    LinkUp,
    RoutesInstalled,
    TornDown,
}

impl TunnelState {
    /// Forward transitions only go to the immediate successor; anything may
    /// fall through to `TornDown`.
    pub fn can_advance_to(self, next: TunnelState) -> bool {
        use TunnelState::*;
        matches!(
            (self, next),
            (Idle, Authenticated)
                | (Authenticated, Negotiated)
                | (Negotiated, DnsConfigured)
                | (DnsConfigured, LinkUp)
                | (LinkUp, RoutesInstalled)
        ) || (next == TornDown && self != TornDown)
    }
}

/// Outcome of a session that got at least as far as bringing the link up.
#[derive(Debug)]
pub struct SessionReport {
    /// Furthest state reached before teardown.
    pub reached: TunnelState,
    pub final_state: TunnelState,
    pub gateway: Option<Ipv4Addr>,
    pub installed_routes: Vec<Ipv4Net>,
    pub route_errors: Vec<RouteError>,
    pub warnings: Vec<String>,
}
