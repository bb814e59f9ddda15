use std::io;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use ipnet::Ipv4Net;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Server returned error: {0}")]
    Server(String),

    #[error("Login request failed: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error("Server returned error: {0}")]
    Server(String),

    #[error("Session start request failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Session start response carried no tunnel parameters")]
    Empty,
}

/// Resolver file I/O failure. Always fatal to the session.
#[derive(Error, Debug)]
#[error("{action} {}: {source}", path.display())]
pub struct DnsError {
    pub action: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl DnsError {
    pub fn new(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self {
            action,
            path: path.into(),
            source,
        }
    }
}

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("No auth token available: {0}")]
    MissingToken(String),

    #[error("TLS connection to gateway failed: {0}")]
    Tls(String),

    #[error("Failed to start pppd: {0}")]
    Spawn(#[source] io::Error),

    #[error("Link I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Link closed before a gateway address was negotiated")]
    ClosedBeforeGateway,

    #[error("Link terminated: {0}")]
    Terminated(String),
}

/// Per-route failure. Never aborts a session.
#[derive(Error, Debug)]
pub enum RouteError {
    #[error("Invalid route '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },

    #[error("Failed to add route {destination} via {gateway}: {reason}")]
    Rejected {
        destination: Ipv4Net,
        gateway: Ipv4Addr,
        reason: String,
    },
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Session negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),

    #[error("DNS configuration failed: {0}")]
    Dns(#[from] DnsError),

    #[error("Tunnel link failed: {0}")]
    Link(#[from] LinkError),

    #[error("Session cancelled")]
    Cancelled,
}
