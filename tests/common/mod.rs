#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ipnet::Ipv4Net;

use nx_tunnel::error::{LinkError, TransportError};
use nx_tunnel::link::{LinkSession, TunnelLink};
use nx_tunnel::route::RouteTable;
use nx_tunnel::transport::{HttpResponse, Transport};
use nx_tunnel::types::AuthToken;

pub const SESSION_BODY: &str = "<html>\n\
<head>\n\
NX_TUNNEL_PROTO_VER = 2.0\n\
SessionId = abc123\n\
Route = 10.0.0.0/24\n\
Route = 10.1.0.0/255.255.0.0\n\
Route = 10.0.0.0/24\n\
dns1 = 10.0.0.1\n\
dns2 = 10.0.0.2\n\
dnsSuffixes = corp.local\n\
}</script>\n\
</html>\n";

pub fn ok_response(body: &str) -> HttpResponse {
    HttpResponse {
        status: 200,
        headers: vec![("Content-Type".into(), "text/html".into())],
        body: body.to_string(),
    }
}

pub fn error_response(header: &str, message: &str) -> HttpResponse {
    HttpResponse {
        status: 200,
        headers: vec![(header.to_string(), message.to_string())],
        body: String::new(),
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: &'static str,
    pub path: String,
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

struct TransportInner {
    login: HttpResponse,
    session: HttpResponse,
    cookie: Option<String>,
    fail_logout: bool,
    requests: Vec<Request>,
}

#[derive(Clone)]
pub struct FakeTransport {
    inner: Arc<Mutex<TransportInner>>,
}

impl FakeTransport {
    pub fn new(login: HttpResponse, session: HttpResponse) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TransportInner {
                login,
                session,
                cookie: Some("swap-cookie".into()),
                fail_logout: false,
                requests: Vec::new(),
            })),
        }
    }

    pub fn with_cookie(self, cookie: Option<&str>) -> Self {
        self.inner.lock().unwrap().cookie = cookie.map(str::to_string);
        self
    }

    pub fn failing_logout(self) -> Self {
        self.inner.lock().unwrap().fail_logout = true;
        self
    }

    pub fn requests(&self) -> Vec<Request> {
        self.inner.lock().unwrap().requests.clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.path).collect()
    }

    pub fn logged_out(&self) -> bool {
        self.paths().iter().any(|p| p == "/cgi-bin/userLogout")
    }
}

fn owned(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[async_trait]
impl Transport for FakeTransport {
    async fn post_form(
        &self,
        path: &str,
        form: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.requests.push(Request {
            method: "POST",
            path: path.to_string(),
            params: owned(form),
            headers: owned(headers),
        });
        Ok(inner.login.clone())
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<HttpResponse, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.requests.push(Request {
            method: "GET",
            path: path.to_string(),
            params: owned(query),
            headers: Vec::new(),
        });
        match path {
            "/cgi-bin/sslvpnclient" => Ok(inner.session.clone()),
            _ if inner.fail_logout => Err(TransportError::Url("gateway unreachable".into())),
            _ => Ok(ok_response("")),
        }
    }

    fn cookie(&self, name: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        if name == "swap" {
            inner.cookie.clone()
        } else {
            None
        }
    }
}

#[derive(Clone, Copy)]
pub enum LinkBehaviour {
    /// Reports the gateway, then the link closes normally.
    UpThenClose(Ipv4Addr),
    /// Reports the gateway and stays up until stopped.
    UpUntilStopped(Ipv4Addr),
    /// Fails before a gateway is known.
    FailBeforeGateway,
    /// Never reports anything until stopped.
    Hang,
}

#[derive(Clone)]
pub struct FakeLink {
    behaviour: LinkBehaviour,
    pub tokens: Arc<Mutex<Vec<String>>>,
    pub stopped: Arc<Mutex<bool>>,
    /// Resolver content observed when the link was dialed.
    pub resolv_seen: Arc<Mutex<Option<String>>>,
    resolv_path: Option<PathBuf>,
}

impl FakeLink {
    pub fn new(behaviour: LinkBehaviour) -> Self {
        Self {
            behaviour,
            tokens: Arc::default(),
            stopped: Arc::default(),
            resolv_seen: Arc::default(),
            resolv_path: None,
        }
    }

    pub fn watching(mut self, resolv_path: PathBuf) -> Self {
        self.resolv_path = Some(resolv_path);
        self
    }
}

#[async_trait]
impl TunnelLink for FakeLink {
    async fn connect(&mut self, token: &AuthToken) -> Result<LinkSession, LinkError> {
        self.tokens.lock().unwrap().push(token.as_str().to_string());
        if let Some(path) = &self.resolv_path {
            *self.resolv_seen.lock().unwrap() = std::fs::read_to_string(path).ok();
        }

        let (session, mut notifier) = LinkSession::channel();
        match self.behaviour {
            LinkBehaviour::UpThenClose(gw) => {
                notifier.gateway(gw);
                notifier.finish(Ok(()));
            }
            LinkBehaviour::FailBeforeGateway => {
                notifier.finish(Err(LinkError::Terminated("LCP negotiation failed".into())));
            }
            LinkBehaviour::UpUntilStopped(_) | LinkBehaviour::Hang => {
                if let LinkBehaviour::UpUntilStopped(gw) = self.behaviour {
                    notifier.gateway(gw);
                }
                let stop = notifier.stop_token();
                let stopped = self.stopped.clone();
                tokio::spawn(async move {
                    stop.cancelled().await;
                    *stopped.lock().unwrap() = true;
                    notifier.finish(Ok(()));
                });
            }
        }
        Ok(session)
    }
}

#[derive(Clone, Default)]
pub struct FakeRoutes {
    pub added: Arc<Mutex<Vec<(Ipv4Net, Ipv4Addr)>>>,
    reject: Option<Ipv4Net>,
}

impl FakeRoutes {
    pub fn rejecting(net: &str) -> Self {
        Self {
            added: Arc::default(),
            reject: Some(net.parse().unwrap()),
        }
    }

    pub fn added(&self) -> Vec<(Ipv4Net, Ipv4Addr)> {
        self.added.lock().unwrap().clone()
    }
}

#[async_trait]
impl RouteTable for FakeRoutes {
    async fn add(&self, destination: Ipv4Net, gateway: Ipv4Addr) -> Result<(), String> {
        if Some(destination) == self.reject {
            return Err("RTNETLINK answers: Network is unreachable".into());
        }
        self.added.lock().unwrap().push((destination, gateway));
        Ok(())
    }
}
