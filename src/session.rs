use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthenticationClient, SESSION_COOKIE};
use crate::dns::{DnsConfigurator, ResolverSnapshot};
use crate::error::{LinkError, SessionError};
use crate::link::{LinkSession, TunnelLink};
use crate::route::{RouteInstaller, RouteTable};
use crate::transport::Transport;
use crate::types::{AuthToken, Credentials, SessionParameters, SessionReport, TunnelState};

pub const TUNNEL_PROTO_KEY: &str = "NX_TUNNEL_PROTO_VER";
pub const SESSION_ID_KEY: &str = "SessionId";

const LINK_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Picks the credential the tunnel link presents to the gateway.
///
/// Gateways that don't announce a tunnel protocol version expect the `swap`
/// session cookie; version 2.0 expects `SessionId`. For any other version
/// `SessionId` is a guess, so a warning is returned alongside the token.
pub fn select_auth_token(
    params: &SessionParameters,
    session_cookie: Option<String>,
) -> Result<(AuthToken, Option<String>), LinkError> {
    let session_id = || {
        params
            .option(SESSION_ID_KEY)
            .map(AuthToken::new)
            .ok_or_else(|| LinkError::MissingToken(format!("no {} in session parameters", SESSION_ID_KEY)))
    };

    match params.option(TUNNEL_PROTO_KEY) {
        None => session_cookie
            .map(|c| (AuthToken::new(c), None))
            .ok_or_else(|| LinkError::MissingToken(format!("no '{}' session cookie", SESSION_COOKIE))),
        Some("2.0") => Ok((session_id()?, None)),
        Some(other) => {
            let warning = format!("Unknown tunnel version '{}', using {}", other, SESSION_ID_KEY);
            Ok((session_id()?, Some(warning)))
        }
    }
}

/// Runs one VPN session: login, negotiation, DNS, link, routes, teardown.
///
/// Host state is only changed in `DnsConfigured` and later, and everything
/// changed there is put back by [`teardown`](Self::teardown), which runs once
/// whichever way the session ends. If the orchestrator is dropped mid-session
/// the resolver file is still restored.
pub struct TunnelOrchestrator<T: Transport, L, R> {
    auth: AuthenticationClient<T>,
    dns: DnsConfigurator,
    link: L,
    routes: RouteInstaller<R>,
    state: TunnelState,
    reached: TunnelState,
    logged_in: bool,
    snapshot: Option<ResolverSnapshot>,
    warnings: Vec<String>,
}

impl<T, L, R> TunnelOrchestrator<T, L, R>
where
    T: Transport,
    L: TunnelLink,
    R: RouteTable,
{
    pub fn new(transport: T, dns: DnsConfigurator, link: L, routes: R) -> Self {
        Self {
            auth: AuthenticationClient::new(transport),
            dns,
            link,
            routes: RouteInstaller::new(routes),
            state: TunnelState::Idle,
            reached: TunnelState::Idle,
            logged_in: false,
            snapshot: None,
            warnings: Vec::new(),
        }
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    pub async fn run(
        mut self,
        creds: &Credentials,
        shutdown: &CancellationToken,
    ) -> Result<SessionReport, SessionError> {
        let result = self.drive(creds, shutdown).await;
        if let Err(e) = &result {
            error!("Session aborted in state {:?}: {}", self.state, e);
        }
        self.teardown().await;
        result.map(|mut report| {
            report.final_state = self.state;
            report.warnings = std::mem::take(&mut self.warnings);
            report
        })
    }

    async fn drive(
        &mut self,
        creds: &Credentials,
        shutdown: &CancellationToken,
    ) -> Result<SessionReport, SessionError> {
        info!("Logging in...");
        cancellable(shutdown, self.auth.login(creds)).await?;
        self.logged_in = true;
        self.advance(TunnelState::Authenticated);

        info!("Starting session...");
        let params = cancellable(shutdown, self.auth.negotiate()).await?;
        self.advance(TunnelState::Negotiated);

        info!("Update remote DNS...");
        let snapshot = self.dns.capture()?;
        self.snapshot = Some(snapshot.clone());
        self.dns.apply(
            &params.distinct_nameservers(),
            &params.distinct_search_suffixes(),
            &snapshot,
        )?;
        self.advance(TunnelState::DnsConfigured);

        info!("Dialing up tunnel...");
        let (token, warning) = select_auth_token(&params, self.auth.session_cookie())?;
        if let Some(warning) = warning {
            warn!("{}", warning);
            self.warnings.push(warning);
        }
        let mut link = cancellable(shutdown, self.link.connect(&token)).await?;
        let gateway = wait_for_gateway(&mut link, shutdown).await?;
        self.advance(TunnelState::LinkUp);

        let routes = self
            .routes
            .install_all(&params.distinct_routes(), gateway)
            .await;
        self.advance(TunnelState::RoutesInstalled);
        if !routes.failed.is_empty() {
            let warning = format!("{} route(s) could not be installed", routes.failed.len());
            warn!("{}", warning);
            self.warnings.push(warning);
        }
        info!("Remote routing configured, VPN is up");

        tokio::select! {
            res = &mut link.finished => {
                res.unwrap_or(Ok(()))?;
                info!("Tunnel closed");
            }
            _ = shutdown.cancelled() => {
                info!("Shutdown requested, closing tunnel");
                if let Err(e) = stop_link(&mut link).await {
                    debug!("Link ended with error during shutdown: {e}");
                }
            }
        }

        Ok(SessionReport {
            reached: self.reached,
            final_state: self.state,
            gateway: Some(gateway),
            installed_routes: routes.installed,
            route_errors: routes.failed,
            warnings: Vec::new(),
        })
    }

    /// Restores DNS and logs out. Errors are logged, never raised.
    pub async fn teardown(&mut self) {
        if self.state == TunnelState::TornDown {
            return;
        }
        if let Some(snapshot) = self.snapshot.take() {
            if let Err(e) = self.dns.restore(&snapshot) {
                error!("Failed to restore DNS, backup left at {}: {e}", self.dns.backup_path().display());
            }
        }
        if self.logged_in {
            self.auth.logout().await;
            self.logged_in = false;
        }
        self.advance(TunnelState::TornDown);
    }

    fn advance(&mut self, next: TunnelState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!("State {:?} -> {:?}", self.state, next);
        self.state = next;
        if next != TunnelState::TornDown {
            self.reached = next;
        }
    }
}

impl<T: Transport, L, R> Drop for TunnelOrchestrator<T, L, R> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            warn!("Session dropped without teardown, restoring DNS");
            if let Err(e) = self.dns.restore(&snapshot) {
                error!("Failed to restore DNS: {e}");
            }
        }
    }
}

async fn cancellable<F, V, E>(shutdown: &CancellationToken, fut: F) -> Result<V, SessionError>
where
    F: Future<Output = Result<V, E>>,
    SessionError: From<E>,
{
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Err(SessionError::Cancelled),
        res = fut => res.map_err(SessionError::from),
    }
}

/// Blocks until the link reports the peer address. On any other outcome the
/// link is stopped before returning.
async fn wait_for_gateway(
    link: &mut LinkSession,
    shutdown: &CancellationToken,
) -> Result<Ipv4Addr, SessionError> {
    let cancelled = tokio::select! {
        gw = &mut link.gateway => match gw {
            Ok(addr) => return Ok(addr),
            Err(_) => false,
        },
        _ = shutdown.cancelled() => true,
    };

    if cancelled {
        if let Err(e) = stop_link(link).await {
            debug!("Link ended with error during shutdown: {e}");
        }
        return Err(SessionError::Cancelled);
    }

    // the link dropped its gateway sender, so it has finished or is finishing
    let err = match (&mut link.finished).await {
        Ok(Err(e)) => e,
        _ => LinkError::ClosedBeforeGateway,
    };
    Err(err.into())
}

async fn stop_link(link: &mut LinkSession) -> Result<(), LinkError> {
    link.stop.cancel();
    match timeout(LINK_STOP_TIMEOUT, &mut link.finished).await {
        Ok(Ok(res)) => res,
        Ok(Err(_)) => Ok(()),
        Err(_) => {
            warn!("Tunnel link did not stop within {:?}", LINK_STOP_TIMEOUT);
            Ok(())
        }
    }
}
