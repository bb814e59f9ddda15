use tracing::{debug, info};

use crate::error::{AuthError, NegotiationError};
use crate::parser::parse_session_response;
use crate::transport::{HttpResponse, Transport};
use crate::types::{Credentials, SessionParameters};

pub const LOGIN_PATH: &str = "/cgi-bin/userLogin";
pub const SESSION_PATH: &str = "/cgi-bin/sslvpnclient";
pub const LOGOUT_PATH: &str = "/cgi-bin/userLogout";

/// Name of the session cookie used as auth token by older gateways.
pub const SESSION_COOKIE: &str = "swap";

/// Checked before the status code: the gateway answers 200 even on failure.
const ERROR_HEADER: &str = "X-NE-Message";

/// Capabilities announced on session start.
const SESSION_QUERY: [(&str, &str); 3] = [
    ("launchplatform", "mac"),
    ("neProto", "3"),
    ("supportipv6", "no"),
];

fn server_error(resp: &HttpResponse) -> Option<String> {
    resp.header(ERROR_HEADER)
        .filter(|msg| !msg.is_empty())
        .map(str::to_string)
}

pub struct AuthenticationClient<T> {
    transport: T,
}

impl<T: Transport> AuthenticationClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn login(&self, creds: &Credentials) -> Result<(), AuthError> {
        let resp = self
            .transport
            .post_form(
                LOGIN_PATH,
                &[
                    ("username", creds.username.as_str()),
                    ("password", creds.password.as_str()),
                    ("domain", creds.domain.as_str()),
                    ("login", "true"),
                ],
                &[("X-NE-SESSIONPROMPT", "true")],
            )
            .await?;

        if let Some(msg) = server_error(&resp) {
            return Err(AuthError::Server(msg));
        }
        debug!("Login accepted (HTTP {})", resp.status);
        Ok(())
    }

    pub async fn negotiate(&self) -> Result<SessionParameters, NegotiationError> {
        let resp = self.transport.get(SESSION_PATH, &SESSION_QUERY).await?;

        if let Some(msg) = server_error(&resp) {
            return Err(NegotiationError::Server(msg));
        }

        let params = parse_session_response(resp.lines());
        if params.is_empty() {
            return Err(NegotiationError::Empty);
        }
        info!(
            "Session started: {} routes, {} nameservers, {} options",
            params.routes.len(),
            params.nameservers.len(),
            params.srv_options.len()
        );
        Ok(params)
    }

    /// Best effort: if we are going down because the gateway is unreachable,
    /// there is nobody to tell.
    pub async fn logout(&self) {
        match self.transport.get(LOGOUT_PATH, &[]).await {
            Ok(resp) => debug!("Logged out (HTTP {})", resp.status),
            Err(e) => debug!("Logout failed, ignoring: {e}"),
        }
    }

    pub fn session_cookie(&self) -> Option<String> {
        self.transport.cookie(SESSION_COOKIE)
    }
}
