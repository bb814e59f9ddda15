use std::sync::Arc;

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::Url;
use tracing::debug;

use crate::error::TransportError;
use crate::ssl_verifiers;

pub const USER_AGENT: &str = "Dell SonicWALL NetExtender for Linux 8.1.789";

#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    /// Header names compare case-insensitively, so `X-NE-Message` and
    /// `X-NE-message` are the same header here.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.body.lines()
    }
}

/// HTTPS requests against the gateway, with cookies carried between calls.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_form(
        &self,
        path: &str,
        form: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, TransportError>;

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<HttpResponse, TransportError>;

    /// Value of a session cookie set by the gateway, if any.
    fn cookie(&self, name: &str) -> Option<String>;
}

pub struct HttpsTransport {
    client: reqwest::Client,
    jar: Arc<Jar>,
    base: Url,
}

impl HttpsTransport {
    pub fn new(server: &str, port: u16, fingerprint: Option<[u8; 32]>) -> Result<Self, TransportError> {
        let base = Url::parse(&format!("https://{}:{}/", server, port))
            .map_err(|e| TransportError::Url(e.to_string()))?;
        let jar = Arc::new(Jar::default());

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .cookie_provider(jar.clone())
            .use_preconfigured_tls(ssl_verifiers::client_config(fingerprint))
            .build()
            .map_err(|e| TransportError::Tls(e.to_string()))?;

        Ok(Self { client, jar, base })
    }

    fn url(&self, path: &str) -> Result<Url, TransportError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::Url(e.to_string()))
    }

    async fn collect(resp: reqwest::Response) -> Result<HttpResponse, TransportError> {
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();
        let bytes = resp.bytes().await?;
        let body = String::from_utf8_lossy(&bytes).into_owned();
        debug!("HTTP {} ({} bytes)", status, body.len());
        Ok(HttpResponse { status, headers, body })
    }
}

#[async_trait]
impl Transport for HttpsTransport {
    async fn post_form(
        &self,
        path: &str,
        form: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, TransportError> {
        let mut req = self.client.post(self.url(path)?).form(form);
        for (name, value) in headers {
            req = req.header(*name, *value);
        }
        Self::collect(req.send().await?).await
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<HttpResponse, TransportError> {
        let resp = self.client.get(self.url(path)?).query(query).send().await?;
        Self::collect(resp).await
    }

    fn cookie(&self, name: &str) -> Option<String> {
        let header = self.jar.cookies(&self.base)?;
        let raw = header.to_str().ok()?;
        raw.split(';').find_map(|pair| {
            let (k, v) = pair.trim().split_once('=')?;
            (k == name).then(|| v.to_string())
        })
    }
}
