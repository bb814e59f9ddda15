use std::net::Ipv4Addr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{split, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::ServerName;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use crate::error::LinkError;
use crate::link::{LinkNotifier, LinkSession, TunnelLink};
use crate::ssl_verifiers;
use crate::transport::USER_AGENT;
use crate::types::AuthToken;

const PPPD_ARGS: &[&str] = &[
    "logfd", "2",
    "nodetach",
    "notty",
    "sync",
    "noauth",
    "nodefaultroute",
    "noipdefault",
    "nodeflate",
    "nobsdcomp",
    "novj",
    "lcp-echo-interval", "10",
    "lcp-echo-failure", "5",
    "ipcp-accept-local",
    "ipcp-accept-remote",
];

const MAX_FRAME: usize = 0xFFFF;
const PPPD_STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PppdConfig {
    pub server: String,
    pub port: u16,
    pub fingerprint: Option<[u8; 32]>,
    pub pppd: String,
}

pub struct PppdLink {
    config: PppdConfig,
}

impl PppdLink {
    pub fn new(config: PppdConfig) -> Self {
        Self { config }
    }

    async fn tls_connect(&self) -> Result<TlsStream<TcpStream>, LinkError> {
        let connector = TlsConnector::from(Arc::new(ssl_verifiers::client_config(
            self.config.fingerprint,
        )));
        let name = ServerName::try_from(self.config.server.as_str())
            .map_err(|e| LinkError::Tls(e.to_string()))?;

        let tcp = TcpStream::connect((self.config.server.as_str(), self.config.port)).await?;
        tcp.set_nodelay(true)?;
        connector
            .connect(name, tcp)
            .await
            .map_err(|e| LinkError::Tls(e.to_string()))
    }
}

/// Request that switches the TLS connection over to carrying PPP frames.
pub fn tunnel_request(token: &AuthToken) -> String {
    format!(
        "CONNECT localhost:0 HTTP/1.0\r\n\
         X-SSLVPN-PROTOCOL: 2.0\r\n\
         X-SSLVPN-SERVICE: NETEXTENDER\r\n\
         Proxy-Authorization: {token}\r\n\
         X-NX-Client-Platform: Linux\r\n\
         Connection-Medium: MacOS\r\n\
         User-Agent: {ua}\r\n\
         Frame-Encode: off\r\n\
         X-NE-PROTOCOL: 2.0\r\n\
         \r\n",
        token = token.as_str(),
        ua = USER_AGENT,
    )
}

/// pppd announces the peer with `remote IP address a.b.c.d`.
pub fn parse_remote_address(line: &str) -> Option<Ipv4Addr> {
    line.trim()
        .strip_prefix("remote IP address")?
        .trim()
        .parse()
        .ok()
}

#[async_trait]
impl TunnelLink for PppdLink {
    async fn connect(&mut self, token: &AuthToken) -> Result<LinkSession, LinkError> {
        info!("Connecting tunnel to {}:{}", self.config.server, self.config.port);
        let mut stream = self.tls_connect().await?;
        stream.write_all(tunnel_request(token).as_bytes()).await?;
        stream.flush().await?;

        let child = Command::new(&self.config.pppd)
            .args(PPPD_ARGS)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(LinkError::Spawn)?;
        debug!("pppd started (pid {:?})", child.id());

        let (session, notifier) = LinkSession::channel();
        tokio::spawn(run_link(stream, child, notifier));
        Ok(session)
    }
}

/// Relays frames between pppd and the gateway until either side goes away
/// or a stop is requested, then reports the outcome exactly once.
async fn run_link(stream: TlsStream<TcpStream>, mut child: Child, mut notifier: LinkNotifier) {
    let stop = notifier.stop_token();

    let (Some(ppp_in), Some(ppp_out), Some(ppp_log)) =
        (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        let _ = child.start_kill();
        notifier.finish(Err(LinkError::Terminated("pppd pipes unavailable".into())));
        return;
    };

    let (tls_rd, tls_wr) = split(stream);
    let uplink = pump_uplink(ppp_out, tls_wr);
    let downlink = pump_downlink(tls_rd, ppp_in);
    tokio::pin!(uplink, downlink);

    let mut log_lines = BufReader::new(ppp_log).lines();
    let mut log_open = true;

    let outcome = loop {
        tokio::select! {
            line = log_lines.next_line(), if log_open => match line {
                Ok(Some(line)) => {
                    debug!("pppd: {}", line);
                    if let Some(gw) = parse_remote_address(&line) {
                        info!("Peer address {}", gw);
                        notifier.gateway(gw);
                    }
                }
                _ => log_open = false,
            },
            res = &mut uplink => {
                break Err(match res {
                    Ok(()) => LinkError::Terminated("pppd closed its output".into()),
                    Err(e) => LinkError::Io(e),
                });
            }
            res = &mut downlink => {
                break Err(match res {
                    Ok(()) => LinkError::Terminated("gateway closed the connection".into()),
                    Err(e) => LinkError::Io(e),
                });
            }
            status = child.wait() => {
                break match status {
                    Ok(s) if s.success() => Ok(()),
                    Ok(s) => Err(LinkError::Terminated(format!("pppd exited with {}", s))),
                    Err(e) => Err(LinkError::Io(e)),
                };
            }
            _ = stop.cancelled() => {
                info!("Stopping pppd");
                break Ok(());
            }
        }
    };

    shutdown_pppd(&mut child).await;
    notifier.finish(outcome);
}

async fn shutdown_pppd(child: &mut Child) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }
    if let Some(pid) = child.id() {
        // SIGTERM lets pppd send LCP terminate-request before exiting
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }
    if timeout(PPPD_STOP_GRACE, child.wait()).await.is_err() {
        warn!("pppd did not exit in time, killing it");
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

/// pppd → gateway: each frame pppd writes gets a 4-byte big-endian length.
pub async fn pump_uplink<R, W>(mut ppp_out: R, mut tls_wr: W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; MAX_FRAME];
    loop {
        let n = ppp_out.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        tls_wr.write_all(&(n as u32).to_be_bytes()).await?;
        tls_wr.write_all(&buf[..n]).await?;
        tls_wr.flush().await?;
    }
}

/// gateway → pppd: strips the length prefix and hands pppd whole frames.
pub async fn pump_downlink<R, W>(mut tls_rd: R, mut ppp_in: W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; MAX_FRAME];
    loop {
        let len = match tls_rd.read_u32().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        };
        if len > MAX_FRAME {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("frame of {} bytes exceeds limit", len),
            ));
        }
        tls_rd.read_exact(&mut buf[..len]).await?;
        ppp_in.write_all(&buf[..len]).await?;
        ppp_in.flush().await?;
    }
}
