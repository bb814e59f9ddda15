use std::net::Ipv4Addr;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::LinkError;
use crate::types::AuthToken;

/// Point-to-point link to the gateway. `connect` returns as soon as the link
/// is dialing; progress arrives through the returned [`LinkSession`].
#[async_trait]
pub trait TunnelLink: Send {
    async fn connect(&mut self, token: &AuthToken) -> Result<LinkSession, LinkError>;
}

/// Orchestrator side of a running link.
pub struct LinkSession {
    pub gateway: oneshot::Receiver<Ipv4Addr>,
    pub finished: oneshot::Receiver<Result<(), LinkError>>,
    pub stop: CancellationToken,
}

/// Link side: each signal fires at most once.
pub struct LinkNotifier {
    gateway: Option<oneshot::Sender<Ipv4Addr>>,
    finished: Option<oneshot::Sender<Result<(), LinkError>>>,
    stop: CancellationToken,
}

impl LinkSession {
    pub fn channel() -> (LinkSession, LinkNotifier) {
        let (gw_tx, gw_rx) = oneshot::channel();
        let (fin_tx, fin_rx) = oneshot::channel();
        let stop = CancellationToken::new();
        (
            LinkSession {
                gateway: gw_rx,
                finished: fin_rx,
                stop: stop.clone(),
            },
            LinkNotifier {
                gateway: Some(gw_tx),
                finished: Some(fin_tx),
                stop,
            },
        )
    }
}

impl LinkNotifier {
    pub fn gateway(&mut self, addr: Ipv4Addr) {
        if let Some(tx) = self.gateway.take() {
            let _ = tx.send(addr);
        }
    }

    pub fn finish(&mut self, result: Result<(), LinkError>) {
        self.gateway.take();
        if let Some(tx) = self.finished.take() {
            let _ = tx.send(result);
        }
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }
}

impl Drop for LinkNotifier {
    fn drop(&mut self) {
        if self.finished.is_some() {
            self.finish(Err(LinkError::Terminated("link task went away".into())));
        }
    }
}
