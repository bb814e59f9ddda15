use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use nix::unistd::Uid;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use nx_tunnel::dns::{DnsConfigurator, RESOLV_CONF};
use nx_tunnel::pppd::{PppdConfig, PppdLink};
use nx_tunnel::route::IpRouteTable;
use nx_tunnel::tools::parse_sha256_hex;
use nx_tunnel::transport::HttpsTransport;
use nx_tunnel::{log, Credentials, TunnelOrchestrator};

/// SSL-VPN client for NetExtender-compatible gateways.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Gateway host name or address
    #[arg(short, long, env = "NX_SERVER")]
    server: String,

    #[arg(short = 'P', long, env = "NX_PORT", default_value_t = 443)]
    port: u16,

    #[arg(short, long, env = "NX_USERNAME")]
    username: String,

    #[arg(short, long, env = "NX_PASSWORD", hide_env_values = true)]
    password: String,

    /// Login domain as configured on the gateway
    #[arg(short, long, env = "NX_DOMAIN")]
    domain: String,

    /// SHA-256 fingerprint of the gateway certificate; disables CA checks
    #[arg(short, long, env = "NX_FINGERPRINT")]
    fingerprint: Option<String>,

    #[arg(long, default_value = RESOLV_CONF)]
    resolv_conf: PathBuf,

    #[arg(long, default_value = "pppd")]
    pppd: String,

    /// Only restore DNS left behind by a crashed session, then exit
    #[arg(long)]
    restore_dns: bool,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn shutdown_on_signals(token: CancellationToken) -> Result<()> {
    let mut term = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut int = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = term.recv() => info!("Received SIGTERM"),
            _ = int.recv() => info!("Received SIGINT"),
        }
        token.cancel();
    });
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    log::init(args.verbose);

    if !Uid::effective().is_root() {
        warn!("Not running as root; DNS, pppd and route changes will likely fail");
    }

    let dns = DnsConfigurator::new(&args.resolv_conf);
    if dns.recover().context("recovering resolver configuration")? {
        info!("Restored resolver configuration from a previous session");
    }
    if args.restore_dns {
        return Ok(());
    }

    let fingerprint = args
        .fingerprint
        .as_deref()
        .map(parse_sha256_hex)
        .transpose()
        .context("parsing --fingerprint")?;

    let transport = HttpsTransport::new(&args.server, args.port, fingerprint)
        .context("building HTTPS client")?;
    let link = PppdLink::new(PppdConfig {
        server: args.server.clone(),
        port: args.port,
        fingerprint,
        pppd: args.pppd.clone(),
    });

    let shutdown = CancellationToken::new();
    shutdown_on_signals(shutdown.clone())?;

    let creds = Credentials {
        username: args.username,
        password: args.password,
        domain: args.domain,
    };

    let orchestrator = TunnelOrchestrator::new(transport, dns, link, IpRouteTable::default());
    match orchestrator.run(&creds, &shutdown).await {
        Ok(report) => {
            for e in &report.route_errors {
                warn!("{e}");
            }
            info!(
                "Session ended ({} routes installed, {} warnings)",
                report.installed_routes.len(),
                report.warnings.len()
            );
            Ok(())
        }
        Err(e) => {
            error!("{e}");
            Err(e.into())
        }
    }
}
