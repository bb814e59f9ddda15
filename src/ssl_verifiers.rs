use std::sync::Arc;
use std::time::SystemTime;

use sha2::{Digest, Sha256};
use tokio_rustls::rustls::{
    client::{ServerCertVerified, ServerCertVerifier},
    Certificate, ClientConfig, Error as TLSError, RootCertStore, ServerName,
};
use tracing::{debug, warn};

use crate::tools::format_fingerprint;

/// Accepts exactly one leaf certificate, identified by its SHA-256 digest.
/// Chain and hostname are not checked, matching what the gateway's own
/// clients do with self-signed appliances.
pub struct FingerprintVerifier {
    expected: [u8; 32],
}

impl FingerprintVerifier {
    pub fn new(expected: [u8; 32]) -> Self {
        Self { expected }
    }
}

impl ServerCertVerifier for FingerprintVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, TLSError> {
        let actual: [u8; 32] = Sha256::digest(&end_entity.0).into();
        if actual == self.expected {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(TLSError::General(format!(
                "certificate fingerprint mismatch: got {}",
                format_fingerprint(&actual)
            )))
        }
    }
}

/// TLS policy shared by the HTTPS transport and the tunnel link.
pub fn client_config(fingerprint: Option<[u8; 32]>) -> ClientConfig {
    let builder = ClientConfig::builder().with_safe_defaults();

    match fingerprint {
        Some(fp) => {
            debug!("Pinning server certificate {}", format_fingerprint(&fp));
            builder
                .with_custom_certificate_verifier(Arc::new(FingerprintVerifier::new(fp)))
                .with_no_client_auth()
        }
        None => builder
            .with_root_certificates(native_roots())
            .with_no_client_auth(),
    }
}

fn native_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    match rustls_native_certs::load_native_certs() {
        Ok(certs) => {
            for cert in certs {
                if let Err(e) = roots.add(&Certificate(cert.0)) {
                    debug!("Skipping unusable root certificate: {e}");
                }
            }
        }
        Err(e) => warn!("Could not load system root certificates: {e}"),
    }
    roots
}
