//! STARTTLS upgrade against the system trust store.

use std::sync::{Arc, Once};

use anyhow::{Context, Result};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

fn install_crypto_provider() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        // Err only means another provider was installed first.
        let _ = tokio_rustls::rustls::crypto::ring::default_provider().install_default();
    });
}

/// Build a connector trusting the platform's root certificates.
pub fn connector() -> Result<TlsConnector> {
    install_crypto_provider();

    let native = rustls_native_certs::load_native_certs();
    for e in &native.errors {
        tracing::warn!(error = %e, "error loading a native root certificate");
    }
    if native.certs.is_empty() {
        anyhow::bail!("no system root certificates found (is ca-certificates installed?)");
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    tracing::debug!(added, ignored, "loaded native root certificates");

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Wrap an established TCP stream in TLS, verifying the certificate for `domain`.
pub async fn upgrade(tcp: TcpStream, domain: &str) -> Result<TlsStream<TcpStream>> {
    let server_name = ServerName::try_from(domain.to_string())
        .with_context(|| format!("invalid TLS server name {domain:?}"))?;
    connector()?
        .connect(server_name, tcp)
        .await
        .with_context(|| format!("TLS handshake with {domain} failed"))
}
