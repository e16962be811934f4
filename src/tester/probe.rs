//! Transport-level reachability probes.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::error::ProbeError;
use crate::models::ProxyConfig;

/// A successful probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSuccess {
    pub latency: Duration,
    /// Address actually connected to, used for GeoIP lookups.
    pub address: Option<IpAddr>,
}

/// Something that can check whether an endpoint answers.
///
/// The tester enforces the per-probe timeout itself, so implementations
/// may take arbitrarily long (or never finish).
pub trait Prober: Send + Sync {
    fn probe(
        &self,
        config: &ProxyConfig,
    ) -> impl Future<Output = Result<ProbeSuccess, ProbeError>> + Send;
}

/// Resolves the host, opens a TCP connection and, in full-test mode,
/// completes a TLS handshake for entries that declare TLS.
pub struct TcpProber {
    full_test: bool,
    tls: TlsConnector,
}

impl TcpProber {
    pub fn new(full_test: bool) -> Result<Self, rustls::Error> {
        let provider = Arc::new(ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
            .with_no_client_auth();
        Ok(TcpProber {
            full_test,
            tls: TlsConnector::from(Arc::new(config)),
        })
    }

    async fn resolve(config: &ProxyConfig) -> Result<SocketAddr, ProbeError> {
        let mut addrs = tokio::net::lookup_host((config.hostname.as_str(), config.port))
            .await
            .map_err(|e| ProbeError::Dns(e.to_string()))?;
        addrs
            .next()
            .ok_or_else(|| ProbeError::Dns(format!("no addresses for {}", config.hostname)))
    }

    async fn run(&self, config: &ProxyConfig) -> Result<ProbeSuccess, ProbeError> {
        let addr = Self::resolve(config).await?;
        let started = Instant::now();
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ProbeError::from_io(&e))?;

        if self.full_test && config.wants_tls() {
            let server_name = ServerName::try_from(config.tls_server_name().to_string())
                .map_err(|e| ProbeError::Tls(e.to_string()))?;
            self.tls
                .connect(server_name, stream)
                .await
                .map_err(|e| ProbeError::Tls(e.to_string()))?;
        }

        Ok(ProbeSuccess {
            latency: started.elapsed(),
            address: Some(addr.ip()),
        })
    }
}

impl Prober for TcpProber {
    fn probe(
        &self,
        config: &ProxyConfig,
    ) -> impl Future<Output = Result<ProbeSuccess, ProbeError>> + Send {
        self.run(config)
    }
}

/// Accepts any certificate chain; signatures are still checked so the
/// handshake completes only against a real TLS server.
#[derive(Debug)]
struct AcceptAnyCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProxyType;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_probe_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let prober = TcpProber::new(false).unwrap();
        let config = ProxyConfig::new(ProxyType::Socks5, "127.0.0.1", port);
        let success = prober.probe(&config).await.unwrap();
        assert_eq!(success.address, Some("127.0.0.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_refused_connection() {
        // bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let prober = TcpProber::new(false).unwrap();
        let config = ProxyConfig::new(ProxyType::HTTP, "127.0.0.1", port);
        assert_eq!(prober.probe(&config).await.unwrap_err(), ProbeError::Refused);
    }

    #[tokio::test]
    async fn test_tls_failure_against_plain_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });

        let prober = TcpProber::new(true).unwrap();
        let mut config = ProxyConfig::new(ProxyType::Trojan, "127.0.0.1", port);
        config.set_param("password", "pw");
        let err = prober.probe(&config).await.unwrap_err();
        assert!(matches!(err, ProbeError::Tls(_)));
    }
}
