//! End-to-end TLS-ALPN-01 scenario (spec §8 S4): a raw `rustls` server
//! presents a self-signed leaf advertising the *obsolete* acmeIdentifier OID
//! (`1.3.6.1.5.5.7.1.30.1` instead of `…1.31`). The server fixture mirrors
//! the teacher's `tests/acme_trust.rs` TLS test harness.

mod support;

use std::sync::Arc;

use rcgen::{CertificateParams, CustomExtension, KeyPair};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use tokio::io::AsyncWriteExt;

use support::{MockResolver, test_config};
use va_core::config::FeatureFlags;
use va_core::error::ProblemKind;
use va_core::keyauth::key_authorization_digest;
use va_core::tlsalpn::ACME_TLS_ALPN_NAME;

const OBSOLETE_ACME_IDENTIFIER_OID: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 1, 30, 1];

async fn start_tls_server(identifier: &str, digest: [u8; 32]) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut params = CertificateParams::new(vec![identifier.to_string()]).expect("cert params");
    let content = yasna::construct_der(|writer| writer.write_bytes(&digest));
    // Left non-critical: rustls's own `with_single_cert` rejects loading a
    // leaf certificate bearing a critical extension it doesn't understand,
    // and criticality isn't part of what `check_extension_shape` inspects
    // for the obsolete OID.
    let ext = CustomExtension::from_oid_content(OBSOLETE_ACME_IDENTIFIER_OID, content);
    params.custom_extensions = vec![ext];

    let key = KeyPair::generate().expect("key pair");
    let cert = params.self_signed(&key).expect("self signed");
    let cert_der = cert.der().to_vec();
    let key_der = key.serialize_der();

    let mut server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(
            vec![rustls::pki_types::CertificateDer::from(cert_der)],
            rustls::pki_types::PrivateKeyDer::from(rustls::pki_types::PrivatePkcs8KeyDer::from(
                key_der,
            )),
        )
        .expect("tls server config");
    server_config.alpn_protocols = vec![ACME_TLS_ALPN_NAME.to_vec()];

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let acceptor = TlsAcceptor::from(Arc::new(server_config));

    let handle = tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            // Accept the handshake and then drop the stream; the prover
            // never needs to serve any application data for TLS-ALPN-01.
            let _ = acceptor.accept(stream).await;
        }
    });

    (addr, handle)
}

#[tokio::test]
async fn obsolete_acme_identifier_oid_is_rejected() {
    let key_authorization = "token123.thumbprint456";
    let digest = key_authorization_digest(key_authorization);
    let identifier = "tlsalpn-obsolete.example";
    let (addr, handle) = start_tls_server(identifier, digest).await;

    let resolver = MockResolver::default().with_host(identifier, vec![addr.ip()]);
    let mut config = test_config(FeatureFlags::default());
    config.tls_port = addr.port();

    let (_, result) = va_core::tlsalpn::validate(&resolver, &config, identifier, key_authorization).await;
    let err = result.expect_err("obsolete OID must be rejected");
    assert!(err.detail.contains("obsolete"), "unexpected detail: {}", err.detail);

    handle.abort();
}

/// A misconfigured prover that answers the TLS port with a plain HTTP
/// response: spec §7's "TLS record-header containing \"HTTP/\"" rule must
/// classify this as *malformed* "speaks HTTP not TLS", not a generic TLS
/// handshake failure.
#[tokio::test]
async fn peer_speaking_http_on_the_tls_port_is_malformed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let handle = tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let _ = stream
                .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
                .await;
        }
    });

    let identifier = "tlsalpn-speaks-http.example";
    let resolver = MockResolver::default().with_host(identifier, vec![addr.ip()]);
    let mut config = test_config(FeatureFlags::default());
    config.tls_port = addr.port();

    let (_, result) =
        va_core::tlsalpn::validate(&resolver, &config, identifier, "token123.thumbprint456").await;
    let err = result.expect_err("a plaintext HTTP peer must fail TLS-ALPN-01");
    assert_eq!(err.kind, ProblemKind::Malformed);
    assert!(err.detail.contains("HTTP"), "unexpected detail: {}", err.detail);

    handle.abort();
}
