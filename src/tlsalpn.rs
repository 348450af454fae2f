//! TLS-ALPN-01 engine (spec §4.3): raw TLS handshake advertising ALPN
//! `acme-tls/1`, then a battery of checks against the prover's self-signed
//! certificate.
//!
//! The handshake itself is grounded on the ACME TLS-ALPN wire constants used
//! by `n0-computer-tokio-rustls-acme`'s `acme.rs` (`ACME_TLS_ALPN_NAME`,
//! `acmeIdentifier` OID). Certificate inspection is new code built on
//! `x509-parser`, since nothing in the retrieval pack parses X.509 directly;
//! the verifier that accepts the prover's untrusted self-signed cert is
//! rustls's own `danger::ServerCertVerifier` extension point.

use std::net::IpAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use x509_parser::asn1_rs::oid;
use x509_parser::extensions::GeneralName;
use x509_parser::oid_registry::Oid;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::addr::ResolvedAddresses;
use crate::config::VaConfig;
use crate::dns::Resolver;
use crate::error::Problem;
use crate::types::ValidationRecord;

pub const ACME_TLS_ALPN_NAME: &[u8] = b"acme-tls/1";
const ACME_IDENTIFIER_OID: Oid<'static> = oid!(1.3.6.1.5.5.7.1.31);
const ACME_IDENTIFIER_OBSOLETE_OID: Oid<'static> = oid!(1.3.6.1.5.5.7.1.30.1);
const SUBJECT_ALT_NAME_OID: Oid<'static> = oid!(2.5.29.17);
const DIAL_HARD_CAP: Duration = Duration::from_secs(10);
/// Bytes of the peer's raw response captured for [`crate::error::classify_peer_prefix`]
/// (enough to see either a `"HTTP/"` status line or a 9-byte HTTP/2 frame header).
const PEEK_CAP: usize = 16;

/// Runs TLS-ALPN-01 validation for `identifier` (spec §4.3).
pub async fn validate(
    resolver: &dyn Resolver,
    config: &VaConfig,
    identifier: &str,
    expected_key_authorization: &str,
) -> (Vec<ValidationRecord>, Result<(), Problem>) {
    let resolved = match resolver.lookup_host(identifier).await {
        Ok(addrs) => ResolvedAddresses::partition(addrs),
        Err(problem) => return (Vec::new(), Err(problem)),
    };
    let candidates = resolved.preference_order();
    if candidates.is_empty() {
        return (
            Vec::new(),
            Err(Problem::dns(format!("no addresses found for {identifier}"))),
        );
    }

    let mut record = ValidationRecord {
        hostname: identifier.to_string(),
        port: Some(config.tls_port),
        url: None,
        addresses_resolved: resolved.all(),
        addresses_tried: Vec::new(),
        address_used: None,
    };

    let mut last_err: Option<Problem> = None;
    for addr in &candidates {
        record.addresses_tried.push(*addr);
        match handshake_and_check(
            identifier,
            config.tls_port,
            *addr,
            expected_key_authorization,
        )
        .await
        {
            Ok(()) => {
                record.address_used = Some(*addr);
                return (vec![record], Ok(()));
            }
            Err(HandshakeError::Dial(problem)) => {
                last_err = Some(problem);
            }
            Err(HandshakeError::Fatal(problem)) => return (vec![record], Err(problem)),
        }
    }

    (
        vec![record],
        Err(last_err.unwrap_or_else(|| Problem::connection("dial failed"))),
    )
}

enum HandshakeError {
    /// A dial-only failure: eligible for address-family fallback.
    Dial(Problem),
    /// A handshake or certificate failure: fatal for this attempt.
    Fatal(Problem),
}

async fn handshake_and_check(
    identifier: &str,
    port: u16,
    addr: IpAddr,
    expected_key_authorization: &str,
) -> Result<(), HandshakeError> {
    let socket_addr = std::net::SocketAddr::new(addr, port);
    let tcp = tokio::time::timeout(DIAL_HARD_CAP, TcpStream::connect(socket_addr))
        .await
        .map_err(|_| HandshakeError::Dial(Problem::connection("connect timeout")))?
        .map_err(|err| HandshakeError::Dial(crate::error::classify_io_error(&err, None)))?;

    let peeked = Arc::new(Mutex::new(Vec::new()));
    let tcp = PeekingStream {
        inner: tcp,
        captured: peeked.clone(),
    };

    let captured = Arc::new(CapturedCert::default());
    let verifier = Arc::new(AcceptSelfSignedVerifier {
        captured: captured.clone(),
    });
    let mut client_config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    client_config.alpn_protocols = vec![ACME_TLS_ALPN_NAME.to_vec()];

    let connector = tokio_rustls::TlsConnector::from(Arc::new(client_config));
    let server_name = ServerName::try_from(identifier.to_string())
        .map_err(|_| HandshakeError::Fatal(Problem::malformed("identifier is not a valid TLS server name")))?;

    let mut tls = connector.connect(server_name, tcp).await.map_err(|err| {
        let prefix = peeked.lock().expect("lock poisoned").clone();
        HandshakeError::Fatal(
            crate::error::classify_peer_prefix(&prefix, None)
                .unwrap_or_else(|| Problem::tls(format!("TLS handshake failed: {err}"))),
        )
    })?;

    let negotiated_alpn = tls.get_ref().1.alpn_protocol().map(<[u8]>::to_vec);
    let _ = tls.shutdown().await;

    if negotiated_alpn.as_deref() != Some(ACME_TLS_ALPN_NAME) {
        return Err(HandshakeError::Fatal(Problem::tls(
            "peer did not negotiate the acme-tls/1 ALPN protocol",
        )));
    }

    let leaf = captured
        .der
        .lock()
        .expect("lock poisoned")
        .clone()
        .ok_or_else(|| HandshakeError::Fatal(Problem::tls("peer presented no certificate")))?;

    check_certificate(&leaf, identifier, expected_key_authorization)
        .map_err(HandshakeError::Fatal)?;
    Ok(())
}

#[derive(Debug, Default)]
struct CapturedCert {
    der: std::sync::Mutex<Option<Vec<u8>>>,
}

/// Wraps the raw socket and records the first bytes read from it,
/// independent of whatever `rustls` makes of them. A peer that responds with
/// plaintext instead of a TLS record never gets past `rustls`'s own framing,
/// so this is the only way to recover what it actually said for
/// [`crate::error::classify_peer_prefix`].
struct PeekingStream<S> {
    inner: S,
    captured: Arc<Mutex<Vec<u8>>>,
}

impl<S: AsyncRead + Unpin> AsyncRead for PeekingStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if poll.is_ready() {
            let mut captured = this.captured.lock().expect("lock poisoned");
            if captured.len() < PEEK_CAP {
                let fresh = &buf.filled()[before..];
                let take = fresh.len().min(PEEK_CAP - captured.len());
                captured.extend_from_slice(&fresh[..take]);
            }
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PeekingStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Accepts any self-signed leaf certificate without chain validation: the
/// prover's certificate is untrusted by definition (spec §4.2/§4.3), so the
/// VA validates its *content* itself rather than its provenance.
#[derive(Debug)]
struct AcceptSelfSignedVerifier {
    captured: Arc<CapturedCert>,
}

impl ServerCertVerifier for AcceptSelfSignedVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        *self.captured.der.lock().expect("lock poisoned") = Some(end_entity.to_vec());
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
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
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
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Runs the full certificate battery from spec §4.3. All four checks must
/// hold, else *unauthorized*.
fn check_certificate(
    der: &[u8],
    identifier: &str,
    expected_key_authorization: &str,
) -> Result<(), Problem> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|err| Problem::unauthorized(format!("invalid leaf certificate: {err}")))?;

    check_self_signed(&cert)?;
    check_extension_shape(&cert)?;
    check_san(&cert, identifier)?;
    check_acme_identifier(&cert, expected_key_authorization)?;
    Ok(())
}

fn check_self_signed(cert: &X509Certificate<'_>) -> Result<(), Problem> {
    if cert.subject() != cert.issuer() {
        return Err(Problem::unauthorized(
            "leaf certificate subject does not equal issuer",
        ));
    }
    cert.verify_signature(None)
        .map_err(|_| Problem::unauthorized("leaf certificate is not validly self-signed"))
}

fn check_extension_shape(cert: &X509Certificate<'_>) -> Result<(), Problem> {
    let mut san_count = 0;
    let mut acme_id_count = 0;
    for ext in cert.extensions() {
        if ext.oid == ACME_IDENTIFIER_OBSOLETE_OID {
            return Err(Problem::unauthorized(
                "leaf certificate uses the obsolete acmeIdentifier OID",
            ));
        }
        if ext.oid == SUBJECT_ALT_NAME_OID {
            san_count += 1;
        } else if ext.oid == ACME_IDENTIFIER_OID {
            acme_id_count += 1;
        }
    }
    if san_count != 1 {
        return Err(Problem::unauthorized(format!(
            "leaf certificate has {san_count} subjectAltName extensions, expected 1"
        )));
    }
    if acme_id_count != 1 {
        return Err(Problem::unauthorized(format!(
            "leaf certificate has {acme_id_count} acmeIdentifier extensions, expected 1"
        )));
    }
    Ok(())
}

fn check_san(cert: &X509Certificate<'_>, identifier: &str) -> Result<(), Problem> {
    let san = cert
        .subject_alternative_name()
        .map_err(|_| Problem::unauthorized("leaf certificate subjectAltName is malformed"))?
        .ok_or_else(|| Problem::unauthorized("leaf certificate has no subjectAltName"))?;

    let names: Vec<&str> = san
        .value
        .general_names
        .iter()
        .filter_map(|name| match name {
            GeneralName::DNSName(dns) => Some(*dns),
            _ => None,
        })
        .collect();

    if san.value.general_names.len() != 1 || names.len() != 1 {
        return Err(Problem::unauthorized(
            "leaf certificate subjectAltName must contain exactly one dNSName and nothing else",
        ));
    }

    if !names[0].eq_ignore_ascii_case(identifier) {
        return Err(Problem::unauthorized(format!(
            "leaf certificate SAN {:?} does not match identifier {identifier:?}",
            names[0]
        )));
    }
    Ok(())
}

fn check_acme_identifier(
    cert: &X509Certificate<'_>,
    expected_key_authorization: &str,
) -> Result<(), Problem> {
    let ext = cert
        .extensions()
        .iter()
        .find(|ext| ext.oid == ACME_IDENTIFIER_OID)
        .ok_or_else(|| Problem::unauthorized("leaf certificate has no acmeIdentifier extension"))?;

    if !ext.critical {
        return Err(Problem::unauthorized(
            "leaf certificate acmeIdentifier extension is not marked critical",
        ));
    }
    let digest = unwrap_octet_string(ext.value).ok_or_else(|| {
        Problem::unauthorized("leaf certificate acmeIdentifier value is not a 32-byte OCTET STRING")
    })?;

    let expected = crate::keyauth::key_authorization_digest(expected_key_authorization);
    if ring::constant_time::verify_slices_are_equal(digest, &expected).is_err() {
        return Err(Problem::unauthorized(
            "leaf certificate acmeIdentifier digest does not match the expected key authorization",
        ));
    }
    Ok(())
}

/// Manually unwraps a DER `OCTET STRING` of exactly 32 bytes from an
/// extension's raw `extnValue` content (spec §4.3): tag `0x04`, length `32`,
/// then the 32 payload bytes.
fn unwrap_octet_string(value: &[u8]) -> Option<&[u8]> {
    if value.len() == 34 && value[0] == 0x04 && value[1] == 32 {
        Some(&value[2..34])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn octet_string_unwrap_accepts_exact_32_bytes() {
        let mut value = vec![0x04, 32];
        value.extend_from_slice(&[7u8; 32]);
        assert_eq!(unwrap_octet_string(&value), Some([7u8; 32].as_slice()));
    }

    #[test]
    fn octet_string_unwrap_rejects_wrong_length() {
        let mut value = vec![0x04, 16];
        value.extend_from_slice(&[7u8; 16]);
        assert_eq!(unwrap_octet_string(&value), None);
    }

    #[test]
    fn octet_string_unwrap_rejects_wrong_tag() {
        let mut value = vec![0x0C, 32];
        value.extend_from_slice(&[7u8; 32]);
        assert_eq!(unwrap_octet_string(&value), None);
    }
}
