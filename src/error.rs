//! The closed validation-problem taxonomy (spec §7).
//!
//! Every failure path in the VA core terminates in a [`Problem`]. Variants
//! carry their own context (mirroring the "tagged sum type" design note);
//! no downcasting is needed anywhere above this module.

use std::net::IpAddr;

use thiserror::Error;

/// The fixed set of problem kinds the VA can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    Malformed,
    Unauthorized,
    Connection,
    Dns,
    Tls,
    Caa,
    ServerInternal,
}

impl ProblemKind {
    /// HTTP status a caller embedding this as an RPC-style response should surface.
    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            Self::Malformed => 400,
            Self::Unauthorized => 403,
            Self::Connection | Self::Dns | Self::Tls | Self::Caa => 502,
            Self::ServerInternal => 500,
        }
    }
}

/// A single validation failure, carrying a UTF-8-sanitized detail message.
#[derive(Debug, Clone, Error, serde::Serialize)]
#[error("{kind:?}: {detail}")]
pub struct Problem {
    pub kind: ProblemKind,
    pub detail: String,
}

impl Problem {
    #[must_use]
    pub fn new(kind: ProblemKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: sanitize_detail(&detail.into()),
        }
    }

    #[must_use]
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::new(ProblemKind::Malformed, detail)
    }

    #[must_use]
    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new(ProblemKind::Unauthorized, detail)
    }

    #[must_use]
    pub fn connection(detail: impl Into<String>) -> Self {
        Self::new(ProblemKind::Connection, detail)
    }

    #[must_use]
    pub fn dns(detail: impl Into<String>) -> Self {
        Self::new(ProblemKind::Dns, detail)
    }

    #[must_use]
    pub fn tls(detail: impl Into<String>) -> Self {
        Self::new(ProblemKind::Tls, detail)
    }

    #[must_use]
    pub fn caa(detail: impl Into<String>) -> Self {
        Self::new(ProblemKind::Caa, detail)
    }

    #[must_use]
    pub fn server_internal(detail: impl Into<String>) -> Self {
        Self::new(ProblemKind::ServerInternal, detail)
    }

    /// Decorates the detail with the remote IP that was dialed, if known.
    #[must_use]
    pub fn with_remote_ip(mut self, ip: Option<IpAddr>) -> Self {
        if let Some(ip) = ip {
            self.detail = sanitize_detail(&format!("{} (remote {ip})", self.detail));
        }
        self
    }

    /// Decorates the detail with the URL that produced the failure, if known.
    #[must_use]
    pub fn with_url(mut self, url: Option<&str>) -> Self {
        if let Some(url) = url {
            self.detail = sanitize_detail(&format!("{} (url {url})", self.detail));
        }
        self
    }
}

/// Replaces invalid UTF-8 byte sequences with U+FFFD, matching §3's
/// `ProblemDetails.detail` sanitization rule. `detail` is always a Rust
/// `String` internally (hence already valid UTF-8); this function exists so
/// the sanitization step is applied exactly once, at a single named call
/// site, instead of being implicit.
#[must_use]
pub fn sanitize_detail(detail: &str) -> String {
    String::from_utf8_lossy(detail.as_bytes()).into_owned()
}

/// Classifies a low-level dial error into a [`Problem`], per §7's
/// propagation policy: OS-level dial errors become `connection`. Use
/// [`classify_peer_prefix`] at a handshake/send boundary to additionally
/// catch a peer that responded with the wrong protocol entirely.
#[must_use]
pub fn classify_io_error(err: &std::io::Error, url: Option<&str>) -> Problem {
    use std::io::ErrorKind;
    let detail = match err.kind() {
        ErrorKind::TimedOut => "connect timeout".to_string(),
        ErrorKind::ConnectionRefused => "connection refused".to_string(),
        ErrorKind::ConnectionReset => "connection reset".to_string(),
        ErrorKind::NotFound | ErrorKind::AddrNotAvailable => "host unreachable".to_string(),
        _ => format!("dial error: {err}"),
    };
    Problem::connection(detail).with_url(url)
}

/// Classifies the first bytes a peer sent back at a TLS handshake or HTTP
/// send boundary, per §7's propagation policy: a TLS record header
/// containing `"HTTP/"` means the peer speaks HTTP, not TLS (`malformed`);
/// an HTTP/2 SETTINGS frame arriving where HTTP/1.1 was expected means the
/// peer needs an ALPN/h2c upgrade it wasn't given (`connection`,
/// "HTTP/2-on-80"). Returns `None` when `peeked` matches neither pattern, so
/// the caller falls back to its own classification of the underlying error.
#[must_use]
pub fn classify_peer_prefix(peeked: &[u8], url: Option<&str>) -> Option<Problem> {
    if peeked.starts_with(b"HTTP/") {
        return Some(
            Problem::malformed("peer speaks HTTP, not TLS (record header starts with \"HTTP/\")")
                .with_url(url),
        );
    }
    if is_http2_settings_frame(peeked) {
        return Some(
            Problem::connection("peer sent an HTTP/2 SETTINGS frame (HTTP/2-on-80)").with_url(url),
        );
    }
    None
}

/// A SETTINGS frame (RFC 9113 §6.5) opening an HTTP/2 connection without a
/// prior protocol upgrade: frame type `0x04`, no flags, and stream id 0 on
/// the very first frame header.
fn is_http2_settings_frame(peeked: &[u8]) -> bool {
    peeked.len() >= 9 && peeked[3] == 0x04 && peeked[4] == 0x00 && peeked[5..9] == [0, 0, 0, 0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_response_prefix_is_malformed() {
        let problem = classify_peer_prefix(b"HTTP/1.1 400 Bad Request\r\n", None).unwrap();
        assert_eq!(problem.kind, ProblemKind::Malformed);
    }

    #[test]
    fn http2_settings_frame_is_connection() {
        let frame = [0, 0, 0, 0x04, 0x00, 0, 0, 0, 0];
        let problem = classify_peer_prefix(&frame, None).unwrap();
        assert_eq!(problem.kind, ProblemKind::Connection);
    }

    #[test]
    fn unrecognized_prefix_is_not_classified() {
        assert!(classify_peer_prefix(b"\x16\x03\x01", None).is_none());
        assert!(classify_peer_prefix(b"", None).is_none());
    }
}
