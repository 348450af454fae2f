//! HTTP-01 engine (spec §4.2): fetch `/.well-known/acme-challenge/<token>`,
//! follow redirects under policy, dual-stack dial with fallback on
//! dial-only errors.
//!
//! Each hop builds a fresh `reqwest::Client` pinned to the exact
//! `(hostname, ip, port)` triple it dialed (the "preresolved dialer"
//! pattern from spec §9) via `ClientBuilder::resolve`, so a redirect can
//! never get DNS-rebound out from under the audit trail.

use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;

use futures::StreamExt;
use url::Url;

use crate::addr::ResolvedAddresses;
use crate::config::VaConfig;
use crate::dns::Resolver;
use crate::error::Problem;
use crate::types::ValidationRecord;

const WELL_KNOWN_PATH_PREFIX: &str = "/.well-known/acme-challenge/";
const REDIRECT_STATUSES: [u16; 4] = [301, 302, 307, 308];
const MAX_REDIRECTS: u32 = 10;
const MAX_PATH_LEN: usize = 2000;
const BODY_CAP_BYTES: usize = 128;
const DIAL_HARD_CAP: Duration = Duration::from_secs(10);

/// Runs HTTP-01 validation for `identifier`, returning the audit trail and
/// the terminal result.
pub async fn validate(
    resolver: &dyn Resolver,
    config: &VaConfig,
    identifier: &str,
    token: &str,
    expected_key_authorization: &str,
) -> (Vec<ValidationRecord>, Result<(), Problem>) {
    let mut records = Vec::new();
    let mut visited = HashSet::new();
    let mut url = format!(
        "http://{identifier}{WELL_KNOWN_PATH_PREFIX}{token}"
    )
    .parse::<Url>()
    .expect("identifier + token always form a valid URL");
    visited.insert(url.to_string());

    for redirect_count in 0..=MAX_REDIRECTS {
        let hop = fetch_one_hop(resolver, config, &url).await;
        let (record, outcome) = match hop {
            Ok((record, outcome)) => (record, outcome),
            Err(problem) => return (records, Err(problem)),
        };
        records.push(record);

        match outcome {
            HopOutcome::Body { status: 200, body } => {
                let trimmed = body.trim_end();
                return if trimmed == expected_key_authorization {
                    (records, Ok(()))
                } else {
                    (
                        records,
                        Err(Problem::unauthorized(format!(
                            "Incorrect HTTP-01 response body: expected {expected_key_authorization:?}, got {trimmed:?}"
                        ))),
                    )
                };
            }
            HopOutcome::Oversize => {
                return (
                    records,
                    Err(Problem::unauthorized(format!(
                        "HTTP-01 response body exceeded {BODY_CAP_BYTES} bytes"
                    ))),
                );
            }
            HopOutcome::Body { status, .. } => {
                return (
                    records,
                    Err(Problem::unauthorized(format!(
                        "unexpected HTTP-01 response status {status}"
                    ))),
                );
            }
            HopOutcome::Redirect { location } => {
                if redirect_count == MAX_REDIRECTS {
                    return (
                        records,
                        Err(Problem::connection("too many redirects")),
                    );
                }
                match resolve_redirect(config, &url, &location, &visited) {
                    Ok(next) => {
                        visited.insert(next.to_string());
                        url = next;
                    }
                    Err(problem) => return (records, Err(problem)),
                }
            }
        }
    }

    (records, Err(Problem::connection("too many redirects")))
}

enum HopOutcome {
    Body { status: u16, body: String },
    Oversize,
    Redirect { location: String },
}

async fn fetch_one_hop(
    resolver: &dyn Resolver,
    config: &VaConfig,
    url: &Url,
) -> Result<(ValidationRecord, HopOutcome), Problem> {
    let host = url
        .host_str()
        .ok_or_else(|| Problem::malformed("URL has no host"))?
        .to_string();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| Problem::malformed("URL has no resolvable port"))?;

    let resolved = ResolvedAddresses::partition(resolver.lookup_host(&host).await?);
    let candidates = resolved.preference_order();
    if candidates.is_empty() {
        return Err(Problem::dns(format!("no addresses found for {host}")).with_url(Some(url.as_str())));
    }

    let mut record = ValidationRecord {
        hostname: host.clone(),
        port: Some(port),
        url: Some(url.to_string()),
        addresses_resolved: resolved.all(),
        addresses_tried: Vec::new(),
        address_used: None,
    };

    let mut last_dial_err: Option<Problem> = None;
    for addr in &candidates {
        record.addresses_tried.push(*addr);
        match dial_and_get(config, &host, *addr, port, url).await {
            Ok(outcome) => {
                record.address_used = Some(*addr);
                return Ok((record, outcome));
            }
            Err(DialError::Dial(problem)) => {
                // only fall back to the remaining family on a real dial error
                last_dial_err = Some(problem);
            }
            Err(DialError::Fatal(problem)) => return Err(problem),
        }
    }

    Err(last_dial_err.unwrap_or_else(|| Problem::connection("dial failed")))
}

enum DialError {
    /// A dial-only failure: eligible for address-family fallback.
    Dial(Problem),
    /// A read/write failure once connected: fatal for this attempt.
    Fatal(Problem),
}

async fn dial_and_get(
    config: &VaConfig,
    host: &str,
    addr: IpAddr,
    port: u16,
    url: &Url,
) -> Result<HopOutcome, DialError> {
    let socket_addr = std::net::SocketAddr::new(addr, port);
    let client = reqwest::Client::builder()
        .resolve(host, socket_addr)
        .redirect(reqwest::redirect::Policy::none())
        .danger_accept_invalid_certs(true)
        .connect_timeout(DIAL_HARD_CAP)
        .user_agent(config.user_agent())
        .build()
        .map_err(|err| DialError::Fatal(Problem::server_internal(format!("client build failed: {err}"))))?;

    let response = match client
        .get(url.clone())
        .header(reqwest::header::ACCEPT, "*/*")
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => return Err(classify_send_error(&err, socket_addr, host, url).await),
    };

    let status = response.status().as_u16();

    if REDIRECT_STATUSES.contains(&status) {
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                DialError::Fatal(Problem::connection("redirect response missing Location"))
            })?
            .to_string();
        return Ok(HopOutcome::Redirect { location });
    }

    let mut stream = response.bytes_stream();
    let mut body = Vec::with_capacity(BODY_CAP_BYTES + 1);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| DialError::Fatal(classify_body_error(&err, url)))?;
        body.extend_from_slice(&chunk);
        if body.len() >= BODY_CAP_BYTES {
            return Ok(HopOutcome::Oversize);
        }
    }

    let body = String::from_utf8_lossy(&body).into_owned();
    Ok(HopOutcome::Body { status, body })
}

/// Classifies a failed `send()`. Connect/timeout failures are dial-only
/// (eligible for address-family fallback); anything else already reached a
/// peer that responded with *something* other than valid HTTP/1.1, so a
/// best-effort raw probe recovers what it actually sent, for §7's
/// "HTTP/2-on-80" classification.
async fn classify_send_error(
    err: &reqwest::Error,
    socket_addr: std::net::SocketAddr,
    host: &str,
    url: &Url,
) -> DialError {
    if err.is_connect() || err.is_timeout() {
        return DialError::Dial(
            Problem::connection(format!("dial failed: {err}")).with_url(Some(url.as_str())),
        );
    }
    let peeked = probe_peer_prefix(socket_addr, host, url).await;
    DialError::Fatal(
        crate::error::classify_peer_prefix(&peeked, Some(url.as_str()))
            .unwrap_or_else(|| Problem::connection(format!("request failed: {err}")).with_url(Some(url.as_str()))),
    )
}

const PEER_PROBE_CAP: usize = 16;
const PEER_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Opens its own short-lived raw connection and sends a minimal request,
/// purely to see the first bytes a misbehaving peer sends back. Never
/// itself fatal: any failure just yields an empty prefix, leaving the
/// caller's original `reqwest` error as the classification.
async fn probe_peer_prefix(socket_addr: std::net::SocketAddr, host: &str, url: &Url) -> Vec<u8> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let Ok(Ok(mut stream)) =
        tokio::time::timeout(PEER_PROBE_TIMEOUT, tokio::net::TcpStream::connect(socket_addr)).await
    else {
        return Vec::new();
    };

    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n",
        path = url.path(),
    );
    if tokio::time::timeout(PEER_PROBE_TIMEOUT, stream.write_all(request.as_bytes()))
        .await
        .is_err()
    {
        return Vec::new();
    }

    let mut buf = [0u8; PEER_PROBE_CAP];
    match tokio::time::timeout(PEER_PROBE_TIMEOUT, stream.read(&mut buf)).await {
        Ok(Ok(n)) => buf[..n].to_vec(),
        _ => Vec::new(),
    }
}

fn classify_body_error(err: &reqwest::Error, url: &Url) -> Problem {
    Problem::connection(format!("body read failed: {err}")).with_url(Some(url.as_str()))
}

/// Validates and resolves a redirect target per spec §4.2.
fn resolve_redirect(
    config: &VaConfig,
    current: &Url,
    location: &str,
    visited: &HashSet<String>,
) -> Result<Url, Problem> {
    let next = current
        .join(location)
        .map_err(|err| Problem::malformed(format!("invalid redirect location: {err}")))?;

    if next.scheme() != "http" && next.scheme() != "https" {
        return Err(Problem::malformed(format!(
            "redirect to unsupported scheme {:?}",
            next.scheme()
        )));
    }

    let host = next
        .host_str()
        .ok_or_else(|| Problem::malformed("redirect URL has no host"))?;

    if host.parse::<IpAddr>().is_ok() {
        return Err(Problem::connection(
            "Only domain names are supported, redirect target is an IP address",
        ));
    }

    if host.ends_with(".well-known") {
        return Err(Problem::connection(format!(
            "redirect host {host:?} ends in \".well-known\" (likely a missing path separator)"
        )));
    }

    if psl::domain(host.as_bytes()).is_none() {
        return Err(Problem::malformed(format!(
            "redirect host {host:?} does not end in a public-suffix-recognized TLD"
        )));
    }

    if let Some(explicit_port) = next.port()
        && !config.allowed_redirect_ports().contains(&explicit_port)
    {
        return Err(Problem::malformed(format!(
            "redirect to disallowed port {explicit_port}"
        )));
    }

    if visited.contains(next.as_str()) {
        return Err(Problem::connection("Redirect loop detected"));
    }

    if next.path().len() > MAX_PATH_LEN {
        return Err(Problem::malformed("redirect path exceeds 2000 bytes"));
    }

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> VaConfig {
        VaConfig {
            issuer_domain: "ca.example".to_string(),
            account_uri_prefixes: Vec::new(),
            http_port: 80,
            https_port: 443,
            tls_port: 443,
            max_remote_failures: 0,
            user_agent: None,
            features: crate::config::FeatureFlags::default(),
        }
    }

    #[test]
    fn redirect_to_ip_is_rejected() {
        let cfg = test_config();
        let current = "http://example.com/.well-known/acme-challenge/tok".parse().unwrap();
        let visited = HashSet::new();
        let err = resolve_redirect(&cfg, &current, "http://127.0.0.1/x", &visited).unwrap_err();
        assert!(err.detail.contains("IP address"));
    }

    #[test]
    fn redirect_loop_is_detected() {
        let cfg = test_config();
        let current: Url = "http://a.example.com/x".parse().unwrap();
        let mut visited = HashSet::new();
        visited.insert("http://b.example.com/y".to_string());
        let err = resolve_redirect(&cfg, &current, "http://b.example.com/y", &visited).unwrap_err();
        assert!(err.detail.contains("Redirect loop"));
    }

    #[test]
    fn well_known_host_suffix_is_flagged() {
        let cfg = test_config();
        let current: Url = "http://a.example.com/x".parse().unwrap();
        let visited = HashSet::new();
        let err =
            resolve_redirect(&cfg, &current, "http://example.well-known/x", &visited).unwrap_err();
        assert!(err.detail.contains("well-known"));
    }

    #[test]
    fn disallowed_port_is_rejected() {
        let cfg = test_config();
        let current: Url = "http://a.example.com/x".parse().unwrap();
        let visited = HashSet::new();
        let err =
            resolve_redirect(&cfg, &current, "http://b.example.com:8080/x", &visited).unwrap_err();
        assert!(err.detail.contains("disallowed port"));
    }
}
