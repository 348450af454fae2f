//! Core data model (spec §3): identifiers, challenges, validation records,
//! and CAA rrsets. Kept free of I/O — every invariant here is a pure check.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use crate::error::Problem;

pub const TOKEN_LEN_BYTES: usize = 32;
pub const TOKEN_LEN_CHARS: usize = 43;
pub const THUMBPRINT_LEN_CHARS: usize = 43;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    pub r#type: String,
    pub value: String,
}

impl Identifier {
    #[must_use]
    pub fn dns(value: impl Into<String>) -> Self {
        Self {
            r#type: "dns".to_string(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.value.starts_with("*.")
    }

    /// The name to actually dial/query: the wildcard prefix stripped off.
    ///
    /// # Errors
    /// Returns `malformed` if `type` is not `dns`.
    pub fn validated_name(&self) -> Result<&str, Problem> {
        if self.r#type != "dns" {
            return Err(Problem::malformed(format!(
                "identifier type {:?} is not supported, only \"dns\"",
                self.r#type
            )));
        }
        Ok(self.value.strip_prefix("*.").unwrap_or(&self.value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChallengeType {
    Http01,
    Dns01,
    TlsAlpn01,
}

impl ChallengeType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http01 => "http-01",
            Self::Dns01 => "dns-01",
            Self::TlsAlpn01 => "tls-alpn-01",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub r#type: ChallengeType,
    pub status: ChallengeStatus,
    pub token: String,
    pub provided_key_authorization: Option<String>,
    #[serde(default)]
    pub validation_records: Vec<ValidationRecord>,
}

impl Challenge {
    #[must_use]
    pub fn new(r#type: ChallengeType, token: String) -> Self {
        Self {
            r#type,
            status: ChallengeStatus::Pending,
            token,
            provided_key_authorization: None,
            validation_records: Vec::new(),
        }
    }

    /// Validates a token is exactly 43 base64url characters decoding to 32 raw bytes.
    #[must_use]
    pub fn token_well_formed(token: &str) -> bool {
        token.len() == TOKEN_LEN_CHARS
            && URL_SAFE_NO_PAD
                .decode(token)
                .is_ok_and(|bytes| bytes.len() == TOKEN_LEN_BYTES)
    }

    /// Property 3: `consistency_for_client_offer`.
    ///
    /// # Errors
    /// `malformed` if the challenge is not pending or the token is malformed.
    pub fn consistency_for_client_offer(&self) -> Result<(), Problem> {
        if self.status != ChallengeStatus::Pending {
            return Err(Problem::malformed(format!(
                "challenge is not pending (status={:?})",
                self.status
            )));
        }
        if !Self::token_well_formed(&self.token) {
            return Err(Problem::malformed("challenge token is not well-formed"));
        }
        Ok(())
    }

    /// Property 4: `consistency_for_validation`.
    ///
    /// # Errors
    /// `malformed` if the client offer is inconsistent, or
    /// `provided_key_authorization` doesn't share the challenge's token prefix
    /// and a 43-char base64url suffix.
    pub fn consistency_for_validation(&self) -> Result<&str, Problem> {
        self.consistency_for_client_offer()?;
        let provided = self.provided_key_authorization.as_deref().ok_or_else(|| {
            Problem::malformed("challenge is missing provided_key_authorization")
        })?;
        let (prefix, suffix) = provided
            .split_once('.')
            .ok_or_else(|| Problem::malformed("provided_key_authorization is not token.thumbprint"))?;
        if prefix != self.token {
            return Err(Problem::malformed(
                "provided_key_authorization does not share the challenge token",
            ));
        }
        if suffix.len() != THUMBPRINT_LEN_CHARS || URL_SAFE_NO_PAD.decode(suffix).is_err() {
            return Err(Problem::malformed(
                "provided_key_authorization thumbprint is not well-formed",
            ));
        }
        Ok(provided)
    }
}

/// The audit trail of one network attempt (spec §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub hostname: String,
    pub port: Option<u16>,
    pub url: Option<String>,
    #[serde(default)]
    pub addresses_resolved: Vec<std::net::IpAddr>,
    #[serde(default)]
    pub addresses_tried: Vec<std::net::IpAddr>,
    pub address_used: Option<std::net::IpAddr>,
}

impl ValidationRecord {
    #[must_use]
    pub fn dns01(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ..Default::default()
        }
    }

    /// "Sane" per spec §3: hostname+port set for HTTP-01/TLS-ALPN-01, hostname only for DNS-01.
    #[must_use]
    pub fn is_sane_for(&self, r#type: ChallengeType) -> bool {
        if self.hostname.is_empty() {
            return false;
        }
        match r#type {
            ChallengeType::Http01 | ChallengeType::TlsAlpn01 => self.port.is_some(),
            ChallengeType::Dns01 => true,
        }
    }
}

/// One parsed CAA resource record (RFC 8659 §4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaaRecord {
    pub flags: u8,
    pub tag: String,
    pub issuer_domain: String,
    pub parameters: BTreeMap<String, String>,
}

impl CaaRecord {
    /// Spec §4.5: bit 7 is the standard critical flag; bit 0 is tolerated as
    /// a commonly-misimplemented alias for it (deliberate compatibility
    /// concession, see DESIGN.md).
    #[must_use]
    pub fn is_critical(&self) -> bool {
        self.flags & 0b1000_0000 != 0 || self.flags & 0b0000_0001 != 0
    }

    #[must_use]
    pub fn is_known_tag(&self) -> bool {
        matches!(self.tag.as_str(), "issue" | "issuewild" | "iodef")
    }
}

/// The `RRset` for one DNS name, partitioned by tag (spec §3).
#[derive(Debug, Clone, Default)]
pub struct CaaSet {
    pub issue: Vec<CaaRecord>,
    pub issuewild: Vec<CaaRecord>,
    pub iodef: Vec<CaaRecord>,
    pub unknown: Vec<CaaRecord>,
}

impl CaaSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.issue.is_empty()
            && self.issuewild.is_empty()
            && self.iodef.is_empty()
            && self.unknown.is_empty()
    }

    pub fn all(&self) -> impl Iterator<Item = &CaaRecord> {
        self.issue
            .iter()
            .chain(self.issuewild.iter())
            .chain(self.iodef.iter())
            .chain(self.unknown.iter())
    }
}
