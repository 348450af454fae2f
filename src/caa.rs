//! CAA engine (spec §4.5): parallel ancestor lookup, RFC 8659 §4.2-4.3 value
//! parser, and issuer/account/method matching.

use std::collections::BTreeMap;

use url::Url;

use crate::config::VaConfig;
use crate::dns::{RawCaaRecord, Resolver};
use crate::error::Problem;
use crate::types::{CaaRecord, CaaSet};

/// Parses one CAA record's value per RFC 8659 §4.2-4.3.
///
/// # Errors
/// Names which rule was violated (tag character class, value character
/// class, missing `=`, invalid UTF-8).
pub fn parse_record(flags: u8, tag: &str, raw_value: &[u8]) -> Result<CaaRecord, String> {
    let value = std::str::from_utf8(raw_value)
        .map_err(|_| "CAA value is not valid UTF-8".to_string())?;

    let mut segments = value.split(';');
    let issuer_domain = segments.next().unwrap_or("").trim().to_string();

    let mut parameters = BTreeMap::new();
    for segment in segments {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let (param_tag, param_value) = segment
            .split_once('=')
            .ok_or_else(|| format!("CAA parameter {segment:?} is missing '='"))?;
        if !is_valid_param_tag(param_tag) {
            return Err(format!("CAA parameter tag {param_tag:?} has invalid characters"));
        }
        if !is_valid_param_value(param_value) {
            return Err(format!(
                "CAA parameter value {param_value:?} has invalid characters"
            ));
        }
        parameters.insert(param_tag.to_string(), param_value.to_string());
    }

    Ok(CaaRecord {
        flags,
        tag: tag.to_string(),
        issuer_domain,
        parameters,
    })
}

fn is_valid_param_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn is_valid_param_value(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_graphic() && c != ';')
}

fn partition(records: Vec<CaaRecord>) -> CaaSet {
    let mut set = CaaSet::default();
    for record in records {
        match record.tag.as_str() {
            "issue" => set.issue.push(record),
            "issuewild" => set.issuewild.push(record),
            "iodef" => set.iodef.push(record),
            _ => set.unknown.push(record),
        }
    }
    set
}

/// Splits a hostname into the ancestor chain to walk: `[full, parent, ..., tld]`.
fn ancestor_chain(hostname: &str) -> Vec<String> {
    let labels: Vec<&str> = hostname.split('.').collect();
    (0..labels.len())
        .map(|i| labels[i..].join("."))
        .collect()
}

/// Looks up CAA at every ancestor of `hostname` in parallel and returns the
/// first (deepest) non-empty RRset, parsed. An error at any level aborts
/// with `dns`. Every level empty means "no records": an empty [`CaaSet`].
async fn authoritative_caa_set(
    resolver: &dyn Resolver,
    hostname: &str,
) -> Result<CaaSet, Problem> {
    let chain = ancestor_chain(hostname);
    let lookups = futures::future::join_all(chain.iter().map(|name| resolver.lookup_caa(name)));
    let results: Vec<Result<Vec<RawCaaRecord>, Problem>> = lookups.await;

    for raw_records in results {
        let raw_records = raw_records?;
        if raw_records.is_empty() {
            continue;
        }
        let mut parsed = Vec::with_capacity(raw_records.len());
        for raw in raw_records {
            match parse_record(raw.flags, &raw.tag, &raw.value) {
                Ok(record) => parsed.push(record),
                Err(reason) => return Err(Problem::caa(format!("invalid CAA record: {reason}"))),
            }
        }
        return Ok(partition(parsed));
    }
    Ok(CaaSet::default())
}

/// Selects the tag-specific record list to consult, applying the wildcard
/// rule from RFC 8659 §5.3.
fn applicable_records<'a>(set: &'a CaaSet, is_wildcard: bool) -> &'a [CaaRecord] {
    if is_wildcard && !set.issuewild.is_empty() {
        &set.issuewild
    } else {
        &set.issue
    }
}

fn issuer_matches(record: &CaaRecord, configured_issuer: &str) -> bool {
    !record.issuer_domain.is_empty() && record.issuer_domain == configured_issuer
}

fn account_uri_matches(record: &CaaRecord, account_id: &str, prefixes: &[String]) -> bool {
    let Some(uri) = record.parameters.get("accounturi") else {
        return true;
    };
    let Ok(parsed) = Url::parse(uri) else {
        return false;
    };
    prefixes
        .iter()
        .any(|prefix| parsed.as_str() == format!("{prefix}{account_id}"))
}

fn validation_method_matches(record: &CaaRecord, challenge_type: &str) -> bool {
    let Some(methods) = record.parameters.get("validationmethods") else {
        return true;
    };
    for token in methods.split(',') {
        let token = token.trim();
        if token.is_empty()
            || !token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return false;
        }
        if token == challenge_type {
            return true;
        }
    }
    // every token was well-formed but none recognized/matched
    false
}

fn record_authorizes(
    record: &CaaRecord,
    config: &VaConfig,
    account_id: &str,
    challenge_type: &str,
) -> bool {
    if !issuer_matches(record, &config.issuer_domain) {
        return false;
    }
    if config.features.caa_account_uri
        && !account_uri_matches(record, account_id, &config.account_uri_prefixes)
    {
        return false;
    }
    if config.features.caa_validation_methods
        && !validation_method_matches(record, challenge_type)
    {
        return false;
    }
    true
}

/// Runs the full CAA check for one identifier (spec §4.5).
///
/// # Errors
/// `dns` if any ancestor lookup fails or a record fails to parse, `caa` if
/// a critical-unknown record is present or no `issue`/`issuewild` record
/// authorizes this issuer.
pub async fn check(
    resolver: &dyn Resolver,
    config: &VaConfig,
    hostname: &str,
    is_wildcard: bool,
    account_id: &str,
    challenge_type: &str,
) -> Result<(), Problem> {
    let set = authoritative_caa_set(resolver, hostname).await?;

    for record in set.all() {
        if !record.is_known_tag() && record.is_critical() {
            return Err(Problem::caa(format!(
                "critical CAA record with unknown tag {:?} at {hostname}",
                record.tag
            )));
        }
    }

    let applicable = applicable_records(&set, is_wildcard);
    if applicable.is_empty() {
        return Ok(());
    }

    if applicable
        .iter()
        .any(|record| record_authorizes(record, config, account_id, challenge_type))
    {
        return Ok(());
    }

    Err(Problem::caa(format!(
        "CAA record for {hostname} prohibits issuance by {:?}",
        config.issuer_domain
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_issue_record() {
        let record = parse_record(0, "issue", b"ca.example.com").unwrap();
        assert_eq!(record.issuer_domain, "ca.example.com");
        assert!(record.parameters.is_empty());
    }

    #[test]
    fn parses_issue_record_with_parameters() {
        let record =
            parse_record(0, "issue", b"ca.example; validationmethods=dns-01").unwrap();
        assert_eq!(record.issuer_domain, "ca.example");
        assert_eq!(
            record.parameters.get("validationmethods").unwrap(),
            "dns-01"
        );
    }

    #[test]
    fn rejects_parameter_missing_equals() {
        assert!(parse_record(0, "issue", b"ca.example; garbage").is_err());
    }

    #[test]
    fn rejects_parameter_tag_with_bad_characters() {
        assert!(parse_record(0, "issue", b"ca.example; bad tag=v").is_err());
    }

    #[test]
    fn rejects_parameter_value_with_semicolon() {
        assert!(parse_record(0, "issue", b"ca.example; k=a;b").is_err());
    }

    #[test]
    fn critical_bit7_is_critical() {
        let record = parse_record(0b1000_0000, "unknown-tag", b"x").unwrap();
        assert!(record.is_critical());
    }

    #[test]
    fn critical_bit0_alias_is_tolerated() {
        let record = parse_record(0b0000_0001, "unknown-tag", b"x").unwrap();
        assert!(record.is_critical());
    }

    #[test]
    fn ancestor_chain_is_deepest_first() {
        let chain = ancestor_chain("a.b.example.com");
        assert_eq!(
            chain,
            vec!["a.b.example.com", "b.example.com", "example.com", "com"]
        );
    }

    #[test]
    fn validationmethods_rejects_malformed_token() {
        let record = parse_record(0, "issue", b"ca.example; validationmethods=http_01").unwrap();
        assert!(!validation_method_matches(&record, "http-01"));
    }

    #[test]
    fn validationmethods_ignores_unrecognized_token() {
        let record =
            parse_record(0, "issue", b"ca.example; validationmethods=foo,dns-01").unwrap();
        assert!(validation_method_matches(&record, "dns-01"));
    }
}
