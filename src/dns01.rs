//! DNS-01 engine (spec §4.4): TXT lookup at `_acme-challenge.<identifier>`,
//! constant-time digest comparison.

use crate::config::VaConfig;
use crate::dns::{Resolver, dns01_label};
use crate::error::Problem;
use crate::keyauth::dns01_digest_b64;
use crate::types::ValidationRecord;

const TRUNCATED_VALUE_LEN: usize = 100;

/// Runs DNS-01 validation for `identifier` (spec §4.4).
pub async fn validate(
    resolver: &dyn Resolver,
    _config: &VaConfig,
    identifier: &str,
    expected_key_authorization: &str,
) -> (Vec<ValidationRecord>, Result<(), Problem>) {
    let label = dns01_label(identifier);
    let record = ValidationRecord::dns01(label.clone());

    let values = match resolver.lookup_txt(&label).await {
        Ok(values) => values,
        Err(problem) => return (vec![record], Err(problem)),
    };

    if values.is_empty() {
        return (
            vec![record],
            Err(Problem::unauthorized(format!(
                "No TXT record found at {label}"
            ))),
        );
    }

    let expected = dns01_digest_b64(expected_key_authorization);
    let mismatches: Vec<&String> = values
        .iter()
        .filter(|value| {
            ring::constant_time::verify_slices_are_equal(value.as_bytes(), expected.as_bytes()).is_err()
        })
        .collect();

    if mismatches.len() < values.len() {
        return (vec![record], Ok(()));
    }

    let first = truncate(mismatches[0]);
    let remaining = mismatches.len() - 1;
    let detail = if remaining > 0 {
        format!("Incorrect TXT record {first:?} (and {remaining} more) found at {label}")
    } else {
        format!("Incorrect TXT record {first:?} found at {label}")
    };
    (vec![record], Err(Problem::unauthorized(detail)))
}

fn truncate(value: &str) -> String {
    if value.len() <= TRUNCATED_VALUE_LEN {
        value.to_string()
    } else {
        let mut end = TRUNCATED_VALUE_LEN;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &value[..end])
    }
}
