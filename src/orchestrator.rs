//! Challenge orchestrator (spec §4.1): the one entry point tying the three
//! challenge engines together with the CAA engine.
//!
//! CAA runs as a spawned task delivering its single verdict over a
//! bounded, single-use channel (spec §3's "Lifecycle/ownership" note),
//! while the challenge engine runs in the caller's task; a challenge
//! failure returns immediately without waiting on CAA.

use std::sync::Arc;

use crate::caa;
use crate::config::VaConfig;
use crate::dns::Resolver;
use crate::error::Problem;
use crate::types::{Challenge, ChallengeType, Identifier, ValidationRecord};
use crate::{dns01, http01, tlsalpn};

/// Runs one full validation: consistency check, CAA concurrently with the
/// challenge engine, merged per spec §4.1.
pub async fn perform_validation(
    resolver: Arc<dyn Resolver>,
    config: &VaConfig,
    identifier: &Identifier,
    account_id: &str,
    challenge: &Challenge,
) -> (Vec<ValidationRecord>, Option<Problem>) {
    if let Err(problem) = challenge.consistency_for_validation() {
        return (Vec::new(), Some(problem));
    }
    let Ok(validated_name) = identifier.validated_name() else {
        return (
            Vec::new(),
            Some(Problem::malformed("identifier type is not supported")),
        );
    };
    let validated_name = validated_name.to_string();
    let is_wildcard = identifier.is_wildcard();

    let (caa_tx, mut caa_rx) = tokio::sync::mpsc::channel::<Option<Problem>>(1);
    let caa_resolver = resolver.clone();
    let caa_config = config.clone();
    let caa_hostname = validated_name.clone();
    let caa_account_id = account_id.to_string();
    let caa_challenge_type = challenge.r#type.as_str().to_string();
    tokio::spawn(async move {
        let result = caa::check(
            caa_resolver.as_ref(),
            &caa_config,
            &caa_hostname,
            is_wildcard,
            &caa_account_id,
            &caa_challenge_type,
        )
        .await;
        let _ = caa_tx.send(result.err()).await;
    });

    // The `provided_key_authorization` existence/shape was already confirmed
    // by `consistency_for_validation` above.
    let provided_key_authorization = challenge
        .provided_key_authorization
        .as_deref()
        .expect("validated by consistency_for_validation");

    let (records, challenge_result) = match challenge.r#type {
        ChallengeType::Http01 => {
            http01::validate(
                resolver.as_ref(),
                config,
                &validated_name,
                &challenge.token,
                provided_key_authorization,
            )
            .await
        }
        ChallengeType::Dns01 => {
            dns01::validate(
                resolver.as_ref(),
                config,
                &validated_name,
                provided_key_authorization,
            )
            .await
        }
        ChallengeType::TlsAlpn01 => {
            tlsalpn::validate(
                resolver.as_ref(),
                config,
                &validated_name,
                provided_key_authorization,
            )
            .await
        }
    };

    if let Err(problem) = challenge_result {
        // CAA's task may still be running; its result is dropped, not awaited.
        return (records, Some(problem));
    }

    match caa_rx.recv().await {
        Some(Some(caa_problem)) => (records, Some(caa_problem)),
        Some(None) | None => (records, None),
    }
}
