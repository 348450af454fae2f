//! Validation Authority core: proves ACME account control of a DNS
//! identifier via HTTP-01, DNS-01, or TLS-ALPN-01, and independently
//! enforces CAA policy. Side-effect-free on success; nothing here persists
//! state across calls (spec §1).

pub mod addr;
pub mod caa;
pub mod config;
pub mod dns;
pub mod dns01;
pub mod error;
pub mod http01;
pub mod keyauth;
pub mod multiva;
pub mod orchestrator;
pub mod tlsalpn;
pub mod types;

use std::sync::Arc;

use crate::config::VaConfig;
use crate::dns::Resolver;
use crate::error::Problem;
use crate::multiva::{AggregationMode, RemoteVa};
use crate::types::{Challenge, Identifier, ValidationRecord};

/// The VA's two externally-callable operations (spec §6), exposed as plain
/// async methods rather than framed over gRPC (out of scope per spec §1).
pub struct ValidationAuthority {
    resolver: Arc<dyn Resolver>,
    config: VaConfig,
    remotes: Vec<Arc<dyn RemoteVa>>,
}

impl ValidationAuthority {
    #[must_use]
    pub fn new(resolver: Arc<dyn Resolver>, config: VaConfig) -> Self {
        Self {
            resolver,
            config,
            remotes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_remotes(mut self, remotes: Vec<Arc<dyn RemoteVa>>) -> Self {
        self.remotes = remotes;
        self
    }

    /// Proves control of `identifier` via `challenge`, optionally confirmed
    /// by remote perspectives (spec §4.1, §4.6).
    pub async fn perform_validation(
        &self,
        identifier: &Identifier,
        account_id: &str,
        challenge: &Challenge,
    ) -> (Vec<ValidationRecord>, Option<Problem>) {
        let (records, problem) = orchestrator::perform_validation(
            self.resolver.clone(),
            &self.config,
            identifier,
            account_id,
            challenge,
        )
        .await;

        if self.remotes.is_empty() {
            return (records, problem);
        }

        let primary_result = problem.clone().map_or(Ok(()), Err);
        let mode = if self.config.features.multi_va_full_results {
            AggregationMode::FullResults
        } else {
            AggregationMode::QuorumEarly
        };
        match multiva::run(
            &self.remotes,
            mode,
            self.config.max_remote_failures,
            &primary_result,
        )
        .await
        {
            Ok(()) if problem.is_none() => (records, None),
            Ok(()) => (records, problem),
            Err(remote_problem) if self.config.features.enforce_multi_va => {
                (records, Some(remote_problem))
            }
            Err(remote_problem) => {
                // enforce_multi_va is off: remote disagreement is advisory,
                // logged but not allowed to flip the primary's own verdict.
                tracing::warn!(
                    detail = %remote_problem.detail,
                    "remote perspectives disagreed with the primary validation; not enforced"
                );
                (records, problem)
            }
        }
    }

    /// Runs only the CAA check for `identifier`, independent of any
    /// challenge (spec §4.5); used by callers that want a standalone CAA
    /// verdict outside a full `perform_validation` call.
    pub async fn is_caa_valid(
        &self,
        identifier: &Identifier,
        account_id: &str,
        challenge_type: &str,
    ) -> Result<(), Problem> {
        let validated_name = identifier.validated_name()?;
        caa::check(
            self.resolver.as_ref(),
            &self.config,
            validated_name,
            identifier.is_wildcard(),
            account_id,
            challenge_type,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::net::IpAddr;

    use crate::config::FeatureFlags;
    use crate::dns::RawCaaRecord;
    use crate::keyauth::{Jwk, dns01_digest_b64, generate_token, key_authorization};
    use crate::types::ChallengeType;

    struct FixedTxtResolver {
        name: String,
        value: String,
    }

    #[async_trait]
    impl Resolver for FixedTxtResolver {
        async fn lookup_host(&self, _host: &str) -> Result<Vec<IpAddr>, Problem> {
            Ok(Vec::new())
        }
        async fn lookup_txt(&self, host: &str) -> Result<Vec<String>, Problem> {
            if host == self.name {
                Ok(vec![self.value.clone()])
            } else {
                Ok(Vec::new())
            }
        }
        async fn lookup_caa(&self, _host: &str) -> Result<Vec<RawCaaRecord>, Problem> {
            Ok(Vec::new())
        }
    }

    struct AlwaysFailsRemote;

    #[async_trait]
    impl RemoteVa for AlwaysFailsRemote {
        fn hostname(&self) -> &'static str {
            "remote.example"
        }
        async fn validate(&self) -> Result<(), Problem> {
            Err(Problem::unauthorized("remote saw a mismatch"))
        }
    }

    fn test_config(enforce_multi_va: bool) -> VaConfig {
        VaConfig {
            issuer_domain: "ca.example".to_string(),
            account_uri_prefixes: Vec::new(),
            http_port: 80,
            https_port: 443,
            tls_port: 443,
            max_remote_failures: 0,
            user_agent: None,
            features: FeatureFlags {
                enforce_multi_va,
                ..FeatureFlags::default()
            },
        }
    }

    fn passing_dns01_challenge() -> (Identifier, Challenge, FixedTxtResolver) {
        let jwk = Jwk {
            kty: "EC".to_string(),
            crv: "P-256".to_string(),
            x: "x".to_string(),
            y: "y".to_string(),
        };
        let token = generate_token();
        let ka = key_authorization(&token, &jwk);
        let mut challenge = Challenge::new(ChallengeType::Dns01, token);
        challenge.provided_key_authorization = Some(ka.clone());
        let resolver = FixedTxtResolver {
            name: "_acme-challenge.example.com".to_string(),
            value: dns01_digest_b64(&ka),
        };
        (Identifier::dns("example.com"), challenge, resolver)
    }

    #[tokio::test]
    async fn remote_disagreement_is_advisory_when_enforce_multi_va_disabled() {
        let (identifier, challenge, resolver) = passing_dns01_challenge();
        let va = ValidationAuthority::new(Arc::new(resolver), test_config(false))
            .with_remotes(vec![Arc::new(AlwaysFailsRemote)]);

        let (_, problem) = va.perform_validation(&identifier, "acct-1", &challenge).await;
        assert!(problem.is_none(), "disagreement must not fail validation when the flag is off");
    }

    #[tokio::test]
    async fn remote_disagreement_fails_validation_when_enforce_multi_va_enabled() {
        let (identifier, challenge, resolver) = passing_dns01_challenge();
        let va = ValidationAuthority::new(Arc::new(resolver), test_config(true))
            .with_remotes(vec![Arc::new(AlwaysFailsRemote)]);

        let (_, problem) = va.perform_validation(&identifier, "acct-1", &challenge).await;
        assert!(problem.is_some(), "disagreement must fail validation when the flag is on");
    }
}
