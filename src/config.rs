//! VA configuration (spec §6), loaded and validated the way the teacher's
//! `config.rs`/`config/validation.rs` load and validate `Settings`: `serde`
//! deserialization through the `config` crate, then a fail-fast validation
//! pass that `anyhow::bail!`s with one message per invalid field.

use anyhow::Result;
use serde::Deserialize;

const DEFAULT_HTTP_PORT: u16 = 80;
const DEFAULT_HTTPS_PORT: u16 = 443;
const DEFAULT_TLS_PORT: u16 = 443;
const DEFAULT_MAX_REMOTE_FAILURES: u32 = 0;
const DEFAULT_USER_AGENT: &str = "va-core/0.1";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct FeatureFlags {
    pub caa_account_uri: bool,
    pub caa_validation_methods: bool,
    pub enforce_multi_va: bool,
    pub multi_va_full_results: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            caa_account_uri: true,
            caa_validation_methods: true,
            enforce_multi_va: false,
            multi_va_full_results: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VaConfig {
    pub issuer_domain: String,
    #[serde(default)]
    pub account_uri_prefixes: Vec<String>,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_https_port")]
    pub https_port: u16,
    #[serde(default = "default_tls_port")]
    pub tls_port: u16,
    #[serde(default = "default_max_remote_failures")]
    pub max_remote_failures: u32,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub features: FeatureFlags,
}

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}
fn default_https_port() -> u16 {
    DEFAULT_HTTPS_PORT
}
fn default_tls_port() -> u16 {
    DEFAULT_TLS_PORT
}
fn default_max_remote_failures() -> u32 {
    DEFAULT_MAX_REMOTE_FAILURES
}

impl VaConfig {
    /// Loads configuration from an optional TOML file, overlaid with `VA_`-prefixed
    /// environment variables, mirroring `Settings::new` in the teacher.
    ///
    /// # Errors
    /// Returns an error if the file can't be parsed or a required field is
    /// missing/invalid.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(config::Environment::with_prefix("VA").separator("__"));
        let raw: VaConfig = builder.build()?.try_deserialize()?;
        raw.validate()?;
        Ok(raw)
    }

    #[must_use]
    pub fn user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
    }

    /// Fail-fast validation, grounded on `config/validation.rs::validate_settings`.
    ///
    /// # Errors
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.issuer_domain.trim().is_empty() {
            anyhow::bail!("issuer_domain must not be empty");
        }
        if self.http_port == 0 {
            anyhow::bail!("http_port must be nonzero");
        }
        if self.https_port == 0 {
            anyhow::bail!("https_port must be nonzero");
        }
        if self.tls_port == 0 {
            anyhow::bail!("tls_port must be nonzero");
        }
        for prefix in &self.account_uri_prefixes {
            if prefix.trim().is_empty() {
                anyhow::bail!("account_uri_prefixes entries must not be empty");
            }
        }
        Ok(())
    }

    /// Ports a redirect is permitted to name explicitly (spec §4.2).
    #[must_use]
    pub fn allowed_redirect_ports(&self) -> [u16; 2] {
        [self.http_port, self.https_port]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_issuer_domain() {
        let cfg = VaConfig {
            issuer_domain: String::new(),
            account_uri_prefixes: Vec::new(),
            http_port: 80,
            https_port: 443,
            tls_port: 443,
            max_remote_failures: 0,
            user_agent: None,
            features: FeatureFlags::default(),
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_user_agent_is_applied() {
        let cfg = VaConfig {
            issuer_domain: "ca.example".to_string(),
            account_uri_prefixes: Vec::new(),
            http_port: 80,
            https_port: 443,
            tls_port: 443,
            max_remote_failures: 0,
            user_agent: None,
            features: FeatureFlags::default(),
        };
        assert_eq!(cfg.user_agent(), DEFAULT_USER_AGENT);
    }
}
