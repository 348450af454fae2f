//! Shared fixtures for the end-to-end scenarios in spec §8: a mock
//! `Resolver` whose host/TXT/CAA answers are fixed up front, plus a minimal
//! config builder. HTTP-01 scenarios additionally stand up a `wiremock`
//! server; TLS-ALPN-01 scenarios stand up a raw `rustls` server, the same
//! pattern the teacher's `tests/acme_trust.rs` uses for its TLS fixture.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;
use va_core::config::{FeatureFlags, VaConfig};
use va_core::dns::RawCaaRecord;
use va_core::dns::Resolver;
use va_core::error::Problem;

#[derive(Debug, Clone, Default)]
pub struct MockResolver {
    pub hosts: HashMap<String, Vec<IpAddr>>,
    pub txt: HashMap<String, Vec<String>>,
    pub caa: HashMap<String, Vec<RawCaaRecord>>,
}

impl MockResolver {
    pub fn with_host(mut self, host: &str, addrs: Vec<IpAddr>) -> Self {
        self.hosts.insert(host.to_string(), addrs);
        self
    }

    pub fn with_txt(mut self, name: &str, values: Vec<String>) -> Self {
        self.txt.insert(name.to_string(), values);
        self
    }

    pub fn with_caa(mut self, name: &str, records: Vec<RawCaaRecord>) -> Self {
        self.caa.insert(name.to_string(), records);
        self
    }
}

#[async_trait]
impl Resolver for MockResolver {
    async fn lookup_host(&self, host: &str) -> Result<Vec<IpAddr>, Problem> {
        Ok(self.hosts.get(host).cloned().unwrap_or_default())
    }

    async fn lookup_txt(&self, host: &str) -> Result<Vec<String>, Problem> {
        Ok(self.txt.get(host).cloned().unwrap_or_default())
    }

    async fn lookup_caa(&self, host: &str) -> Result<Vec<RawCaaRecord>, Problem> {
        Ok(self.caa.get(host).cloned().unwrap_or_default())
    }
}

pub fn test_config(features: FeatureFlags) -> VaConfig {
    VaConfig {
        issuer_domain: "ca.example".to_string(),
        account_uri_prefixes: Vec::new(),
        http_port: 80,
        https_port: 443,
        tls_port: 443,
        max_remote_failures: 0,
        user_agent: None,
        features,
    }
}
