//! DNS Resolver facade (spec §2, §6): recursive A/AAAA/TXT/CAA lookups with
//! timeouts and deterministic ordering. Implemented on `hickory-resolver`,
//! the resolver crate used by `KumoCorp-kumomta` in the retrieval pack.
//!
//! CAA values are fetched as raw bytes (`CAA::raw_value`/`CAA::tag`/
//! `CAA::flags`) and handed to [`crate::caa`] for parsing — the spec's
//! RFC 8659 parsing rules (exact error messages, bit-0 critical alias) are
//! implemented ourselves rather than trusting the resolver crate's own CAA
//! value parser.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::rr::{RData, RecordType};
use hickory_resolver::Resolver as HickoryResolverInner;
use hickory_resolver::TokioResolver;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;

use crate::error::Problem;

pub const DNS01_LABEL: &str = "_acme-challenge";

/// One raw CAA resource record as returned over the wire, before RFC 8659
/// parsing. Flags/tag/value are handed to [`crate::caa::parse_record`] as-is.
#[derive(Debug, Clone)]
pub struct RawCaaRecord {
    pub flags: u8,
    pub tag: String,
    pub value: Vec<u8>,
}

/// The DNS facade the rest of the VA core depends on. A trait so tests can
/// substitute a mock resolver (spec §8's "mock resolver" scenarios).
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn lookup_host(&self, host: &str) -> Result<Vec<IpAddr>, Problem>;
    async fn lookup_txt(&self, host: &str) -> Result<Vec<String>, Problem>;
    async fn lookup_caa(&self, host: &str) -> Result<Vec<RawCaaRecord>, Problem>;
}

pub struct HickoryResolver {
    inner: TokioResolver,
    timeout: Duration,
}

impl HickoryResolver {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let mut opts = hickory_resolver::config::ResolverOpts::default();
        opts.timeout = timeout;
        let inner = HickoryResolverInner::builder_with_config(
            ResolverConfig::default(),
            TokioConnectionProvider::default(),
        )
        .with_options(opts)
        .build();
        Self { inner, timeout }
    }

    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, hickory_resolver::ResolveError>>,
    ) -> Result<T, Problem> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) if err.is_nx_domain() => Err(Problem::dns("nxdomain")),
            Ok(Err(err)) => Err(Problem::dns(format!("resolver failure: {err}"))),
            Err(_) => Err(Problem::dns("resolver timeout")),
        }
    }
}

#[async_trait]
impl Resolver for HickoryResolver {
    async fn lookup_host(&self, host: &str) -> Result<Vec<IpAddr>, Problem> {
        match self.with_timeout(self.inner.lookup_ip(host)).await {
            Ok(lookup) => Ok(lookup.into_iter().collect()),
            Err(problem) if problem.detail == "nxdomain" => Ok(Vec::new()),
            Err(problem) => Err(problem),
        }
    }

    async fn lookup_txt(&self, host: &str) -> Result<Vec<String>, Problem> {
        match self.with_timeout(self.inner.txt_lookup(host)).await {
            Ok(lookup) => Ok(lookup
                .into_iter()
                .map(|txt| {
                    txt.txt_data()
                        .iter()
                        .flat_map(|segment| segment.iter().copied())
                        .collect::<Vec<u8>>()
                })
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .collect()),
            Err(problem) if problem.detail == "nxdomain" => Ok(Vec::new()),
            Err(problem) => Err(problem),
        }
    }

    async fn lookup_caa(&self, host: &str) -> Result<Vec<RawCaaRecord>, Problem> {
        let name = host.to_string();
        match self
            .with_timeout(self.inner.lookup(name, RecordType::CAA))
            .await
        {
            Ok(lookup) => Ok(lookup
                .record_iter()
                .filter_map(|record| match record.data() {
                    RData::CAA(caa) => Some(RawCaaRecord {
                        flags: caa.flags(),
                        tag: caa.tag().as_str().to_string(),
                        value: caa.raw_value().to_vec(),
                    }),
                    _ => None,
                })
                .collect()),
            Err(problem) if problem.detail == "nxdomain" => Ok(Vec::new()),
            Err(problem) => Err(problem),
        }
    }
}

/// Builds the `_acme-challenge.<identifier>` DNS-01 label.
#[must_use]
pub fn dns01_label(identifier: &str) -> String {
    format!("{DNS01_LABEL}.{identifier}")
}
