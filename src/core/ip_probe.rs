// src/core/ip_probe.rs

//! Liveness probe used when importing the IPv4 space.
//!
//! An address is live when `http://ip` or `https://ip` answers with a
//! success status. Live addresses are turned into origins through their PTR
//! records, falling back to the bare address.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use tracing::debug;

use crate::core::fetch::{FetchOptions, HttpFetcher};

/// PTR lookup seam.
#[async_trait]
pub trait ReverseResolver: Send + Sync {
    /// Host names for `addr`, without the trailing dot. Empty on any failure.
    async fn reverse(&self, addr: Ipv4Addr) -> Vec<String>;
}

pub struct HickoryResolver {
    resolver: TokioAsyncResolver,
}

impl HickoryResolver {
    pub fn new() -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
        }
    }
}

impl Default for HickoryResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReverseResolver for HickoryResolver {
    async fn reverse(&self, addr: Ipv4Addr) -> Vec<String> {
        match self.resolver.reverse_lookup(IpAddr::V4(addr)).await {
            Ok(lookup) => lookup
                .iter()
                .map(|ptr| ptr.to_string().trim_end_matches('.').to_string())
                .filter(|name| !name.is_empty())
                .collect(),
            Err(e) => {
                debug!(addr = %addr, error = %e, "Reverse lookup failed.");
                Vec::new()
            }
        }
    }
}

pub struct LivenessProbe {
    fetcher: Arc<dyn HttpFetcher>,
    resolver: Arc<dyn ReverseResolver>,
    timeout: Duration,
}

impl LivenessProbe {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, resolver: Arc<dyn ReverseResolver>, timeout: Duration) -> Self {
        Self {
            fetcher,
            resolver,
            timeout,
        }
    }

    /// Origins reachable at `addr`; empty when neither scheme answers.
    pub async fn check_ip(&self, addr: Ipv4Addr) -> Vec<String> {
        let options = FetchOptions::with_timeout(self.timeout);
        let http_url = format!("http://{addr}");
        let https_url = format!("https://{addr}");
        let (http, https) = tokio::join!(
            self.fetcher.get(&http_url, &options),
            self.fetcher.get(&https_url, &options)
        );
        if http.is_err() && https.is_err() {
            return Vec::new();
        }

        let scheme = if https.is_ok() { "https" } else { "http" };
        let names = self.resolver.reverse(addr).await;
        if names.is_empty() {
            return vec![format!("{scheme}://{addr}")];
        }
        names.into_iter().map(|name| format!("{scheme}://{name}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::StubFetcher;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FixedResolver(HashMap<Ipv4Addr, Vec<String>>);

    #[async_trait]
    impl ReverseResolver for FixedResolver {
        async fn reverse(&self, addr: Ipv4Addr) -> Vec<String> {
            self.0.get(&addr).cloned().unwrap_or_default()
        }
    }

    fn probe(fetcher: Arc<StubFetcher>, resolver: FixedResolver) -> LivenessProbe {
        LivenessProbe::new(fetcher, Arc::new(resolver), Duration::from_secs(4))
    }

    #[tokio::test]
    async fn dead_address_yields_nothing() {
        let live = probe(Arc::new(StubFetcher::default()), FixedResolver::default());
        assert!(live.check_ip(Ipv4Addr::new(10, 0, 0, 1)).await.is_empty());
    }

    #[tokio::test]
    async fn https_wins_and_ptr_names_are_used() {
        let addr = Ipv4Addr::new(93, 184, 216, 34);
        let fetcher = Arc::new(StubFetcher::default());
        fetcher.respond("http://93.184.216.34", "ok");
        fetcher.respond("https://93.184.216.34", "ok");
        let mut names = HashMap::new();
        names.insert(addr, vec!["example.com".to_string(), "www.example.com".to_string()]);

        let origins = probe(fetcher, FixedResolver(names)).check_ip(addr).await;
        assert_eq!(origins, vec!["https://example.com", "https://www.example.com"]);
    }

    #[tokio::test]
    async fn address_without_ptr_falls_back_to_ip() {
        let addr = Ipv4Addr::new(10, 1, 2, 3);
        let fetcher = Arc::new(StubFetcher::default());
        fetcher.respond("http://10.1.2.3", "ok");
        fetcher.fail("https://10.1.2.3", 502);

        let origins = probe(fetcher, FixedResolver::default()).check_ip(addr).await;
        assert_eq!(origins, vec!["http://10.1.2.3"]);
    }
}
