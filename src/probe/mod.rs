//! Endpoint probing over path-bound transports.
//!
//! Two probe shapes exist: an HTTP HEAD against the controller and a bare TCP
//! connect against each device. Both ride a [`BoundTransport`], so a probe
//! can only answer over the path it was issued for. Probe failures are data,
//! not errors; everything maps into a [`ProbeResult`].

mod scheduler;

pub use scheduler::{ProbeEvent, ProbeTargets, Prober, TargetSpec};

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

use crate::transport::BoundTransport;
use crate::types::{Endpoint, ProbeResult};

/// Probing cadence and per-probe timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbingConfig {
    /// Time between probe rounds, measured start to start.
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Timeout for the controller HEAD request.
    #[serde(default = "default_http_timeout", with = "humantime_serde")]
    pub http_timeout: Duration,

    /// Timeout for each device TCP connect.
    #[serde(default = "default_tcp_timeout", with = "humantime_serde")]
    pub tcp_timeout: Duration,
}

fn default_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_tcp_timeout() -> Duration {
    Duration::from_millis(1500)
}

impl Default for ProbingConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            http_timeout: default_http_timeout(),
            tcp_timeout: default_tcp_timeout(),
        }
    }
}

/// HEAD the given URL over `transport`.
///
/// Any HTTP status in 200..=499 counts as up: the endpoint answered, even if
/// it disliked the request. 5xx and transport failures are down.
pub async fn probe_http(transport: &BoundTransport, url: &str, timeout: Duration) -> ProbeResult {
    let client = match transport.http_client(timeout) {
        Ok(client) => client,
        Err(e) => return ProbeResult::down(e.to_string()),
    };

    let started = Instant::now();
    match client.head(url).send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            let latency_ms = started.elapsed().as_millis() as u64;
            trace!(url, status, latency_ms, "http probe answered");
            if (200..500).contains(&status) {
                ProbeResult::up(latency_ms)
            } else {
                ProbeResult::down(format!("HTTP {status}"))
            }
        }
        Err(e) => ProbeResult::down(http_failure_reason(e)),
    }
}

/// TCP-connect to `host:port` over `transport`. A completed handshake is up;
/// the connection is closed immediately.
pub async fn probe_tcp(
    transport: &BoundTransport,
    host: &str,
    port: u16,
    timeout: Duration,
) -> ProbeResult {
    let started = Instant::now();
    match transport.connect_tcp(host, port, timeout).await {
        Ok(stream) => {
            let latency_ms = started.elapsed().as_millis() as u64;
            trace!(host, port, latency_ms, "tcp probe connected");
            drop(stream);
            ProbeResult::up(latency_ms)
        }
        Err(e) => ProbeResult::down(tcp_failure_reason(&e)),
    }
}

fn http_failure_reason(e: reqwest::Error) -> String {
    if e.is_timeout() {
        "timeout".to_string()
    } else if e.is_connect() {
        "connect failed".to_string()
    } else {
        e.without_url().to_string()
    }
}

fn tcp_failure_reason(e: &crate::error::Error) -> String {
    match e {
        crate::error::Error::Io(io) => match io.kind() {
            std::io::ErrorKind::TimedOut => "timeout".to_string(),
            std::io::ErrorKind::ConnectionRefused => "connection refused".to_string(),
            _ => io.to_string(),
        },
        other => other.to_string(),
    }
}

/// Aggregated per-endpoint probe statistics with EWMA latency.
#[derive(Debug, Default)]
pub struct ProbeStats {
    /// EWMA latency, fixed-point milliseconds (x1000).
    latency_ewma: AtomicU64,
    ok: AtomicU64,
    failed: AtomicU64,
    consecutive_failures: AtomicU64,
}

impl ProbeStats {
    const ALPHA: f64 = 0.2;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, result: &ProbeResult) {
        match result {
            ProbeResult::Up { latency_ms } => {
                let count = self.ok.fetch_add(1, Ordering::Relaxed);
                self.consecutive_failures.store(0, Ordering::Relaxed);
                if count == 0 {
                    self.latency_ewma
                        .store(latency_ms * 1000, Ordering::Relaxed);
                } else {
                    let current = self.latency_ewma.load(Ordering::Relaxed) as f64 / 1000.0;
                    let updated =
                        Self::ALPHA * (*latency_ms as f64) + (1.0 - Self::ALPHA) * current;
                    self.latency_ewma
                        .store((updated * 1000.0) as u64, Ordering::Relaxed);
                }
            }
            ProbeResult::Down { .. } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Smoothed latency estimate in milliseconds.
    pub fn latency_ms(&self) -> u64 {
        self.latency_ewma.load(Ordering::Relaxed) / 1000
    }

    pub fn ok_count(&self) -> u64 {
        self.ok.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> EndpointStats {
        EndpointStats {
            latency_ms: self.latency_ms(),
            ok: self.ok_count(),
            failed: self.failed_count(),
            consecutive_failures: self.consecutive_failures(),
        }
    }
}

/// Point-in-time copy of one endpoint's aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EndpointStats {
    pub latency_ms: u64,
    pub ok: u64,
    pub failed: u64,
    pub consecutive_failures: u64,
}

impl EndpointStats {
    /// Fraction of probes answered, as a percentage.
    pub fn availability_pct(&self) -> f64 {
        let total = self.ok + self.failed;
        if total == 0 {
            return 0.0;
        }
        (self.ok as f64 / total as f64) * 100.0
    }
}

/// Lock-free probe aggregate collector, one slot per endpoint.
#[derive(Debug, Default)]
pub struct ProbeCollector {
    stats: DashMap<Endpoint, ProbeStats>,
}

impl ProbeCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, endpoint: Endpoint, result: &ProbeResult) {
        self.stats
            .entry(endpoint)
            .or_insert_with(ProbeStats::new)
            .record(result);
    }

    pub fn get(&self, endpoint: Endpoint) -> Option<EndpointStats> {
        self.stats.get(&endpoint).map(|s| s.snapshot())
    }

    /// Aggregates for every endpoint that has been probed, in display order.
    pub fn all(&self) -> Vec<(Endpoint, EndpointStats)> {
        Endpoint::ALL
            .into_iter()
            .filter_map(|endpoint| self.get(endpoint).map(|stats| (endpoint, stats)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probing_config_defaults() {
        let config = ProbingConfig::default();
        assert_eq!(config.interval, Duration::from_secs(3));
        assert_eq!(config.http_timeout, Duration::from_secs(5));
        assert_eq!(config.tcp_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_stats_ewma_smooths() {
        let stats = ProbeStats::new();

        stats.record(&ProbeResult::up(100));
        assert_eq!(stats.latency_ms(), 100);

        stats.record(&ProbeResult::up(200));
        let latency = stats.latency_ms();
        assert!(latency > 100 && latency < 200, "got {latency}");
    }

    #[test]
    fn test_consecutive_failures_reset_on_success() {
        let stats = ProbeStats::new();

        stats.record(&ProbeResult::down("timeout"));
        stats.record(&ProbeResult::down("timeout"));
        assert_eq!(stats.consecutive_failures(), 2);

        stats.record(&ProbeResult::up(10));
        assert_eq!(stats.consecutive_failures(), 0);
        assert_eq!(stats.failed_count(), 2);
        assert_eq!(stats.ok_count(), 1);
    }

    #[test]
    fn test_collector_keeps_display_order() {
        let collector = ProbeCollector::new();
        collector.record(Endpoint::DeviceB, &ProbeResult::up(5));
        collector.record(Endpoint::Controller, &ProbeResult::down("timeout"));

        let all = collector.all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0, Endpoint::Controller);
        assert_eq!(all[1].0, Endpoint::DeviceB);
    }

    #[test]
    fn test_availability_pct() {
        let stats = EndpointStats {
            latency_ms: 10,
            ok: 3,
            failed: 1,
            consecutive_failures: 0,
        };
        assert!((stats.availability_pct() - 75.0).abs() < f64::EPSILON);
    }
}
