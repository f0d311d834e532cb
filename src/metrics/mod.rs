//! Metrics for the vendor registry
//!
//! In-process counters, gauges and latency histograms with Prometheus text
//! export for `GET /metrics`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Metrics registry shared by every service
pub struct MetricsRegistry {
    counters: RwLock<BTreeMap<String, Arc<AtomicU64>>>,
    gauges: RwLock<BTreeMap<String, Arc<AtomicU64>>>,
    histograms: RwLock<BTreeMap<String, Arc<Histogram>>>,
    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(BTreeMap::new()),
            gauges: RwLock::new(BTreeMap::new()),
            histograms: RwLock::new(BTreeMap::new()),
            start_time: Instant::now(),
        }
    }

    pub async fn inc_counter(&self, name: &str) {
        self.add_counter(name, 1).await;
    }

    pub async fn add_counter(&self, name: &str, value: u64) {
        let counters = self.counters.read().await;
        if let Some(counter) = counters.get(name) {
            counter.fetch_add(value, Ordering::Relaxed);
            return;
        }
        drop(counters);

        let mut counters = self.counters.write().await;
        counters
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .fetch_add(value, Ordering::Relaxed);
    }

    pub async fn set_gauge(&self, name: &str, value: u64) {
        let gauges = self.gauges.read().await;
        if let Some(gauge) = gauges.get(name) {
            gauge.store(value, Ordering::Relaxed);
            return;
        }
        drop(gauges);

        let mut gauges = self.gauges.write().await;
        gauges.insert(name.to_string(), Arc::new(AtomicU64::new(value)));
    }

    pub async fn get_counter(&self, name: &str) -> u64 {
        let counters = self.counters.read().await;
        counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub async fn get_gauge(&self, name: &str) -> u64 {
        let gauges = self.gauges.read().await;
        gauges
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Record a latency observation in seconds
    pub async fn observe_histogram(&self, name: &str, value: f64) {
        let histograms = self.histograms.read().await;
        if let Some(histogram) = histograms.get(name) {
            histogram.observe(value);
            return;
        }
        drop(histograms);

        let mut histograms = self.histograms.write().await;
        histograms
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Histogram::default()))
            .observe(value);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Export metrics in Prometheus text format
    pub async fn to_prometheus(&self) -> String {
        let counters = self.counters.read().await;
        let gauges = self.gauges.read().await;
        let histograms = self.histograms.read().await;

        let mut output = String::new();

        output.push_str("# HELP vendor_registry_uptime_seconds Time since service start\n");
        output.push_str("# TYPE vendor_registry_uptime_seconds gauge\n");
        output.push_str(&format!(
            "vendor_registry_uptime_seconds {}\n",
            self.uptime_seconds()
        ));

        for (name, counter) in counters.iter() {
            let prometheus_name = prometheus_name(name);
            output.push_str(&format!("# TYPE {} counter\n", prometheus_name));
            output.push_str(&format!(
                "{} {}\n",
                prometheus_name,
                counter.load(Ordering::Relaxed)
            ));
        }

        for (name, gauge) in gauges.iter() {
            let prometheus_name = prometheus_name(name);
            output.push_str(&format!("# TYPE {} gauge\n", prometheus_name));
            output.push_str(&format!(
                "{} {}\n",
                prometheus_name,
                gauge.load(Ordering::Relaxed)
            ));
        }

        for (name, histogram) in histograms.iter() {
            output.push_str(&histogram.to_prometheus(name));
        }

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn prometheus_name(name: &str) -> String {
    name.replace(['.', '-'], "_")
}

/// Fixed-bucket latency histogram
pub struct Histogram {
    buckets: Vec<f64>,
    counts: Vec<AtomicU64>,
    /// Sum of observations in microseconds
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(buckets: Vec<f64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: f64) {
        self.sum_micros
            .fetch_add((value * 1_000_000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        if let Some(i) = self.buckets.iter().position(|bucket| value <= *bucket) {
            self.counts[i].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn to_prometheus(&self, name: &str) -> String {
        let prometheus_name = prometheus_name(name);
        let mut output = format!("# TYPE {} histogram\n", prometheus_name);

        let mut cumulative = 0u64;
        for (bucket, count) in self.buckets.iter().zip(&self.counts) {
            cumulative += count.load(Ordering::Relaxed);
            output.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                prometheus_name, bucket, cumulative
            ));
        }

        output.push_str(&format!(
            "{}_bucket{{le=\"+Inf\"}} {}\n",
            prometheus_name,
            self.count()
        ));
        output.push_str(&format!(
            "{}_sum {}\n",
            prometheus_name,
            self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
        ));
        output.push_str(&format!("{}_count {}\n", prometheus_name, self.count()));

        output
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // Ledger calls range from milliseconds (views) to a minute (confirmations).
        Self::new(vec![
            0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
        ])
    }
}

/// Predefined metric names
pub mod metric_names {
    pub const APPLICATIONS_SUBMITTED: &str = "vendor_registry.applications.submitted";
    pub const APPLICATIONS_APPROVED: &str = "vendor_registry.applications.approved";
    pub const APPLICATIONS_REJECTED: &str = "vendor_registry.applications.rejected";
    pub const DUPLICATE_IDENTITIES: &str = "vendor_registry.applications.duplicate_identity";

    pub const CERTIFICATES_ISSUED: &str = "vendor_registry.certificates.issued";
    pub const CERTIFICATES_REVOKED: &str = "vendor_registry.certificates.revoked";
    pub const ARTIFACTS_STORED: &str = "vendor_registry.artifacts.stored";
    pub const ARTIFACTS_FAILED: &str = "vendor_registry.artifacts.failed";

    pub const VERIFICATIONS: &str = "vendor_registry.verifications.total";
    pub const VERIFICATIONS_DEGRADED: &str = "vendor_registry.verifications.degraded";
    pub const VERIFICATIONS_MISMATCH: &str = "vendor_registry.verifications.mismatch";

    pub const LEDGER_LATENCY: &str = "vendor_registry.ledger.latency_seconds";
    pub const LEDGER_RETRIES: &str = "vendor_registry.ledger.retries";
    pub const LEDGER_RECONCILED: &str = "vendor_registry.ledger.reconciled";

    pub const PROJECTIONS_DEFERRED: &str = "vendor_registry.projections.deferred";
    pub const PROJECTIONS_REPAIRED: &str = "vendor_registry.projections.repaired";
    pub const REPAIR_LOG_SIZE: &str = "vendor_registry.projections.repair_log_size";
}

/// Time an async operation into a histogram
pub async fn timed<F, T>(metrics: &MetricsRegistry, metric_name: &str, f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = Instant::now();
    let result = f.await;
    metrics
        .observe_histogram(metric_name, start.elapsed().as_secs_f64())
        .await;
    result
}
