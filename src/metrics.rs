// src/metrics.rs
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

// The recorder is process-global; later `init` calls reuse the first handle.
static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and describe every series.
    pub fn init(cache_ttl_secs: u64) -> anyhow::Result<Self> {
        let handle = HANDLE
            .get_or_try_init(|| PrometheusBuilder::new().install_recorder())?
            .clone();

        describe_counter!("harvest_cycles_total", "Completed harvest cycles");
        describe_counter!("harvest_steps_total", "Harvest steps by outcome");
        describe_histogram!("harvest_step_ms", "Full harvest step duration");
        describe_counter!("scrape_requests_total", "Outbound cantor page requests");
        describe_counter!("scrape_errors_total", "Failed cantor page requests");
        describe_counter!("read_cache_hits_total", "Point reads served from the hot cache");
        describe_counter!("read_cache_misses_total", "Point reads that fell back to a scrape");
        describe_gauge!("stream_subscribers", "Open StreamRates subscriptions");
        describe_gauge!("harvest_last_cycle_ts", "Unix time of the last finished cycle");
        describe_gauge!("hot_cache_ttl_secs", "Hot cache entry TTL");

        gauge!("hot_cache_ttl_secs").set(cache_ttl_secs as f64);

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
