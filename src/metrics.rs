//! Prometheus metrics for the execution worker

use std::sync::{LazyLock, Once};

use axum::http::StatusCode;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Finished jobs by persisted status
pub static JOBS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let opts = Opts::new("codejudge_jobs_total", "Jobs finished, by final status");
    IntCounterVec::new(opts, &["status"]).expect("Failed to create counter")
});

pub static JOB_RETRIES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("codejudge_job_retries_total", "Deliveries scheduled for retry")
        .expect("Failed to create counter")
});

pub static DEAD_LETTERS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("codejudge_dead_letter_total", "Messages moved to the dead letter stream")
        .expect("Failed to create counter")
});

/// Currently active jobs gauge
pub static ACTIVE_JOBS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("codejudge_active_jobs", "Jobs currently being executed")
        .expect("Failed to create gauge")
});

/// Contained execution time histogram
pub static EXECUTION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        "codejudge_execution_duration_seconds",
        "Wall-clock time of contained program execution",
    )
    .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0]);

    HistogramVec::new(opts, &["language"]).expect("Failed to create histogram")
});

/// Peak memory histogram
pub static MEMORY_USAGE: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new("codejudge_memory_usage_bytes", "Peak memory of executed programs")
        .buckets(vec![
            1024.0 * 1024.0,         // 1 MB
            16.0 * 1024.0 * 1024.0,  // 16 MB
            64.0 * 1024.0 * 1024.0,  // 64 MB
            128.0 * 1024.0 * 1024.0, // 128 MB
            256.0 * 1024.0 * 1024.0, // 256 MB
        ]);

    HistogramVec::new(opts, &["language"]).expect("Failed to create histogram")
});

static INIT: Once = Once::new();

/// Register all metrics with the global registry; safe to call repeatedly
pub fn init_metrics() {
    INIT.call_once(|| {
        let collectors: [Box<dyn prometheus::core::Collector>; 6] = [
            Box::new(JOBS_TOTAL.clone()),
            Box::new(JOB_RETRIES.clone()),
            Box::new(DEAD_LETTERS.clone()),
            Box::new(ACTIVE_JOBS.clone()),
            Box::new(EXECUTION_DURATION.clone()),
            Box::new(MEMORY_USAGE.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                tracing::error!(error = %e, "Failed to register metric");
            }
        }
    });
}

pub fn record_job(status: &str) {
    JOBS_TOTAL.with_label_values(&[status]).inc();
}

/// Record execution metrics
pub fn record_execution(language: &str, duration_ms: u64, memory_bytes: u64) {
    EXECUTION_DURATION
        .with_label_values(&[language])
        .observe(duration_ms as f64 / 1000.0);
    MEMORY_USAGE
        .with_label_values(&[language])
        .observe(memory_bytes as f64);
}

/// Holds a gauge raised for as long as the guard lives, unwinding included
pub struct GaugeGuard(IntGauge);

impl GaugeGuard {
    pub fn new(gauge: &IntGauge) -> Self {
        gauge.inc();
        Self(gauge.clone())
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.dec();
    }
}

/// Text exposition of everything in the registry
pub fn render() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// HTTP server for Prometheus metrics endpoint
pub struct MetricsServer;

impl MetricsServer {
    /// Run the metrics server
    pub async fn run(port: u16) -> anyhow::Result<()> {
        use axum::{routing::get, Router};
        use std::net::SocketAddr;
        use tower_http::trace::TraceLayer;

        init_metrics();

        let app = Router::new()
            .route("/metrics", get(Self::metrics_handler))
            .route("/health", get(|| async { "OK" }))
            .layer(TraceLayer::new_for_http());

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        tracing::info!("Metrics server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    async fn metrics_handler() -> Result<String, (StatusCode, String)> {
        render().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
    }
}
