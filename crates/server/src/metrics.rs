use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
static ASK_OUTCOMES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

fn register_collector<T>(collector: T) -> T
where
    T: prometheus::core::Collector + Clone + 'static,
{
    let _ = registry().register(Box::new(collector.clone()));
    collector
}

fn http_requests_total() -> &'static IntCounterVec {
    HTTP_REQUESTS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new("nolia_http_requests_total", "HTTP request count."),
                &["route", "method", "status"],
            )
            .expect("create nolia_http_requests_total"),
        )
    })
}

fn http_request_duration_seconds() -> &'static HistogramVec {
    HTTP_REQUEST_DURATION_SECONDS.get_or_init(|| {
        register_collector(
            HistogramVec::new(
                HistogramOpts::new(
                    "nolia_http_request_duration_seconds",
                    "HTTP request duration in seconds.",
                )
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
                &["route"],
            )
            .expect("create nolia_http_request_duration_seconds"),
        )
    })
}

fn ask_outcomes_total() -> &'static IntCounterVec {
    ASK_OUTCOMES_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new("nolia_ask_outcomes_total", "Ask pipeline outcome count."),
                &["outcome"],
            )
            .expect("create nolia_ask_outcomes_total"),
        )
    })
}

pub fn observe_request(route: &str, method: &str, status: u16, duration: Duration) {
    http_requests_total()
        .with_label_values(&[route, method, &status.to_string()])
        .inc();
    http_request_duration_seconds()
        .with_label_values(&[route])
        .observe(duration.as_secs_f64());
}

/// Outcomes: answered, cached, coalesced, clock, refused, rate_limited, error.
pub fn record_ask_outcome(outcome: &str) {
    ask_outcomes_total().with_label_values(&[outcome]).inc();
}

pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&registry().gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
