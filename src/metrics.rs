use lazy_static::lazy_static;
use prometheus::{
    Counter, Encoder, Gauge, HistogramVec, TextEncoder, register_counter, register_gauge,
    register_histogram_vec,
};

lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("gateway_requests_total", "Total number of requests seen by admission").unwrap();
    pub static ref ADMITTED_TOTAL: Counter =
        register_counter!("gateway_admitted_total", "Requests admitted to a handler").unwrap();
    pub static ref UNAUTHORIZED_TOTAL: Counter =
        register_counter!("gateway_unauthorized_total", "Requests rejected for an invalid credential").unwrap();
    pub static ref RATE_LIMITED_TOTAL: Counter =
        register_counter!("gateway_rate_limited_total", "Requests rejected by the rate limiter").unwrap();
    pub static ref USAGE_EVENT_FAILURES: Counter =
        register_counter!("gateway_usage_event_failures_total", "Usage events the store did not accept").unwrap();
    pub static ref UPSTREAM_LATENCY: HistogramVec = register_histogram_vec!(
        "gateway_upstream_latency_seconds",
        "Inference call latency in seconds",
        &["provider"]
    )
    .unwrap();
    pub static ref TRACKED_IDENTITIES: Gauge =
        register_gauge!("gateway_tracked_identities", "Identities currently held by the rate limiter").unwrap();
}

// Render the default registry in the Prometheus text format
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
