use prometheus::{Encoder, TextEncoder, HistogramVec, IntCounterVec, GaugeVec, Opts, Registry};
use warp::Filter;
use std::net::SocketAddr;
use once_cell::sync::{Lazy, OnceCell};

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static LATENCY_GAUGE: Lazy<GaugeVec> = Lazy::new(|| {
    let opts = Opts::new("handshake_latency_milliseconds_current", "Latest TCP handshake latency in milliseconds");
    let gauge = GaugeVec::new(opts, &["target"]).expect("creating latency gauge");
    REGISTRY.register(Box::new(gauge.clone())).expect("registering latency gauge");
    gauge
});

static TIMEOUT_COUNTER: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("handshake_timeout_total", "Total number of handshake checks that hit their deadline");
    let ctr = IntCounterVec::new(opts, &["target"]).expect("creating timeout counter");
    REGISTRY.register(Box::new(ctr.clone())).expect("registering timeout counter");
    ctr
});

static FAILURE_COUNTER: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("handshake_failure_total", "Total number of failed handshake checks, by error kind");
    let ctr = IntCounterVec::new(opts, &["target", "kind"]).expect("creating failure counter");
    REGISTRY.register(Box::new(ctr.clone())).expect("registering failure counter");
    ctr
});

// Only set when latency history is enabled
static LATENCY_HIST: OnceCell<HistogramVec> = OnceCell::new();

pub fn initialize_metrics(enable_latency_history: bool) {
    if enable_latency_history {
        LATENCY_HIST.get_or_init(|| {
            let opts = Opts::new("handshake_latency_milliseconds", "TCP handshake latency in milliseconds");
            let hist = HistogramVec::new(
                prometheus::HistogramOpts {
                    common_opts: opts,
                    buckets: vec![
                        0.05, 0.1, 0.2, 0.5, 1.0,
                        2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 250.0, 500.0, 1000.0
                    ],
                },
                &["target"],
            ).expect("creating histogram");
            REGISTRY.register(Box::new(hist.clone())).expect("registering histogram");
            hist
        });
    }
}

pub fn render() -> (String, Vec<u8>) {
    let encoder = TextEncoder::new();
    let mf = REGISTRY.gather();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&mf, &mut buf) {
        tracing::error!("encoding metrics failed: {:?}", e);
    }
    (encoder.format_type().to_string(), buf)
}

pub async fn serve_metrics(addr: SocketAddr) {
    let metrics_route = warp::path!("metrics").map(move || {
        let (content_type, body) = render();
        warp::http::Response::builder()
            .header("Content-Type", content_type)
            .body(body)
    });

    warp::serve(metrics_route).run(addr).await;
}

pub fn observe_latency(target: &str, latency_ms: f64) {
    // Always observe current latency in gauge
    LATENCY_GAUGE
        .with_label_values(&[target])
        .set(latency_ms);

    if let Some(hist) = LATENCY_HIST.get() {
        hist.with_label_values(&[target]).observe(latency_ms);
    }
}

pub fn inc_timeout(target: &str) {
    TIMEOUT_COUNTER
        .with_label_values(&[target])
        .inc();
}

pub fn inc_failure(target: &str, kind: &str) {
    FAILURE_COUNTER
        .with_label_values(&[target, kind])
        .inc();
}
