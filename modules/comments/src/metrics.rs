use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    // Counters
    pub events_published_total: IntCounterVec,
    pub deliveries_total: IntCounterVec,

    // Histograms
    pub apply_duration_seconds: HistogramVec,
    pub http_request_duration_seconds: HistogramVec,

    // Gauges
    pub dep_up: IntGaugeVec,
    pub consumer_workers_running: IntGauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let events_published_total = IntCounterVec::new(
            Opts::new("comment_events_published_total", "Comment events handed to the broker"),
            &["kind", "result"], // result: ok|saturated|error
        )
        .expect("metric");

        let deliveries_total = IntCounterVec::new(
            Opts::new("comment_deliveries_total", "Comment deliveries settled by the consumer"),
            &["kind", "outcome"], // outcome: applied|duplicate|rejected|dead_lettered|requeued
        )
        .expect("metric");

        let apply_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "comment_apply_duration_seconds",
                "Time spent decoding and applying one delivery",
            ),
            &["kind"],
        )
        .expect("metric");

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "HTTP request duration seconds"),
            &["path", "method", "status"],
        )
        .expect("metric");

        let dep_up = IntGaugeVec::new(
            Opts::new("comments_dependency_up", "Dependency up gauge"),
            &["dep"], // db|broker|consumer|ready
        )
        .expect("metric");

        let consumer_workers_running = IntGauge::new(
            "comment_consumer_workers_running",
            "Consumer workers currently subscribed or resubscribing",
        )
        .expect("metric");

        registry
            .register(Box::new(events_published_total.clone()))
            .expect("register");
        registry
            .register(Box::new(deliveries_total.clone()))
            .expect("register");
        registry
            .register(Box::new(apply_duration_seconds.clone()))
            .expect("register");
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .expect("register");
        registry.register(Box::new(dep_up.clone())).expect("register");
        registry
            .register(Box::new(consumer_workers_running.clone()))
            .expect("register");

        Self {
            registry,
            events_published_total,
            deliveries_total,
            apply_duration_seconds,
            http_request_duration_seconds,
            dep_up,
            consumer_workers_running,
        }
    }

    pub fn render(&self) -> Result<String, String> {
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&mf, &mut buf).map_err(|e| e.to_string())?;
        String::from_utf8(buf).map_err(|e| e.to_string())
    }

    pub fn record_delivery(&self, kind: &str, outcome: &str) {
        self.deliveries_total.with_label_values(&[kind, outcome]).inc();
    }

    pub fn record_publish(&self, kind: &str, result: &str) {
        self.events_published_total
            .with_label_values(&[kind, result])
            .inc();
    }

    pub fn set_dep_up(&self, dep: &str, up: bool) {
        self.dep_up.with_label_values(&[dep]).set(i64::from(up));
    }
}
