use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub ride_transitions_total: IntCounterVec,
    pub refresh_total: IntCounterVec,
    pub refresh_latency_seconds: HistogramVec,
    pub active_trips: IntGauge,
    pub offers_dispatched_total: IntCounter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let ride_transitions_total = IntCounterVec::new(
            Opts::new(
                "ride_transitions_total",
                "Ride lifecycle operations by operation and outcome",
            ),
            &["operation", "outcome"],
        )
        .expect("valid ride_transitions_total metric");

        let refresh_total = IntCounterVec::new(
            Opts::new("refresh_total", "State reconciliations by trigger"),
            &["trigger"],
        )
        .expect("valid refresh_total metric");

        let refresh_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "refresh_latency_seconds",
                "Latency of state reconciliation in seconds",
            ),
            &["outcome"],
        )
        .expect("valid refresh_latency_seconds metric");

        let active_trips = IntGauge::new("active_trips", "Trips currently in progress")
            .expect("valid active_trips metric");

        let offers_dispatched_total =
            IntCounter::new("offers_dispatched_total", "Ride offers sent to drivers")
                .expect("valid offers_dispatched_total metric");

        registry
            .register(Box::new(ride_transitions_total.clone()))
            .expect("register ride_transitions_total");
        registry
            .register(Box::new(refresh_total.clone()))
            .expect("register refresh_total");
        registry
            .register(Box::new(refresh_latency_seconds.clone()))
            .expect("register refresh_latency_seconds");
        registry
            .register(Box::new(active_trips.clone()))
            .expect("register active_trips");
        registry
            .register(Box::new(offers_dispatched_total.clone()))
            .expect("register offers_dispatched_total");

        Self {
            registry,
            ride_transitions_total,
            refresh_total,
            refresh_latency_seconds,
            active_trips,
            offers_dispatched_total,
        }
    }

    pub fn record_transition(&self, operation: &str, outcome: &str) {
        self.ride_transitions_total
            .with_label_values(&[operation, outcome])
            .inc();
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
