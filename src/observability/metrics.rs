use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub bookings_total: IntCounterVec,
    pub transitions_total: IntCounterVec,
    pub capacity_rejections_total: IntCounter,
    pub slots_occupied: IntGauge,
    pub tracking_sessions_active: IntGauge,
    pub transition_latency_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let bookings_total = IntCounterVec::new(
            Opts::new("bookings_total", "Bookings created by type"),
            &["booking_type"],
        )
        .expect("valid bookings_total metric");

        let transitions_total = IntCounterVec::new(
            Opts::new("transitions_total", "Booking transitions by outcome"),
            &["outcome"],
        )
        .expect("valid transitions_total metric");

        let capacity_rejections_total = IntCounter::new(
            "capacity_rejections_total",
            "Slot booking attempts rejected for lack of capacity",
        )
        .expect("valid capacity_rejections_total metric");

        let slots_occupied = IntGauge::new(
            "slots_occupied",
            "Currently reserved slot-bucket units across all carwashes",
        )
        .expect("valid slots_occupied metric");

        let tracking_sessions_active = IntGauge::new(
            "tracking_sessions_active",
            "Open live-tracking sessions",
        )
        .expect("valid tracking_sessions_active metric");

        let transition_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "transition_latency_seconds",
                "Latency of booking transitions in seconds",
            ),
            &["outcome"],
        )
        .expect("valid transition_latency_seconds metric");

        registry
            .register(Box::new(bookings_total.clone()))
            .expect("register bookings_total");
        registry
            .register(Box::new(transitions_total.clone()))
            .expect("register transitions_total");
        registry
            .register(Box::new(capacity_rejections_total.clone()))
            .expect("register capacity_rejections_total");
        registry
            .register(Box::new(slots_occupied.clone()))
            .expect("register slots_occupied");
        registry
            .register(Box::new(tracking_sessions_active.clone()))
            .expect("register tracking_sessions_active");
        registry
            .register(Box::new(transition_latency_seconds.clone()))
            .expect("register transition_latency_seconds");

        Self {
            registry,
            bookings_total,
            transitions_total,
            capacity_rejections_total,
            slots_occupied,
            tracking_sessions_active,
            transition_latency_seconds,
        }
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
