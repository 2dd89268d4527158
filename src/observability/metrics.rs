use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub claims_total: IntCounterVec,
    pub rejections_total: IntCounterVec,
    pub transaction_conflicts_total: IntCounter,
    pub offers_expired_total: IntCounter,
    pub claim_latency_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let claims_total = IntCounterVec::new(
            Opts::new("claims_total", "Claim attempts by outcome"),
            &["outcome"],
        )
        .expect("valid claims_total metric");

        let rejections_total = IntCounterVec::new(
            Opts::new("rejections_total", "Reject calls by outcome"),
            &["outcome"],
        )
        .expect("valid rejections_total metric");

        let transaction_conflicts_total = IntCounter::new(
            "transaction_conflicts_total",
            "Store transactions retried after a concurrent write",
        )
        .expect("valid transaction_conflicts_total metric");

        let offers_expired_total = IntCounter::new(
            "offers_expired_total",
            "Pending offers rejected by the server-side expiry sweep",
        )
        .expect("valid offers_expired_total metric");

        let claim_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "claim_latency_seconds",
                "Latency of claim transactions in seconds",
            ),
            &["outcome"],
        )
        .expect("valid claim_latency_seconds metric");

        registry
            .register(Box::new(claims_total.clone()))
            .expect("register claims_total");
        registry
            .register(Box::new(rejections_total.clone()))
            .expect("register rejections_total");
        registry
            .register(Box::new(transaction_conflicts_total.clone()))
            .expect("register transaction_conflicts_total");
        registry
            .register(Box::new(offers_expired_total.clone()))
            .expect("register offers_expired_total");
        registry
            .register(Box::new(claim_latency_seconds.clone()))
            .expect("register claim_latency_seconds");

        Self {
            registry,
            claims_total,
            rejections_total,
            transaction_conflicts_total,
            offers_expired_total,
            claim_latency_seconds,
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

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
