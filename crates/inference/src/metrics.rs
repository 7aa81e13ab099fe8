use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Prometheus collectors for the serving boundary. A private registry keeps
/// the exposition deterministic in tests and isolated from anything else
/// linked into the process.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Successful predictions served.
    pub predictions_total: IntCounter,
    /// Failed predictions, partitioned by error kind
    /// (validation | checkpoint | numeric | unavailable | internal).
    pub prediction_errors_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let predictions_total = IntCounter::with_opts(Opts::new(
            "sentiment_predictions_total",
            "Total number of predictions served",
        ))?;
        let prediction_errors_total = IntCounterVec::new(
            Opts::new(
                "sentiment_prediction_errors_total",
                "Total number of failed predictions, by error kind",
            ),
            &["kind"],
        )?;

        registry.register(Box::new(predictions_total.clone()))?;
        registry.register(Box::new(prediction_errors_total.clone()))?;

        Ok(Self {
            registry,
            predictions_total,
            prediction_errors_total,
        })
    }

    pub fn record_success(&self) {
        self.predictions_total.inc();
    }

    pub fn record_error(&self, kind: &str) {
        self.prediction_errors_total.with_label_values(&[kind]).inc();
    }

    /// Renders all collectors in Prometheus text exposition format.
    pub fn gather_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
