use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::collections::HashSet;

pub struct Metrics {
    request_counter: Counter<u64>,
    prediction_duration: Histogram<u64>,
    frames_processed: Counter<u64>,
    detections: Counter<u64>,
    // Dropping the last provider handle shuts the exporter down.
    _provider: SdkMeterProvider,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = SdkMeterProvider::builder().with_reader(exporter).build();

        let meter = provider.meter("yolo_media_prediction");
        global::set_meter_provider(provider.clone());

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of prediction requests")
            .build();

        let boundaries = generate_boundaries((15, 30, 60, 500, 1000));

        let prediction_duration = meter
            .u64_histogram("prediction_duration_ms")
            .with_boundaries(boundaries)
            .with_description("Duration of prediction requests in milliseconds")
            .build();

        let frames_processed = meter
            .u64_counter("frames_processed_total")
            .with_description("Video frames passed through the model")
            .build();

        let detections = meter
            .u64_counter("detections_total")
            .with_description("Objects detected across all requests")
            .build();

        Ok(Metrics {
            request_counter,
            prediction_duration,
            frames_processed,
            detections,
            _provider: provider,
            registry,
        })
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_prediction_duration(&self, duration_ms: u64, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.prediction_duration.record(duration_ms, &attributes);
    }

    pub fn record_detections(&self, count: usize, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.detections.add(count as u64, &attributes);
    }

    pub fn record_frames(&self, count: u64) {
        self.frames_processed.add(count, &[]);
    }
}

fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 10;
    let middle_step: usize = 2;
    let end_step: usize = 20;
    let tail_step: usize = 100;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}
