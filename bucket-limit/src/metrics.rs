use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use opentelemetry::metrics::Meter;

#[derive(Clone, Debug)]
pub(crate) struct RegistryMetrics {
    requests: Counter<u64>,
    buckets_created: Counter<u64>,
    buckets_evicted: Counter<u64>,
}

impl RegistryMetrics {
    pub(crate) fn new() -> Self {
        Self::from_meter(&global::meter("bucket_limit"))
    }

    pub(crate) fn from_meter(meter: &Meter) -> Self {
        Self {
            requests: meter
                .u64_counter("bucket_limit.requests")
                .with_description("Admission checks, by outcome")
                .build(),
            buckets_created: meter
                .u64_counter("bucket_limit.buckets_created")
                .with_description("Buckets created for previously unseen clients")
                .build(),
            buckets_evicted: meter
                .u64_counter("bucket_limit.buckets_evicted")
                .with_description("Idle buckets removed by eviction passes")
                .build(),
        }
    }

    pub(crate) fn record_admission(&self, allowed: bool) {
        let outcome = if allowed { "allowed" } else { "denied" };
        self.requests.add(1, &[KeyValue::new("outcome", outcome)]);
    }

    pub(crate) fn record_created(&self) {
        self.buckets_created.add(1, &[]);
    }

    pub(crate) fn record_evicted(&self, count: usize) {
        if count > 0 {
            self.buckets_evicted.add(count as u64, &[]);
        }
    }
}
