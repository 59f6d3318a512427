use lazy_static::lazy_static;
use prometheus::{self, Encoder, IntCounterVec, Opts, Registry};

lazy_static! {
    // Registry for holding metric state
    pub static ref REGISTRY: Registry = Registry::new();
    // Records produced by splitting, labelled by transform
    pub static ref RECORDS_SPLIT: IntCounterVec = IntCounterVec::new(
        Opts::new("records_split", "The number of records produced by splitting chunks"),
        &["transform"]
    ).unwrap();
    // Records produced by consolidation, labelled by transform
    pub static ref RECORDS_CONSOLIDATED: IntCounterVec = IntCounterVec::new(
        Opts::new("records_consolidated", "The number of records produced by consolidating chunks"),
        &["transform"]
    ).unwrap();
    // Groups delivered by the shuffle
    pub static ref GROUPS_SHUFFLED: IntCounterVec = IntCounterVec::new(
        Opts::new("groups_shuffled", "The number of groups produced by group-by-key shuffles"),
        &["engine"]
    ).unwrap();
}

/// Register the metrics with the registry.
///
/// Call once during process setup. Counters are updated whether or not they are registered.
pub fn register_metrics() {
    REGISTRY.register(Box::new(RECORDS_SPLIT.clone())).unwrap();
    REGISTRY
        .register(Box::new(RECORDS_CONSOLIDATED.clone()))
        .unwrap();
    REGISTRY.register(Box::new(GROUPS_SHUFFLED.clone())).unwrap();
}

/// Returns the registered metrics in the Prometheus text format.
pub fn gather() -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();

    encoder.encode(&REGISTRY.gather(), &mut buffer).unwrap();

    String::from_utf8(buffer).unwrap()
}

/// Count records produced by splitting.
pub fn record_split(transform: &str, records: usize) {
    RECORDS_SPLIT
        .with_label_values(&[transform])
        .inc_by(records as u64);
}

/// Count records produced by consolidation.
pub fn record_consolidated(transform: &str, records: usize) {
    RECORDS_CONSOLIDATED
        .with_label_values(&[transform])
        .inc_by(records as u64);
}

/// Count groups produced by a shuffle.
pub fn record_groups(engine: &str, groups: usize) {
    GROUPS_SHUFFLED
        .with_label_values(&[engine])
        .inc_by(groups as u64);
}
