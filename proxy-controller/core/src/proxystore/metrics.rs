use super::{Set, Store};
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{gauge::ConstGauge, MetricType},
    registry::Registry,
};
use std::sync::Arc;

#[derive(Debug)]
struct Instrumented(Arc<Store>);

pub fn register(reg: &mut Registry, store: Arc<Store>) {
    reg.register_collector(Box::new(Instrumented(store)));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let (rev, counts, synced) = self.0.read(|tree| {
            let counts = Set::ALL.map(|set| (set, tree.count(set)));
            (tree.rev(), counts, tree.all_synced())
        });

        let rev_encoder = encoder.encode_descriptor(
            "revision",
            "The current revision of the proxy store",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(rev as i64).encode(rev_encoder)?;

        let synced_encoder = encoder.encode_descriptor(
            "synced",
            "Whether all sets of the proxy store have been synced",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(synced as i64).encode(synced_encoder)?;

        let mut records_encoder = encoder.encode_descriptor(
            "records",
            "The number of records in the proxy store",
            None,
            MetricType::Gauge,
        )?;
        for (set, count) in counts {
            let labels = vec![("set", set.as_str())];
            let records_encoder = records_encoder.encode_family(&labels)?;
            ConstGauge::new(count as i64).encode(records_encoder)?;
        }

        Ok(())
    }
}
