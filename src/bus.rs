//! Kafka client construction and the publish path.

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use thiserror::Error;

use crate::config::KafkaConfig;
use crate::metric::Metric;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("cannot serialize metric: {0}")]
    Serialize(#[from] serde_json::Error),
}

fn client_config(cfg: &KafkaConfig) -> ClientConfig {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", &cfg.hosts);
    if let (Some(ca), Some(cert), Some(key)) = (&cfg.cafile, &cfg.certfile, &cfg.keyfile) {
        config
            .set("security.protocol", "ssl")
            .set("ssl.ca.location", ca.display().to_string())
            .set("ssl.certificate.location", cert.display().to_string())
            .set("ssl.key.location", key.display().to_string());
    }
    config
}

/// Build the probe-side producer.
pub fn producer(cfg: &KafkaConfig) -> Result<FutureProducer, BusError> {
    Ok(client_config(cfg).create()?)
}

/// Build the ingestion-side consumer, subscribed to the configured topic.
///
/// Auto-commit is off: offsets are committed only after the corresponding
/// store transaction commits, so a restart replays at most one uncommitted
/// batch (absorbed downstream by the idempotent insert).
pub fn consumer(cfg: &KafkaConfig) -> Result<StreamConsumer, BusError> {
    let consumer: StreamConsumer = client_config(cfg)
        .set("group.id", &cfg.group)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .create()?;
    consumer.subscribe(&[&cfg.topic])?;
    Ok(consumer)
}

/// Serialize a metric once and hand it to the bus.
pub async fn publish(
    producer: &FutureProducer,
    topic: &str,
    metric: &Metric,
) -> Result<(), BusError> {
    let payload = metric.to_wire()?;
    producer
        .send(
            FutureRecord::<(), Vec<u8>>::to(topic).payload(&payload),
            Timeout::Never,
        )
        .await
        .map_err(|(e, _)| BusError::Kafka(e))?;
    Ok(())
}
