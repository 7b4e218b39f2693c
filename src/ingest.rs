//! Ingestion pipeline: bus to store, with idempotent batch-committed writes.

use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::Message;
use thiserror::Error;
use tokio_postgres::{Client, Statement};
use tokio_util::sync::CancellationToken;

use crate::metric::Metric;

const CREATE_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS metric (
    created_at TIMESTAMPTZ PRIMARY KEY,
    tcp_exception TEXT,
    tcp_rt FLOAT,
    http_rt FLOAT,
    initial_rc SMALLINT,
    num_redirects SMALLINT,
    total_rt FLOAT,
    final_rc SMALLINT,
    content_found BOOLEAN
)";

const INSERT_METRIC: &str = "\
INSERT INTO metric
    (created_at, tcp_exception, tcp_rt, http_rt, initial_rc,
     num_redirects, total_rt, final_rc, content_found)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
ON CONFLICT (created_at) DO NOTHING";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("undecodable metric payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Store transactions are committed once every 16 messages, keyed to the
/// bus-assigned offset rather than a local counter so the cadence alignment
/// survives a crash-restart.
pub fn commit_due(offset: i64) -> bool {
    offset & 0xF == 0xF
}

/// One message as delivered by the bus: the payload plus its assigned offset.
struct Delivery {
    offset: i64,
    payload: Option<Vec<u8>>,
}

/// Where messages come from. Seam between the consume loop and the Kafka
/// client so the loop's commit policy can be exercised without a broker.
trait MessageSource {
    async fn next_message(&mut self) -> Result<Delivery, IngestError>;
    /// Record the consumer position on the bus, called only after the
    /// corresponding store transaction has committed.
    fn ack(&mut self) -> Result<(), IngestError>;
}

/// Where metrics go. Same seam, store side.
trait MetricStore {
    async fn begin(&mut self) -> Result<(), IngestError>;
    async fn upsert(&mut self, metric: &Metric) -> Result<(), IngestError>;
    /// Commit the open transaction and open the next one.
    async fn commit_batch(&mut self) -> Result<(), IngestError>;
    /// Commit the open transaction; issued once on shutdown.
    async fn commit_final(&mut self) -> Result<(), IngestError>;
}

/// Create the destination table if it is not there yet.
pub async fn ensure_table(client: &Client) -> Result<(), tokio_postgres::Error> {
    client.batch_execute(CREATE_TABLE).await
}

/// Consume the bus until cancelled, upserting every metric into the store.
///
/// Duplicate deliveries are absorbed by the ON CONFLICT no-op. A decode or
/// write failure propagates immediately and terminates the pipeline: silently
/// dropping a record would leave a trusted-looking gap in the availability
/// history.
pub async fn run(
    consumer: &StreamConsumer,
    client: &Client,
    shutdown: &CancellationToken,
) -> Result<(), IngestError> {
    ensure_table(client).await?;
    let insert = client.prepare(INSERT_METRIC).await?;

    let mut source = KafkaSource { consumer };
    let mut store = PgStore { client, insert };
    consume(&mut source, &mut store, shutdown).await
}

async fn consume<M, S>(
    source: &mut M,
    store: &mut S,
    shutdown: &CancellationToken,
) -> Result<(), IngestError>
where
    M: MessageSource,
    S: MetricStore,
{
    store.begin().await?;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                // Flush whatever the cadence has not committed yet.
                store.commit_final().await?;
                return Ok(());
            }
            delivery = source.next_message() => {
                let delivery = delivery?;
                let payload = delivery.payload.unwrap_or_default();
                if payload.is_empty() {
                    tracing::warn!(offset = delivery.offset, "skipping empty message");
                    continue;
                }

                let metric = Metric::from_wire(&payload)?;
                store.upsert(&metric).await?;

                if commit_due(delivery.offset) {
                    store.commit_batch().await?;
                    source.ack()?;
                }
            }
        }
    }
}

struct KafkaSource<'a> {
    consumer: &'a StreamConsumer,
}

impl MessageSource for KafkaSource<'_> {
    async fn next_message(&mut self) -> Result<Delivery, IngestError> {
        let message = self.consumer.recv().await?;
        Ok(Delivery {
            offset: message.offset(),
            payload: message.payload().map(<[u8]>::to_vec),
        })
    }

    fn ack(&mut self) -> Result<(), IngestError> {
        self.consumer.commit_consumer_state(CommitMode::Async)?;
        Ok(())
    }
}

struct PgStore<'a> {
    client: &'a Client,
    insert: Statement,
}

impl MetricStore for PgStore<'_> {
    async fn begin(&mut self) -> Result<(), IngestError> {
        self.client.batch_execute("BEGIN").await?;
        Ok(())
    }

    async fn upsert(&mut self, metric: &Metric) -> Result<(), IngestError> {
        self.client
            .execute(&self.insert, &[
                &metric.timestamp,
                &metric.tcp_exception,
                &metric.tcp_rt,
                &metric.http_rt,
                &metric.initial_response_code,
                &metric.num_redirects,
                &metric.total_rt,
                &metric.final_response_code,
                &metric.content_found,
            ])
            .await?;
        Ok(())
    }

    async fn commit_batch(&mut self) -> Result<(), IngestError> {
        self.client.batch_execute("COMMIT; BEGIN").await?;
        Ok(())
    }

    async fn commit_final(&mut self) -> Result<(), IngestError> {
        self.client.batch_execute("COMMIT").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[test]
    fn test_commit_cadence() {
        let commits: Vec<i64> = (0..64).filter(|o| commit_due(*o)).collect();
        assert_eq!(commits, vec![15, 31, 47, 63]);
    }

    #[test]
    fn test_decode_wire_payload() {
        let payload = br#"{
            "timestamp": "2024-01-02 03:04:05+0000",
            "tcp_exception": null,
            "tcp_rt": 3.5,
            "http_rt": 20.0,
            "initial_response_code": 301,
            "num_redirects": 1,
            "total_rt": 45.0,
            "final_response_code": 200,
            "content_found": true
        }"#;
        let metric = Metric::from_wire(payload).unwrap();
        assert_eq!(metric.initial_response_code, Some(301));
        assert_eq!(metric.final_response_code, Some(200));
        assert_eq!(metric.num_redirects, 1);
        assert_eq!(metric.content_found, Some(true));
        assert!(metric.tcp_exception.is_none());
    }

    #[test]
    fn test_garbage_payload_is_an_error() {
        assert!(Metric::from_wire(b"not json").is_err());
    }

    #[test]
    fn test_insert_conflicts_are_no_ops() {
        assert!(INSERT_METRIC.contains("ON CONFLICT (created_at) DO NOTHING"));
    }

    /// Yields its scripted deliveries, then cancels the token and pends, so
    /// the consume loop sees every message before the shutdown arm fires.
    struct ScriptedSource {
        deliveries: VecDeque<Delivery>,
        token: CancellationToken,
        acks: usize,
    }

    impl ScriptedSource {
        fn new(offsets_and_payloads: Vec<(i64, Vec<u8>)>, token: CancellationToken) -> Self {
            Self {
                deliveries: offsets_and_payloads
                    .into_iter()
                    .map(|(offset, payload)| Delivery {
                        offset,
                        payload: Some(payload),
                    })
                    .collect(),
                token,
                acks: 0,
            }
        }
    }

    impl MessageSource for ScriptedSource {
        async fn next_message(&mut self) -> Result<Delivery, IngestError> {
            match self.deliveries.pop_front() {
                Some(delivery) => Ok(delivery),
                None => {
                    self.token.cancel();
                    std::future::pending().await
                }
            }
        }

        fn ack(&mut self) -> Result<(), IngestError> {
            self.acks += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        ops: Vec<&'static str>,
    }

    impl MetricStore for RecordingStore {
        async fn begin(&mut self) -> Result<(), IngestError> {
            self.ops.push("BEGIN");
            Ok(())
        }

        async fn upsert(&mut self, _metric: &Metric) -> Result<(), IngestError> {
            self.ops.push("INSERT");
            Ok(())
        }

        async fn commit_batch(&mut self) -> Result<(), IngestError> {
            self.ops.push("COMMIT; BEGIN");
            Ok(())
        }

        async fn commit_final(&mut self) -> Result<(), IngestError> {
            self.ops.push("COMMIT");
            Ok(())
        }
    }

    fn wire_metric() -> Vec<u8> {
        Metric::new().to_wire().unwrap()
    }

    #[tokio::test]
    async fn test_shutdown_flushes_unaligned_batch() {
        let token = CancellationToken::new();
        let mut source = ScriptedSource::new(
            vec![(0, wire_metric()), (1, wire_metric()), (2, wire_metric())],
            token.clone(),
        );
        let mut store = RecordingStore::default();

        consume(&mut source, &mut store, &token).await.unwrap();

        // No offset hit the cadence trigger, so the only commit is the
        // shutdown flush.
        assert_eq!(store.ops, vec!["BEGIN", "INSERT", "INSERT", "INSERT", "COMMIT"]);
        assert_eq!(source.acks, 0);
    }

    #[tokio::test]
    async fn test_offset_aligned_commit_then_shutdown_flush() {
        let token = CancellationToken::new();
        let mut source = ScriptedSource::new(
            vec![(14, wire_metric()), (15, wire_metric()), (16, wire_metric())],
            token.clone(),
        );
        let mut store = RecordingStore::default();

        consume(&mut source, &mut store, &token).await.unwrap();

        assert_eq!(
            store.ops,
            vec!["BEGIN", "INSERT", "INSERT", "COMMIT; BEGIN", "INSERT", "COMMIT"]
        );
        // The bus position is recorded once, right after the store commit.
        assert_eq!(source.acks, 1);
    }

    #[tokio::test]
    async fn test_empty_payload_is_skipped() {
        let token = CancellationToken::new();
        let mut source = ScriptedSource::new(
            vec![(0, Vec::new()), (1, wire_metric())],
            token.clone(),
        );
        let mut store = RecordingStore::default();

        consume(&mut source, &mut store, &token).await.unwrap();

        assert_eq!(store.ops, vec!["BEGIN", "INSERT", "COMMIT"]);
    }

    #[tokio::test]
    async fn test_undecodable_message_halts_without_commit() {
        let token = CancellationToken::new();
        let mut source =
            ScriptedSource::new(vec![(0, b"not json".to_vec())], token.clone());
        let mut store = RecordingStore::default();

        let err = consume(&mut source, &mut store, &token).await.unwrap_err();
        assert!(matches!(err, IngestError::Decode(_)));
        // The failed batch is never committed.
        assert_eq!(store.ops, vec!["BEGIN"]);
    }
}
