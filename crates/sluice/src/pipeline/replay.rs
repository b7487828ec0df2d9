//! The `replay` loop: topic partition back to CSV on an output stream.

use async_trait::async_trait;
use rskafka::client::partition::{OffsetAt, PartitionClient, UnknownTopicHandling};
use snafu::prelude::*;
use sluice_core::emit;
use sluice_core::metrics::events::RecordsReplayed;
use std::io::Write;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{KafkaConfig, ReplayConfig, StartOffset};
use crate::error::{KafkaSnafu, OutputSnafu, PipelineError, PublishError};
use crate::mapping::RowMapper;
use crate::publish::connect;

/// Upper bound on bytes returned by one fetch.
const MAX_FETCH_BYTES: i32 = 1_000_000;

/// Yields batches of raw payloads from a broker.
#[async_trait]
pub trait RecordFetcher: Send {
    /// The next batch, waiting up to `max_wait`. An empty batch means nothing arrived.
    async fn fetch(&mut self, max_wait: Duration) -> Result<Vec<Vec<u8>>, PublishError>;
}

/// Sequential reader of one topic partition.
pub struct KafkaFetcher {
    client: PartitionClient,
    topic: String,
    partition: i32,
    offset: i64,
}

impl KafkaFetcher {
    pub async fn connect(config: &KafkaConfig, start: StartOffset) -> Result<Self, PublishError> {
        let context = KafkaSnafu {
            topic: config.topic.as_str(),
            partition: config.partition,
        };
        let client = connect(&config.brokers)
            .await?
            .partition_client(config.topic.clone(), config.partition, UnknownTopicHandling::Error)
            .await
            .context(context)?;

        let at = match start {
            StartOffset::Earliest => OffsetAt::Earliest,
            StartOffset::Latest => OffsetAt::Latest,
        };
        let offset = client.get_offset(at).await.context(context)?;
        info!(topic = %config.topic, partition = config.partition, offset, "Replay starting");

        Ok(Self {
            client,
            topic: config.topic.clone(),
            partition: config.partition,
            offset,
        })
    }
}

#[async_trait]
impl RecordFetcher for KafkaFetcher {
    async fn fetch(&mut self, max_wait: Duration) -> Result<Vec<Vec<u8>>, PublishError> {
        let max_wait_ms = i32::try_from(max_wait.as_millis()).unwrap_or(i32::MAX);
        let (records, high_watermark) = self
            .client
            .fetch_records(self.offset, 1..MAX_FETCH_BYTES, max_wait_ms)
            .await
            .context(KafkaSnafu {
                topic: self.topic.as_str(),
                partition: self.partition,
            })?;
        debug!(offset = self.offset, high_watermark, fetched = records.len(), "Fetched records");

        if let Some(last) = records.last() {
            self.offset = last.offset + 1;
        }
        Ok(records
            .into_iter()
            .filter_map(|r| r.record.value)
            .collect())
    }
}

/// Decode fetched payloads and write them as CSV rows to `out`.
///
/// Stops after `config.count` records (0 = no limit), when a fetch comes back
/// empty, or on shutdown. Payloads that fail to decode are logged and skipped.
/// Returns the number of rows written.
pub async fn replay<F, W>(
    fetcher: &mut F,
    mapper: &RowMapper,
    config: &ReplayConfig,
    out: W,
    shutdown: CancellationToken,
) -> Result<u64, PipelineError>
where
    F: RecordFetcher,
    W: Write,
{
    let mut writer = csv::Writer::from_writer(out);
    let mut written = 0u64;
    let limit = (config.count > 0).then_some(config.count);

    'fetch: loop {
        let batch = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            batch = fetcher.fetch(config.max_poll_timeout()) => batch?,
        };
        if batch.is_empty() {
            info!(timeout_secs = config.max_poll_timeout_secs, "No records within poll timeout");
            break;
        }

        for payload in batch {
            let fields = match mapper.decode(&payload) {
                Ok(fields) => fields,
                Err(e) => {
                    warn!(error = %e, "Skipping payload that could not be decoded");
                    continue;
                }
            };
            writer.write_record(&fields).context(OutputSnafu)?;
            writer.flush().map_err(csv::Error::from).context(OutputSnafu)?;
            written += 1;
            emit!(RecordsReplayed { count: 1 });

            if limit.is_some_and(|limit| written >= limit) {
                break 'fetch;
            }
        }
    }

    info!(rows = written, "Replay finished");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::SchemaConfig;
    use crate::source::Row;
    use std::collections::VecDeque;

    struct ScriptedFetcher {
        batches: VecDeque<Vec<Vec<u8>>>,
        calls: usize,
    }

    impl ScriptedFetcher {
        fn new(batches: Vec<Vec<Vec<u8>>>) -> Self {
            Self {
                batches: batches.into(),
                calls: 0,
            }
        }
    }

    #[async_trait]
    impl RecordFetcher for ScriptedFetcher {
        async fn fetch(&mut self, _max_wait: Duration) -> Result<Vec<Vec<u8>>, PublishError> {
            self.calls += 1;
            Ok(self.batches.pop_front().unwrap_or_default())
        }
    }

    fn encode(mapper: &RowMapper, cells: &[&str]) -> Vec<u8> {
        mapper.encode(&cells.iter().copied().collect::<Row>()).unwrap()
    }

    fn mapper() -> RowMapper {
        sluice_core::metrics::init_test();
        RowMapper::new(SchemaConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_writes_csv_until_empty_fetch() {
        let mapper = mapper();
        let mut fetcher = ScriptedFetcher::new(vec![
            vec![encode(&mapper, &["01/02/20-03:04:05", "", "5551234567"])],
            vec![
                encode(&mapper, &["", "", "7"]),
                b"\xff\xff\xff".to_vec(),
                [encode(&mapper, &["", "", "8"]), vec![0xde, 0xad]].concat(),
            ],
        ]);
        let mut out = Vec::new();

        let written = replay(&mut fetcher, &mapper, &ReplayConfig::default(), &mut out, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(fetcher.calls, 3);
        assert_eq!(String::from_utf8(out).unwrap(), "1577934245,,5551234567\n,,7\n");
    }

    #[tokio::test]
    async fn test_stops_at_count() {
        let mapper = mapper();
        let batch = (0..5).map(|i| encode(&mapper, &["", "", &i.to_string()])).collect();
        let mut fetcher = ScriptedFetcher::new(vec![batch]);
        let config = ReplayConfig {
            count: 3,
            ..ReplayConfig::default()
        };
        let mut out = Vec::new();

        let written = replay(&mut fetcher, &mapper, &config, &mut out, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(written, 3);
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_before_fetch() {
        let mapper = mapper();
        let mut fetcher = ScriptedFetcher::new(vec![vec![encode(&mapper, &["", "", "1"])]]);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let written = replay(&mut fetcher, &mapper, &ReplayConfig::default(), Vec::new(), shutdown)
            .await
            .unwrap();

        assert_eq!(written, 0);
        assert_eq!(fetcher.calls, 0);
    }
}
