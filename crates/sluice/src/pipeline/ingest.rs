//! The `ingest` loop: pull a row, map it, encode it, publish it.

use sluice_core::emit;
use sluice_core::metrics::events::{PublishFailed, RowEncodeFailed, RowsPublished};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::mapping::RowMapper;
use crate::publish::Publisher;
use crate::source::{IntakeLedger, RecordSource, Row};

/// Counters for one ingest run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub rows_read: u64,
    pub rows_published: u64,
    pub publish_failures: u64,
    pub encode_failures: u64,
    pub list_failures: u64,
    pub files_finished: u64,
}

/// Drives a record source into a publisher until shutdown.
pub struct IngestPipeline<L, P> {
    source: RecordSource<L>,
    mapper: RowMapper,
    publisher: P,
    stats: IngestStats,
}

impl<L: IntakeLedger, P: Publisher> IngestPipeline<L, P> {
    pub fn new(source: RecordSource<L>, mapper: RowMapper, publisher: P) -> Self {
        Self {
            source,
            mapper,
            publisher,
            stats: IngestStats::default(),
        }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Listing failures are logged and retried after the source's wait
    /// interval. Rows that cannot be encoded or published are logged, counted
    /// and dropped; reading continues either way.
    pub async fn run(mut self, shutdown: CancellationToken) -> IngestStats {
        let target = self.source.settings().target.clone();
        let wait_interval = self.source.settings().wait_interval;
        info!(
            target = %target,
            source = %self.source.ledger().location(),
            destination = %self.publisher.destination(),
            "Ingest started"
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = self.source.next_row() => next,
            };

            match next {
                Ok(row) => {
                    self.stats.rows_read += 1;
                    self.forward(&target, row).await;
                }
                Err(e) => {
                    self.stats.list_failures += 1;
                    error!(target = %target, error = %e, "Listing failed, retrying after wait interval");
                    if shutdown
                        .run_until_cancelled(tokio::time::sleep(wait_interval))
                        .await
                        .is_none()
                    {
                        break;
                    }
                }
            }
        }

        self.stats.files_finished = self.source.files_finished();
        let stats = self.stats;
        info!(
            target = %target,
            rows_read = stats.rows_read,
            rows_published = stats.rows_published,
            publish_failures = stats.publish_failures,
            encode_failures = stats.encode_failures,
            files_finished = stats.files_finished,
            "Ingest stopped"
        );
        stats
    }

    async fn forward(&mut self, target: &str, row: Row) {
        let payload = match self.mapper.encode(&row) {
            Ok(payload) => payload,
            Err(e) => {
                self.stats.encode_failures += 1;
                warn!(target = %target, error = %e, "Dropping row that could not be encoded");
                emit!(RowEncodeFailed {
                    target: target.to_string(),
                });
                return;
            }
        };

        match self.publisher.publish(payload).await {
            Ok(()) => {
                self.stats.rows_published += 1;
                emit!(RowsPublished {
                    count: 1,
                    target: target.to_string(),
                });
            }
            Err(e) => {
                self.stats.publish_failures += 1;
                error!(target = %target, error = %e, "Failed to publish row");
                emit!(PublishFailed {
                    target: target.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::SchemaConfig;
    use crate::publish::MemoryPublisher;
    use crate::source::{Archiver, DirectoryLedger, ListingOrder, SourceSettings};
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use sluice_core::storage::{BackendRef, MemoryBackend};
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;

    fn gzip(text: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    fn pipeline(backend: &MemoryBackend, publisher: &MemoryPublisher) -> IngestPipeline<DirectoryLedger, MemoryPublisher> {
        sluice_core::metrics::init_test();
        let storage: BackendRef = Arc::new(backend.clone());
        let archiver = Archiver::new(storage.clone(), "in", "ready", None, "ingest-test");
        let ledger = DirectoryLedger::new(storage, "in", ListingOrder::Native, archiver);
        let source = RecordSource::new(
            ledger,
            SourceSettings {
                wait_interval: Duration::from_secs(10),
                delimiter: b',',
                max_open_failures: 3,
                target: "ingest-test".to_string(),
            },
        );
        let mapper = RowMapper::new(SchemaConfig::default()).unwrap();
        IngestPipeline::new(source, mapper, publisher.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_every_row_then_stops_on_shutdown() {
        let backend = MemoryBackend::new();
        backend.put("in", "a.gz", gzip("01/02/20-03:04:05,01/02/20-04:05:06,5551234567\n,,1\n"));
        let publisher = MemoryPublisher::new();
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(pipeline(&backend, &publisher).run(shutdown.clone()));
        tokio::time::sleep(Duration::from_secs(5)).await;
        shutdown.cancel();
        let stats = handle.await.unwrap();

        assert_eq!(stats.rows_read, 2);
        assert_eq!(stats.rows_published, 2);
        assert_eq!(stats.files_finished, 1);
        assert_eq!(publisher.len(), 2);
        assert_eq!(backend.entries("ready"), vec!["a.gz"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failure_does_not_stop_reading() {
        let backend = MemoryBackend::new();
        backend.put("in", "a.gz", gzip("1,2,3\n4,5,6\n7,8,9\n"));
        let publisher = MemoryPublisher::new();
        publisher.fail_next(1);
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(pipeline(&backend, &publisher).run(shutdown.clone()));
        tokio::time::sleep(Duration::from_secs(5)).await;
        shutdown.cancel();
        let stats = handle.await.unwrap();

        assert_eq!(stats.rows_read, 3);
        assert_eq!(stats.publish_failures, 1);
        assert_eq!(stats.rows_published, 2);
        assert_eq!(backend.entries("ready"), vec!["a.gz"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_failure_is_retried_after_wait() {
        let backend = MemoryBackend::new();
        backend.put("in", "a.gz", gzip("1,2,3\n"));
        backend.fail_next_lists(2);
        let publisher = MemoryPublisher::new();
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(pipeline(&backend, &publisher).run(shutdown.clone()));
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(publisher.is_empty());
        assert_eq!(backend.list_calls(), 2);

        tokio::time::sleep(Duration::from_secs(10)).await;
        shutdown.cancel();
        let stats = handle.await.unwrap();

        assert_eq!(stats.list_failures, 2);
        assert_eq!(stats.rows_published, 1);
    }
}
