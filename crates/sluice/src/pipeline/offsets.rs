//! The `offsets` command: print partition offsets of a topic on an interval.

use async_trait::async_trait;
use rskafka::client::Client;
use rskafka::client::partition::{OffsetAt, UnknownTopicHandling};
use snafu::prelude::*;
use std::io::Write;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::StartOffset;
use crate::error::{KafkaSnafu, PipelineError, PublishError};

/// Partition metadata and offset lookups.
#[async_trait]
pub trait OffsetLookup: Send + Sync {
    async fn partitions(&self, topic: &str) -> Result<Vec<i32>, PublishError>;

    async fn offset(&self, topic: &str, partition: i32, at: StartOffset) -> Result<i64, PublishError>;
}

#[async_trait]
impl OffsetLookup for Client {
    async fn partitions(&self, topic: &str) -> Result<Vec<i32>, PublishError> {
        let topics = self.list_topics().await.context(KafkaSnafu { topic, partition: -1 })?;
        topics
            .into_iter()
            .find(|t| t.name == topic)
            .map(|t| t.partitions.into_iter().collect())
            .ok_or_else(|| PublishError::UnknownTopic {
                topic: topic.to_string(),
            })
    }

    async fn offset(&self, topic: &str, partition: i32, at: StartOffset) -> Result<i64, PublishError> {
        let context = KafkaSnafu { topic, partition };
        let client = self
            .partition_client(topic, partition, UnknownTopicHandling::Error)
            .await
            .context(context)?;
        let at = match at {
            StartOffset::Earliest => OffsetAt::Earliest,
            StartOffset::Latest => OffsetAt::Latest,
        };
        client.get_offset(at).await.context(context)
    }
}

/// How often and how many times to print.
#[derive(Debug, Clone, Copy)]
pub struct OffsetSchedule {
    pub at: StartOffset,
    pub interval: Duration,
    /// Rounds to print; negative repeats until shutdown, zero prints once.
    pub count: i64,
}

/// Print `topic:partition:offset` lines for every partition of `topic`.
///
/// A failed lookup for one partition is logged and the others still print.
pub async fn print_offsets<C, W>(
    lookup: &C,
    topic: &str,
    schedule: OffsetSchedule,
    mut out: W,
    shutdown: CancellationToken,
) -> Result<(), PipelineError>
where
    C: OffsetLookup + ?Sized,
    W: Write,
{
    let partitions = lookup.partitions(topic).await?;
    let mut round: i64 = 0;

    loop {
        for &partition in &partitions {
            match lookup.offset(topic, partition, schedule.at).await {
                Ok(offset) => {
                    writeln!(out, "{topic}:{partition}:{offset}")
                        .and_then(|()| out.flush())
                        .map_err(csv::Error::from)
                        .context(crate::error::OutputSnafu)?;
                }
                Err(e) => warn!(topic, partition, error = %e, "Offset lookup failed"),
            }
        }

        round += 1;
        if schedule.count >= 0 && round >= schedule.count.max(1) {
            return Ok(());
        }
        if shutdown
            .run_until_cancelled(tokio::time::sleep(schedule.interval))
            .await
            .is_none()
        {
            return Ok(());
        }
    }
}
