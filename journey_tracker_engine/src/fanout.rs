//! Update propagation. Every sink gets every published update
//! independently; a failing sink is logged and skipped, never allowed to
//! starve the others or the sampling path. No retry queue: a lost update is
//! superseded by the next tick.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::future::join_all;
use journey_tracker_lib::milestone::MilestoneEvent;
use journey_tracker_lib::position_fix::PositionFix;
use journey_tracker_lib::progress::ProgressSnapshot;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{Result, TrackerError};

/// One propagated tick: the fix, its derived progress, and any milestone
/// fired on the same sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingUpdate {
    pub journey_id: i64,
    pub fix: PositionFix,
    pub snapshot: ProgressSnapshot,
    pub milestone: Option<MilestoneEvent>,
}

/// Anything that can accept a tracking update.
#[async_trait]
pub trait UpdateSink: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, update: &TrackingUpdate) -> anyhow::Result<()>;
}

/// POSTs updates as JSON to a remote ingestion endpoint (dashboard or
/// client-tracking, one instance each).
pub struct RemoteSink {
    name: String,
    endpoint: String,
    client: reqwest::Client,
}

impl RemoteSink {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| TrackerError::Config(format!("failed to build http client: {}", err)))?;

        Ok(Self {
            name: name.into(),
            endpoint: endpoint.into(),
            client,
        })
    }
}

#[async_trait]
impl UpdateSink for RemoteSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, update: &TrackingUpdate) -> anyhow::Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(update)
            .send()
            .await
            .with_context(|| format!("POST {}", self.endpoint))?;

        response.error_for_status().context("ingestion rejected update")?;
        Ok(())
    }
}

/// Broadcasts updates to same-process observers. Observers subscribe and
/// drop receivers freely; the engine never knows who is listening.
pub struct InProcessSink {
    tx: broadcast::Sender<TrackingUpdate>,
}

impl InProcessSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackingUpdate> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl UpdateSink for InProcessSink {
    fn name(&self) -> &str {
        "in_process"
    }

    async fn publish(&self, update: &TrackingUpdate) -> anyhow::Result<()> {
        // A send with no live receivers is not a failure.
        let _ = self.tx.send(update.clone());
        Ok(())
    }
}

/// Delivers each update to every registered sink.
#[derive(Clone)]
pub struct PropagationFanout {
    sinks: Vec<Arc<dyn UpdateSink>>,
}

impl PropagationFanout {
    pub fn new(sinks: Vec<Arc<dyn UpdateSink>>) -> Self {
        Self { sinks }
    }

    pub fn add_sink(&mut self, sink: Arc<dyn UpdateSink>) {
        self.sinks.push(sink);
    }

    /// Deliveries run concurrently and fail independently. Errors are
    /// logged here and go no further up.
    pub async fn publish(&self, update: &TrackingUpdate) {
        let deliveries = self.sinks.iter().map(|sink| async move {
            if let Err(err) = sink.publish(update).await {
                let err = TrackerError::SinkDelivery {
                    sink: sink.name().to_string(),
                    reason: format!("{err:#}"),
                };
                tracing::warn!("{err}");
            }
        });

        join_all(deliveries).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use geo_types::Point;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        delivered: AtomicUsize,
    }

    #[async_trait]
    impl UpdateSink for CountingSink {
        fn name(&self) -> &str {
            "counting"
        }

        async fn publish(&self, _update: &TrackingUpdate) -> anyhow::Result<()> {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl UpdateSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        async fn publish(&self, _update: &TrackingUpdate) -> anyhow::Result<()> {
            anyhow::bail!("endpoint offline")
        }
    }

    fn update() -> TrackingUpdate {
        TrackingUpdate {
            journey_id: 1,
            fix: PositionFix::new(Point::new(10.0, 56.0), 5.0, Utc::now()),
            snapshot: ProgressSnapshot {
                traveled_distance_km: 1.0,
                remaining_distance_km: 2.0,
                progress_percentage: 33.3,
                estimated_hours_remaining: 0.1,
            },
            milestone: None,
        }
    }

    #[tokio::test]
    async fn failing_sink_does_not_starve_the_others() {
        let counting = Arc::new(CountingSink { delivered: AtomicUsize::new(0) });
        let fanout = PropagationFanout::new(vec![
            Arc::new(FailingSink) as Arc<dyn UpdateSink>,
            counting.clone() as Arc<dyn UpdateSink>,
        ]);

        for _ in 0..5 {
            fanout.publish(&update()).await;
        }

        assert_eq!(counting.delivered.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn in_process_sink_reaches_subscribers() {
        let sink = InProcessSink::new(8);
        let mut rx = sink.subscribe();

        sink.publish(&update()).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.journey_id, 1);
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_fine() {
        let sink = InProcessSink::new(8);
        sink.publish(&update()).await.unwrap();
    }
}
