//! Periodic reading producer.
//!
//! Each cycle walks the active locations, produces a reading, records it as
//! the location's snapshot and publishes the envelope. A failure for one
//! location is logged and counted; the cycle moves on to the next.

pub mod catalog;
pub mod source;

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use skycast_core::{Location, LocationKey, ServerMessage};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::errors::{FeedError, SnapshotError};
use crate::gateway::{BroadcastGateway, PublishOutcome};
use crate::metrics::{FEED_CYCLE_DURATION_SECONDS, FEED_CYCLES_TOTAL, FEED_FAILURES_TOTAL, FEED_READINGS_TOTAL};
use crate::snapshot::SnapshotStore;

pub use catalog::{LocationCatalog, StaticCatalog};
pub use source::{ReadingSource, SimulatedSource};

/// Summary of one production cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Locations a reading was recorded and published for.
    pub published: usize,
    /// Deliveries made by synchronous gateways.
    pub delivered: usize,
    /// Per-location failures, in catalog order.
    pub failures: Vec<(LocationKey, FeedError)>,
}

/// Produces and publishes one reading per active location per interval.
pub struct FeedGenerator {
    catalog: Arc<dyn LocationCatalog>,
    source: Arc<dyn ReadingSource>,
    snapshots: Arc<dyn SnapshotStore>,
    gateway: Arc<dyn BroadcastGateway>,
    interval: Duration,
}

impl FeedGenerator {
    /// Create a generator.
    pub fn new(
        catalog: Arc<dyn LocationCatalog>,
        source: Arc<dyn ReadingSource>,
        snapshots: Arc<dyn SnapshotStore>,
        gateway: Arc<dyn BroadcastGateway>,
        interval: Duration,
    ) -> Self {
        Self {
            catalog,
            source,
            snapshots,
            gateway,
            interval,
        }
    }

    /// Time between cycles.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one cycle over every active location.
    #[instrument(skip_all)]
    pub async fn run_cycle(&self) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::default();

        for location in self.catalog.active_locations() {
            match self.produce_one(&location).await {
                Ok(outcome) => {
                    report.published += 1;
                    if let PublishOutcome::Delivered(fanout) = outcome {
                        report.delivered += fanout.delivered;
                    }
                }
                Err(e) => {
                    warn!(location = %location.key(), error = %e, "feed failed for location, continuing");
                    counter!(FEED_FAILURES_TOTAL).increment(1);
                    report.failures.push((location.key().clone(), e));
                }
            }
        }

        counter!(FEED_CYCLES_TOTAL).increment(1);
        histogram!(FEED_CYCLE_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        info!(
            published = report.published,
            delivered = report.delivered,
            failed = report.failures.len(),
            "feed cycle complete"
        );
        report
    }

    async fn produce_one(&self, location: &Location) -> Result<PublishOutcome, FeedError> {
        let key = location.key();
        let reading = Arc::new(self.source.produce(location)?);
        let snapshots = self.snapshots.clone();
        let (record_key, record_reading) = (key.clone(), reading.clone());
        tokio::task::spawn_blocking(move || snapshots.record(&record_key, record_reading))
            .await
            .map_err(|e| SnapshotError::Task(e.to_string()))??;
        let payload = ServerMessage::WeatherUpdate(reading.as_ref().clone()).to_json()?;
        let outcome = self.gateway.publish(key, Arc::new(payload)).await?;
        counter!(FEED_READINGS_TOTAL).increment(1);
        debug!(
            location = %key,
            temperature = reading.temperature,
            condition = %reading.condition,
            "published reading"
        );
        Ok(outcome)
    }

    /// Run cycles until `cancel` fires. The first cycle runs immediately.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "feed generator started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let _ = self.run_cycle().await;
                }
            }
        }
        info!("feed generator stopped");
    }
}
