//! Usage aggregator scheduling over tokio-cron-scheduler.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use chainwatch_core::usage::UsageAggregator;

/// Bound on a single drain cycle; an overrunning tick is abandoned and
/// retried on the next firing.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Run one bounded flush cycle.
pub async fn flush_with_timeout(aggregator: &UsageAggregator) {
    match tokio::time::timeout(FLUSH_TIMEOUT, aggregator.flush_once(Utc::now())).await {
        Ok(rows) => tracing::debug!(rows, "scheduled usage flush finished"),
        Err(_) => tracing::warn!("usage flush overran its budget, abandoning tick"),
    }
}

/// Start the five-minute aggregator schedule. Returns the scheduler so
/// shutdown can stop it cleanly.
pub async fn start_aggregator(
    aggregator: Arc<UsageAggregator>,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    let job = Job::new_async("0 */5 * * * *", move |_uuid, _lock| {
        let aggregator = aggregator.clone();
        Box::pin(async move {
            flush_with_timeout(&aggregator).await;
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;
    tracing::info!("usage aggregator scheduled every 5 minutes");
    Ok(scheduler)
}
