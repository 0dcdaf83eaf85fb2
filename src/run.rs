use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::FutureExt;
use shardhist::ShardedHistogram;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::configuration::BenchDescription;
use crate::distribution::DistributionContext;

const REPORT_INTERVAL: Duration = Duration::from_secs(1);
const CATCH_UPPER_INTERVAL: Duration = Duration::from_millis(100);

struct WorkerContext {
    config: Arc<BenchDescription>,
    next_operation_id: AtomicU64,

    rate_limiter: Option<RateLimiter>,
    histogram: ShardedHistogram,
}

struct RateLimiter {
    base: Instant,
    increment: u64,
    microseconds: AtomicU64,
}

impl RateLimiter {
    pub fn new(base: Instant, ops_per_sec: u64) -> Self {
        Self {
            microseconds: 0.into(),
            base,
            increment: 1_000_000 / ops_per_sec,
        }
    }

    /// Waits for the next slot and returns the time the operation was
    /// scheduled to start at.
    pub async fn wait(&self) -> Instant {
        let micros = self
            .microseconds
            .fetch_add(self.increment, Ordering::Relaxed);
        let start_at = self.base + Duration::from_micros(micros);

        tokio::time::sleep_until(start_at).await;
        start_at
    }

    // Pushes the schedule forward when workers lag too far behind it, so
    // that after a stall the limiter does not burst to catch up. The lag
    // that was skipped is still accounted for by recording with the
    // expected interval.
    pub async fn run_catch_upper(&self) {
        let max_allowed_lag = Duration::from_millis(250);

        loop {
            tokio::time::sleep(CATCH_UPPER_INTERVAL).await;
            let now = Instant::now();
            let micros = self.microseconds.load(Ordering::Relaxed);
            let status = self.base + Duration::from_micros(micros);
            let lag = now
                .checked_duration_since(status)
                .unwrap_or_else(|| Duration::from_secs(0));

            if lag > max_allowed_lag {
                let adjustment = (lag - max_allowed_lag).as_micros() as u64;
                self.microseconds.fetch_add(adjustment, Ordering::Relaxed);
            }
        }
    }
}

impl WorkerContext {
    pub fn new(config: Arc<BenchDescription>) -> Result<Self> {
        let rate_limiter = config
            .rate_limit_per_second
            .map(|limit| RateLimiter::new(Instant::now(), limit.get()));
        let histogram = ShardedHistogram::from_config(config.histogram)?;

        Ok(Self {
            config,
            next_operation_id: 0.into(),
            rate_limiter,
            histogram,
        })
    }

    pub fn issue_operation_id(&self) -> Option<u64> {
        let id = self.next_operation_id.fetch_add(1, Ordering::Relaxed);
        if id >= self.config.operation_count {
            return None;
        }
        Some(id)
    }

    /// Interval between operations the limiter aims for, in microseconds,
    /// or 0 when unlimited.
    pub fn expected_interval(&self) -> i64 {
        self.rate_limiter
            .as_ref()
            .map_or(0, |limiter| limiter.increment as i64)
    }

    /// Waits for the operation's slot and returns how late it started,
    /// in microseconds.
    pub async fn rate_limit(&self) -> u64 {
        match &self.rate_limiter {
            Some(limiter) => {
                let scheduled = limiter.wait().await;
                Instant::now()
                    .saturating_duration_since(scheduled)
                    .as_micros() as u64
            }
            None => 0,
        }
    }

    pub async fn run_catch_upper(self: Arc<Self>) {
        if let Some(limiter) = &self.rate_limiter {
            limiter.run_catch_upper().await
        }
    }

    pub fn run_operation(&self, ctx: &mut DistributionContext, lag: u64) -> Result<()> {
        let latency = self.config.latency_dist.get_u64(ctx).saturating_add(lag);
        let latency = i64::try_from(latency).unwrap_or(i64::MAX);
        self.histogram
            .record_with_interval(latency, self.expected_interval())?;
        Ok(())
    }
}

struct ProgressReporter {
    context: Arc<WorkerContext>,
    start_time: Instant,
    next_report: Instant,
}

impl ProgressReporter {
    pub fn new(context: Arc<WorkerContext>) -> Self {
        let now = Instant::now();
        Self {
            context,
            start_time: now,
            next_report: now + REPORT_INTERVAL,
        }
    }

    pub async fn wait_and_print_report(&mut self) {
        tokio::time::sleep_until(self.next_report).await;
        self.next_report += REPORT_INTERVAL;
        self.print_report();
    }

    fn print_report(&self) {
        let data = self.context.histogram.query_data();
        info!(
            elapsed = ?self.start_time.elapsed(),
            recorded = data.total_count(),
            p50_us = data.value_at_percentile(50.0),
            p99_us = data.value_at_percentile(99.0),
            max_us = data.max().unwrap_or(0),
            "progress"
        );
    }
}

fn print_summary(context: &WorkerContext) {
    let histogram = &context.histogram;
    let data = histogram.query_data();
    info!(
        recorded = data.total_count(),
        shards = histogram.shard_count(),
        mean_us = data.mean().unwrap_or(0.0),
        min_us = data.min().unwrap_or(0),
        p50_us = data.value_at_percentile(50.0),
        p90_us = data.value_at_percentile(90.0),
        p99_us = data.value_at_percentile(99.0),
        p999_us = data.value_at_percentile(99.9),
        max_us = data.max().unwrap_or(0),
        "latency summary"
    );
    if histogram.has_overflowed() {
        warn!("some histogram cells saturated; their counts are lower bounds");
    }
}

pub async fn run(config: Arc<BenchDescription>) -> Result<()> {
    let context = Arc::new(WorkerContext::new(config.clone())?);
    let mut handles = Vec::with_capacity(config.concurrency.into());

    for worker in 0usize..config.concurrency.into() {
        let context = context.clone();

        handles.push(async move {
            let res: Result<Result<()>, tokio::task::JoinError> = tokio::spawn(async move {
                let mut ctx = DistributionContext::for_worker(worker as u64);
                while context.issue_operation_id().is_some() {
                    let lag = context.rate_limit().await;
                    context.run_operation(&mut ctx, lag)?;
                }
                Ok::<(), anyhow::Error>(())
            })
            .await;
            res.map_err(|err| err.into()).and_then(|res| res)
        });
    }

    let wait_for_handles = futures::future::try_join_all(handles);
    tokio::pin!(wait_for_handles);

    let mut progress_reporter = ProgressReporter::new(context.clone());
    let _catch_upper_handle = tokio::spawn(context.clone().run_catch_upper()).remote_handle();

    loop {
        tokio::select! {
            biased;

            res = &mut wait_for_handles => {
                res?;
                break;
            }

            _ = progress_reporter.wait_and_print_report() => {}
        }
    }

    print_summary(&context);

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use shardhist::Config;

    use super::*;
    use crate::distribution::FixedDistribution;

    fn description(operations: u64, rate: Option<u64>) -> Arc<BenchDescription> {
        Arc::new(BenchDescription {
            operation_count: operations,
            concurrency: NonZeroUsize::new(4).unwrap(),
            rate_limit_per_second: rate.and_then(std::num::NonZeroU64::new),
            latency_dist: Arc::new(FixedDistribution(100)),
            histogram: Config::new(3_600_000_000, 3),
        })
    }

    #[test]
    fn test_issue_operation_ids() {
        let context = WorkerContext::new(description(3, None)).unwrap();
        assert_eq!(context.issue_operation_id(), Some(0));
        assert_eq!(context.issue_operation_id(), Some(1));
        assert_eq!(context.issue_operation_id(), Some(2));
        assert_eq!(context.issue_operation_id(), None);
        assert_eq!(context.expected_interval(), 0);
    }

    #[test]
    fn test_operation_backfills_lag() {
        let context = WorkerContext::new(description(10, Some(10_000))).unwrap();
        assert_eq!(context.expected_interval(), 100);

        let mut ctx = DistributionContext::for_worker(0);
        context.run_operation(&mut ctx, 400).unwrap();

        // 500us of latency against a 100us schedule: 500, 400, 300, 200, 100.
        let data = context.histogram.query_data();
        assert_eq!(data.total_count(), 5);
        assert_eq!(data.min(), Some(100));
        assert_eq!(data.max(), Some(500));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_records_every_operation() {
        let config = description(1_000, None);
        let context = Arc::new(WorkerContext::new(config).unwrap());

        let mut handles = Vec::new();
        for worker in 0..4u64 {
            let context = context.clone();
            handles.push(tokio::spawn(async move {
                let mut ctx = DistributionContext::for_worker(worker);
                while context.issue_operation_id().is_some() {
                    let lag = context.rate_limit().await;
                    context.run_operation(&mut ctx, lag).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let data = context.histogram.query_data();
        assert_eq!(data.total_count(), 1_000);
        assert_eq!(data.count_at(100).unwrap(), 1_000);
    }
}
