//! Cron-driven job runner.
//!
//! Each registered job gets a ticker task that sleeps until the next fire
//! time and spawns the firing on its own task, so a slow firing never delays
//! the schedule of any job. Overlap of the SQL batch with itself is prevented
//! by [`OverlapGuard`]; partition jobs touch disjoint tables and run freely.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Local, NaiveDate};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::batch::BatchReport;
use crate::config::{ConnectionConfig, PartitionTarget, SqlSource};
use crate::error::{ConfigError, ExecError};
use crate::partition::{Granularity, PartitionOutcome, plan};
use crate::session::Executor;

/// A parsed seconds-first cron expression, e.g. `0 */5 * * * *`.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expr: String,
    schedule: cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, ConfigError> {
        let schedule = cron::Schedule::from_str(expr.trim()).map_err(|source| {
            ConfigError::InvalidCron {
                expr: expr.to_string(),
                source,
            }
        })?;
        Ok(Self {
            expr: expr.trim().to_string(),
            schedule,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// First fire time strictly after `now`.
    pub fn next_after(&self, now: &DateTime<Local>) -> Option<DateTime<Local>> {
        self.schedule.after(now).next()
    }
}

/// Lets at most one firing of a job run at a time. A firing that finds the
/// guard taken is dropped, not queued.
#[derive(Debug, Default)]
pub struct OverlapGuard {
    running: AtomicBool,
}

impl OverlapGuard {
    pub fn try_acquire(&self) -> Option<GuardPermit<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GuardPermit { guard: self })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Clears the guard when dropped, including on error and unwind.
#[derive(Debug)]
pub struct GuardPermit<'a> {
    guard: &'a OverlapGuard,
}

impl Drop for GuardPermit<'_> {
    fn drop(&mut self) {
        self.guard.running.store(false, Ordering::Release);
    }
}

/// Runs the configured SQL sources.
#[derive(Debug)]
pub struct BatchJob {
    pub config: ConnectionConfig,
    pub sources: Vec<SqlSource>,
    guard: OverlapGuard,
}

impl BatchJob {
    pub fn new(config: ConnectionConfig, sources: Vec<SqlSource>) -> Self {
        Self {
            config,
            sources,
            guard: OverlapGuard::default(),
        }
    }

    pub fn guard(&self) -> &OverlapGuard {
        &self.guard
    }

    async fn run(&self, executor: &Executor) -> FiringOutcome {
        let Some(_permit) = self.guard.try_acquire() else {
            tracing::info!("previous batch still running, skip this firing");
            return FiringOutcome::Skipped;
        };
        match executor.run_sql_batch(&self.config, &self.sources).await {
            Ok(report) => FiringOutcome::Batch(report),
            Err(e) => FiringOutcome::Failed(e),
        }
    }
}

/// Keeps one table's partitions ahead of time.
#[derive(Debug, Clone)]
pub struct PartitionJob {
    /// Connection settings pointed at `target.database`.
    pub config: ConnectionConfig,
    pub target: PartitionTarget,
    pub granularity: Granularity,
    pub prefix: String,
}

impl PartitionJob {
    pub fn new(
        base: &ConnectionConfig,
        target: PartitionTarget,
        granularity: Granularity,
        prefix: &str,
    ) -> Self {
        Self {
            config: base.with_database(&target.database),
            target,
            granularity,
            prefix: prefix.to_string(),
        }
    }

    /// Plan against `today` and apply. The plan is never reused across firings.
    pub async fn run_at(&self, executor: &Executor, today: NaiveDate) -> FiringOutcome {
        let plan = plan(self.granularity, today, &self.prefix);
        tracing::debug!("planned {} < {} for {}", plan.name, plan.boundary, self.target);
        match executor
            .maintain_partition(&self.config, &self.target, &plan)
            .await
        {
            Ok(outcome) => FiringOutcome::Partition(outcome),
            Err(e) => FiringOutcome::Failed(e),
        }
    }
}

#[derive(Debug)]
pub enum Job {
    Batch(BatchJob),
    Partition(PartitionJob),
}

#[derive(Debug)]
pub enum FiringOutcome {
    /// The batch was already running.
    Skipped,
    Batch(BatchReport),
    Partition(PartitionOutcome),
    Failed(ExecError),
}

impl Job {
    pub fn name(&self) -> String {
        match self {
            Job::Batch(_) => "batch".to_string(),
            Job::Partition(job) => format!("partition:{}", job.target),
        }
    }

    pub async fn run(&self, executor: &Executor) -> FiringOutcome {
        match self {
            Job::Batch(job) => job.run(executor).await,
            Job::Partition(job) => job.run_at(executor, Local::now().date_naive()).await,
        }
    }
}

struct Entry {
    schedule: CronSchedule,
    job: Arc<Job>,
}

pub struct Scheduler {
    executor: Executor,
    entries: Vec<Entry>,
    tickers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(executor: Executor) -> Self {
        Self {
            executor,
            entries: Vec::new(),
            tickers: Vec::new(),
        }
    }

    pub fn add(&mut self, schedule: CronSchedule, job: Job) -> Arc<Job> {
        let job = Arc::new(job);
        self.entries.push(Entry {
            schedule,
            job: job.clone(),
        });
        job
    }

    pub fn jobs(&self) -> impl Iterator<Item = (&CronSchedule, &Arc<Job>)> {
        self.entries.iter().map(|e| (&e.schedule, &e.job))
    }

    /// Spawn one ticker per job. Calling twice without `stop` is a no-op.
    pub fn start(&mut self) {
        if !self.tickers.is_empty() {
            return;
        }
        for entry in &self.entries {
            tracing::info!("scheduling {} at `{}`", entry.job.name(), entry.schedule.expr());
            self.tickers.push(tokio::spawn(tick(
                entry.schedule.clone(),
                entry.job.clone(),
                self.executor.clone(),
            )));
        }
    }

    /// Stop future firings. Firings already running finish on their own.
    pub fn stop(&mut self) {
        for ticker in self.tickers.drain(..) {
            ticker.abort();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn tick(schedule: CronSchedule, job: Arc<Job>, executor: Executor) {
    let mut cursor = Local::now();
    loop {
        let Some(next) = schedule.next_after(&cursor) else {
            tracing::warn!("{} has no upcoming fire time, ticker exits", job.name());
            return;
        };
        let wait = (next - Local::now()).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        let span = tracing::info_span!("job", job = %job.name());
        let firing_job = job.clone();
        let firing_executor = executor.clone();
        tokio::spawn(
            async move {
                match firing_job.run(&firing_executor).await {
                    FiringOutcome::Failed(e) => tracing::warn!(kind = e.kind(), "firing failed: {e}"),
                    outcome => tracing::debug!("firing done: {outcome:?}"),
                }
            }
            .instrument(span),
        );

        // Never before `next`, so an early wake cannot fire the same slot twice.
        cursor = next.max(Local::now());
    }
}
