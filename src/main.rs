use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, Mutex};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use mysql_cron::alert;
use mysql_cron::error::ExecError;
use mysql_cron::scheduler::{BatchJob, FiringOutcome, Job, PartitionJob, Scheduler};
use mysql_cron::{Cli, Executor, MySqlConnector};

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mysql_cron=info"));
    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    Ok(())
}

/// Wait for Ctrl-C or, on unix, SIGTERM. Returns the signal's name.
async fn shutdown_signal() -> anyhow::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                return tokio::select! {
                    res = tokio::signal::ctrl_c() => res.map(|_| "SIGINT").map_err(Into::into),
                    _ = sigterm.recv() => Ok("SIGTERM"),
                };
            }
            Err(e) => tracing::warn!("register SIGTERM handler failed: {e}, only Ctrl-C stops the process"),
        }
    }
    tokio::signal::ctrl_c().await?;
    Ok("SIGINT")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref())?;

    let settings = match cli.into_settings() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!("invalid configuration: {e}");
            return Err(e.into());
        }
    };

    let alerts = alert::from_settings(&settings.alert);
    let executor = Executor::new(Arc::new(MySqlConnector), alerts.clone());

    let mut scheduler = Scheduler::new(executor.clone());
    let batch = scheduler.add(
        settings.batch_schedule.clone(),
        Job::Batch(BatchJob::new(
            settings.connection.clone(),
            settings.sources.clone(),
        )),
    );
    if let Some(partitions) = &settings.partitions {
        tracing::info!(
            "maintaining {} table(s) by {} with prefix `{}`",
            partitions.targets.len(),
            partitions.granularity,
            partitions.prefix
        );
        for target in &partitions.targets {
            scheduler.add(
                partitions.schedule.clone(),
                Job::Partition(PartitionJob::new(
                    &settings.connection,
                    target.clone(),
                    partitions.granularity,
                    &partitions.prefix,
                )),
            );
        }
    }

    // The first run doubles as the reachability check.
    if settings.initial_run {
        tracing::info!("running batch once against {}", settings.connection);
        if let FiringOutcome::Failed(e @ ExecError::ConnectFailed { .. }) =
            batch.run(&executor).await
        {
            return Err(e.into());
        }
    }

    scheduler.start();
    tracing::info!("mysql-cron started");

    let signal = shutdown_signal().await?;
    tracing::info!("received {signal}, stopping scheduler");
    scheduler.stop();
    alerts
        .notify("mysql-cron job exit", &format!("received {signal}"))
        .await;

    Ok(())
}
