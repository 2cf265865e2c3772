use {
    crate::services::{scheduler::RetryScheduler, suppressor::DuplicateSuppressor},
    chrono::Utc,
    std::{sync::Arc, time::Duration},
    tokio::sync::watch,
};

/// Tick the retry scheduler until shutdown.
pub async fn run_scheduler(
    scheduler: Arc<RetryScheduler>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(every = ?every, "retry scheduler started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("retry scheduler shutting down");
                return;
            }
            _ = tokio::time::sleep(every) => {}
        }

        if let Err(e) = scheduler.tick(Utc::now()).await {
            tracing::error!(error = %e, "scheduler tick error");
        }
    }
}

/// Periodic duplicate sweep until shutdown.
pub async fn run_sweeper(
    suppressor: Arc<DuplicateSuppressor>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(every = ?every, "duplicate sweeper started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("duplicate sweeper shutting down");
                return;
            }
            _ = tokio::time::sleep(every) => {}
        }

        match suppressor.sweep(Utc::now()).await {
            Ok(report) if report.errors > 0 => {
                tracing::warn!(errors = report.errors, "sweep finished with errors")
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "sweep error"),
        }
    }
}
