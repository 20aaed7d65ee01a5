use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::dispatch::{Dispatcher, JobError, TriggerIntegration};

/// Start a worker pool on a dedicated Tokio runtime with its own thread pool.
/// This runs on a separate OS thread and blocks until shutdown is signaled.
pub fn run_pool(
    dispatcher: Arc<Dispatcher>,
    shutdown: watch::Receiver<bool>,
    worker_count: usize,
    job_timeout: Duration,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("worker-pool".into())
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(worker_count)
                .thread_name("integration-worker")
                .enable_all()
                .build()
                .expect("Failed to build worker runtime");

            runtime.block_on(async {
                let mut handles = Vec::with_capacity(worker_count);

                for id in 0..worker_count {
                    handles.push(tokio::spawn(run(id, dispatcher.clone(), shutdown.clone(), job_timeout)));
                }

                tracing::info!("Integration worker pool started ({worker_count} workers)");

                for handle in handles {
                    let _ = handle.await;
                }

                tracing::info!("Integration worker pool stopped");
            });
        })
        .expect("Failed to spawn worker pool thread")
}

/// A single worker loop that polls the queue and processes jobs.
async fn run(id: usize, dispatcher: Arc<Dispatcher>, mut shutdown: watch::Receiver<bool>, job_timeout: Duration) {
    tracing::debug!("Worker {id} started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        match process_next(&dispatcher, job_timeout).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                tracing::error!("Worker {id} error: {e}");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            _ = shutdown.changed() => {}
        }
    }

    tracing::debug!("Worker {id} stopped");
}

/// Try to claim and run the next job. Returns true if a job was processed.
/// Retryable failures go back to the queue with exponential backoff until
/// they run out of attempts. Anything else fails the job for good.
pub async fn process_next(dispatcher: &Dispatcher, job_timeout: Duration) -> Result<bool, String> {
    let jobs = &dispatcher.stores.jobs;

    let job = jobs
        .claim_next()
        .await
        .map_err(|e| format!("Failed to claim job: {e}"))?;

    let Some(job) = job else {
        return Ok(false);
    };

    tracing::debug!(
        "Processing job {} (integration={}, submission={}, attempt={})",
        job.id,
        job.integration_uid,
        job.submission_id,
        job.attempts
    );

    let trigger = TriggerIntegration::from_job(&job);
    let outcome = match tokio::time::timeout(job_timeout, trigger.execute(dispatcher)).await {
        Ok(result) => result,
        Err(_) => Err(JobError {
            message: format!("Job timed out after {}s", job_timeout.as_secs()),
            retryable: true,
        }),
    };

    match outcome {
        Ok(()) => {
            if let Err(e) = jobs.mark_completed(job.id).await {
                tracing::error!(job = %job.id, "Failed to mark job completed: {e}");
            }
        }
        Err(error) => {
            tracing::warn!(
                job = %job.id,
                attempt = job.attempts,
                max_attempts = job.max_attempts,
                retryable = error.retryable,
                "Integration job failed: {error}"
            );
            // A spent attempt budget makes the failure final.
            let attempts = if error.retryable { job.attempts } else { job.max_attempts };
            if let Err(e) = jobs
                .mark_failed(job.id, attempts, job.max_attempts, &error.message)
                .await
            {
                tracing::error!(job = %job.id, "Failed to mark job failed: {e}");
            }
        }
    }

    Ok(true)
}
