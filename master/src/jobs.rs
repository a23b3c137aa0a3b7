use chrono::Utc;
use tracing::{error, info};

use common::{JobId, JobStatus, ReduceTask};

use crate::coordinator::{Progress, ReduceCoordinator};
use crate::state::AppState;

/// Lanza el coordinador de un job ya registrado en `state.jobs`.
pub fn spawn_reduce_job(state: AppState, job_id: JobId) {
    tokio::spawn(async move {
        run_reduce_job(state, job_id).await;
    });
}

pub async fn run_reduce_job(state: AppState, job_id: JobId) {
    let Some((template, partitions)) = start_job(&state, &job_id) else {
        error!("job {} no encontrado al arrancar", job_id);
        release(&state, &job_id);
        return;
    };

    let progress_state = state.clone();
    let progress_job = job_id.clone();
    let mut coordinator = ReduceCoordinator::new(
        state.store.clone(),
        template,
        state.poll_interval,
        state.lease,
    )
    .with_progress(Box::new(move |event: &Progress| {
        apply_progress(&progress_state, &progress_job, event)
    }));

    let outcome = coordinator.assign_all(partitions).await;

    if let Ok(mut jobs) = state.jobs.lock() {
        if let Some(job) = jobs.get_mut(&job_id) {
            match &outcome {
                Ok(finished) => {
                    info!("job {} terminado: {} partición(es)", job_id, finished.len());
                    job.status = JobStatus::Succeeded;
                }
                Err(e) => {
                    error!("job {} falló: {:#}", job_id, e);
                    job.status = JobStatus::Failed;
                    job.error = Some(format!("{:#}", e));
                }
            }
            job.finished_at = Some(Utc::now());
        }
    }

    release(&state, &job_id);
}

/// Marca el job como RUNNING y arma la plantilla de tarea.
fn start_job(state: &AppState, job_id: &JobId) -> Option<(ReduceTask, u32)> {
    let mut jobs = state.jobs.lock().ok()?;
    let job = jobs.get_mut(job_id)?;
    job.status = JobStatus::Running;
    job.started_at = Some(Utc::now());

    let template = ReduceTask {
        job_id: job.id.clone(),
        partition: 0,
        attempt: 0,
        output_format: job.output_format.clone(),
        output_dir: job.output_dir.clone(),
        reducer: job.reducer.clone(),
    };
    Some((template, job.partitions))
}

fn apply_progress(state: &AppState, job_id: &JobId, event: &Progress) {
    if let Ok(mut jobs) = state.jobs.lock() {
        if let Some(job) = jobs.get_mut(job_id) {
            match event {
                Progress::Assigned { .. } => job.assigned_partitions += 1,
                Progress::Finished(_) => job.completed_partitions += 1,
                Progress::Revoked { .. } => job.reassignments += 1,
            }
        }
    }

    if let Progress::Finished(done) = event {
        if let Ok(mut results) = state.results.lock() {
            results.entry(job_id.clone()).or_default().push(done.clone());
        }
    }
}

fn release(state: &AppState, job_id: &JobId) {
    if let Ok(mut running) = state.running_job.lock() {
        if running.as_ref() == Some(job_id) {
            *running = None;
        }
    }
}
