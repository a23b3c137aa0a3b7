use anyhow::{Context, Result};
use common::store::CoordinationStore;
use common::worker::parse_map_file_name;
use common::{
    config, run_reduce_task, OutputFormatRegistry, WorkerCommand, WorkerHandle,
    WorkerRegisterRequest, WorkerRegisterResponse, WorkerState,
};
use reqwest::Client;
use std::{fs, path::Path, sync::Arc};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::http_store::HttpStore;

/// Loop principal del worker.
/// - Se registra en el master.
/// - Publica los `mapFile-<P>` que tiene en disco.
/// - Sondea su propia entrada y corre cada reduce que le asignan.
pub async fn run() -> Result<()> {
    let base_url = config::master_url();
    let client = Client::new();

    let hostname = hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    let register_url = format!("{}/api/v1/workers/register", base_url);
    let res = client
        .post(&register_url)
        .json(&WorkerRegisterRequest { hostname })
        .send()
        .await
        .with_context(|| format!("no se pudo contactar al master en {}", base_url))?
        .error_for_status()?;
    let WorkerRegisterResponse { worker_id } = res.json().await?;

    info!("worker {} registrado contra {}", worker_id, base_url);

    let store = HttpStore::new(client, &base_url);
    let handle = WorkerHandle::new(&store, worker_id);

    let map_dir = config::worker_map_dir();
    announce_map_output(&handle, &map_dir).await?;

    let formats = Arc::new(OutputFormatRegistry::default());
    let poll = config::poll_interval();

    loop {
        if poll_once(&handle, formats.clone()).await? {
            continue;
        }
        sleep(poll).await;
    }
}

/// Una visita a la propia entrada. Devuelve `true` si corrió un reduce.
pub async fn poll_once<S: CoordinationStore + ?Sized>(
    handle: &WorkerHandle<'_, S>,
    formats: Arc<OutputFormatRegistry>,
) -> Result<bool> {
    let state = handle.state().await?;
    let command = handle.command().await?;

    // DONE_MAP + REDUCE: el master asignó mientras publicábamos los mapFile
    let pending = matches!(state, WorkerState::Idle | WorkerState::DoneMap);
    if pending && command == WorkerCommand::Reduce {
        run_assignment(handle, formats).await?;
        return Ok(true);
    }

    debug!("worker {} en {} sin trabajo", handle.id(), state);
    Ok(false)
}

/// Publica los `mapFile-<P>` de `dir` y deja el estado inicial (DONE_MAP o
/// IDLE). Si el master ya asignó un reduce en el medio, el estado no se toca.
pub async fn announce_map_output<S: CoordinationStore + ?Sized>(
    handle: &WorkerHandle<'_, S>,
    dir: &str,
) -> Result<WorkerState> {
    let published = publish_map_files(handle, dir).await?;

    if handle.command().await? == WorkerCommand::Reduce {
        let state = handle.state().await?;
        info!(
            "worker {}: {} mapFile(s) publicados desde {}, ya tiene un reduce asignado ({})",
            handle.id(),
            published,
            dir,
            state
        );
        return Ok(state);
    }

    let initial = if published > 0 {
        WorkerState::DoneMap
    } else {
        WorkerState::Idle
    };
    handle.set_state(initial).await?;
    info!(
        "worker {}: {} mapFile(s) publicados desde {}, estado {}",
        handle.id(),
        published,
        dir,
        initial
    );
    Ok(initial)
}

/// Publica en `intermediate/` cada archivo `mapFile-<P>` de `dir`.
pub async fn publish_map_files<S: CoordinationStore + ?Sized>(
    handle: &WorkerHandle<'_, S>,
    dir: &str,
) -> Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("no se pudo leer {}: {} (sin salidas de map)", dir, e);
            return Ok(0);
        }
    };

    let mut found: Vec<(u32, String)> = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(partition) = parse_map_file_name(&name) {
            if entry.path().is_file() {
                found.push((partition, entry.path().to_string_lossy().to_string()));
            }
        }
    }
    found.sort();

    for (partition, path) in &found {
        handle.publish_map_file(*partition, path).await?;
        debug!("publicado mapFile-{} -> {}", partition, path);
    }
    Ok(found.len())
}

/// Corre la asignación actual: REDUCING, reduce en un hilo de bloqueo,
/// publica la salida y termina en DONE_REDUCE.
pub async fn run_assignment<S: CoordinationStore + ?Sized>(
    handle: &WorkerHandle<'_, S>,
    formats: Arc<OutputFormatRegistry>,
) -> Result<()> {
    handle.set_state(WorkerState::Reducing).await?;

    let task = handle.task().await?;
    let inputs = handle.assigned_inputs().await?;
    info!(
        "worker {}: reduce de la partición {} del job {} (intento {}, {} input(s))",
        handle.id(),
        task.partition,
        task.job_id,
        task.attempt,
        inputs.len()
    );

    let blocking_task = task.clone();
    let (summary, output) =
        tokio::task::spawn_blocking(move || run_reduce_task(&blocking_task, &inputs, &formats))
            .await
            .context("el reduce entró en pánico")?
            .with_context(|| {
                format!(
                    "falló el reduce de la partición {} del job {}",
                    task.partition, task.job_id
                )
            })?;

    if let Some(path) = output.as_deref() {
        if !Path::new(path).exists() {
            warn!("la salida {} no es visible desde este worker", path);
        }
    }

    handle.publish_output(output.as_deref()).await?;
    handle.set_state(WorkerState::DoneReduce).await?;

    info!(
        "worker {}: partición {} lista ({} registros, {} grupos, {} emitidos) -> {:?}",
        handle.id(),
        task.partition,
        summary.records_in,
        summary.groups,
        summary.records_out,
        output
    );
    Ok(())
}
