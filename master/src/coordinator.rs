//! Coordinador de la fase reduce.
//!
//! Recorre los workers en round-robin sobre el store, asigna cada partición a
//! un worker libre y junta las salidas a medida que los workers pasan a
//! DONE_REDUCE. Todo el estado del protocolo vive en el store; acá sólo queda
//! el cursor, las asignaciones pendientes y lo ya terminado.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use common::worker::list_workers;
use common::{
    CoordinationStore, FinishedPartition, PartitionGrouper, ReduceTask, StoreError,
    WorkerCommand, WorkerHandle, WorkerId, WorkerState,
};

use crate::failover::LeasePolicy;

#[derive(Debug, Clone)]
struct Assignment {
    partition: u32,
    attempt: u32,
    inputs: Vec<String>,
    issued_at: Instant,
}

/// Partición que hay que (volver a) emitir.
#[derive(Debug, Clone)]
struct PendingPartition {
    partition: u32,
    attempt: u32,
    inputs: Vec<String>,
}

/// Eventos que el coordinador reporta mientras avanza.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    Assigned {
        partition: u32,
        worker_id: WorkerId,
        attempt: u32,
    },
    Finished(FinishedPartition),
    Revoked {
        partition: u32,
        worker_id: WorkerId,
    },
}

pub type ProgressFn = Box<dyn Fn(&Progress) + Send + Sync>;

#[derive(Debug, PartialEq, Eq)]
enum Visit {
    Eligible,
    Busy,
    // asignado pero todavía sin levantar
    AwaitingPickup,
}

pub struct ReduceCoordinator<S: CoordinationStore> {
    store: S,
    template: ReduceTask,
    poll_interval: Duration,
    lease: LeasePolicy,

    workers: Vec<WorkerId>,
    cursor: usize,
    // último worker visitado mientras se esperan salidas
    last_waited: Option<WorkerId>,
    outstanding: HashMap<WorkerId, Assignment>,
    quarantined: HashSet<WorkerId>,
    requeue: VecDeque<PendingPartition>,
    finished: Vec<FinishedPartition>,
    finished_set: HashSet<u32>,

    on_progress: Option<ProgressFn>,
}

impl<S: CoordinationStore> ReduceCoordinator<S> {
    /// `template` lleva los datos del job; partición e intento se completan
    /// en cada asignación.
    pub fn new(store: S, template: ReduceTask, poll_interval: Duration, lease: LeasePolicy) -> Self {
        Self {
            store,
            template,
            poll_interval,
            lease,
            workers: Vec::new(),
            cursor: 0,
            last_waited: None,
            outstanding: HashMap::new(),
            quarantined: HashSet::new(),
            requeue: VecDeque::new(),
            finished: Vec::new(),
            finished_set: HashSet::new(),
            on_progress: None,
        }
    }

    pub fn with_progress(mut self, f: ProgressFn) -> Self {
        self.on_progress = Some(f);
        self
    }

    /// Salidas registradas hasta ahora, en orden de llegada.
    pub fn finished(&self) -> &[FinishedPartition] {
        &self.finished
    }

    fn report(&self, event: Progress) {
        if let Some(f) = self.on_progress.as_ref() {
            f(&event);
        }
    }

    /// Asigna las particiones `0..file_count` en orden y espera a que todas
    /// terminen. Devuelve las salidas en orden de llegada.
    pub async fn assign_all(&mut self, file_count: u32) -> Result<Vec<FinishedPartition>> {
        info!(
            "job {}: asignando {} partición(es) de reduce",
            self.template.job_id, file_count
        );

        self.wait_for_workers().await?;

        for partition in 0..file_count {
            let inputs = PartitionGrouper::new(&self.store)
                .group_files(partition)
                .await?;
            self.issue(PendingPartition {
                partition,
                attempt: 0,
                inputs,
            })
            .await?;
        }

        while self.finished.len() < file_count as usize {
            if self.outstanding.is_empty() && self.requeue.is_empty() {
                bail!(
                    "quedan {} partición(es) sin asignar",
                    file_count as usize - self.finished.len()
                );
            }
            self.wait_for_results().await?;
        }

        info!(
            "job {}: {} partición(es) terminadas",
            self.template.job_id,
            self.finished.len()
        );
        Ok(self.finished.clone())
    }

    async fn refresh_workers(&mut self) -> Result<()> {
        self.workers = list_workers(&self.store).await?;
        self.cursor = 0;
        Ok(())
    }

    async fn wait_for_workers(&mut self) -> Result<()> {
        self.refresh_workers().await?;
        while self.workers.is_empty() {
            debug!("no hay workers registrados, esperando...");
            sleep(self.poll_interval).await;
            self.refresh_workers().await?;
        }
        Ok(())
    }

    /// Siguiente worker del round-robin. Al dar la vuelta se vuelve a listar
    /// para que los workers nuevos entren en la rotación.
    async fn next_worker(&mut self) -> Result<WorkerId> {
        loop {
            if self.cursor >= self.workers.len() {
                self.refresh_workers().await?;
            }
            if let Some(id) = self.workers.get(self.cursor).copied() {
                self.cursor += 1;
                return Ok(id);
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Mira el estado de un worker y, si terminó un reduce pendiente,
    /// registra su salida.
    async fn visit(&mut self, id: WorkerId) -> Result<Visit> {
        let worker = WorkerHandle::new(&self.store, id);
        let state = match worker.state().await {
            Ok(state) => state,
            Err(StoreError::NotFound(_)) => {
                // la entrada existe pero el registro todavía no escribió STATE
                debug!("worker {} sin STATE todavía, lo salteo", id);
                return Ok(Visit::Busy);
            }
            Err(e) => return Err(e.into()),
        };
        let command = worker.command().await?;
        debug!("worker {} en estado {} (command={})", id, state, command.as_str());

        if self.quarantined.contains(&id) {
            match state {
                WorkerState::Reducing | WorkerState::DoneReduce => {
                    info!("worker {} volvió a reportar, sale de cuarentena", id);
                    self.quarantined.remove(&id);
                }
                _ => return Ok(Visit::Busy),
            }
        }

        match state {
            WorkerState::DoneReduce => {
                if let Some(assignment) = self.outstanding.remove(&id) {
                    let output = worker.output().await?;
                    self.record(FinishedPartition {
                        partition: assignment.partition,
                        worker_id: id,
                        output,
                    });
                }
                Ok(Visit::Eligible)
            }
            WorkerState::Idle | WorkerState::DoneMap => {
                if command == WorkerCommand::Reduce || self.outstanding.contains_key(&id) {
                    Ok(Visit::AwaitingPickup)
                } else {
                    Ok(Visit::Eligible)
                }
            }
            WorkerState::Reducing => Ok(Visit::Busy),
        }
    }

    fn record(&mut self, done: FinishedPartition) {
        if !self.finished_set.insert(done.partition) {
            warn!(
                "partición {} ya estaba terminada, ignoro la salida del worker {}",
                done.partition, done.worker_id
            );
            return;
        }
        info!(
            "worker {} terminó la partición {} con salida {:?}",
            done.worker_id, done.partition, done.output
        );
        self.finished.push(done.clone());
        self.report(Progress::Finished(done));
    }

    /// Emite una partición al próximo worker libre del round-robin.
    async fn issue(&mut self, pending: PendingPartition) -> Result<()> {
        loop {
            self.check_leases().await?;

            let id = self.next_worker().await?;
            match self.visit(id).await? {
                Visit::Eligible => {
                    self.assign(id, pending).await?;
                    return Ok(());
                }
                Visit::AwaitingPickup | Visit::Busy => sleep(self.poll_interval).await,
            }
        }
    }

    async fn assign(&mut self, id: WorkerId, pending: PendingPartition) -> Result<()> {
        let task = ReduceTask {
            partition: pending.partition,
            attempt: pending.attempt,
            ..self.template.clone()
        };

        info!(
            "asignando partición {} (intento {}, {} input(s)) al worker {}",
            pending.partition,
            pending.attempt,
            pending.inputs.len(),
            id
        );
        WorkerHandle::new(&self.store, id)
            .assign_reduce(&task, &pending.inputs)
            .await?;

        self.outstanding.insert(
            id,
            Assignment {
                partition: pending.partition,
                attempt: pending.attempt,
                inputs: pending.inputs,
                issued_at: Instant::now(),
            },
        );
        self.report(Progress::Assigned {
            partition: pending.partition,
            worker_id: id,
            attempt: pending.attempt,
        });
        Ok(())
    }

    /// Una vuelta de espera: reemite lo revocado y visita los workers con
    /// asignaciones pendientes hasta registrar una salida.
    pub async fn wait_for_results(&mut self) -> Result<()> {
        loop {
            self.check_leases().await?;

            if let Some(pending) = self.requeue.pop_front() {
                self.issue(pending).await?;
                continue;
            }

            if self.outstanding.is_empty() {
                // nada en vuelo: o ya terminó todo o no queda qué esperar
                return Ok(());
            }

            let Some(id) = self.next_outstanding() else {
                continue;
            };

            let before = self.finished.len();
            self.visit(id).await?;
            if self.finished.len() > before {
                return Ok(());
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Siguiente worker con asignación pendiente, en orden de id después del
    /// último visitado. No toca el store.
    fn next_outstanding(&mut self) -> Option<WorkerId> {
        let mut ids: Vec<WorkerId> = self.outstanding.keys().copied().collect();
        ids.sort_unstable();
        let next = match self.last_waited {
            Some(last) => ids.iter().copied().find(|id| *id > last).or(ids.first().copied()),
            None => ids.first().copied(),
        };
        self.last_waited = next;
        next
    }

    /// Revoca las asignaciones con lease vencido y las encola para reemitir.
    async fn check_leases(&mut self) -> Result<()> {
        if self.lease.lease.is_none() {
            return Ok(());
        }

        let now = Instant::now();
        let expired: Vec<WorkerId> = self
            .outstanding
            .iter()
            .filter(|(_, a)| self.lease.expired(a.issued_at, now))
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            let worker = WorkerHandle::new(&self.store, id);
            if worker.state().await? == WorkerState::DoneReduce {
                // terminó justo a tiempo, se registra en la próxima visita
                continue;
            }

            let Some(assignment) = self.outstanding.remove(&id) else {
                continue;
            };
            warn!(
                "lease vencido: worker {} no terminó la partición {} (intento {}), revocando",
                id, assignment.partition, assignment.attempt
            );
            worker.clear_command().await?;
            self.quarantined.insert(id);
            self.report(Progress::Revoked {
                partition: assignment.partition,
                worker_id: id,
            });

            if !self.lease.can_retry(assignment.partition, assignment.attempt) {
                bail!(
                    "la partición {} no terminó tras {} intentos",
                    assignment.partition,
                    self.lease.max_attempts
                );
            }
            self.requeue.push_back(PendingPartition {
                partition: assignment.partition,
                attempt: assignment.attempt + 1,
                inputs: assignment.inputs,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::InMemoryStore;
    use std::sync::{Arc, Mutex};
    use tokio::task::JoinHandle;

    const TICK: Duration = Duration::from_millis(2);

    fn template() -> ReduceTask {
        ReduceTask {
            job_id: "job-test".to_string(),
            partition: 0,
            attempt: 0,
            output_format: "text".to_string(),
            output_dir: "/out".to_string(),
            reducer: "sum".to_string(),
        }
    }

    async fn register(store: &InMemoryStore, id: WorkerId, partitions: u32) {
        let w = WorkerHandle::new(store, id);
        w.register("sim").await.unwrap();
        for p in 0..partitions {
            w.publish_map_file(p, &format!("/map/w{}/mapFile-{}", id, p))
                .await
                .unwrap();
        }
        w.set_state(WorkerState::DoneMap).await.unwrap();
    }

    /// Worker simulado: levanta cada IDLE+REDUCE, anota cuántos inputs vio y
    /// publica `/out/part-<P>`.
    fn simulate(
        store: InMemoryStore,
        id: WorkerId,
        seen: Arc<Mutex<Vec<(WorkerId, u32, usize)>>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let w = WorkerHandle::new(&store, id);
            loop {
                let state = w.state().await.unwrap();
                let command = w.command().await.unwrap();
                if state == WorkerState::Idle && command == WorkerCommand::Reduce {
                    w.set_state(WorkerState::Reducing).await.unwrap();
                    let task = w.task().await.unwrap();
                    let inputs = w.assigned_inputs().await.unwrap();
                    seen.lock().unwrap().push((id, task.partition, inputs.len()));
                    sleep(TICK * 3).await;
                    w.publish_output(Some(&task.output_path())).await.unwrap();
                    w.set_state(WorkerState::DoneReduce).await.unwrap();
                }
                sleep(TICK).await;
            }
        })
    }

    #[tokio::test]
    async fn tres_particiones_dos_workers() {
        let store = InMemoryStore::new();
        register(&store, 1, 3).await;
        register(&store, 2, 3).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sims = vec![
            simulate(store.clone(), 1, seen.clone()),
            simulate(store.clone(), 2, seen.clone()),
        ];

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let mut coord = ReduceCoordinator::new(store.clone(), template(), TICK, LeasePolicy::default())
            .with_progress(Box::new(move |e: &Progress| sink.lock().unwrap().push(e.clone())));

        let finished = coord.assign_all(3).await.unwrap();
        for s in sims {
            s.abort();
        }

        assert_eq!(finished.len(), 3);
        let mut parts: Vec<u32> = finished.iter().map(|f| f.partition).collect();
        parts.sort();
        assert_eq!(parts, vec![0, 1, 2]);
        for f in &finished {
            assert_eq!(f.output, Some(format!("/out/part-{}", f.partition)));
        }

        // cada partición se asignó exactamente una vez, con un input por mapper
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|(_, _, n)| *n == 2));

        let assigned = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, Progress::Assigned { .. }))
            .count();
        assert_eq!(assigned, 3);
    }

    #[tokio::test]
    async fn worker_a_medio_registrar_no_tira_el_job() {
        let store = InMemoryStore::new();
        // entrada creada pero todavía sin atributos
        store
            .open(
                "/workers/1",
                common::OpenMode::WRITE | common::OpenMode::CREATE | common::OpenMode::CREATE_PARENTS,
            )
            .await
            .unwrap();
        register(&store, 2, 1).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sim = simulate(store.clone(), 2, seen.clone());

        let mut coord =
            ReduceCoordinator::new(store.clone(), template(), TICK, LeasePolicy::default());
        let finished = coord.assign_all(1).await.unwrap();
        sim.abort();

        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].worker_id, 2);
        assert_eq!(seen.lock().unwrap().as_slice(), &[(2, 0, 1)]);
    }

    #[tokio::test]
    async fn la_espera_rota_sobre_los_workers_con_asignacion() {
        let store = InMemoryStore::new();
        let mut coord =
            ReduceCoordinator::new(store.clone(), template(), TICK, LeasePolicy::default());
        assert_eq!(coord.next_outstanding(), None);

        for (id, partition) in [(5, 0), (2, 1), (9, 2)] {
            coord.outstanding.insert(
                id,
                Assignment {
                    partition,
                    attempt: 0,
                    inputs: Vec::new(),
                    issued_at: Instant::now(),
                },
            );
        }

        let order: Vec<Option<WorkerId>> = (0..4).map(|_| coord.next_outstanding()).collect();
        assert_eq!(order, vec![Some(2), Some(5), Some(9), Some(2)]);

        // si el último visitado ya no está pendiente, sigue con el próximo id
        coord.outstanding.remove(&5);
        assert_eq!(coord.next_outstanding(), Some(9));
    }

    #[tokio::test]
    async fn nunca_hay_dos_reduce_pendientes_en_el_mismo_worker() {
        let store = InMemoryStore::new();
        register(&store, 1, 4).await;

        // el coordinador corre contra un único worker lento
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sim = simulate(store.clone(), 1, seen.clone());

        let outstanding_max = Arc::new(Mutex::new(0usize));
        let in_flight = Arc::new(Mutex::new(HashSet::new()));
        let (max_c, flight_c) = (outstanding_max.clone(), in_flight.clone());
        let mut coord = ReduceCoordinator::new(store.clone(), template(), TICK, LeasePolicy::default())
            .with_progress(Box::new(move |e: &Progress| {
                let mut flight = flight_c.lock().unwrap();
                match e {
                    Progress::Assigned { partition, .. } => {
                        flight.insert(*partition);
                    }
                    Progress::Finished(f) => {
                        flight.remove(&f.partition);
                    }
                    Progress::Revoked { partition, .. } => {
                        flight.remove(partition);
                    }
                }
                let mut max = max_c.lock().unwrap();
                *max = (*max).max(flight.len());
            }));

        let finished = coord.assign_all(4).await.unwrap();
        sim.abort();

        assert_eq!(finished.len(), 4);
        assert_eq!(*outstanding_max.lock().unwrap(), 1);
        let order: Vec<u32> = finished.iter().map(|f| f.partition).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn done_reduce_se_registra_una_sola_vez() {
        let store = InMemoryStore::new();
        register(&store, 1, 1).await;

        let mut coord =
            ReduceCoordinator::new(store.clone(), template(), TICK, LeasePolicy::default());
        coord.wait_for_workers().await.unwrap();
        coord
            .issue(PendingPartition {
                partition: 0,
                attempt: 0,
                inputs: vec!["/map/w1/mapFile-0".to_string()],
            })
            .await
            .unwrap();

        let w = WorkerHandle::new(&store, 1);
        w.set_state(WorkerState::Reducing).await.unwrap();
        w.publish_output(Some("/out/part-0")).await.unwrap();
        w.set_state(WorkerState::DoneReduce).await.unwrap();

        coord.wait_for_results().await.unwrap();
        // el worker queda en DONE_REDUCE: otra vuelta no debe contarlo de nuevo
        coord.wait_for_results().await.unwrap();

        assert_eq!(coord.finished().len(), 1);
        assert_eq!(coord.finished()[0].worker_id, 1);
    }

    #[tokio::test]
    async fn particion_vacia_se_registra_sin_salida() {
        let store = InMemoryStore::new();
        // el worker 1 no produjo la partición 1
        let w = WorkerHandle::new(&store, 1);
        w.register("sim").await.unwrap();
        w.publish_map_file(0, "/map/w1/mapFile-0").await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sim = tokio::spawn({
            let store = store.clone();
            let seen = seen.clone();
            async move {
                let w = WorkerHandle::new(&store, 1);
                loop {
                    if w.state().await.unwrap() == WorkerState::Idle
                        && w.command().await.unwrap() == WorkerCommand::Reduce
                    {
                        w.set_state(WorkerState::Reducing).await.unwrap();
                        let task = w.task().await.unwrap();
                        let inputs = w.assigned_inputs().await.unwrap();
                        seen.lock().unwrap().push(inputs.len());
                        let out = if inputs.is_empty() {
                            None
                        } else {
                            Some(task.output_path())
                        };
                        w.publish_output(out.as_deref()).await.unwrap();
                        w.set_state(WorkerState::DoneReduce).await.unwrap();
                    }
                    sleep(TICK).await;
                }
            }
        });

        let mut coord =
            ReduceCoordinator::new(store.clone(), template(), TICK, LeasePolicy::default());
        let finished = coord.assign_all(2).await.unwrap();
        sim.abort();

        assert_eq!(finished[0].output, Some("/out/part-0".to_string()));
        assert_eq!(finished[1].output, None);
        assert_eq!(*seen.lock().unwrap(), vec![1, 0]);
    }

    #[tokio::test]
    async fn lease_vencido_reemite_en_otro_worker() {
        let store = InMemoryStore::new();
        // el worker 1 nunca levanta su asignación
        register(&store, 1, 1).await;
        register(&store, 2, 1).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let policy = LeasePolicy {
            lease: Some(Duration::from_millis(30)),
            max_attempts: 3,
        };
        let mut coord = ReduceCoordinator::new(store.clone(), template(), TICK, policy);

        coord.wait_for_workers().await.unwrap();
        coord
            .issue(PendingPartition {
                partition: 0,
                attempt: 0,
                inputs: vec!["/map/w1/mapFile-0".to_string()],
            })
            .await
            .unwrap();
        assert_eq!(
            WorkerHandle::new(&store, 1).command().await.unwrap(),
            WorkerCommand::Reduce
        );

        let sim = simulate(store.clone(), 2, seen.clone());
        while coord.finished().is_empty() {
            coord.wait_for_results().await.unwrap();
        }
        sim.abort();

        assert_eq!(coord.finished()[0].worker_id, 2);
        assert_eq!(
            WorkerHandle::new(&store, 1).command().await.unwrap(),
            WorkerCommand::None
        );
        assert_eq!(WorkerHandle::new(&store, 2).task().await.unwrap().attempt, 1);
    }

    #[tokio::test]
    async fn lease_agotado_falla_el_job() {
        let store = InMemoryStore::new();
        register(&store, 1, 1).await;

        let policy = LeasePolicy {
            lease: Some(Duration::from_millis(5)),
            max_attempts: 1,
        };
        let mut coord = ReduceCoordinator::new(store.clone(), template(), TICK, policy);

        let err = coord.assign_all(1).await.unwrap_err();
        assert!(err.to_string().contains("partición 0"));
    }
}
