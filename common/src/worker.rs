//! Vista tipada de la entrada de un worker en el store de coordinación.
//!
//! Contrato de escritura (un solo escritor por campo, sin locks):
//! - el master escribe `COMMAND`, los atributos de la tarea, `reduceInput/`
//!   y `STATE=IDLE` sólo como parte de una asignación;
//! - el worker escribe `STATE` en todas las demás transiciones, `HOSTNAME`,
//!   `intermediate/` y `output`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::store::{self, CoordinationStore, OpenMode, StoreError, StoreResult};
use crate::task::ReduceTask;

pub type WorkerId = u32;

pub const WORKERS_DIR: &str = "/workers";
pub const INTERMEDIATE_DIR: &str = "intermediate";
pub const REDUCE_INPUT_DIR: &str = "reduceInput";
pub const OUTPUT_ENTRY: &str = "output";

pub const ATTR_STATE: &str = "STATE";
pub const ATTR_COMMAND: &str = "COMMAND";
pub const ATTR_HOSTNAME: &str = "HOSTNAME";
pub const ATTR_JOB_ID: &str = "JOB_ID";
pub const ATTR_PARTITION: &str = "PARTITION";
pub const ATTR_ATTEMPT: &str = "ATTEMPT";
pub const ATTR_OUTPUT_FORMAT: &str = "OUTPUT_FORMAT";
pub const ATTR_OUTPUT_DIR: &str = "OUTPUT_DIR";
pub const ATTR_REDUCER: &str = "REDUCER";

fn create() -> OpenMode {
    OpenMode::WRITE | OpenMode::CREATE
}

fn create_all() -> OpenMode {
    OpenMode::WRITE | OpenMode::CREATE | OpenMode::CREATE_PARENTS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    Idle,
    DoneMap,
    Reducing,
    DoneReduce,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Idle => "IDLE",
            WorkerState::DoneMap => "DONE_MAP",
            WorkerState::Reducing => "REDUCING",
            WorkerState::DoneReduce => "DONE_REDUCE",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(WorkerState::Idle),
            "DONE_MAP" => Ok(WorkerState::DoneMap),
            "REDUCING" => Ok(WorkerState::Reducing),
            "DONE_REDUCE" => Ok(WorkerState::DoneReduce),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerCommand {
    None,
    Reduce,
}

impl WorkerCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerCommand::None => "NONE",
            WorkerCommand::Reduce => "REDUCE",
        }
    }
}

impl FromStr for WorkerCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "NONE" => Ok(WorkerCommand::None),
            "REDUCE" => Ok(WorkerCommand::Reduce),
            other => Err(other.to_string()),
        }
    }
}

/* --------- Nombres en el store --------- */

pub fn worker_path(id: WorkerId) -> String {
    store::join(WORKERS_DIR, &id.to_string())
}

pub fn worker_id_from_path(path: &str) -> Option<WorkerId> {
    store::file_name(path).parse().ok()
}

pub fn map_file_name(partition: u32) -> String {
    format!("mapFile-{}", partition)
}

pub fn parse_map_file_name(name: &str) -> Option<u32> {
    name.strip_prefix("mapFile-")?.parse().ok()
}

fn input_index(name: &str) -> Option<usize> {
    name.strip_prefix("input-")?.parse().ok()
}

/* --------- DTOs HTTP --------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegisterRequest {
    pub hostname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegisterResponse {
    pub worker_id: WorkerId,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WorkerSummary {
    pub worker_id: WorkerId,
    pub hostname: String,
    pub state: WorkerState,
    pub command: WorkerCommand,
    pub partition: Option<u32>,
    pub map_files: usize,
    pub output: Option<String>,
}

/* --------- Handle --------- */

pub struct WorkerHandle<'a, S: CoordinationStore + ?Sized> {
    store: &'a S,
    id: WorkerId,
    path: String,
}

impl<'a, S: CoordinationStore + ?Sized> WorkerHandle<'a, S> {
    pub fn new(store: &'a S, id: WorkerId) -> Self {
        Self {
            store,
            id,
            path: worker_path(id),
        }
    }

    pub fn from_path(store: &'a S, path: &str) -> Option<Self> {
        worker_id_from_path(path).map(|id| Self::new(store, id))
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn sub(&self, name: &str) -> String {
        store::join(&self.path, name)
    }

    async fn optional_attribute(&self, name: &str) -> StoreResult<Option<String>> {
        match self.store.get_attribute(&self.path, name).await {
            Ok(v) => Ok(Some(v)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn invalid(&self, name: &str, value: String) -> StoreError {
        StoreError::InvalidValue {
            path: self.path.clone(),
            name: name.to_string(),
            value,
        }
    }

    async fn parsed_attribute<T: FromStr>(&self, name: &str) -> StoreResult<Option<T>> {
        match self.optional_attribute(name).await? {
            Some(raw) => raw.parse().map(Some).map_err(|_| self.invalid(name, raw)),
            None => Ok(None),
        }
    }

    /// Crea la entrada del worker recién registrado (`STATE=IDLE`).
    pub async fn register(&self, hostname: &str) -> StoreResult<()> {
        self.store.open(&self.path, create_all()).await?;
        self.store.open(&self.sub(INTERMEDIATE_DIR), create()).await?;
        self.store.set_attribute(&self.path, ATTR_HOSTNAME, hostname).await?;
        self.store
            .set_attribute(&self.path, ATTR_COMMAND, WorkerCommand::None.as_str())
            .await?;
        self.store
            .set_attribute(&self.path, ATTR_STATE, WorkerState::Idle.as_str())
            .await
    }

    pub async fn state(&self) -> StoreResult<WorkerState> {
        let raw = self.store.get_attribute(&self.path, ATTR_STATE).await?;
        raw.parse().map_err(|raw| self.invalid(ATTR_STATE, raw))
    }

    pub async fn command(&self) -> StoreResult<WorkerCommand> {
        Ok(self
            .parsed_attribute(ATTR_COMMAND)
            .await?
            .unwrap_or(WorkerCommand::None))
    }

    pub async fn hostname(&self) -> StoreResult<String> {
        Ok(self.optional_attribute(ATTR_HOSTNAME).await?.unwrap_or_default())
    }

    pub async fn partition(&self) -> StoreResult<Option<u32>> {
        self.parsed_attribute(ATTR_PARTITION).await
    }

    /// Rearma la tarea a partir de los atributos que dejó el master.
    pub async fn task(&self) -> StoreResult<ReduceTask> {
        let required = |name: &'static str, v: Option<String>| {
            v.ok_or_else(|| StoreError::NotFound(format!("{}#{}", self.path, name)))
        };

        Ok(ReduceTask {
            job_id: required(ATTR_JOB_ID, self.optional_attribute(ATTR_JOB_ID).await?)?,
            partition: self
                .parsed_attribute(ATTR_PARTITION)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("{}#{}", self.path, ATTR_PARTITION)))?,
            attempt: self.parsed_attribute(ATTR_ATTEMPT).await?.unwrap_or(0),
            output_format: required(
                ATTR_OUTPUT_FORMAT,
                self.optional_attribute(ATTR_OUTPUT_FORMAT).await?,
            )?,
            output_dir: required(ATTR_OUTPUT_DIR, self.optional_attribute(ATTR_OUTPUT_DIR).await?)?,
            reducer: required(ATTR_REDUCER, self.optional_attribute(ATTR_REDUCER).await?)?,
        })
    }

    /// Archivos asignados en `reduceInput/`, en orden de índice.
    pub async fn assigned_inputs(&self) -> StoreResult<Vec<String>> {
        let dir = self.sub(REDUCE_INPUT_DIR);
        if !self.store.exists(&dir).await? {
            return Ok(Vec::new());
        }

        let mut indexed = Vec::new();
        for entry in self.store.list(&dir).await? {
            if let Some(idx) = input_index(store::file_name(&entry)) {
                indexed.push((idx, self.store.retrieve_string(&entry).await?));
            }
        }
        indexed.sort_by_key(|(idx, _)| *idx);
        Ok(indexed.into_iter().map(|(_, path)| path).collect())
    }

    /// Última salida publicada; `None` si no hay o si la partición venía vacía.
    pub async fn output(&self) -> StoreResult<Option<String>> {
        let entry = self.sub(OUTPUT_ENTRY);
        if !self.store.exists(&entry).await? {
            return Ok(None);
        }
        let value = self.store.retrieve_string(&entry).await?;
        Ok(if value.is_empty() { None } else { Some(value) })
    }

    pub async fn has_map_file(&self, partition: u32) -> StoreResult<bool> {
        let entry = store::join(&self.sub(INTERMEDIATE_DIR), &map_file_name(partition));
        self.store.exists(&entry).await
    }

    pub async fn map_file(&self, partition: u32) -> StoreResult<Option<String>> {
        if !self.has_map_file(partition).await? {
            return Ok(None);
        }
        let entry = store::join(&self.sub(INTERMEDIATE_DIR), &map_file_name(partition));
        Ok(Some(self.store.retrieve_string(&entry).await?))
    }

    pub async fn map_file_count(&self) -> StoreResult<usize> {
        let dir = self.sub(INTERMEDIATE_DIR);
        if !self.store.exists(&dir).await? {
            return Ok(0);
        }
        Ok(self
            .store
            .list(&dir)
            .await?
            .iter()
            .filter(|p| parse_map_file_name(store::file_name(p)).is_some())
            .count())
    }

    /* ----- escrituras del master ----- */

    /// Escribe una asignación de reduce. Borra los inputs de la asignación
    /// anterior, escribe los nuevos y la tarea, y recién al final deja
    /// `STATE=IDLE` + `COMMAND=REDUCE`.
    pub async fn assign_reduce(&self, task: &ReduceTask, inputs: &[String]) -> StoreResult<()> {
        let dir = self.sub(REDUCE_INPUT_DIR);
        if self.store.exists(&dir).await? {
            self.store.remove(&dir).await?;
        }
        self.store.open(&dir, create()).await?;

        for (idx, input) in inputs.iter().enumerate() {
            let entry = store::join(&dir, &format!("input-{}", idx));
            self.store.open(&entry, create()).await?;
            self.store.store_string(&entry, input).await?;
        }

        let attrs = [
            (ATTR_JOB_ID, task.job_id.clone()),
            (ATTR_PARTITION, task.partition.to_string()),
            (ATTR_ATTEMPT, task.attempt.to_string()),
            (ATTR_OUTPUT_FORMAT, task.output_format.clone()),
            (ATTR_OUTPUT_DIR, task.output_dir.clone()),
            (ATTR_REDUCER, task.reducer.clone()),
        ];
        for (name, value) in attrs.iter() {
            self.store.set_attribute(&self.path, name, value).await?;
        }

        self.store
            .set_attribute(&self.path, ATTR_STATE, WorkerState::Idle.as_str())
            .await?;
        self.store
            .set_attribute(&self.path, ATTR_COMMAND, WorkerCommand::Reduce.as_str())
            .await
    }

    /// Revoca una asignación vencida (sólo toca `COMMAND`).
    pub async fn clear_command(&self) -> StoreResult<()> {
        self.store
            .set_attribute(&self.path, ATTR_COMMAND, WorkerCommand::None.as_str())
            .await
    }

    /* ----- escrituras del worker ----- */

    pub async fn set_state(&self, state: WorkerState) -> StoreResult<()> {
        self.store
            .set_attribute(&self.path, ATTR_STATE, state.as_str())
            .await
    }

    /// Publica la salida del último reduce (string vacío si no hubo salida).
    pub async fn publish_output(&self, output: Option<&str>) -> StoreResult<()> {
        let entry = self.sub(OUTPUT_ENTRY);
        self.store.open(&entry, create()).await?;
        self.store.store_string(&entry, output.unwrap_or("")).await
    }

    pub async fn publish_map_file(&self, partition: u32, path: &str) -> StoreResult<()> {
        let entry = store::join(&self.sub(INTERMEDIATE_DIR), &map_file_name(partition));
        self.store.open(&entry, create_all()).await?;
        self.store.store_string(&entry, path).await
    }

    pub async fn summary(&self) -> StoreResult<WorkerSummary> {
        Ok(WorkerSummary {
            worker_id: self.id,
            hostname: self.hostname().await?,
            state: self.state().await?,
            command: self.command().await?,
            partition: self.partition().await?,
            map_files: self.map_file_count().await?,
            output: self.output().await?,
        })
    }
}

/// Ids de todos los workers registrados, en orden numérico.
pub async fn list_workers<S: CoordinationStore + ?Sized>(store: &S) -> StoreResult<Vec<WorkerId>> {
    if !store.exists(WORKERS_DIR).await? {
        return Ok(Vec::new());
    }
    Ok(store
        .list(WORKERS_DIR)
        .await?
        .iter()
        .filter_map(|p| worker_id_from_path(p))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn task(partition: u32) -> ReduceTask {
        ReduceTask {
            job_id: "job".to_string(),
            partition,
            attempt: 0,
            output_format: "text".to_string(),
            output_dir: "/data/output/job".to_string(),
            reducer: "sum".to_string(),
        }
    }

    #[test]
    fn estados_y_comandos_se_parsean_ida_y_vuelta() {
        for s in [
            WorkerState::Idle,
            WorkerState::DoneMap,
            WorkerState::Reducing,
            WorkerState::DoneReduce,
        ] {
            assert_eq!(s.as_str().parse::<WorkerState>().unwrap(), s);
        }
        assert!("MAPPING".parse::<WorkerState>().is_err());
        assert_eq!("".parse::<WorkerCommand>().unwrap(), WorkerCommand::None);
        assert_eq!("REDUCE".parse::<WorkerCommand>().unwrap(), WorkerCommand::Reduce);
    }

    #[test]
    fn nombres_de_map_file() {
        assert_eq!(map_file_name(7), "mapFile-7");
        assert_eq!(parse_map_file_name("mapFile-12"), Some(12));
        assert_eq!(parse_map_file_name("mapFile-x"), None);
        assert_eq!(parse_map_file_name("part-1"), None);
    }

    #[tokio::test]
    async fn register_deja_al_worker_idle_sin_comando() {
        let store = InMemoryStore::new();
        let w = WorkerHandle::new(&store, 1);
        w.register("host-a").await.unwrap();

        assert_eq!(w.state().await.unwrap(), WorkerState::Idle);
        assert_eq!(w.command().await.unwrap(), WorkerCommand::None);
        assert_eq!(w.hostname().await.unwrap(), "host-a");
        assert_eq!(list_workers(&store).await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn assign_reduce_reemplaza_inputs_anteriores() {
        let store = InMemoryStore::new();
        let w = WorkerHandle::new(&store, 2);
        w.register("h").await.unwrap();

        let many: Vec<String> = (0..12).map(|i| format!("/tmp/f{}", i)).collect();
        w.assign_reduce(&task(0), &many).await.unwrap();
        // orden por índice, no lexicográfico (input-10 va después de input-9)
        assert_eq!(w.assigned_inputs().await.unwrap(), many);

        w.set_state(WorkerState::DoneReduce).await.unwrap();
        w.assign_reduce(&task(1), &["/tmp/solo".to_string()]).await.unwrap();

        assert_eq!(w.assigned_inputs().await.unwrap(), vec!["/tmp/solo".to_string()]);
        assert_eq!(w.state().await.unwrap(), WorkerState::Idle);
        assert_eq!(w.command().await.unwrap(), WorkerCommand::Reduce);
        assert_eq!(w.task().await.unwrap(), task(1));
    }

    #[tokio::test]
    async fn output_vacio_se_lee_como_none() {
        let store = InMemoryStore::new();
        let w = WorkerHandle::new(&store, 3);
        w.register("h").await.unwrap();

        assert_eq!(w.output().await.unwrap(), None);
        w.publish_output(None).await.unwrap();
        assert_eq!(w.output().await.unwrap(), None);
        w.publish_output(Some("/out/part-0")).await.unwrap();
        assert_eq!(w.output().await.unwrap(), Some("/out/part-0".to_string()));
    }

    #[tokio::test]
    async fn estado_invalido_es_error() {
        let store = InMemoryStore::new();
        let w = WorkerHandle::new(&store, 4);
        w.register("h").await.unwrap();
        store.set_attribute(w.path(), ATTR_STATE, "ZOMBIE").await.unwrap();

        assert!(matches!(w.state().await, Err(StoreError::InvalidValue { .. })));
    }

    #[tokio::test]
    async fn summary_cuenta_map_files() {
        let store = InMemoryStore::new();
        let w = WorkerHandle::new(&store, 5);
        w.register("h").await.unwrap();
        w.publish_map_file(0, "/data/m5-0").await.unwrap();
        w.publish_map_file(3, "/data/m5-3").await.unwrap();
        w.set_state(WorkerState::DoneMap).await.unwrap();

        let s = w.summary().await.unwrap();
        assert_eq!(s.map_files, 2);
        assert_eq!(s.state, WorkerState::DoneMap);
        assert_eq!(w.map_file(3).await.unwrap(), Some("/data/m5-3".to_string()));
        assert_eq!(w.map_file(1).await.unwrap(), None);
    }
}
