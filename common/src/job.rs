use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use crate::worker::WorkerId;

pub type JobId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReduceJobRequest {
    pub name: String,

    /// Cantidad de particiones que dejó la fase map (`mapFile-0..N`)
    pub partitions: u32,

    /// Formato de salida, ej: "text"
    pub output_format: String,

    /// Reducer a aplicar, ej: "sum"
    pub reducer: String,

    /// Directorio base de salida, ej: "/data/output"
    pub output_dir: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Accepted,
    Running,
    Failed,
    Succeeded,
}

/// Salida de una partición ya terminada. `output` es `None` cuando la
/// partición no tenía archivos intermedios.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishedPartition {
    pub partition: u32,
    pub worker_id: WorkerId,
    pub output: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,

    pub partitions: u32,
    pub output_format: String,
    pub reducer: String,
    pub output_dir: String,

    /// -------- Métricas del job --------
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub assigned_partitions: u32,
    pub completed_partitions: u32,
    pub reassignments: u32,
    pub error: Option<String>,
}
