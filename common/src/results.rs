use serde::{Deserialize, Serialize};

use crate::job::{FinishedPartition, JobId, JobStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResults {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Directorio donde quedaron los outputs de este job
    pub output_dir: String,
    /// Particiones terminadas hasta ahora, en orden de llegada
    pub finished: Vec<FinishedPartition>,
    /// Archivos `part-*` ya publicados en `output_dir` (si el master lo ve)
    #[serde(default)]
    pub files: Vec<String>,
}
