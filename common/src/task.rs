use serde::{Deserialize, Serialize};

use crate::job::JobId;

/// Descripción de una tarea de reduce, tal como viaja en los atributos
/// de la entrada del worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReduceTask {
    pub job_id: JobId,
    pub partition: u32,
    pub attempt: u32,

    /// Clave del formato de salida ("text", "sequence")
    pub output_format: String,
    /// Directorio base donde se escribe `part-<partition>`
    pub output_dir: String,
    /// Nombre del reducer ("sum", "count", ...)
    pub reducer: String,
}

impl ReduceTask {
    pub fn output_path(&self) -> String {
        format!(
            "{}/part-{}",
            self.output_dir.trim_end_matches('/'),
            self.partition
        )
    }
}
