pub mod config;
pub mod grouper;
pub mod job;
pub mod merge;
pub mod output;
pub mod record;
pub mod reduce;
pub mod reducers;
pub mod results;
pub mod store;
pub mod task;
pub mod worker;

pub use grouper::PartitionGrouper;
pub use job::{FinishedPartition, JobId, JobInfo, JobStatus, ReduceJobRequest};
pub use merge::{BytesComparator, KeyComparator, MergeReader};
pub use output::{OutputFormat, OutputFormatRegistry, RecordWriter};
pub use record::{RawRecord, RawRecordReader, RecordError, SequenceFileReader, SequenceFileWriter};
pub use reduce::{run_reduce_task, ReduceError, ReduceRunner, ReduceSummary};
pub use reducers::{reducer_by_name, Reducer};
pub use results::JobResults;
pub use store::{CoordinationStore, InMemoryStore, OpenMode, StoreError, StoreResult};
pub use task::ReduceTask;
pub use worker::{
    WorkerCommand, WorkerHandle, WorkerId, WorkerRegisterRequest, WorkerRegisterResponse,
    WorkerState, WorkerSummary,
};

/* --------- API HTTP del store --------- */

use serde::{Deserialize, Serialize};

/// Cuerpo común de los endpoints `/api/v1/store/*`. Cada endpoint usa
/// sólo los campos que necesita.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreRequest {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<OpenMode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreValueResponse {
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreListResponse {
    pub entries: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreExistsResponse {
    pub exists: bool,
}

/// Error devuelto por el master cuando falla una operación del store.
/// `kind` permite rearmar el `StoreError` del otro lado.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreErrorBody {
    pub kind: String,
    pub message: String,
}

impl StoreErrorBody {
    pub fn from_error(e: &StoreError) -> Self {
        let (kind, message) = match e {
            StoreError::NotFound(p) => ("not_found", p.clone()),
            StoreError::AlreadyExists(p) => ("already_exists", p.clone()),
            StoreError::InvalidPath(p) => ("invalid_path", p.clone()),
            StoreError::InvalidValue { .. } => ("invalid_value", e.to_string()),
            StoreError::Transport(m) => ("transport", m.clone()),
            StoreError::Lock(m) => ("lock", m.clone()),
        };
        Self {
            kind: kind.to_string(),
            message,
        }
    }

    pub fn into_error(self) -> StoreError {
        match self.kind.as_str() {
            "not_found" => StoreError::NotFound(self.message),
            "already_exists" => StoreError::AlreadyExists(self.message),
            "invalid_path" => StoreError::InvalidPath(self.message),
            "lock" => StoreError::Lock(self.message),
            _ => StoreError::Transport(self.message),
        }
    }
}
