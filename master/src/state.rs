// master/src/state.rs

use common::{FinishedPartition, InMemoryStore, JobId, JobInfo, WorkerId};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::failover::LeasePolicy;

#[derive(Clone)]
pub struct AppState {
    /// Store de coordinación que el master sirve por HTTP
    pub store: InMemoryStore,
    pub jobs: Arc<Mutex<HashMap<JobId, JobInfo>>>,
    // salidas registradas por el coordinador, por job
    pub results: Arc<Mutex<HashMap<JobId, Vec<FinishedPartition>>>>,
    // único job de reduce en curso (si hay)
    pub running_job: Arc<Mutex<Option<JobId>>>,
    pub next_worker_id: Arc<Mutex<WorkerId>>,

    pub poll_interval: Duration,
    pub lease: LeasePolicy,
}

impl AppState {
    pub fn new(poll_interval: Duration, lease: LeasePolicy) -> Self {
        Self {
            store: InMemoryStore::new(),
            jobs: Arc::new(Mutex::new(HashMap::new())),
            results: Arc::new(Mutex::new(HashMap::new())),
            running_job: Arc::new(Mutex::new(None)),
            next_worker_id: Arc::new(Mutex::new(1)),
            poll_interval,
            lease,
        }
    }
}
