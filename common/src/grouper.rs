use tracing::debug;

use crate::store::{CoordinationStore, StoreResult};
use crate::worker::{list_workers, WorkerHandle};

/// Junta, para una partición, los archivos intermedios que publicó cada mapper.
pub struct PartitionGrouper<'a, S: CoordinationStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: CoordinationStore + ?Sized> PartitionGrouper<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Un path por worker que tenga `mapFile-<partition>`, en el orden en que
    /// se listan los workers. Vacío si ningún mapper produjo esa partición.
    pub async fn group_files(&self, partition: u32) -> StoreResult<Vec<String>> {
        let mut files = Vec::new();
        for id in list_workers(self.store).await? {
            let worker = WorkerHandle::new(self.store, id);
            if let Some(path) = worker.map_file(partition).await? {
                files.push(path);
            }
        }
        debug!("partición {}: {} archivo(s) intermedio(s)", partition, files.len());
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    async fn mapper(store: &InMemoryStore, id: u32, partitions: &[u32]) {
        let w = WorkerHandle::new(store, id);
        w.register("h").await.unwrap();
        for p in partitions {
            w.publish_map_file(*p, &format!("/data/w{}/p{}", id, p))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn group_files_sigue_el_orden_de_los_workers() {
        let store = InMemoryStore::new();
        mapper(&store, 10, &[0, 1]).await;
        mapper(&store, 2, &[0]).await;
        mapper(&store, 9, &[1]).await;

        let g = PartitionGrouper::new(&store);
        assert_eq!(
            g.group_files(0).await.unwrap(),
            vec!["/data/w2/p0".to_string(), "/data/w10/p0".to_string()]
        );
        assert_eq!(
            g.group_files(1).await.unwrap(),
            vec!["/data/w9/p1".to_string(), "/data/w10/p1".to_string()]
        );
    }

    #[tokio::test]
    async fn group_files_vacio_e_idempotente() {
        let store = InMemoryStore::new();
        let g = PartitionGrouper::new(&store);
        assert!(g.group_files(0).await.unwrap().is_empty());

        mapper(&store, 1, &[3]).await;
        assert!(g.group_files(0).await.unwrap().is_empty());

        let first = g.group_files(3).await.unwrap();
        let second = g.group_files(3).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
    }
}
