use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    compare_names, file_name, normalize, parent, CoordinationStore, OpenMode, StoreError,
    StoreResult,
};

#[derive(Debug, Clone, Default)]
struct Node {
    value: String,
    attributes: HashMap<String, String>,
}

/// Store de coordinación en memoria. Lo sirve el master por HTTP y lo usan
/// los tests directamente. El mutex sólo serializa llamadas individuales.
#[derive(Clone)]
pub struct InMemoryStore {
    nodes: Arc<Mutex<BTreeMap<String, Node>>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::default());
        Self {
            nodes: Arc::new(Mutex::new(nodes)),
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, BTreeMap<String, Node>>> {
        self.nodes
            .lock()
            .map_err(|_| StoreError::Lock("nodes".to_string()))
    }
}

fn node_mut<'a>(
    nodes: &'a mut BTreeMap<String, Node>,
    path: &str,
) -> StoreResult<&'a mut Node> {
    nodes
        .get_mut(path)
        .ok_or_else(|| StoreError::NotFound(path.to_string()))
}

fn node<'a>(nodes: &'a BTreeMap<String, Node>, path: &str) -> StoreResult<&'a Node> {
    nodes
        .get(path)
        .ok_or_else(|| StoreError::NotFound(path.to_string()))
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn list(&self, dir: &str) -> StoreResult<Vec<String>> {
        let dir = normalize(dir)?;
        let nodes = self.lock()?;
        node(&nodes, &dir)?;

        let mut children: Vec<String> = nodes
            .keys()
            .filter(|k| k.as_str() != "/" && parent(k) == Some(dir.as_str()))
            .cloned()
            .collect();
        children.sort_by(|a, b| compare_names(file_name(a), file_name(b)));
        Ok(children)
    }

    async fn open(&self, path: &str, mode: OpenMode) -> StoreResult<()> {
        let path = normalize(path)?;
        let mut nodes = self.lock()?;

        if nodes.contains_key(&path) {
            return Ok(());
        }
        if !mode.contains(OpenMode::CREATE) {
            return Err(StoreError::NotFound(path));
        }

        // ancestros que faltan, de arriba hacia abajo
        let mut missing = Vec::new();
        let mut cursor = parent(&path);
        while let Some(p) = cursor {
            if nodes.contains_key(p) {
                break;
            }
            missing.push(p.to_string());
            cursor = parent(p);
        }

        if !missing.is_empty() && !mode.contains(OpenMode::CREATE_PARENTS) {
            let first = missing.pop().unwrap_or_default();
            return Err(StoreError::NotFound(first));
        }

        for p in missing.into_iter().rev() {
            nodes.insert(p, Node::default());
        }
        nodes.insert(path, Node::default());
        Ok(())
    }

    async fn get_attribute(&self, path: &str, name: &str) -> StoreResult<String> {
        let path = normalize(path)?;
        let nodes = self.lock()?;
        node(&nodes, &path)?
            .attributes
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{}#{}", path, name)))
    }

    async fn set_attribute(&self, path: &str, name: &str, value: &str) -> StoreResult<()> {
        let path = normalize(path)?;
        let mut nodes = self.lock()?;
        node_mut(&mut nodes, &path)?
            .attributes
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn store_string(&self, path: &str, value: &str) -> StoreResult<()> {
        let path = normalize(path)?;
        let mut nodes = self.lock()?;
        node_mut(&mut nodes, &path)?.value = value.to_string();
        Ok(())
    }

    async fn retrieve_string(&self, path: &str) -> StoreResult<String> {
        let path = normalize(path)?;
        let nodes = self.lock()?;
        Ok(node(&nodes, &path)?.value.clone())
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        let path = normalize(path)?;
        let nodes = self.lock()?;
        Ok(nodes.contains_key(&path))
    }

    async fn remove(&self, path: &str) -> StoreResult<()> {
        let path = normalize(path)?;
        if path == "/" {
            return Err(StoreError::InvalidPath(path));
        }
        let mut nodes = self.lock()?;
        if nodes.remove(&path).is_none() {
            return Err(StoreError::NotFound(path));
        }
        let prefix = format!("{}/", path);
        nodes.retain(|k, _| !k.starts_with(&prefix));
        Ok(())
    }
}
