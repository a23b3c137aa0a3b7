//! Abstracción del store de coordinación jerárquico.
//!
//! Cada entrada se identifica por una ruta absoluta (`/workers/3/output`),
//! guarda un string y un mapa de atributos, y puede tener hijos. La ruta hace
//! de "handle": `open` sólo garantiza que la entrada existe (o la crea).

mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::ops::BitOr;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("entrada no encontrada: {0}")]
    NotFound(String),

    #[error("la entrada ya existe: {0}")]
    AlreadyExists(String),

    #[error("ruta inválida: {0}")]
    InvalidPath(String),

    #[error("valor inválido en {path} ({name}): {value:?}")]
    InvalidValue {
        path: String,
        name: String,
        value: String,
    },

    #[error("error de transporte con el store: {0}")]
    Transport(String),

    #[error("lock envenenado: {0}")]
    Lock(String),
}

/// Flags de apertura, combinables con `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpenMode(u8);

impl OpenMode {
    pub const READ: OpenMode = OpenMode(0b0001);
    pub const WRITE: OpenMode = OpenMode(0b0010);
    pub const CREATE: OpenMode = OpenMode(0b0100);
    pub const CREATE_PARENTS: OpenMode = OpenMode(0b1000);
    pub const READ_WRITE: OpenMode = OpenMode(0b0011);

    pub fn contains(self, other: OpenMode) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for OpenMode {
    type Output = OpenMode;

    fn bitor(self, rhs: OpenMode) -> OpenMode {
        OpenMode(self.0 | rhs.0)
    }
}

/// Operaciones que el core necesita del store de coordinación.
///
/// Ninguna implementación reintenta: cualquier error se propaga al caller,
/// que aborta la invocación actual.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Rutas completas de los hijos de `dir`, en orden de nombre
    /// (los nombres numéricos se comparan como números).
    async fn list(&self, dir: &str) -> StoreResult<Vec<String>>;

    async fn open(&self, path: &str, mode: OpenMode) -> StoreResult<()>;

    async fn get_attribute(&self, path: &str, name: &str) -> StoreResult<String>;

    async fn set_attribute(&self, path: &str, name: &str, value: &str) -> StoreResult<()>;

    async fn store_string(&self, path: &str, value: &str) -> StoreResult<()>;

    async fn retrieve_string(&self, path: &str) -> StoreResult<String>;

    async fn exists(&self, path: &str) -> StoreResult<bool>;

    /// Borra la entrada y todo lo que cuelga de ella.
    async fn remove(&self, path: &str) -> StoreResult<()>;
}

/* --------- helpers de rutas --------- */

pub fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

pub fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Valida y normaliza una ruta absoluta (sin `/` final ni componentes vacíos).
pub fn normalize(path: &str) -> StoreResult<String> {
    if !path.starts_with('/') {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    if parts.iter().any(|p| *p == "." || *p == "..") {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(format!("/{}", parts.join("/")))
}

/// Orden de nombres con los numéricos comparados como enteros,
/// así el worker `10` queda después del `9`.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_y_parent_son_inversos() {
        let p = join("/workers/3", "output");
        assert_eq!(p, "/workers/3/output");
        assert_eq!(parent(&p), Some("/workers/3"));
        assert_eq!(parent("/workers"), Some("/"));
        assert_eq!(parent("/"), None);
        assert_eq!(join("/", "workers"), "/workers");
    }

    #[test]
    fn normalize_rechaza_rutas_relativas() {
        assert_eq!(normalize("/a//b/").unwrap(), "/a/b");
        assert!(matches!(normalize("a/b"), Err(StoreError::InvalidPath(_))));
        assert!(matches!(normalize("/a/../b"), Err(StoreError::InvalidPath(_))));
    }

    #[test]
    fn compare_names_ordena_numeros_como_enteros() {
        let mut names = vec!["10", "9", "output", "2"];
        names.sort_by(|a, b| compare_names(a, b));
        assert_eq!(names, vec!["2", "9", "10", "output"]);
    }

    #[test]
    fn open_mode_combina_flags() {
        let mode = OpenMode::READ_WRITE | OpenMode::CREATE;
        assert!(mode.contains(OpenMode::WRITE));
        assert!(mode.contains(OpenMode::CREATE));
        assert!(!mode.contains(OpenMode::CREATE_PARENTS));
    }
}
