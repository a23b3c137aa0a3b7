//! Configuración por variables de entorno, con defaults para correr local.

use std::env;
use std::time::Duration;

pub const DEFAULT_MASTER_URL: &str = "http://localhost:8080";
pub const DEFAULT_MASTER_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_WORKER_MAP_DIR: &str = "/data/map";
pub const MAX_ASSIGNMENT_ATTEMPTS: u32 = 3;

/// URL base del master.
/// - En Docker: MASTER_URL=http://master:8080
pub fn master_url() -> String {
    env::var("MASTER_URL").unwrap_or_else(|_| DEFAULT_MASTER_URL.to_string())
}

pub fn master_bind() -> String {
    env::var("MASTER_BIND").unwrap_or_else(|_| DEFAULT_MASTER_BIND.to_string())
}

/// Intervalo entre visitas del loop de polling (master y worker).
pub fn poll_interval() -> Duration {
    let ms = env::var("POLL_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_POLL_INTERVAL_MS);
    Duration::from_millis(ms)
}

/// Lease de una asignación de reduce. Sin la variable se espera sin límite.
pub fn reduce_lease() -> Option<Duration> {
    env::var("REDUCE_LEASE_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

/// Directorio donde el worker encuentra sus `mapFile-<P>`.
pub fn worker_map_dir() -> String {
    env::var("WORKER_MAP_DIR").unwrap_or_else(|_| DEFAULT_WORKER_MAP_DIR.to_string())
}
