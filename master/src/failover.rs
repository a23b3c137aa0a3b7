use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use common::config;

/// Política de lease sobre asignaciones de reduce.
///
/// Sin lease el coordinador espera indefinidamente a cada worker. Con lease,
/// una asignación que supera el tiempo sin llegar a DONE_REDUCE se revoca y
/// la partición se vuelve a emitir, hasta `max_attempts` veces.
#[derive(Debug, Clone, Copy)]
pub struct LeasePolicy {
    pub lease: Option<Duration>,
    pub max_attempts: u32,
}

impl Default for LeasePolicy {
    fn default() -> Self {
        Self {
            lease: None,
            max_attempts: config::MAX_ASSIGNMENT_ATTEMPTS,
        }
    }
}

impl LeasePolicy {
    pub fn from_env() -> Self {
        Self {
            lease: config::reduce_lease(),
            ..Self::default()
        }
    }

    pub fn expired(&self, issued_at: Instant, now: Instant) -> bool {
        match self.lease {
            Some(lease) => now.saturating_duration_since(issued_at) > lease,
            None => false,
        }
    }

    /// Decide si una partición revocada en el intento `attempt` (base 0)
    /// se puede volver a emitir.
    pub fn can_retry(&self, partition: u32, attempt: u32) -> bool {
        if attempt + 1 < self.max_attempts {
            return true;
        }
        warn!(
            "partición {} superó el máximo de intentos ({})",
            partition, self.max_attempts
        );
        false
    }
}
