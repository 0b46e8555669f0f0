//! Error types for the navigation core.
//!
//! Ordinary navigation outcomes are *values*: a blocked path is a `PathState`, a
//! stale background computation is silently dropped. [`NavError`] covers the
//! remaining cases: world races (an entity closed while being tested), invariant
//! violations, and setup failures.

use crate::host::EntityId;

/// Errors raised by the navigation core.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum NavError {
    /// The controlled vehicle was closed or removed from the world.
    #[error("vehicle {0} is closed")]
    VehicleClosed(EntityId),

    /// An entity being tested against was closed mid-operation.
    #[error("entity {0} is closed")]
    EntityClosed(EntityId),

    /// A programming error: a required value was missing or a computation that
    /// cannot fail by construction did.
    #[error("invariant violated: {0}")]
    Invariant(&'static str),

    /// A settings value is out of its valid range.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// A worker pool could not be created.
    #[error("failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// A bounded work queue was full and the item was dropped.
    #[error("work queue is full")]
    QueueFull,
}

impl NavError {
    /// Invariant violations indicate a programming error and are logged at error
    /// level; world races are expected and logged as warnings.
    pub fn log(&self, context: &str) {
        match self {
            NavError::Invariant(_) => log::error!("{context}: {self}"),
            _ => log::warn!("{context}: {self}"),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NavError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_entity() {
        assert!(NavError::VehicleClosed(7).to_string().contains('7'));
        assert!(
            NavError::InvalidSettings("speed".into())
                .to_string()
                .contains("speed")
        );
    }
}
