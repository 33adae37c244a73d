//! Shared error kinds that cross the crate boundaries in this workspace. Each owning crate also
//! defines its own narrower error enum; the kinds here are the ones that end up surfaced verbatim
//! at the two HTTP endpoints, so they live where both the query and autopilot sides can name them
//! without a dependency cycle.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("transport error talking to remote store: {0}")]
    Transport(String),
    #[error("host does not own the requested partition")]
    NotOwner,
    #[error("failed to deserialize remote response: {0}")]
    Deserialization(String),
    #[error("stub queried before initialize()")]
    NotInitialized,
}
