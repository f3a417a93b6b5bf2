//! Fatal startup errors (§7 taxonomy item 6). Per-message protocol errors are
//! never modeled as `Result` failures — see `relay_protocol`/the pipelines —
//! this enum exists only for conditions that should terminate the process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}
