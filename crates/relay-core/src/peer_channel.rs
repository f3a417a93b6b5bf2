//! The Registry's view of a connection's outbound duplex channel.
//!
//! The relay core has no opinion on the transport (WebSocket over an async
//! runtime, in-memory for tests, …) — it only needs to push a JSON text
//! frame and, on reconnection, close out the stale one. Keeping the trait
//! here rather than depending on `axum` directly is what lets the core be
//! exercised without spinning up a real server (see `tests` in this crate
//! and in `services/relay-server`).

use futures_util::future::BoxFuture;

/// A handle to one peer's outbound channel.
///
/// Implementations must be safe to call concurrently from whichever task
/// currently holds the `Arc<dyn PeerChannel>` — the Registry hands out
/// clones of the same handle to multiple pipelines, and per §5 a blocked
/// send is expected to block only the calling pipeline task, not the whole
/// relay.
pub trait PeerChannel: Send + Sync {
    /// Sends one JSON text frame. Returns `false` on any write failure.
    fn send_text(&self, payload: String) -> BoxFuture<'static, bool>;

    /// Closes the channel. Errors are swallowed by the caller.
    fn close(&self) -> BoxFuture<'static, ()>;
}
