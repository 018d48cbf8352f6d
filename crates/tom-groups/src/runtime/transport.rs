use crate::types::{NodeId, Priority};

/// Network abstraction for the group runtime.
///
/// In production: the node's session layer.
/// In tests: `MockTransport`, which records what was sent.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Hand raw envelope bytes to the network for `target`.
    async fn send_raw(&self, target: NodeId, data: &[u8], priority: Priority) -> Result<(), String>;
}

// ── MockTransport (tests) ───────────────────────────────────────────
