pub mod formatter;
pub mod memory;
pub mod pipeline;
pub mod router;
pub mod store;

use std::future::Future;
use std::time::Duration;

use tracing::warn;

pub use pipeline::{Pipeline, RoutePreview, TurnReply};
pub use router::IntentRouter;
pub use store::{ConversationMeta, ConversationStore, ToolRun, TurnRecord};

/// Await an optional model call under `timeout`.  Errors and elapsed
/// deadlines are logged and collapse to `None`.
pub(crate) async fn best_effort<T, F>(what: &str, timeout: Duration, call: F) -> Option<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            warn!(call = what, error = %err, "best-effort model call failed");
            None
        }
        Err(_) => {
            warn!(call = what, timeout_ms = timeout.as_millis() as u64, "best-effort model call timed out");
            None
        }
    }
}
