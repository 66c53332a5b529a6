use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::model::ActionResult;

/// Where workers publish finished actions.
///
/// The scheduler hands workers a sink rather than a reference to itself,
/// which keeps the scheduler ↔ worker dependency one-directional; concrete
/// channels are injected at pool construction.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn publish(&self, result: ActionResult);
}

/// The standard sink: an mpsc channel back to the scheduler loop.
pub struct ChannelSink {
    tx: mpsc::Sender<ActionResult>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ActionResult>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ResultSink for ChannelSink {
    async fn publish(&self, result: ActionResult) {
        // A dropped receiver means the scheduler is already gone; there is
        // nobody left to care about this result.
        let _ = self.tx.send(result).await;
    }
}
