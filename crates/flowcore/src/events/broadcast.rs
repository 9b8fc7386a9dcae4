use super::{ExecutionHook, HookEvent};
use crate::HookError;
use tokio::sync::broadcast;

/// Hook that republishes events on a broadcast channel.
///
/// Sending never blocks; slow subscribers lag and lose the oldest events.
/// Having no subscribers is not an error.
pub struct BroadcastHook {
    sender: broadcast::Sender<HookEvent>,
}

impl BroadcastHook {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HookEvent> {
        self.sender.subscribe()
    }
}

impl ExecutionHook for BroadcastHook {
    fn name(&self) -> &str {
        "broadcast"
    }

    fn on_event(&self, event: &HookEvent) -> Result<(), HookError> {
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}
