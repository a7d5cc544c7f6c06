use neorex_common::types::UInt256;
use tokio::sync::broadcast;
use tracing::trace;

use crate::constants::EVENT_CHANNEL_CAPACITY;

/// Why a transaction left the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    Included,
    Expired,
    ReverifyFailed,
    Evicted,
    Conflict,
}

/// Fire-and-forget node events for observers (network relay, metrics,
/// consensus reset).
#[derive(Debug, Clone)]
pub enum NodeEvent {
    BlockPersisted { height: u32, hash: UInt256 },
    TxAdded { hash: UInt256 },
    TxRemoved { hash: UInt256, reason: RemovalReason },
    ConsensusPhase { height: u32, view: u8, phase: &'static str },
}

/// Bounded fan-out bus. Emission never blocks; observers that fall behind
/// the channel capacity see a lag error and miss events instead of stalling
/// the executor or consensus task.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<NodeEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: NodeEvent) {
        trace!(?event, "node event");
        // No receivers is fine; events are advisory.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_subscribers() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();
        bus.emit(NodeEvent::BlockPersisted {
            height: 1,
            hash: UInt256::zero(),
        });
        match receiver.recv().await.expect("event") {
            NodeEvent::BlockPersisted { height, .. } => assert_eq!(height, 1),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn emit_without_subscribers_is_noop() {
        let bus = EventBus::new();
        bus.emit(NodeEvent::TxAdded {
            hash: UInt256::zero(),
        });
    }
}
