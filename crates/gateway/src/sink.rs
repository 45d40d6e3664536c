use controller::RenderSink;
use schema::{Detection, Frame};
use std::sync::Arc;
use tokio::sync::broadcast;

/// One rendered iteration, shared by every connected client.
#[derive(Debug, Clone)]
pub struct FramePacket {
    pub frame: Arc<Frame>,
    pub detections: Arc<[Detection]>,
}

/// Fans rendered frames out to WebSocket clients.
///
/// Slow clients lag and skip frames; the loop never waits on them.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<FramePacket>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FramePacket> {
        self.tx.subscribe()
    }
}

impl RenderSink for BroadcastSink {
    fn render(&self, frame: &Frame, detections: &[Detection]) {
        if self.tx.receiver_count() == 0 {
            return;
        }
        let _ = self.tx.send(FramePacket {
            frame: Arc::new(frame.clone()),
            detections: detections.into(),
        });
    }
}
