use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{MessageBus, SinkError};
use crate::core::results::BlockMessage;

/// Writes each block message as one JSON line to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogBus;

#[async_trait]
impl MessageBus for LogBus {
    async fn send(&self, message: &BlockMessage) -> Result<(), SinkError> {
        let json = serde_json::to_string(message).map_err(|e| SinkError::Bus(e.to_string()))?;
        if message.useful_info() {
            log::info!("block message {}: {json}", message.height);
        } else {
            log::debug!("block message {}: {json}", message.height);
        }
        Ok(())
    }
}

/// Forwards block messages into a channel, for embedding and tests.
pub struct ChannelBus {
    tx: mpsc::UnboundedSender<BlockMessage>,
}

impl ChannelBus {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BlockMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl MessageBus for ChannelBus {
    async fn send(&self, message: &BlockMessage) -> Result<(), SinkError> {
        self.tx
            .send(message.clone())
            .map_err(|_| SinkError::Bus("receiver dropped".to_string()))
    }
}
