use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::commands::BatchDispatcher;

/// A text frame received on the connection identified by `epoch`.
#[derive(Debug, Clone)]
pub struct InboundBatch {
    pub epoch: u64,
    pub text: String,
    pub mac: String,
}

/// A reply produced for the connection identified by `epoch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub epoch: u64,
    pub text: String,
}

/// Runs batches off the receive path, one at a time, in arrival order.
///
/// The worker owns the dispatcher (and with it the ledger and the last-batch
/// memory), so dispatcher state survives reconnects.
pub struct DispatchHandle {
    inbound: mpsc::UnboundedSender<InboundBatch>,
    outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    task: JoinHandle<()>,
}

impl DispatchHandle {
    pub fn spawn(mut dispatcher: BatchDispatcher) -> Self {
        let (inbound, mut batches) = mpsc::unbounded_channel::<InboundBatch>();
        let (frames, outbound) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            while let Some(batch) = batches.recv().await {
                let outcome = dispatcher.handle_message(&batch.text, &batch.mac).await;
                let text = match outcome.to_frame() {
                    Ok(Some(text)) => text,
                    Ok(None) => continue,
                    Err(e) => {
                        error!(error = %e, "could not encode reply");
                        continue;
                    }
                };
                let frame = OutboundFrame {
                    epoch: batch.epoch,
                    text,
                };
                if frames.send(frame).is_err() {
                    break;
                }
            }
            debug!("dispatch worker stopped");
        });

        Self {
            inbound,
            outbound,
            task,
        }
    }

    /// Queue a frame for dispatch. Returns false if the worker is gone.
    pub fn submit(&self, epoch: u64, text: String, mac: String) -> bool {
        self.inbound.send(InboundBatch { epoch, text, mac }).is_ok()
    }

    /// Next reply, `None` once the worker has stopped. Cancel safe.
    pub async fn next_frame(&mut self) -> Option<OutboundFrame> {
        self.outbound.recv().await
    }
}

impl Drop for DispatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
