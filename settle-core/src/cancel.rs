//! Cancellation signal shared between a caller and its waits

use std::sync::Arc;

use tokio::sync::watch;

/// Cloneable cancellation token.
///
/// Every clone observes the same signal; once cancelled it stays cancelled.
#[derive(Debug, Clone)]
pub struct Cancellation {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Cancellation {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Signal cancellation to every clone
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once cancellation has been signalled
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        let signalled = receiver.wait_for(|cancelled| *cancelled).await.is_ok();
        if !signalled {
            // Sender dropped: no cancellation can arrive any more.
            std::future::pending::<()>().await;
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}
