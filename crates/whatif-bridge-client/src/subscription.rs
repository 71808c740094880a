//! Client-side handle for a running subscription.

use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use whatif_core::{Result, RichValue};

/// Sends `subscription.stop` for an id.
pub type StopFn = Box<dyn FnOnce(u64) + Send + Sync>;

/// Events of one subscription.
///
/// The stream ends after the server reports `stopped`. A reconnect
/// notification or a dropped connection ends it with an error. Dropping the
/// handle early asks the server to stop.
pub struct Subscription {
    id: u64,
    events: mpsc::UnboundedReceiver<Result<RichValue>>,
    stop: Option<StopFn>,
    finished: bool,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    pub fn new(id: u64, events: mpsc::UnboundedReceiver<Result<RichValue>>, stop: StopFn) -> Self {
        Self {
            id,
            events,
            stop: Some(stop),
            finished: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Ask the server to stop; remaining events drain until `stopped`.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop(self.id);
        }
    }
}

impl Stream for Subscription {
    type Item = Result<RichValue>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.events.poll_recv(cx);
        if let Poll::Ready(None) = polled {
            self.finished = true;
        }
        polled
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.finished {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_drop_before_end_sends_stop() {
        let stopped = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&stopped);
        let (_tx, rx) = mpsc::unbounded_channel();
        let sub = Subscription::new(9, rx, Box::new(move |id| seen.store(id, Ordering::SeqCst)));
        drop(sub);
        assert_eq!(stopped.load(Ordering::SeqCst), 9);
    }

    #[tokio::test]
    async fn test_finished_stream_does_not_stop_again() {
        let stopped = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&stopped);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sub = Subscription::new(4, rx, Box::new(move |id| seen.store(id, Ordering::SeqCst)));

        tx.send(Ok(RichValue::from(1i64))).unwrap();
        drop(tx);
        assert_eq!(sub.next().await.unwrap().unwrap(), RichValue::from(1i64));
        assert!(sub.next().await.is_none());
        drop(sub);
        assert_eq!(stopped.load(Ordering::SeqCst), 0);
    }
}
