//! Hand-off of cycle results to the host.
//!
//! Results are queued on an unbounded channel and handed to the sink from a
//! separate task, so a slow sink never stalls decoding. A sink that has gone
//! away is not an error: events are dropped.

use crate::notify::Notification;
use crate::reader::ReadingResult;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq)]
pub enum ReaderEvent {
    /// Outcome of one reading cycle
    Reading(ReadingResult),
    Notification(Notification),
}

/// Receives reader output on the delivery task.
pub trait ReadingSink: Send + Sync {
    fn reading(&self, result: ReadingResult);

    fn notification(&self, _notification: Notification) {}
}

/// Sending half of the delivery channel, owned by the reader.
#[derive(Debug, Clone, Default)]
pub struct DeliveryQueue {
    tx: Option<mpsc::UnboundedSender<ReaderEvent>>,
}

impl DeliveryQueue {
    /// A queue whose events are read directly from the returned receiver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ReaderEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (DeliveryQueue { tx: Some(tx) }, rx)
    }

    /// A queue without a sink; every event is dropped.
    pub fn detached() -> Self {
        DeliveryQueue::default()
    }

    /// Spawn the delivery task feeding `sink`. The task ends once every
    /// clone of the queue is dropped.
    pub fn spawn(sink: Arc<dyn ReadingSink>) -> (Self, JoinHandle<()>) {
        let (queue, mut rx) = DeliveryQueue::channel();
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    ReaderEvent::Reading(result) => sink.reading(result),
                    ReaderEvent::Notification(notification) => sink.notification(notification),
                }
            }
        });
        (queue, handle)
    }

    pub fn send(&self, event: ReaderEvent) {
        let Some(tx) = &self.tx else {
            log::debug!("no sink registered, dropping {event:?}");
            return;
        };
        if tx.send(event).is_err() {
            log::debug!("sink is gone, dropping event");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}
