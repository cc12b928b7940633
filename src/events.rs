//! Typed publish/subscribe channels for ledger notifications.
//!
//! Three independent channels let subscribers observe receipt updates,
//! purchase completions, and catalog fetches without polling. Delivery
//! order equals emission order; nothing survives a process restart. The
//! receipt channel replays its latest value to new subscribers, the other
//! two are fire-only.

use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// A single typed event channel.
///
/// Cloning is cheap and all clones publish into the same stream.
#[derive(Debug)]
pub struct EventChannel<T> {
    tx: broadcast::Sender<T>,
    latest: Option<Arc<Mutex<Option<T>>>>,
}

impl<T> Clone for EventChannel<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            latest: self.latest.clone(),
        }
    }
}

impl<T: Clone> EventChannel<T> {
    /// Create a fire-only channel.
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, latest: None }
    }

    /// Create a channel that replays its latest value to new subscribers.
    pub(crate) fn with_replay(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            latest: Some(Arc::new(Mutex::new(None))),
        }
    }

    /// Publish a value to all current subscribers, synchronously with the
    /// caller.
    pub(crate) fn emit(&self, value: T) {
        match &self.latest {
            Some(latest) => {
                // Holding the lock across send keeps subscribe() from
                // observing the value both as replay and as a live event.
                let mut latest = latest.lock().expect("event channel lock poisoned");
                *latest = Some(value.clone());
                let _ = self.tx.send(value);
            }
            None => {
                let _ = self.tx.send(value);
            }
        }
    }

    /// Subscribe to every subsequent emission.
    ///
    /// On a replay channel the stream first yields the most recent value,
    /// if one exists.
    pub fn subscribe(&self) -> EventStream<T> {
        match &self.latest {
            Some(latest) => {
                let latest = latest.lock().expect("event channel lock poisoned");
                EventStream {
                    rx: self.tx.subscribe(),
                    replay: latest.clone(),
                }
            }
            None => EventStream {
                rx: self.tx.subscribe(),
                replay: None,
            },
        }
    }
}

/// A subscription handle yielding events in emission order.
#[derive(Debug)]
pub struct EventStream<T> {
    rx: broadcast::Receiver<T>,
    replay: Option<T>,
}

impl<T: Clone> EventStream<T> {
    /// Wait for the next event.
    ///
    /// Returns `None` once the channel is closed and drained. A subscriber
    /// that falls behind the channel capacity skips to the oldest retained
    /// event rather than failing.
    pub async fn next(&mut self) -> Option<T> {
        if let Some(value) = self.replay.take() {
            return Some(value);
        }
        loop {
            match self.rx.recv().await {
                Ok(value) => return Some(value),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Return the next event if one is already queued.
    pub fn try_next(&mut self) -> Option<T> {
        if let Some(value) = self.replay.take() {
            return Some(value);
        }
        loop {
            match self.rx.try_recv() {
                Ok(value) => return Some(value),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
