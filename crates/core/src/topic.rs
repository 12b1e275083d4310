//! Bounded multi-subscriber publish/subscribe channel.
//!
//! Every subscription owns its own bounded ring buffer (a dedicated
//! `tokio::sync::broadcast` channel), so a slow subscriber only ever loses its
//! own oldest elements and never slows the publisher or its siblings.
//!
//! Overflow policy is drop-oldest: once a subscription's buffer is full the
//! oldest queued element is overwritten and the subscriber is told how many
//! elements it missed on its next receive. Capacities are rounded up to the
//! next power of two by the underlying channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use log::debug;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::errors::{Error, Result};

/// Why a receive did not yield an element.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    /// The subscriber fell behind and this many elements were dropped.
    /// The next receive continues with the oldest retained element.
    #[error("subscription lagged, {0} element(s) dropped")]
    Lagged(u64),

    /// The topic was closed and every queued element has been received.
    #[error("topic closed")]
    Closed,
}

struct TopicInner<T> {
    name: String,
    subscribers: RwLock<Vec<broadcast::Sender<T>>>,
    closed: AtomicBool,
    published: AtomicU64,
}

/// Handle to a topic. Cloning is cheap and shares the subscriber set.
pub struct Topic<T> {
    inner: Arc<TopicInner<T>>,
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Topic<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TopicInner {
                name: name.into(),
                subscribers: RwLock::new(Vec::new()),
                closed: AtomicBool::new(false),
                published: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Attaches a new subscriber with its own queue of `backlog` elements.
    ///
    /// The subscriber only sees elements published after this call returns.
    pub fn subscribe(&self, backlog: usize) -> Result<Subscription<T>> {
        if backlog == 0 {
            return Err(Error::InvalidConfigValue(format!(
                "topic '{}' subscription backlog must be greater than zero",
                self.inner.name
            )));
        }

        let (tx, rx) = broadcast::channel(backlog);
        {
            // checked under the lock so a concurrent close() either sees the
            // new sender or this call sees the flag
            let mut subscribers = self
                .inner
                .subscribers
                .write()
                .unwrap_or_else(|e| e.into_inner());
            if !self.inner.closed.load(Ordering::SeqCst) {
                subscribers.push(tx);
            }
        }
        debug!("Subscriber attached to topic '{}'", self.inner.name);

        Ok(Subscription {
            topic: self.inner.name.clone(),
            receiver: rx,
        })
    }

    /// Fans `element` out to every live subscription without waiting.
    ///
    /// Returns the number of subscriptions that received it. Publishing to a
    /// closed topic, or to a topic without subscribers, delivers nowhere.
    pub fn publish(&self, element: T) -> usize {
        if self.inner.closed.load(Ordering::SeqCst) {
            return 0;
        }
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        let mut delivered = 0;
        let mut has_detached = false;
        {
            let subscribers = self
                .inner
                .subscribers
                .read()
                .unwrap_or_else(|e| e.into_inner());
            for sender in subscribers.iter() {
                match sender.send(element.clone()) {
                    Ok(_) => delivered += 1,
                    Err(_) => has_detached = true,
                }
            }
        }

        if has_detached {
            self.prune();
        }
        delivered
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.prune();
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Total elements accepted by `publish` since creation.
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    /// Closes the topic. Subscribers drain what is already queued and then
    /// receive [`RecvError::Closed`].
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        debug!("Topic '{}' closed", self.inner.name);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn prune(&self) {
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|sender| sender.receiver_count() > 0);
    }
}

/// One subscriber's ordered view of a topic. Dropping it detaches.
pub struct Subscription<T> {
    topic: String,
    receiver: broadcast::Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    /// Waits for the next element in publish order.
    pub async fn recv(&mut self) -> std::result::Result<T, RecvError> {
        match self.receiver.recv().await {
            Ok(element) => Ok(element),
            Err(broadcast::error::RecvError::Lagged(n)) => Err(RecvError::Lagged(n)),
            Err(broadcast::error::RecvError::Closed) => Err(RecvError::Closed),
        }
    }

    /// Returns a queued element without waiting, if there is one.
    pub fn try_recv(&mut self) -> Option<std::result::Result<T, RecvError>> {
        match self.receiver.try_recv() {
            Ok(element) => Some(Ok(element)),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Some(Err(RecvError::Lagged(n))),
            Err(broadcast::error::TryRecvError::Closed) => Some(Err(RecvError::Closed)),
            Err(broadcast::error::TryRecvError::Empty) => None,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}
