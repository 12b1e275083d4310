//! Bridges an external change feed onto a topic.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::constants::FEED_RETRY_DELAY;
use crate::errors::Result;
use crate::topic::Topic;

/// A source of change elements, such as a database outbox.
///
/// `next_batch` may wait for new elements; an empty batch is allowed.
#[async_trait]
pub trait ChangeFeed<E>: Send + Sync {
    async fn next_batch(&self) -> Result<Vec<E>>;
}

/// Publishes everything `feed` yields onto `topic` until cancelled.
///
/// Feed errors are logged and retried after a short delay.
pub async fn run_feed_bridge<E>(
    name: &str,
    feed: Arc<dyn ChangeFeed<E>>,
    topic: Topic<E>,
    cancel: CancellationToken,
) where
    E: Clone + Send + 'static,
{
    info!("Feed bridge '{}' started for topic '{}'", name, topic.name());

    loop {
        let batch = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            batch = feed.next_batch() => batch,
        };

        match batch {
            Ok(elements) => {
                if !elements.is_empty() {
                    debug!("Feed bridge '{}' publishing {} element(s)", name, elements.len());
                }
                for element in elements {
                    topic.publish(element);
                }
            }
            Err(e) => {
                warn!(
                    "Feed bridge '{}' failed to read: {}. Retrying in {:?}",
                    name, e, FEED_RETRY_DELAY
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(FEED_RETRY_DELAY) => {}
                }
            }
        }
    }

    info!("Feed bridge '{}' stopped", name);
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::errors::Error;

    struct ScriptedFeed {
        script: Mutex<VecDeque<Result<Vec<u32>>>>,
    }

    impl ScriptedFeed {
        fn new(script: Vec<Result<Vec<u32>>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
            }
        }
    }

    #[async_trait]
    impl ChangeFeed<u32> for ScriptedFeed {
        async fn next_batch(&self) -> Result<Vec<u32>> {
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(batch) => batch,
                None => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(Vec::new())
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_in_feed_order_across_errors() {
        let topic = Topic::new("numbers");
        let mut sub = topic.subscribe(16).unwrap();
        let feed = Arc::new(ScriptedFeed::new(vec![
            Ok(vec![1, 2]),
            Err(Error::Unexpected("outbox unavailable".to_string())),
            Ok(vec![3]),
        ]));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_feed_bridge(
            "numbers",
            feed,
            topic.clone(),
            cancel.clone(),
        ));

        for expected in 1..=3 {
            assert_eq!(sub.recv().await.unwrap(), expected);
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_retry_delay() {
        let topic: Topic<u32> = Topic::new("numbers");
        let feed = Arc::new(ScriptedFeed::new(vec![Err(Error::Unexpected(
            "down".to_string(),
        ))]));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_feed_bridge("numbers", feed, topic, cancel.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_millis(50), handle)
            .await
            .expect("bridge should stop before the retry delay elapses")
            .unwrap();
    }
}
