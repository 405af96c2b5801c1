//! Keyed message dispatch
//!
//! One task per message, with a cap on messages in flight. Messages that
//! share a key run one at a time in arrival order; a message whose key is
//! still busy holds back dispatch until the earlier one finishes.

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;

/// Messages processed concurrently by a consumer
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

#[derive(Clone)]
pub struct KeyedDispatcher {
    limit: Arc<Semaphore>,
    keys: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl Default for KeyedDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IN_FLIGHT)
    }
}

impl KeyedDispatcher {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            limit: Arc::new(Semaphore::new(max_in_flight.max(1))),
            keys: Arc::new(DashMap::new()),
        }
    }

    /// Wait for a free slot and for earlier work on `key`, then spawn `work`.
    pub async fn dispatch<F>(&self, key: String, work: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // the semaphore is never closed
        let permit = self.limit.clone().acquire_owned().await.ok();
        let lock = self.keys.entry(key.clone()).or_default().clone();
        let guard = lock.lock_owned().await;
        let keys = self.keys.clone();

        tokio::spawn(async move {
            work.await;
            drop(guard);
            keys.remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
            drop(permit);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_busy_key_does_not_block_others() {
        let dispatcher = KeyedDispatcher::new(4);
        let (release, gate) = oneshot::channel::<()>();
        let slow = dispatcher
            .dispatch("payment-a".into(), async move {
                let _ = gate.await;
            })
            .await;

        let fast = dispatcher.dispatch("payment-b".into(), async {}).await;
        tokio::time::timeout(Duration::from_secs(1), fast)
            .await
            .expect("unrelated key waited on a slow one")
            .unwrap();
        assert!(!slow.is_finished());

        release.send(()).unwrap();
        slow.await.unwrap();
        assert!(dispatcher.keys.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_key_runs_in_order() {
        let dispatcher = KeyedDispatcher::new(4);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        let first = {
            let seen = seen.clone();
            dispatcher
                .dispatch("payment-a".into(), async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    seen.lock().unwrap().push(1);
                })
                .await
        };
        let second = {
            let seen = seen.clone();
            dispatcher
                .dispatch("payment-a".into(), async move {
                    seen.lock().unwrap().push(2);
                })
                .await
        };
        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_limit() {
        let dispatcher = KeyedDispatcher::new(1);
        let (release, gate) = oneshot::channel::<()>();
        let slow = dispatcher
            .dispatch("payment-a".into(), async move {
                let _ = gate.await;
            })
            .await;

        let blocked = tokio::time::timeout(
            Duration::from_millis(10),
            dispatcher.dispatch("payment-b".into(), async {}),
        )
        .await;
        assert!(blocked.is_err());

        release.send(()).unwrap();
        slow.await.unwrap();
        dispatcher
            .dispatch("payment-b".into(), async {})
            .await
            .await
            .unwrap();
    }
}
