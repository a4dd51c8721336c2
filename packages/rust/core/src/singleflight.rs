//! Collapse concurrent identical upstream calls into one.
//!
//! The first caller for a key becomes the leader: its future is spawned as
//! a task, so a caller that gives up (cancellation, deadline) does not abort
//! work other callers are waiting on. Every caller that joined before the
//! leader finished receives a clone of the same result, errors included.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use campusbot_shared::{CampusBotError, RequestContext, Result};
use tokio::sync::{Mutex, broadcast};

pub struct SingleFlight<K, T> {
    calls: Arc<Mutex<HashMap<K, broadcast::Sender<Result<T>>>>>,
}

impl<K, T> Default for SingleFlight<K, T> {
    fn default() -> Self {
        Self {
            calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `make()` for `key` unless a call for the same key is already in
    /// flight, in which case wait for that call's result.
    ///
    /// `make` is only invoked by the leader. Waiting honours `ctx`; the
    /// shared call itself must carry its own context.
    pub async fn run<F, Fut>(&self, ctx: &RequestContext, key: K, make: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        ctx.check()?;
        let mut rx = {
            let mut calls = self.calls.lock().await;
            match calls.get(&key) {
                Some(tx) => {
                    tracing::debug!("joining in-flight call");
                    tx.subscribe()
                }
                None => {
                    let (tx, rx) = broadcast::channel(1);
                    calls.insert(key.clone(), tx);
                    self.spawn_leader(key, make());
                    rx
                }
            }
        };

        ctx.run(async move {
            rx.recv()
                .await
                .map_err(|_| CampusBotError::Unavailable("in-flight call was dropped".into()))?
        })
        .await
    }

    fn spawn_leader<Fut>(&self, key: K, fut: Fut)
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let calls = Arc::clone(&self.calls);
        tokio::spawn(async move {
            // A panicking call must still release its waiters and its key.
            let result = match tokio::spawn(fut).await {
                Ok(result) => result,
                Err(e) => Err(CampusBotError::Unavailable(format!(
                    "in-flight call failed: {e}"
                ))),
            };
            // Remove before sending so a caller arriving after this point
            // starts a fresh call instead of waiting on a finished one.
            let tx = calls.lock().await.remove(&key);
            if let Some(tx) = tx {
                let _ = tx.send(result);
            }
        });
    }

    /// Keys with a call currently in flight.
    pub async fn in_flight(&self) -> usize {
        self.calls.lock().await.len()
    }
}
