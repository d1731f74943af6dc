//! Coalescing of concurrent duplicate resolves.
//!
//! Resolving is slow (multiple network round trips) and bursts of identical
//! lookups are common, so concurrent resolves of the same pre-canonicalized
//! URL collapse into one underlying operation whose result every caller
//! shares.
//!
//! The shared operation runs as a detached task: once started it completes
//! under the resolver's own deadline even if every caller goes away, so one
//! impatient caller cannot abort the fetch for later arrivals.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::debug;
use tokio::sync::watch;

use crate::canonical::pre_canonicalize;
use crate::resolver::{ErrorKind, Resolution, ResolveError, ResolveResult, Resolver};

type Shared = watch::Receiver<Option<ResolveResult>>;

/// Wraps a resolver so that concurrent resolves of the same URL share one
/// underlying call.
pub struct SingleflightResolver<R> {
    inner: Arc<R>,
    in_flight: Arc<Mutex<HashMap<String, Shared>>>,
}

impl<R: Resolver + 'static> SingleflightResolver<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: Arc::new(inner),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl<R: Resolver + 'static> Resolver for SingleflightResolver<R> {
    async fn resolve(&self, url: &str) -> ResolveResult {
        let key = pre_canonicalize(url);

        let (mut rx, leader) = {
            let mut in_flight = self.in_flight.lock().expect("in-flight lock poisoned");
            match in_flight.get(&key) {
                Some(rx) => (rx.clone(), false),
                None => {
                    let (tx, rx) = watch::channel(None);
                    in_flight.insert(key.clone(), rx.clone());

                    let inner = Arc::clone(&self.inner);
                    let map = Arc::clone(&self.in_flight);
                    let task_key = key.clone();
                    tokio::spawn(async move {
                        let outcome = inner.resolve(&task_key).await;
                        // Deregister before publishing so that a caller
                        // arriving after completion starts a fresh flight.
                        map.lock().expect("in-flight lock poisoned").remove(&task_key);
                        // Every caller may have gone away already.
                        let _ = tx.send(Some(outcome));
                    });

                    (rx, true)
                }
            }
        };

        let mut outcome = loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                break outcome;
            }
            if rx.changed().await.is_err() {
                // The shared task vanished without publishing a value.
                break Err(ResolveError::new(
                    ErrorKind::Canceled,
                    Resolution::new(key.clone()),
                ));
            }
        };

        if !leader {
            debug!("coalesced resolve for {key}");
            match &mut outcome {
                Ok(resolution) => resolution.coalesced = true,
                Err(err) => err.resolution.coalesced = true,
            }
        }
        outcome
    }
}
