//! Pending dispatches keyed by trace id.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use {
    homegw_protocol::DispatchResponse,
    tokio::sync::mpsc::{self, error::TrySendError},
};

use crate::error::{Error, Result};

/// What happened to a reply handed to [`WaiterRegistry::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The waiter already holds a reply; this one was dropped.
    Duplicate,
    /// Nobody is waiting on this trace id any more.
    Orphaned,
}

/// Map of trace id to single-slot reply channel.
///
/// Lookups take the read lock; only [`register`](Self::register) and the
/// [`Waiter`] drop path take the write lock.
#[derive(Default)]
pub struct WaiterRegistry {
    waiters: RwLock<HashMap<String, mpsc::Sender<DispatchResponse>>>,
}

impl WaiterRegistry {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Start waiting for the reply to `trace_id`.
    ///
    /// The entry lives exactly as long as the returned [`Waiter`].
    pub fn register(self: &Arc<Self>, trace_id: &str) -> Result<Waiter> {
        let (tx, rx) = mpsc::channel(1);
        {
            let mut waiters = self.waiters.write().unwrap_or_else(PoisonError::into_inner);
            if waiters.contains_key(trace_id) {
                return Err(Error::DuplicateTrace(trace_id.to_string()));
            }
            waiters.insert(trace_id.to_string(), tx);
        }
        Ok(Waiter {
            trace_id: trace_id.to_string(),
            rx,
            registry: Arc::clone(self),
        })
    }

    /// Hand `response` to its waiter without blocking.
    pub fn deliver(&self, response: DispatchResponse) -> Delivery {
        let waiters = self.waiters.read().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = waiters.get(&response.trace_id) else {
            return Delivery::Orphaned;
        };
        match tx.try_send(response) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => Delivery::Duplicate,
            Err(TrySendError::Closed(_)) => Delivery::Orphaned,
        }
    }

    #[must_use]
    pub fn contains(&self, trace_id: &str) -> bool {
        self.waiters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(trace_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, trace_id: &str) {
        self.waiters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(trace_id);
    }
}

/// Receiving end of one registration. Dropping it deregisters the trace id,
/// whether the wait finished, timed out or was cancelled.
pub struct Waiter {
    trace_id: String,
    rx: mpsc::Receiver<DispatchResponse>,
    registry: Arc<WaiterRegistry>,
}

impl Waiter {
    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Wait for the reply. `None` only if the registry entry vanished.
    pub async fn recv(&mut self) -> Option<DispatchResponse> {
        self.rx.recv().await
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.registry.remove(&self.trace_id);
    }
}
