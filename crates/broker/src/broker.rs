//! Request/reply correlation over a pub/sub transport.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use {
    bytes::Bytes,
    futures::StreamExt,
    homegw_protocol::{DispatchRequest, DispatchResponse},
    tokio::task::JoinHandle,
    tracing::{debug, error, info, warn},
};

use crate::{
    error::{Error, Result},
    registry::{Delivery, WaiterRegistry},
    transport::{PayloadStream, PubSubTransport},
};

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub request_topic: String,
    pub response_topic: String,
    pub response_timeout: Duration,
}

/// Publishes dispatch requests and pairs them with worker replies by trace id.
///
/// One background task per broker reads the response topic for the
/// broker's lifetime and is aborted on drop.
pub struct CorrelationBroker {
    transport: Arc<dyn PubSubTransport>,
    config: BrokerConfig,
    registry: Arc<WaiterRegistry>,
    healthy: Arc<AtomicBool>,
    delivery: JoinHandle<()>,
}

impl CorrelationBroker {
    /// Subscribe to the response topic and start the delivery loop.
    pub async fn start(transport: Arc<dyn PubSubTransport>, config: BrokerConfig) -> Result<Self> {
        let stream = transport.subscribe(&config.response_topic).await?;
        let registry = WaiterRegistry::new();
        let healthy = Arc::new(AtomicBool::new(true));

        let delivery = tokio::spawn(delivery_loop(
            stream,
            config.response_topic.clone(),
            Arc::clone(&registry),
            Arc::clone(&healthy),
        ));

        info!(
            request_topic = %config.request_topic,
            response_topic = %config.response_topic,
            timeout_ms = config.response_timeout.as_millis() as u64,
            "correlation broker started"
        );
        Ok(Self {
            transport,
            config,
            registry,
            healthy,
            delivery,
        })
    }

    /// Publish `request` and wait up to `timeout` for its reply.
    ///
    /// The registry entry is removed on every exit path, including when the
    /// returned future is dropped. Timeouts are not retried.
    pub async fn dispatch(
        &self,
        request: &DispatchRequest,
        timeout: Duration,
    ) -> Result<DispatchResponse> {
        let trace_id = request.trace_id.as_str();
        let payload = Bytes::from(serde_json::to_vec(request)?);
        let mut waiter = self.registry.register(trace_id)?;

        if !self.is_healthy() {
            warn!(trace_id, "dispatching while response subscription is closed");
        }

        self.transport
            .publish(&self.config.request_topic, trace_id, payload)
            .await?;
        debug!(
            trace_id,
            processor_id = %request.processor_id,
            topic = %self.config.request_topic,
            "dispatch request published"
        );

        let started = Instant::now();
        match tokio::time::timeout(timeout, waiter.recv()).await {
            Ok(Some(response)) => {
                debug!(
                    trace_id,
                    success = response.success,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "dispatch fulfilled"
                );
                Ok(response)
            },
            Ok(None) => Err(Error::SubscriptionClosed),
            Err(_) => {
                warn!(
                    trace_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "dispatch timed out"
                );
                Err(Error::Timeout {
                    trace_id: trace_id.to_string(),
                    timeout,
                })
            },
        }
    }

    /// [`dispatch`](Self::dispatch) with the configured response timeout.
    pub async fn dispatch_default(&self, request: &DispatchRequest) -> Result<DispatchResponse> {
        self.dispatch(request, self.config.response_timeout).await
    }

    /// `false` once the response subscription has ended.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Number of dispatches currently awaiting a reply.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.registry.len()
    }

    #[must_use]
    pub fn is_waiting(&self, trace_id: &str) -> bool {
        self.registry.contains(trace_id)
    }

    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    #[must_use]
    pub fn transport(&self) -> Arc<dyn PubSubTransport> {
        Arc::clone(&self.transport)
    }
}

impl Drop for CorrelationBroker {
    fn drop(&mut self) {
        self.delivery.abort();
    }
}

async fn delivery_loop(
    mut stream: PayloadStream,
    topic: String,
    registry: Arc<WaiterRegistry>,
    healthy: Arc<AtomicBool>,
) {
    while let Some(payload) = stream.next().await {
        let response: DispatchResponse = match serde_json::from_slice(&payload) {
            Ok(r) => r,
            Err(e) => {
                warn!(topic = %topic, error = %e, bytes = payload.len(), "undecodable dispatch response");
                continue;
            },
        };
        let trace_id = response.trace_id.clone();
        match registry.deliver(response) {
            Delivery::Delivered => debug!(trace_id = %trace_id, "response delivered"),
            Delivery::Duplicate => debug!(trace_id = %trace_id, "duplicate response dropped"),
            Delivery::Orphaned => debug!(trace_id = %trace_id, "late or unknown response dropped"),
        }
    }
    healthy.store(false, Ordering::Release);
    error!(topic = %topic, "response subscription closed; dispatches will time out");
}
