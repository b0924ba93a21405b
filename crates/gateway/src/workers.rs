//! WebSocket bridge between the pub/sub transport and remote workers.
//!
//! The gateway holds a single subscription on the request topic. Connected
//! workers pull from one shared queue, so each request reaches exactly one
//! worker, handed to idle workers in turn. Every text or binary frame a
//! worker sends is published on the response topic, keyed by its
//! `trace_id` when one can be read.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use {
    axum::extract::ws::{Message, WebSocket},
    bytes::Bytes,
    futures::{SinkExt, stream::StreamExt},
    homegw_broker::CorrelationBroker,
    tokio::sync::{Mutex, OnceCell, mpsc},
    tracing::{debug, info, warn},
};

const QUEUE_CAPACITY: usize = 64;

type SharedQueue = Arc<Mutex<mpsc::Receiver<Bytes>>>;

/// Workers attached to one broker's request topic.
pub struct WorkerPool {
    broker: Arc<CorrelationBroker>,
    queue: OnceCell<SharedQueue>,
    connected: Arc<AtomicUsize>,
}

impl WorkerPool {
    #[must_use]
    pub fn new(broker: Arc<CorrelationBroker>) -> Self {
        Self {
            broker,
            queue: OnceCell::new(),
            connected: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of open worker connections.
    #[must_use]
    pub fn connected(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }

    /// The shared request queue. Subscribes on first use.
    async fn queue(&self) -> homegw_broker::Result<SharedQueue> {
        self.queue
            .get_or_try_init(|| async {
                let topic = self.broker.config().request_topic.clone();
                let mut requests = self.broker.transport().subscribe(&topic).await?;
                let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
                let connected = Arc::clone(&self.connected);
                tokio::spawn(async move {
                    while let Some(payload) = requests.next().await {
                        // Requests published while no worker is attached go nowhere.
                        if connected.load(Ordering::SeqCst) == 0 {
                            debug!(topic = %topic, "worker: no worker connected, request dropped");
                            continue;
                        }
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    debug!(topic = %topic, "worker: request subscription ended");
                });
                Ok(Arc::new(Mutex::new(rx)))
            })
            .await
            .cloned()
    }
}

/// Handle one worker connection until either side closes.
pub async fn handle_worker(socket: WebSocket, pool: Arc<WorkerPool>, remote_addr: SocketAddr) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let transport = pool.broker.transport();
    let response_topic = pool.broker.config().response_topic.clone();

    let queue = match pool.queue().await {
        Ok(queue) => queue,
        Err(e) => {
            warn!(conn_id = %conn_id, error = %e, "worker: subscribe to request topic failed");
            return;
        },
    };
    let workers = pool.connected.fetch_add(1, Ordering::SeqCst) + 1;
    info!(conn_id = %conn_id, remote = %remote_addr, workers, "worker: connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Write loop: shared queue -> this worker.
    let write_conn_id = conn_id.clone();
    let write_handle = tokio::spawn(async move {
        loop {
            let next = queue.lock().await.recv().await;
            let Some(payload) = next else {
                break;
            };
            let text = String::from_utf8_lossy(&payload).into_owned();
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                debug!(conn_id = %write_conn_id, "worker: write loop closed");
                break;
            }
        }
    });

    // Read loop: worker -> response topic.
    while let Some(frame) = ws_rx.next().await {
        let payload = match frame {
            Ok(Message::Text(text)) => Bytes::copy_from_slice(text.as_str().as_bytes()),
            Ok(Message::Binary(data)) => data,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "worker: read error");
                break;
            },
        };
        let key = trace_key(&payload).unwrap_or_default();
        if let Err(e) = transport.publish(&response_topic, &key, payload).await {
            warn!(conn_id = %conn_id, trace_id = %key, error = %e, "worker: publish response failed");
        }
    }

    write_handle.abort();
    let workers = pool.connected.fetch_sub(1, Ordering::SeqCst) - 1;
    info!(conn_id = %conn_id, workers, "worker: disconnected");
}

/// The `trace_id` field of a JSON payload, used as the partition key.
fn trace_key(payload: &[u8]) -> Option<String> {
    #[derive(serde::Deserialize)]
    struct Keyed {
        trace_id: String,
    }
    serde_json::from_slice::<Keyed>(payload)
        .ok()
        .map(|k| k.trace_id)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        homegw_broker::{BrokerConfig, MemoryBus, PubSubTransport},
        std::time::Duration,
    };

    #[test]
    fn trace_key_reads_json_field() {
        assert_eq!(
            trace_key(br#"{"trace_id":"abc","success":true}"#).as_deref(),
            Some("abc")
        );
        assert_eq!(trace_key(b"not json"), None);
        assert_eq!(trace_key(br#"{"success":true}"#), None);
    }

    async fn pool(bus: Arc<MemoryBus>) -> WorkerPool {
        let broker = CorrelationBroker::start(bus, BrokerConfig {
            request_topic: "req".into(),
            response_topic: "resp".into(),
            response_timeout: Duration::from_secs(1),
        })
        .await
        .unwrap();
        WorkerPool::new(Arc::new(broker))
    }

    #[tokio::test]
    async fn queue_subscribes_once() {
        let bus = Arc::new(MemoryBus::new());
        let pool = pool(bus.clone()).await;
        let a = pool.queue().await.unwrap();
        let b = pool.queue().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(bus.subscriber_count("req"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn requests_without_workers_are_not_queued() {
        let bus = Arc::new(MemoryBus::new());
        let pool = pool(bus.clone()).await;
        let queue = pool.queue().await.unwrap();

        bus.publish("req", "t1", Bytes::from_static(b"early")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        pool.connected.fetch_add(1, Ordering::SeqCst);
        bus.publish("req", "t2", Bytes::from_static(b"late")).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), async {
            queue.lock().await.recv().await
        })
        .await
        .unwrap();
        assert_eq!(got.as_deref(), Some(&b"late"[..]));
        assert!(queue.lock().await.try_recv().is_err());
    }
}
