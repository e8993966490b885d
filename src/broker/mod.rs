pub mod amqp;

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Durable queue receiving vehicle telemetry.
pub const CAR_QUEUE: &str = "iot-data";
/// Durable queue receiving charging-station telemetry.
pub const CHARGE_QUEUE: &str = "iot-data-charge";

pub const QUEUES: [&str; 2] = [CAR_QUEUE, CHARGE_QUEUE];

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to connect to broker: {0}")]
    Connect(#[source] lapin::Error),
    #[error("failed to open channel: {0}")]
    Channel(#[source] lapin::Error),
    #[error("failed to declare queue {queue}: {source}")]
    Declare {
        queue: String,
        #[source]
        source: lapin::Error,
    },
    #[error("failed to publish message: {0}")]
    Publish(#[source] lapin::Error),
    #[error("failed to close broker connection: {0}")]
    Close(#[source] lapin::Error),
    #[error("publisher is closed")]
    Closed,
}

/// Destination the publisher worker writes to. Implemented by [`amqp::AmqpSink`].
pub trait QueueSink: Send + 'static {
    fn publish(
        &mut self,
        queue: &str,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Live view of the underlying connection, readable after the sink has
    /// moved into the worker.
    fn connection_state(&self) -> ConnectionState;
}

/// Cheap, cloneable check of whether a sink's connection is still up.
#[derive(Clone)]
pub struct ConnectionState(Arc<dyn Fn() -> bool + Send + Sync>);

impl ConnectionState {
    pub fn new(check: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(check))
    }

    pub fn is_connected(&self) -> bool {
        (self.0)()
    }
}

struct PublishRequest {
    queue: &'static str,
    payload: Vec<u8>,
    reply: oneshot::Sender<Result<(), BrokerError>>,
}

/// Cloneable handle to the worker task that owns the broker channel.
///
/// All publishes from all request handlers funnel through one task, so the
/// underlying channel only ever sees a single writer.
#[derive(Clone)]
pub struct Publisher {
    tx: mpsc::Sender<PublishRequest>,
    connection: ConnectionState,
}

impl Publisher {
    /// Starts the worker. The handle resolves to the sink once every
    /// `Publisher` clone has been dropped and the queue is drained.
    pub fn spawn<S: QueueSink>(sink: S, buffer: usize) -> (Self, JoinHandle<S>) {
        let (tx, rx) = mpsc::channel(buffer);
        let connection = sink.connection_state();
        let handle = tokio::spawn(run(sink, rx));
        (Self { tx, connection }, handle)
    }

    pub async fn publish(&self, queue: &'static str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let (reply, outcome) = oneshot::channel();
        self.tx
            .send(PublishRequest {
                queue,
                payload,
                reply,
            })
            .await
            .map_err(|_| BrokerError::Closed)?;
        outcome.await.map_err(|_| BrokerError::Closed)?
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// True while the worker runs and its broker connection is open.
    pub fn is_connected(&self) -> bool {
        !self.is_closed() && self.connection.is_connected()
    }
}

async fn run<S: QueueSink>(mut sink: S, mut rx: mpsc::Receiver<PublishRequest>) -> S {
    while let Some(req) = rx.recv().await {
        let result = sink.publish(req.queue, &req.payload).await;
        if let Err(e) = &result {
            warn!(queue = req.queue, error = %e, "Publish failed");
        }
        // Caller may have gone away; the message was still handled.
        let _ = req.reply.send(result);
    }
    info!("Publisher worker stopped");
    sink
}


#[cfg(test)]
mod tests {
    use super::testing::{FailingSink, RecordingSink};
    use super::*;

    #[tokio::test]
    async fn publishes_in_arrival_order() {
        let sink = RecordingSink::default();
        let (publisher, worker) = Publisher::spawn(sink.clone(), 4);

        for i in 0..10 {
            publisher
                .publish(CAR_QUEUE, format!("{{\"n\":{i}}}").into_bytes())
                .await
                .unwrap();
        }
        drop(publisher);
        worker.await.unwrap();

        let seen: Vec<i64> = sink
            .messages(CAR_QUEUE)
            .iter()
            .map(|m| m["n"].as_i64().unwrap())
            .collect();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn sink_errors_reach_the_caller() {
        let (publisher, _worker) = Publisher::spawn(FailingSink, 1);
        let err = publisher.publish(CHARGE_QUEUE, b"{}".to_vec()).await;
        assert!(matches!(err, Err(BrokerError::Closed)));
    }

    #[tokio::test]
    async fn closed_once_worker_is_gone() {
        let (publisher, worker) = Publisher::spawn(RecordingSink::default(), 1);
        assert!(!publisher.is_closed());
        worker.abort();
        let _ = worker.await;

        assert!(publisher.is_closed());
        assert!(matches!(
            publisher.publish(CAR_QUEUE, b"{}".to_vec()).await,
            Err(BrokerError::Closed)
        ));
    }

    #[tokio::test]
    async fn reports_dropped_connection() {
        let sink = RecordingSink::default();
        let (publisher, _worker) = Publisher::spawn(sink.clone(), 1);
        assert!(publisher.is_connected());

        sink.drop_connection();
        assert!(!publisher.is_closed());
        assert!(!publisher.is_connected());
    }

    #[tokio::test]
    async fn worker_returns_sink_after_last_handle_drops() {
        let sink = RecordingSink::default();
        let (publisher, worker) = Publisher::spawn(sink, 2);
        let other = publisher.clone();
        publisher.publish(CAR_QUEUE, b"{}".to_vec()).await.unwrap();
        drop(publisher);
        other.publish(CHARGE_QUEUE, b"{}".to_vec()).await.unwrap();
        drop(other);

        let sink = worker.await.unwrap();
        assert_eq!(sink.count(), 2);
    }
}
