//! Consume loop and batched send behaviour against scripted test doubles.
//!
//! No Kafka is needed: the doubles implement the reader/writer seams and
//! count how often sessions are opened, used and released.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kafka_types::{from_wire, to_wire, GenericMessage};
use provisioning_kafka::{
    message_handler, Broker, Error, MessageHandler, MessageReader, MessageWriter, ReadError,
    Result,
};
use rdkafka::error::KafkaError;
use rdkafka::message::OwnedMessage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

enum Step {
    Deliver(GenericMessage),
    Fail(ReadError),
    /// Block until the read is abandoned
    Hang,
}

#[derive(Default)]
struct Counters {
    open_attempts: AtomicUsize,
    readers_opened: AtomicUsize,
    readers_closed: AtomicUsize,
    writers_opened: AtomicUsize,
    writers_closed: AtomicUsize,
}

struct ScriptedReader {
    steps: VecDeque<Step>,
    counters: Arc<Counters>,
}

#[async_trait]
impl MessageReader for ScriptedReader {
    async fn read_message(&mut self) -> std::result::Result<OwnedMessage, ReadError> {
        match self.steps.pop_front() {
            Some(Step::Deliver(message)) => Ok(to_wire(&message)),
            Some(Step::Fail(error)) => Err(error),
            Some(Step::Hang) => std::future::pending().await,
            None => Err(ReadError::EndOfStream),
        }
    }
}

impl Drop for ScriptedReader {
    fn drop(&mut self) {
        self.counters.readers_closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct RecordingWriter {
    published: Arc<Mutex<Vec<Vec<OwnedMessage>>>>,
    fail: bool,
    counters: Arc<Counters>,
}

#[async_trait]
impl MessageWriter for RecordingWriter {
    async fn write_messages(&mut self, messages: Vec<OwnedMessage>) -> Result<()> {
        if self.fail {
            return Err(Error::Send(KafkaError::Canceled));
        }
        self.published.lock().unwrap().push(messages);
        Ok(())
    }
}

impl Drop for RecordingWriter {
    fn drop(&mut self) {
        self.counters.writers_closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct TestBroker {
    script: Mutex<Option<Vec<Step>>>,
    published: Arc<Mutex<Vec<Vec<OwnedMessage>>>>,
    fail_writes: bool,
    /// Number of `open_reader` calls that fail with a transport error
    unavailable_opens: AtomicUsize,
    reject_opens: bool,
    counters: Arc<Counters>,
}

impl TestBroker {
    fn with_script(steps: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(Some(steps)),
            ..Default::default()
        }
    }

    fn open_attempts(&self) -> usize {
        self.counters.open_attempts.load(Ordering::SeqCst)
    }

    fn readers_opened(&self) -> usize {
        self.counters.readers_opened.load(Ordering::SeqCst)
    }

    fn readers_closed(&self) -> usize {
        self.counters.readers_closed.load(Ordering::SeqCst)
    }

    fn writers_opened(&self) -> usize {
        self.counters.writers_opened.load(Ordering::SeqCst)
    }

    fn writers_closed(&self) -> usize {
        self.counters.writers_closed.load(Ordering::SeqCst)
    }

    fn publish_calls(&self) -> Vec<Vec<OwnedMessage>> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Broker for TestBroker {
    async fn open_reader(&self, _topic: &str) -> Result<Box<dyn MessageReader>> {
        self.counters.open_attempts.fetch_add(1, Ordering::SeqCst);
        if self.reject_opens {
            return Err(Error::InvalidConfig("topic not allowed".to_string()));
        }
        let unavailable = self
            .unavailable_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if unavailable {
            return Err(Error::Transport("broker not available".to_string()));
        }

        let steps = self.script.lock().unwrap().take().unwrap_or_default();
        self.counters.readers_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedReader {
            steps: steps.into(),
            counters: Arc::clone(&self.counters),
        }))
    }

    async fn open_writer(&self) -> Result<Box<dyn MessageWriter>> {
        self.counters.writers_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingWriter {
            published: Arc::clone(&self.published),
            fail: self.fail_writes,
            counters: Arc::clone(&self.counters),
        }))
    }
}

fn channel_handler() -> (MessageHandler, mpsc::UnboundedReceiver<GenericMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = message_handler(move |message: GenericMessage| {
        let tx = tx.clone();
        async move {
            tx.send(message).unwrap();
        }
    });
    (handler, rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<GenericMessage>) -> Vec<GenericMessage> {
    let mut received = Vec::new();
    while let Ok(message) = rx.try_recv() {
        received.push(message);
    }
    received
}

fn order(value: &str) -> GenericMessage {
    GenericMessage::new("orders", value.as_bytes().to_vec())
}

#[tokio::test]
async fn test_send_empty_batch_is_a_noop() {
    let broker = TestBroker::default();

    broker.send(Vec::new()).await.unwrap();

    assert_eq!(broker.writers_opened(), 0);
    assert!(broker.publish_calls().is_empty());
}

#[tokio::test]
async fn test_send_mixed_topics_sends_nothing() {
    let broker = TestBroker::default();
    let batch = vec![order("1"), GenericMessage::new("invoices", b"2".to_vec())];

    let result = broker.send(batch).await;

    assert!(matches!(result, Err(Error::DifferentTopics { .. })));
    assert_eq!(broker.writers_opened(), 0);
    assert!(broker.publish_calls().is_empty());
}

#[tokio::test]
async fn test_send_same_topic_is_one_publish_call() {
    let broker = TestBroker::default();
    let first = order("1")
        .with_key(b"account-1".to_vec())
        .with_header("x-rh-identity", b"e30=".to_vec());
    let second = order("2").with_key(Vec::new());

    broker
        .send(vec![first.clone(), second.clone()])
        .await
        .unwrap();

    let calls = broker.publish_calls();
    assert_eq!(calls.len(), 1);
    let sent: Vec<GenericMessage> = calls[0].iter().map(from_wire).collect();
    assert_eq!(sent, vec![first, second]);

    assert_eq!(broker.writers_opened(), 1);
    assert_eq!(broker.writers_closed(), 1);
}

#[tokio::test]
async fn test_send_uses_a_fresh_writer_per_call() {
    let broker = TestBroker::default();

    broker.send(vec![order("1")]).await.unwrap();
    broker.send(vec![order("2")]).await.unwrap();

    assert_eq!(broker.writers_opened(), 2);
    assert_eq!(broker.writers_closed(), 2);
}

#[tokio::test]
async fn test_send_failure_is_returned_and_writer_released() {
    let broker = TestBroker {
        fail_writes: true,
        ..Default::default()
    };

    let result = broker.send(vec![order("1")]).await;

    match result {
        Err(e @ Error::Send(_)) => {
            assert!(e.to_string().starts_with("cannot send kafka message(s)"))
        }
        other => panic!("expected send error, got {other:?}"),
    }
    assert_eq!(broker.writers_closed(), 1);
}

#[tokio::test]
async fn test_consume_stops_at_end_of_stream() {
    let broker = TestBroker::with_script(vec![
        Step::Deliver(order("1")),
        Step::Fail(ReadError::EndOfStream),
        Step::Deliver(order("never delivered")),
    ]);
    let (handler, mut rx) = channel_handler();

    broker
        .consume("orders", CancellationToken::new(), handler)
        .await
        .unwrap();

    assert_eq!(drain(&mut rx), vec![order("1")]);
    assert_eq!(broker.readers_closed(), 1);
}

#[tokio::test]
async fn test_consume_survives_transient_errors() {
    let broker = TestBroker::with_script(vec![
        Step::Fail(ReadError::Transport("broker not available".to_string())),
        Step::Deliver(order("1")),
        Step::Fail(ReadError::Transport("fetch failed".to_string())),
        Step::Deliver(order("2")),
    ]);
    let (handler, mut rx) = channel_handler();

    broker
        .consume("orders", CancellationToken::new(), handler)
        .await
        .unwrap();

    assert_eq!(drain(&mut rx), vec![order("1"), order("2")]);
    assert_eq!(broker.readers_closed(), 1);
}

#[tokio::test]
async fn test_consume_cancelled_mid_read() {
    let broker = Arc::new(TestBroker::with_script(vec![
        Step::Deliver(order("1")),
        Step::Hang,
    ]));
    let (handler, mut rx) = channel_handler();
    let cancel = CancellationToken::new();

    let task = {
        let broker = Arc::clone(&broker);
        let cancel = cancel.clone();
        tokio::spawn(async move { broker.consume("orders", cancel, handler).await })
    };

    assert_eq!(rx.recv().await, Some(order("1")));
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("consume loop did not stop after cancellation")
        .unwrap()
        .unwrap();

    assert_eq!(broker.readers_closed(), 1);
}

#[tokio::test]
async fn test_consume_with_cancelled_token_does_not_read() {
    let broker = TestBroker::with_script(vec![Step::Deliver(order("1"))]);
    let (handler, mut rx) = channel_handler();
    let cancel = CancellationToken::new();
    cancel.cancel();

    broker.consume("orders", cancel, handler).await.unwrap();

    assert!(drain(&mut rx).is_empty());
    assert_eq!(broker.readers_opened(), 0);
    assert_eq!(broker.readers_closed(), 0);
}

#[tokio::test]
async fn test_consume_retries_until_reader_opens() {
    let broker = TestBroker {
        unavailable_opens: AtomicUsize::new(2),
        ..TestBroker::with_script(vec![Step::Deliver(order("1"))])
    };
    let (handler, mut rx) = channel_handler();

    broker
        .consume("orders", CancellationToken::new(), handler)
        .await
        .unwrap();

    assert_eq!(drain(&mut rx), vec![order("1")]);
    assert_eq!(broker.open_attempts(), 3);
    assert_eq!(broker.readers_opened(), 1);
    assert_eq!(broker.readers_closed(), 1);
}

#[tokio::test]
async fn test_consume_returns_non_transient_open_error() {
    let broker = TestBroker {
        reject_opens: true,
        ..Default::default()
    };
    let (handler, _rx) = channel_handler();

    let result = broker
        .consume("orders", CancellationToken::new(), handler)
        .await;

    assert!(matches!(result, Err(Error::InvalidConfig(_))));
    assert_eq!(broker.open_attempts(), 1);
}

#[tokio::test]
async fn test_consume_cancelled_while_broker_unavailable() {
    let broker = Arc::new(TestBroker {
        unavailable_opens: AtomicUsize::new(usize::MAX),
        ..Default::default()
    });
    let (handler, _rx) = channel_handler();
    let cancel = CancellationToken::new();

    let task = {
        let broker = Arc::clone(&broker);
        let cancel = cancel.clone();
        tokio::spawn(async move { broker.consume("orders", cancel, handler).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("consume did not stop after cancellation")
        .unwrap()
        .unwrap();

    assert!(broker.open_attempts() >= 1);
    assert_eq!(broker.readers_opened(), 0);
}

#[tokio::test]
async fn test_consume_waits_for_handler_before_next_read() {
    let broker = TestBroker::with_script(
        (0..5).map(|i| Step::Deliver(order(&i.to_string()))).collect(),
    );
    let in_flight = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let handler = {
        let in_flight = Arc::clone(&in_flight);
        let seen = Arc::clone(&seen);
        message_handler(move |message: GenericMessage| {
            let in_flight = Arc::clone(&in_flight);
            let seen = Arc::clone(&seen);
            async move {
                assert_eq!(in_flight.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(Duration::from_millis(5)).await;
                seen.lock().unwrap().push(message.value);
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        })
    };

    broker
        .consume("orders", CancellationToken::new(), handler)
        .await
        .unwrap();

    let expected: Vec<Vec<u8>> = (0..5).map(|i| i.to_string().into_bytes()).collect();
    assert_eq!(*seen.lock().unwrap(), expected);
}

#[tokio::test]
async fn test_concurrent_consumers_share_one_broker() {
    let broker: Arc<dyn Broker> = Arc::new(provisioning_kafka::NoopBroker);
    let cancel = CancellationToken::new();

    let tasks: Vec<_> = ["orders", "sources", "reservations"]
        .into_iter()
        .map(|topic| {
            let broker = Arc::clone(&broker);
            let cancel = cancel.clone();
            let (handler, _rx) = channel_handler();
            tokio::spawn(async move { broker.consume(topic, cancel, handler).await })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }
}
