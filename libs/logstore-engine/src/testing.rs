//! Scripted broker and instrumented stores for engine tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::mpsc;

use logstore_api::BoxFuture;
use logstore_api::broker::{
    Acknowledger, Broker, BrokerChannel, BrokerConnection, ConsumeSpec, Delivery, DeliveryStream,
};
use logstore_api::{BrokerError, DomainLog, LogBatch, LogLevel, StoreError};
use logstore_api::storage::LogStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Reject { requeue: bool },
}

pub type SettlementLog = Arc<Mutex<Vec<(u64, Settlement)>>>;

/// Broker whose steps fail a configurable number of times before succeeding.
/// Deliveries are fed through the sender returned by [`FakeBroker::new`].
///
/// Every successful consume attaches the oldest queued feed; dropping its
/// [`FeedSender`] ends that stream. With no feed queued the stream is
/// already closed.
#[derive(Default)]
pub struct FakeBroker {
    me: Weak<FakeBroker>,
    pub connect_failures: AtomicU32,
    pub channel_failures: AtomicU32,
    pub consume_failures: AtomicU32,
    pub connects: AtomicU32,
    pub channels: AtomicU32,
    pub consumes: AtomicU32,
    pub channels_closed: AtomicU32,
    pub connections_closed: AtomicU32,
    feeds: Mutex<VecDeque<mpsc::Receiver<Delivery>>>,
    pub settlements: SettlementLog,
}

impl FakeBroker {
    pub fn new() -> (Arc<Self>, FeedSender) {
        let broker = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            ..Self::default()
        });
        let feed = broker.next_feed();
        (broker, feed)
    }

    /// Queue a feed for the next consumer attachment.
    pub fn next_feed(&self) -> FeedSender {
        let (tx, rx) = mpsc::channel(1024);
        self.feeds.lock().unwrap().push_back(rx);
        FeedSender {
            tx,
            settlements: self.settlements.clone(),
        }
    }

    pub fn settled(&self) -> Vec<(u64, Settlement)> {
        self.settlements.lock().unwrap().clone()
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Pushes deliveries into the fake broker's stream.
#[derive(Clone)]
pub struct FeedSender {
    tx: mpsc::Sender<Delivery>,
    settlements: SettlementLog,
}

impl FeedSender {
    pub async fn deliver(&self, tag: u64, body: &[u8]) {
        let acker = RecordingAcker {
            tag,
            log: self.settlements.clone(),
        };
        let delivery = Delivery::new(tag, body.to_vec(), Box::new(acker));
        self.tx.send(delivery).await.unwrap();
    }
}

impl Broker for FakeBroker {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn BrokerConnection>, BrokerError>> {
        Box::pin(async move {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if take_failure(&self.connect_failures) {
                return Err(BrokerError::connection("connection refused"));
            }
            let me = self
                .me
                .upgrade()
                .ok_or_else(|| BrokerError::connection("broker dropped"))?;
            Ok(Box::new(FakeConnection(me)) as Box<dyn BrokerConnection>)
        })
    }
}

struct FakeConnection(Arc<FakeBroker>);

impl BrokerConnection for FakeConnection {
    fn open_channel(&self) -> BoxFuture<'_, Result<Box<dyn BrokerChannel>, BrokerError>> {
        Box::pin(async move {
            self.0.channels.fetch_add(1, Ordering::SeqCst);
            if take_failure(&self.0.channel_failures) {
                return Err(BrokerError::channel("channel limit reached"));
            }
            Ok(Box::new(FakeChannel(self.0.clone())) as Box<dyn BrokerChannel>)
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            self.0.connections_closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

struct FakeChannel(Arc<FakeBroker>);

impl BrokerChannel for FakeChannel {
    fn consume<'a>(
        &'a self,
        _spec: &'a ConsumeSpec,
    ) -> BoxFuture<'a, Result<Box<dyn DeliveryStream>, BrokerError>> {
        Box::pin(async move {
            self.0.consumes.fetch_add(1, Ordering::SeqCst);
            if take_failure(&self.0.consume_failures) {
                return Err(BrokerError::consume("NOT_FOUND - no queue"));
            }
            let queued = self.0.feeds.lock().unwrap().pop_front();
            let rx = queued.unwrap_or_else(|| mpsc::channel(1).1);
            Ok(Box::new(FeedStream { rx }) as Box<dyn DeliveryStream>)
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            self.0.channels_closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

struct FeedStream {
    rx: mpsc::Receiver<Delivery>,
}

impl DeliveryStream for FeedStream {
    fn recv(&mut self) -> BoxFuture<'_, Option<Result<Delivery, BrokerError>>> {
        Box::pin(async move { self.rx.recv().await.map(Ok) })
    }
}

struct RecordingAcker {
    tag: u64,
    log: SettlementLog,
}

impl Acknowledger for RecordingAcker {
    fn ack(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        self.log.lock().unwrap().push((self.tag, Settlement::Ack));
        Box::pin(async { Ok(()) })
    }

    fn reject(&self, requeue: bool) -> BoxFuture<'_, Result<(), BrokerError>> {
        self.log
            .lock()
            .unwrap()
            .push((self.tag, Settlement::Reject { requeue }));
        Box::pin(async { Ok(()) })
    }
}

/// Wraps a store, sleeps inside every insert and records how many inserts
/// overlapped and what was visible when each insert began.
pub struct ObservedStore {
    inner: Arc<dyn LogStore>,
    delay: Duration,
    in_insert: AtomicUsize,
    pub max_overlap: AtomicUsize,
    /// Number of stored INFO records seen at the start of each insert.
    pub visible_at_start: Mutex<Vec<usize>>,
}

impl ObservedStore {
    pub fn new(inner: Arc<dyn LogStore>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            in_insert: AtomicUsize::new(0),
            max_overlap: AtomicUsize::new(0),
            visible_at_start: Mutex::new(Vec::new()),
        }
    }
}

impl LogStore for ObservedStore {
    fn insert_batch<'a>(&'a self, batch: &'a LogBatch) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let now = self.in_insert.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_overlap.fetch_max(now, Ordering::SeqCst);
            let visible = self.inner.find_by_level(LogLevel::Info).await?.len();
            self.visible_at_start.lock().unwrap().push(visible);
            tokio::time::sleep(self.delay).await;
            let result = self.inner.insert_batch(batch).await;
            self.in_insert.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }

    fn find_by_level(&self, level: LogLevel) -> BoxFuture<'_, Result<Vec<DomainLog>, StoreError>> {
        self.inner.find_by_level(level)
    }
}

/// Store whose inserts always fail with a backend error.
pub struct FailingStore {
    pub calls: AtomicU32,
}

impl LogStore for FailingStore {
    fn insert_batch<'a>(&'a self, _batch: &'a LogBatch) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::backend("connection reset"))
        })
    }

    fn find_by_level(&self, _level: LogLevel) -> BoxFuture<'_, Result<Vec<DomainLog>, StoreError>> {
        Box::pin(async { Err(StoreError::backend("connection reset")) })
    }
}

/// Store that panics on every insert.
pub struct PanicStore;

impl LogStore for PanicStore {
    fn insert_batch<'a>(&'a self, _batch: &'a LogBatch) -> BoxFuture<'a, Result<(), StoreError>> {
        panic!("store driver crashed")
    }

    fn find_by_level(&self, _level: LogLevel) -> BoxFuture<'_, Result<Vec<DomainLog>, StoreError>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

pub fn record_json(unix_time: u32, message: &str) -> String {
    format!(
        r#"[{{"unix_time":{unix_time},"level":"INFO","pathname":"/srv/app","message":"{message}"}}]"#
    )
}
