//! In-memory record sources and notification channels for tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use evlog_db::LogError;
use evlog_monitor::{
    CatchUp, NotificationChannel, Notifications, RecordSource, SequenceKind, SourceError, Tracker,
};
use evlog_types::{CommandStatus, EventEntry, Events, Seq, StatusType};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const RETRY: Duration = Duration::from_millis(5);
pub const PATIENCE: Duration = Duration::from_secs(5);

/// A record store whose contents and failures are scripted by the test.
pub struct FakeLog<K: SequenceKind> {
    records: Mutex<HashMap<Seq, K::Record>>,
    latest: Mutex<CatchUp<K::Payload>>,
    fetched: Mutex<Vec<Seq>>,
    fetch_attempts: AtomicUsize,
    transient_failures: AtomicUsize,
}

impl<K: SequenceKind> FakeLog<K> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(HashMap::new()),
            latest: Mutex::new(CatchUp::Empty),
            fetched: Mutex::new(Vec::new()),
            fetch_attempts: AtomicUsize::new(0),
            transient_failures: AtomicUsize::new(0),
        })
    }

    pub fn insert(&self, seq: Seq, record: K::Record) {
        self.records.lock().unwrap().insert(seq, record);
    }

    pub fn set_latest(&self, latest: CatchUp<K::Payload>) {
        *self.latest.lock().unwrap() = latest;
    }

    /// Makes the next `n` store calls fail with a retryable error.
    pub fn fail_next(&self, n: usize) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    /// Sequence numbers successfully fetched, in order.
    pub fn fetched(&self) -> Vec<Seq> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn fetch_attempts(&self) -> usize {
        self.fetch_attempts.load(Ordering::SeqCst)
    }

    fn injected_failure(&self) -> Option<SourceError> {
        self.transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .ok()
            .map(|_| SourceError::Task("injected transient failure".to_string()))
    }

    pub fn tracker(self: &Arc<Self>) -> Arc<Tracker<K>> {
        Arc::new(Tracker::new(self.clone(), RETRY))
    }
}

impl<K: SequenceKind> RecordSource<K> for FakeLog<K> {
    fn catch_up(&self) -> BoxFuture<'_, Result<CatchUp<K::Payload>, SourceError>> {
        async move {
            if let Some(e) = self.injected_failure() {
                return Err(e);
            }
            Ok(self.latest.lock().unwrap().clone())
        }
        .boxed()
    }

    fn fetch(&self, seq: Seq) -> BoxFuture<'_, Result<K::Record, SourceError>> {
        async move {
            self.fetch_attempts.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = self.injected_failure() {
                return Err(e);
            }
            let record = self.records.lock().unwrap().get(&seq).cloned();
            match record {
                Some(record) => {
                    self.fetched.lock().unwrap().push(seq);
                    Ok(record)
                }
                None => Err(SourceError::Log(LogError::RowCount {
                    table: "fake",
                    seq,
                    rows: 0,
                })),
            }
        }
        .boxed()
    }
}

type Delivery = Result<String, SourceError>;

/// A notification channel whose connections the test controls.
#[derive(Default)]
pub struct FakeChannel {
    refusals: AtomicUsize,
    opened: AtomicUsize,
    live: Mutex<Vec<mpsc::UnboundedSender<Delivery>>>,
}

impl FakeChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes the next `n` `listen` calls fail.
    pub fn refuse_next(&self, n: usize) {
        self.refusals.store(n, Ordering::SeqCst);
    }

    /// Number of subscriptions opened so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Delivers `payload` to every open subscription.
    pub fn publish(&self, payload: &str) {
        self.live
            .lock()
            .unwrap()
            .retain(|tx| tx.send(Ok(payload.to_string())).is_ok());
    }

    /// Breaks every open subscription.
    pub fn drop_connections(&self) {
        for tx in self.live.lock().unwrap().drain(..) {
            let _ = tx.send(Err(SourceError::Disconnected("dropped by test".to_string())));
        }
    }

    /// Waits until at least `n` subscriptions have been opened.
    pub async fn wait_opened(&self, n: usize) {
        tokio::time::timeout(PATIENCE, async {
            while self.opened() < n {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("subscription was not (re)opened in time");
    }
}

impl NotificationChannel for FakeChannel {
    fn listen<'a>(
        &'a self,
        _channel: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn Notifications>, SourceError>> {
        async move {
            let refused = self
                .refusals
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if refused {
                return Err(SourceError::Disconnected("connection refused".to_string()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            self.live.lock().unwrap().push(tx);
            self.opened.fetch_add(1, Ordering::SeqCst);
            let notifications: Box<dyn Notifications> = Box::new(FakeSubscription { rx });
            Ok(notifications)
        }
        .boxed()
    }
}

struct FakeSubscription {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl Notifications for FakeSubscription {
    fn next(&mut self) -> BoxFuture<'_, Result<String, SourceError>> {
        async move {
            self.rx
                .recv()
                .await
                .unwrap_or_else(|| Err(SourceError::Disconnected("closed".to_string())))
        }
        .boxed()
    }
}

pub fn events(event_type: &str) -> Events {
    vec![EventEntry {
        event_type: event_type.to_string(),
        data: serde_json::json!({ "source": event_type }),
    }]
}

pub fn status(status_type: StatusType) -> CommandStatus {
    CommandStatus {
        command_uuid: Uuid::new_v4(),
        status_type,
    }
}

/// Awaits `fut`, failing the test if it takes longer than [`PATIENCE`].
pub async fn within<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(PATIENCE, fut)
        .await
        .expect("operation did not complete in time")
}

/// Lets spawned tasks run.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}
