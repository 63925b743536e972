//! The watermark tracker and its waiter registry.
//!
//! All state lives behind one `std::sync::Mutex` that is never held across an
//! `.await`. Completions are drained under the lock and delivered after it is
//! released, so a completion can never re-enter the tracker while it is locked.
//!
//! Released waiters are handed, in watermark order, to a single release task
//! per tracker. A record that cannot be read holds back every later release
//! until it can.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use evlog_types::{Seq, ORIGIN};

use crate::error::{SourceError, TrackerError, WaitError};
use crate::kind::SequenceKind;
use crate::source::{CatchUp, RecordSource};

type Waiters<R> = Vec<oneshot::Sender<R>>;

struct State<K: SequenceKind> {
    watermark: Option<Seq>,
    /// `current()` callers parked until the first initialization.
    first: Vec<oneshot::Sender<Seq>>,
    /// `wait_for()` callers keyed by exact threshold.
    pending: BTreeMap<Seq, Waiters<K::Record>>,
}

/// One advance's worth of released waiters, queued for the release task.
enum Release<K: SequenceKind> {
    /// Every waiter gets the same record.
    Record(K::Record, BTreeMap<Seq, Waiters<K::Record>>),
    /// Each threshold's own record is fetched by exact key.
    Fetch(BTreeMap<Seq, Waiters<K::Record>>),
}

impl<K: SequenceKind> State<K> {
    /// Removes and returns every threshold `<= upto`, in ascending order.
    fn take_ready(&mut self, upto: Seq) -> BTreeMap<Seq, Waiters<K::Record>> {
        let later = match upto.checked_add(1) {
            Some(next) => self.pending.split_off(&next),
            None => BTreeMap::new(),
        };
        std::mem::replace(&mut self.pending, later)
    }
}

/// What a call to [`Tracker::advance`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// The tracker had no watermark and now holds `watermark`.
    Initialized {
        /// The first watermark.
        watermark: Seq,
        /// Number of `wait_for` callers released.
        released: usize,
    },
    /// The watermark moved forward.
    Advanced {
        /// Previous watermark.
        from: Seq,
        /// New watermark.
        to: Seq,
        /// Number of `wait_for` callers released.
        released: usize,
    },
    /// The value was at or below the watermark; nothing changed.
    Unchanged {
        /// The watermark the tracker holds.
        watermark: Seq,
    },
}

/// Tracks one log's watermark and the callers waiting on it.
pub struct Tracker<K: SequenceKind> {
    state: Mutex<State<K>>,
    source: Arc<dyn RecordSource<K>>,
    retry_delay: Duration,
    releases: mpsc::UnboundedSender<Release<K>>,
    /// Handed to the release task when the first batch is queued.
    release_rx: Mutex<Option<mpsc::UnboundedReceiver<Release<K>>>>,
}

impl<K: SequenceKind> std::fmt::Debug for Tracker<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("kind", &K::NAME)
            .field("watermark", &self.watermark())
            .field("pending", &self.pending_waiters())
            .finish()
    }
}

impl<K: SequenceKind> Tracker<K> {
    /// Creates an uninitialized tracker reading records from `source`.
    ///
    /// `retry_delay` is the pause between attempts after a transient store
    /// failure.
    pub fn new(source: Arc<dyn RecordSource<K>>, retry_delay: Duration) -> Self {
        let (releases, release_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(State {
                watermark: None,
                first: Vec::new(),
                pending: BTreeMap::new(),
            }),
            source,
            retry_delay,
            releases,
            release_rx: Mutex::new(Some(release_rx)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The watermark, if the tracker has been initialized.
    pub fn watermark(&self) -> Option<Seq> {
        self.lock().watermark
    }

    /// Number of registered `wait_for` callers that have not been released.
    pub fn pending_waiters(&self) -> usize {
        self.lock().pending.values().map(Vec::len).sum()
    }

    /// Returns the watermark, waiting for the first initialization if needed.
    pub async fn current(&self) -> Result<Seq, WaitError> {
        let rx = {
            let mut state = self.lock();
            if let Some(watermark) = state.watermark {
                return Ok(watermark);
            }
            let (tx, rx) = oneshot::channel();
            state.first.push(tx);
            rx
        };
        // Senders in `first` are only ever drained by sending.
        rx.await.map_err(|_| WaitError::Aborted(ORIGIN))
    }

    /// Returns the record stored at `threshold` once the watermark reaches it.
    ///
    /// If the watermark already covers `threshold`, the record is fetched
    /// immediately by exact key. Otherwise the caller is registered and
    /// released by a later [`advance`](Self::advance). Store failures never
    /// end the wait: the fetch is retried until the record can be read.
    /// Dropping the returned future before it resolves unregisters the caller.
    pub async fn wait_for(&self, threshold: Seq) -> Result<K::Record, WaitError> {
        if threshold < 0 {
            return Err(WaitError::NegativeThreshold(threshold));
        }

        let rx = {
            let mut state = self.lock();
            match state.watermark {
                Some(watermark) if threshold <= watermark => None,
                _ => {
                    let (tx, rx) = oneshot::channel();
                    state.pending.entry(threshold).or_default().push(tx);
                    Some(rx)
                }
            }
        };

        match rx {
            None => fetch_exact(self.source.as_ref(), threshold, self.retry_delay, || true)
                .await
                .ok_or(WaitError::Aborted(threshold)),
            Some(rx) => {
                let mut registration = Registration {
                    tracker: self,
                    threshold,
                    rx: Some(rx),
                };
                registration.wait().await
            }
        }
    }

    /// Moves the watermark to `v` and releases every waiter it covers.
    ///
    /// `payload` is the data that accompanied `v` (the notification's or the
    /// catch-up query's). Values at or below the current watermark are
    /// ignored.
    pub fn advance(&self, v: Seq, payload: &K::Payload) -> Advance {
        let (previous, first, released) = {
            let mut state = self.lock();
            let previous = state.watermark;
            if let Some(watermark) = previous {
                if v <= watermark {
                    return Advance::Unchanged { watermark };
                }
            }
            state.watermark = Some(v);
            let first = std::mem::take(&mut state.first);
            let ready = state.take_ready(v);
            let released = ready.values().map(Vec::len).sum();
            // Queued under the lock so batches reach the release task in
            // watermark order.
            if !ready.is_empty() {
                let release = match previous.and_then(|_| K::live_record(payload)) {
                    Some(record) => Release::Record(record, ready),
                    None => Release::Fetch(ready),
                };
                self.queue_release(release);
            }
            (previous, first, released)
        };

        for tx in first {
            let _ = tx.send(v);
        }

        let outcome = match previous {
            None => Advance::Initialized {
                watermark: v,
                released,
            },
            Some(from) => Advance::Advanced {
                from,
                to: v,
                released,
            },
        };
        tracing::debug!(kind = K::NAME, ?outcome, "watermark advanced");
        outcome
    }

    /// Initializes an empty log's tracker to [`ORIGIN`] without a payload.
    ///
    /// # Errors
    ///
    /// `TrackerError::AlreadyInitialized` if the tracker has a watermark;
    /// this is a caller bug, not a recoverable condition.
    pub fn initialize_empty(&self) -> Result<(), TrackerError> {
        let (first, ready) = {
            let mut state = self.lock();
            if let Some(watermark) = state.watermark {
                return Err(TrackerError::AlreadyInitialized { watermark });
            }
            state.watermark = Some(ORIGIN);
            (std::mem::take(&mut state.first), state.take_ready(ORIGIN))
        };

        for tx in first {
            let _ = tx.send(ORIGIN);
        }
        for tx in ready.into_values().flatten() {
            let _ = tx.send(K::origin_record());
        }

        tracing::info!(kind = K::NAME, "watermark initialized on empty log");
        Ok(())
    }

    /// Runs the catch-up query and feeds its result through the same
    /// transitions as a live notification.
    ///
    /// Transient store failures are retried every `retry_delay`; only an
    /// invariant violation is returned.
    pub async fn catch_up(&self) -> Result<Advance, SourceError> {
        let caught_up = loop {
            match self.source.catch_up().await {
                Ok(caught_up) => break caught_up,
                Err(e) if e.is_invariant_violation() => return Err(e),
                Err(e) => {
                    tracing::warn!(kind = K::NAME, error = %e, "catch-up query failed, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        };

        let outcome = match caught_up {
            CatchUp::At(v, payload) => self.advance(v, &payload),
            CatchUp::Empty => match self.initialize_empty() {
                Ok(()) => Advance::Initialized {
                    watermark: ORIGIN,
                    released: 0,
                },
                Err(TrackerError::AlreadyInitialized { watermark }) => {
                    Advance::Unchanged { watermark }
                }
            },
        };
        tracing::info!(kind = K::NAME, ?outcome, "caught up");
        Ok(outcome)
    }

    /// Hands `release` to the release task, starting it on first use.
    fn queue_release(&self, release: Release<K>) {
        let rx = self
            .release_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(rx) = rx {
            tokio::spawn(release_loop(Arc::clone(&self.source), self.retry_delay, rx));
        }
        if self.releases.send(release).is_err() {
            tracing::error!(kind = K::NAME, "release task has stopped, dropping waiters");
        }
    }

    /// Drops registrations at `threshold` whose caller has gone away.
    fn prune(&self, threshold: Seq) {
        let mut state = self.lock();
        if let Some(waiters) = state.pending.get_mut(&threshold) {
            waiters.retain(|tx| !tx.is_closed());
            if waiters.is_empty() {
                state.pending.remove(&threshold);
            }
        }
    }
}

/// A registered `wait_for` caller. Unregisters itself when dropped unresolved.
struct Registration<'a, K: SequenceKind> {
    tracker: &'a Tracker<K>,
    threshold: Seq,
    rx: Option<oneshot::Receiver<K::Record>>,
}

impl<K: SequenceKind> Registration<'_, K> {
    async fn wait(&mut self) -> Result<K::Record, WaitError> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(WaitError::Aborted(self.threshold));
        };
        let result = rx.await;
        self.rx = None;
        result.map_err(|_| WaitError::Aborted(self.threshold))
    }
}

impl<K: SequenceKind> Drop for Registration<'_, K> {
    fn drop(&mut self) {
        if let Some(rx) = self.rx.take() {
            drop(rx);
            self.tracker.prune(self.threshold);
            tracing::trace!(kind = K::NAME, threshold = self.threshold, "waiter abandoned");
        }
    }
}

/// Releases queued batches one at a time, in the order they were queued.
///
/// Ends once the tracker, and with it the sending half, is dropped.
async fn release_loop<K: SequenceKind>(
    source: Arc<dyn RecordSource<K>>,
    retry_delay: Duration,
    mut batches: mpsc::UnboundedReceiver<Release<K>>,
) {
    while let Some(batch) = batches.recv().await {
        match batch {
            Release::Record(record, ready) => {
                for tx in ready.into_values().flatten() {
                    let _ = tx.send(record.clone());
                }
            }
            Release::Fetch(ready) => {
                for (threshold, waiters) in ready {
                    let wanted = || waiters.iter().any(|tx| !tx.is_closed());
                    match fetch_exact(source.as_ref(), threshold, retry_delay, wanted).await {
                        Some(record) => {
                            for tx in waiters {
                                let _ = tx.send(record.clone());
                            }
                        }
                        None => {
                            tracing::debug!(
                                kind = K::NAME,
                                threshold,
                                "all waiters gone, skipping fetch"
                            );
                        }
                    }
                }
            }
        }
    }
    tracing::debug!(kind = K::NAME, "release task stopped");
}

/// Fetches exactly `seq`, retrying every `retry_delay` for as long as
/// `wanted` holds. Sequence 0 resolves to the origin record without touching
/// the store.
///
/// Returns `None` only once `wanted` turns false.
async fn fetch_exact<K: SequenceKind>(
    source: &dyn RecordSource<K>,
    seq: Seq,
    retry_delay: Duration,
    wanted: impl Fn() -> bool,
) -> Option<K::Record> {
    if seq == ORIGIN {
        return Some(K::origin_record());
    }
    while wanted() {
        match source.fetch(seq).await {
            Ok(record) => return Some(record),
            Err(e) if e.is_invariant_violation() => {
                tracing::error!(
                    kind = K::NAME,
                    seq,
                    error = %e,
                    "stored record breaks a log invariant, retrying"
                );
            }
            Err(e) => {
                tracing::warn!(kind = K::NAME, seq, error = %e, "record fetch failed, retrying");
            }
        }
        tokio::time::sleep(retry_delay).await;
    }
    None
}
