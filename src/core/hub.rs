//! Broadcast Hub
//!
//! Fans JSON events out to every connected SSE subscriber. Each subscriber
//! owns a bounded channel. A full channel makes `broadcast` wait for that
//! subscriber to catch up; a subscriber that is gone, or that stays full for
//! longer than `SEND_TIMEOUT`, is dropped from the set on the spot. A
//! failing subscriber never fails the caller of `broadcast`.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::core::lifecycle::ShutdownSignal;

/// Sent once, right after a subscriber connects.
pub const CONNECTED_FRAME: &[u8] = b": connected\n\n";
pub const HEARTBEAT_FRAME: &[u8] = b"event: heartbeat\ndata: {}\n\n";
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Frames a subscriber may have queued before `broadcast` waits on it.
const SUBSCRIBER_BUFFER: usize = 1024;

/// How long one subscriber may keep its queue full before it is dropped.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

pub type SubscriberId = u64;

struct HubInner {
    next_id: AtomicU64,
    capacity: usize,
    subscribers: Mutex<BTreeMap<SubscriberId, mpsc::Sender<Bytes>>>,
}

#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::with_capacity(SUBSCRIBER_BUFFER)
    }

    /// A hub whose subscribers may queue at most `capacity` frames.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
                subscribers: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> Subscriber {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        self.lock().insert(id, tx);
        debug!(subscriber = id, "SSE subscriber connected");
        Subscriber {
            id,
            rx,
            hub: self.clone(),
        }
    }

    /// Remove a subscriber. Returns whether it was still registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            debug!(subscriber = id, "SSE subscriber removed");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Encode `event` as one SSE frame and queue it for every subscriber,
    /// in subscription order.
    ///
    /// Waits while a subscriber's queue is full, up to `SEND_TIMEOUT` per
    /// subscriber. Returns the number of subscribers the frame was queued for.
    pub async fn broadcast<T: Serialize>(&self, event: &T) -> usize {
        let frame = match encode_frame(event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping broadcast that failed to serialize: {}", e);
                return 0;
            }
        };

        // Senders are cloned so no lock is held across an await.
        let targets: Vec<(SubscriberId, mpsc::Sender<Bytes>)> = self
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        for (id, tx) in targets {
            match tx.send_timeout(frame.clone(), SEND_TIMEOUT).await {
                Ok(()) => delivered += 1,
                Err(SendTimeoutError::Timeout(_)) => {
                    warn!(subscriber = id, "SSE subscriber stalled, disconnecting");
                    self.unsubscribe(id);
                }
                Err(SendTimeoutError::Closed(_)) => {
                    debug!(subscriber = id, "SSE subscriber gone, removing");
                    self.unsubscribe(id);
                }
            }
        }
        delivered
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<SubscriberId, mpsc::Sender<Bytes>>> {
        self.inner.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Frame `event` per the SSE convention: `data: <compact json>\n\n`.
pub fn encode_frame<T: Serialize>(event: &T) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_vec(event)?;
    let mut frame = Vec::with_capacity(json.len() + 8);
    frame.extend_from_slice(b"data: ");
    frame.extend_from_slice(&json);
    frame.extend_from_slice(b"\n\n");
    Ok(Bytes::from(frame))
}

/// One registered SSE subscriber. Unregisters itself when dropped.
pub struct Subscriber {
    id: SubscriberId,
    rx: mpsc::Receiver<Bytes>,
    hub: BroadcastHub,
}

impl Subscriber {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next queued frame; `None` once the hub has dropped this subscriber
    /// and the queue is drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}

enum Next {
    Frame(Option<Bytes>),
    Heartbeat,
    Shutdown,
}

struct StreamState {
    subscriber: Subscriber,
    shutdown: ShutdownSignal,
    heartbeat: tokio::time::Interval,
    greeted: bool,
}

/// The byte stream served to one SSE client: the connection comment, then
/// broadcast frames interleaved with heartbeats, until the client goes away,
/// the hub drops it, or shutdown begins.
pub fn event_stream(
    subscriber: Subscriber,
    shutdown: ShutdownSignal,
    heartbeat_every: Duration,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    let mut heartbeat = tokio::time::interval_at(Instant::now() + heartbeat_every, heartbeat_every);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let state = StreamState {
        subscriber,
        shutdown,
        heartbeat,
        greeted: false,
    };

    futures_util::stream::unfold(state, |mut st| async move {
        if !st.greeted {
            st.greeted = true;
            return Some((Ok(Bytes::from_static(CONNECTED_FRAME)), st));
        }
        if st.shutdown.is_triggered() {
            return None;
        }

        let next = tokio::select! {
            frame = st.subscriber.recv() => Next::Frame(frame),
            _ = st.heartbeat.tick() => Next::Heartbeat,
            _ = st.shutdown.wait() => Next::Shutdown,
        };

        match next {
            Next::Frame(Some(frame)) => Some((Ok(frame), st)),
            Next::Heartbeat => Some((Ok(Bytes::from_static(HEARTBEAT_FRAME)), st)),
            Next::Frame(None) | Next::Shutdown => None,
        }
    })
}
