//! Per-topic pub/sub with a bounded replay ring and SSE fanout.
//!
//! One topic per chat session. Publishing stamps the payload with a
//! per-topic monotonic id and an RFC 3339 timestamp, appends the encoded
//! frame to the ring, and fans out to every live subscriber queue with a
//! non-blocking send — a subscriber whose queue is full is dropped rather
//! than ever blocking the producer. Reconnecting subscribers replay ring
//! events strictly after their `Last-Event-ID`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::Stream;
use session_event::{encode_sse, Envelope, SessionEvent, HEARTBEAT_FRAME};
use tokio::sync::mpsc;

/// Ring capacity per topic.
const RING_CAPACITY: usize = 256;
/// Bounded per-subscriber queue; overflow drops the subscriber.
const SUBSCRIBER_QUEUE: usize = 64;
/// Silence threshold after which a comment frame is emitted.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

struct StoredEvent {
    id: u64,
    frame: String,
    terminal: bool,
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<QueueItem>,
}

#[derive(Clone, Debug)]
pub struct QueueItem {
    pub frame: String,
    pub terminal: bool,
}

struct TopicState {
    ring: VecDeque<StoredEvent>,
    next_event_id: u64,
    next_subscriber_id: u64,
    subscribers: Vec<Subscriber>,
    last_activity: Instant,
}

impl TopicState {
    fn new() -> Self {
        Self {
            ring: VecDeque::new(),
            next_event_id: 1,
            next_subscriber_id: 1,
            subscribers: Vec::new(),
            last_activity: Instant::now(),
        }
    }
}

/// Cheap-to-clone bus handle; all clones share the topic map.
#[derive(Clone, Default)]
pub struct EventBus {
    topics: Arc<Mutex<HashMap<String, TopicState>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes one event on `topic`; returns the stamped event id.
    ///
    /// The map lock is held for the duration of fanout; enqueueing never
    /// blocks (slow subscribers are removed).
    pub fn publish(&self, topic: &str, event: &SessionEvent) -> u64 {
        let mut payload = match event.to_value() {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(topic, error = %e, "unserializable event dropped");
                return 0;
            }
        };

        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        let state = topics
            .entry(topic.to_string())
            .or_insert_with(TopicState::new);
        let id = state.next_event_id;
        state.next_event_id += 1;
        state.last_activity = Instant::now();

        Envelope::new()
            .with_session_id(topic)
            .with_event_id(id)
            .with_timestamp(chrono::Utc::now().to_rfc3339())
            .inject_into(&mut payload);
        let frame = encode_sse(event.kind(), &payload);
        let terminal = event.is_terminal();

        state.ring.push_back(StoredEvent { id, frame: frame.clone(), terminal });
        while state.ring.len() > RING_CAPACITY {
            state.ring.pop_front();
        }

        let item = QueueItem { frame, terminal };
        let before = state.subscribers.len();
        state
            .subscribers
            .retain(|sub| sub.tx.try_send(item.clone()).is_ok());
        let dropped = before - state.subscribers.len();
        if dropped > 0 {
            tracing::warn!(topic, dropped, "dropped slow or closed subscribers");
        }
        id
    }

    /// Registers a subscriber. The first delivered frame is `init`; when
    /// `since_id` is given, ring events with id strictly greater are
    /// replayed before the live tail. Replay is buffered on the
    /// subscription itself so it is never subject to the bounded live
    /// queue — resume loses nothing that is still in the ring.
    pub fn subscribe(&self, topic: &str, since_id: Option<u64>) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let mut pending = VecDeque::new();

        let mut init_payload = SessionEvent::Init { session_id: topic.to_string() }
            .to_value()
            .unwrap_or_else(|_| serde_json::json!({}));
        Envelope::new()
            .with_timestamp(chrono::Utc::now().to_rfc3339())
            .inject_into(&mut init_payload);
        pending.push_back(QueueItem {
            frame: encode_sse("init", &init_payload),
            terminal: false,
        });

        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        let state = topics
            .entry(topic.to_string())
            .or_insert_with(TopicState::new);
        state.last_activity = Instant::now();

        if let Some(since) = since_id {
            for ev in state.ring.iter().filter(|ev| ev.id > since) {
                pending.push_back(QueueItem { frame: ev.frame.clone(), terminal: ev.terminal });
            }
        }

        let sub_id = state.next_subscriber_id;
        state.next_subscriber_id += 1;
        state.subscribers.push(Subscriber { id: sub_id, tx });

        Subscription {
            topics: Arc::clone(&self.topics),
            topic: topic.to_string(),
            sub_id,
            pending,
            rx,
        }
    }

    /// Broadcasts a `done` frame; subscribers stop after draining.
    pub fn close_topic(&self, topic: &str) {
        self.publish(topic, &SessionEvent::Done { session_id: topic.to_string() });
    }

    /// Removes topics with no subscribers and no activity within `grace`.
    pub fn gc_idle(&self, grace: Duration) {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics.retain(|_, state| {
            !state.subscribers.is_empty() || state.last_activity.elapsed() < grace
        });
    }

    pub fn topic_count(&self) -> usize {
        self.topics.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Live subscriber handle; dropping it unregisters from the topic.
pub struct Subscription {
    topics: Arc<Mutex<HashMap<String, TopicState>>>,
    topic: String,
    sub_id: u64,
    /// init + replay, drained before the live queue.
    pending: VecDeque<QueueItem>,
    rx: mpsc::Receiver<QueueItem>,
}

impl Subscription {
    /// Next item (init, then replay, then live tail, in order).
    pub async fn recv(&mut self) -> Option<QueueItem> {
        if let Some(item) = self.pending.pop_front() {
            return Some(item);
        }
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<QueueItem> {
        if let Some(item) = self.pending.pop_front() {
            return Some(item);
        }
        self.rx.try_recv().ok()
    }

    /// Consumes the subscription into a stream of SSE frames with the
    /// standard heartbeat cadence. Ends after a terminal frame or when the
    /// topic side closes the queue.
    pub fn frames(self) -> impl Stream<Item = String> + Send {
        self.frames_with_heartbeat(HEARTBEAT_INTERVAL)
    }

    pub fn frames_with_heartbeat(self, heartbeat: Duration) -> impl Stream<Item = String> + Send {
        futures::stream::unfold(Some(self), move |state| async move {
            let mut sub = state?;
            if let Some(item) = sub.pending.pop_front() {
                let next = if item.terminal { None } else { Some(sub) };
                return Some((item.frame, next));
            }
            match tokio::time::timeout(heartbeat, sub.rx.recv()).await {
                Ok(Some(item)) => {
                    let next = if item.terminal { None } else { Some(sub) };
                    Some((item.frame, next))
                }
                Ok(None) => None,
                Err(_) => Some((HEARTBEAT_FRAME.to_string(), Some(sub))),
            }
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = topics.get_mut(&self.topic) {
            state.subscribers.retain(|s| s.id != self.sub_id);
        }
    }
}
