//! Per-session, append-only event log with resumable fan-out.
//!
//! Each append is persisted before it is offered to subscribers, and the
//! offer is a non-blocking `try_send`: a subscriber whose buffer is full (by
//! event count or bytes) is disconnected and told where it stopped, so it can
//! resubscribe from that sequence. The producer never waits on a consumer.
//!
//! Subscribing registers the live feed first and then replays history from
//! the store; the overlap is dropped by sequence number, which gives every
//! subscriber a gap-free, duplicate-free view.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::Stream;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use stepforge_core::{EventDraft, OrchestratorError, PersistenceStore, SessionId, StreamEvent};

#[derive(Debug, Clone)]
pub struct EventLogConfig {
    pub subscriber_buffer_events: usize,
    pub subscriber_buffer_bytes: usize,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer_events: 1_000,
            subscriber_buffer_bytes: 8 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The subscriber fell behind and was disconnected; resume after `last_sequence`.
    #[error("subscriber fell behind; resume from sequence {last_sequence}")]
    Lagged { last_sequence: u64 },
}

struct SubscriberSlot {
    id: u64,
    tx: mpsc::Sender<StreamEvent>,
    buffered_bytes: Arc<AtomicUsize>,
    lagged: Arc<AtomicBool>,
}

struct StreamState {
    next_seq: u64,
    closed: bool,
    subscribers: Vec<SubscriberSlot>,
    next_subscriber_id: u64,
}

pub struct EventLog {
    store: Arc<dyn PersistenceStore>,
    streams: DashMap<SessionId, Arc<Mutex<StreamState>>>,
    config: EventLogConfig,
}

impl EventLog {
    pub fn new(store: Arc<dyn PersistenceStore>, config: EventLogConfig) -> Self {
        Self {
            store,
            streams: DashMap::new(),
            config,
        }
    }

    /// Stream state for a session, rebuilt from the store on first use.
    /// Closed streams get a throwaway state that is not cached.
    fn state_for(&self, session_id: SessionId) -> Result<Arc<Mutex<StreamState>>, OrchestratorError> {
        if let Some(state) = self.streams.get(&session_id) {
            return Ok(state.value().clone());
        }

        let last = self
            .store
            .last_event(&session_id)
            .map_err(OrchestratorError::storage)?;
        let state = StreamState {
            next_seq: last.as_ref().map_or(1, |e| e.sequence + 1),
            closed: last.map_or(false, |e| e.terminal),
            subscribers: Vec::new(),
            next_subscriber_id: 0,
        };
        if state.closed {
            return Ok(Arc::new(Mutex::new(state)));
        }
        Ok(self
            .streams
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(state)))
            .value()
            .clone())
    }

    /// Assign the next sequence number, persist, then fan out.
    ///
    /// A terminal event closes the stream: later appends are rejected and
    /// live subscribers end after receiving it.
    pub fn append(&self, session_id: SessionId, draft: EventDraft) -> Result<StreamEvent, OrchestratorError> {
        let state = self.state_for(session_id)?;
        let mut st = state.lock();
        if st.closed {
            return Err(OrchestratorError::Conflict(format!(
                "event stream for session {session_id} is closed"
            )));
        }

        let event = draft.into_event(st.next_seq);
        self.store
            .append_event(&session_id, &event)
            .map_err(OrchestratorError::storage)?;
        st.next_seq += 1;

        let size = event.size_hint();
        let max_bytes = self.config.subscriber_buffer_bytes;
        st.subscribers.retain(|sub| {
            if sub.buffered_bytes.load(Ordering::Acquire) + size > max_bytes {
                warn!(session_id = %session_id, subscriber = sub.id, "Subscriber byte buffer full; disconnecting");
                sub.lagged.store(true, Ordering::Release);
                return false;
            }
            match sub.tx.try_send(event.clone()) {
                Ok(()) => {
                    sub.buffered_bytes.fetch_add(size, Ordering::AcqRel);
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!(session_id = %session_id, subscriber = sub.id, "Subscriber buffer full; disconnecting");
                    sub.lagged.store(true, Ordering::Release);
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(session_id = %session_id, subscriber = sub.id, "Subscriber gone");
                    false
                }
            }
        });

        if event.terminal {
            st.closed = true;
            st.subscribers.clear();
            drop(st);
            self.streams.remove(&session_id);
            debug!(session_id = %session_id, sequence = event.sequence, "Event stream closed");
        }

        Ok(event)
    }

    /// Subscribe to events with `sequence > from_sequence`.
    pub fn subscribe(&self, session_id: SessionId, from_sequence: u64) -> Result<Subscription, OrchestratorError> {
        let state = self.state_for(session_id)?;

        let live = {
            let mut st = state.lock();
            if st.closed {
                None
            } else {
                let (tx, rx) = mpsc::channel(self.config.subscriber_buffer_events.max(1));
                let buffered_bytes = Arc::new(AtomicUsize::new(0));
                let lagged = Arc::new(AtomicBool::new(false));
                let id = st.next_subscriber_id;
                st.next_subscriber_id += 1;
                st.subscribers.push(SubscriberSlot {
                    id,
                    tx,
                    buffered_bytes: buffered_bytes.clone(),
                    lagged: lagged.clone(),
                });
                debug!(session_id = %session_id, subscriber = id, from_sequence, "Subscriber attached");
                Some(LiveFeed {
                    rx,
                    buffered_bytes,
                    lagged,
                })
            }
        };

        let history = self
            .store
            .load_log(&session_id, from_sequence)
            .map_err(OrchestratorError::storage)?;

        Ok(Subscription {
            history: history.into(),
            live,
            last_sequence: from_sequence,
            finished: false,
        })
    }

    /// Sequence number the next append will get.
    pub fn next_sequence(&self, session_id: SessionId) -> Result<u64, OrchestratorError> {
        Ok(self.state_for(session_id)?.lock().next_seq)
    }

    pub fn subscriber_count(&self, session_id: SessionId) -> usize {
        self.streams
            .get(&session_id)
            .map_or(0, |state| state.lock().subscribers.len())
    }
}

struct LiveFeed {
    rx: mpsc::Receiver<StreamEvent>,
    buffered_bytes: Arc<AtomicUsize>,
    lagged: Arc<AtomicBool>,
}

/// One subscriber's ordered view of a session's events.
pub struct Subscription {
    history: VecDeque<StreamEvent>,
    live: Option<LiveFeed>,
    last_sequence: u64,
    finished: bool,
}

impl Subscription {
    /// Next event; `None` after the terminal event (or immediately when the
    /// stream is already closed and nothing is left to replay).
    pub async fn next(&mut self) -> Option<Result<StreamEvent, StreamError>> {
        loop {
            if self.finished {
                return None;
            }

            if let Some(event) = self.history.pop_front() {
                return Some(Ok(self.deliver(event)));
            }

            let Some(live) = self.live.as_mut() else {
                self.finished = true;
                return None;
            };

            match live.rx.recv().await {
                Some(event) => {
                    live.buffered_bytes
                        .fetch_sub(event.size_hint(), Ordering::AcqRel);
                    if event.sequence <= self.last_sequence {
                        continue;
                    }
                    return Some(Ok(self.deliver(event)));
                }
                None => {
                    self.finished = true;
                    if live.lagged.load(Ordering::Acquire) {
                        return Some(Err(StreamError::Lagged {
                            last_sequence: self.last_sequence,
                        }));
                    }
                    return None;
                }
            }
        }
    }

    fn deliver(&mut self, event: StreamEvent) -> StreamEvent {
        self.last_sequence = event.sequence;
        if event.terminal {
            self.finished = true;
        }
        event
    }

    /// Sequence of the last event handed out.
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<StreamEvent, StreamError>> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|item| (item, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use futures::StreamExt;
    use serde_json::json;
    use stepforge_core::EventType;
    use uuid::Uuid;

    fn log_with(config: EventLogConfig) -> (Arc<SqliteStore>, EventLog) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let log = EventLog::new(store.clone(), config);
        (store, log)
    }

    fn msg(n: u64) -> EventDraft {
        EventDraft::new(EventType::Message, json!({ "n": n }))
    }

    fn done() -> EventDraft {
        EventDraft::new(EventType::Done, json!({ "output": "ok" }))
    }

    async fn drain(sub: Subscription) -> Vec<Result<StreamEvent, StreamError>> {
        sub.into_stream().collect().await
    }

    #[tokio::test]
    async fn test_sequences_are_contiguous_and_persisted() {
        let (store, log) = log_with(EventLogConfig::default());
        let id = Uuid::new_v4();
        for n in 0..5 {
            let event = log.append(id, msg(n)).unwrap();
            assert_eq!(event.sequence, n + 1);
        }
        assert_eq!(store.event_count(&id).unwrap(), 5);
        assert_eq!(log.next_sequence(id).unwrap(), 6);
    }

    #[tokio::test]
    async fn test_replay_then_live_until_terminal() {
        let (_store, log) = log_with(EventLogConfig::default());
        let id = Uuid::new_v4();
        log.append(id, msg(1)).unwrap();
        log.append(id, msg(2)).unwrap();

        let sub = log.subscribe(id, 0).unwrap();
        log.append(id, msg(3)).unwrap();
        log.append(id, done()).unwrap();

        let events: Vec<_> = drain(sub).await.into_iter().map(Result::unwrap).collect();
        assert_eq!(events.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert!(events.last().unwrap().terminal);
    }

    #[tokio::test]
    async fn test_resume_is_gap_free_under_concurrent_appends() {
        let (_store, log) = log_with(EventLogConfig::default());
        let log = Arc::new(log);
        let id = Uuid::new_v4();
        for n in 0..20 {
            log.append(id, msg(n)).unwrap();
        }

        let producer = {
            let log = log.clone();
            tokio::spawn(async move {
                for n in 20..200 {
                    log.append(id, msg(n)).unwrap();
                    tokio::task::yield_now().await;
                }
                log.append(id, done()).unwrap();
            })
        };

        tokio::task::yield_now().await;
        let sub = log.subscribe(id, 7).unwrap();
        let events: Vec<_> = drain(sub).await.into_iter().map(Result::unwrap).collect();
        producer.await.unwrap();

        let seqs: Vec<u64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, (8..=201).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_disconnected_not_blocking() {
        let (_store, log) = log_with(EventLogConfig {
            subscriber_buffer_events: 5,
            ..Default::default()
        });
        let id = Uuid::new_v4();
        let mut slow = log.subscribe(id, 0).unwrap();

        for n in 0..10 {
            log.append(id, msg(n)).unwrap();
        }
        assert_eq!(log.subscriber_count(id), 0);

        for expected in 1..=5 {
            assert_eq!(slow.next().await.unwrap().unwrap().sequence, expected);
        }
        assert_eq!(
            slow.next().await.unwrap(),
            Err(StreamError::Lagged { last_sequence: 5 })
        );
        assert!(slow.next().await.is_none());

        // Reconnect where it stopped.
        let mut resumed = log.subscribe(id, 5).unwrap();
        for expected in 6..=10 {
            assert_eq!(resumed.next().await.unwrap().unwrap().sequence, expected);
        }
    }

    #[tokio::test]
    async fn test_byte_budget_disconnects() {
        let (_store, log) = log_with(EventLogConfig {
            subscriber_buffer_events: 1_000,
            subscriber_buffer_bytes: 200,
        });
        let id = Uuid::new_v4();
        let mut sub = log.subscribe(id, 0).unwrap();
        let big = EventDraft::new(EventType::Message, json!({ "text": "x".repeat(150) }));
        log.append(id, big.clone()).unwrap();
        log.append(id, big).unwrap();

        assert_eq!(sub.next().await.unwrap().unwrap().sequence, 1);
        assert_eq!(sub.next().await.unwrap(), Err(StreamError::Lagged { last_sequence: 1 }));
    }

    #[tokio::test]
    async fn test_independent_subscribers() {
        let (_store, log) = log_with(EventLogConfig {
            subscriber_buffer_events: 2,
            ..Default::default()
        });
        let id = Uuid::new_v4();
        let mut fast = log.subscribe(id, 0).unwrap();
        let mut slow = log.subscribe(id, 0).unwrap();

        for n in 0..4 {
            log.append(id, msg(n)).unwrap();
            assert_eq!(fast.next().await.unwrap().unwrap().sequence, n + 1);
        }
        assert_eq!(log.subscriber_count(id), 1);
        slow.next().await.unwrap().unwrap();
        slow.next().await.unwrap().unwrap();
        assert!(slow.next().await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_closed_stream_rejects_appends_and_survives_restart() {
        let (store, log) = log_with(EventLogConfig::default());
        let id = Uuid::new_v4();
        log.append(id, msg(0)).unwrap();
        log.append(id, done()).unwrap();

        assert!(matches!(log.append(id, msg(1)), Err(OrchestratorError::Conflict(_))));

        // Fresh log over the same store: still closed, replay still works.
        let restarted = EventLog::new(store, EventLogConfig::default());
        assert_eq!(restarted.next_sequence(id).unwrap(), 3);
        assert!(drain(restarted.subscribe(id, 2).unwrap()).await.is_empty());
        let replay = drain(restarted.subscribe(id, 0).unwrap()).await;
        assert_eq!(replay.len(), 2);
        assert!(restarted.streams.is_empty());
        assert!(log.streams.is_empty());
    }

    #[tokio::test]
    async fn test_sequence_continues_after_restart() {
        let (store, log) = log_with(EventLogConfig::default());
        let id = Uuid::new_v4();
        log.append(id, msg(0)).unwrap();
        log.append(id, msg(1)).unwrap();
        drop(log);

        let restarted = EventLog::new(store, EventLogConfig::default());
        assert_eq!(restarted.append(id, msg(2)).unwrap().sequence, 3);
    }
}
