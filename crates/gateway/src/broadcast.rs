//! Per-connection outbound queue and bus fan-out.
//!
//! Every connection owns one bounded [`OutboundQueue`]; the spec's
//! backpressure policy — drop the oldest *non-critical* frame to make room,
//! and close the connection if a critical frame still can't fit — lives
//! here rather than relying on a channel type that can't evict from the
//! middle.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use conduit_protocol::{events, EventFrame};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use crate::state::GatewayState;

pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct QueuedFrame {
    pub json: String,
    pub critical: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// The frame (or an older one evicted to make room for it) could not be
    /// delivered and the connection should be closed with `slow-client`.
    CloseSlowClient,
}

/// Bounded per-connection outbound queue with the eviction policy above.
pub struct OutboundQueue {
    inner: Mutex<VecDeque<QueuedFrame>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Enqueue a frame, evicting the oldest non-critical entry if full.
    pub async fn push(&self, frame: QueuedFrame) -> PushOutcome {
        let mut queue = self.inner.lock().await;
        if queue.len() < self.capacity {
            queue.push_back(frame);
            drop(queue);
            self.notify.notify_one();
            return PushOutcome::Queued;
        }

        if let Some(idx) = queue.iter().position(|f| !f.critical) {
            queue.remove(idx);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            queue.push_back(frame);
            drop(queue);
            self.notify.notify_one();
            return PushOutcome::Queued;
        }

        if !frame.critical {
            // Queue is saturated with critical frames; a non-critical
            // arrival is simply dropped rather than closing the connection.
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return PushOutcome::Queued;
        }

        PushOutcome::CloseSlowClient
    }

    /// Wait for and remove the next frame. Returns `None` once `close` has
    /// been called and the queue has drained.
    pub async fn recv(&self) -> Option<QueuedFrame> {
        loop {
            {
                let mut queue = self.inner.lock().await;
                if let Some(frame) = queue.pop_front() {
                    return Some(frame);
                }
                if self.closed.load(Ordering::Relaxed) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.notify.notify_one();
    }

    /// Take and reset the count of frames dropped since the last call.
    pub fn take_dropped(&self) -> u64 {
        self.dropped.swap(0, Ordering::Relaxed)
    }
}

#[derive(Default)]
pub struct BroadcastOpts {
    /// Restrict delivery to connections holding one of these scopes (in
    /// addition to admin, which always receives everything).
    pub required_scopes: Option<&'static [&'static str]>,
}

/// Publish `event` with `data` to every connection whose scopes satisfy
/// `opts`. Marks the frame critical per `conduit_protocol::events::CRITICAL`
/// and surfaces a `backpressure` event for any connection that had to drop
/// frames to make room.
pub async fn broadcast(
    state: &Arc<GatewayState>,
    event: &str,
    data: serde_json::Value,
    opts: BroadcastOpts,
) {
    let seq = state.next_seq();
    let ts = now_ms();
    let frame = EventFrame::new(event, data, seq, ts);
    let json = match serde_json::to_string(&frame) {
        Ok(j) => j,
        Err(err) => {
            warn!(%err, "failed to serialize event");
            return;
        }
    };
    let critical = events::CRITICAL.contains(&event);

    let clients = state.clients.read().await;
    debug!(event, seq, clients = clients.len(), "broadcasting event");

    for (conn_id, client) in clients.iter() {
        if let Some(required) = opts.required_scopes {
            if !required.iter().any(|s| client.has_scope(s)) {
                continue;
            }
        }
        if !critical {
            if let Some(topics) = client.subscriptions.read().await.as_ref() {
                if !topics.contains(event) {
                    continue;
                }
            }
        }
        let queue = &client.queue;
        let outcome = queue
            .push(QueuedFrame {
                json: json.clone(),
                critical,
            })
            .await;
        if outcome == PushOutcome::CloseSlowClient {
            warn!(conn_id, "slow client; closing connection");
            queue.close();
        }
        let dropped = queue.take_dropped();
        if dropped > 0 {
            let bp = EventFrame::new(
                events::BACKPRESSURE,
                serde_json::json!({ "dropped": dropped }),
                state.next_seq(),
                now_ms(),
            );
            if let Ok(bp_json) = serde_json::to_string(&bp) {
                let _ = queue
                    .push(QueuedFrame {
                        json: bp_json,
                        critical: false,
                    })
                    .await;
            }
        }
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: &str, critical: bool) -> QueuedFrame {
        QueuedFrame {
            json: tag.to_string(),
            critical,
        }
    }

    #[tokio::test]
    async fn push_under_capacity_always_queues() {
        let q = OutboundQueue::new(2);
        assert_eq!(q.push(frame("a", false)).await, PushOutcome::Queued);
        assert_eq!(q.push(frame("b", false)).await, PushOutcome::Queued);
        assert_eq!(q.recv().await.unwrap().json, "a");
    }

    #[tokio::test]
    async fn full_queue_evicts_oldest_non_critical() {
        let q = OutboundQueue::new(1);
        q.push(frame("a", false)).await;
        assert_eq!(q.push(frame("b", false)).await, PushOutcome::Queued);
        assert_eq!(q.take_dropped(), 1);
        assert_eq!(q.recv().await.unwrap().json, "b");
    }

    #[tokio::test]
    async fn critical_frame_cannot_be_evicted_and_closes_when_saturated() {
        let q = OutboundQueue::new(1);
        q.push(frame("a", true)).await;
        let outcome = q.push(frame("b", true)).await;
        assert_eq!(outcome, PushOutcome::CloseSlowClient);
    }

    #[tokio::test]
    async fn critical_frame_evicts_a_non_critical_one_to_fit() {
        let q = OutboundQueue::new(1);
        q.push(frame("a", false)).await;
        assert_eq!(q.push(frame("critical", true)).await, PushOutcome::Queued);
        assert_eq!(q.recv().await.unwrap().json, "critical");
    }

    #[tokio::test]
    async fn subscribed_client_only_receives_its_topics() {
        use crate::state::{ConnectedClient, GatewayState, SessionPhase};
        use std::time::{Duration, Instant};
        use tokio::sync::RwLock as AsyncRwLock;
        use tokio_util::sync::CancellationToken;

        let config = std::sync::Arc::new(conduit_config::ConfigStore::new(conduit_config::ConduitConfig::default()));
        let state = GatewayState::new(config);

        let now = Instant::now();
        let make_client = |conn_id: &str, subs: Option<Vec<&str>>| ConnectedClient {
            conn_id: conn_id.to_string(),
            device_id: Some(conn_id.to_string()),
            role: "observer".into(),
            scopes: vec![],
            phase: SessionPhase::Authenticated,
            challenge_nonce: String::new(),
            queue: OutboundQueue::new(OUTBOUND_QUEUE_CAPACITY),
            connected_at: now,
            last_activity: now,
            cancel: CancellationToken::new(),
            subscriptions: AsyncRwLock::new(subs.map(|s| s.into_iter().map(String::from).collect())),
        };

        let narrow = make_client("narrow", Some(vec![events::CONFIG_CHANGED]));
        let wide = make_client("wide", None);
        let narrow_queue = Arc::clone(&narrow.queue);
        let wide_queue = Arc::clone(&wide.queue);
        state.register_client(narrow).await;
        state.register_client(wide).await;

        broadcast(&state, events::HOOK_FIRED, serde_json::json!({}), BroadcastOpts::default()).await;

        let narrow_got = tokio::time::timeout(Duration::from_millis(50), narrow_queue.recv()).await;
        assert!(narrow_got.is_err(), "narrow subscriber should not receive an unsubscribed topic");
        assert!(wide_queue.recv().await.is_some());
    }
}
