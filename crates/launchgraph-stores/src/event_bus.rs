//! Per-run event bus: ordered journal + realtime fan-out.
//!
//! The journal is the source of truth (replay, audit); the broadcast channel
//! pushes the same events to live subscribers. One producer per run, many
//! consumers; slow consumers lag on the broadcast side and recover via
//! replay.

use std::collections::HashMap;

use tokio::sync::{broadcast, RwLock};

use launchgraph_core::event::{EventKind, RunEvent};

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

struct RunChannel {
    journal: Vec<RunEvent>,
    tx: broadcast::Sender<RunEvent>,
    next_seq: u64,
}

impl RunChannel {
    fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            journal: Vec::new(),
            tx,
            next_seq: 0,
        }
    }
}

/// In-process event bus keyed by run id.
pub struct RunEventBus {
    runs: RwLock<HashMap<String, RunChannel>>,
    capacity: usize,
}

impl RunEventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Append to the journal and fan out. Returns the published event.
    pub async fn publish(
        &self,
        run_id: &str,
        scenario_id: &str,
        kind: EventKind,
        data: serde_json::Value,
    ) -> RunEvent {
        let mut runs = self.runs.write().await;
        let channel = runs
            .entry(run_id.to_string())
            .or_insert_with(|| RunChannel::new(self.capacity));
        let event = RunEvent::new(run_id, scenario_id, channel.next_seq, kind, data);
        channel.next_seq += 1;
        channel.journal.push(event.clone());
        // No receiver is a non-error; the journal remains source-of-truth.
        let _ = channel.tx.send(event.clone());
        event
    }

    /// Full journal followed by a live receiver. A subscriber joining mid-run
    /// sees all prior events, then continues live.
    pub async fn subscribe(&self, run_id: &str) -> (Vec<RunEvent>, broadcast::Receiver<RunEvent>) {
        let mut runs = self.runs.write().await;
        let channel = runs
            .entry(run_id.to_string())
            .or_insert_with(|| RunChannel::new(self.capacity));
        (channel.journal.clone(), channel.tx.subscribe())
    }

    /// Journal slice after a known event id (SSE `Last-Event-ID` reconnect),
    /// plus a live receiver. An unknown id replays the whole journal.
    pub async fn subscribe_after(
        &self,
        run_id: &str,
        last_event_id: Option<&str>,
    ) -> (Vec<RunEvent>, broadcast::Receiver<RunEvent>) {
        let (journal, rx) = self.subscribe(run_id).await;
        let replay = match last_event_id {
            Some(id) => match journal.iter().position(|e| e.event_id == id) {
                Some(position) => journal[position + 1..].to_vec(),
                None => journal,
            },
            None => journal,
        };
        (replay, rx)
    }

    /// Current journal for a run.
    pub async fn history(&self, run_id: &str) -> Vec<RunEvent> {
        let runs = self.runs.read().await;
        runs.get(run_id)
            .map(|channel| channel.journal.clone())
            .unwrap_or_default()
    }
}

impl Default for RunEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_publish_assigns_monotonic_seq_per_run() {
        tokio_test::block_on(async {
            let bus = RunEventBus::default();
            let a = bus
                .publish("run_1", "scn_1", EventKind::RunStarted, json!({}))
                .await;
            let b = bus
                .publish("run_1", "scn_1", EventKind::AgentStarted, json!({}))
                .await;
            let other = bus
                .publish("run_2", "scn_1", EventKind::RunStarted, json!({}))
                .await;
            assert_eq!(a.seq, 0);
            assert_eq!(b.seq, 1);
            assert_eq!(other.seq, 0);
            assert_ne!(a.event_id, b.event_id);
        });
    }

    #[test]
    fn test_late_subscriber_gets_replay_then_live() {
        tokio_test::block_on(async {
            let bus = RunEventBus::default();
            bus.publish("run_1", "scn_1", EventKind::RunStarted, json!({}))
                .await;
            bus.publish("run_1", "scn_1", EventKind::AgentStarted, json!({"agent": "icp_agent"}))
                .await;

            let (replay, mut rx) = bus.subscribe("run_1").await;
            assert_eq!(replay.len(), 2);
            assert_eq!(replay[0].kind, EventKind::RunStarted);

            bus.publish("run_1", "scn_1", EventKind::AgentCompleted, json!({}))
                .await;
            let live = rx.recv().await.expect("live event");
            assert_eq!(live.kind, EventKind::AgentCompleted);
            assert_eq!(live.seq, 2);
        });
    }

    #[test]
    fn test_subscribe_after_resumes_from_event_id() {
        tokio_test::block_on(async {
            let bus = RunEventBus::default();
            let first = bus
                .publish("run_1", "scn_1", EventKind::RunStarted, json!({}))
                .await;
            bus.publish("run_1", "scn_1", EventKind::AgentStarted, json!({}))
                .await;

            let (replay, _) = bus.subscribe_after("run_1", Some(&first.event_id)).await;
            assert_eq!(replay.len(), 1);
            assert_eq!(replay[0].kind, EventKind::AgentStarted);

            let (replay, _) = bus.subscribe_after("run_1", Some("evt_unknown")).await;
            assert_eq!(replay.len(), 2);
        });
    }
}
