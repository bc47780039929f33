//! Player-visible events and the sinks that carry them.
//!
//! Publishing is fire-and-forget: a sink never reports failure back to the
//! round driver or the ledger.

use crate::games::types::Multiplier;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

/// Wire frame is `{"event": <name>, "data": <payload>}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum GameEvent {
    BettingPhaseStart {
        round_id: u64,
        /// Betting window in milliseconds
        duration: u64,
    },
    RoundStart {
        round_id: u64,
        seed_hash: String,
    },
    MultiplierUpdate {
        multiplier: Multiplier,
    },
    RoundCrash {
        round_id: u64,
        crash_point: Multiplier,
        seed: String,
    },
    #[serde(rename_all = "camelCase")]
    PlayerCashedOut {
        player_id: String,
        username: String,
        cashout_multiplier: Multiplier,
        payout_usd: f64,
    },
}

impl GameEvent {
    pub fn name(&self) -> &'static str {
        match self {
            GameEvent::BettingPhaseStart { .. } => "betting_phase_start",
            GameEvent::RoundStart { .. } => "round_start",
            GameEvent::MultiplierUpdate { .. } => "multiplier_update",
            GameEvent::RoundCrash { .. } => "round_crash",
            GameEvent::PlayerCashedOut { .. } => "player_cashed_out",
        }
    }

    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

pub trait EventSink: Send + Sync {
    fn publish(&self, event: &GameEvent);
}

/// Fan-out to WebSocket clients over a tokio broadcast channel
#[derive(Clone)]
pub struct BroadcastHub {
    tx: broadcast::Sender<GameEvent>,
    published: std::sync::Arc<AtomicU64>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            published: std::sync::Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl EventSink for BroadcastHub {
    fn publish(&self, event: &GameEvent) {
        self.published.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.tx.send(event.clone()) {
            debug!("No subscribers for {} event: {}", event.name(), e);
        }
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: &GameEvent) {}
}

/// Keeps every published event for assertions
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: std::sync::Mutex<Vec<GameEvent>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn events(&self) -> Vec<GameEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(GameEvent::name).collect()
    }
}

#[cfg(test)]
impl EventSink for RecordingSink {
    fn publish(&self, event: &GameEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
