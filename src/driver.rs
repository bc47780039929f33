//! Round driver: the single task that moves rounds through their phases.
//!
//! Each iteration opens a round, waits out the betting window, ticks the
//! multiplier until the crash, settles, hands the record to a persistence task
//! and sleeps through the cooldown. A failed round creation is retried after
//! the configured backoff. Stopping takes effect between rounds.

use crate::engine::CrashEngine;
use crate::games::round::TickOutcome;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

pub struct RoundDriver {
    engine: Arc<CrashEngine>,
    running: Arc<AtomicBool>,
    shutdown: Notify,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RoundDriver {
    pub fn spawn(engine: Arc<CrashEngine>) -> Arc<Self> {
        let driver = Arc::new(Self {
            engine,
            running: Arc::new(AtomicBool::new(true)),
            shutdown: Notify::new(),
            handle: Mutex::new(None),
        });

        let handle = tokio::spawn(driver.clone().run());
        *driver.handle.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        driver
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    /// Wait for the loop to exit after [`RoundDriver::stop`]
    pub async fn join(&self) {
        let handle = self.handle.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Round driver task failed: {}", e);
            }
        }
    }

    async fn run(self: Arc<Self>) {
        let config = self.engine.config().clone();
        info!(
            betting_window_ms = config.round.betting_window_ms,
            tick_interval_ms = config.round.tick_interval_ms,
            cooldown_ms = config.round.cooldown_ms,
            "Round driver started"
        );

        while self.is_running() {
            let round_id = match self.engine.start_new_round().await {
                Ok(round) => round.round_id,
                Err(e) => {
                    warn!(error = %e, retry_in_ms = config.round.retry_backoff_ms, "No round opened, retrying");
                    self.pause(config.retry_backoff()).await;
                    continue;
                }
            };

            tokio::time::sleep(config.betting_window()).await;

            if let Err(e) = self.engine.begin_running() {
                error!(round_id, error = %e, "Failed to start round");
                continue;
            }

            self.tick_until_crash(config.tick_interval()).await;
            self.settle_and_persist(round_id);

            self.pause(config.cooldown()).await;
        }

        info!("Round driver stopped");
    }

    async fn tick_until_crash(&self, tick: Duration) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of an interval completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            match self.engine.tick() {
                TickOutcome::Climbing(_) => continue,
                TickOutcome::Crashed(_) | TickOutcome::Idle => break,
            }
        }
    }

    fn settle_and_persist(&self, round_id: u64) {
        let record = match self.engine.settle_round() {
            Ok(record) => record,
            Err(e) => {
                error!(round_id, error = %e, "Failed to settle round");
                return;
            }
        };

        // A slow store must not hold up the cooldown or the next round
        let engine = self.engine.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.persist_round(&record).await {
                error!(round_id = record.round_id, error = %e, "Failed to persist finished round");
            }
        });
    }

    /// Sleep, waking early on stop
    async fn pause(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.shutdown.notified() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::errors::EngineResult;
    use crate::events::{BroadcastHub, GameEvent};
    use crate::games::types::{Multiplier, RoundPhase};
    use crate::price::PriceOracle;
    use crate::storage::{MemoryStore, RoundStore};

    fn engine_with(store: Arc<MemoryStore>, hub: BroadcastHub) -> Arc<CrashEngine> {
        let config = EngineConfig::testing();
        let oracle = PriceOracle::from_config(&config);
        CrashEngine::with_seed_generator(
            config,
            store,
            oracle,
            Arc::new(hub),
            Box::new(|| -> EngineResult<String> { Ok("abc123".to_string()) }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_runs_consecutive_rounds() {
        let store = Arc::new(MemoryStore::new());
        let hub = BroadcastHub::new(4_096);
        let mut rx = hub.subscribe();
        let engine = engine_with(store.clone(), hub);
        let driver = RoundDriver::spawn(engine.clone());

        let mut crashes = Vec::new();
        let mut updates = 0;
        while crashes.len() < 2 {
            match rx.recv().await.unwrap() {
                GameEvent::RoundCrash {
                    round_id,
                    crash_point,
                    ..
                } => crashes.push((round_id, crash_point)),
                GameEvent::MultiplierUpdate { .. } => updates += 1,
                _ => {}
            }
        }

        // abc123: round 1 crashes at 16.00, round 2 at 1.02
        assert_eq!(
            crashes,
            vec![
                (1, Multiplier::from_hundredths(1_600)),
                (2, Multiplier::from_hundredths(102)),
            ]
        );
        // 500 ticks of 0.03 to reach 16.00, one tick for 1.02
        assert_eq!(updates, 501);

        driver.stop();
        driver.join().await;
        assert!(!driver.is_running());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let stored = store.load_round(1).await.unwrap().unwrap();
        assert_eq!(stored.phase, RoundPhase::Settled);
        assert!(stored.end_time.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_round_save_does_not_stop_progression() {
        let store = Arc::new(MemoryStore::new());
        store.set_reject_finished_rounds(true);
        let hub = BroadcastHub::new(4_096);
        let mut rx = hub.subscribe();
        let engine = engine_with(store.clone(), hub);
        let driver = RoundDriver::spawn(engine.clone());

        let mut opened = Vec::new();
        while opened.len() < 2 {
            if let GameEvent::BettingPhaseStart { round_id, .. } = rx.recv().await.unwrap() {
                opened.push(round_id);
            }
        }
        assert_eq!(opened, vec![1, 2]);
        assert!(engine.metrics().persistence_failures.load(Ordering::Relaxed) >= 1);
        assert_eq!(engine.get_active_round().unwrap().round_id, 2);

        // round 1 kept its creation-time record
        let stored = store.load_round(1).await.unwrap().unwrap();
        assert_eq!(stored.phase, RoundPhase::Betting);

        driver.stop();
        driver.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_retries_round_creation() {
        let store = Arc::new(MemoryStore::new());
        store.set_available(false);
        let engine = engine_with(store.clone(), BroadcastHub::new(16));
        let driver = RoundDriver::spawn(engine.clone());

        // testing preset retries every 100ms
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(engine.get_active_round().is_none());
        assert!(
            engine
                .metrics()
                .round_creation_failures
                .load(Ordering::Relaxed)
                >= 3
        );

        store.set_available(true);
        tokio::time::sleep(Duration::from_millis(150)).await;
        let round = engine.get_active_round().expect("round opened after recovery");
        assert_eq!(round.round_id, 1);
        assert_eq!(round.phase, RoundPhase::Betting);

        driver.stop();
    }
}
