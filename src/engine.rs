//! The crash engine facade.
//!
//! Owns the current round, the ledger, the price oracle and the store. Player
//! operations (`place_bet`, `process_cashout`) may run concurrently from any
//! task; phase transitions (`start_new_round`, `begin_running`, `tick`,
//! `settle_round`) are driven by a single [`crate::driver::RoundDriver`].

use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult, StoreError};
use crate::events::{EventSink, GameEvent};
use crate::fairness::{self, OsSeedGenerator, SeedGenerator, Verification};
use crate::games::curve::{curve_from_config, GrowthCurve};
use crate::games::ledger::Ledger;
use crate::games::round::{RoundCell, TickOutcome};
use crate::games::types::{Bet, Currency, LedgerEntry, Player, RoundRecord, RoundSnapshot, Settlement};
use crate::metrics::EngineMetrics;
use crate::price::PriceOracle;
use crate::storage::{with_timeout, RoundStore};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

pub struct CrashEngine {
    config: EngineConfig,
    ledger: Ledger,
    oracle: PriceOracle,
    store: Arc<dyn RoundStore>,
    events: Arc<dyn EventSink>,
    seeds: Box<dyn SeedGenerator>,
    curve: Box<dyn GrowthCurve>,
    current: RwLock<Option<Arc<RoundCell>>>,
    /// Highest round id handed out by this process
    issued_round_id: AtomicU64,
    /// Serializes round creation
    creation: Mutex<()>,
    journal: mpsc::Sender<LedgerEntry>,
    metrics: Arc<EngineMetrics>,
}

impl CrashEngine {
    /// Must be called inside a tokio runtime; spawns the journal writer.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn RoundStore>,
        oracle: PriceOracle,
        events: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        Self::with_seed_generator(config, store, oracle, events, Box::new(OsSeedGenerator))
    }

    pub fn with_seed_generator(
        config: EngineConfig,
        store: Arc<dyn RoundStore>,
        oracle: PriceOracle,
        events: Arc<dyn EventSink>,
        seeds: Box<dyn SeedGenerator>,
    ) -> Arc<Self> {
        let metrics = Arc::new(EngineMetrics::new());
        let (journal, rx) = mpsc::channel(config.storage.journal_capacity.max(1));
        spawn_journal_writer(store.clone(), rx, metrics.clone(), config.storage_timeout());

        let curve = curve_from_config(&config.round.growth, config.tick_interval());
        Arc::new(Self {
            config,
            ledger: Ledger::new(),
            oracle,
            store,
            events,
            seeds,
            curve,
            current: RwLock::new(None),
            issued_round_id: AtomicU64::new(0),
            creation: Mutex::new(()),
            journal,
            metrics,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    async fn store_call<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        F: std::future::Future<Output = Result<T, StoreError>>,
    {
        with_timeout(self.config.storage_timeout(), call).await
    }

    /// Reload wallets and the round counter from the store, and close any
    /// round a previous process left open so its seed can be verified
    pub async fn restore(&self) -> EngineResult<usize> {
        let players = self.store_call(self.store.load_players()).await?;
        let count = players.len();
        for player in players {
            self.ledger.restore_player(player);
        }

        let closed = self.close_abandoned_rounds().await?;

        let last = self.store_call(self.store.last_round_id()).await?;
        self.issued_round_id.fetch_max(last, Ordering::SeqCst);
        info!(
            players = count,
            last_round_id = last,
            closed_rounds = closed,
            store = self.store.name(),
            "Engine state restored"
        );
        Ok(count)
    }

    async fn close_abandoned_rounds(&self) -> EngineResult<usize> {
        let rounds = self.store_call(self.store.unfinished_rounds()).await?;
        let count = rounds.len();
        for mut record in rounds {
            let lost = record.close_abandoned(Utc::now());
            warn!(
                round_id = record.round_id,
                bets = record.bets.len(),
                lost,
                crash_point = %record.crash_point,
                "Closing round left open by a previous run"
            );
            self.persist_round(&record).await?;
        }
        Ok(count)
    }

    // Players

    pub async fn register_player(&self, name: &str) -> EngineResult<Player> {
        let player = self
            .ledger
            .register_player(name, self.config.wallet.initial_balance_usd)?;
        self.save_player(&player).await;
        Ok(player)
    }

    pub async fn seed_demo_players(&self) -> Vec<Player> {
        let players = self.ledger.seed_demo_players();
        for player in &players {
            self.save_player(player).await;
        }
        players
    }

    async fn save_player(&self, player: &Player) {
        // The in-memory wallet stays authoritative; the journal rewrites it on the next entry
        if let Err(e) = self.store_call(self.store.save_player(player)).await {
            warn!(player_id = %player.player_id, error = %e, "Failed to persist player");
        }
    }

    pub fn player(&self, player_id: &str) -> EngineResult<Player> {
        self.ledger.get_player(player_id)
    }

    pub fn balance(&self, player_id: &str) -> EngineResult<f64> {
        self.ledger.balance(player_id)
    }

    // Rounds

    fn current_round(&self) -> Option<Arc<RoundCell>> {
        self.current
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn active_round(&self) -> EngineResult<Arc<RoundCell>> {
        match self.current_round() {
            Some(round) if round.phase().is_active() => Ok(round),
            _ => Err(EngineError::NoActiveRound),
        }
    }

    /// The round in Betting or Running, if any
    pub fn get_active_round(&self) -> Option<RoundSnapshot> {
        self.active_round().ok().map(|round| round.snapshot())
    }

    /// The most recent round whatever its phase
    pub fn latest_round(&self) -> Option<RoundSnapshot> {
        self.current_round().map(|round| round.snapshot())
    }

    /// Open a new round for betting. The round is stored before it becomes
    /// visible; any failure leaves the engine without an active round.
    pub async fn start_new_round(&self) -> EngineResult<RoundSnapshot> {
        let _creating = self.creation.lock().await;

        if let Some(round) = self.current_round() {
            if round.phase().is_active() {
                return Err(EngineError::RoundInProgress {
                    round_id: round.round_id(),
                });
            }
        }

        let result = self.create_round().await;
        if let Err(ref e) = result {
            EngineMetrics::incr(&self.metrics.round_creation_failures);
            warn!(error = %e, "Round creation failed");
        }
        let round = result?;

        self.issued_round_id.fetch_max(round.round_id(), Ordering::SeqCst);
        *self.current.write().unwrap_or_else(|p| p.into_inner()) = Some(round.clone());
        EngineMetrics::incr(&self.metrics.rounds_started);

        info!(round_id = round.round_id(), public_hash = %round.header().public_hash, "Betting phase started");
        self.events.publish(&GameEvent::BettingPhaseStart {
            round_id: round.round_id(),
            duration: self.config.round.betting_window_ms,
        });
        Ok(round.snapshot())
    }

    async fn create_round(&self) -> EngineResult<Arc<RoundCell>> {
        let seed = self.seeds.next_seed()?;
        let last = self.store_call(self.store.last_round_id()).await?;
        let round_id = last.max(self.issued_round_id.load(Ordering::SeqCst)) + 1;

        let round = Arc::new(RoundCell::new(round_id, seed)?);
        self.store_call(self.store.save_round(&round.to_record())).await?;
        Ok(round)
    }

    /// Close betting and publish the commitment
    pub fn begin_running(&self) -> EngineResult<u64> {
        let round = self.active_round()?;
        round.begin_running()?;

        info!(round_id = round.round_id(), "Round running");
        self.events.publish(&GameEvent::RoundStart {
            round_id: round.round_id(),
            seed_hash: round.header().public_hash.clone(),
        });
        Ok(round.round_id())
    }

    /// One driver tick
    pub fn tick(&self) -> TickOutcome {
        let Some(round) = self.current_round() else {
            return TickOutcome::Idle;
        };

        let outcome = round.advance(self.curve.as_ref());
        match outcome {
            TickOutcome::Climbing(multiplier) => {
                self.events.publish(&GameEvent::MultiplierUpdate { multiplier });
            }
            TickOutcome::Crashed(crash_point) => {
                self.metrics.record_crash(crash_point.hundredths());
                info!(round_id = round.round_id(), crash_point = %crash_point, "Round crashed");

                self.events.publish(&GameEvent::MultiplierUpdate {
                    multiplier: crash_point,
                });
                self.events.publish(&GameEvent::RoundCrash {
                    round_id: round.round_id(),
                    crash_point,
                    seed: round.header().seed.clone(),
                });
            }
            TickOutcome::Idle => {}
        }
        outcome
    }

    /// Mark un-cashed bets as lost and return the final record
    pub fn settle_round(&self) -> EngineResult<RoundRecord> {
        let round = self.current_round().ok_or(EngineError::NoActiveRound)?;
        let losses = round.mark_settled()?;
        let record = round.to_record();

        info!(
            round_id = record.round_id,
            bets = record.bets.len(),
            losses,
            "Round settled"
        );
        Ok(record)
    }

    pub async fn persist_round(&self, record: &RoundRecord) -> EngineResult<()> {
        match self.store_call(self.store.save_round(record)).await {
            Ok(()) => {
                debug!(round_id = record.round_id, "Round persisted");
                Ok(())
            }
            Err(e) => {
                EngineMetrics::incr(&self.metrics.persistence_failures);
                Err(e.into())
            }
        }
    }

    /// Full record of a round, including the seed. Callers decide what to reveal.
    pub async fn round_record(&self, round_id: u64) -> EngineResult<RoundRecord> {
        if let Some(round) = self.current_round() {
            if round.round_id() == round_id {
                return Ok(round.to_record());
            }
        }

        self.store_call(self.store.load_round(round_id))
            .await?
            .ok_or(EngineError::RoundNotFound(round_id))
    }

    pub async fn verify_round(&self, round_id: u64) -> EngineResult<Verification> {
        let record = self.round_record(round_id).await?;
        if !record.phase.is_finished() {
            return Err(EngineError::RoundInProgress { round_id });
        }
        fairness::verify(&record.seed, round_id, &record.public_hash, record.crash_point)
    }

    // Ledger

    pub async fn place_bet(&self, player_id: &str, amount_usd: f64, currency: Currency) -> EngineResult<Bet> {
        let result = self.try_place_bet(player_id, amount_usd, currency).await;
        match &result {
            Ok(bet) => self.metrics.record_bet(bet.stake_usd),
            Err(e) => {
                EngineMetrics::incr(&self.metrics.bets_rejected);
                debug!(player_id, error = %e, "Bet rejected");
            }
        }
        result
    }

    async fn try_place_bet(&self, player_id: &str, amount_usd: f64, currency: Currency) -> EngineResult<Bet> {
        if !(amount_usd.is_finite() && amount_usd > 0.0) {
            return Err(EngineError::InvalidAmount(amount_usd));
        }

        let round = self.active_round()?;
        self.ledger.precheck_bet(&round, player_id, amount_usd)?;

        let price = self.oracle.get_price(currency).await?;
        let (bet, entry) = self
            .ledger
            .place_bet(&round, player_id, amount_usd, currency, price)?;

        self.write_journal(entry).await;
        Ok(bet)
    }

    /// Cash out of `round_id`, or of the current round when `None`
    pub async fn process_cashout(&self, player_id: &str, round_id: Option<u64>) -> EngineResult<Settlement> {
        let result = self.try_cashout(player_id, round_id).await;
        match &result {
            Ok(settlement) => {
                self.metrics.record_cashout(settlement.payout_usd);
                self.events.publish(&GameEvent::PlayerCashedOut {
                    player_id: settlement.player_id.clone(),
                    username: settlement.username.clone(),
                    cashout_multiplier: settlement.cashout_multiplier,
                    payout_usd: settlement.payout_usd,
                });
            }
            Err(e) => {
                EngineMetrics::incr(&self.metrics.cashouts_rejected);
                debug!(player_id, error = %e, "Cashout rejected");
            }
        }
        result
    }

    async fn try_cashout(&self, player_id: &str, round_id: Option<u64>) -> EngineResult<Settlement> {
        let round = self.current_round().ok_or(EngineError::NoActiveRound)?;
        let round_id = round_id.unwrap_or(round.round_id());
        if round_id < round.round_id() {
            return Err(EngineError::TooLate { round_id });
        }
        if round_id > round.round_id() {
            return Err(EngineError::RoundClosed { round_id });
        }

        let currency = self.ledger.cashout_currency(&round, player_id)?;
        let price = self.oracle.get_price(currency).await?;
        let (settlement, entry) = self.ledger.process_cashout(&round, player_id, price)?;

        self.write_journal(entry).await;
        Ok(settlement)
    }

    async fn write_journal(&self, entry: LedgerEntry) {
        let reference = entry.transaction.reference.clone();
        if self.journal.send(entry).await.is_err() {
            EngineMetrics::incr(&self.metrics.journal_failures);
            error!(%reference, "Ledger journal is closed; entry kept in memory only");
        }
    }
}

/// Drains ledger entries into the store, one atomic batch per entry
fn spawn_journal_writer(
    store: Arc<dyn RoundStore>,
    mut rx: mpsc::Receiver<LedgerEntry>,
    metrics: Arc<EngineMetrics>,
    timeout: Duration,
) {
    tokio::spawn(async move {
        while let Some(entry) = rx.recv().await {
            let reference = entry.transaction.reference.clone();
            match with_timeout(timeout, store.append_entry(&entry)).await {
                Ok(()) => {}
                Err(StoreError::Duplicate(_)) => {
                    warn!(%reference, "Ledger entry already stored");
                }
                Err(e) => {
                    EngineMetrics::incr(&metrics.journal_failures);
                    error!(%reference, error = %e, "Failed to store ledger entry");
                }
            }
        }
        debug!("Ledger journal writer stopped");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GrowthConfig;
    use crate::events::RecordingSink;
    use crate::games::types::{Multiplier, RoundPhase};
    use crate::price::FixedPriceSource;
    use crate::storage::MemoryStore;

    const BTC: f64 = 60_000.0;

    struct Harness {
        engine: Arc<CrashEngine>,
        store: Arc<MemoryStore>,
        prices: Arc<FixedPriceSource>,
        events: Arc<RecordingSink>,
    }

    /// Every round uses `seed`; step 5 reaches 1.50 at tick 10
    fn harness(seed: &'static str) -> Harness {
        harness_on(seed, Arc::new(MemoryStore::new()))
    }

    /// A fresh engine over an existing store, as after a restart
    fn harness_on(seed: &'static str, store: Arc<MemoryStore>) -> Harness {
        let mut config = EngineConfig::testing();
        config.round.growth = GrowthConfig::Linear { step_hundredths: 5 };

        let prices = Arc::new(FixedPriceSource::new(BTC, 3_000.0));
        let events = Arc::new(RecordingSink::default());
        let oracle = PriceOracle::new(prices.clone(), config.price_ttl(), config.price_timeout());

        let engine = CrashEngine::with_seed_generator(
            config,
            store.clone(),
            oracle,
            events.clone(),
            Box::new(move || -> EngineResult<String> { Ok(seed.to_string()) }),
        );
        Harness {
            engine,
            store,
            prices,
            events,
        }
    }

    fn run_to(engine: &CrashEngine, target: Multiplier) {
        while let TickOutcome::Climbing(m) = engine.tick() {
            if m >= target {
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_round_lifecycle_events() {
        let h = harness("abc123");
        let round = h.engine.start_new_round().await.unwrap();
        assert_eq!(round.round_id, 1);
        assert_eq!(round.phase, RoundPhase::Betting);

        assert!(matches!(
            h.engine.start_new_round().await,
            Err(EngineError::RoundInProgress { round_id: 1 })
        ));

        h.engine.begin_running().unwrap();
        while h.engine.tick() != TickOutcome::Idle {}

        let record = h.engine.settle_round().unwrap();
        assert_eq!(record.crash_point, Multiplier::from_hundredths(1_600));
        assert_eq!(record.phase, RoundPhase::Settled);
        assert!(h.engine.get_active_round().is_none());

        let names = h.events.names();
        assert_eq!(names[0], "betting_phase_start");
        assert_eq!(names[1], "round_start");
        assert_eq!(names.last(), Some(&"round_crash"));

        match h.events.events().last() {
            Some(GameEvent::RoundCrash { seed, crash_point, .. }) => {
                assert_eq!(seed, "abc123");
                assert_eq!(*crash_point, Multiplier::from_hundredths(1_600));
            }
            other => panic!("Expected round_crash, got {:?}", other),
        }

        // The commitment goes out at round start, never the seed
        match &h.events.events()[1] {
            GameEvent::RoundStart { seed_hash, .. } => assert_eq!(seed_hash, &fairness::commit("abc123")),
            other => panic!("Expected round_start, got {:?}", other),
        }

        let next = h.engine.start_new_round().await.unwrap();
        assert_eq!(next.round_id, 2);
        assert_eq!(next.current_multiplier, Multiplier::ONE);
    }

    #[tokio::test]
    async fn test_cashout_scenario_at_one_fifty() {
        // seed-374 crashes round 1 at 2.10
        let h = harness("seed-374");
        let player = h.engine.register_player("Alice").await.unwrap();
        h.engine.start_new_round().await.unwrap();
        h.engine
            .place_bet(&player.player_id, 100.0, Currency::Btc)
            .await
            .unwrap();
        assert_eq!(h.engine.balance(&player.player_id).unwrap(), 900.0);

        h.engine.begin_running().unwrap();
        run_to(&h.engine, Multiplier::from_hundredths(150));

        let settlement = h
            .engine
            .process_cashout(&player.player_id, Some(1))
            .await
            .unwrap();
        assert_eq!(settlement.cashout_multiplier, Multiplier::from_hundredths(150));
        assert!((settlement.payout_usd - 150.0).abs() < 1e-9);
        assert!(h.events.names().contains(&"player_cashed_out"));

        assert!(matches!(
            h.engine.process_cashout(&player.player_id, None).await,
            Err(EngineError::AlreadyCashedOut { .. })
        ));
        assert!((h.engine.balance(&player.player_id).unwrap() - 1_050.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cashout_after_crash_tick_is_too_late() {
        let h = harness("seed-374");
        let player = h.engine.register_player("Alice").await.unwrap();
        h.engine.start_new_round().await.unwrap();
        h.engine
            .place_bet(&player.player_id, 100.0, Currency::Eth)
            .await
            .unwrap();

        h.engine.begin_running().unwrap();
        let mut ticks = 0;
        loop {
            ticks += 1;
            if let TickOutcome::Crashed(point) = h.engine.tick() {
                assert_eq!(point, Multiplier::from_hundredths(210));
                break;
            }
        }
        assert_eq!(ticks, 22);

        assert!(matches!(
            h.engine.process_cashout(&player.player_id, Some(1)).await,
            Err(EngineError::TooLate { round_id: 1 })
        ));
        assert_eq!(h.engine.balance(&player.player_id).unwrap(), 900.0);

        h.engine.settle_round().unwrap();
        h.engine.start_new_round().await.unwrap();
        // Cashing out of a finished round while a newer one is open
        assert!(matches!(
            h.engine.process_cashout(&player.player_id, Some(1)).await,
            Err(EngineError::TooLate { round_id: 1 })
        ));
    }

    #[tokio::test]
    async fn test_place_bet_error_precedence() {
        let h = harness("abc123");
        let player = h.engine.register_player("Alice").await.unwrap();

        assert_eq!(
            h.engine.place_bet(&player.player_id, 10.0, Currency::Btc).await,
            Err(EngineError::NoActiveRound)
        );

        h.engine.start_new_round().await.unwrap();
        assert!(matches!(
            h.engine.place_bet(&player.player_id, 0.0, Currency::Btc).await,
            Err(EngineError::InvalidAmount(_))
        ));
        assert!(matches!(
            h.engine.place_bet("nobody", 10.0, Currency::Btc).await,
            Err(EngineError::PlayerNotFound(_))
        ));
        assert!(matches!(
            h.engine.place_bet(&player.player_id, 5_000.0, Currency::Btc).await,
            Err(EngineError::InsufficientFunds { .. })
        ));
        assert_eq!(h.engine.balance(&player.player_id).unwrap(), 1_000.0);

        h.engine.begin_running().unwrap();
        assert!(matches!(
            h.engine.place_bet(&player.player_id, 10.0, Currency::Btc).await,
            Err(EngineError::RoundClosed { round_id: 1 })
        ));
        assert_eq!(h.engine.metrics().bets_rejected.load(Ordering::Relaxed), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_price_is_accepted_and_missing_price_is_not() {
        let h = harness("abc123");
        let player = h.engine.register_player("Alice").await.unwrap();
        h.engine.start_new_round().await.unwrap();

        // Warm the BTC cache, then take the upstream down past the TTL
        h.engine.oracle.get_price(Currency::Btc).await.unwrap();
        h.prices.set_offline(true);
        tokio::time::advance(Duration::from_secs(60)).await;

        let bet = h
            .engine
            .place_bet(&player.player_id, 60.0, Currency::Btc)
            .await
            .unwrap();
        assert_eq!(bet.price_at_bet, BTC);
        assert_eq!(bet.stake_crypto, 0.001);

        let other = h.engine.register_player("Bob").await.unwrap();
        assert_eq!(
            h.engine.place_bet(&other.player_id, 10.0, Currency::Eth).await,
            Err(EngineError::PriceUnavailable("ETH".to_string()))
        );
        assert_eq!(h.engine.balance(&other.player_id).unwrap(), 1_000.0);
    }

    #[tokio::test]
    async fn test_round_creation_failure_leaves_no_active_round() {
        let h = harness("abc123");
        h.store.set_available(false);

        assert!(matches!(
            h.engine.start_new_round().await,
            Err(EngineError::PersistenceFailure(_))
        ));
        assert!(h.engine.get_active_round().is_none());

        let player = h.engine.register_player("Alice").await.unwrap();
        assert_eq!(
            h.engine.place_bet(&player.player_id, 10.0, Currency::Btc).await,
            Err(EngineError::NoActiveRound)
        );
        assert_eq!(
            h.engine.process_cashout(&player.player_id, None).await,
            Err(EngineError::NoActiveRound)
        );

        h.store.set_available(true);
        assert_eq!(h.engine.start_new_round().await.unwrap().round_id, 1);
        assert_eq!(
            h.engine.metrics().round_creation_failures.load(Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn test_seed_failure_aborts_creation() {
        let store = Arc::new(MemoryStore::new());
        let config = EngineConfig::testing();
        let oracle = PriceOracle::from_config(&config);
        let engine = CrashEngine::with_seed_generator(
            config,
            store,
            oracle,
            Arc::new(crate::events::NullSink),
            Box::new(|| -> EngineResult<String> {
                Err(EngineError::Fairness("entropy exhausted".to_string()))
            }),
        );

        assert!(matches!(
            engine.start_new_round().await,
            Err(EngineError::Fairness(_))
        ));
        assert!(engine.latest_round().is_none());
    }

    #[tokio::test]
    async fn test_round_ids_continue_from_store() {
        let h = harness("abc123");
        let mut record = RoundCell::new(41, "old".to_string()).unwrap().to_record();
        record.phase = RoundPhase::Settled;
        h.store.save_round(&record).await.unwrap();

        h.engine.restore().await.unwrap();
        assert_eq!(h.engine.start_new_round().await.unwrap().round_id, 42);
    }

    #[tokio::test]
    async fn test_verify_finished_round() {
        let h = harness("abc123");
        h.engine.start_new_round().await.unwrap();
        assert!(matches!(
            h.engine.verify_round(1).await,
            Err(EngineError::RoundInProgress { round_id: 1 })
        ));

        h.engine.begin_running().unwrap();
        while h.engine.tick() != TickOutcome::Idle {}
        let record = h.engine.settle_round().unwrap();
        h.engine.persist_round(&record).await.unwrap();

        let verification = h.engine.verify_round(1).await.unwrap();
        assert!(verification.is_valid());
        assert_eq!(verification.computed_crash_point.to_string(), "16.00");
        assert_eq!(
            h.engine.round_record(99).await,
            Err(EngineError::RoundNotFound(99))
        );
    }

    #[tokio::test]
    async fn test_ledger_entries_reach_the_store() {
        let h = harness("abc123");
        let player = h.engine.register_player("Alice").await.unwrap();
        h.engine.start_new_round().await.unwrap();
        h.engine
            .place_bet(&player.player_id, 25.0, Currency::Btc)
            .await
            .unwrap();

        let reference = crate::games::types::TransactionRecord::reference_for(
            crate::games::types::TransactionKind::Bet,
            1,
            &player.player_id,
        );

        let mut stored = None;
        for _ in 0..100 {
            stored = h.store.load_transaction(&reference).await.unwrap();
            if stored.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(stored.unwrap().usd_amount, -25.0);

        let players = h.store.load_players().await.unwrap();
        assert_eq!(players[0].balance_usd, 975.0);
        let round = h.store.load_round(1).await.unwrap().unwrap();
        assert_eq!(round.bets.len(), 1);
        assert_eq!(round.bets[0].stake_usd, 25.0);
    }

    async fn wait_for_stored_bets(store: &MemoryStore, round_id: u64, count: usize) {
        for _ in 0..100 {
            let stored = store.load_round(round_id).await.unwrap();
            if stored.map_or(0, |r| r.bets.len()) >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("round {} never stored {} bets", round_id, count);
    }

    #[tokio::test]
    async fn test_restart_mid_round_closes_and_reveals_it() {
        let h = harness("abc123");
        let player = h.engine.register_player("Alice").await.unwrap();
        h.engine.start_new_round().await.unwrap();
        h.engine
            .place_bet(&player.player_id, 100.0, Currency::Btc)
            .await
            .unwrap();
        h.engine.begin_running().unwrap();
        assert!(matches!(h.engine.tick(), TickOutcome::Climbing(_)));
        wait_for_stored_bets(&h.store, 1, 1).await;
        let store = h.store.clone();
        drop(h);

        let restarted = harness_on("abc123", store.clone());
        assert_eq!(restarted.engine.restore().await.unwrap(), 1);
        assert_eq!(restarted.engine.balance(&player.player_id).unwrap(), 900.0);

        // the debit and the bet were stored together
        let stored = store.load_round(1).await.unwrap().unwrap();
        assert_eq!(stored.phase, RoundPhase::Settled);
        assert!(stored.end_time.is_some());
        assert_eq!(stored.bets.len(), 1);
        assert!(!stored.bets[0].is_cashed_out());
        assert!(store.unfinished_rounds().await.unwrap().is_empty());

        assert_eq!(restarted.engine.start_new_round().await.unwrap().round_id, 2);
        let verification = restarted.engine.verify_round(1).await.unwrap();
        assert!(verification.is_valid());
        assert_eq!(verification.seed, "abc123");
    }

    #[tokio::test]
    async fn test_restore_closes_every_open_round() {
        let h = harness("abc123");
        for round_id in [3, 5] {
            let record = RoundCell::new(round_id, format!("seed-{}", round_id))
                .unwrap()
                .to_record();
            h.store.save_round(&record).await.unwrap();
        }
        let mut finished = RoundCell::new(4, "seed-4".to_string()).unwrap().to_record();
        finished.phase = RoundPhase::Settled;
        h.store.save_round(&finished).await.unwrap();

        h.engine.restore().await.unwrap();
        for round_id in [3, 5] {
            assert!(h.engine.verify_round(round_id).await.unwrap().is_valid());
        }
        assert_eq!(h.engine.start_new_round().await.unwrap().round_id, 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cashouts_settle_once() {
        let h = harness("abc123");
        let player = h.engine.register_player("Alice").await.unwrap();
        h.engine.start_new_round().await.unwrap();
        h.engine
            .place_bet(&player.player_id, 100.0, Currency::Btc)
            .await
            .unwrap();
        h.engine.begin_running().unwrap();
        run_to(&h.engine, Multiplier::from_hundredths(200));

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let engine = h.engine.clone();
                let player_id = player.player_id.clone();
                tokio::spawn(async move { engine.process_cashout(&player_id, None).await })
            })
            .collect();

        let mut successes = 0;
        let mut duplicates = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => successes += 1,
                Err(EngineError::AlreadyCashedOut { .. }) => duplicates += 1,
                Err(other) => panic!("Unexpected error {:?}", other),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(duplicates, 31);
        // initial - stake + payout
        assert!((h.engine.balance(&player.player_id).unwrap() - 1_100.0).abs() < 1e-9);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cashouts_racing_the_crash_never_exceed_it() {
        // seed-272 crashes round 1 at 3.00
        let h = harness("seed-272");
        let mut players = Vec::new();
        for i in 0..20 {
            players.push(h.engine.register_player(&format!("racer-{}", i)).await.unwrap());
        }
        h.engine.start_new_round().await.unwrap();
        for player in &players {
            h.engine
                .place_bet(&player.player_id, 10.0, Currency::Btc)
                .await
                .unwrap();
        }
        h.engine.begin_running().unwrap();

        let engine = h.engine.clone();
        let ticker = tokio::spawn(async move {
            while engine.tick() != TickOutcome::Idle {
                tokio::task::yield_now().await;
            }
        });

        let tasks: Vec<_> = players
            .iter()
            .map(|player| {
                let engine = h.engine.clone();
                let player_id = player.player_id.clone();
                tokio::spawn(async move { engine.process_cashout(&player_id, None).await })
            })
            .collect();

        for task in tasks {
            match task.await.unwrap() {
                Ok(settlement) => {
                    assert!(settlement.cashout_multiplier < Multiplier::from_hundredths(300))
                }
                Err(EngineError::TooLate { .. }) => {}
                Err(other) => panic!("Unexpected error {:?}", other),
            }
        }
        ticker.await.unwrap();

        for player in &players {
            let balance = h.engine.balance(&player.player_id).unwrap();
            assert!(balance >= 990.0 - 1e-9);
        }
    }
}
