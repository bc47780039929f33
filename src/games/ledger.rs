//! Wallets, bets and cashouts.
//!
//! Every balance change happens inside the round's state lock together with
//! the bet it belongs to, and produces a [`LedgerEntry`] for the journal.
//! Lock order is always round state, then wallet entry.

use crate::errors::{EngineError, EngineResult};
use crate::games::round::{RoundCell, RoundState};
use crate::games::types::{
    Bet, Currency, LedgerEntry, Player, RoundPhase, Settlement, TransactionKind, TransactionRecord,
};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

/// Players created by `--seed-demo-players`
pub const DEMO_PLAYERS: [(&str, f64); 3] = [
    ("PlayerOne", 1_000.0),
    ("PlayerTwo", 1_500.0),
    ("CaptainCrash", 500.0),
];

#[derive(Debug, Default)]
pub struct Ledger {
    players: DashMap<String, Player>,
    /// lowercase name -> player id
    names: DashMap<String, String>,
    /// reference -> record
    transactions: DashMap<String, TransactionRecord>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_player(&self, name: &str, initial_balance_usd: f64) -> EngineResult<Player> {
        let name = name.trim();
        if !(initial_balance_usd.is_finite() && initial_balance_usd >= 0.0) {
            return Err(EngineError::InvalidAmount(initial_balance_usd));
        }

        let player = match self.names.entry(name.to_lowercase()) {
            Entry::Occupied(_) => return Err(EngineError::PlayerNameTaken(name.to_string())),
            Entry::Vacant(slot) => {
                let player = Player {
                    player_id: Uuid::new_v4().to_string(),
                    name: name.to_string(),
                    balance_usd: initial_balance_usd,
                };
                slot.insert(player.player_id.clone());
                player
            }
        };

        self.players.insert(player.player_id.clone(), player.clone());
        info!(player_id = %player.player_id, name = %player.name, "Registered player");
        Ok(player)
    }

    /// Load a wallet from storage, replacing any in-memory copy
    pub fn restore_player(&self, player: Player) {
        self.names
            .insert(player.name.to_lowercase(), player.player_id.clone());
        self.players.insert(player.player_id.clone(), player);
    }

    pub fn get_player(&self, player_id: &str) -> EngineResult<Player> {
        self.players
            .get(player_id)
            .map(|p| p.clone())
            .ok_or_else(|| EngineError::PlayerNotFound(player_id.to_string()))
    }

    pub fn find_by_name(&self, name: &str) -> Option<Player> {
        let id = self.names.get(&name.trim().to_lowercase())?.clone();
        self.players.get(&id).map(|p| p.clone())
    }

    pub fn balance(&self, player_id: &str) -> EngineResult<f64> {
        self.get_player(player_id).map(|p| p.balance_usd)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Register the demo players that are not present yet
    pub fn seed_demo_players(&self) -> Vec<Player> {
        DEMO_PLAYERS
            .iter()
            .filter_map(|(name, balance)| self.register_player(name, *balance).ok())
            .collect()
    }

    pub fn transaction(&self, reference: &str) -> Option<TransactionRecord> {
        self.transactions.get(reference).map(|t| t.clone())
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    /// Cheap validation before the price lookup; `place_bet` repeats it under the lock
    pub fn precheck_bet(&self, round: &RoundCell, player_id: &str, amount_usd: f64) -> EngineResult<()> {
        let state = round.lock();
        self.validate_bet(round, &state, player_id, amount_usd)
    }

    fn validate_bet(
        &self,
        round: &RoundCell,
        state: &RoundState,
        player_id: &str,
        amount_usd: f64,
    ) -> EngineResult<()> {
        if state.phase() != RoundPhase::Betting {
            return Err(EngineError::RoundClosed {
                round_id: round.round_id(),
            });
        }

        let balance_usd = self.balance(player_id)?;
        if balance_usd < amount_usd {
            return Err(EngineError::InsufficientFunds {
                balance_usd,
                requested_usd: amount_usd,
            });
        }

        if state.bet(player_id).is_some() {
            return Err(EngineError::BetAlreadyPlaced {
                player_id: player_id.to_string(),
                round_id: round.round_id(),
            });
        }
        Ok(())
    }

    /// Debit the wallet and record the bet as one unit
    pub fn place_bet(
        &self,
        round: &RoundCell,
        player_id: &str,
        amount_usd: f64,
        currency: Currency,
        price_usd: f64,
    ) -> EngineResult<(Bet, LedgerEntry)> {
        if !(amount_usd.is_finite() && amount_usd > 0.0) {
            return Err(EngineError::InvalidAmount(amount_usd));
        }

        let mut state = round.lock();
        self.validate_bet(round, &state, player_id, amount_usd)?;

        let reference = TransactionRecord::reference_for(TransactionKind::Bet, round.round_id(), player_id);
        if self.transactions.contains_key(&reference) {
            return Err(EngineError::DuplicateTransaction(reference));
        }

        let mut wallet = self
            .players
            .get_mut(player_id)
            .ok_or_else(|| EngineError::PlayerNotFound(player_id.to_string()))?;

        let now = Utc::now();
        let stake_crypto = amount_usd / price_usd;
        let bet = Bet {
            player_id: player_id.to_string(),
            stake_usd: amount_usd,
            stake_crypto,
            currency,
            price_at_bet: price_usd,
            cashout_multiplier: None,
            payout_usd: 0.0,
            placed_at: now,
        };
        let transaction = TransactionRecord {
            reference: reference.clone(),
            player_id: player_id.to_string(),
            round_id: round.round_id(),
            kind: TransactionKind::Bet,
            usd_amount: -amount_usd,
            crypto_amount: stake_crypto,
            currency,
            price_at_time: price_usd,
            timestamp: now,
        };

        wallet.balance_usd -= amount_usd;
        state.push_bet(bet.clone());
        self.transactions.insert(reference, transaction.clone());

        let entry = LedgerEntry {
            wallet: wallet.clone(),
            transaction,
            bet: bet.clone(),
        };
        debug!(
            round_id = round.round_id(),
            player_id,
            amount_usd,
            %currency,
            "Bet accepted"
        );
        Ok((bet, entry))
    }

    fn check_cashout<'a>(
        round: &RoundCell,
        state: &'a RoundState,
        player_id: &str,
    ) -> EngineResult<&'a Bet> {
        let round_id = round.round_id();
        match state.phase() {
            RoundPhase::Betting => return Err(EngineError::RoundClosed { round_id }),
            RoundPhase::Crashed | RoundPhase::Settled => return Err(EngineError::TooLate { round_id }),
            RoundPhase::Running => {}
        }

        let bet = state.bet(player_id).ok_or_else(|| EngineError::BetNotFound {
            player_id: player_id.to_string(),
            round_id,
        })?;

        if bet.is_cashed_out() {
            return Err(EngineError::AlreadyCashedOut {
                player_id: player_id.to_string(),
                round_id,
            });
        }

        if state.current_multiplier() >= round.header().crash_point {
            return Err(EngineError::TooLate { round_id });
        }
        Ok(bet)
    }

    /// Currency of the player's open bet, for the price lookup ahead of `process_cashout`
    pub fn cashout_currency(&self, round: &RoundCell, player_id: &str) -> EngineResult<Currency> {
        let state = round.lock();
        Self::check_cashout(round, &state, player_id).map(|bet| bet.currency)
    }

    /// Lock in the current multiplier and credit the payout as one unit
    pub fn process_cashout(
        &self,
        round: &RoundCell,
        player_id: &str,
        price_usd: f64,
    ) -> EngineResult<(Settlement, LedgerEntry)> {
        let round_id = round.round_id();
        let mut state = round.lock();
        let multiplier = state.current_multiplier();
        let (stake_crypto, currency) = {
            let bet = Self::check_cashout(round, &state, player_id)?;
            (bet.stake_crypto, bet.currency)
        };

        let reference = TransactionRecord::reference_for(TransactionKind::Cashout, round_id, player_id);
        if self.transactions.contains_key(&reference) {
            return Err(EngineError::DuplicateTransaction(reference));
        }

        let mut wallet = self
            .players
            .get_mut(player_id)
            .ok_or_else(|| EngineError::PlayerNotFound(player_id.to_string()))?;

        let payout_crypto = stake_crypto * multiplier.as_f64();
        let payout_usd = payout_crypto * price_usd;

        let bet = match state.bet_mut(player_id) {
            Some(bet) => {
                bet.cashout_multiplier = Some(multiplier);
                bet.payout_usd = payout_usd;
                bet.clone()
            }
            None => {
                return Err(EngineError::BetNotFound {
                    player_id: player_id.to_string(),
                    round_id,
                })
            }
        };
        wallet.balance_usd += payout_usd;

        let transaction = TransactionRecord {
            reference: reference.clone(),
            player_id: player_id.to_string(),
            round_id,
            kind: TransactionKind::Cashout,
            usd_amount: payout_usd,
            crypto_amount: payout_crypto,
            currency,
            price_at_time: price_usd,
            timestamp: Utc::now(),
        };
        self.transactions.insert(reference.clone(), transaction.clone());

        let settlement = Settlement {
            round_id,
            player_id: player_id.to_string(),
            username: wallet.name.clone(),
            cashout_multiplier: multiplier,
            payout_crypto,
            payout_usd,
            new_balance_usd: wallet.balance_usd,
            currency,
            reference,
        };
        let entry = LedgerEntry {
            wallet: wallet.clone(),
            transaction,
            bet,
        };

        info!(round_id, player_id, multiplier = %multiplier, payout_usd, "Cashout accepted");
        Ok((settlement, entry))
    }
}
