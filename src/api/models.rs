//! API Data Models
//!
//! Request and response bodies. Field names on the wire are camelCase.

use crate::fairness::Verification;
use crate::games::types::{Bet, Currency, Multiplier, Player, Settlement};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub store: String,
}

#[derive(Debug, Deserialize)]
pub struct CreatePlayerRequest {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerResponse {
    pub player_id: String,
    pub name: String,
    pub balance_usd: f64,
}

impl From<Player> for PlayerResponse {
    fn from(player: Player) -> Self {
        Self {
            player_id: player.player_id,
            name: player.name,
            balance_usd: player.balance_usd,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub player_id: String,
    pub balance_usd: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetRequest {
    pub player_id: String,
    pub amount_usd: f64,
    pub currency: Currency,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetResponse {
    pub player_id: String,
    pub stake_usd: f64,
    pub stake_crypto: f64,
    pub currency: Currency,
    pub price_at_bet: f64,
    pub balance_usd: f64,
}

impl BetResponse {
    pub fn new(bet: Bet, balance_usd: f64) -> Self {
        Self {
            player_id: bet.player_id,
            stake_usd: bet.stake_usd,
            stake_crypto: bet.stake_crypto,
            currency: bet.currency,
            price_at_bet: bet.price_at_bet,
            balance_usd,
        }
    }
}

/// Cashout request shared by HTTP and the WebSocket `cashout` action
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashoutRequest {
    pub player_id: String,
    #[serde(default)]
    pub round_id: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashoutResponse {
    pub round_id: u64,
    pub player_id: String,
    pub cashout_multiplier: Multiplier,
    pub payout_crypto: f64,
    pub payout_usd: f64,
    pub currency: Currency,
    pub balance_usd: f64,
    pub reference: String,
}

impl From<Settlement> for CashoutResponse {
    fn from(settlement: Settlement) -> Self {
        Self {
            round_id: settlement.round_id,
            player_id: settlement.player_id,
            cashout_multiplier: settlement.cashout_multiplier,
            payout_crypto: settlement.payout_crypto,
            payout_usd: settlement.payout_usd,
            currency: settlement.currency,
            balance_usd: settlement.new_balance_usd,
            reference: settlement.reference,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    #[serde(flatten)]
    pub verification: Verification,
    pub valid: bool,
}

impl From<Verification> for VerifyResponse {
    fn from(verification: Verification) -> Self {
        let valid = verification.is_valid();
        Self { verification, valid }
    }
}
