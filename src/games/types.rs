use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Fixed-point multiplier in hundredths (`Multiplier(210)` is 2.10x)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Multiplier(u64);

impl Multiplier {
    pub const ONE: Multiplier = Multiplier(100);

    pub const fn from_hundredths(hundredths: u64) -> Self {
        Self(hundredths)
    }

    pub const fn hundredths(self) -> u64 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl Default for Multiplier {
    fn default() -> Self {
        Self::ONE
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for Multiplier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

impl<'de> Deserialize<'de> for Multiplier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        if !value.is_finite() || value < 0.0 {
            return Err(serde::de::Error::custom(format!("invalid multiplier {}", value)));
        }
        Ok(Self((value * 100.0).round() as u64))
    }
}

/// Round lifecycle phase
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoundPhase {
    Betting,
    Running,
    Crashed,
    Settled,
}

impl RoundPhase {
    /// Betting and Running rounds count as the active round
    pub fn is_active(self) -> bool {
        matches!(self, RoundPhase::Betting | RoundPhase::Running)
    }

    pub fn is_finished(self) -> bool {
        matches!(self, RoundPhase::Crashed | RoundPhase::Settled)
    }
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundPhase::Betting => write!(f, "betting"),
            RoundPhase::Running => write!(f, "running"),
            RoundPhase::Crashed => write!(f, "crashed"),
            RoundPhase::Settled => write!(f, "settled"),
        }
    }
}

/// Supported stake currencies
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Currency {
    #[serde(rename = "BTC", alias = "btc")]
    Btc,
    #[serde(rename = "ETH", alias = "eth")]
    Eth,
}

impl Currency {
    /// Upstream coin identifier used for price lookups
    pub fn coin_id(self) -> &'static str {
        match self {
            Currency::Btc => "bitcoin",
            Currency::Eth => "ethereum",
        }
    }

    pub fn all_supported() -> [Currency; 2] {
        [Currency::Btc, Currency::Eth]
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Currency::Btc => write!(f, "BTC"),
            Currency::Eth => write!(f, "ETH"),
        }
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "btc" | "bitcoin" => Ok(Currency::Btc),
            "eth" | "ethereum" => Ok(Currency::Eth),
            other => Err(format!("unsupported currency: {}", other)),
        }
    }
}

/// A player's wallet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Player {
    pub player_id: String,
    pub name: String,
    pub balance_usd: f64,
}

/// A stake placed in one round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bet {
    pub player_id: String,
    pub stake_usd: f64,
    pub stake_crypto: f64,
    pub currency: Currency,
    /// USD price of one unit of `currency` when the bet was placed
    pub price_at_bet: f64,
    /// Set once, by the ledger, when the player cashes out
    pub cashout_multiplier: Option<Multiplier>,
    #[serde(default)]
    pub payout_usd: f64,
    pub placed_at: DateTime<Utc>,
}

impl Bet {
    pub fn is_cashed_out(&self) -> bool {
        self.cashout_multiplier.is_some()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Bet,
    Cashout,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Bet => write!(f, "bet"),
            TransactionKind::Cashout => write!(f, "cashout"),
        }
    }
}

/// Append-only audit entry for every balance change
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionRecord {
    pub reference: String,
    pub player_id: String,
    pub round_id: u64,
    pub kind: TransactionKind,
    /// Negative for stakes, positive for payouts
    pub usd_amount: f64,
    pub crypto_amount: f64,
    pub currency: Currency,
    pub price_at_time: f64,
    pub timestamp: DateTime<Utc>,
}

impl TransactionRecord {
    /// The same logical event always maps to the same reference
    pub fn reference_for(kind: TransactionKind, round_id: u64, player_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}:{}:{}", kind, round_id, player_id).as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Wallet state, the transaction that produced it and the bet it touched,
/// written as one unit. The round id is `transaction.round_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub wallet: Player,
    pub transaction: TransactionRecord,
    pub bet: Bet,
}

impl LedgerEntry {
    pub fn round_id(&self) -> u64 {
        self.transaction.round_id
    }
}

/// Result of an accepted cashout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settlement {
    pub round_id: u64,
    pub player_id: String,
    pub username: String,
    pub cashout_multiplier: Multiplier,
    pub payout_crypto: f64,
    pub payout_usd: f64,
    pub new_balance_usd: f64,
    pub currency: Currency,
    pub reference: String,
}

/// Public view of a round; the seed and crash point stay hidden until the crash
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundSnapshot {
    pub round_id: u64,
    pub phase: RoundPhase,
    pub public_hash: String,
    pub current_multiplier: Multiplier,
    pub bet_count: usize,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crash_point: Option<Multiplier>,
}

/// Persisted form of a round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundRecord {
    pub round_id: u64,
    pub seed: String,
    pub public_hash: String,
    pub crash_point: Multiplier,
    pub phase: RoundPhase,
    pub bets: Vec<Bet>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl RoundRecord {
    /// Replace the player's bet, or append it when the player has none yet
    pub fn upsert_bet(&mut self, bet: Bet) {
        match self.bets.iter_mut().find(|b| b.player_id == bet.player_id) {
            Some(existing) => *existing = bet,
            None => self.bets.push(bet),
        }
    }

    /// Close a round the process never finished. Open bets are lost; their
    /// stakes were debited when they were placed.
    pub fn close_abandoned(&mut self, now: DateTime<Utc>) -> usize {
        self.phase = RoundPhase::Settled;
        self.end_time.get_or_insert(now);
        self.bets.iter().filter(|bet| !bet.is_cashed_out()).count()
    }

    /// Strip secrets from rounds that have not crashed yet
    pub fn public_view(&self) -> RoundSnapshot {
        let revealed = self.phase.is_finished();
        RoundSnapshot {
            round_id: self.round_id,
            phase: self.phase,
            public_hash: self.public_hash.clone(),
            current_multiplier: if revealed { self.crash_point } else { Multiplier::ONE },
            bet_count: self.bets.len(),
            start_time: self.start_time,
            end_time: self.end_time,
            seed: revealed.then(|| self.seed.clone()),
            crash_point: revealed.then_some(self.crash_point),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiplier_display() {
        assert_eq!(Multiplier::from_hundredths(210).to_string(), "2.10");
        assert_eq!(Multiplier::ONE.to_string(), "1.00");
        assert_eq!(Multiplier::from_hundredths(1_605).to_string(), "16.05");
    }

    #[test]
    fn test_multiplier_json_is_numeric() {
        let json = serde_json::to_string(&Multiplier::from_hundredths(150)).unwrap();
        assert_eq!(json, "1.5");

        let parsed: Multiplier = serde_json::from_str("2.1").unwrap();
        assert_eq!(parsed, Multiplier::from_hundredths(210));
    }

    #[test]
    fn test_currency_parsing() {
        assert_eq!("btc".parse::<Currency>().unwrap(), Currency::Btc);
        assert_eq!("ETH".parse::<Currency>().unwrap(), Currency::Eth);
        assert!("doge".parse::<Currency>().is_err());

        let parsed: Currency = serde_json::from_str("\"eth\"").unwrap();
        assert_eq!(parsed, Currency::Eth);
        assert_eq!(serde_json::to_string(&Currency::Btc).unwrap(), "\"BTC\"");
    }

    #[test]
    fn test_transaction_reference_is_stable() {
        let a = TransactionRecord::reference_for(TransactionKind::Bet, 7, "player-1");
        let b = TransactionRecord::reference_for(TransactionKind::Bet, 7, "player-1");
        let c = TransactionRecord::reference_for(TransactionKind::Cashout, 7, "player-1");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_public_view_hides_secrets_until_crash() {
        let mut record = RoundRecord {
            round_id: 3,
            seed: "secret".to_string(),
            public_hash: "hash".to_string(),
            crash_point: Multiplier::from_hundredths(250),
            phase: RoundPhase::Running,
            bets: Vec::new(),
            start_time: Utc::now(),
            end_time: None,
        };

        let view = record.public_view();
        assert!(view.seed.is_none());
        assert!(view.crash_point.is_none());

        record.phase = RoundPhase::Settled;
        let view = record.public_view();
        assert_eq!(view.seed.as_deref(), Some("secret"));
        assert_eq!(view.crash_point, Some(Multiplier::from_hundredths(250)));
    }

    fn bet(player_id: &str, cashed_out: bool) -> Bet {
        Bet {
            player_id: player_id.to_string(),
            stake_usd: 10.0,
            stake_crypto: 0.001,
            currency: Currency::Btc,
            price_at_bet: 10_000.0,
            cashout_multiplier: cashed_out.then_some(Multiplier::from_hundredths(130)),
            payout_usd: if cashed_out { 13.0 } else { 0.0 },
            placed_at: Utc::now(),
        }
    }

    #[test]
    fn test_upsert_bet_and_close_abandoned() {
        let mut record = RoundRecord {
            round_id: 4,
            seed: "secret".to_string(),
            public_hash: "hash".to_string(),
            crash_point: Multiplier::from_hundredths(300),
            phase: RoundPhase::Running,
            bets: Vec::new(),
            start_time: Utc::now(),
            end_time: None,
        };

        record.upsert_bet(bet("a", false));
        record.upsert_bet(bet("b", false));
        record.upsert_bet(bet("a", true));
        assert_eq!(record.bets.len(), 2);
        assert!(record.bets[0].is_cashed_out());

        let lost = record.close_abandoned(Utc::now());
        assert_eq!(lost, 1);
        assert_eq!(record.phase, RoundPhase::Settled);
        assert!(record.end_time.is_some());
        assert_eq!(record.public_view().seed.as_deref(), Some("secret"));
    }
}
