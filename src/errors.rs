//! Error types for the crash round engine
//!
//! Every ledger and round operation returns [`EngineError`]; lower layers carry
//! their own error enums and convert into it at the boundary.

use std::time::Duration;

/// Root error type for engine operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// Betting window is closed, or the round is not accepting this action
    #[error("Betting is closed for round {round_id}")]
    RoundClosed { round_id: u64 },

    #[error("No active round")]
    NoActiveRound,

    #[error("Player not found: {0}")]
    PlayerNotFound(String),

    #[error("Insufficient funds: balance {balance_usd:.2} USD, requested {requested_usd:.2} USD")]
    InsufficientFunds { balance_usd: f64, requested_usd: f64 },

    #[error("Price unavailable for {0}")]
    PriceUnavailable(String),

    #[error("Round not found: {0}")]
    RoundNotFound(u64),

    #[error("No bet found for player {player_id} in round {round_id}")]
    BetNotFound { player_id: String, round_id: u64 },

    #[error("Player {player_id} already cashed out of round {round_id}")]
    AlreadyCashedOut { player_id: String, round_id: u64 },

    #[error("Too late: round {round_id} crashed")]
    TooLate { round_id: u64 },

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Round {round_id} is still in progress")]
    RoundInProgress { round_id: u64 },

    #[error("Player {player_id} already has a bet in round {round_id}")]
    BetAlreadyPlaced { player_id: String, round_id: u64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(f64),

    #[error("Player name already taken: {0}")]
    PlayerNameTaken(String),

    #[error("Fairness generation failed: {0}")]
    Fairness(String),

    #[error("Duplicate transaction reference: {0}")]
    DuplicateTransaction(String),
}

impl EngineError {
    /// Stable machine-readable code, used in API error bodies and socket replies
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::RoundClosed { .. } => "ROUND_CLOSED",
            EngineError::NoActiveRound => "NO_ACTIVE_ROUND",
            EngineError::PlayerNotFound(_) => "PLAYER_NOT_FOUND",
            EngineError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            EngineError::PriceUnavailable(_) => "PRICE_UNAVAILABLE",
            EngineError::RoundNotFound(_) => "ROUND_NOT_FOUND",
            EngineError::BetNotFound { .. } => "BET_NOT_FOUND",
            EngineError::AlreadyCashedOut { .. } => "ALREADY_CASHED_OUT",
            EngineError::TooLate { .. } => "TOO_LATE",
            EngineError::PersistenceFailure(_) => "PERSISTENCE_FAILURE",
            EngineError::RoundInProgress { .. } => "ROUND_IN_PROGRESS",
            EngineError::BetAlreadyPlaced { .. } => "BET_ALREADY_PLACED",
            EngineError::InvalidAmount(_) => "INVALID_AMOUNT",
            EngineError::PlayerNameTaken(_) => "PLAYER_NAME_TAKEN",
            EngineError::Fairness(_) => "FAIRNESS_FAILURE",
            EngineError::DuplicateTransaction(_) => "DUPLICATE_TRANSACTION",
        }
    }
}

/// Storage layer errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to encode record: {0}")]
    Encode(String),

    #[error("Failed to decode record: {0}")]
    Decode(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Round {0} is not stored")]
    MissingRound(u64),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::PersistenceFailure(e.to_string())
    }
}

/// Upstream price lookup errors
#[derive(Debug, thiserror::Error)]
pub enum PriceError {
    #[error("Price request failed: {0}")]
    Http(String),

    #[error("Price request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed price response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for PriceError {
    fn from(e: reqwest::Error) -> Self {
        PriceError::Http(e.to_string())
    }
}

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to save configuration: {0}")]
    Save(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, value: impl ToString, reason: &str) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

// Convenience type alias for Results
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::InsufficientFunds {
            balance_usd: 10.0,
            requested_usd: 25.5,
        };
        assert!(err.to_string().contains("10.00"));
        assert!(err.to_string().contains("25.50"));
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(EngineError::NoActiveRound.code(), "NO_ACTIVE_ROUND");
        assert_eq!(EngineError::TooLate { round_id: 3 }.code(), "TOO_LATE");
        assert_eq!(
            EngineError::AlreadyCashedOut {
                player_id: "p".to_string(),
                round_id: 1
            }
            .code(),
            "ALREADY_CASHED_OUT"
        );
    }

    #[test]
    fn test_store_error_conversion() {
        let err: EngineError = StoreError::Timeout(Duration::from_millis(250)).into();
        match err {
            EngineError::PersistenceFailure(msg) => assert!(msg.contains("timed out")),
            other => panic!("Expected persistence failure, got {:?}", other),
        }
    }

    #[test]
    fn test_config_error_details() {
        let err = ConfigError::invalid("round.tick_interval_ms", 0, "must be > 0");
        assert!(err.to_string().contains("round.tick_interval_ms"));
        assert!(err.to_string().contains("must be > 0"));
    }
}
