//! Crash round engine
//!
//! Runs provably fair multiplier rounds: a committed seed fixes each round's
//! crash point, a single driver task moves rounds through betting, running
//! and crash, and the ledger settles bets and cashouts against USD wallets
//! with crypto prices from an upstream oracle.

pub mod api;
pub mod config;
pub mod driver;
pub mod engine;
pub mod errors;
pub mod events;
pub mod fairness;
pub mod games;
pub mod metrics;
pub mod price;
pub mod storage;

pub use config::{ConfigLoader, EngineConfig};
pub use driver::RoundDriver;
pub use engine::CrashEngine;
pub use errors::{EngineError, EngineResult};
pub use events::{BroadcastHub, EventSink, GameEvent};
pub use games::types::{Bet, Currency, Multiplier, Player, RoundPhase, RoundSnapshot, Settlement};
pub use price::PriceOracle;
pub use storage::{MemoryStore, RocksStore, RoundStore};
