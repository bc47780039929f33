//! Round model: shared types, growth curves, the per-round state machine and
//! the wallet ledger.

pub mod curve;
pub mod ledger;
pub mod round;
pub mod types;

pub use curve::{curve_from_config, ExponentialGrowth, GrowthCurve, LinearGrowth};
pub use ledger::Ledger;
pub use round::{RoundCell, RoundHeader, TickOutcome};
pub use types::*;
