//! The round aggregate.
//!
//! Header fields never change after creation. Everything mutable lives behind a
//! single mutex, which is the ordering point between driver ticks and player
//! cashouts: whichever takes the lock first wins.

use crate::errors::{EngineError, EngineResult};
use crate::fairness;
use crate::games::curve::GrowthCurve;
use crate::games::types::{Bet, Multiplier, RoundPhase, RoundRecord, RoundSnapshot};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Immutable part of a round
#[derive(Debug, Clone)]
pub struct RoundHeader {
    pub round_id: u64,
    pub seed: String,
    pub public_hash: String,
    pub crash_point: Multiplier,
    pub start_time: DateTime<Utc>,
}

/// Mutable part of a round; only reachable through [`RoundCell::lock`]
#[derive(Debug)]
pub struct RoundState {
    pub(crate) phase: RoundPhase,
    pub(crate) current_multiplier: Multiplier,
    pub(crate) tick: u64,
    pub(crate) bets: Vec<Bet>,
    /// player id -> position in `bets`
    pub(crate) bet_index: HashMap<String, usize>,
    pub(crate) end_time: Option<DateTime<Utc>>,
}

impl RoundState {
    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn current_multiplier(&self) -> Multiplier {
        self.current_multiplier
    }

    pub fn bet(&self, player_id: &str) -> Option<&Bet> {
        self.bet_index.get(player_id).map(|&i| &self.bets[i])
    }

    pub(crate) fn bet_mut(&mut self, player_id: &str) -> Option<&mut Bet> {
        match self.bet_index.get(player_id) {
            Some(&i) => self.bets.get_mut(i),
            None => None,
        }
    }

    pub(crate) fn push_bet(&mut self, bet: Bet) {
        self.bet_index.insert(bet.player_id.clone(), self.bets.len());
        self.bets.push(bet);
    }
}

/// What a single driver tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Climbing(Multiplier),
    Crashed(Multiplier),
    /// The round is not running
    Idle,
}

#[derive(Debug)]
pub struct RoundCell {
    header: RoundHeader,
    state: Mutex<RoundState>,
}

impl RoundCell {
    /// New round in the betting phase; the crash point is fixed here
    pub fn new(round_id: u64, seed: String) -> EngineResult<Self> {
        let crash_point = fairness::reveal(&seed, round_id)?;
        let public_hash = fairness::commit(&seed);

        Ok(Self {
            header: RoundHeader {
                round_id,
                seed,
                public_hash,
                crash_point,
                start_time: Utc::now(),
            },
            state: Mutex::new(RoundState {
                phase: RoundPhase::Betting,
                current_multiplier: Multiplier::ONE,
                tick: 0,
                bets: Vec::new(),
                bet_index: HashMap::new(),
                end_time: None,
            }),
        })
    }

    pub fn header(&self) -> &RoundHeader {
        &self.header
    }

    pub fn round_id(&self) -> u64 {
        self.header.round_id
    }

    /// A panic while holding the lock leaves the state consistent for our
    /// critical sections, so poisoning is ignored.
    pub fn lock(&self) -> MutexGuard<'_, RoundState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn phase(&self) -> RoundPhase {
        self.lock().phase
    }

    pub fn snapshot(&self) -> RoundSnapshot {
        let state = self.lock();
        let revealed = state.phase.is_finished();
        RoundSnapshot {
            round_id: self.header.round_id,
            phase: state.phase,
            public_hash: self.header.public_hash.clone(),
            current_multiplier: state.current_multiplier,
            bet_count: state.bets.len(),
            start_time: self.header.start_time,
            end_time: state.end_time,
            seed: revealed.then(|| self.header.seed.clone()),
            crash_point: revealed.then_some(self.header.crash_point),
        }
    }

    pub fn to_record(&self) -> RoundRecord {
        let state = self.lock();
        RoundRecord {
            round_id: self.header.round_id,
            seed: self.header.seed.clone(),
            public_hash: self.header.public_hash.clone(),
            crash_point: self.header.crash_point,
            phase: state.phase,
            bets: state.bets.clone(),
            start_time: self.header.start_time,
            end_time: state.end_time,
        }
    }

    /// Close betting and start the climb
    pub fn begin_running(&self) -> EngineResult<()> {
        let mut state = self.lock();
        if state.phase != RoundPhase::Betting {
            return Err(EngineError::RoundClosed {
                round_id: self.header.round_id,
            });
        }
        state.phase = RoundPhase::Running;
        state.current_multiplier = Multiplier::ONE;
        state.tick = 0;
        Ok(())
    }

    /// Advance one tick. The tick that reaches the crash point pins the
    /// multiplier to it and crashes the round in the same step.
    pub fn advance(&self, curve: &dyn GrowthCurve) -> TickOutcome {
        let mut state = self.lock();
        if state.phase != RoundPhase::Running {
            return TickOutcome::Idle;
        }

        state.tick += 1;
        let next = curve.multiplier_at(state.tick).max(state.current_multiplier);

        if next >= self.header.crash_point {
            state.current_multiplier = self.header.crash_point;
            state.phase = RoundPhase::Crashed;
            state.end_time = Some(Utc::now());
            TickOutcome::Crashed(self.header.crash_point)
        } else {
            state.current_multiplier = next;
            TickOutcome::Climbing(next)
        }
    }

    /// Close the books on a crashed round; returns the number of losing bets
    pub fn mark_settled(&self) -> EngineResult<usize> {
        let mut state = self.lock();
        match state.phase {
            RoundPhase::Crashed => {
                state.phase = RoundPhase::Settled;
                Ok(state.bets.iter().filter(|bet| !bet.is_cashed_out()).count())
            }
            RoundPhase::Settled => Ok(0),
            _ => Err(EngineError::RoundInProgress {
                round_id: self.header.round_id,
            }),
        }
    }
}
