//! Engine counters in Prometheus text exposition format

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug)]
pub struct EngineMetrics {
    started_at: Instant,
    pub rounds_started: AtomicU64,
    pub rounds_crashed: AtomicU64,
    pub round_creation_failures: AtomicU64,
    pub persistence_failures: AtomicU64,
    pub bets_accepted: AtomicU64,
    pub bets_rejected: AtomicU64,
    pub cashouts_accepted: AtomicU64,
    pub cashouts_rejected: AtomicU64,
    pub journal_failures: AtomicU64,
    /// Last crash point, in hundredths
    pub last_crash_point: AtomicU64,
    /// Stored as cents to stay atomic
    wagered_cents: AtomicU64,
    paid_out_cents: AtomicU64,
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            rounds_started: AtomicU64::new(0),
            rounds_crashed: AtomicU64::new(0),
            round_creation_failures: AtomicU64::new(0),
            persistence_failures: AtomicU64::new(0),
            bets_accepted: AtomicU64::new(0),
            bets_rejected: AtomicU64::new(0),
            cashouts_accepted: AtomicU64::new(0),
            cashouts_rejected: AtomicU64::new(0),
            journal_failures: AtomicU64::new(0),
            last_crash_point: AtomicU64::new(0),
            wagered_cents: AtomicU64::new(0),
            paid_out_cents: AtomicU64::new(0),
        }
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bet(&self, stake_usd: f64) {
        Self::incr(&self.bets_accepted);
        self.wagered_cents
            .fetch_add(to_cents(stake_usd), Ordering::Relaxed);
    }

    pub fn record_cashout(&self, payout_usd: f64) {
        Self::incr(&self.cashouts_accepted);
        self.paid_out_cents
            .fetch_add(to_cents(payout_usd), Ordering::Relaxed);
    }

    pub fn record_crash(&self, crash_hundredths: u64) {
        Self::incr(&self.rounds_crashed);
        self.last_crash_point
            .store(crash_hundredths, Ordering::Relaxed);
    }

    pub fn wagered_usd(&self) -> f64 {
        self.wagered_cents.load(Ordering::Relaxed) as f64 / 100.0
    }

    pub fn paid_out_usd(&self) -> f64 {
        self.paid_out_cents.load(Ordering::Relaxed) as f64 / 100.0
    }

    pub fn to_prometheus_format(&self) -> String {
        let counters = [
            ("crash_rounds_started_total", "Rounds opened for betting", &self.rounds_started),
            ("crash_rounds_crashed_total", "Rounds that reached their crash point", &self.rounds_crashed),
            (
                "crash_round_creation_failures_total",
                "Failed round creation attempts",
                &self.round_creation_failures,
            ),
            (
                "crash_persistence_failures_total",
                "Round records that could not be stored",
                &self.persistence_failures,
            ),
            ("crash_bets_accepted_total", "Accepted bets", &self.bets_accepted),
            ("crash_bets_rejected_total", "Rejected bets", &self.bets_rejected),
            ("crash_cashouts_accepted_total", "Accepted cashouts", &self.cashouts_accepted),
            ("crash_cashouts_rejected_total", "Rejected cashouts", &self.cashouts_rejected),
            (
                "crash_journal_failures_total",
                "Ledger entries the store rejected",
                &self.journal_failures,
            ),
        ];

        let mut output = String::new();
        for (name, help, value) in counters {
            output.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {}\n\n",
                value.load(Ordering::Relaxed)
            ));
        }

        output.push_str(&format!(
            "# HELP crash_wagered_usd_total Total USD staked\n\
             # TYPE crash_wagered_usd_total counter\n\
             crash_wagered_usd_total {:.2}\n\n",
            self.wagered_usd()
        ));
        output.push_str(&format!(
            "# HELP crash_paid_out_usd_total Total USD paid out\n\
             # TYPE crash_paid_out_usd_total counter\n\
             crash_paid_out_usd_total {:.2}\n\n",
            self.paid_out_usd()
        ));
        output.push_str(&format!(
            "# HELP crash_last_crash_point Most recent crash multiplier\n\
             # TYPE crash_last_crash_point gauge\n\
             crash_last_crash_point {:.2}\n\n",
            self.last_crash_point.load(Ordering::Relaxed) as f64 / 100.0
        ));
        output.push_str(&format!(
            "# HELP crash_uptime_seconds Seconds since the engine started\n\
             # TYPE crash_uptime_seconds gauge\n\
             crash_uptime_seconds {}\n",
            self.started_at.elapsed().as_secs()
        ));

        output
    }
}

fn to_cents(usd: f64) -> u64 {
    if usd.is_finite() && usd > 0.0 {
        (usd * 100.0).round() as u64
    } else {
        0
    }
}
