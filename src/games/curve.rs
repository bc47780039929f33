//! Multiplier growth curves.
//!
//! A curve maps the tick count of a running round to the displayed multiplier.
//! Every curve starts at 1.00 and is strictly increasing, so a round always
//! reaches its crash point in a finite number of ticks.

use crate::config::GrowthConfig;
use crate::games::types::Multiplier;
use std::time::Duration;

pub trait GrowthCurve: Send + Sync {
    /// Multiplier after `tick` ticks; `multiplier_at(0)` is 1.00
    fn multiplier_at(&self, tick: u64) -> Multiplier;
}

/// Fixed increment per tick
#[derive(Debug, Clone, Copy)]
pub struct LinearGrowth {
    step_hundredths: u64,
}

impl LinearGrowth {
    pub fn new(step_hundredths: u64) -> Self {
        Self {
            step_hundredths: step_hundredths.max(1),
        }
    }
}

impl Default for LinearGrowth {
    fn default() -> Self {
        Self::new(3)
    }
}

impl GrowthCurve for LinearGrowth {
    fn multiplier_at(&self, tick: u64) -> Multiplier {
        let growth = tick.saturating_mul(self.step_hundredths);
        Multiplier::from_hundredths(Multiplier::ONE.hundredths().saturating_add(growth))
    }
}

/// `e^(rate * elapsed)` floored to hundredths, plus one hundredth per tick so
/// that flat stretches of the floor still move.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialGrowth {
    rate_per_second: f64,
    tick_seconds: f64,
}

impl ExponentialGrowth {
    pub fn new(rate_per_second: f64, tick: Duration) -> Self {
        Self {
            rate_per_second,
            tick_seconds: tick.as_secs_f64(),
        }
    }
}

impl GrowthCurve for ExponentialGrowth {
    fn multiplier_at(&self, tick: u64) -> Multiplier {
        let elapsed = tick as f64 * self.tick_seconds;
        // Float to int casts saturate, so huge exponents pin at u64::MAX
        let floored = (100.0 * (self.rate_per_second * elapsed).exp()).floor() as u64;
        Multiplier::from_hundredths(floored.max(Multiplier::ONE.hundredths()).saturating_add(tick))
    }
}

pub fn curve_from_config(growth: &GrowthConfig, tick: Duration) -> Box<dyn GrowthCurve> {
    match growth {
        GrowthConfig::Linear { step_hundredths } => Box::new(LinearGrowth::new(*step_hundredths)),
        GrowthConfig::Exponential { rate_per_second } => {
            Box::new(ExponentialGrowth::new(*rate_per_second, tick))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_strictly_increasing(curve: &dyn GrowthCurve, ticks: u64) {
        let mut previous = curve.multiplier_at(0);
        assert_eq!(previous, Multiplier::ONE);

        for tick in 1..ticks {
            let next = curve.multiplier_at(tick);
            assert!(next > previous, "tick {}: {} is not above {}", tick, next, previous);
            previous = next;
        }
    }

    #[test]
    fn test_linear_default_matches_three_hundredths_per_tick() {
        let curve = LinearGrowth::default();
        assert_eq!(curve.multiplier_at(1).to_string(), "1.03");
        assert_eq!(curve.multiplier_at(10).to_string(), "1.30");
        assert_strictly_increasing(&curve, 10_000);
    }

    #[test]
    fn test_exponential_is_strictly_increasing() {
        let curve = ExponentialGrowth::new(0.06, Duration::from_millis(100));
        assert_strictly_increasing(&curve, 10_000);
    }

    #[test]
    fn test_exponential_tracks_exp() {
        let curve = ExponentialGrowth::new(0.1, Duration::from_secs(1));
        // e^1 = 2.718..., floored to 2.71, plus 10 ticks
        assert_eq!(curve.multiplier_at(10), Multiplier::from_hundredths(281));
    }

    #[test]
    fn test_curve_from_config() {
        let linear = curve_from_config(
            &GrowthConfig::Linear { step_hundredths: 5 },
            Duration::from_millis(100),
        );
        assert_eq!(linear.multiplier_at(22).to_string(), "2.10");

        let exponential = curve_from_config(
            &GrowthConfig::Exponential { rate_per_second: 0.06 },
            Duration::from_millis(100),
        );
        assert_eq!(exponential.multiplier_at(0), Multiplier::ONE);
    }
}
