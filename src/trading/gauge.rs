//! Trailing stop computation.
//!
//! Pure functions over a [`StopLossPosition`]: the only side effect is
//! mutating the position handed to [`TrailGauge::update`]. All arithmetic is
//! done in `Decimal` so repeated updates never drift.

use rust_decimal::Decimal;

use crate::error::StopLossError;
use crate::models::{StopLossPosition, StopMode};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Outcome of feeding one price observation through the gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    /// Price is at or below the stop; the position should be exited.
    Triggered { stop_price: Decimal },
    /// Price is above the stop. `raised` is true when a new high moved the
    /// gauge state.
    NotTriggered { raised: bool },
}

impl TriggerDecision {
    pub fn is_triggered(&self) -> bool {
        matches!(self, TriggerDecision::Triggered { .. })
    }
}

/// Trailing stop calculator.
pub struct TrailGauge;

impl TrailGauge {
    /// Stop level for a freshly opened position.
    pub fn initial_stop(
        entry_price: Decimal,
        mode: StopMode,
        parameter: Decimal,
    ) -> Result<Decimal, StopLossError> {
        if parameter <= Decimal::ZERO {
            return Err(StopLossError::InvalidParameter(parameter));
        }
        if mode == StopMode::Percentage && parameter >= HUNDRED {
            return Err(StopLossError::InvalidParameter(parameter));
        }
        if entry_price <= Decimal::ZERO {
            return Err(StopLossError::InvalidPrice(entry_price));
        }

        Ok(Self::trail_from(entry_price, mode, parameter))
    }

    /// Stop level trailing `reference` by the configured distance.
    pub fn trail_from(reference: Decimal, mode: StopMode, parameter: Decimal) -> Decimal {
        match mode {
            StopMode::Percentage => reference * (Decimal::ONE - parameter / HUNDRED),
            StopMode::Fixed => reference - parameter,
        }
    }

    /// Feed one observed price into the position's gauge.
    ///
    /// A breach leaves the position untouched, so re-running the same price
    /// after a failed exit reproduces the same decision.
    pub fn update(position: &mut StopLossPosition, observed_price: Decimal) -> TriggerDecision {
        if observed_price <= position.stop_price {
            return TriggerDecision::Triggered {
                stop_price: position.stop_price,
            };
        }

        if observed_price > position.high_water_mark {
            let recomputed = Self::trail_from(observed_price, position.stop_mode, position.stop_parameter);
            position.high_water_mark = observed_price;
            position.stop_price = position.stop_price.max(recomputed);
            return TriggerDecision::NotTriggered { raised: true };
        }

        TriggerDecision::NotTriggered { raised: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(entry: Decimal, mode: StopMode, parameter: Decimal) -> StopLossPosition {
        StopLossPosition::new("SYM", 10, entry, mode, parameter).unwrap()
    }

    #[test]
    fn test_initial_stop_percentage() {
        assert_eq!(TrailGauge::initial_stop(dec!(100), StopMode::Percentage, dec!(2)).unwrap(), dec!(98));
        assert_eq!(
            TrailGauge::initial_stop(dec!(1500.50), StopMode::Percentage, dec!(2.5)).unwrap(),
            dec!(1462.9875)
        );

        for (entry, pct) in [(dec!(0.01), dec!(0.1)), (dec!(250), dec!(99.9)), (dec!(1000000), dec!(0.001))] {
            let stop = TrailGauge::initial_stop(entry, StopMode::Percentage, pct).unwrap();
            assert!(stop < entry);
        }
    }

    #[test]
    fn test_initial_stop_fixed() {
        for (entry, offset) in [(dec!(100), dec!(5)), (dec!(42.17), dec!(0.03)), (dec!(7), dec!(12))] {
            let stop = TrailGauge::initial_stop(entry, StopMode::Fixed, offset).unwrap();
            assert_eq!(stop, entry - offset);
        }
    }

    #[test]
    fn test_initial_stop_validation() {
        assert_eq!(
            TrailGauge::initial_stop(dec!(100), StopMode::Fixed, dec!(0)),
            Err(StopLossError::InvalidParameter(dec!(0)))
        );
        assert_eq!(
            TrailGauge::initial_stop(dec!(100), StopMode::Percentage, dec!(-1)),
            Err(StopLossError::InvalidParameter(dec!(-1)))
        );
        assert_eq!(
            TrailGauge::initial_stop(dec!(100), StopMode::Percentage, dec!(100)),
            Err(StopLossError::InvalidParameter(dec!(100)))
        );
        assert_eq!(
            TrailGauge::initial_stop(dec!(0), StopMode::Percentage, dec!(2)),
            Err(StopLossError::InvalidPrice(dec!(0)))
        );
        assert_eq!(
            TrailGauge::initial_stop(dec!(-3), StopMode::Fixed, dec!(1)),
            Err(StopLossError::InvalidPrice(dec!(-3)))
        );
    }

    #[test]
    fn test_trigger_boundary() {
        // 2% trail from 100, market rallied to 110.
        let mut pos = position(dec!(100), StopMode::Percentage, dec!(2));
        assert_eq!(TrailGauge::update(&mut pos, dec!(110)), TriggerDecision::NotTriggered { raised: true });
        assert_eq!(pos.high_water_mark, dec!(110));
        assert_eq!(pos.stop_price, dec!(107.8));

        let snapshot = pos.clone();
        assert_eq!(
            TrailGauge::update(&mut pos, dec!(107.81)),
            TriggerDecision::NotTriggered { raised: false }
        );
        assert_eq!(pos, snapshot);

        assert_eq!(
            TrailGauge::update(&mut pos, dec!(107.8)),
            TriggerDecision::Triggered { stop_price: dec!(107.8) }
        );
        assert_eq!(
            TrailGauge::update(&mut pos, dec!(90)),
            TriggerDecision::Triggered { stop_price: dec!(107.8) }
        );
        assert_eq!(pos, snapshot);
    }

    #[test]
    fn test_scenario_sequence() {
        let mut pos = position(dec!(100), StopMode::Percentage, dec!(2));
        assert_eq!(pos.stop_price, dec!(98));

        assert!(!TrailGauge::update(&mut pos, dec!(105)).is_triggered());
        assert_eq!(pos.high_water_mark, dec!(105));
        assert_eq!(pos.stop_price, dec!(102.9));

        assert_eq!(TrailGauge::update(&mut pos, dec!(103)), TriggerDecision::NotTriggered { raised: false });
        assert_eq!(pos.high_water_mark, dec!(105));
        assert_eq!(pos.stop_price, dec!(102.9));

        assert_eq!(
            TrailGauge::update(&mut pos, dec!(96)),
            TriggerDecision::Triggered { stop_price: dec!(102.9) }
        );
    }

    #[test]
    fn test_fixed_mode_trails_by_offset() {
        let mut pos = position(dec!(50), StopMode::Fixed, dec!(1.25));
        assert_eq!(pos.stop_price, dec!(48.75));

        TrailGauge::update(&mut pos, dec!(53.40));
        assert_eq!(pos.stop_price, dec!(52.15));
        assert!(TrailGauge::update(&mut pos, dec!(52.15)).is_triggered());
    }

    #[test]
    fn test_stop_never_loosens() {
        // A stop tighter than the recomputed level must survive a new high.
        let mut pos = position(dec!(100), StopMode::Percentage, dec!(10));
        pos.stop_price = dec!(99);

        TrailGauge::update(&mut pos, dec!(101));
        assert_eq!(pos.high_water_mark, dec!(101));
        assert_eq!(pos.stop_price, dec!(99));
    }

    #[test]
    fn test_monotonic_over_sequence() {
        // Deterministic walk with drawdowns that stay above the stop.
        let mut pos = position(dec!(100), StopMode::Percentage, dec!(5));
        let mut price = dec!(100);
        let steps = [dec!(1.7), dec!(-2.1), dec!(0.4), dec!(3.3), dec!(-1.9), dec!(-0.8), dec!(2.6), dec!(-3.0)];

        let mut prev_hwm = pos.high_water_mark;
        let mut prev_stop = pos.stop_price;
        for i in 0..200 {
            price += steps[i % steps.len()];
            if TrailGauge::update(&mut pos, price).is_triggered() {
                price = pos.high_water_mark;
                continue;
            }
            assert!(pos.high_water_mark >= prev_hwm);
            assert!(pos.stop_price >= prev_stop);
            assert!(pos.stop_price <= pos.high_water_mark);
            prev_hwm = pos.high_water_mark;
            prev_stop = pos.stop_price;
        }
    }

    #[test]
    fn test_percentage_matches_direct_computation() {
        // Many small highs; the stop must equal a single direct computation.
        let mut pos = position(dec!(100), StopMode::Percentage, dec!(1.5));
        let mut price = dec!(100);
        for _ in 0..1000 {
            price += dec!(0.01);
            TrailGauge::update(&mut pos, price);
        }

        assert_eq!(pos.high_water_mark, dec!(110));
        assert_eq!(pos.stop_price, dec!(110) * dec!(0.985));
    }
}
