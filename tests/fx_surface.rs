//! End-to-end EURUSD surface scenario: six tenors, five delta pillars,
//! mixed quoting conventions.

use std::sync::Arc;

use approx::assert_abs_diff_eq;
use chrono::NaiveDate;
use fxvolsurf::{
    AtmType, DeltaType, DeltaVolMatrix, FxSurfaceBuilder, Period, SmileSection, SmileStrategy,
    VersionedQuote, VolSurface,
};

const SPOT: f64 = 1.1172;
const DOMESTIC_RATE: f64 = 0.02;
const FOREIGN_RATE: f64 = -0.01;

fn reference_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2019, 5, 2).unwrap()
}

fn tenors() -> Vec<Period> {
    vec![
        Period::months(1),
        Period::months(2),
        Period::months(3),
        Period::months(6),
        Period::months(9),
        Period::years(1),
    ]
}

/// 10Δ put, 25Δ put, ATM, 25Δ call, 10Δ call.
fn deltas() -> Vec<Option<f64>> {
    vec![Some(-0.10), Some(-0.25), None, Some(0.25), Some(0.10)]
}

fn market_vols() -> Vec<Vec<f64>> {
    vec![
        vec![0.0554625, 0.0514875, 0.0483000, 0.0483125, 0.0499875],
        vec![0.0560750, 0.0517475, 0.0483250, 0.0482575, 0.0497000],
        vec![0.0591234, 0.0527840, 0.0482375, 0.0478411, 0.0491704],
        vec![0.0625800, 0.0547750, 0.0492500, 0.0479000, 0.0489700],
        vec![0.0657900, 0.0564225, 0.0502750, 0.0482175, 0.0491125],
        vec![0.0685000, 0.0578250, 0.0512500, 0.0485750, 0.0493750],
    ]
}

/// First four rows quoted in spot delta, last two in forward delta.
fn mixed_conventions() -> Vec<(DeltaType, AtmType)> {
    vec![
        (DeltaType::Spot, AtmType::AtmDeltaNeutral),
        (DeltaType::Spot, AtmType::AtmDeltaNeutral),
        (DeltaType::Spot, AtmType::AtmDeltaNeutral),
        (DeltaType::Spot, AtmType::AtmDeltaNeutral),
        (DeltaType::Fwd, AtmType::AtmDeltaNeutral),
        (DeltaType::Fwd, AtmType::AtmDeltaNeutral),
    ]
}

fn canonical_conventions() -> Vec<(DeltaType, AtmType)> {
    vec![(DeltaType::Fwd, AtmType::AtmDeltaNeutral); 6]
}

fn build(
    conventions: &[(DeltaType, AtmType)],
    strategy: SmileStrategy,
) -> fxvolsurf::FxBlackVolatilitySurface {
    let matrix = DeltaVolMatrix::from_vols(&market_vols(), &deltas(), conventions).unwrap();
    FxSurfaceBuilder::new()
        .matrix(matrix)
        .spot(SPOT)
        .tenors(tenors())
        .reference_date(reference_date())
        .domestic_rate(DOMESTIC_RATE)
        .foreign_rate(FOREIGN_RATE)
        .strategy(strategy)
        .build()
        .unwrap()
}

#[test]
fn query_between_tenors_is_bounded_by_market_levels() {
    let surface = build(&mixed_conventions(), SmileStrategy::Svi);
    let query_date = NaiveDate::from_ymd_opt(2020, 2, 3).unwrap();
    let days = (query_date - reference_date()).num_days() as f64;
    let t = days / 365.0;
    let vol = surface.black_vol(t, 1.1).unwrap();
    // Strike 1.1 sits near the money; the vol must land inside the quoted
    // vol range for the surrounding tenors
    assert!(vol.0 > 0.045 && vol.0 < 0.065, "vol {} out of range", vol.0);

    let smile = surface.smile_section_at_date(query_date).unwrap();
    assert_abs_diff_eq!(smile.volatility(1.1).unwrap().0, vol.0, epsilon = 1e-12);
}

#[test]
fn atm_pillar_vols_are_reproduced() {
    let surface = build(&canonical_conventions(), SmileStrategy::Svi);
    let vols = market_vols();
    for (i, &t) in surface.option_times().iter().enumerate() {
        let smile = surface.smile_section(t).unwrap();
        let atm_strike = surface
            .strikes_from_vols(t, &vols[i], DeltaType::Fwd, AtmType::AtmDeltaNeutral)
            .unwrap()[2];
        assert_abs_diff_eq!(
            smile.volatility(atm_strike).unwrap().0,
            vols[i][2],
            epsilon = 5e-4
        );
    }
}

#[test]
fn canonical_quotes_are_not_altered_by_conversion() {
    let surface = build(&canonical_conventions(), SmileStrategy::Svi);
    assert_eq!(surface.vol_matrix().unwrap(), market_vols());
}

#[test]
fn mixed_conventions_converge_to_canonical() {
    let mixed = build(&mixed_conventions(), SmileStrategy::Svi);
    let converted = mixed.vol_matrix().unwrap();

    // Spot-delta rows move, forward-delta rows pass through
    assert_ne!(converted[0], market_vols()[0]);
    assert_eq!(converted[4], market_vols()[4]);
    assert_eq!(converted[5], market_vols()[5]);

    // Re-feeding converted vols in canonical conventions is a fixed point
    let matrix =
        DeltaVolMatrix::from_vols(&converted, &deltas(), &canonical_conventions()).unwrap();
    let canonical = FxSurfaceBuilder::new()
        .matrix(matrix)
        .spot(SPOT)
        .tenors(tenors())
        .reference_date(reference_date())
        .domestic_rate(DOMESTIC_RATE)
        .foreign_rate(FOREIGN_RATE)
        .build()
        .unwrap();
    assert_eq!(canonical.vol_matrix().unwrap(), converted);
}

#[test]
fn short_expiry_uses_first_smile_at_rescaled_strike() {
    let surface = build(&canonical_conventions(), SmileStrategy::Svi);
    let t1 = surface.option_times()[0];
    let t = 0.5 * t1;
    let strike = 1.1;
    let rescaled = strike * surface.forward_value(t) / surface.forward_value(t1);
    let expected = surface.smile_section(t1).unwrap().volatility(rescaled).unwrap();
    assert_abs_diff_eq!(
        surface.black_vol(t, strike).unwrap().0,
        expected.0,
        epsilon = 1e-15
    );
}

#[test]
fn smile_sections_are_reused_until_quotes_move() {
    let surface = build(&canonical_conventions(), SmileStrategy::Svi);
    let t = 0.4;
    let first = surface.smile_section(t).unwrap();
    let second = surface.smile_section(t).unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    // Touch one quote: the cached section must not be served again
    surface.delta_vol_matrix().rows()[2][2].quote().set(0.0490);
    let third = surface.smile_section(t).unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
}

#[test]
fn spot_quote_updates_shift_the_forward() {
    let spot = Arc::new(VersionedQuote::new(SPOT));
    let matrix =
        DeltaVolMatrix::from_vols(&market_vols(), &deltas(), &canonical_conventions()).unwrap();
    let surface = FxSurfaceBuilder::new()
        .matrix(matrix)
        .spot_quote(Arc::clone(&spot))
        .tenors(tenors())
        .reference_date(reference_date())
        .domestic_rate(DOMESTIC_RATE)
        .foreign_rate(FOREIGN_RATE)
        .build()
        .unwrap();

    let atm_before = surface.smile_section(0.5).unwrap().atm_level();
    spot.set(1.15);
    let atm_after = surface.smile_section(0.5).unwrap().atm_level();
    assert_abs_diff_eq!(atm_after / atm_before, 1.15 / SPOT, epsilon = 1e-12);
}

#[test]
fn duplicate_tenors_fail_construction() {
    let matrix =
        DeltaVolMatrix::from_vols(&market_vols(), &deltas(), &canonical_conventions()).unwrap();
    let result = FxSurfaceBuilder::new()
        .matrix(matrix)
        .spot(SPOT)
        .tenors(vec![
            Period::months(1),
            Period::months(2),
            Period::months(2),
            Period::months(6),
            Period::months(9),
            Period::years(1),
        ])
        .reference_date(reference_date())
        .domestic_rate(DOMESTIC_RATE)
        .foreign_rate(FOREIGN_RATE)
        .build();
    assert!(result.is_err());
}

#[test]
fn sabr_and_kahale_strategies_handle_the_scenario() {
    for strategy in [
        SmileStrategy::Sabr { gamma: 1.0 },
        SmileStrategy::Kahale {
            interpolate: false,
            exponential_extrapolation: true,
            delete_arbitrage_points: false,
        },
    ] {
        let surface = build(&canonical_conventions(), strategy);
        let vol = surface.black_vol(0.75, 1.1).unwrap();
        assert!(vol.0 > 0.03 && vol.0 < 0.09, "{strategy:?}: vol {}", vol.0);
    }
}

#[test]
fn option_dates_and_tenors_line_up() {
    let surface = build(&canonical_conventions(), SmileStrategy::Svi);
    assert_eq!(surface.option_dates().len(), 6);
    assert_eq!(surface.option_tenors(), tenors().as_slice());
    for pair in surface.option_dates().windows(2) {
        assert!(pair[0] < pair[1]);
    }
    for pair in surface.option_times().windows(2) {
        assert!(pair[0] < pair[1]);
    }
    let by_tenor = surface.smile_section_at_tenor(Period::months(6)).unwrap();
    let by_time = surface.smile_section(surface.option_times()[3]).unwrap();
    assert!(Arc::ptr_eq(&by_tenor, &by_time));
}
